//! The participant registry and leader election.
//!
//! # Election rule
//!
//! ```text
//! join into empty session ──→ joiner leads
//! leader leaves ────────────→ earliest-joined remaining participant leads
//! anyone else leaves ───────→ leader unchanged
//! last participant leaves ──→ no leader
//! ```
//!
//! Leadership is sticky: it is never recomputed while the current leader
//! is still connected, even if someone who joined earlier is present.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use wavesync_protocol::{ParticipantId, RosterEntry};

/// Ids are process-wide and strictly increasing, so they never repeat
/// across sessions and sort in join order.
static NEXT_PARTICIPANT_ID: AtomicU64 = AtomicU64::new(1);

/// Longest display name kept after sanitizing.
const MAX_NAME_LEN: usize = 24;

/// One connected client.
///
/// There is no `is_leader` field: leadership lives in the registry's single
/// leader pointer and is derived on read, so two participants can never
/// both claim it.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub rank_summary: Option<String>,
    pub ready: bool,
    pub joined_at: Instant,
}

/// What a `leave` changed.
#[derive(Debug, Clone)]
pub struct Departure {
    /// The participant that was removed.
    pub participant: Participant,
    /// `true` if the departing participant held leadership.
    pub was_leader: bool,
    /// Leader after the departure (`None` once the session is empty).
    pub leader: Option<ParticipantId>,
}

/// Connected participants of one session plus the leader pointer.
///
/// Invariant: `leader` is `None` exactly when the registry is empty, and
/// otherwise names a participant currently in it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Keyed by id; ids are monotonic, so iteration is join order.
    participants: BTreeMap<ParticipantId, Participant>,
    leader: Option<ParticipantId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new participant and returns its freshly assigned id.
    ///
    /// A client that joins twice (e.g. after a reconnect) becomes two
    /// distinct participants.
    pub fn join(&mut self, name: &str, now: Instant) -> ParticipantId {
        let id = ParticipantId(NEXT_PARTICIPANT_ID.fetch_add(1, Ordering::Relaxed));
        let display_name = clean_name(name).unwrap_or_else(|| format!("Player {}", id.0));

        self.participants.insert(
            id,
            Participant {
                id,
                display_name,
                rank_summary: None,
                ready: false,
                joined_at: now,
            },
        );

        if self.leader.is_none() {
            self.leader = Some(id);
            tracing::info!(participant_id = %id, "leader elected (first to join)");
        }

        id
    }

    /// Removes a participant, re-electing if it was the leader.
    ///
    /// Unknown ids are a no-op and return `None`.
    pub fn leave(&mut self, id: ParticipantId) -> Option<Departure> {
        let participant = self.participants.remove(&id)?;
        let was_leader = self.leader == Some(id);

        if was_leader {
            // First key = earliest joined of those still here.
            self.leader = self.participants.keys().next().copied();
            match self.leader {
                Some(next) => tracing::info!(
                    previous = %id,
                    leader = %next,
                    "leader re-elected"
                ),
                None => tracing::debug!(previous = %id, "session empty, no leader"),
            }
        }

        Some(Departure {
            participant,
            was_leader,
            leader: self.leader,
        })
    }

    /// Updates display name and rank summary (`lobby.register`).
    ///
    /// A name that sanitizes to nothing keeps the old one. Returns `false`
    /// for unknown ids.
    pub fn register(
        &mut self,
        id: ParticipantId,
        name: &str,
        rank_summary: Option<String>,
    ) -> bool {
        let Some(participant) = self.participants.get_mut(&id) else {
            return false;
        };
        if let Some(name) = clean_name(name) {
            participant.display_name = name;
        }
        participant.rank_summary = rank_summary.and_then(|rank| clean_name(&rank));
        true
    }

    /// Flips a participant's ready flag and returns the new value.
    pub fn toggle_ready(&mut self, id: ParticipantId) -> Option<bool> {
        let participant = self.participants.get_mut(&id)?;
        participant.ready = !participant.ready;
        Some(participant.ready)
    }

    /// Clears every ready flag (used when a match ends).
    pub fn clear_ready(&mut self) {
        for participant in self.participants.values_mut() {
            participant.ready = false;
        }
    }

    /// The current leader, if anyone is connected.
    pub fn leader(&self) -> Option<ParticipantId> {
        self.leader
    }

    /// Returns `true` if `id` is the current leader.
    pub fn is_leader(&self, id: ParticipantId) -> bool {
        self.leader == Some(id)
    }

    /// Returns `true` if the session has participants and all are ready.
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.values().all(|p| p.ready)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Participants in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Participant ids in join order.
    pub fn ids(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.participants.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// The roster as broadcast in `lobby.snapshot`, in join order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.participants
            .values()
            .map(|p| RosterEntry {
                id: p.id,
                name: p.display_name.clone(),
                ready: p.ready,
                is_leader: self.is_leader(p.id),
                rank_summary: p.rank_summary.clone(),
            })
            .collect()
    }
}

/// Drops control characters, trims, truncates, then escapes.
///
/// Unlike chat text, an over-long name is cut rather than refused.
fn clean_name(raw: &str) -> Option<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }
    let bounded: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    Some(crate::chat::escape_html(&bounded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[&str]) -> (SessionRegistry, Vec<ParticipantId>) {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let ids = names.iter().map(|n| registry.join(n, now)).collect();
        (registry, ids)
    }

    /// At most one leader, and it is connected; none iff empty.
    fn assert_leader_invariant(registry: &SessionRegistry) {
        match registry.leader() {
            Some(leader) => assert!(registry.contains(leader)),
            None => assert!(registry.is_empty()),
        }
        let flagged = registry.snapshot().iter().filter(|e| e.is_leader).count();
        assert_eq!(flagged, usize::from(!registry.is_empty()));
    }

    // =====================================================================
    // join()
    // =====================================================================

    #[test]
    fn test_join_first_participant_becomes_leader() {
        let (registry, ids) = registry_with(&["A"]);
        assert_eq!(registry.leader(), Some(ids[0]));
        assert_leader_invariant(&registry);
    }

    #[test]
    fn test_join_later_participants_do_not_take_leadership() {
        let (registry, ids) = registry_with(&["A", "B", "C"]);
        assert_eq!(registry.leader(), Some(ids[0]));
        assert!(!registry.is_leader(ids[1]));
    }

    #[test]
    fn test_join_same_name_twice_yields_distinct_participants() {
        let (registry, ids) = registry_with(&["Ann", "Ann"]);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_join_blank_name_gets_placeholder() {
        let (registry, ids) = registry_with(&["   "]);
        let name = &registry.get(ids[0]).unwrap().display_name;
        assert_eq!(name, &format!("Player {}", ids[0].0));
    }

    // =====================================================================
    // leave() / election
    // =====================================================================

    #[test]
    fn test_leave_leader_elects_earliest_remaining() {
        let (mut registry, ids) = registry_with(&["A", "B", "C"]);
        // C is ready and B isn't; readiness must not matter for election.
        registry.toggle_ready(ids[2]);

        let departure = registry.leave(ids[0]).unwrap();
        assert!(departure.was_leader);
        assert_eq!(departure.leader, Some(ids[1]));
        assert_eq!(registry.leader(), Some(ids[1]));
        assert_leader_invariant(&registry);
    }

    #[test]
    fn test_leave_non_leader_keeps_leader() {
        let (mut registry, ids) = registry_with(&["A", "B", "C"]);
        let departure = registry.leave(ids[1]).unwrap();
        assert!(!departure.was_leader);
        assert_eq!(registry.leader(), Some(ids[0]));
    }

    #[test]
    fn test_leadership_is_sticky_over_more_senior_participants() {
        // A leads, B joins, A leaves → B leads. A reconnects as a new
        // participant; B keeps leading even though "A" was there first.
        let (mut registry, ids) = registry_with(&["A", "B"]);
        registry.leave(ids[0]);
        let returning_a = registry.join("A", Instant::now());
        assert_eq!(registry.leader(), Some(ids[1]));
        assert!(!registry.is_leader(returning_a));
    }

    #[test]
    fn test_leave_last_participant_clears_leader() {
        let (mut registry, ids) = registry_with(&["A"]);
        let departure = registry.leave(ids[0]).unwrap();
        assert_eq!(departure.leader, None);
        assert!(registry.is_empty());
        assert_leader_invariant(&registry);
    }

    #[test]
    fn test_leave_unknown_id_is_noop() {
        let (mut registry, ids) = registry_with(&["A", "B"]);
        assert!(registry.leave(ParticipantId(u64::MAX)).is_none());
        registry.leave(ids[1]);
        assert!(registry.leave(ids[1]).is_none(), "second leave is idempotent");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_leader_invariant_holds_over_join_leave_sequence() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let mut live = Vec::new();
        for step in 0..40u64 {
            if step % 3 == 2 && !live.is_empty() {
                let idx = (step as usize * 7) % live.len();
                let id = live.remove(idx);
                let leader_before = registry.leader();
                registry.leave(id);
                if leader_before != Some(id) {
                    assert_eq!(registry.leader(), leader_before, "leader changed without leaving");
                }
            } else {
                let leader_before = registry.leader();
                live.push(registry.join("p", now));
                if leader_before.is_some() {
                    assert_eq!(registry.leader(), leader_before);
                }
            }
            assert_leader_invariant(&registry);
        }
    }

    // =====================================================================
    // register() / ready
    // =====================================================================

    #[test]
    fn test_register_updates_name_and_rank() {
        let (mut registry, ids) = registry_with(&["A"]);
        assert!(registry.register(ids[0], "  Vex  ", Some("Gold III".into())));
        let p = registry.get(ids[0]).unwrap();
        assert_eq!(p.display_name, "Vex");
        assert_eq!(p.rank_summary.as_deref(), Some("Gold III"));
    }

    #[test]
    fn test_register_escapes_markup_in_name() {
        let (mut registry, ids) = registry_with(&["A"]);
        registry.register(ids[0], "<b>x</b>", None);
        assert_eq!(registry.get(ids[0]).unwrap().display_name, "&lt;b&gt;x&lt;/b&gt;");
    }

    #[test]
    fn test_register_truncates_long_name() {
        let (mut registry, ids) = registry_with(&["A"]);
        registry.register(ids[0], &"n".repeat(100), None);
        assert_eq!(registry.get(ids[0]).unwrap().display_name.len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_register_unknown_id_returns_false() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.register(ParticipantId(u64::MAX), "x", None));
    }

    #[test]
    fn test_toggle_ready_flips_and_all_ready() {
        let (mut registry, ids) = registry_with(&["A", "B"]);
        assert!(!registry.all_ready());
        assert_eq!(registry.toggle_ready(ids[0]), Some(true));
        assert_eq!(registry.toggle_ready(ids[1]), Some(true));
        assert!(registry.all_ready());
        assert_eq!(registry.toggle_ready(ids[1]), Some(false));
        assert!(!registry.all_ready());

        registry.toggle_ready(ids[1]);
        registry.clear_ready();
        assert!(registry.iter().all(|p| !p.ready));
    }

    #[test]
    fn test_all_ready_false_when_empty() {
        assert!(!SessionRegistry::new().all_ready());
    }

    #[test]
    fn test_snapshot_is_in_join_order_with_leader_flag() {
        let (registry, ids) = registry_with(&["A", "B", "C"]);
        let snapshot = registry.snapshot();
        let order: Vec<_> = snapshot.iter().map(|e| e.id).collect();
        assert_eq!(order, ids);
        assert!(snapshot[0].is_leader);
        assert!(!snapshot[1].is_leader && !snapshot[2].is_leader);
    }
}
