//! Entity event authorization.
//!
//! The relay is a filter, not a simulation: it answers "may this event go
//! out, and to whom" and never inspects positions or health.

use wavesync_lobby::{MatchPhase, SessionRegistry};
use wavesync_protocol::{Channel, EntityEvent, ParticipantId, Recipient};

/// What to do with an incoming entity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// Re-emit verbatim to `recipient` on `channel`.
    Forward { recipient: Recipient, channel: Channel },
    /// Silently discard.
    Drop(DropReason),
}

/// Why an event was discarded. Only ever logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The sender is not the current leader. Usually a stale client that
    /// hasn't seen the latest roster yet.
    NotLeader,
    /// The match isn't running.
    NotRunning,
}

/// Leader-only fan-out of spawn/update/hit/die events.
pub struct EntitySyncRelay;

impl EntitySyncRelay {
    /// Decides whether `sender`'s event is relayed.
    ///
    /// Allowed events go to every participant except the sender, on the
    /// event's own channel (unreliable for `update`, reliable otherwise).
    pub fn authorize(
        phase: MatchPhase,
        registry: &SessionRegistry,
        sender: ParticipantId,
        event: &EntityEvent,
    ) -> RelayDecision {
        if !registry.is_leader(sender) {
            return RelayDecision::Drop(DropReason::NotLeader);
        }
        if !phase.relays_entities() {
            return RelayDecision::Drop(DropReason::NotRunning);
        }
        RelayDecision::Forward {
            recipient: Recipient::AllExcept(sender),
            channel: event.channel(),
        }
    }
}
