//! Leader-side delta broadcasting.
//!
//! Once per simulation tick the leader hands its live entities to
//! [`DeltaBroadcastScheduler::tick`]. The scheduler decides whether this
//! tick is due at all (adaptive interval), which entities moved enough to
//! matter (change detection against the last transmitted state), and
//! whether a delta or a full snapshot goes out.
//!
//! ```text
//! live entities ──→ due? ──no──→ None
//!                    │yes
//!                    ▼
//!              changed set ──(cache empty or changed/live ≥ ratio)──→ Full
//!                    │
//!                    └──(otherwise, non-empty)──→ Delta
//! ```
//!
//! [`LeaderSync`] glues the scheduler to an [`EntitySink`] so discrete
//! events (spawn, hit, die) go out reliably and position batches go out on
//! the drop-if-busy channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use wavesync_protocol::{EntityEvent, EntityId, EntityState};

use crate::ClientError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning for the leader's broadcast loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Interval with no live entities and a healthy link (10 Hz).
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Subtracted from the base interval per live entity.
    pub per_entity: Duration,
    /// RTT above which `latency_penalty` is added.
    pub latency_threshold: Duration,
    pub latency_penalty: Duration,
    /// Movement on either axis beyond this counts as a change.
    pub position_epsilon: f32,
    /// Speed difference beyond this counts as a change.
    pub speed_epsilon: f32,
    /// Share of changed entities (0.0–1.0) at which a full snapshot is
    /// sent instead of a delta.
    pub full_snapshot_ratio: f32,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(200),
            per_entity: Duration::from_micros(500),
            latency_threshold: Duration::from_millis(100),
            latency_penalty: Duration::from_millis(20),
            position_epsilon: 1.0,
            speed_epsilon: 0.01,
            full_snapshot_ratio: 0.8,
        }
    }
}

impl BroadcastConfig {
    /// Fixes out-of-range values so the config is safe to use.
    ///
    /// Called by [`DeltaBroadcastScheduler::new`]. Rules:
    /// - `min_interval` forced ≤ `max_interval`.
    /// - `full_snapshot_ratio` clamped to `0.0..=1.0`.
    /// - negative epsilons become 0.
    pub fn validated(mut self) -> Self {
        if self.min_interval > self.max_interval {
            warn!(
                min = ?self.min_interval,
                max = ?self.max_interval,
                "min_interval above max_interval, swapping"
            );
            std::mem::swap(&mut self.min_interval, &mut self.max_interval);
        }
        self.full_snapshot_ratio = self.full_snapshot_ratio.clamp(0.0, 1.0);
        self.position_epsilon = self.position_epsilon.max(0.0);
        self.speed_epsilon = self.speed_epsilon.max(0.0);
        self
    }

    /// `clamp(base - per_entity × live, min, max)`, plus the latency
    /// penalty when `rtt` exceeds the threshold.
    ///
    /// The penalty is added after clamping, so a slow link can push the
    /// interval past `max_interval`.
    pub fn interval_for(&self, live: usize, rtt: Option<Duration>) -> Duration {
        let shrink = self.per_entity.saturating_mul(live.min(u32::MAX as usize) as u32);
        let mut interval = self
            .base_interval
            .saturating_sub(shrink)
            .clamp(self.min_interval, self.max_interval);
        if rtt.is_some_and(|rtt| rtt > self.latency_threshold) {
            interval += self.latency_penalty;
        }
        interval
    }

    fn is_changed(&self, previous: &EntityState, current: &EntityState) -> bool {
        (current.x - previous.x).abs() > self.position_epsilon
            || (current.y - previous.y).abs() > self.position_epsilon
            || current.health != previous.health
            || (current.speed - previous.speed).abs() > self.speed_epsilon
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// What one broadcast cycle emits.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    /// Every live entity; the cache was rebuilt from exactly this set.
    Full(Vec<EntityState>),
    /// Only the changed entities.
    Delta(Vec<EntityState>),
}

impl Broadcast {
    pub fn entities(&self) -> &[EntityState] {
        match self {
            Self::Full(e) | Self::Delta(e) => e,
        }
    }

    pub fn into_entities(self) -> Vec<EntityState> {
        match self {
            Self::Full(e) | Self::Delta(e) => e,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Counters for the broadcast loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastMetrics {
    /// Ticks that ran change detection.
    pub cycles: u64,
    /// Ticks skipped because the interval hadn't elapsed.
    pub skipped: u64,
    pub full_snapshots: u64,
    pub deltas: u64,
    /// Cycles where nothing had changed.
    pub idle: u64,
    /// Entity states handed to the sink across all broadcasts.
    pub entities_sent: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Adaptive-rate delta compressor for the leader's entity state.
///
/// Invariant: after every emitted [`Broadcast`], the cache holds exactly
/// what has been transmitted. A full snapshot replaces the cache outright
/// (dropping entries for entities no longer alive); a delta patches only
/// the entries it carries.
#[derive(Debug)]
pub struct DeltaBroadcastScheduler {
    config: BroadcastConfig,
    /// Last transmitted state per entity.
    cache: HashMap<EntityId, EntityState>,
    last_broadcast: Option<Instant>,
    metrics: BroadcastMetrics,
}

impl DeltaBroadcastScheduler {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config: config.validated(),
            cache: HashMap::new(),
            last_broadcast: None,
            metrics: BroadcastMetrics::default(),
        }
    }

    /// Current send interval for `live` entities and the measured RTT.
    pub fn interval(&self, live: usize, rtt: Option<Duration>) -> Duration {
        self.config.interval_for(live, rtt)
    }

    /// Runs one cycle. Returns `None` when the cycle is skipped or nothing
    /// changed.
    pub fn tick(
        &mut self,
        now: Instant,
        live: &[EntityState],
        rtt: Option<Duration>,
    ) -> Option<Broadcast> {
        let interval = self.interval(live.len(), rtt);
        if let Some(last) = self.last_broadcast {
            if now.saturating_duration_since(last) < interval {
                self.metrics.skipped += 1;
                return None;
            }
        }
        if live.is_empty() {
            return None;
        }
        self.metrics.cycles += 1;

        let changed: Vec<EntityState> = live
            .iter()
            .filter(|current| match self.cache.get(&current.id) {
                Some(previous) => self.config.is_changed(previous, current),
                None => true,
            })
            .copied()
            .collect();

        let ratio = changed.len() as f32 / live.len() as f32;
        let broadcast = if self.cache.is_empty() || ratio >= self.config.full_snapshot_ratio {
            self.cache = live.iter().map(|e| (e.id, *e)).collect();
            self.metrics.full_snapshots += 1;
            debug!(live = live.len(), changed = changed.len(), "full snapshot");
            Broadcast::Full(live.to_vec())
        } else if changed.is_empty() {
            self.metrics.idle += 1;
            trace!(live = live.len(), "nothing changed");
            return None;
        } else {
            for entity in &changed {
                self.cache.insert(entity.id, *entity);
            }
            self.metrics.deltas += 1;
            trace!(live = live.len(), changed = changed.len(), ?interval, "delta");
            Broadcast::Delta(changed)
        };

        self.metrics.entities_sent += broadcast.entities().len() as u64;
        self.last_broadcast = Some(now);
        Some(broadcast)
    }

    /// Drops a dead entity from the cache.
    pub fn forget(&mut self, id: EntityId) {
        self.cache.remove(&id);
    }

    /// Empties the cache so the next cycle sends a full snapshot.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    pub fn cached(&self, id: EntityId) -> Option<&EntityState> {
        self.cache.get(&id)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn metrics(&self) -> &BroadcastMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }
}

impl Default for DeltaBroadcastScheduler {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

// ---------------------------------------------------------------------------
// LeaderSync
// ---------------------------------------------------------------------------

/// Where the leader's entity events go.
///
/// `submit` must not block: implementations queue the event and pick the
/// channel from [`EntityEvent::channel`].
pub trait EntitySink {
    fn submit(&self, event: EntityEvent) -> Result<(), ClientError>;
}

impl<T: EntitySink + ?Sized> EntitySink for &T {
    fn submit(&self, event: EntityEvent) -> Result<(), ClientError> {
        (**self).submit(event)
    }
}

impl<T: EntitySink + ?Sized> EntitySink for Arc<T> {
    fn submit(&self, event: EntityEvent) -> Result<(), ClientError> {
        (**self).submit(event)
    }
}

/// The leader's outbound entity pipeline.
pub struct LeaderSync<S> {
    scheduler: DeltaBroadcastScheduler,
    sink: S,
}

impl<S: EntitySink> LeaderSync<S> {
    pub fn new(config: BroadcastConfig, sink: S) -> Self {
        Self {
            scheduler: DeltaBroadcastScheduler::new(config),
            sink,
        }
    }

    /// Announces a new entity. The next cycle treats it as first-seen.
    pub fn spawn(&mut self, kind: &str, state: EntityState) -> Result<(), ClientError> {
        self.sink.submit(EntityEvent::Spawn {
            id: state.id,
            kind: kind.to_string(),
            x: state.x,
            y: state.y,
            health: state.health,
            speed: state.speed,
        })
    }

    pub fn hit(&mut self, id: EntityId, new_health: i32) -> Result<(), ClientError> {
        self.sink.submit(EntityEvent::Hit { id, new_health })
    }

    pub fn die(&mut self, id: EntityId, is_special: bool) -> Result<(), ClientError> {
        self.scheduler.forget(id);
        self.sink.submit(EntityEvent::Die { id, is_special })
    }

    /// Runs one broadcast cycle and submits the result.
    ///
    /// Returns the number of entity states sent. If the sink refuses the
    /// batch the cache is invalidated, since it would otherwise claim
    /// states nobody received.
    pub fn tick(
        &mut self,
        now: Instant,
        live: &[EntityState],
        rtt: Option<Duration>,
    ) -> Result<usize, ClientError> {
        let Some(broadcast) = self.scheduler.tick(now, live, rtt) else {
            return Ok(0);
        };
        let entities = broadcast.into_entities();
        let sent = entities.len();
        if let Err(e) = self.sink.submit(EntityEvent::Update(entities)) {
            self.scheduler.invalidate();
            return Err(e);
        }
        Ok(sent)
    }

    pub fn scheduler(&self) -> &DeltaBroadcastScheduler {
        &self.scheduler
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use wavesync_protocol::Channel;

    use super::*;

    fn entity(id: u64, x: f32) -> EntityState {
        EntityState {
            id: EntityId(id),
            x,
            y: 0.0,
            health: 10,
            speed: 1.0,
        }
    }

    fn world(n: u64) -> Vec<EntityState> {
        (1..=n).map(|i| entity(i, i as f32 * 10.0)).collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_interval_for_scales_with_entity_count() {
        let config = BroadcastConfig::default();
        assert_eq!(config.interval_for(0, None), ms(100));
        assert_eq!(config.interval_for(40, None), ms(80));
        assert_eq!(config.interval_for(100, None), ms(50));
        assert_eq!(config.interval_for(10_000, None), ms(50));
    }

    #[test]
    fn test_interval_for_adds_latency_penalty_over_threshold() {
        let config = BroadcastConfig::default();
        assert_eq!(config.interval_for(0, Some(ms(100))), ms(100));
        assert_eq!(config.interval_for(0, Some(ms(101))), ms(120));
        assert_eq!(config.interval_for(100, Some(ms(250))), ms(70));
    }

    #[test]
    fn test_validated_swaps_inverted_bounds_and_clamps_ratio() {
        let config = BroadcastConfig {
            min_interval: ms(300),
            max_interval: ms(40),
            full_snapshot_ratio: 3.0,
            ..BroadcastConfig::default()
        }
        .validated();
        assert_eq!(config.min_interval, ms(40));
        assert_eq!(config.max_interval, ms(300));
        assert_eq!(config.full_snapshot_ratio, 1.0);
    }

    #[test]
    fn test_tick_first_cycle_is_full_snapshot() {
        let mut s = DeltaBroadcastScheduler::default();
        let live = world(5);
        let out = s.tick(Instant::now(), &live, None).unwrap();
        assert_eq!(out, Broadcast::Full(live.clone()));
        assert_eq!(s.cache_len(), 5);
    }

    #[test]
    fn test_tick_before_interval_is_skipped() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let mut live = world(5);
        s.tick(t0, &live, None).unwrap();

        // Five live entities: 100 - 2.5 = 97.5 ms.
        live[0].x += 50.0;
        assert!(s.tick(t0 + ms(97), &live, None).is_none());
        assert_eq!(s.metrics().skipped, 1);
        assert!(s.tick(t0 + ms(98), &live, None).is_some());
    }

    #[test]
    fn test_tick_delta_contains_only_changed_entities() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let mut live = world(10);
        s.tick(t0, &live, None).unwrap();

        live[2].x += 1.5;
        live[5].health -= 1;
        live[7].speed += 0.5;
        // Below every threshold: not a change.
        live[8].x += 0.9;
        live[9].speed += 0.005;

        let out = s.tick(t0 + ms(200), &live, None).unwrap();
        let ids: Vec<u64> = out.entities().iter().map(|e| e.id.0).collect();
        assert!(!out.is_full());
        assert_eq!(ids, vec![3, 6, 8]);

        // Cache patched for the sent ones only.
        assert_eq!(s.cached(EntityId(3)).unwrap().x, live[2].x);
        assert_ne!(s.cached(EntityId(9)).unwrap().x, live[8].x);
    }

    #[test]
    fn test_tick_sub_threshold_drift_accumulates_against_last_sent() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let mut live = world(10);
        s.tick(t0, &live, None).unwrap();

        live[0].x += 0.6;
        assert!(s.tick(t0 + ms(200), &live, None).is_none());
        live[0].x += 0.6;
        let out = s.tick(t0 + ms(400), &live, None).unwrap();
        assert_eq!(out.entities().len(), 1);
    }

    #[test]
    fn test_tick_unchanged_world_sends_nothing() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let live = world(4);
        s.tick(t0, &live, None).unwrap();
        assert!(s.tick(t0 + ms(500), &live, None).is_none());
        assert_eq!(s.metrics().idle, 1);
    }

    #[test]
    fn test_tick_eighty_percent_changed_falls_back_to_full() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let mut live = world(10);
        s.tick(t0, &live, None).unwrap();

        for e in live.iter_mut().take(8) {
            e.y += 5.0;
        }
        let out = s.tick(t0 + ms(200), &live, None).unwrap();
        assert!(out.is_full());
        assert_eq!(out.entities().len(), 10);
        for e in &live {
            assert_eq!(s.cached(e.id), Some(e));
        }
    }

    #[test]
    fn test_tick_seventy_percent_changed_stays_delta() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let mut live = world(10);
        s.tick(t0, &live, None).unwrap();

        for e in live.iter_mut().take(7) {
            e.y += 5.0;
        }
        let out = s.tick(t0 + ms(200), &live, None).unwrap();
        assert!(!out.is_full());
        assert_eq!(out.entities().len(), 7);
    }

    #[test]
    fn test_full_snapshot_prunes_dead_entries() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        s.tick(t0, &world(5), None).unwrap();

        // Entity 5 vanished without a die event; everything else moved.
        let mut live = world(4);
        for e in &mut live {
            e.x += 10.0;
        }
        let out = s.tick(t0 + ms(200), &live, None).unwrap();
        assert!(out.is_full());
        assert_eq!(s.cache_len(), 4);
        assert!(s.cached(EntityId(5)).is_none());
    }

    #[test]
    fn test_new_entity_is_first_seen_change() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let mut live = world(10);
        s.tick(t0, &live, None).unwrap();

        live.push(entity(11, 0.0));
        let out = s.tick(t0 + ms(200), &live, None).unwrap();
        assert_eq!(out, Broadcast::Delta(vec![entity(11, 0.0)]));
    }

    #[test]
    fn test_invalidate_forces_full_snapshot() {
        let mut s = DeltaBroadcastScheduler::default();
        let t0 = Instant::now();
        let live = world(10);
        s.tick(t0, &live, None).unwrap();
        s.invalidate();
        assert!(s.tick(t0 + ms(200), &live, None).unwrap().is_full());
    }

    #[test]
    fn test_tick_with_no_live_entities_sends_nothing() {
        let mut s = DeltaBroadcastScheduler::default();
        assert!(s.tick(Instant::now(), &[], None).is_none());
        assert_eq!(s.metrics().cycles, 0);
    }

    /// Records submissions; fails updates when `fail` is set.
    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<EntityEvent>>,
        fail: bool,
    }

    impl EntitySink for RecordingSink {
        fn submit(&self, event: EntityEvent) -> Result<(), ClientError> {
            if self.fail && matches!(event, EntityEvent::Update(_)) {
                return Err(ClientError::Closed);
            }
            self.events.borrow_mut().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_leader_sync_routes_events_by_channel() {
        let mut sync = LeaderSync::new(BroadcastConfig::default(), RecordingSink::default());
        let t0 = Instant::now();
        let live = world(2);

        sync.spawn("grunt", live[0]).unwrap();
        assert_eq!(sync.tick(t0, &live, None).unwrap(), 2);
        sync.hit(EntityId(1), 3).unwrap();
        sync.die(EntityId(1), true).unwrap();

        let events = sync.sink().events.borrow();
        let channels: Vec<Channel> = events.iter().map(EntityEvent::channel).collect();
        assert_eq!(
            channels,
            vec![
                Channel::ReliableOrdered,
                Channel::Unreliable,
                Channel::ReliableOrdered,
                Channel::ReliableOrdered
            ]
        );
        assert!(sync.scheduler().cached(EntityId(1)).is_none());
        assert!(sync.scheduler().cached(EntityId(2)).is_some());
    }

    #[test]
    fn test_leader_sync_sink_failure_invalidates_cache() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut sync = LeaderSync::new(BroadcastConfig::default(), sink);
        assert!(sync.tick(Instant::now(), &world(3), None).is_err());
        assert_eq!(sync.scheduler().cache_len(), 0);
    }
}
