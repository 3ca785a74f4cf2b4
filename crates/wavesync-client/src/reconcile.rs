//! Non-leader shadow entities.
//!
//! Network handlers write authoritative targets through
//! [`ClientReconciler::apply`]; the render loop moves shadows toward them
//! once per frame with [`ClientReconciler::step`]. Per shadow, per frame:
//!
//! ```text
//! dist² > teleport²             → snap (respawn or warp)
//! dist  < extrapolation radius
//!   and update age < 2×interval → target + velocity × age
//! dist  < snap distance         → snap (kill residual jitter)
//! otherwise                     → lerp by clamp(interval / 2·frame, min, max)
//! ```
//!
//! `hit` and `die` apply immediately; they are state changes, not motion.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use wavesync_protocol::{EntityEvent, EntityId, EntityState};

/// Tuning for shadow movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Extrapolate only when the shadow is closer than this to its target.
    pub extrapolation_radius: f32,
    pub snap_distance: f32,
    /// Anything farther than this is a warp, not movement.
    pub teleport_distance: f32,
    pub min_lerp: f32,
    pub max_lerp: f32,
    /// Update interval assumed before any batch gaps were observed.
    pub default_update_interval: Duration,
    /// Weight of the newest gap in the interval moving average.
    pub interval_smoothing: f32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            extrapolation_radius: 50.0,
            snap_distance: 0.5,
            teleport_distance: 300.0,
            min_lerp: 0.1,
            max_lerp: 0.5,
            default_update_interval: Duration::from_millis(100),
            interval_smoothing: 0.2,
        }
    }
}

/// A read-only mirror of a leader-owned entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowEntity {
    pub id: EntityId,
    pub kind: String,
    /// Rendered position.
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub speed: f32,
    /// Speed at spawn.
    pub base_speed: f32,
    /// Most recent authoritative position.
    pub target_x: f32,
    pub target_y: f32,
    /// Estimated velocity in units per second.
    pub vx: f32,
    pub vy: f32,
    pub last_update: Instant,
}

impl ShadowEntity {
    fn spawn(
        id: EntityId,
        kind: &str,
        x: f32,
        y: f32,
        health: i32,
        speed: f32,
        now: Instant,
    ) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            x,
            y,
            health,
            speed,
            base_speed: speed,
            target_x: x,
            target_y: y,
            vx: 0.0,
            vy: 0.0,
            last_update: now,
        }
    }

    /// Distance from the rendered position to the target.
    pub fn error(&self) -> f32 {
        self.distance_sq().sqrt()
    }

    fn distance_sq(&self) -> f32 {
        let dx = self.target_x - self.x;
        let dy = self.target_y - self.y;
        dx * dx + dy * dy
    }

    fn snap(&mut self) {
        self.x = self.target_x;
        self.y = self.target_y;
    }

    /// The last authoritative state, as the leader would hold it.
    pub fn authoritative(&self) -> EntityState {
        EntityState {
            id: self.id,
            x: self.target_x,
            y: self.target_y,
            health: self.health,
            speed: self.speed,
        }
    }
}

/// Owns every shadow entity on a non-leader client.
#[derive(Debug)]
pub struct ClientReconciler {
    config: ReconcilerConfig,
    entities: BTreeMap<EntityId, ShadowEntity>,
    /// Moving average of gaps between update batches.
    update_interval: Duration,
    last_batch: Option<Instant>,
    /// Update entries for ids we never saw spawn.
    unknown_updates: u64,
}

impl ClientReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            update_interval: config.default_update_interval,
            config,
            entities: BTreeMap::new(),
            last_batch: None,
            unknown_updates: 0,
        }
    }

    /// Applies one relayed event received at `now`.
    pub fn apply(&mut self, event: &EntityEvent, now: Instant) {
        match event {
            EntityEvent::Spawn {
                id,
                kind,
                x,
                y,
                health,
                speed,
            } => {
                self.entities
                    .insert(*id, ShadowEntity::spawn(*id, kind, *x, *y, *health, *speed, now));
            }
            EntityEvent::Update(states) => self.apply_update(states, now),
            EntityEvent::Hit { id, new_health } => {
                if let Some(shadow) = self.entities.get_mut(id) {
                    shadow.health = *new_health;
                }
            }
            EntityEvent::Die { id, .. } => {
                self.entities.remove(id);
            }
        }
    }

    fn apply_update(&mut self, states: &[EntityState], now: Instant) {
        if let Some(previous) = self.last_batch {
            let gap = now.saturating_duration_since(previous);
            if !gap.is_zero() {
                let alpha = self.config.interval_smoothing.clamp(0.0, 1.0);
                let smoothed =
                    self.update_interval.as_secs_f32() * (1.0 - alpha) + gap.as_secs_f32() * alpha;
                self.update_interval = Duration::from_secs_f32(smoothed);
            }
        }
        self.last_batch = Some(now);

        for state in states {
            let Some(shadow) = self.entities.get_mut(&state.id) else {
                self.unknown_updates += 1;
                debug!(entity_id = %state.id, "update for unknown entity");
                continue;
            };
            let dt = now.saturating_duration_since(shadow.last_update).as_secs_f32();
            if dt > 0.0 {
                shadow.vx = (state.x - shadow.target_x) / dt;
                shadow.vy = (state.y - shadow.target_y) / dt;
            }
            shadow.target_x = state.x;
            shadow.target_y = state.y;
            shadow.health = state.health;
            shadow.speed = state.speed;
            shadow.last_update = now;
        }
    }

    /// Moves every shadow one frame.
    pub fn step(&mut self, now: Instant, frame_time: Duration) {
        let interval = self.update_interval;
        let lerp = self.lerp_factor(frame_time);
        let teleport_sq = self.config.teleport_distance * self.config.teleport_distance;
        let snap_sq = self.config.snap_distance * self.config.snap_distance;
        let radius_sq = self.config.extrapolation_radius * self.config.extrapolation_radius;

        for shadow in self.entities.values_mut() {
            let dist_sq = shadow.distance_sq();
            if dist_sq > teleport_sq {
                trace!(entity_id = %shadow.id, "teleport snap");
                shadow.snap();
                continue;
            }

            let age = now.saturating_duration_since(shadow.last_update);
            if dist_sq < radius_sq && age < interval * 2 {
                let secs = age.as_secs_f32();
                shadow.x = shadow.target_x + shadow.vx * secs;
                shadow.y = shadow.target_y + shadow.vy * secs;
            } else if dist_sq < snap_sq {
                shadow.snap();
            } else {
                shadow.x += (shadow.target_x - shadow.x) * lerp;
                shadow.y += (shadow.target_y - shadow.y) * lerp;
            }
        }
    }

    /// `clamp(interval / (2 × frame_time), min, max)`.
    pub fn lerp_factor(&self, frame_time: Duration) -> f32 {
        if frame_time.is_zero() {
            return self.config.max_lerp;
        }
        let raw = self.update_interval.as_secs_f32() / (2.0 * frame_time.as_secs_f32());
        raw.clamp(self.config.min_lerp, self.config.max_lerp)
    }

    /// Hands every shadow over to a newly promoted leader.
    ///
    /// Returns the last authoritative states in id order and leaves the
    /// reconciler empty.
    pub fn promote(&mut self) -> Vec<EntityState> {
        self.last_batch = None;
        std::mem::take(&mut self.entities)
            .into_values()
            .map(|shadow| shadow.authoritative())
            .collect()
    }

    /// Drops all shadows, e.g. when the match ends.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.last_batch = None;
    }

    pub fn get(&self, id: EntityId) -> Option<&ShadowEntity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ShadowEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Current estimate of the leader's update interval.
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn unknown_updates(&self) -> u64 {
        self.unknown_updates
    }
}

impl Default for ClientReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}
