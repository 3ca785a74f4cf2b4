//! Client-side synchronization for WaveSync.
//!
//! Two roles live here, and a client switches between them when
//! leadership moves:
//!
//! - **Leader**: [`LeaderSync`] runs the [`DeltaBroadcastScheduler`] once
//!   per simulation tick and pushes entity events into an [`EntitySink`].
//! - **Everyone else**: [`ClientReconciler`] turns relayed events into
//!   smoothly moving [`ShadowEntity`]s.
//!
//! [`SyncClient`] is the WebSocket connection both roles talk through.
//!
//! ```text
//! leader sim ─→ LeaderSync ─→ SyncClient ─→ server relay ─→ SyncClient ─→ ClientReconciler
//! ```
//!
//! Promotion: when the roster says this client now leads, call
//! [`ClientReconciler::promote`] to seed the local simulation and start a
//! fresh [`LeaderSync`]; its empty cache makes the first cycle a full
//! snapshot.

mod broadcast;
mod client;
mod error;
mod reconcile;

pub use broadcast::{
    Broadcast, BroadcastConfig, BroadcastMetrics, DeltaBroadcastScheduler, EntitySink, LeaderSync,
};
pub use client::SyncClient;
pub use error::ClientError;
pub use reconcile::{ClientReconciler, ReconcilerConfig, ShadowEntity};
