//! # WaveSync
//!
//! Lobby, leader election, and entity relay for small cooperative
//! wave-survival games.
//!
//! The server never simulates anything. One participant per session, the
//! leader, runs the authoritative simulation; the server decides who that
//! is, gates the match start on everyone being ready, relays the leader's
//! entity events to the others, and carries chat.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wavesync::prelude::*;
//!
//! # async fn run() -> Result<(), WaveSyncError> {
//! let server = WaveSyncServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(InMemoryScoreStore::default())
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! Clients connect with [`SyncClient`](wavesync_client::SyncClient); the
//! leader drives a [`LeaderSync`](wavesync_client::LeaderSync) and everyone
//! else a [`ClientReconciler`](wavesync_client::ClientReconciler).

mod error;
mod handler;
mod scores;
mod server;

pub use error::WaveSyncError;
pub use scores::{InMemoryScoreStore, MAX_SCORE_LIMIT, ScoreStore, ScoreStoreError};
pub use server::{WaveSyncServer, WaveSyncServerBuilder};

pub mod prelude {
    pub use crate::{
        InMemoryScoreStore, ScoreStore, WaveSyncError, WaveSyncServer, WaveSyncServerBuilder,
    };
    pub use wavesync_client::{
        BroadcastConfig, ClientReconciler, DeltaBroadcastScheduler, EntitySink, LeaderSync,
        ReconcilerConfig, SyncClient,
    };
    pub use wavesync_lobby::{ChatConfig, MatchPhase};
    pub use wavesync_protocol::{
        Channel, ClientMessage, EntityEvent, EntityId, EntityState, Envelope, PROTOCOL_VERSION,
        ParticipantId, Payload, ScoreEntry, ServerMessage, SessionId, SystemMessage,
    };
    pub use wavesync_session::SessionConfig;
}
