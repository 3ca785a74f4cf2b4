//! Session actors for WaveSync.
//!
//! Each session (one lobby plus the match it starts) runs as an isolated
//! Tokio task. The actor owns the registry, phase, countdown timer, and
//! chat log, and fans messages out to per-participant channels.
//!
//! # Key types
//!
//! - [`SessionManager`]: matchmaking, routing, and cleanup of empty sessions
//! - [`SessionHandle`]: send commands to a running session actor
//! - [`EntitySyncRelay`]: leader-only entity event filter
//! - [`LobbyBroadcaster`]: per-participant outbound fan-out
//! - [`SessionConfig`]: slots, countdown length, chat limits

mod broadcast;
mod config;
mod error;
mod manager;
mod relay;
mod session;

pub use broadcast::{LobbyBroadcaster, Outbound, ParticipantSender};
pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::{JoinTicket, SessionManager};
pub use relay::{DropReason, EntitySyncRelay, RelayDecision};
pub use session::{SessionHandle, SessionInfo};
