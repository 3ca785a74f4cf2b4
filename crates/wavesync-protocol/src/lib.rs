//! Wire protocol for WaveSync.
//!
//! This crate defines what clients and the relay server say to each other:
//!
//! - **Types** ([`Envelope`], [`SystemMessage`], [`ClientMessage`],
//!   [`ServerMessage`], [`EntityEvent`]): the structures on the wire.
//! - **Codec** ([`Codec`], [`JsonCodec`]): how those are turned into bytes.
//! - **Errors** ([`ProtocolError`]).
//! - **Clock** ([`unix_millis`]): wall-clock stamps shared by both ends.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Lobby/Session (participant context)
//! ```

mod clock;
mod codec;
mod error;
mod messages;
mod types;

pub use clock::unix_millis;
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    ChatMessage, ClientMessage, EntityEvent, EntityState, RosterEntry, ScoreEntry,
    ServerMessage,
};
pub use types::{
    Channel, EntityId, Envelope, ParticipantId, Payload, Recipient, SessionId, SystemMessage,
};

/// Protocol version. A handshake carrying any other value is refused.
pub const PROTOCOL_VERSION: u32 = 1;
