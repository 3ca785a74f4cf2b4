//! Core protocol types: identities, delivery channels, and the envelope
//! every frame travels in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ClientMessage, ServerMessage};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A participant in a session.
///
/// Assigned by the server when a connection is admitted and stable for that
/// connection's lifetime. A reconnecting client gets a fresh id: identity is
/// per connection, never resumed.
///
/// `#[serde(transparent)]` puts it on the wire as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// One match instance: a lobby, its countdown, and the running wave fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// A leader-owned shared entity (hostile unit).
///
/// Allocated by the leader's simulation and never reused within a session,
/// so a late `update` for a dead id can never land on a new unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who inside a session should receive a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every participant, including the one who caused the message.
    All,
    /// A single participant (rejections, chat history, replies).
    Participant(ParticipantId),
    /// Everyone except the given participant. Entity events fan out this
    /// way: the leader already has the state it sent.
    AllExcept(ParticipantId),
}

impl Recipient {
    /// Returns `true` if `participant` is addressed by this recipient.
    pub fn includes(self, participant: ParticipantId) -> bool {
        match self {
            Self::All => true,
            Self::Participant(id) => id == participant,
            Self::AllExcept(id) => id != participant,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// The delivery guarantee for a message.
///
/// Position ticks go `Unreliable`: losing one is cosmetic and the next tick
/// supersedes it. Spawns, hits, and deaths go `ReliableOrdered` because a
/// lost death leaves a ghost on every non-leader screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Channel {
    /// Delivered in order, no loss.
    #[default]
    ReliableOrdered,

    /// Delivered, possibly out of order.
    ReliableUnordered,

    /// May be dropped when the link is busy. The transport never queues it
    /// behind reliable traffic.
    Unreliable,
}

impl Channel {
    /// Returns `true` for the drop-if-busy channel.
    pub fn is_unreliable(self) -> bool {
        matches!(self, Self::Unreliable)
    }
}

// ---------------------------------------------------------------------------
// SystemMessage
// ---------------------------------------------------------------------------

/// Connection plumbing shared by every client: handshake, keep-alive, and
/// protocol-level errors.
///
/// Internally tagged, so a heartbeat looks like
/// `{ "type": "Heartbeat", "client_time": 123 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    /// Client → Server: first frame on a new connection.
    Handshake {
        version: u32,
        /// Optional display name; `Register` can change it later.
        #[serde(default)]
        name: Option<String>,
    },

    /// Server → Client: the connection was admitted to a session.
    HandshakeAck {
        participant_id: ParticipantId,
        session_id: SessionId,
        /// Milliseconds since the Unix epoch on the server clock.
        server_time: u64,
    },

    /// Either direction: "I'm going away."
    Disconnect { reason: String },

    /// Client → Server keep-alive. `client_time` is echoed back so the
    /// client can measure round-trip latency.
    Heartbeat { client_time: u64 },

    /// Server → Client echo of a heartbeat.
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Server → Client: the last frame could not be processed.
    /// `code` follows HTTP conventions (400 bad request, 409 conflict...).
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Payload / Envelope
// ---------------------------------------------------------------------------

/// What an envelope carries.
///
/// Adjacently tagged (`{ "type": "Client", "data": { ... } }`) so the
/// server can tell plumbing from session traffic before looking further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    System(SystemMessage),
    Client(ClientMessage),
    Server(ServerMessage),
}

/// The top-level frame. Every message on the wire is an `Envelope`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-sender sequence number.
    pub seq: u64,

    /// Milliseconds since the Unix epoch when the frame was built.
    pub timestamp: u64,

    /// Delivery guarantee. Missing on the wire means `ReliableOrdered`.
    #[serde(default)]
    pub channel: Channel,

    pub payload: Payload,
}

impl Envelope {
    /// Builds a reliable-ordered envelope.
    pub fn reliable(seq: u64, timestamp: u64, payload: Payload) -> Self {
        Self {
            seq,
            timestamp,
            channel: Channel::ReliableOrdered,
            payload,
        }
    }

    /// Builds an envelope on an explicit channel.
    pub fn on(channel: Channel, seq: u64, timestamp: u64, payload: Payload) -> Self {
        Self {
            seq,
            timestamp,
            channel,
            payload,
        }
    }
}
