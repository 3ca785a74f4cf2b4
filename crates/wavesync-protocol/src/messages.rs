//! Session traffic: lobby, match, entity, chat, and score messages.
//!
//! All three enums here are adjacently tagged (`{"type": ..., "data": ...}`).
//! `EntityEvent::Update` carries a bare array, which internal tagging can't
//! express, and keeping one shape everywhere lets the nested
//! `ClientMessage::Entity(EntityEvent)` survive a round trip unchanged.

use serde::{Deserialize, Serialize};

use crate::{Channel, EntityId, ParticipantId};

// ---------------------------------------------------------------------------
// Entity payloads
// ---------------------------------------------------------------------------

/// One entity's authoritative state as the leader broadcasts it.
///
/// This is the element type of `update[]` and of the leader's
/// last-known-state cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub speed: f32,
}

/// Leader-originated entity events.
///
/// The relay never looks inside these beyond the variant: it forwards them
/// verbatim to every non-leader participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EntityEvent {
    /// A new unit entered the world.
    Spawn {
        id: EntityId,
        kind: String,
        x: f32,
        y: f32,
        health: i32,
        #[serde(default)]
        speed: f32,
    },

    /// Delta-compressed or full position batch.
    Update(Vec<EntityState>),

    /// Health changed by a discrete hit.
    Hit { id: EntityId, new_health: i32 },

    /// The unit is gone. `is_special` marks bosses/elites so clients can
    /// play a different effect.
    Die { id: EntityId, is_special: bool },
}

impl EntityEvent {
    /// The channel this event must travel on.
    ///
    /// Only position batches may be dropped; a lost spawn or death is a
    /// lasting desync.
    pub fn channel(&self) -> Channel {
        match self {
            Self::Update(_) => Channel::Unreliable,
            Self::Spawn { .. } | Self::Hit { .. } | Self::Die { .. } => Channel::ReliableOrdered,
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Update(_) => "update",
            Self::Hit { .. } => "hit",
            Self::Die { .. } => "die",
        }
    }
}

// ---------------------------------------------------------------------------
// Lobby / chat / score payloads
// ---------------------------------------------------------------------------

/// One row of `lobby.snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub name: String,
    pub ready: bool,
    pub is_leader: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_summary: Option<String>,
}

/// A chat line as stored in the history buffer and fanned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Random hex id, unique enough for client-side de-duplication.
    pub id: String,
    /// `None` for system lines.
    pub sender_id: Option<ParticipantId>,
    pub sender_name: String,
    /// Already sanitized and HTML-escaped.
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub is_system: bool,
}

/// A persisted high score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub name: String,
    pub score: u64,
    pub wave: u32,
}

// ---------------------------------------------------------------------------
// ClientMessage / ServerMessage
// ---------------------------------------------------------------------------

/// Client → Server session traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// `lobby.register`: set display name and rank summary.
    Register {
        name: String,
        #[serde(default)]
        rank_summary: Option<String>,
    },

    /// `lobby.ready`: flip the sender's ready flag.
    ToggleReady,

    /// `match.startRequest`: leader-only, all must be ready.
    StartRequest,

    /// Leader-only: the wave fight is over, return to the lobby.
    EndMatch { wave: u32 },

    /// `entity.*`: leader-only, relayed to everyone else.
    Entity(EntityEvent),

    /// `chat.send`.
    ChatSend { text: String },

    /// Persist a score and get the new top-N back.
    SubmitScore { name: String, score: u64, wave: u32 },

    /// Fetch the current top-N.
    FetchScores { limit: usize },
}

/// Server → Client session traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// `lobby.snapshot`: full roster in join order, sent after every
    /// roster mutation.
    LobbySnapshot { participants: Vec<RosterEntry> },

    /// A start request was refused. Sent to the requester only.
    StartRejected { reason: String },

    /// `match.starting`: the countdown began. `start_at` is Unix-epoch ms.
    MatchStarting { start_at: u64, duration: u64 },

    /// `match.running`: the countdown elapsed on the server.
    MatchRunning,

    /// The leader ended the match; the session is back in the lobby.
    MatchEnded { wave: u32 },

    /// A relayed leader event.
    Entity(EntityEvent),

    /// `chat.new`.
    ChatNew(ChatMessage),

    /// Chat backlog for a participant that just joined, oldest first.
    ChatHistory { messages: Vec<ChatMessage> },

    /// `chat.rejected`. Sent to the sender only.
    ChatRejected {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },

    /// Top-N scores, highest first.
    Scores { entries: Vec<ScoreEntry> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u64) -> EntityState {
        EntityState {
            id: EntityId(id),
            x: 1.5,
            y: -2.0,
            health: 30,
            speed: 1.0,
        }
    }

    #[test]
    fn test_entity_event_channel_only_updates_are_unreliable() {
        assert_eq!(EntityEvent::Update(vec![]).channel(), Channel::Unreliable);
        assert_eq!(
            EntityEvent::Die {
                id: EntityId(1),
                is_special: false
            }
            .channel(),
            Channel::ReliableOrdered
        );
        assert_eq!(
            EntityEvent::Hit {
                id: EntityId(1),
                new_health: 3
            }
            .channel(),
            Channel::ReliableOrdered
        );
    }

    #[test]
    fn test_update_json_format_is_tagged_array() {
        let event = EntityEvent::Update(vec![state(1), state(2)]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Update");
        assert_eq!(json["data"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["data"][1]["id"], 2);
    }

    #[test]
    fn test_nested_entity_event_survives_client_message_round_trip() {
        let msg = ClientMessage::Entity(EntityEvent::Update(vec![state(5)]));
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ClientMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_spawn_speed_defaults_when_missing() {
        let json = r#"{"type":"Spawn","data":{"id":3,"kind":"grunt","x":0.0,"y":4.0,"health":10}}"#;
        let event: EntityEvent = serde_json::from_str(json).unwrap();
        match event {
            EntityEvent::Spawn { speed, kind, .. } => {
                assert_eq!(speed, 0.0);
                assert_eq!(kind, "grunt");
            }
            other => panic!("expected spawn, got {other:?}"),
        }
    }

    #[test]
    fn test_chat_rejected_omits_missing_retry_hint() {
        let msg = ServerMessage::ChatRejected {
            reason: "empty".into(),
            retry_after_ms: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"]["reason"], "empty");
        assert!(json["data"].get("retry_after_ms").is_none());
    }

    #[test]
    fn test_unit_variant_needs_no_data() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"MatchRunning"}"#).unwrap();
        assert_eq!(msg, ServerMessage::MatchRunning);
    }
}
