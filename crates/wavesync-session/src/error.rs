//! Error types for the session layer.

use wavesync_protocol::{ParticipantId, SessionId};

/// Errors that can occur while routing participants to session actors.
///
/// Rejections that are part of normal play (start refused, chat flood) are
/// not errors; they go back to the participant as messages.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session does not exist.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// No free participant slot.
    #[error("session {0} is full")]
    SessionFull(SessionId),

    /// The session left the lobby and admits nobody until it returns.
    #[error("session {0} is not joinable in phase {1}")]
    NotJoinable(SessionId, wavesync_lobby::MatchPhase),

    /// The participant isn't in any session.
    #[error("participant {0} is not in a session")]
    NotInSession(ParticipantId),

    /// The session's command channel is full or closed.
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),
}
