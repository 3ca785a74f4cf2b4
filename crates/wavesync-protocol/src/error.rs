//! Error types for the protocol layer.

/// Errors that can occur while turning messages into bytes and back.
///
/// Every crate in the workspace owns its own error enum, so a
/// `ProtocolError` always points at serialization, never at sockets or
/// session state.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, an unknown
    /// message tag, or a truncated frame.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The bytes decoded fine but break a protocol rule, e.g. a client
    /// sending a server-only payload or a handshake with the wrong version.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
