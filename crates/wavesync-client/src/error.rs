//! Error types for the client side.

use wavesync_protocol::ProtocolError;
use wavesync_transport::TransportError;

/// Errors raised by [`SyncClient`](crate::SyncClient) and entity sinks.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server refused or garbled the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection's writer task is gone.
    #[error("connection closed")]
    Closed,
}
