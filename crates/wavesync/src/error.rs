//! Unified error type for WaveSync.

use wavesync_client::ClientError;
use wavesync_protocol::ProtocolError;
use wavesync_session::SessionError;
use wavesync_transport::TransportError;

use crate::ScoreStoreError;

/// Top-level error that wraps every crate-specific error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum WaveSyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Session routing failed (not found, full, actor gone).
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Scores(#[from] ScoreStoreError),
}
