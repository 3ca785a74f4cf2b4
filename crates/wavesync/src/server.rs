//! `WaveSyncServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → session manager, plus
//! the score store.

use std::sync::Arc;

use tokio::sync::Mutex;
use wavesync_protocol::{Codec, JsonCodec};
use wavesync_session::{SessionConfig, SessionManager};
use wavesync_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ScoreStore, WaveSyncError};

/// Shared state handed to each connection task.
pub(crate) struct ServerState<S: ScoreStore, C: Codec> {
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) scores: S,
    pub(crate) codec: C,
}

/// Builder for a [`WaveSyncServer`].
///
/// # Example
///
/// ```rust,no_run
/// use wavesync::prelude::*;
///
/// # async fn run() -> Result<(), WaveSyncError> {
/// let server = WaveSyncServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(InMemoryScoreStore::default())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct WaveSyncServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
}

impl WaveSyncServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session_config: SessionConfig::default(),
        }
    }

    /// Address to listen on. Port 0 picks a free one.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Binds the listener. Uses `JsonCodec` over `WebSocketTransport`.
    pub async fn build<S: ScoreStore>(
        self,
        scores: S,
    ) -> Result<WaveSyncServer<S, JsonCodec>, WaveSyncError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        tracing::info!(
            addr = %self.bind_addr,
            max_participants = self.session_config.max_participants,
            "server bound"
        );

        let state = Arc::new(ServerState {
            sessions: Mutex::new(SessionManager::new(self.session_config)),
            scores,
            codec: JsonCodec,
        });

        Ok(WaveSyncServer { transport, state })
    }
}

impl Default for WaveSyncServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound WaveSync server. Call [`run()`](Self::run) to start accepting.
pub struct WaveSyncServer<S: ScoreStore, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, C>>,
}

impl WaveSyncServer<crate::InMemoryScoreStore, JsonCodec> {
    pub fn builder() -> WaveSyncServerBuilder {
        WaveSyncServerBuilder::new()
    }
}

impl<S, C> WaveSyncServer<S, C>
where
    S: ScoreStore,
    C: Codec,
{
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Accepts connections until the process ends, one handler task each.
    pub async fn run(mut self) -> Result<(), WaveSyncError> {
        tracing::info!("WaveSync server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
