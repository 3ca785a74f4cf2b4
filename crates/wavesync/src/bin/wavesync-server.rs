//! Standalone WaveSync relay server.
//!
//! `WAVESYNC_BIND` sets the listen address (default `127.0.0.1:8080`);
//! `RUST_LOG` sets the log filter (default `info`).

use tracing_subscriber::EnvFilter;
use wavesync::prelude::*;

#[tokio::main]
async fn main() -> Result<(), WaveSyncError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("WAVESYNC_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let server = WaveSyncServer::builder()
        .bind(&bind)
        .session_config(SessionConfig::default())
        .build(InMemoryScoreStore::default())
        .await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
