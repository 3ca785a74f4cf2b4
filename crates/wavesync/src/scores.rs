//! Score persistence hook.
//!
//! The server doesn't own a leaderboard format; it forwards `SubmitScore`
//! and `FetchScores` to whatever [`ScoreStore`] it was built with. Scores
//! are global, not per session.

use std::future::Future;

use tokio::sync::Mutex;
use wavesync_protocol::ScoreEntry;

/// Largest top-N a client may ask for.
pub const MAX_SCORE_LIMIT: usize = 100;

/// Failure inside a score backend.
#[derive(Debug, thiserror::Error)]
pub enum ScoreStoreError {
    #[error("score store unavailable: {0}")]
    Unavailable(String),
}

/// Where scores are kept.
///
/// Implement this to back the leaderboard with a database or an HTTP
/// service. Entries come back best first.
///
/// # Example
///
/// ```rust
/// use wavesync::{ScoreStore, ScoreStoreError};
/// use wavesync_protocol::ScoreEntry;
///
/// struct NoScores;
///
/// impl ScoreStore for NoScores {
///     async fn top(&self, _limit: usize) -> Result<Vec<ScoreEntry>, ScoreStoreError> {
///         Ok(Vec::new())
///     }
///
///     async fn submit(
///         &self,
///         _entry: ScoreEntry,
///         _limit: usize,
///     ) -> Result<Vec<ScoreEntry>, ScoreStoreError> {
///         Err(ScoreStoreError::Unavailable("read-only".into()))
///     }
/// }
/// ```
pub trait ScoreStore: Send + Sync + 'static {
    /// The best `limit` entries.
    fn top(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScoreEntry>, ScoreStoreError>> + Send;

    /// Records `entry` and returns the resulting best `limit` entries.
    fn submit(
        &self,
        entry: ScoreEntry,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScoreEntry>, ScoreStoreError>> + Send;
}

/// Process-local leaderboard, lost on restart.
///
/// Ordered by score, then wave, both descending; ties keep submission
/// order. Only the best `capacity` entries are retained.
pub struct InMemoryScoreStore {
    entries: Mutex<Vec<ScoreEntry>>,
    capacity: usize,
}

impl InMemoryScoreStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryScoreStore {
    fn default() -> Self {
        Self::new(MAX_SCORE_LIMIT)
    }
}

impl ScoreStore for InMemoryScoreStore {
    async fn top(&self, limit: usize) -> Result<Vec<ScoreEntry>, ScoreStoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().take(limit).cloned().collect())
    }

    async fn submit(
        &self,
        entry: ScoreEntry,
        limit: usize,
    ) -> Result<Vec<ScoreEntry>, ScoreStoreError> {
        let mut entries = self.entries.lock().await;
        // After every existing entry that is at least as good.
        let at = entries
            .iter()
            .position(|e| (e.score, e.wave) < (entry.score, entry.wave))
            .unwrap_or(entries.len());
        entries.insert(at, entry);
        entries.truncate(self.capacity);
        Ok(entries.iter().take(limit).cloned().collect())
    }
}
