//! Chat rules: text sanitizing, per-sender rate limiting, and history.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use wavesync_protocol::{ChatMessage, ParticipantId};

use crate::RingBuffer;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Chat limits for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Sliding window for the rate limit.
    pub window: Duration,
    /// Accepted messages allowed per sender inside one window.
    pub max_messages: usize,
    /// Longest accepted text, counted in characters after escaping.
    pub max_len: usize,
    /// How many messages the history keeps.
    pub history: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            max_messages: 5,
            max_len: 200,
            history: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a chat message was refused. Display strings are the wire reason
/// codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChatRejection {
    /// The sender used up its window. The attempt is dropped, not queued.
    #[error("rate-limited")]
    RateLimited { retry_after: Duration },

    #[error("empty")]
    Empty,

    /// Longer than the limit after escaping. Never truncated.
    #[error("too-long")]
    TooLong,
}

impl ChatRejection {
    /// How long the sender should wait, for rate-limit rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::Empty | Self::TooLong => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sanitizing
// ---------------------------------------------------------------------------

/// Cleans raw chat text.
///
/// Control characters other than `\n` and `\t` are removed, surrounding
/// whitespace is trimmed, HTML-significant characters are escaped, and the
/// escaped result must be 1..=`max_len` characters long.
pub fn sanitize(raw: &str, max_len: usize) -> Result<String, ChatRejection> {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(ChatRejection::Empty);
    }

    let escaped = escape_html(trimmed);
    if escaped.chars().count() > max_len {
        return Err(ChatRejection::TooLong);
    }
    Ok(escaped)
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Sliding-window limiter keyed by sender.
///
/// Each sender keeps the timestamps of its accepted messages still inside
/// the window. A message at `t` stops counting at exactly `t + window`.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max: usize,
    history: HashMap<ParticipantId, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            history: HashMap::new(),
        }
    }

    /// Checks whether `sender` may send at `now` without recording anything.
    ///
    /// On refusal returns how long until the oldest counted message leaves
    /// the window.
    pub fn check(&mut self, sender: ParticipantId, now: Instant) -> Result<(), Duration> {
        let Some(stamps) = self.history.get_mut(&sender) else {
            return Ok(());
        };
        while let Some(&oldest) = stamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() < self.max {
            return Ok(());
        }
        let oldest = stamps.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    /// Counts an accepted message.
    pub fn record(&mut self, sender: ParticipantId, now: Instant) {
        self.history.entry(sender).or_default().push_back(now);
    }

    /// Drops a sender's history (on leave).
    pub fn forget(&mut self, sender: ParticipantId) {
        self.history.remove(&sender);
    }
}

// ---------------------------------------------------------------------------
// ChatRelay
// ---------------------------------------------------------------------------

/// Accepts or rejects chat lines and keeps the recent history.
///
/// Fan-out is the caller's job; every accepted message goes to every
/// participant, sender included, so all views share one order.
#[derive(Debug)]
pub struct ChatRelay {
    config: ChatConfig,
    limiter: RateLimiter,
    log: RingBuffer<ChatMessage>,
}

impl ChatRelay {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.window, config.max_messages),
            log: RingBuffer::new(config.history),
            config,
        }
    }

    /// Validates and stores a participant's message.
    ///
    /// `now` drives the rate limiter; `timestamp` (Unix ms) is what goes on
    /// the wire.
    pub fn submit(
        &mut self,
        sender: ParticipantId,
        sender_name: &str,
        raw: &str,
        now: Instant,
        timestamp: u64,
    ) -> Result<ChatMessage, ChatRejection> {
        if let Err(retry_after) = self.limiter.check(sender, now) {
            tracing::debug!(%sender, ?retry_after, "chat rate-limited");
            return Err(ChatRejection::RateLimited { retry_after });
        }
        let text = sanitize(raw, self.config.max_len)?;
        self.limiter.record(sender, now);

        let message = ChatMessage {
            id: message_id(),
            sender_id: Some(sender),
            sender_name: sender_name.to_string(),
            text,
            timestamp,
            is_system: false,
        };
        self.log.push(message.clone());
        Ok(message)
    }

    /// Stores a server-authored line (joins, leaves, leader hand-over).
    ///
    /// `text` is trusted: it is built from already-escaped display names, so
    /// it is stored as is.
    pub fn announce(&mut self, text: &str, timestamp: u64) -> ChatMessage {
        let message = ChatMessage {
            id: message_id(),
            sender_id: None,
            sender_name: "system".to_string(),
            text: text.to_string(),
            timestamp,
            is_system: true,
        };
        self.log.push(message.clone());
        message
    }

    /// Stored messages, oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.log.snapshot()
    }

    /// Forgets a departed sender's rate-limit window.
    pub fn forget(&mut self, sender: ParticipantId) {
        self.limiter.forget(sender);
    }
}

/// 64 random bits as hex.
fn message_id() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
