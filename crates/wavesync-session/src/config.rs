//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wavesync_lobby::ChatConfig;

/// Settings applied to every session a manager creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Participant slots per session.
    pub max_participants: usize,

    /// Time between `match.starting` and `match.running`, measured on the
    /// server.
    pub countdown: Duration,

    /// Chat limits and history size.
    pub chat: ChatConfig,

    /// Capacity of each actor's command queue. A full queue makes senders
    /// wait.
    pub channel_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_participants: 4,
            countdown: Duration::from_millis(3000),
            chat: ChatConfig::default(),
            channel_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.max_participants, 4);
        assert_eq!(config.countdown, Duration::from_secs(3));
        assert_eq!(config.chat.max_messages, 5);
        assert_eq!(config.channel_size, 64);
    }
}
