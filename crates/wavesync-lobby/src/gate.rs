//! Match phase state machine and the ready-gate.

use serde::{Deserialize, Serialize};
use wavesync_protocol::ParticipantId;

use crate::SessionRegistry;

// ---------------------------------------------------------------------------
// MatchPhase
// ---------------------------------------------------------------------------

/// Lifecycle of one session.
///
/// ```text
/// Lobby ──(valid start request)──→ Countdown ──(timer)──→ Running
///   ↑                                                        │
///   └───────────────────(leader ends match)──────────────────┘
/// ```
///
/// - **Lobby**: participants join and toggle ready.
/// - **Countdown**: start accepted; no further ready checks, leaves don't
///   abort it.
/// - **Running**: entity relay is open; ready/leader gating is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatchPhase {
    #[default]
    Lobby,
    Countdown,
    Running,
}

impl MatchPhase {
    /// New participants are only admitted in the lobby.
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Lobby)
    }

    /// Entity events are only relayed while the match runs.
    pub fn relays_entities(self) -> bool {
        matches!(self, Self::Running)
    }

    /// The next phase in the cycle.
    pub fn next(self) -> Self {
        match self {
            Self::Lobby => Self::Countdown,
            Self::Countdown => Self::Running,
            Self::Running => Self::Lobby,
        }
    }

    /// Returns `true` if moving to `target` follows the cycle. A countdown
    /// that loses every participant may also fall back to the lobby.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == target || (self == Self::Countdown && target == Self::Lobby)
    }
}

impl std::fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lobby => write!(f, "LOBBY"),
            Self::Countdown => write!(f, "COUNTDOWN"),
            Self::Running => write!(f, "RUNNING"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReadyGate
// ---------------------------------------------------------------------------

/// Why a start request was refused. The display string is the reason code
/// sent back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartRejection {
    #[error("leader-only")]
    LeaderOnly,

    #[error("not all ready")]
    NotAllReady,

    /// The session already left the lobby.
    #[error("already started")]
    AlreadyStarted,
}

/// Decides whether a start request may open the countdown.
pub struct ReadyGate;

impl ReadyGate {
    /// Succeeds iff the session is in the lobby, `requester` leads, and
    /// every participant is ready.
    pub fn check(
        phase: MatchPhase,
        registry: &SessionRegistry,
        requester: ParticipantId,
    ) -> Result<(), StartRejection> {
        if !phase.is_joinable() {
            return Err(StartRejection::AlreadyStarted);
        }
        if !registry.is_leader(requester) {
            return Err(StartRejection::LeaderOnly);
        }
        if !registry.all_ready() {
            return Err(StartRejection::NotAllReady);
        }
        Ok(())
    }
}
