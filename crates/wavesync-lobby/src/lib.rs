//! Session state for WaveSync, with no I/O in it.
//!
//! Everything here is plain synchronous data owned by one session actor:
//!
//! 1. **Registry**: who is connected, in join order, and who leads
//!    ([`SessionRegistry`])
//! 2. **Ready-gate**: whether a start request may open the countdown
//!    ([`ReadyGate`], [`MatchPhase`])
//! 3. **Chat**: sanitizing, rate limiting, and history ([`ChatRelay`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Session actor (above)  ← serializes every event for one match
//!     ↕
//! Lobby rules (this crate)  ← decides; never sends
//!     ↕
//! Protocol (below)  ← ParticipantId, RosterEntry, ChatMessage
//! ```
//!
//! Time-dependent rules take an `Instant` argument instead of reading the
//! clock, so callers (and tests) decide what "now" is.

mod chat;
mod gate;
mod registry;
mod ring;

pub use chat::{ChatConfig, ChatRejection, ChatRelay, RateLimiter, sanitize};
pub use gate::{MatchPhase, ReadyGate, StartRejection};
pub use registry::{Departure, Participant, SessionRegistry};
pub use ring::RingBuffer;
