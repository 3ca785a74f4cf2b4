//! Session manager: creates, tracks, and routes participants to sessions.
//!
//! The bookkeeping methods (`open_session`, `track`, `untrack`,
//! `remove_session`) are synchronous and never wait on an actor, so a
//! server can keep the manager behind a lock and talk to sessions through
//! their handles with the lock released. The async methods combine them
//! for callers that own the manager outright.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use wavesync_protocol::{ClientMessage, ParticipantId, SessionId};

use crate::session::spawn_session;
use crate::{ParticipantSender, SessionConfig, SessionError, SessionHandle, SessionInfo};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Where a join landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTicket {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
}

/// Owns every live session and knows which session each participant is in.
///
/// A participant is in at most one session. Sessions are destroyed as
/// soon as their last participant leaves.
pub struct SessionManager {
    config: SessionConfig,
    sessions: HashMap<SessionId, SessionHandle>,
    participant_sessions: HashMap<ParticipantId, SessionId>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            participant_sessions: HashMap::new(),
        }
    }

    /// Spawns an empty session.
    pub fn create_session(&mut self) -> SessionId {
        self.spawn().session_id()
    }

    fn spawn(&mut self) -> SessionHandle {
        let session_id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let handle = spawn_session(session_id, self.config.clone());
        self.sessions.insert(session_id, handle.clone());
        tracing::info!(%session_id, "session created");
        handle
    }

    /// The lowest-numbered session whose last published info shows room,
    /// or a fresh one if there is none.
    ///
    /// The snapshot can be stale by the time the join arrives; the actor
    /// has the final say and the caller retries on refusal.
    pub fn open_session(&mut self) -> SessionHandle {
        let candidate = self
            .sessions
            .values()
            .filter(|handle| !handle.is_closed() && handle.snapshot().has_room())
            .min_by_key(|handle| handle.session_id().0)
            .cloned();
        match candidate {
            Some(handle) => handle,
            None => self.spawn(),
        }
    }

    pub fn handle(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.sessions.get(&session_id).cloned()
    }

    /// Records where an admitted participant landed.
    pub fn track(&mut self, ticket: JoinTicket) {
        self.participant_sessions
            .insert(ticket.participant_id, ticket.session_id);
    }

    /// Forgets a participant and returns its session's handle, if the
    /// session is still alive.
    pub fn untrack(&mut self, participant_id: ParticipantId) -> Option<SessionHandle> {
        let session_id = self.participant_sessions.remove(&participant_id)?;
        self.sessions.get(&session_id).cloned()
    }

    /// Forgets a session and its participants. The caller shuts it down.
    pub fn remove_session(&mut self, session_id: SessionId) -> Option<SessionHandle> {
        let handle = self.sessions.remove(&session_id)?;
        self.participant_sessions.retain(|_, sid| *sid != session_id);
        tracing::info!(%session_id, "session destroyed");
        Some(handle)
    }

    /// Joins a specific session.
    pub async fn join(
        &mut self,
        session_id: SessionId,
        name: &str,
        sender: ParticipantSender,
    ) -> Result<JoinTicket, SessionError> {
        let handle = self
            .sessions
            .get(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        let participant_id = handle.join(name, sender).await?;
        let ticket = JoinTicket {
            session_id,
            participant_id,
        };
        self.track(ticket);
        Ok(ticket)
    }

    /// Joins the first session still in its lobby with a free slot, or a
    /// fresh one if there is none.
    pub async fn join_or_create(
        &mut self,
        name: &str,
        sender: ParticipantSender,
    ) -> Result<JoinTicket, SessionError> {
        // Each refusal is published before the reply, so the next pick
        // skips the session that refused.
        let mut attempts = self.sessions.len() + 1;
        loop {
            let handle = self.open_session();
            match handle.join(name, sender.clone()).await {
                Ok(participant_id) => {
                    let ticket = JoinTicket {
                        session_id: handle.session_id(),
                        participant_id,
                    };
                    self.track(ticket);
                    return Ok(ticket);
                }
                Err(_) if attempts > 1 => attempts -= 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Removes a participant from its session, destroying the session if
    /// that emptied it. Unknown participants are a no-op.
    pub async fn leave(&mut self, participant_id: ParticipantId) -> Result<(), SessionError> {
        let Some(handle) = self.untrack(participant_id) else {
            return Ok(());
        };
        if handle.leave(participant_id).await? == 0 {
            self.destroy_session(handle.session_id()).await?;
        }
        Ok(())
    }

    /// Forwards a client message to the participant's session.
    pub async fn route(
        &self,
        participant_id: ParticipantId,
        msg: ClientMessage,
    ) -> Result<(), SessionError> {
        let session_id = self
            .participant_sessions
            .get(&participant_id)
            .ok_or(SessionError::NotInSession(participant_id))?;
        let handle = self
            .sessions
            .get(session_id)
            .ok_or(SessionError::NotFound(*session_id))?;
        handle.send_message(participant_id, msg).await
    }

    /// Shuts a session down and forgets its participants.
    pub async fn destroy_session(&mut self, session_id: SessionId) -> Result<(), SessionError> {
        let handle = self
            .remove_session(session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        let _ = handle.shutdown().await;
        Ok(())
    }

    pub fn session_of(&self, participant_id: ParticipantId) -> Option<SessionId> {
        self.participant_sessions.get(&participant_id).copied()
    }

    pub async fn session_info(&self, session_id: SessionId) -> Result<SessionInfo, SessionError> {
        let handle = self
            .sessions
            .get(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        handle.get_info().await
    }

    /// Published info for every live session, by id.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .values()
            .map(SessionHandle::snapshot)
            .collect();
        infos.sort_by_key(|info| info.session_id.0);
        infos
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
