//! Session actor: one Tokio task per match.
//!
//! Every event for a session (joins, leaves, ready toggles, start
//! requests, relayed entity events, chat, the countdown timer) funnels
//! through one mpsc queue, so handlers never race each other and the
//! lobby rules in `wavesync-lobby` stay plain synchronous code.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use wavesync_lobby::{ChatRejection, ChatRelay, MatchPhase, ReadyGate, SessionRegistry};
use wavesync_protocol::{
    ClientMessage, EntityEvent, ParticipantId, Recipient, ServerMessage, SessionId, unix_millis,
};

use crate::broadcast::{LobbyBroadcaster, ParticipantSender};
use crate::relay::{EntitySyncRelay, RelayDecision};
use crate::{SessionConfig, SessionError};

/// Commands sent to a session actor through its channel.
pub(crate) enum SessionCommand {
    /// Admit a new participant.
    Join {
        name: String,
        sender: ParticipantSender,
        reply: oneshot::Sender<Result<ParticipantId, SessionError>>,
    },

    /// Remove a participant. Replies with how many remain.
    Leave {
        participant_id: ParticipantId,
        reply: oneshot::Sender<usize>,
    },

    /// A decoded client message.
    Message {
        sender: ParticipantId,
        msg: ClientMessage,
    },

    GetInfo {
        reply: oneshot::Sender<SessionInfo>,
    },

    Shutdown,
}

/// Session metadata as seen from outside the actor.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub phase: MatchPhase,
    pub participant_count: usize,
    pub max_participants: usize,
    pub leader: Option<ParticipantId>,
    /// Cleared once the last participant leaves; the session then admits
    /// nobody and waits to be destroyed.
    pub open: bool,
}

impl SessionInfo {
    /// Open, in the lobby, with a free slot.
    pub fn has_room(&self) -> bool {
        self.open && self.phase.is_joinable() && self.participant_count < self.max_participants
    }
}

/// Handle to a running session actor.
///
/// Cheap to clone; the manager holds one per session and each connection
/// keeps its own, so traffic for one session never waits on another.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
    info: watch::Receiver<SessionInfo>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The info the actor last published. Never waits on the actor.
    pub fn snapshot(&self) -> SessionInfo {
        self.info.borrow().clone()
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Admits a participant; the actor assigns the id.
    pub async fn join(
        &self,
        name: &str,
        sender: ParticipantSender,
    ) -> Result<ParticipantId, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Join {
                name: name.to_string(),
                sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?
    }

    /// Removes a participant and returns the remaining head count.
    /// Unknown ids are a no-op.
    pub async fn leave(&self, participant_id: ParticipantId) -> Result<usize, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Leave {
                participant_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    /// Fire-and-forget delivery of a client message.
    pub async fn send_message(
        &self,
        sender: ParticipantId,
        msg: ClientMessage,
    ) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Message { sender, msg })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    pub async fn get_info(&self) -> Result<SessionInfo, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::GetInfo { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }
}

struct SessionActor {
    session_id: SessionId,
    config: SessionConfig,
    phase: MatchPhase,
    registry: SessionRegistry,
    chat: ChatRelay,
    broadcaster: LobbyBroadcaster,
    /// Set while in `Countdown`.
    countdown_deadline: Option<Instant>,
    /// False once the session has emptied out.
    open: bool,
    receiver: mpsc::Receiver<SessionCommand>,
    published: watch::Sender<SessionInfo>,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "session actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                () = wait_until(self.countdown_deadline) => {
                    self.finish_countdown();
                }
            }
            self.publish();
        }

        tracing::info!(session_id = %self.session_id, "session actor stopped");
    }

    /// Returns `false` on shutdown.
    fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            // Publish before replying so a caller that looks at the
            // snapshot next sees its own join or leave.
            SessionCommand::Join { name, sender, reply } => {
                let joined = self.handle_join(&name, sender);
                self.publish();
                let _ = reply.send(joined);
            }
            SessionCommand::Leave { participant_id, reply } => {
                self.handle_leave(participant_id);
                self.publish();
                let _ = reply.send(self.registry.len());
            }
            SessionCommand::Message { sender, msg } => self.handle_message(sender, msg),
            SessionCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            SessionCommand::Shutdown => {
                tracing::info!(session_id = %self.session_id, "session shutting down");
                return false;
            }
        }
        true
    }

    fn handle_join(
        &mut self,
        name: &str,
        sender: ParticipantSender,
    ) -> Result<ParticipantId, SessionError> {
        if !self.open {
            return Err(SessionError::Unavailable(self.session_id));
        }
        if !self.phase.is_joinable() {
            return Err(SessionError::NotJoinable(self.session_id, self.phase));
        }
        if self.registry.len() >= self.config.max_participants {
            return Err(SessionError::SessionFull(self.session_id));
        }

        let participant_id = self.registry.join(name, std::time::Instant::now());
        self.broadcaster.attach(participant_id, sender);
        let display_name = self.display_name(participant_id);
        tracing::info!(
            session_id = %self.session_id,
            %participant_id,
            participants = self.registry.len(),
            "participant joined"
        );

        self.broadcaster.send(
            Recipient::Participant(participant_id),
            ServerMessage::ChatHistory {
                messages: self.chat.history(),
            },
        );
        self.broadcaster.roster(&self.registry);
        self.announce(&format!("{display_name} joined"));

        Ok(participant_id)
    }

    fn handle_leave(&mut self, participant_id: ParticipantId) {
        let Some(departure) = self.registry.leave(participant_id) else {
            tracing::debug!(
                session_id = %self.session_id,
                %participant_id,
                "leave for unknown participant"
            );
            return;
        };
        self.broadcaster.detach(participant_id);
        self.chat.forget(participant_id);
        tracing::info!(
            session_id = %self.session_id,
            %participant_id,
            participants = self.registry.len(),
            "participant left"
        );

        if self.registry.is_empty() {
            // A join racing the manager's teardown must not land here.
            self.open = false;
            return;
        }

        self.broadcaster.roster(&self.registry);
        self.announce(&format!("{} left", departure.participant.display_name));
        if departure.was_leader {
            if let Some(leader) = departure.leader {
                let name = self.display_name(leader);
                self.announce(&format!("{name} is now the leader"));
            }
        }
    }

    fn handle_message(&mut self, sender: ParticipantId, msg: ClientMessage) {
        if !self.registry.contains(sender) {
            tracing::warn!(
                session_id = %self.session_id,
                %sender,
                "message from non-member, ignoring"
            );
            return;
        }

        match msg {
            ClientMessage::Register { name, rank_summary } => {
                if self.registry.register(sender, &name, rank_summary) {
                    self.broadcaster.roster(&self.registry);
                }
            }
            ClientMessage::ToggleReady => {
                if !self.phase.is_joinable() {
                    tracing::debug!(
                        session_id = %self.session_id,
                        %sender,
                        phase = %self.phase,
                        "ready toggle outside lobby"
                    );
                    return;
                }
                if self.registry.toggle_ready(sender).is_some() {
                    self.broadcaster.roster(&self.registry);
                }
            }
            ClientMessage::StartRequest => self.handle_start(sender),
            ClientMessage::EndMatch { wave } => self.handle_end(sender, wave),
            ClientMessage::Entity(event) => self.relay(sender, event),
            ClientMessage::ChatSend { text } => self.handle_chat(sender, &text),
            ClientMessage::SubmitScore { .. } | ClientMessage::FetchScores { .. } => {
                tracing::debug!(
                    session_id = %self.session_id,
                    %sender,
                    "score message reached session, ignoring"
                );
            }
        }
    }

    fn handle_start(&mut self, sender: ParticipantId) {
        if let Err(rejection) = ReadyGate::check(self.phase, &self.registry, sender) {
            tracing::debug!(session_id = %self.session_id, %sender, %rejection, "start rejected");
            self.broadcaster.send(
                Recipient::Participant(sender),
                ServerMessage::StartRejected {
                    reason: rejection.to_string(),
                },
            );
            return;
        }

        if !self.transition(MatchPhase::Countdown) {
            return;
        }
        let duration = self.config.countdown.as_millis() as u64;
        self.countdown_deadline = Some(Instant::now() + self.config.countdown);
        tracing::info!(session_id = %self.session_id, duration_ms = duration, "countdown started");

        self.broadcaster.send(
            Recipient::All,
            ServerMessage::MatchStarting {
                start_at: unix_millis() + duration,
                duration,
            },
        );
    }

    fn finish_countdown(&mut self) {
        self.countdown_deadline = None;
        if self.registry.is_empty() {
            self.transition(MatchPhase::Lobby);
            tracing::debug!(session_id = %self.session_id, "countdown elapsed with nobody left");
            return;
        }
        if !self.transition(MatchPhase::Running) {
            return;
        }
        tracing::info!(
            session_id = %self.session_id,
            participants = self.registry.len(),
            "match running"
        );
        self.broadcaster.send(Recipient::All, ServerMessage::MatchRunning);
    }

    fn handle_end(&mut self, sender: ParticipantId, wave: u32) {
        if self.phase != MatchPhase::Running || !self.registry.is_leader(sender) {
            tracing::debug!(
                session_id = %self.session_id,
                %sender,
                phase = %self.phase,
                "end match ignored"
            );
            return;
        }
        if !self.transition(MatchPhase::Lobby) {
            return;
        }
        self.registry.clear_ready();
        tracing::info!(session_id = %self.session_id, wave, "match ended");
        self.broadcaster.send(Recipient::All, ServerMessage::MatchEnded { wave });
        self.broadcaster.roster(&self.registry);
    }

    /// Moves to `target` if the phase cycle allows it.
    fn transition(&mut self, target: MatchPhase) -> bool {
        if !self.phase.can_transition_to(target) {
            tracing::warn!(
                session_id = %self.session_id,
                from = %self.phase,
                to = %target,
                "illegal phase transition refused"
            );
            return false;
        }
        self.phase = target;
        true
    }

    fn relay(&mut self, sender: ParticipantId, event: EntityEvent) {
        match EntitySyncRelay::authorize(self.phase, &self.registry, sender, &event) {
            RelayDecision::Forward { recipient, channel } => {
                self.broadcaster.send_on(recipient, channel, ServerMessage::Entity(event));
            }
            RelayDecision::Drop(reason) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    %sender,
                    kind = event.kind(),
                    ?reason,
                    "entity event dropped"
                );
            }
        }
    }

    fn handle_chat(&mut self, sender: ParticipantId, text: &str) {
        let name = self.display_name(sender);
        match self
            .chat
            .submit(sender, &name, text, std::time::Instant::now(), unix_millis())
        {
            Ok(message) => self.broadcaster.send(Recipient::All, ServerMessage::ChatNew(message)),
            Err(rejection) => self.reject_chat(sender, rejection),
        }
    }

    fn reject_chat(&self, sender: ParticipantId, rejection: ChatRejection) {
        self.broadcaster.send(
            Recipient::Participant(sender),
            ServerMessage::ChatRejected {
                reason: rejection.to_string(),
                retry_after_ms: rejection.retry_after().map(|d| d.as_millis() as u64),
            },
        );
    }

    /// Stores and broadcasts a system line.
    fn announce(&mut self, text: &str) {
        let message = self.chat.announce(text, unix_millis());
        self.broadcaster.send(Recipient::All, ServerMessage::ChatNew(message));
    }

    fn display_name(&self, id: ParticipantId) -> String {
        self.registry
            .get(id)
            .map(|p| p.display_name.clone())
            .unwrap_or_default()
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            phase: self.phase,
            participant_count: self.registry.len(),
            max_participants: self.config.max_participants,
            leader: self.registry.leader(),
            open: self.open,
        }
    }

    /// Makes the current info visible to [`SessionHandle::snapshot`].
    fn publish(&self) {
        self.published.send_if_modified(|current| {
            let next = self.info();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spawns a session actor task and returns a handle to it.
pub(crate) fn spawn_session(session_id: SessionId, config: SessionConfig) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.channel_size);
    let (published, info) = watch::channel(SessionInfo {
        session_id,
        phase: MatchPhase::Lobby,
        participant_count: 0,
        max_participants: config.max_participants,
        leader: None,
        open: true,
    });

    let actor = SessionActor {
        session_id,
        phase: MatchPhase::Lobby,
        registry: SessionRegistry::new(),
        chat: ChatRelay::new(config.chat.clone()),
        broadcaster: LobbyBroadcaster::new(),
        countdown_deadline: None,
        open: true,
        receiver: rx,
        published,
        config,
    };

    tokio::spawn(actor.run());

    SessionHandle {
        session_id,
        sender: tx,
        info,
    }
}
