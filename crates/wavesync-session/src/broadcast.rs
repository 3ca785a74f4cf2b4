//! Outbound fan-out to participants.

use std::collections::HashMap;

use tokio::sync::mpsc;
use wavesync_lobby::SessionRegistry;
use wavesync_protocol::{Channel, ParticipantId, Recipient, ServerMessage};

/// One message on its way to a participant's connection task.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub channel: Channel,
    pub message: ServerMessage,
}

/// Channel sender for delivering outbound messages to one participant.
pub type ParticipantSender = mpsc::UnboundedSender<Outbound>;

/// Holds each participant's outbound channel and pushes roster, match,
/// chat, and relayed entity messages through them.
#[derive(Debug, Default)]
pub struct LobbyBroadcaster {
    senders: HashMap<ParticipantId, ParticipantSender>,
}

impl LobbyBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, participant: ParticipantId, sender: ParticipantSender) {
        self.senders.insert(participant, sender);
    }

    pub fn detach(&mut self, participant: ParticipantId) {
        self.senders.remove(&participant);
    }

    /// Sends `lobby.snapshot` to everyone.
    pub fn roster(&self, registry: &SessionRegistry) {
        self.send(
            Recipient::All,
            ServerMessage::LobbySnapshot {
                participants: registry.snapshot(),
            },
        );
    }

    /// Reliable-ordered send.
    pub fn send(&self, recipient: Recipient, message: ServerMessage) {
        self.send_on(recipient, Channel::ReliableOrdered, message);
    }

    /// Sends on an explicit channel.
    pub fn send_on(&self, recipient: Recipient, channel: Channel, message: ServerMessage) {
        let outbound = Outbound { channel, message };
        match recipient {
            Recipient::Participant(id) => self.send_to(id, outbound),
            Recipient::All | Recipient::AllExcept(_) => {
                for (id, sender) in &self.senders {
                    if recipient.includes(*id) {
                        let _ = sender.send(outbound.clone());
                    }
                }
            }
        }
    }

    /// A closed receiver just means the connection task already exited.
    fn send_to(&self, participant: ParticipantId, outbound: Outbound) {
        if let Some(sender) = self.senders.get(&participant) {
            let _ = sender.send(outbound);
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
