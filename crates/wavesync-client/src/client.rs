//! WebSocket client for a WaveSync server.
//!
//! [`SyncClient::connect`] performs the handshake, then splits the
//! connection into two tasks: a writer draining an outbound queue (so
//! sends never block the caller's frame loop) and a reader forwarding
//! server messages to an mpsc receiver and turning heartbeat echoes into
//! an RTT sample.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wavesync_protocol::{
    Channel, ClientMessage, Codec, EntityEvent, Envelope, JsonCodec, PROTOCOL_VERSION,
    ParticipantId, Payload, ServerMessage, SessionId, SystemMessage, unix_millis,
};
use wavesync_transport::{Connection, Delivery, WebSocketConnection};

use crate::{ClientError, EntitySink};

/// Sentinel for "no heartbeat answered yet".
const RTT_UNKNOWN: u64 = u64::MAX;

/// A connected participant.
pub struct SyncClient {
    participant_id: ParticipantId,
    session_id: SessionId,
    outbound: mpsc::UnboundedSender<Envelope>,
    seq: AtomicU64,
    /// Latest round trip in milliseconds.
    rtt_ms: Arc<AtomicU64>,
    reader: JoinHandle<()>,
}

impl SyncClient {
    /// Connects to `url`, handshakes, and returns the client plus the
    /// stream of server messages.
    pub async fn connect(
        url: &str,
        name: Option<&str>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), ClientError> {
        let conn = Arc::new(WebSocketConnection::connect(url).await?);
        let codec = JsonCodec;

        let hello = Envelope::reliable(
            0,
            unix_millis(),
            Payload::System(SystemMessage::Handshake {
                version: PROTOCOL_VERSION,
                name: name.map(str::to_string),
            }),
        );
        conn.send(&codec.encode(&hello)?).await?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (participant_id, session_id) = loop {
            let Some(bytes) = conn.recv().await? else {
                return Err(ClientError::Handshake("connection closed during handshake".into()));
            };
            let envelope: Envelope = codec.decode(&bytes)?;
            match envelope.payload {
                Payload::System(SystemMessage::HandshakeAck {
                    participant_id,
                    session_id,
                    ..
                }) => break (participant_id, session_id),
                Payload::System(SystemMessage::Error { code, message }) => {
                    return Err(ClientError::Handshake(format!("{code}: {message}")));
                }
                Payload::Server(msg) => {
                    let _ = inbound_tx.send(msg);
                }
                other => tracing::debug!(?other, "ignoring frame before handshake ack"),
            }
        };
        tracing::info!(%participant_id, %session_id, "joined session");

        let rtt_ms = Arc::new(AtomicU64::new(RTT_UNKNOWN));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(Arc::clone(&conn), outbound_rx));
        let reader = tokio::spawn(read_loop(conn, inbound_tx, Arc::clone(&rtt_ms)));

        let client = Self {
            participant_id,
            session_id,
            outbound: outbound_tx,
            seq: AtomicU64::new(1),
            rtt_ms,
            reader,
        };
        Ok((client, inbound_rx))
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Latest measured round trip, once a heartbeat has been answered.
    pub fn rtt(&self) -> Option<Duration> {
        match self.rtt_ms.load(Ordering::Relaxed) {
            RTT_UNKNOWN => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Queues a client message. Entity updates go out on the unreliable
    /// channel, everything else reliably.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        let channel = match &msg {
            ClientMessage::Entity(event) => event.channel(),
            _ => Channel::ReliableOrdered,
        };
        self.enqueue(channel, Payload::Client(msg))
    }

    pub fn register(&self, name: &str, rank_summary: Option<String>) -> Result<(), ClientError> {
        self.send(ClientMessage::Register {
            name: name.to_string(),
            rank_summary,
        })
    }

    pub fn toggle_ready(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::ToggleReady)
    }

    pub fn request_start(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::StartRequest)
    }

    pub fn end_match(&self, wave: u32) -> Result<(), ClientError> {
        self.send(ClientMessage::EndMatch { wave })
    }

    pub fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        self.send(ClientMessage::ChatSend { text: text.to_string() })
    }

    pub fn submit_score(&self, name: &str, score: u64, wave: u32) -> Result<(), ClientError> {
        self.send(ClientMessage::SubmitScore {
            name: name.to_string(),
            score,
            wave,
        })
    }

    pub fn fetch_scores(&self, limit: usize) -> Result<(), ClientError> {
        self.send(ClientMessage::FetchScores { limit })
    }

    /// Sends a heartbeat; the echo updates [`rtt`](Self::rtt).
    pub fn heartbeat(&self) -> Result<(), ClientError> {
        self.enqueue(
            Channel::ReliableOrdered,
            Payload::System(SystemMessage::Heartbeat {
                client_time: unix_millis(),
            }),
        )
    }

    /// Says goodbye and lets the writer close the socket.
    pub fn close(self) -> Result<(), ClientError> {
        self.enqueue(
            Channel::ReliableOrdered,
            Payload::System(SystemMessage::Disconnect {
                reason: "client closing".into(),
            }),
        )
    }

    fn enqueue(&self, channel: Channel, payload: Payload) -> Result<(), ClientError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.outbound
            .send(Envelope::on(channel, seq, unix_millis(), payload))
            .map_err(|_| ClientError::Closed)
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        // The writer stops on its own once `outbound` is dropped.
        self.reader.abort();
    }
}

impl EntitySink for SyncClient {
    fn submit(&self, event: EntityEvent) -> Result<(), ClientError> {
        self.send(ClientMessage::Entity(event))
    }
}

async fn write_loop(conn: Arc<WebSocketConnection>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    let codec = JsonCodec;
    while let Some(envelope) = rx.recv().await {
        let bytes = match codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        let result = if envelope.channel.is_unreliable() {
            conn.send_unreliable(&bytes).await.map(|delivery| {
                if delivery == Delivery::Dropped {
                    tracing::trace!(seq = envelope.seq, "unreliable frame dropped");
                }
            })
        } else {
            conn.send(&bytes).await
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "send failed, stopping writer");
            break;
        }
    }
    let _ = conn.close().await;
}

async fn read_loop(
    conn: Arc<WebSocketConnection>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    rtt_ms: Arc<AtomicU64>,
) {
    let codec = JsonCodec;
    loop {
        let bytes = match conn.recv().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "receive failed");
                break;
            }
        };
        let envelope: Envelope = match codec.decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable frame from server");
                continue;
            }
        };
        match envelope.payload {
            Payload::Server(msg) => {
                if inbound.send(msg).is_err() {
                    break;
                }
            }
            Payload::System(SystemMessage::HeartbeatAck { client_time, .. }) => {
                let rtt = unix_millis().saturating_sub(client_time);
                rtt_ms.store(rtt, Ordering::Relaxed);
                tracing::trace!(rtt_ms = rtt, "heartbeat answered");
            }
            Payload::System(SystemMessage::Disconnect { reason }) => {
                tracing::info!(%reason, "server closed the connection");
                break;
            }
            Payload::System(SystemMessage::Error { code, message }) => {
                tracing::warn!(code, %message, "server reported an error");
            }
            other => tracing::debug!(?other, "unexpected frame from server"),
        }
    }
}
