//! Per-connection handler: handshake, session admission, and routing.
//!
//! Each accepted connection gets its own Tokio task running this handler:
//!   1. Receive Handshake → validate version
//!   2. Join or create a session → send HandshakeAck
//!   3. Loop: interleave inbound frames with the session's outbound queue

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use wavesync_lobby::sanitize;
use wavesync_protocol::{
    Channel, ClientMessage, Codec, Envelope, PROTOCOL_VERSION, ParticipantId, Payload,
    ProtocolError, ScoreEntry, ServerMessage, SystemMessage, unix_millis,
};
use wavesync_session::{JoinTicket, Outbound, ParticipantSender, SessionError, SessionHandle};
use wavesync_transport::{Connection, WebSocketConnection};

use crate::scores::MAX_SCORE_LIMIT;
use crate::server::ServerState;
use crate::{ScoreStore, ScoreStoreError, WaveSyncError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence longer than this ends the connection. Clients heartbeat well
/// inside it.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest leaderboard name kept.
const MAX_SCORE_NAME: usize = 24;

/// Entries returned after a score submission.
const SUBMIT_REPLY_LIMIT: usize = 10;

/// Sessions tried before a join gives up.
const ADMIT_ATTEMPTS: usize = 3;

/// Removes the participant from its session when the handler exits, even
/// on panic. `Drop` is synchronous, so the leave runs in its own task.
struct ParticipantGuard<S: ScoreStore, C: Codec> {
    participant_id: ParticipantId,
    session: SessionHandle,
    state: Arc<ServerState<S, C>>,
}

impl<S: ScoreStore, C: Codec> Drop for ParticipantGuard<S, C> {
    fn drop(&mut self) {
        let participant_id = self.participant_id;
        let session = self.session.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let remaining = session.leave(participant_id).await;
            let mut sessions = state.sessions.lock().await;
            sessions.untrack(participant_id);
            match remaining {
                Ok(0) => {
                    let emptied = sessions.remove_session(session.session_id());
                    drop(sessions);
                    if let Some(handle) = emptied {
                        let _ = handle.shutdown().await;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(%participant_id, error = %e, "leave failed"),
            }
        });
    }
}

/// Per-connection outbound sequence counter.
struct Sequencer(u64);

impl Sequencer {
    fn next(&mut self) -> u64 {
        let current = self.0;
        self.0 += 1;
        current
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, C>>,
) -> Result<(), WaveSyncError>
where
    S: ScoreStore,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let name = perform_handshake(&conn, &state.codec).await?;

    let (tx, mut outbound) = mpsc::unbounded_channel();
    let (ticket, session) = match admit(&state, name.as_deref().unwrap_or(""), tx).await {
        Ok(joined) => joined,
        Err(e) => {
            send_error(&conn, &state.codec, 503, &e.to_string(), 0).await?;
            return Err(e.into());
        }
    };
    let participant_id = ticket.participant_id;
    let guard = ParticipantGuard {
        participant_id,
        session,
        state: Arc::clone(&state),
    };

    let mut seq = Sequencer(0);
    send_payload(
        &conn,
        &state.codec,
        Channel::ReliableOrdered,
        seq.next(),
        Payload::System(SystemMessage::HandshakeAck {
            participant_id,
            session_id: ticket.session_id,
            server_time: unix_millis(),
        }),
    )
    .await?;
    tracing::info!(
        %conn_id,
        %participant_id,
        session_id = %ticket.session_id,
        "participant admitted"
    );

    // Only inbound traffic keeps the connection alive.
    let mut idle_deadline = Instant::now() + IDLE_TIMEOUT;
    loop {
        tokio::select! {
            incoming = tokio::time::timeout_at(idle_deadline, conn.recv()) => {
                let data = match incoming {
                    Ok(Ok(Some(data))) => data,
                    Ok(Ok(None)) => {
                        tracing::info!(%participant_id, "connection closed cleanly");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%participant_id, error = %e, "recv error");
                        break;
                    }
                    Err(_) => {
                        tracing::info!(%participant_id, "connection timed out");
                        break;
                    }
                };
                idle_deadline = Instant::now() + IDLE_TIMEOUT;
                let envelope: Envelope = match state.codec.decode(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::debug!(%participant_id, error = %e, "failed to decode envelope");
                        continue;
                    }
                };
                let closing = handle_inbound(
                    &conn,
                    &state,
                    &guard.session,
                    participant_id,
                    envelope.payload,
                    &mut seq,
                )
                .await?;
                if closing {
                    break;
                }
            }
            Some(Outbound { channel, message }) = outbound.recv() => {
                let payload = Payload::Server(message);
                send_payload(&conn, &state.codec, channel, seq.next(), payload).await?;
            }
        }
    }

    let _ = conn.close().await;
    Ok(())
}

/// Joins a session with the manager lock held only for bookkeeping, never
/// across a round trip to a session actor.
async fn admit<S, C>(
    state: &ServerState<S, C>,
    name: &str,
    sender: ParticipantSender,
) -> Result<(JoinTicket, SessionHandle), SessionError>
where
    S: ScoreStore,
    C: Codec,
{
    let mut attempt = 1;
    loop {
        let session = state.sessions.lock().await.open_session();
        match session.join(name, sender.clone()).await {
            Ok(participant_id) => {
                let ticket = JoinTicket {
                    session_id: session.session_id(),
                    participant_id,
                };
                state.sessions.lock().await.track(ticket);
                return Ok((ticket, session));
            }
            // Filled, started, or emptied since its snapshot.
            Err(e) if attempt < ADMIT_ATTEMPTS => {
                tracing::debug!(session_id = %session.session_id(), error = %e, "join refused");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Receives and validates the handshake. Returns the requested name.
async fn perform_handshake(
    conn: &WebSocketConnection,
    codec: &impl Codec,
) -> Result<Option<String>, WaveSyncError> {
    let data = match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            let reason = "connection closed before handshake";
            return Err(ProtocolError::InvalidMessage(reason.into()).into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into()),
    };

    let envelope: Envelope = codec.decode(&data)?;
    let (version, name) = match envelope.payload {
        Payload::System(SystemMessage::Handshake { version, name }) => (version, name),
        _ => {
            send_error(conn, codec, 400, "expected Handshake", 0).await?;
            let reason = "first message must be Handshake";
            return Err(ProtocolError::InvalidMessage(reason.into()).into());
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            codec,
            400,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
            0,
        )
        .await?;
        let _ = conn.close().await;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    Ok(name)
}

/// Dispatches one inbound payload. Returns `true` if the connection
/// should close.
async fn handle_inbound<S, C>(
    conn: &WebSocketConnection,
    state: &ServerState<S, C>,
    session: &SessionHandle,
    participant_id: ParticipantId,
    payload: Payload,
    seq: &mut Sequencer,
) -> Result<bool, WaveSyncError>
where
    S: ScoreStore,
    C: Codec,
{
    match payload {
        Payload::System(SystemMessage::Heartbeat { client_time }) => {
            send_payload(
                conn,
                &state.codec,
                Channel::ReliableOrdered,
                seq.next(),
                Payload::System(SystemMessage::HeartbeatAck {
                    client_time,
                    server_time: unix_millis(),
                }),
            )
            .await?;
        }
        Payload::System(SystemMessage::Disconnect { reason }) => {
            tracing::info!(%participant_id, %reason, "client disconnected");
            return Ok(true);
        }
        Payload::System(_) | Payload::Server(_) => {
            tracing::debug!(%participant_id, "ignoring unexpected message");
        }
        Payload::Client(ClientMessage::SubmitScore { name, score, wave }) => {
            let entry = ScoreEntry {
                name: score_name(&name),
                score,
                wave,
            };
            tracing::info!(%participant_id, score, wave, "score submitted");
            let result = state.scores.submit(entry, SUBMIT_REPLY_LIMIT).await;
            reply_scores(conn, &state.codec, seq, result).await?;
        }
        Payload::Client(ClientMessage::FetchScores { limit }) => {
            let result = state.scores.top(limit.min(MAX_SCORE_LIMIT)).await;
            reply_scores(conn, &state.codec, seq, result).await?;
        }
        Payload::Client(msg) => {
            if let Err(e) = session.send_message(participant_id, msg).await {
                send_error(conn, &state.codec, 409, &e.to_string(), seq.next()).await?;
            }
        }
    }
    Ok(false)
}

async fn reply_scores(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: &mut Sequencer,
    result: Result<Vec<ScoreEntry>, ScoreStoreError>,
) -> Result<(), WaveSyncError> {
    match result {
        Ok(entries) => {
            send_payload(
                conn,
                codec,
                Channel::ReliableOrdered,
                seq.next(),
                Payload::Server(ServerMessage::Scores { entries }),
            )
            .await
        }
        Err(e) => {
            tracing::warn!(error = %e, "score store failed");
            send_error(conn, codec, 503, &e.to_string(), seq.next()).await
        }
    }
}

/// Trimmed, escaped, and cut to length. Blank names become "Anonymous".
fn score_name(raw: &str) -> String {
    let cut: String = raw.trim().chars().take(MAX_SCORE_NAME).collect();
    // Escaping can lengthen the text; allow for the widest entity.
    sanitize(&cut, MAX_SCORE_NAME * 6).unwrap_or_else(|_| "Anonymous".to_string())
}

/// Encodes and sends one envelope, using the drop-if-busy path for the
/// unreliable channel.
async fn send_payload(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    channel: Channel,
    seq: u64,
    payload: Payload,
) -> Result<(), WaveSyncError> {
    let envelope = Envelope::on(channel, seq, unix_millis(), payload);
    let bytes = codec.encode(&envelope)?;
    if channel.is_unreliable() {
        conn.send_unreliable(&bytes).await?;
    } else {
        conn.send(&bytes).await?;
    }
    Ok(())
}

async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    code: u16,
    message: &str,
    seq: u64,
) -> Result<(), WaveSyncError> {
    send_payload(
        conn,
        codec,
        Channel::ReliableOrdered,
        seq,
        Payload::System(SystemMessage::Error {
            code,
            message: message.to_string(),
        }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_name_cleans_and_truncates() {
        assert_eq!(score_name("  ace  "), "ace");
        assert_eq!(score_name("<b>"), "&lt;b&gt;");
        assert_eq!(score_name(&"x".repeat(40)).len(), MAX_SCORE_NAME);
        assert_eq!(score_name("   "), "Anonymous");
    }

    #[test]
    fn test_sequencer_counts_up() {
        let mut seq = Sequencer(5);
        assert_eq!(seq.next(), 5);
        assert_eq!(seq.next(), 6);
    }
}
