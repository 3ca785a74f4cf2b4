//! Integration tests for the WaveSync server, handler, and full connection
//! flow, using both a raw WebSocket and `SyncClient`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wavesync::prelude::*;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

/// Starts a server on a random port and returns the address.
async fn start_server() -> String {
    start_server_with(SessionConfig::default()).await
}

async fn start_server_with(config: SessionConfig) -> String {
    let server = WaveSyncServerBuilder::new()
        .bind("127.0.0.1:0")
        .session_config(config)
        .build(InMemoryScoreStore::default())
        .await
        .expect("server should build");

    let addr = server.local_addr().expect("should have local addr").to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn encode_envelope(envelope: &Envelope) -> Message {
    let bytes = serde_json::to_vec(envelope).expect("encode");
    Message::Binary(bytes.into())
}

fn decode_envelope(msg: Message) -> Envelope {
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

fn system(msg: SystemMessage) -> Envelope {
    Envelope::reliable(0, 0, Payload::System(msg))
}

async fn recv(ws: &mut ClientWs) -> Envelope {
    let msg = tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .expect("frame ok");
    decode_envelope(msg)
}

/// Sends a handshake and returns the HandshakeAck envelope.
async fn handshake(ws: &mut ClientWs, name: &str) -> Envelope {
    ws.send(encode_envelope(&system(SystemMessage::Handshake {
        version: PROTOCOL_VERSION,
        name: Some(name.into()),
    })))
    .await
    .expect("send handshake");
    recv(ws).await
}

/// Skips frames until a server message matching `pred` arrives.
async fn next_server(ws: &mut ClientWs, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    loop {
        if let Payload::Server(msg) = recv(ws).await.payload {
            if pred(&msg) {
                return msg;
            }
        }
    }
}

async fn next_from(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    tokio::time::timeout(WAIT, async {
        loop {
            let msg = rx.recv().await.expect("client open");
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("message within timeout")
}

// =========================================================================
// Handshake and plumbing
// =========================================================================

#[tokio::test]
async fn test_handshake_success_then_lobby_state() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    let ack = handshake(&mut ws, "ace").await;
    let participant_id = match ack.payload {
        Payload::System(SystemMessage::HandshakeAck { participant_id, .. }) => participant_id,
        other => panic!("expected HandshakeAck, got {other:?}"),
    };

    let roster = next_server(&mut ws, |m| matches!(m, ServerMessage::LobbySnapshot { .. })).await;
    let ServerMessage::LobbySnapshot { participants } = roster else {
        unreachable!()
    };
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].id, participant_id);
    assert_eq!(participants[0].name, "ace");
    assert!(participants[0].is_leader);
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    ws.send(encode_envelope(&system(SystemMessage::Handshake {
        version: 999,
        name: None,
    })))
    .await
    .expect("send");

    match recv(&mut ws).await.payload {
        Payload::System(SystemMessage::Error { code, .. }) => assert_eq!(code, 400),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_non_handshake_first_message() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    ws.send(encode_envelope(&system(SystemMessage::Heartbeat { client_time: 0 })))
        .await
        .expect("send");

    match recv(&mut ws).await.payload {
        Payload::System(SystemMessage::Error { code, .. }) => assert_eq!(code, 400),
        other => panic!("expected Error 400, got {other:?}"),
    }
}

#[tokio::test]
async fn test_heartbeat_response_after_garbage() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws, "hb").await;

    ws.send(Message::Binary(b"not json".to_vec().into())).await.expect("send");
    ws.send(encode_envelope(&system(SystemMessage::Heartbeat { client_time: 12345 })))
        .await
        .expect("send");

    loop {
        let payload = recv(&mut ws).await.payload;
        if let Payload::System(SystemMessage::HeartbeatAck { client_time, .. }) = payload {
            assert_eq!(client_time, 12345);
            break;
        }
    }
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws, "bye").await;

    ws.send(encode_envelope(&system(SystemMessage::Disconnect { reason: "bye".into() })))
        .await
        .expect("send");

    // Drain queued lobby frames until the close arrives.
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server should close after Disconnect");
}

// =========================================================================
// Sessions through SyncClient
// =========================================================================

#[tokio::test]
async fn test_two_clients_share_session_and_leader_relays_entities() {
    let addr = start_server_with(SessionConfig {
        countdown: Duration::from_millis(100),
        ..SessionConfig::default()
    })
    .await;
    let url = format!("ws://{addr}");

    let (leader, mut leader_rx) = SyncClient::connect(&url, Some("lead"))
        .await
        .expect("leader connects");
    let (follower, mut follower_rx) = SyncClient::connect(&url, Some("follow"))
        .await
        .expect("follower connects");
    assert_eq!(leader.session_id(), follower.session_id());

    leader.toggle_ready().unwrap();
    follower.toggle_ready().unwrap();
    // Both ready flags must be in before the leader asks.
    next_from(&mut leader_rx, |m| {
        matches!(
            m,
            ServerMessage::LobbySnapshot { participants }
                if participants.len() == 2 && participants.iter().all(|p| p.ready)
        )
    })
    .await;

    follower.request_start().unwrap();
    let rejected =
        next_from(&mut follower_rx, |m| matches!(m, ServerMessage::StartRejected { .. })).await;
    assert_eq!(
        rejected,
        ServerMessage::StartRejected {
            reason: "leader-only".into()
        }
    );

    leader.request_start().unwrap();
    next_from(&mut follower_rx, |m| {
        matches!(m, ServerMessage::MatchStarting { duration: 100, .. })
    })
    .await;
    next_from(&mut follower_rx, |m| *m == ServerMessage::MatchRunning).await;
    next_from(&mut leader_rx, |m| *m == ServerMessage::MatchRunning).await;

    let grunt = EntityState {
        id: EntityId(1),
        x: 10.0,
        y: 20.0,
        health: 5,
        speed: 1.5,
    };
    let mut sync = LeaderSync::new(BroadcastConfig::default(), &leader);
    sync.spawn("grunt", grunt).unwrap();

    // A follower's entity event is dropped by the relay.
    follower
        .submit(EntityEvent::Die {
            id: EntityId(1),
            is_special: false,
        })
        .unwrap();
    sync.hit(EntityId(1), 2).unwrap();

    let mut shadows = ClientReconciler::default();
    let spawn = next_from(&mut follower_rx, |m| matches!(m, ServerMessage::Entity(_))).await;
    let hit = next_from(&mut follower_rx, |m| matches!(m, ServerMessage::Entity(_))).await;
    for msg in [spawn, hit] {
        if let ServerMessage::Entity(event) = msg {
            shadows.apply(&event, std::time::Instant::now());
        }
    }
    let shadow = shadows.get(EntityId(1)).expect("shadow spawned, not killed");
    assert_eq!(shadow.health, 2);
    assert_eq!((shadow.x, shadow.y), (10.0, 20.0));
}

#[tokio::test]
async fn test_chat_round_trip_and_system_lines() {
    let addr = start_server().await;
    let url = format!("ws://{addr}");

    let (a, mut a_rx) = SyncClient::connect(&url, Some("amy")).await.unwrap();
    let (_b, mut b_rx) = SyncClient::connect(&url, Some("ben")).await.unwrap();

    let history = next_from(&mut b_rx, |m| matches!(m, ServerMessage::ChatHistory { .. })).await;
    let ServerMessage::ChatHistory { messages } = history else {
        unreachable!()
    };
    assert!(messages.iter().any(|m| m.is_system && m.text == "amy joined"));

    next_from(&mut a_rx, |m| {
        matches!(m, ServerMessage::ChatNew(c) if c.text == "ben joined")
    })
    .await;

    a.send_chat("  hi <ben>  ").unwrap();
    let got =
        next_from(&mut b_rx, |m| matches!(m, ServerMessage::ChatNew(c) if !c.is_system)).await;
    let ServerMessage::ChatNew(chat) = got else { unreachable!() };
    assert_eq!(chat.text, "hi &lt;ben&gt;");
    assert_eq!(chat.sender_name, "amy");
    assert_eq!(chat.sender_id, Some(a.participant_id()));

    a.send_chat("   ").unwrap();
    let rejected = next_from(&mut a_rx, |m| matches!(m, ServerMessage::ChatRejected { .. })).await;
    assert_eq!(
        rejected,
        ServerMessage::ChatRejected {
            reason: "empty".into(),
            retry_after_ms: None
        }
    );
}

#[tokio::test]
async fn test_leader_disconnect_promotes_next_participant() {
    let addr = start_server().await;
    let url = format!("ws://{addr}");

    let (a, _a_rx) = SyncClient::connect(&url, Some("first")).await.unwrap();
    let (b, mut b_rx) = SyncClient::connect(&url, Some("second")).await.unwrap();
    let (_c, _c_rx) = SyncClient::connect(&url, Some("third")).await.unwrap();
    let b_id = b.participant_id();

    a.close().unwrap();

    let roster = next_from(&mut b_rx, |m| {
        matches!(m, ServerMessage::LobbySnapshot { participants } if participants.len() == 2)
    })
    .await;
    let ServerMessage::LobbySnapshot { participants } = roster else {
        unreachable!()
    };
    let leaders: Vec<_> = participants.iter().filter(|p| p.is_leader).collect();
    assert_eq!(leaders.len(), 1);
    assert_eq!(leaders[0].id, b_id);
}

#[tokio::test]
async fn test_scores_submit_and_fetch() {
    let addr = start_server().await;
    let url = format!("ws://{addr}");
    let (client, mut rx) = SyncClient::connect(&url, Some("scorer")).await.unwrap();

    client.submit_score("low", 100, 2).unwrap();
    next_from(&mut rx, |m| matches!(m, ServerMessage::Scores { .. })).await;
    client.submit_score("high", 900, 7).unwrap();
    let after = next_from(&mut rx, |m| matches!(m, ServerMessage::Scores { .. })).await;
    let ServerMessage::Scores { entries } = after else { unreachable!() };
    assert_eq!(entries[0].name, "high");
    assert_eq!(entries.len(), 2);

    client.fetch_scores(1).unwrap();
    let top = next_from(&mut rx, |m| matches!(m, ServerMessage::Scores { .. })).await;
    assert_eq!(
        top,
        ServerMessage::Scores {
            entries: vec![ScoreEntry {
                name: "high".into(),
                score: 900,
                wave: 7
            }]
        }
    );
}

#[tokio::test]
async fn test_heartbeat_sets_client_rtt() {
    let addr = start_server().await;
    let (client, _rx) = SyncClient::connect(&format!("ws://{addr}"), None).await.unwrap();
    assert!(client.rtt().is_none());

    client.heartbeat().unwrap();
    let measured = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(rtt) = client.rtt() {
                return rtt;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("heartbeat answered");
    assert!(measured < WAIT);
}

#[tokio::test]
async fn test_full_session_sends_newcomer_elsewhere() {
    let addr = start_server_with(SessionConfig {
        max_participants: 1,
        ..SessionConfig::default()
    })
    .await;
    let url = format!("ws://{addr}");

    let (first, _r1) = SyncClient::connect(&url, Some("one")).await.unwrap();
    let (second, _r2) = SyncClient::connect(&url, Some("two")).await.unwrap();
    assert_ne!(first.session_id(), second.session_id());
}
