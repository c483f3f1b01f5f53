//! Integration tests for the store server: handshake, raw requests, and
//! full sessions over `RemoteStore`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rookline::prelude::*;
use rookline_protocol::{Condition, FailureKind, NewRoom, RoomPatch, SubscriptionId};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port and returns its address and store.
async fn start_server() -> (String, MemoryStore) {
    let server = StoreServer::builder()
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let store = server.store().clone();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, store)
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn remote(addr: &str) -> RemoteStore {
    RemoteStore::connect(&format!("ws://{addr}"))
        .await
        .expect("should connect")
}

fn encode_envelope(envelope: &Envelope) -> Message {
    let bytes = serde_json::to_vec(envelope).expect("encode");
    Message::Binary(bytes.into())
}

async fn send(ws: &mut ClientWs, payload: Payload) {
    let envelope = Envelope::new(1, 0, payload);
    ws.send(encode_envelope(&envelope)).await.expect("send");
}

async fn recv(ws: &mut ClientWs) -> Payload {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .expect("recv");
    let envelope: Envelope =
        serde_json::from_slice(&msg.into_data()).expect("decode");
    envelope.payload
}

/// Sends a handshake and returns the reply.
async fn handshake(ws: &mut ClientWs, version: u32) -> Payload {
    send(ws, Payload::Handshake { version }).await;
    recv(ws).await
}

fn new_room(code: &str) -> NewRoom {
    NewRoom {
        code: code.into(),
        position: rookline_rules::STANDARD_START.into(),
        current_turn: Color::White,
    }
}

fn token(s: &str) -> ParticipantToken {
    ParticipantToken(s.to_string())
}

// =========================================================================
// Handshake and framing
// =========================================================================

#[tokio::test]
async fn test_handshake_success() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;

    let ack = handshake(&mut ws, PROTOCOL_VERSION).await;

    assert!(matches!(ack, Payload::HandshakeAck { .. }));
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;

    match handshake(&mut ws, 999).await {
        Payload::Error { code, message } => {
            assert_eq!(code, 400);
            assert!(message.contains("version mismatch"));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_message_not_handshake_is_rejected() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, Payload::Heartbeat { client_time: 1 }).await;

    match recv(&mut ws).await {
        Payload::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_heartbeat_response() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws, PROTOCOL_VERSION).await;

    send(&mut ws, Payload::Heartbeat { client_time: 12345 }).await;

    match recv(&mut ws).await {
        Payload::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 12345),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_frame_gets_error_and_connection_survives() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws, PROTOCOL_VERSION).await;

    ws.send(Message::Binary(b"not json".to_vec().into()))
        .await
        .expect("send");
    match recv(&mut ws).await {
        Payload::Error { code, .. } => assert_eq!(code, 400),
        other => panic!("expected Error, got {other:?}"),
    }

    send(&mut ws, Payload::Heartbeat { client_time: 7 }).await;
    assert!(matches!(recv(&mut ws).await, Payload::HeartbeatAck { .. }));
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws, PROTOCOL_VERSION).await;

    send(
        &mut ws,
        Payload::Disconnect {
            reason: "bye".into(),
        },
    )
    .await;

    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("server should close");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_idle_connection_is_dropped() {
    let server = StoreServer::builder()
        .bind("127.0.0.1:0")
        .idle_timeout(Duration::from_millis(100))
        .build()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());

    let mut ws = connect(&addr).await;
    handshake(&mut ws, PROTOCOL_VERSION).await;

    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("server should close");
    assert!(!matches!(next, Some(Ok(Message::Binary(_)))));
}

// =========================================================================
// Raw requests
// =========================================================================

#[tokio::test]
async fn test_request_unknown_room_returns_not_found() {
    let (addr, _) = start_server().await;
    let mut ws = connect(&addr).await;
    handshake(&mut ws, PROTOCOL_VERSION).await;

    send(
        &mut ws,
        Payload::Request {
            id: 9,
            request: StoreRequest::GetRoom { id: RoomId(404) },
        },
    )
    .await;

    match recv(&mut ws).await {
        Payload::Response {
            id,
            response: StoreResponse::Failed { kind, .. },
        } => {
            assert_eq!(id, 9);
            assert_eq!(kind, FailureKind::NotFound);
        }
        other => panic!("expected Failed response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_subscription_id_is_refused() {
    let (addr, store) = start_server().await;
    let room = store.create_room(new_room("DUPSUB")).await.unwrap();
    let mut ws = connect(&addr).await;
    handshake(&mut ws, PROTOCOL_VERSION).await;

    let subscribe = StoreRequest::Subscribe {
        subscription: SubscriptionId(1),
        feed: Feed::Room(room.id),
    };
    send(&mut ws, Payload::Request { id: 1, request: subscribe.clone() }).await;
    assert!(matches!(
        recv(&mut ws).await,
        Payload::Response { response: StoreResponse::Subscribed { .. }, .. }
    ));

    send(&mut ws, Payload::Request { id: 2, request: subscribe }).await;
    match recv(&mut ws).await {
        Payload::Response {
            response: StoreResponse::Failed { kind, .. },
            ..
        } => assert_eq!(kind, FailureKind::Conflict),
        other => panic!("expected Failed response, got {other:?}"),
    }
}

// =========================================================================
// RemoteStore end to end
// =========================================================================

#[tokio::test]
async fn test_remote_store_create_and_find() {
    let (addr, _) = start_server().await;
    let store = remote(&addr).await;

    let room = store.create_room(new_room("ABC123")).await.unwrap();
    let found = store.find_room_by_code("ABC123").await.unwrap();

    assert_eq!(found, Some(room.clone()));
    assert_eq!(store.find_room_by_code("NOPE00").await.unwrap(), None);
    assert!(matches!(
        store.create_room(new_room("ABC123")).await,
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_remote_store_failed_condition_maps_back() {
    let (addr, _) = start_server().await;
    let store = remote(&addr).await;
    let room = store.create_room(new_room("COND01")).await.unwrap();

    let result = store
        .update_room(
            room.id,
            RoomPatch::default(),
            vec![Condition::TurnIs(Color::Black)],
        )
        .await;

    assert!(matches!(result, Err(StoreError::ConditionFailed(_))));
}

#[tokio::test]
async fn test_remote_subscription_sees_other_clients_write() {
    let (addr, _) = start_server().await;
    let watcher = remote(&addr).await;
    let writer = remote(&addr).await;
    let room = writer.create_room(new_room("FEED01")).await.unwrap();

    let mut feed = watcher.subscribe(Feed::Room(room.id)).await.unwrap();
    writer
        .update_room(
            room.id,
            RoomPatch::claim_seat(Color::White, token("alice")),
            vec![Condition::SeatEmpty(Color::White)],
        )
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("event in time")
        .expect("feed open");
    match event {
        ChangeEvent::RoomUpdated(updated) => {
            assert_eq!(updated.version, 2);
            assert_eq!(updated.white_seat, Some(token("alice")));
        }
        other => panic!("expected RoomUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_sessions_play_a_move() {
    let (addr, store) = start_server().await;
    let room = RoomManager::new(remote(&addr).await)
        .create_room()
        .await
        .unwrap();

    let mut alice = SessionSync::new(
        remote(&addr).await,
        ChessRules::new(),
        token("alice"),
        SessionConfig::default(),
    );
    let mut bob = SessionSync::new(
        remote(&addr).await,
        ChessRules::new(),
        token("bob"),
        SessionConfig::default(),
    );
    assert_eq!(alice.open(&room.code).await.unwrap(), Color::White);
    assert_eq!(bob.open(&room.code).await.unwrap(), Color::Black);

    // Alice learns that bob took the black seat.
    while alice.phase() != SessionPhase::Active {
        tokio::time::timeout(Duration::from_secs(2), alice.next_change())
            .await
            .expect("room update in time")
            .expect("feed open")
            .unwrap();
    }

    let record = alice.submit_move("e2", "e4", None).await.unwrap();
    assert_eq!(record.notation, "e4");

    while bob.moves().is_empty() || !bob.input_enabled() {
        tokio::time::timeout(Duration::from_secs(2), bob.next_change())
            .await
            .expect("change in time")
            .expect("feed open")
            .unwrap();
    }

    assert_eq!(bob.moves(), vec![record]);
    let stored = store.get_room(room.id).await.unwrap();
    assert_eq!(stored.current_turn, Color::Black);
    assert_eq!(bob.board_view().position, stored.position);
}
