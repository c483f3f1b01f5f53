//! Per-connection handler: handshake, request dispatch, and change
//! forwarding.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version → send HandshakeAck
//!   2. Spawn a writer task that owns outbound framing
//!   3. Loop: receive envelopes → answer requests and heartbeats
//!   4. On exit, release every subscription the client opened

use std::collections::HashMap;
use std::sync::Arc;

use rookline_protocol::{
    Codec, Envelope, PROTOCOL_VERSION, Payload, ProtocolError, StoreRequest,
    StoreResponse, SubscriptionId, unix_millis,
};
use rookline_store::{SessionStore, StoreError, Subscription};
use rookline_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::RooklineError;
use crate::server::ServerState;

/// The change feeds one client has open, each pumped by its own task.
///
/// Dropping this aborts every pump, which drops its [`Subscription`] and
/// releases it on the store. This runs even if the handler panics.
struct Forwarders {
    conn_id: ConnectionId,
    tasks: HashMap<SubscriptionId, JoinHandle<()>>,
}

impl Forwarders {
    fn new(conn_id: ConnectionId) -> Self {
        Self {
            conn_id,
            tasks: HashMap::new(),
        }
    }

    fn contains(&self, subscription: SubscriptionId) -> bool {
        self.tasks.contains_key(&subscription)
    }

    /// Pushes every event from `feed` to the client, tagged with the
    /// client's subscription id.
    fn start(
        &mut self,
        subscription: SubscriptionId,
        mut feed: Subscription,
        outbound: mpsc::UnboundedSender<Payload>,
    ) {
        let task = tokio::spawn(async move {
            while let Some(event) = feed.next().await {
                if outbound.send(Payload::Change { subscription, event }).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(subscription, task);
    }

    fn stop(&mut self, subscription: SubscriptionId) -> bool {
        match self.tasks.remove(&subscription) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            tracing::debug!(conn_id = %self.conn_id, count = self.tasks.len(), "releasing subscriptions");
        }
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), RooklineError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    perform_handshake(&conn, &state).await?;
    tracing::info!(%conn_id, "store client connected");

    // --- Step 2: Writer ---
    let conn = Arc::new(conn);
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        Arc::clone(&state),
        outbound_rx,
    ));

    // --- Step 3: Message loop ---
    let mut forwarders = Forwarders::new(conn_id);

    loop {
        let data = match tokio::time::timeout(
            state.config.idle_timeout,
            conn.recv(),
        )
        .await
        {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, "connection timed out");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                let error = Payload::Error {
                    code: 400,
                    message: format!("malformed envelope: {e}"),
                };
                if outbound.send(error).is_err() {
                    break;
                }
                continue;
            }
        };

        let reply = match envelope.payload {
            Payload::Heartbeat { client_time } => Payload::HeartbeatAck {
                client_time,
                server_time: unix_millis(),
            },
            Payload::Request { id, request } => {
                let response = dispatch(
                    &state.store,
                    request,
                    &mut forwarders,
                    &outbound,
                )
                .await;
                Payload::Response { id, response }
            }
            Payload::Disconnect { reason } => {
                tracing::info!(%conn_id, %reason, "client disconnected");
                break;
            }
            other => {
                tracing::debug!(%conn_id, payload = ?other, "ignoring unexpected payload");
                continue;
            }
        };

        if outbound.send(reply).is_err() {
            break;
        }
    }

    // --- Step 4: Cleanup ---
    // Pumps hold senders too; the writer drains and closes once they are
    // gone.
    drop(forwarders);
    drop(outbound);
    let _ = writer.await;
    Ok(())
}

/// Performs the initial handshake: receive Handshake, validate, send Ack.
async fn perform_handshake<C: Codec>(
    conn: &WebSocketConnection,
    state: &ServerState<C>,
) -> Result<(), RooklineError> {
    let data = match tokio::time::timeout(
        state.config.handshake_timeout,
        conn.recv(),
    )
    .await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(RooklineError::Protocol(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )));
        }
        Ok(Err(e)) => return Err(RooklineError::Transport(e)),
        Err(_) => {
            return Err(RooklineError::Protocol(ProtocolError::InvalidMessage(
                "handshake timed out".into(),
            )));
        }
    };

    let envelope: Envelope = match state.codec.decode(&data) {
        Ok(envelope) => envelope,
        Err(e) => {
            send_error(conn, &state.codec, 400, "malformed handshake").await?;
            return Err(e.into());
        }
    };

    let version = match envelope.payload {
        Payload::Handshake { version } => version,
        _ => {
            send_error(conn, &state.codec, 400, "expected Handshake").await?;
            return Err(RooklineError::Protocol(ProtocolError::InvalidMessage(
                "first message must be Handshake".into(),
            )));
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            &state.codec,
            400,
            &format!(
                "version mismatch: expected {PROTOCOL_VERSION}, got {version}"
            ),
        )
        .await?;
        return Err(RooklineError::Protocol(ProtocolError::InvalidMessage(
            "protocol version mismatch".into(),
        )));
    }

    let ack = Envelope::new(
        0,
        unix_millis(),
        Payload::HandshakeAck {
            server_time: unix_millis(),
        },
    );
    let ack_bytes = state.codec.encode(&ack)?;
    conn.send(&ack_bytes).await?;

    Ok(())
}

/// Runs one request against the store and shapes the answer.
async fn dispatch<S: SessionStore>(
    store: &S,
    request: StoreRequest,
    forwarders: &mut Forwarders,
    outbound: &mpsc::UnboundedSender<Payload>,
) -> StoreResponse {
    let result = match request {
        StoreRequest::CreateRoom { room } => {
            store.create_room(room).await.map(|room| StoreResponse::Room { room })
        }
        StoreRequest::GetRoom { id } => {
            store.get_room(id).await.map(|room| StoreResponse::Room { room })
        }
        StoreRequest::FindRoomByCode { code } => store
            .find_room_by_code(&code)
            .await
            .map(|room| StoreResponse::MaybeRoom { room }),
        StoreRequest::UpdateRoom {
            id,
            patch,
            conditions,
        } => store
            .update_room(id, patch, conditions)
            .await
            .map(|room| StoreResponse::Room { room }),
        StoreRequest::InsertMove { mv } => {
            store.insert_move(mv).await.map(|mv| StoreResponse::Move { mv })
        }
        StoreRequest::ListMoves { room_id } => store
            .list_moves(room_id)
            .await
            .map(|moves| StoreResponse::Moves { moves }),
        StoreRequest::Subscribe { subscription, feed } => {
            if forwarders.contains(subscription) {
                Err(StoreError::Conflict(format!(
                    "subscription {subscription} already open"
                )))
            } else {
                store.subscribe(feed).await.map(|sub| {
                    tracing::debug!(conn_id = %forwarders.conn_id, %subscription, %feed, "subscribed");
                    forwarders.start(subscription, sub, outbound.clone());
                    StoreResponse::Subscribed { subscription }
                })
            }
        }
        StoreRequest::Unsubscribe { subscription } => {
            if forwarders.stop(subscription) {
                tracing::debug!(conn_id = %forwarders.conn_id, %subscription, "unsubscribed");
            }
            Ok(StoreResponse::Unsubscribed { subscription })
        }
    };

    result.unwrap_or_else(|e| StoreResponse::Failed {
        kind: e.kind(),
        message: e.to_string(),
    })
}

/// Frames queued payloads until every sender is gone or the connection
/// fails, then closes the connection.
async fn write_loop<C: Codec>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<C>>,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
) {
    let mut seq: u64 = 1;

    while let Some(payload) = outbound.recv().await {
        let envelope = Envelope::new(next_seq(&mut seq), unix_millis(), payload);
        let bytes = match state.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode envelope");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed");
            break;
        }
    }

    let _ = conn.close().await;
}

/// Sends an `Error` envelope outside the writer task.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    code: u16,
    message: &str,
) -> Result<(), RooklineError> {
    let envelope = Envelope::new(
        0,
        unix_millis(),
        Payload::Error {
            code,
            message: message.to_string(),
        },
    );
    let bytes = codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
