//! [`SessionStore`] over a WebSocket connection to a store host.
//!
//! One writer task owns the send half of the connection and interleaves
//! queued requests with heartbeats; one reader task routes responses to
//! waiting callers by request id and change events to subscriptions by
//! subscription id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rookline_protocol::{
    ChangeEvent, Codec, Condition, Envelope, Feed, JsonCodec, MoveRecord,
    NewMove, NewRoom, PROTOCOL_VERSION, Payload, ProtocolError, Room, RoomId,
    RoomPatch, StoreRequest, StoreResponse, SubscriptionId, unix_millis,
};
use rookline_transport::{ClientConnection, Connection};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::{SessionStore, StoreError, Subscription};

/// Request id used for fire-and-forget requests; no caller waits on it.
const UNTRACKED_REQUEST: u64 = 0;

/// Connection settings for a [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// How long to wait for the host's `HandshakeAck`.
    pub handshake_timeout: Duration,

    /// Interval between heartbeats. Must stay below the host's idle
    /// timeout.
    pub heartbeat_interval: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// State shared with the reader task.
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<StoreResponse>>>,
    routes: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<ChangeEvent>>>,
    closed: AtomicBool,
}

impl Shared {
    /// Fails every waiting caller and ends every feed.
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.lock().await.clear();
        self.routes.lock().await.clear();
    }
}

struct Inner {
    outbound: mpsc::UnboundedSender<Payload>,
    shared: Arc<Shared>,
    next_request: AtomicU64,
    next_subscription: AtomicU64,
}

/// A session store living in another process.
///
/// Cheap to clone. The connection closes once every clone and every
/// subscription opened through it is dropped.
#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<Inner>,
}

impl RemoteStore {
    /// Connects to a store host at `url` (e.g. `ws://127.0.0.1:7878`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with(url, RemoteConfig::default()).await
    }

    pub async fn connect_with(
        url: &str,
        config: RemoteConfig,
    ) -> Result<Self, StoreError> {
        let conn = ClientConnection::connect(url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        handshake(&conn, config.handshake_timeout).await?;
        tracing::info!(url, conn_id = %conn.id(), "connected to store host");

        let conn = Arc::new(conn);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(write_loop(
            Arc::clone(&conn),
            outbound_rx,
            config.heartbeat_interval,
        ));
        tokio::spawn(read_loop(conn, Arc::clone(&shared)));

        Ok(Self {
            inner: Arc::new(Inner {
                outbound: outbound_tx,
                shared,
                next_request: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
            }),
        })
    }

    /// Sends one request and waits for its response.
    async fn call(
        &self,
        request: StoreRequest,
    ) -> Result<StoreResponse, StoreError> {
        let shared = &self.inner.shared;
        let id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        shared.pending.lock().await.insert(id, reply_tx);
        // The reader flags `closed` before clearing `pending`, so an entry
        // inserted after the clear is caught here.
        if shared.closed.load(Ordering::SeqCst)
            || self
                .inner
                .outbound
                .send(Payload::Request { id, request })
                .is_err()
        {
            shared.pending.lock().await.remove(&id);
            return Err(disconnected());
        }

        match reply_rx.await.map_err(|_| disconnected())? {
            StoreResponse::Failed { kind, message } => {
                Err(StoreError::from_failure(kind, message))
            }
            response => Ok(response),
        }
    }
}

impl SessionStore for RemoteStore {
    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        match self.call(StoreRequest::CreateRoom { room }).await? {
            StoreResponse::Room { room } => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    async fn get_room(&self, id: RoomId) -> Result<Room, StoreError> {
        match self.call(StoreRequest::GetRoom { id }).await? {
            StoreResponse::Room { room } => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    async fn find_room_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Room>, StoreError> {
        let request = StoreRequest::FindRoomByCode {
            code: code.to_string(),
        };
        match self.call(request).await? {
            StoreResponse::MaybeRoom { room } => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    async fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
    ) -> Result<Room, StoreError> {
        let request = StoreRequest::UpdateRoom {
            id,
            patch,
            conditions,
        };
        match self.call(request).await? {
            StoreResponse::Room { room } => Ok(room),
            other => Err(unexpected(other)),
        }
    }

    async fn insert_move(&self, mv: NewMove) -> Result<MoveRecord, StoreError> {
        match self.call(StoreRequest::InsertMove { mv }).await? {
            StoreResponse::Move { mv } => Ok(mv),
            other => Err(unexpected(other)),
        }
    }

    async fn list_moves(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<MoveRecord>, StoreError> {
        match self.call(StoreRequest::ListMoves { room_id }).await? {
            StoreResponse::Moves { moves } => Ok(moves),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, feed: Feed) -> Result<Subscription, StoreError> {
        let subscription = SubscriptionId(
            self.inner.next_subscription.fetch_add(1, Ordering::Relaxed),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Route first: the host may push a change before its response.
        let routes = &self.inner.shared.routes;
        routes.lock().await.insert(subscription, events_tx);

        let result = self
            .call(StoreRequest::Subscribe { subscription, feed })
            .await;
        match result {
            Ok(StoreResponse::Subscribed { .. }) => {}
            other => {
                routes.lock().await.remove(&subscription);
                return Err(match other {
                    Ok(response) => unexpected(response),
                    Err(e) => e,
                });
            }
        }

        let outbound = self.inner.outbound.clone();
        Ok(Subscription::new(subscription, feed, events_rx, move |id| {
            let _ = outbound.send(Payload::Request {
                id: UNTRACKED_REQUEST,
                request: StoreRequest::Unsubscribe { subscription: id },
            });
        }))
    }
}

async fn handshake(
    conn: &ClientConnection,
    timeout: Duration,
) -> Result<(), StoreError> {
    let codec = JsonCodec;
    let hello = Envelope::new(
        0,
        unix_millis(),
        Payload::Handshake {
            version: PROTOCOL_VERSION,
        },
    );
    conn.send(&codec.encode(&hello)?)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    let data = tokio::time::timeout(timeout, conn.recv())
        .await
        .map_err(|_| StoreError::Unavailable("handshake timed out".into()))?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .ok_or_else(|| {
            StoreError::Unavailable("connection closed during handshake".into())
        })?;

    let envelope: Envelope = codec.decode(&data)?;
    match envelope.payload {
        Payload::HandshakeAck { .. } => Ok(()),
        Payload::Error { code, message } => {
            Err(StoreError::Protocol(ProtocolError::InvalidMessage(format!(
                "handshake refused ({code}): {message}"
            ))))
        }
        other => Err(StoreError::Protocol(ProtocolError::InvalidMessage(
            format!("expected HandshakeAck, got {other:?}"),
        ))),
    }
}

/// Sends queued payloads and periodic heartbeats until every sender is
/// gone or the connection fails, then closes the connection.
async fn write_loop(
    conn: Arc<ClientConnection>,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
    heartbeat_interval: Duration,
) {
    let codec = JsonCodec;
    let mut seq: u64 = 1;
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    loop {
        let payload = tokio::select! {
            next = outbound.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
            _ = heartbeat.tick() => Payload::Heartbeat {
                client_time: unix_millis(),
            },
        };

        let envelope = Envelope::new(seq, unix_millis(), payload);
        seq += 1;
        let bytes = match codec.encode(&envelope) {
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
    tracing::debug!(conn_id = %conn.id(), "store client writer stopped");
}

/// Routes incoming envelopes until the connection ends.
async fn read_loop(conn: Arc<ClientConnection>, shared: Arc<Shared>) {
    let codec = JsonCodec;

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(conn_id = %conn.id(), error = %e, "recv failed");
                break;
            }
        };
        let envelope: Envelope = match codec.decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "failed to decode envelope");
                continue;
            }
        };

        match envelope.payload {
            Payload::Response { id, response } => {
                match shared.pending.lock().await.remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(response);
                    }
                    None if id == UNTRACKED_REQUEST => {}
                    None => tracing::debug!(id, "response to unknown request"),
                }
            }
            Payload::Change {
                subscription,
                event,
            } => {
                let mut routes = shared.routes.lock().await;
                if let Some(route) = routes.get(&subscription) {
                    if route.send(event).is_err() {
                        routes.remove(&subscription);
                    }
                }
            }
            Payload::HeartbeatAck { .. } => {}
            Payload::Disconnect { reason } => {
                tracing::info!(%reason, "store host disconnected");
                break;
            }
            Payload::Error { code, message } => {
                tracing::warn!(code, %message, "store host reported an error");
            }
            other => {
                tracing::debug!(payload = ?other, "unexpected payload from host");
            }
        }
    }

    shared.close().await;
    tracing::debug!(conn_id = %conn.id(), "store client reader stopped");
}

fn disconnected() -> StoreError {
    StoreError::Unavailable("connection to store host closed".into())
}

fn unexpected(response: StoreResponse) -> StoreError {
    StoreError::Protocol(ProtocolError::InvalidMessage(format!(
        "unexpected response: {response:?}"
    )))
}
