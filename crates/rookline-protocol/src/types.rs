//! Wire types for talking to a remote session store.
//!
//! A client and a store host exchange [`Envelope`]s over a transport
//! connection. After the handshake, the client sends [`StoreRequest`]s
//! tagged with a request id, the host answers each with a
//! [`StoreResponse`] carrying the same id, and pushes [`ChangeEvent`]s for
//! every live subscription.
//!
//! ```text
//! client                               store host
//!   │── Handshake { version } ────────────→│
//!   │←──────────── HandshakeAck ───────────│
//!   │── Request { id: 1, Subscribe } ─────→│
//!   │←─────────── Response { id: 1 } ──────│
//!   │── Request { id: 2, UpdateRoom } ────→│
//!   │←─────────── Response { id: 2 } ──────│
//!   │←──── Change { subscription, .. } ────│  (fan-out after commit)
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    ChangeEvent, Condition, Feed, MoveRecord, NewMove, NewRoom, Room, RoomId,
    RoomPatch, SubscriptionId,
};

/// Wire protocol version. A host refuses a handshake with any other.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// An operation against the store's tables.
///
/// `#[serde(tag = "op")]` produces internally tagged JSON, e.g.
/// `{ "op": "GetRoom", "id": 3 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum StoreRequest {
    CreateRoom {
        room: NewRoom,
    },
    GetRoom {
        id: RoomId,
    },
    FindRoomByCode {
        code: String,
    },
    UpdateRoom {
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
    },
    InsertMove {
        #[serde(rename = "move")]
        mv: NewMove,
    },
    ListMoves {
        room_id: RoomId,
    },
    /// The subscription id is allocated by the client so change events
    /// can be routed before the response to this request arrives.
    Subscribe {
        subscription: SubscriptionId,
        feed: Feed,
    },
    Unsubscribe {
        subscription: SubscriptionId,
    },
}

/// Why a request failed. Mirrors the store's error taxonomy so a remote
/// client can rebuild the same error the in-process store would return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Conflict,
    ConditionFailed,
    Unavailable,
    BadRequest,
}

/// The answer to one [`StoreRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum StoreResponse {
    Room {
        room: Room,
    },
    MaybeRoom {
        room: Option<Room>,
    },
    Move {
        #[serde(rename = "move")]
        mv: MoveRecord,
    },
    Moves {
        moves: Vec<MoveRecord>,
    },
    Subscribed {
        subscription: SubscriptionId,
    },
    Unsubscribed {
        subscription: SubscriptionId,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Payload and envelope
// ---------------------------------------------------------------------------

/// Everything that can travel inside an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    /// Client → host: first message on every connection.
    Handshake { version: u32 },

    /// Host → client: handshake accepted.
    HandshakeAck { server_time: u64 },

    /// Client → host: keep-alive.
    Heartbeat { client_time: u64 },

    /// Host → client: keep-alive answer, echoing the client's clock.
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Client → host: a store operation.
    Request { id: u64, request: StoreRequest },

    /// Host → client: the outcome of the request with the same `id`.
    Response { id: u64, response: StoreResponse },

    /// Host → client: a committed change on a live subscription.
    Change {
        subscription: SubscriptionId,
        event: ChangeEvent,
    },

    /// Either direction: the sender is going away.
    Disconnect { reason: String },

    /// Host → client: a connection-level failure (bad handshake, garbage
    /// frame). `code` follows HTTP conventions.
    Error { code: u16, message: String },
}

/// The top-level wire message.
///
/// ```text
/// ┌────────────────────────────────┐
/// │ seq: 42                        │  ← per-sender counter
/// │ timestamp: 15000               │  ← sender clock, ms
/// │ ┌────────────────────────────┐ │
/// │ │ payload: Request { .. }    │ │
/// │ └────────────────────────────┘ │
/// └────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Auto-incrementing sequence number, one counter per sender.
    pub seq: u64,

    /// Milliseconds on the sender's clock.
    pub timestamp: u64,

    pub payload: Payload,
}

impl Envelope {
    /// Wraps a payload.
    pub fn new(seq: u64, timestamp: u64, payload: Payload) -> Self {
        Self {
            seq,
            timestamp,
            payload,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
