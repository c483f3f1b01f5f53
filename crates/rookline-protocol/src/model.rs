//! The shared game record: rooms, moves, and the conditions that guard
//! writes to them.
//!
//! These are the rows the session store persists and fans out to
//! subscribers. Both clients hold copies of them; the copy in the store
//! is the only authoritative one.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current time in milliseconds since the UNIX epoch, the unit of every
/// timestamp in the model and on the wire.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier of a room row.
///
/// Same newtype pattern as every other id in the workspace: it serializes
/// as a plain number but can't be confused with a move number or a
/// subscription id at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Identifier of one change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Anonymous identifier of a seat holder.
///
/// Generated once per device and persisted locally. It only answers the
/// question "is this the same seat holder as before?" across reconnects;
/// it is never a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantToken(pub String);

impl ParticipantToken {
    /// Returns the raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Only the first 8 characters are printed, which is enough to tell
/// participants apart in logs.
impl fmt::Display for ParticipantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(8).collect();
        write!(f, "{short}")
    }
}

// ---------------------------------------------------------------------------
// Color and status
// ---------------------------------------------------------------------------

/// A side of the board, and therefore a seat in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// The other side.
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// Lifecycle status of a room.
///
/// ```text
/// Waiting ──(second seat filled)──→ InProgress ──(committed move)──→ terminal
///                                                  Checkmate | Stalemate | Draw | Abandoned
/// ```
///
/// Terminal statuses are final: the store rejects any further write to a
/// room in one of them, and a room is never revived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    InProgress,
    Checkmate,
    Stalemate,
    Draw,
    Abandoned,
}

impl RoomStatus {
    /// Returns `true` once the game has ended for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Checkmate | Self::Stalemate | Self::Draw | Self::Abandoned
        )
    }

    /// Returns `true` if seats can still be claimed.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Checkmate => "checkmate",
            Self::Stalemate => "stalemate",
            Self::Draw => "draw",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// The authoritative record of one game.
///
/// `version` starts at 1 and is bumped by the store on every committed
/// update. Clients use it to tell a fresh broadcast from a stale one or
/// from the echo of their own write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Human-shareable join code, unique across rooms.
    pub code: String,
    pub white_seat: Option<ParticipantToken>,
    pub black_seat: Option<ParticipantToken>,
    pub current_turn: Color,
    /// Full serialized board state (FEN).
    pub position: String,
    /// Movetext of the whole game, kept alongside the move table.
    pub move_log: String,
    pub status: RoomStatus,
    pub winner: Option<Color>,
    /// Number of plies committed to the room. The move table may hold
    /// at most this many rows.
    #[serde(default)]
    pub move_count: u32,
    pub version: u64,
    /// Milliseconds since the UNIX epoch.
    pub created_at: u64,
    /// Milliseconds since the UNIX epoch.
    pub updated_at: u64,
}

impl Room {
    /// Returns the token holding the given seat, if any.
    pub fn seat(&self, color: Color) -> Option<&ParticipantToken> {
        match color {
            Color::White => self.white_seat.as_ref(),
            Color::Black => self.black_seat.as_ref(),
        }
    }

    /// Returns the seat held by `token`, if any.
    pub fn seat_of(&self, token: &ParticipantToken) -> Option<Color> {
        if self.white_seat.as_ref() == Some(token) {
            Some(Color::White)
        } else if self.black_seat.as_ref() == Some(token) {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// Returns `true` when both seats are taken.
    pub fn seats_filled(&self) -> bool {
        self.white_seat.is_some() && self.black_seat.is_some()
    }

    /// Applies a patch in place. Fields left as `None` are untouched.
    ///
    /// Does not bump `version` or `updated_at`; the store does that
    /// at commit time.
    pub fn apply(&mut self, patch: &RoomPatch) {
        if let Some(token) = &patch.white_seat {
            self.white_seat = Some(token.clone());
        }
        if let Some(token) = &patch.black_seat {
            self.black_seat = Some(token.clone());
        }
        if let Some(turn) = patch.current_turn {
            self.current_turn = turn;
        }
        if let Some(position) = &patch.position {
            self.position.clone_from(position);
        }
        if let Some(move_log) = &patch.move_log {
            self.move_log.clone_from(move_log);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(winner) = patch.winner {
            self.winner = Some(winner);
        }
        if let Some(move_count) = patch.move_count {
            self.move_count = move_count;
        }
    }
}

/// The fields a client supplies when creating a room. Everything else
/// (id, seats, version, timestamps) is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub code: String,
    pub position: String,
    pub current_turn: Color,
}

/// A partial update of a room row.
///
/// Seats can only be filled through a patch, never vacated, and `winner`
/// is only ever set alongside a terminal status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_seat: Option<ParticipantToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_seat: Option<ParticipantToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_turn: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_count: Option<u32>,
}

impl RoomPatch {
    /// A patch that fills one seat.
    pub fn claim_seat(color: Color, token: ParticipantToken) -> Self {
        match color {
            Color::White => Self {
                white_seat: Some(token),
                ..Self::default()
            },
            Color::Black => Self {
                black_seat: Some(token),
                ..Self::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A precondition checked against the stored row at write time.
///
/// Every mutation of a room is a compare-and-swap: the store applies the
/// patch only if all attached conditions hold, otherwise it answers
/// `ConditionFailed` and leaves the row alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// The seat must still be unassigned.
    SeatEmpty(Color),
    /// It must be this side's turn.
    TurnIs(Color),
    /// The room must be in this status.
    StatusIs(RoomStatus),
    /// The row must not have changed since the writer read it.
    VersionIs(u64),
}

impl Condition {
    /// Returns `true` if the condition holds for `room`.
    pub fn holds(&self, room: &Room) -> bool {
        match self {
            Self::SeatEmpty(color) => room.seat(*color).is_none(),
            Self::TurnIs(color) => room.current_turn == *color,
            Self::StatusIs(status) => room.status == *status,
            Self::VersionIs(version) => room.version == *version,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeatEmpty(color) => write!(f, "{color} seat empty"),
            Self::TurnIs(color) => write!(f, "turn is {color}"),
            Self::StatusIs(status) => write!(f, "status is {status}"),
            Self::VersionIs(version) => write!(f, "version is {version}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// One committed move. Created exactly once, never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub room_id: RoomId,
    /// 1-based ply index. Strictly increasing per room, no gaps.
    pub move_number: u32,
    pub from_square: String,
    pub to_square: String,
    /// Lowercase piece letter: `p n b r q k`.
    pub piece: String,
    /// Standard algebraic notation, e.g. `Nxe5+`.
    pub notation: String,
    pub color: Color,
    /// Milliseconds since the UNIX epoch.
    pub created_at: u64,
}

/// A move as submitted for insertion; the store stamps `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMove {
    pub room_id: RoomId,
    pub move_number: u32,
    pub from_square: String,
    pub to_square: String,
    pub piece: String,
    pub notation: String,
    pub color: Color,
}

impl NewMove {
    /// Turns the submission into the row the store will persist.
    pub fn into_record(self, created_at: u64) -> MoveRecord {
        MoveRecord {
            room_id: self.room_id,
            move_number: self.move_number,
            from_square: self.from_square,
            to_square: self.to_square,
            piece: self.piece,
            notation: self.notation,
            color: self.color,
            created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Change feeds
// ---------------------------------------------------------------------------

/// Which rows a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "table", content = "room_id", rename_all = "snake_case")]
pub enum Feed {
    /// Updates of one room row.
    Room(RoomId),
    /// Inserts into the move table for one room.
    Moves(RoomId),
}

impl Feed {
    /// The room the feed is filtered on.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::Room(id) | Self::Moves(id) => *id,
        }
    }

    /// Returns `true` if `event` belongs on this feed.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match (self, event) {
            (Self::Room(id), ChangeEvent::RoomUpdated(room)) => room.id == *id,
            (Self::Moves(id), ChangeEvent::MoveInserted(mv)) => {
                mv.room_id == *id
            }
            _ => false,
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "rooms:{id}"),
            Self::Moves(id) => write!(f, "moves:{id}"),
        }
    }
}

/// A notification delivered to subscribers after a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record")]
pub enum ChangeEvent {
    RoomUpdated(Room),
    MoveInserted(MoveRecord),
}
