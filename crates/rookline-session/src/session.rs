//! Session types: phases, configuration, and what a display sees.

use std::fmt;
use std::time::Duration;

use rookline_protocol::{Color, MoveRecord, Room, RoomStatus};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`SessionSync`](crate::SessionSync).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on every store call the synchronizer makes.
    pub store_timeout: Duration,

    /// How many times to retry a seat claim that lost a race.
    pub join_attempts: u32,

    /// How many times to try appending the move row once the room update
    /// has committed.
    pub log_append_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(10),
            join_attempts: 3,
            log_append_attempts: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
///
/// ```text
/// Loading ──(open)──→ Joined ──→ WaitingForOpponent ⇄ Active ──→ Terminal
/// ```
///
/// `Joined` is transient: as soon as the seat and position are known the
/// phase is re-evaluated from the room row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Joined,
    /// A seat is still empty.
    WaitingForOpponent,
    /// Both seats are filled and the game is running.
    Active,
    /// The game is over. Nothing more is written.
    Terminal,
}

impl SessionPhase {
    /// The steady-state phase a room row implies.
    pub fn of(room: &Room) -> Self {
        if room.status.is_terminal() {
            Self::Terminal
        } else if room.status == RoomStatus::InProgress && room.seats_filled() {
            Self::Active
        } else {
            Self::WaitingForOpponent
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading"),
            Self::Joined => write!(f, "Joined"),
            Self::WaitingForOpponent => write!(f, "WaitingForOpponent"),
            Self::Active => write!(f, "Active"),
            Self::Terminal => write!(f, "Terminal"),
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// What a board renderer needs to draw the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardView {
    /// Serialized position to draw.
    pub position: String,
    /// Whether the renderer should accept a move from the user.
    pub input_enabled: bool,
    /// Which side is drawn at the bottom.
    pub orientation: Color,
}

/// Everything a display shows, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub color: Option<Color>,
    /// The room as currently shown: the speculative copy while a move is
    /// in flight, the authoritative row otherwise.
    pub room: Option<Room>,
    /// Move log ordered by move number.
    pub moves: Vec<MoveRecord>,
    pub input_enabled: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Loading,
            color: None,
            room: None,
            moves: Vec::new(),
            input_enabled: false,
        }
    }
}

/// What a change notification did to the local view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A newer room row replaced the authoritative copy.
    RoomChanged(Room),
    /// A move row was added to the local log.
    MoveAdded(MoveRecord),
    /// The notification was stale, a duplicate, or for another room.
    Ignored,
}
