//! Error types for the session layer.

use rookline_protocol::RoomStatus;
use rookline_room::RoomError;
use rookline_rules::RulesError;
use rookline_store::StoreError;

/// Errors surfaced to the participant by a [`SessionSync`](crate::SessionSync).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// No room has that code.
    #[error("room not found")]
    NotFound,

    /// The game is over; nothing more can be written.
    #[error("room is {0}")]
    RoomUnavailable(RoomStatus),

    #[error("room is full")]
    RoomFull,

    /// Another participant changed the room first.
    #[error("room changed concurrently: {0}")]
    ConditionFailed(String),

    /// The store could not be reached or did not answer in time.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Rejected locally by the rules engine; nothing was sent.
    #[error("illegal move: {0}")]
    IllegalMove(String),

    #[error("not your turn")]
    NotYourTurn,

    /// The store did not commit the move. The local view was rolled back
    /// to the last authoritative room.
    #[error("move submission failed: {0}")]
    SubmissionFailed(String),

    /// The room update committed but its move row could not be appended.
    #[error("move {move_number} committed but not logged: {reason}")]
    LogAppendFailed { move_number: u32, reason: String },

    /// No room has been opened yet.
    #[error("no room joined")]
    NotJoined,

    /// A stored position could not be parsed.
    #[error("stored position is corrupt: {0}")]
    InvalidRecord(#[source] RulesError),
}

impl From<RoomError> for SyncError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::NotFound(_) => Self::NotFound,
            RoomError::RoomUnavailable(_, status) => Self::RoomUnavailable(status),
            RoomError::RoomFull(_) => Self::RoomFull,
            RoomError::ConditionFailed(_, reason) => Self::ConditionFailed(reason),
            RoomError::Persistence(e) => Self::Persistence(e.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::ConditionFailed(reason) => Self::ConditionFailed(reason),
            e => Self::Persistence(e.to_string()),
        }
    }
}
