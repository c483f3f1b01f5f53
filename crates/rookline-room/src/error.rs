//! Error types for the room layer.

use rookline_protocol::{RoomId, RoomStatus};
use rookline_store::StoreError;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room's game is over; it accepts no joins or moves.
    #[error("room {0} is {1}")]
    RoomUnavailable(RoomId, RoomStatus),

    /// Both seats are held by other participants.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// A concurrent write changed the room first. The caller may refetch
    /// and try again.
    #[error("room {0} changed concurrently: {1}")]
    ConditionFailed(RoomId, String),

    /// The store could not complete the operation.
    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}
