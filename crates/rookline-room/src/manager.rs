//! Room manager: creates rooms and hands out seats.

use rookline_protocol::{
    Color, Condition, NewRoom, ParticipantToken, Room, RoomId, RoomPatch,
    RoomStatus,
};
use rookline_store::{SessionStore, StoreError};

use crate::{RoomConfig, RoomError, generate_code};

/// The seat a participant holds after [`RoomManager::join_room`], with
/// the room row as of the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatClaim {
    pub color: Color,
    pub room: Room,
}

/// Creates rooms and assigns seats.
///
/// Holds no state of its own beyond configuration: every decision is
/// made against the store, and every seat write is conditional on the
/// seat still being empty.
#[derive(Debug, Clone)]
pub struct RoomManager<S> {
    store: S,
    config: RoomConfig,
}

impl<S: SessionStore> RoomManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, RoomConfig::default())
    }

    pub fn with_config(store: S, config: RoomConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// The store rooms are kept in.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a `waiting` room with both seats empty under a fresh join
    /// code.
    ///
    /// # Errors
    /// Returns [`RoomError::Persistence`] if the store is unreachable or
    /// every attempted code was already taken.
    pub async fn create_room(&self) -> Result<Room, RoomError> {
        for attempt in 1..=self.config.max_create_attempts {
            let code =
                generate_code(self.config.code_length, &self.config.code_alphabet);
            let new_room = NewRoom {
                code: code.clone(),
                position: self.config.initial_position.clone(),
                current_turn: self.config.first_to_move,
            };

            match self.store.create_room(new_room).await {
                Ok(room) => {
                    tracing::info!(room_id = %room.id, code = %room.code, "room created");
                    return Ok(room);
                }
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(%code, attempt, "room code taken, retrying");
                }
                Err(e) => return Err(RoomError::Persistence(e)),
            }
        }

        Err(RoomError::Persistence(StoreError::Conflict(format!(
            "no free room code after {} attempts",
            self.config.max_create_attempts
        ))))
    }

    /// Looks a room up by join code. Surrounding whitespace and letter
    /// case are ignored; an unknown code is `Ok(None)`.
    pub async fn get_room_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Room>, RoomError> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Ok(None);
        }
        self.store
            .find_room_by_code(&code)
            .await
            .map_err(RoomError::Persistence)
    }

    pub async fn get_room(&self, id: RoomId) -> Result<Room, RoomError> {
        self.store.get_room(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => RoomError::NotFound(id),
            e => RoomError::Persistence(e),
        })
    }

    /// Claims a seat for `token`, or returns the one it already holds.
    ///
    /// White is assigned first and the room keeps waiting; the black seat
    /// starts the game. Calling again with the same token after a
    /// reconnect returns the same seat without writing.
    ///
    /// # Errors
    /// - [`RoomError::NotFound`]: no such room
    /// - [`RoomError::RoomUnavailable`]: the game is over
    /// - [`RoomError::RoomFull`]: both seats belong to others
    /// - [`RoomError::ConditionFailed`]: another participant took the seat
    ///   between our read and our write
    pub async fn join_room(
        &self,
        room_id: RoomId,
        token: &ParticipantToken,
    ) -> Result<SeatClaim, RoomError> {
        let room = self.get_room(room_id).await?;

        if room.status.is_terminal() {
            return Err(RoomError::RoomUnavailable(room_id, room.status));
        }

        if let Some(color) = room.seat_of(token) {
            tracing::info!(%room_id, %color, participant = %token, "participant rejoined");
            return Ok(SeatClaim { color, room });
        }

        let (color, patch) = if room.white_seat.is_none() {
            (
                Color::White,
                RoomPatch::claim_seat(Color::White, token.clone()),
            )
        } else if room.black_seat.is_none() {
            (
                Color::Black,
                RoomPatch {
                    status: Some(RoomStatus::InProgress),
                    ..RoomPatch::claim_seat(Color::Black, token.clone())
                },
            )
        } else {
            return Err(RoomError::RoomFull(room_id));
        };

        let conditions = vec![
            Condition::SeatEmpty(color),
            Condition::StatusIs(RoomStatus::Waiting),
        ];
        let room = self
            .store
            .update_room(room_id, patch, conditions)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => RoomError::NotFound(room_id),
                StoreError::ConditionFailed(reason) => {
                    tracing::debug!(%room_id, %color, %reason, "seat claim lost");
                    RoomError::ConditionFailed(room_id, reason)
                }
                e => RoomError::Persistence(e),
            })?;

        tracing::info!(
            %room_id,
            %color,
            participant = %token,
            status = %room.status,
            version = room.version,
            "seat claimed"
        );
        Ok(SeatClaim { color, room })
    }
}
