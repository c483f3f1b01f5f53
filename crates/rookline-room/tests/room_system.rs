//! Room lifecycle against a live in-process store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rookline_protocol::{
    Color, Condition, Feed, MoveRecord, NewMove, NewRoom, ParticipantToken,
    Room, RoomId, RoomPatch, RoomStatus,
};
use rookline_room::{RoomError, RoomManager};
use rookline_store::{MemoryStore, SessionStore, StoreError, Subscription};

fn token(s: &str) -> ParticipantToken {
    ParticipantToken(s.to_string())
}

#[tokio::test]
async fn test_create_then_two_joins_reaches_in_progress() {
    let store = MemoryStore::spawn();
    let manager = RoomManager::new(store.clone());

    let room = manager.create_room().await.unwrap();
    assert_eq!(room.status, RoomStatus::Waiting);

    let a = manager.join_room(room.id, &token("alice")).await.unwrap();
    assert_eq!(a.color, Color::White);
    assert_eq!(a.room.status, RoomStatus::Waiting);

    let b = manager.join_room(room.id, &token("bob")).await.unwrap();
    assert_eq!(b.color, Color::Black);
    assert_eq!(b.room.status, RoomStatus::InProgress);

    let stored = store.get_room(room.id).await.unwrap();
    assert_eq!(stored.white_seat, Some(token("alice")));
    assert_eq!(stored.black_seat, Some(token("bob")));
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn test_concurrent_joins_never_share_a_seat() {
    let store = MemoryStore::spawn();
    let manager = RoomManager::new(store.clone());
    let room = manager.create_room().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .join_room(room.id, &token(&format!("p{i}")))
                    .await
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(claim) => claimed.push(claim.color),
            Err(RoomError::ConditionFailed(..) | RoomError::RoomFull(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // Each color is handed out at most once.
    assert!(claimed.iter().filter(|c| **c == Color::White).count() <= 1);
    assert!(claimed.iter().filter(|c| **c == Color::Black).count() <= 1);

    let stored = store.get_room(room.id).await.unwrap();
    match stored.status {
        RoomStatus::InProgress => assert!(stored.seats_filled()),
        RoomStatus::Waiting => assert!(!stored.seats_filled()),
        other => panic!("unexpected status {other}"),
    }
}

/// Delegates to a [`MemoryStore`] but lets a competitor claim the white
/// seat right before the first seat write goes through.
#[derive(Clone)]
struct RacingStore {
    inner: MemoryStore,
    raced: Arc<AtomicBool>,
}

impl SessionStore for RacingStore {
    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        self.inner.create_room(room).await
    }

    async fn get_room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.inner.get_room(id).await
    }

    async fn find_room_by_code(&self, code: &str) -> Result<Option<Room>, StoreError> {
        self.inner.find_room_by_code(code).await
    }

    async fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
    ) -> Result<Room, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner
                .update_room(
                    id,
                    RoomPatch::claim_seat(Color::White, token("competitor")),
                    vec![Condition::SeatEmpty(Color::White)],
                )
                .await?;
        }
        self.inner.update_room(id, patch, conditions).await
    }

    async fn insert_move(&self, mv: NewMove) -> Result<MoveRecord, StoreError> {
        self.inner.insert_move(mv).await
    }

    async fn list_moves(&self, room_id: RoomId) -> Result<Vec<MoveRecord>, StoreError> {
        self.inner.list_moves(room_id).await
    }

    async fn subscribe(&self, feed: Feed) -> Result<Subscription, StoreError> {
        self.inner.subscribe(feed).await
    }
}

#[tokio::test]
async fn test_lost_seat_race_returns_condition_failed() {
    let store = RacingStore {
        inner: MemoryStore::spawn(),
        raced: Arc::new(AtomicBool::new(false)),
    };
    let manager = RoomManager::new(store.clone());
    let room = manager.create_room().await.unwrap();

    let result = manager.join_room(room.id, &token("alice")).await;
    assert!(matches!(result, Err(RoomError::ConditionFailed(..))));

    // The competitor kept the seat; alice's retry lands on black.
    let stored = store.get_room(room.id).await.unwrap();
    assert_eq!(stored.white_seat, Some(token("competitor")));
    let retry = manager.join_room(room.id, &token("alice")).await.unwrap();
    assert_eq!(retry.color, Color::Black);
    assert_eq!(retry.room.status, RoomStatus::InProgress);
}

#[tokio::test]
async fn test_join_terminal_room_returns_unavailable() {
    let store = MemoryStore::spawn();
    let manager = RoomManager::new(store.clone());
    let room = manager.create_room().await.unwrap();
    manager.join_room(room.id, &token("alice")).await.unwrap();
    manager.join_room(room.id, &token("bob")).await.unwrap();
    store
        .update_room(
            room.id,
            RoomPatch {
                status: Some(RoomStatus::Abandoned),
                ..RoomPatch::default()
            },
            vec![],
        )
        .await
        .unwrap();

    // Even a seat holder cannot rejoin a finished game.
    let result = manager.join_room(room.id, &token("alice")).await;
    assert!(matches!(
        result,
        Err(RoomError::RoomUnavailable(_, RoomStatus::Abandoned))
    ));
}
