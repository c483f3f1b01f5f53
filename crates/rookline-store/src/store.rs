//! The `SessionStore` trait and change-feed subscriptions.

use std::future::Future;

use rookline_protocol::{
    ChangeEvent, Condition, Feed, MoveRecord, NewMove, NewRoom, Room, RoomId,
    RoomPatch, SubscriptionId,
};
use tokio::sync::mpsc;

use crate::StoreError;

/// Persistence and change notification for rooms and moves.
///
/// Implementations must apply each room update atomically against its
/// conditions, refuse any write to a room in a terminal status, keep move
/// numbers per room unique and gap-free, and deliver change events to
/// subscribers in commit order.
pub trait SessionStore: Send + Sync + 'static {
    /// Inserts a new `waiting` room with both seats empty.
    ///
    /// Fails with [`StoreError::Conflict`] if the code is taken.
    fn create_room(
        &self,
        room: NewRoom,
    ) -> impl Future<Output = Result<Room, StoreError>> + Send;

    fn get_room(
        &self,
        id: RoomId,
    ) -> impl Future<Output = Result<Room, StoreError>> + Send;

    /// Looks a room up by its join code. A missing room is `Ok(None)`.
    fn find_room_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<Room>, StoreError>> + Send;

    /// Applies `patch` if every condition holds against the stored row,
    /// bumping its version. Returns the updated row.
    fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
    ) -> impl Future<Output = Result<Room, StoreError>> + Send;

    /// Appends a move row.
    ///
    /// A number already taken is a [`StoreError::Conflict`]; one that
    /// skips ahead is a [`StoreError::ConditionFailed`].
    fn insert_move(
        &self,
        mv: NewMove,
    ) -> impl Future<Output = Result<MoveRecord, StoreError>> + Send;

    /// All moves of a room ordered by move number.
    fn list_moves(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Vec<MoveRecord>, StoreError>> + Send;

    /// Opens a change feed. Events committed after this returns are
    /// delivered; earlier ones are not.
    fn subscribe(
        &self,
        feed: Feed,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;
}

type Release = Box<dyn FnOnce(SubscriptionId) + Send + Sync>;

/// A live change feed.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// releases it on the store.
pub struct Subscription {
    id: SubscriptionId,
    feed: Feed,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    release: Option<Release>,
}

impl Subscription {
    /// Wraps a receiver of change events. `release` runs once, when the
    /// subscription is dropped.
    pub fn new(
        id: SubscriptionId,
        feed: Feed,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        release: impl FnOnce(SubscriptionId) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            feed,
            events,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    /// Waits for the next event. Returns `None` once the store side of the
    /// feed is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }

    /// Releases the feed.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("feed", &self.feed)
            .finish_non_exhaustive()
    }
}
