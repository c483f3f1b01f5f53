//! Two participants playing through one in-process store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rookline_protocol::{
    ChangeEvent, Color, Condition, Feed, MoveRecord, NewMove, NewRoom,
    ParticipantToken, Room, RoomId, RoomPatch, RoomStatus,
};
use rookline_room::RoomManager;
use rookline_rules::{ChessRules, STANDARD_START, replay};
use rookline_session::{SessionConfig, SessionPhase, SessionSync, SyncError, SyncEvent};
use rookline_store::{MemoryStore, SessionStore, StoreError, Subscription};

type Session<S> = SessionSync<S, ChessRules>;

fn token(s: &str) -> ParticipantToken {
    ParticipantToken(s.to_string())
}

fn session<S: SessionStore>(store: S, name: &str) -> Session<S> {
    SessionSync::new(store, ChessRules::new(), token(name), SessionConfig::default())
}

/// Applies every notification already delivered to `sync`.
async fn settle<S: SessionStore>(sync: &mut Session<S>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), sync.next_change()).await
    {
        events.push(event.unwrap());
    }
    events
}

/// A room with alice as white and bob as black, both up to date.
async fn seated<S: SessionStore + Clone>(store: S) -> (Room, Session<S>, Session<S>) {
    let room = RoomManager::new(store.clone()).create_room().await.unwrap();

    let mut alice = session(store.clone(), "alice");
    let mut bob = session(store, "bob");
    assert_eq!(alice.open(&room.code).await.unwrap(), Color::White);
    assert_eq!(bob.open(&room.code).await.unwrap(), Color::Black);
    settle(&mut alice).await;

    (room, alice, bob)
}

/// Plays one move and lets the opponent catch up.
async fn play<S: SessionStore>(
    mover: &mut Session<S>,
    opponent: &mut Session<S>,
    from: &str,
    to: &str,
) -> MoveRecord {
    let record = mover.submit_move(from, to, None).await.unwrap();
    settle(opponent).await;
    settle(mover).await;
    record
}

// ---------------------------------------------------------------------------
// Joining
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_open_first_participant_waits_for_opponent() {
    let store = MemoryStore::spawn();
    let room = RoomManager::new(store.clone()).create_room().await.unwrap();

    let mut alice = session(store, "alice");
    let color = alice.open(&room.code.to_lowercase()).await.unwrap();

    assert_eq!(color, Color::White);
    assert_eq!(alice.phase(), SessionPhase::WaitingForOpponent);
    assert!(!alice.input_enabled());
    assert_eq!(alice.board_view().orientation, Color::White);
}

#[tokio::test]
async fn test_open_second_participant_activates_both() {
    let (_, alice, bob) = seated(MemoryStore::spawn()).await;

    assert_eq!(alice.phase(), SessionPhase::Active);
    assert_eq!(bob.phase(), SessionPhase::Active);
    assert!(alice.input_enabled());
    assert!(!bob.input_enabled());
    assert_eq!(bob.board_view().orientation, Color::Black);
    assert_eq!(alice.room().unwrap().version, 3);
}

#[tokio::test]
async fn test_open_unknown_code_returns_not_found() {
    let mut alice = session(MemoryStore::spawn(), "alice");

    let result = alice.open("ZZZZZZ").await;

    assert_eq!(result, Err(SyncError::NotFound));
    assert_eq!(alice.phase(), SessionPhase::Loading);
}

#[tokio::test]
async fn test_open_third_participant_returns_room_full() {
    let store = MemoryStore::spawn();
    let (room, _alice, _bob) = seated(store.clone()).await;

    let mut carol = session(store, "carol");

    assert_eq!(carol.open(&room.code).await, Err(SyncError::RoomFull));
    assert!(carol.color().is_none());
}

#[tokio::test]
async fn test_open_same_token_again_keeps_seat_without_writing() {
    let store = MemoryStore::spawn();
    let (room, _alice, _bob) = seated(store.clone()).await;

    let mut again = session(store.clone(), "alice");

    assert_eq!(again.open(&room.code).await.unwrap(), Color::White);
    assert_eq!(store.get_room(room.id).await.unwrap().version, 3);
    assert_eq!(again.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn test_board_view_before_open_shows_start_position() {
    let alice = session(MemoryStore::spawn(), "alice");

    let view = alice.board_view();

    assert_eq!(view.position, STANDARD_START);
    assert_eq!(view.orientation, Color::White);
    assert!(!view.input_enabled);
}

#[tokio::test]
async fn test_submit_move_before_open_returns_not_joined() {
    let mut alice = session(MemoryStore::spawn(), "alice");

    let result = alice.submit_move("e2", "e4", None).await;

    assert_eq!(result, Err(SyncError::NotJoined));
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_move_commits_room_and_log() {
    let store = MemoryStore::spawn();
    let (room, mut alice, mut bob) = seated(store.clone()).await;

    let record = alice.submit_move("e2", "e4", None).await.unwrap();

    assert_eq!(record.move_number, 1);
    assert_eq!(record.color, Color::White);
    assert_eq!(record.notation, "e4");
    assert_eq!(record.piece, "p");

    let stored = store.get_room(room.id).await.unwrap();
    assert_eq!(stored.current_turn, Color::Black);
    assert_eq!(stored.move_log, "1. e4");
    assert_eq!(stored.version, 4);
    assert_eq!(store.list_moves(room.id).await.unwrap(), vec![record.clone()]);

    assert_eq!(alice.moves(), vec![record.clone()]);
    assert!(!alice.input_enabled());

    let events = settle(&mut bob).await;
    assert!(events.contains(&SyncEvent::MoveAdded(record.clone())));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::RoomChanged(r) if r.version == 4)));
    assert_eq!(bob.moves(), vec![record]);
    assert!(bob.input_enabled());
    assert_eq!(bob.board_view().position, stored.position);
}

#[tokio::test]
async fn test_submit_move_out_of_turn_returns_not_your_turn() {
    let store = MemoryStore::spawn();
    let (room, _alice, mut bob) = seated(store.clone()).await;

    let result = bob.submit_move("e7", "e5", None).await;

    assert_eq!(result, Err(SyncError::NotYourTurn));
    assert_eq!(store.get_room(room.id).await.unwrap().version, 3);
}

#[tokio::test]
async fn test_submit_move_opponent_piece_returns_illegal_move() {
    let store = MemoryStore::spawn();
    let (room, mut alice, _bob) = seated(store.clone()).await;

    let result = alice.submit_move("e7", "e5", None).await;

    assert!(matches!(result, Err(SyncError::IllegalMove(_))));
    assert_eq!(store.get_room(room.id).await.unwrap().version, 3);
}

#[tokio::test]
async fn test_submit_move_illegal_destination_returns_illegal_move() {
    let store = MemoryStore::spawn();
    let (room, mut alice, _bob) = seated(store.clone()).await;

    let result = alice.submit_move("e2", "e5", None).await;

    assert!(matches!(result, Err(SyncError::IllegalMove(_))));
    assert!(alice.input_enabled());
    assert_eq!(store.get_room(room.id).await.unwrap().version, 3);
}

#[tokio::test]
async fn test_submit_move_while_waiting_returns_not_your_turn() {
    let store = MemoryStore::spawn();
    let room = RoomManager::new(store.clone()).create_room().await.unwrap();
    let mut alice = session(store, "alice");
    alice.open(&room.code).await.unwrap();

    let result = alice.submit_move("e2", "e4", None).await;

    assert_eq!(result, Err(SyncError::NotYourTurn));
}

#[tokio::test]
async fn test_fools_mate_ends_game_for_both() {
    let store = MemoryStore::spawn();
    let (room, mut alice, mut bob) = seated(store.clone()).await;

    play(&mut alice, &mut bob, "f2", "f3").await;
    play(&mut bob, &mut alice, "e7", "e5").await;
    play(&mut alice, &mut bob, "g2", "g4").await;
    let mate = play(&mut bob, &mut alice, "d8", "h4").await;

    assert_eq!(mate.notation, "Qh4#");
    assert_eq!(mate.move_number, 4);

    let stored = store.get_room(room.id).await.unwrap();
    assert_eq!(stored.status, RoomStatus::Checkmate);
    assert_eq!(stored.winner, Some(Color::Black));
    assert_eq!(stored.move_log, "1. f3 e5 2. g4 Qh4#");

    assert_eq!(alice.phase(), SessionPhase::Terminal);
    assert_eq!(bob.phase(), SessionPhase::Terminal);
    assert!(!alice.input_enabled());
    assert_eq!(alice.moves().len(), 4);

    let moves = store.list_moves(room.id).await.unwrap();
    let replayed = replay(&ChessRules::new(), &moves).unwrap();
    assert_eq!(replayed.move_log, stored.move_log);

    let result = alice.submit_move("e2", "e4", None).await;
    assert_eq!(result, Err(SyncError::RoomUnavailable(RoomStatus::Checkmate)));
}

#[tokio::test]
async fn test_fools_mate_store_refuses_rows_past_the_mate() {
    let store = MemoryStore::spawn();
    let (room, mut alice, mut bob) = seated(store.clone()).await;
    for (ply, (from, to)) in [("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")]
        .into_iter()
        .enumerate()
    {
        if ply % 2 == 0 {
            play(&mut alice, &mut bob, from, to).await;
        } else {
            play(&mut bob, &mut alice, from, to).await;
        }
    }

    let extra = store
        .insert_move(NewMove {
            room_id: room.id,
            move_number: 5,
            from_square: "a2".into(),
            to_square: "a3".into(),
            piece: "p".into(),
            notation: "a3".into(),
            color: Color::White,
        })
        .await;

    assert!(matches!(extra, Err(StoreError::ConditionFailed(_))));
    assert_eq!(store.get_room(room.id).await.unwrap().move_count, 4);
    assert_eq!(store.list_moves(room.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_attempt_move_reports_commit() {
    let (_, mut alice, mut bob) = seated(MemoryStore::spawn()).await;

    assert!(!bob.attempt_move("e7", "e5").await);
    assert!(alice.attempt_move("e2", "e4").await);
    assert!(!alice.attempt_move("d2", "d4").await);
}

#[tokio::test]
async fn test_watch_sees_committed_move() {
    let (_, mut alice, _bob) = seated(MemoryStore::spawn()).await;
    let rx = alice.watch();

    alice.submit_move("g1", "f3", None).await.unwrap();

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.color, Some(Color::White));
    assert_eq!(snapshot.moves.len(), 1);
    assert_eq!(snapshot.moves[0].notation, "Nf3");
    assert_eq!(snapshot.room.unwrap().current_turn, Color::Black);
    assert!(!snapshot.input_enabled);
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_apply_change_duplicate_move_is_ignored() {
    let (_, mut alice, mut bob) = seated(MemoryStore::spawn()).await;
    let record = play(&mut alice, &mut bob, "e2", "e4").await;

    let event = bob.apply_change(ChangeEvent::MoveInserted(record)).unwrap();

    assert_eq!(event, SyncEvent::Ignored);
    assert_eq!(bob.moves().len(), 1);
}

#[tokio::test]
async fn test_apply_change_stale_room_is_ignored() {
    let (_, mut alice, mut bob) = seated(MemoryStore::spawn()).await;
    let before = bob.room().unwrap().clone();
    play(&mut alice, &mut bob, "e2", "e4").await;

    let event = bob.apply_change(ChangeEvent::RoomUpdated(before)).unwrap();

    assert_eq!(event, SyncEvent::Ignored);
    assert_eq!(bob.room().unwrap().version, 4);
    assert_eq!(bob.room().unwrap().current_turn, Color::Black);
}

#[tokio::test]
async fn test_apply_change_other_room_is_ignored() {
    let (_, _alice, mut bob) = seated(MemoryStore::spawn()).await;
    let mut other = bob.room().unwrap().clone();
    other.id = RoomId(999);
    other.version = 100;

    let event = bob.apply_change(ChangeEvent::RoomUpdated(other)).unwrap();

    assert_eq!(event, SyncEvent::Ignored);
}

#[tokio::test]
async fn test_submit_move_on_stale_version_fails_then_recovers() {
    let store = MemoryStore::spawn();
    let (room, mut alice, _bob) = seated(store.clone()).await;

    // Some other writer touches the row; alice has not seen it yet.
    store
        .update_room(room.id, RoomPatch::default(), Vec::new())
        .await
        .unwrap();

    let result = alice.submit_move("e2", "e4", None).await;
    assert!(matches!(result, Err(SyncError::SubmissionFailed(_))));
    assert_eq!(alice.room().unwrap().current_turn, Color::White);

    settle(&mut alice).await;
    assert_eq!(alice.room().unwrap().version, 4);

    let record = alice.submit_move("e2", "e4", None).await.unwrap();
    assert_eq!(record.move_number, 1);
}

#[tokio::test]
async fn test_close_releases_feeds() {
    let (_, mut alice, _bob) = seated(MemoryStore::spawn()).await;

    alice.close();

    assert_eq!(alice.phase(), SessionPhase::Loading);
    assert!(alice.room().is_none());
    assert!(alice.next_change().await.is_none());
}

// ---------------------------------------------------------------------------
// Store failures
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`] with switchable faults on writes.
#[derive(Clone)]
struct FlakyStore {
    inner: MemoryStore,
    fail_updates: Arc<AtomicBool>,
    stall_updates: Arc<AtomicBool>,
    fail_inserts: Arc<AtomicBool>,
    /// Commits the next insert but reports it as failed.
    lose_insert_reply: Arc<AtomicBool>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::spawn(),
            fail_updates: Arc::default(),
            stall_updates: Arc::default(),
            fail_inserts: Arc::default(),
            lose_insert_reply: Arc::default(),
        }
    }
}

impl SessionStore for FlakyStore {
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
        if self.stall_updates.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected".into()));
        }
        self.inner.update_room(id, patch, conditions).await
    }

    async fn insert_move(&self, mv: NewMove) -> Result<MoveRecord, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected".into()));
        }
        let record = self.inner.insert_move(mv).await?;
        if self.lose_insert_reply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reply lost".into()));
        }
        Ok(record)
    }

    async fn list_moves(&self, room_id: RoomId) -> Result<Vec<MoveRecord>, StoreError> {
        self.inner.list_moves(room_id).await
    }

    async fn subscribe(&self, feed: Feed) -> Result<Subscription, StoreError> {
        self.inner.subscribe(feed).await
    }
}

#[tokio::test]
async fn test_submit_move_rejected_write_rolls_back() {
    let store = FlakyStore::new();
    let (room, mut alice, _bob) = seated(store.clone()).await;
    let rx = alice.watch();

    store.fail_updates.store(true, Ordering::SeqCst);
    let result = alice.submit_move("e2", "e4", None).await;

    assert!(matches!(result, Err(SyncError::SubmissionFailed(_))));
    assert_eq!(alice.room(), alice.authoritative_room());
    assert_eq!(alice.room().unwrap().position, STANDARD_START);
    assert!(alice.input_enabled());
    assert!(alice.moves().is_empty());
    assert_eq!(rx.borrow().room.as_ref().unwrap().current_turn, Color::White);
    assert_eq!(store.get_room(room.id).await.unwrap().version, 3);
}

#[tokio::test]
async fn test_submit_move_stalled_write_times_out() {
    let store = FlakyStore::new();
    let room = RoomManager::new(store.clone()).create_room().await.unwrap();
    let config = SessionConfig {
        store_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    };
    let mut alice =
        SessionSync::new(store.clone(), ChessRules::new(), token("alice"), config);
    let mut bob = session(store.clone(), "bob");
    alice.open(&room.code).await.unwrap();
    bob.open(&room.code).await.unwrap();
    settle(&mut alice).await;

    store.stall_updates.store(true, Ordering::SeqCst);
    let result = alice.submit_move("e2", "e4", None).await;

    assert!(matches!(result, Err(SyncError::SubmissionFailed(_))));
    assert!(alice.input_enabled());
}

#[tokio::test]
async fn test_submit_move_dropped_future_releases_input() {
    let store = FlakyStore::new();
    let (room, mut alice, mut bob) = seated(store.clone()).await;

    store.stall_updates.store(true, Ordering::SeqCst);
    let dropped = tokio::time::timeout(
        Duration::from_millis(20),
        alice.submit_move("e2", "e4", None),
    )
    .await;
    assert!(dropped.is_err(), "stalled submission should still be pending");
    store.stall_updates.store(false, Ordering::SeqCst);

    assert!(alice.input_enabled());
    assert_eq!(alice.room(), alice.authoritative_room());
    assert_eq!(alice.board_view().position, STANDARD_START);

    let record = alice.submit_move("e2", "e4", None).await.unwrap();
    assert_eq!(record.move_number, 1);
    settle(&mut bob).await;
    assert!(bob.input_enabled());
    assert_eq!(store.list_moves(room.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_move_unlogged_returns_log_append_failed() {
    let store = FlakyStore::new();
    let (room, mut alice, _bob) = seated(store.clone()).await;

    store.fail_inserts.store(true, Ordering::SeqCst);
    let result = alice.submit_move("e2", "e4", None).await;

    assert!(matches!(
        result,
        Err(SyncError::LogAppendFailed { move_number: 1, .. })
    ));
    // The room update stands.
    let stored = store.get_room(room.id).await.unwrap();
    assert_eq!(stored.current_turn, Color::Black);
    assert_eq!(alice.room().unwrap().version, stored.version);
    assert!(store.list_moves(room.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_move_lost_insert_reply_is_not_duplicated() {
    let store = FlakyStore::new();
    let (room, mut alice, _bob) = seated(store.clone()).await;

    store.lose_insert_reply.store(true, Ordering::SeqCst);
    let record = alice.submit_move("e2", "e4", None).await.unwrap();

    assert_eq!(record.move_number, 1);
    assert_eq!(store.list_moves(room.id).await.unwrap().len(), 1);
    assert_eq!(alice.moves().len(), 1);
}

#[tokio::test]
async fn test_attempt_move_unlogged_still_counts_as_committed() {
    let store = FlakyStore::new();
    let (_, mut alice, _bob) = seated(store.clone()).await;

    store.fail_inserts.store(true, Ordering::SeqCst);

    assert!(alice.attempt_move("e2", "e4").await);
}
