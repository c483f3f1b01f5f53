//! The session synchronizer: one participant's live view of one room.
//!
//! The synchronizer keeps two copies of the room. The authoritative copy
//! is whatever the store last confirmed, either as the answer to our own
//! write or through the room feed. The speculative copy exists only while
//! a local move is in flight; it is shown immediately and discarded once
//! the store answers.
//!
//! ```text
//! submit_move ─→ gate ─→ apply locally ─→ publish speculative
//!                                              │
//!                        update_room [TurnIs, StatusIs, VersionIs]
//!                         │ ok                          │ err
//!              authoritative = row              restore authoritative
//!              insert_move (retried)            SubmissionFailed
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rookline_protocol::{
    ChangeEvent, Color, Condition, Feed, MoveRecord, NewMove,
    ParticipantToken, Room, RoomPatch, RoomStatus,
};
use rookline_room::RoomManager;
use rookline_rules::{Promotion, RulesEngine, movelog};
use rookline_store::{SessionStore, StoreError, Subscription};
use tokio::sync::watch;

use crate::{
    BoardView, SessionConfig, SessionPhase, SessionSnapshot, SyncError,
    SyncEvent,
};

/// State that exists once a seat is held.
struct Joined<P> {
    color: Color,
    authoritative: Room,
    /// Parsed form of `authoritative.position`.
    position: P,
    /// Only meaningful while a submission is in flight.
    speculative: Option<Room>,
    /// Local move log, keyed by move number so redelivered rows collapse.
    moves: BTreeMap<u32, MoveRecord>,
    room_feed: Subscription,
    move_feed: Subscription,
    room_feed_open: bool,
    move_feed_open: bool,
}

impl<P> Joined<P> {
    /// The room as shown: speculative while a move is in flight.
    fn shown(&self, in_flight: bool) -> &Room {
        match &self.speculative {
            Some(room) if in_flight => room,
            _ => &self.authoritative,
        }
    }
}

/// Marks a submission as in flight until dropped, including when the
/// `submit_move` future is cancelled at an await point.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn begin(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(Arc::clone(flag))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One participant's session in one room.
///
/// All methods take `&mut self`: a session is driven by a single task,
/// and only suspends while waiting on the store. Dropping the session (or
/// calling [`close`](Self::close)) releases both change feeds.
pub struct SessionSync<S, E: RulesEngine> {
    rooms: RoomManager<S>,
    rules: E,
    token: ParticipantToken,
    config: SessionConfig,
    phase: SessionPhase,
    joined: Option<Joined<E::Position>>,
    in_flight: Arc<AtomicBool>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<S: SessionStore, E: RulesEngine> SessionSync<S, E> {
    /// Creates a session in the `Loading` phase.
    pub fn new(
        store: S,
        rules: E,
        token: ParticipantToken,
        config: SessionConfig,
    ) -> Self {
        Self::with_rooms(RoomManager::new(store), rules, token, config)
    }

    /// Creates a session that joins rooms through an existing manager.
    pub fn with_rooms(
        rooms: RoomManager<S>,
        rules: E,
        token: ParticipantToken,
        config: SessionConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        Self {
            rooms,
            rules,
            token,
            config,
            phase: SessionPhase::Loading,
            joined: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            snapshots,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn token(&self) -> &ParticipantToken {
        &self.token
    }

    /// The local seat, once joined.
    pub fn color(&self) -> Option<Color> {
        self.joined.as_ref().map(|j| j.color)
    }

    /// The room as currently shown.
    pub fn room(&self) -> Option<&Room> {
        let in_flight = self.is_in_flight();
        self.joined.as_ref().map(|j| j.shown(in_flight))
    }

    /// The last room row confirmed by the store.
    pub fn authoritative_room(&self) -> Option<&Room> {
        self.joined.as_ref().map(|j| &j.authoritative)
    }

    /// The local move log ordered by move number.
    pub fn moves(&self) -> Vec<MoveRecord> {
        self.joined
            .as_ref()
            .map(|j| j.moves.values().cloned().collect())
            .unwrap_or_default()
    }

    /// A receiver that sees a fresh [`SessionSnapshot`] on every change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Whether a local move would currently pass the turn gate.
    pub fn input_enabled(&self) -> bool {
        let Some(joined) = &self.joined else {
            return false;
        };
        self.phase == SessionPhase::Active
            && !self.is_in_flight()
            && joined.authoritative.status == RoomStatus::InProgress
            && joined.authoritative.current_turn == joined.color
    }

    pub fn board_view(&self) -> BoardView {
        match &self.joined {
            Some(joined) => BoardView {
                position: joined.shown(self.is_in_flight()).position.clone(),
                input_enabled: self.input_enabled(),
                orientation: joined.color,
            },
            None => BoardView {
                position: self.rules.serialize(&self.rules.initial_position()),
                input_enabled: false,
                orientation: Color::White,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Joins the room with the given code and starts following it.
    ///
    /// Seat claims that lose a race are retried up to
    /// [`SessionConfig::join_attempts`] times. Both change feeds are
    /// opened before the room and its moves are read back, so nothing
    /// committed in between is missed.
    ///
    /// Returns the local seat.
    pub async fn open(&mut self, code: &str) -> Result<Color, SyncError> {
        self.close();
        let limit = self.config.store_timeout;

        let room = bounded(limit, self.rooms.get_room_by_code(code))
            .await??
            .ok_or(SyncError::NotFound)?;

        let attempts = self.config.join_attempts.max(1);
        let mut attempt = 0;
        let claim = loop {
            attempt += 1;
            let result = bounded(limit, self.rooms.join_room(room.id, &self.token))
                .await?
                .map_err(SyncError::from);
            match result {
                Ok(claim) => break claim,
                Err(SyncError::ConditionFailed(reason)) if attempt < attempts => {
                    tracing::debug!(room_id = %room.id, attempt, %reason, "seat claim lost, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        let store = self.rooms.store();
        let room_feed = bounded(limit, store.subscribe(Feed::Room(room.id))).await??;
        let move_feed = bounded(limit, store.subscribe(Feed::Moves(room.id))).await??;
        let current = bounded(limit, store.get_room(room.id)).await??;
        let listed = bounded(limit, store.list_moves(room.id)).await??;
        let position = self
            .rules
            .load_position(&current.position)
            .map_err(SyncError::InvalidRecord)?;

        let color = claim.color;
        let phase = SessionPhase::of(&current);
        tracing::info!(
            room_id = %current.id,
            code = %current.code,
            %color,
            version = current.version,
            moves = listed.len(),
            "joined room"
        );

        self.joined = Some(Joined {
            color,
            authoritative: current,
            position,
            speculative: None,
            moves: listed.into_iter().map(|mv| (mv.move_number, mv)).collect(),
            room_feed,
            move_feed,
            room_feed_open: true,
            move_feed_open: true,
        });
        self.set_phase(SessionPhase::Joined);
        self.set_phase(phase);
        self.publish();
        Ok(color)
    }

    /// Stops following the room and releases both change feeds.
    pub fn close(&mut self) {
        if let Some(joined) = self.joined.take() {
            tracing::info!(room_id = %joined.authoritative.id, "session closed");
            joined.room_feed.unsubscribe();
            joined.move_feed.unsubscribe();
        }
        self.set_phase(SessionPhase::Loading);
        self.publish();
    }

    // -----------------------------------------------------------------------
    // Moves
    // -----------------------------------------------------------------------

    /// Validates, applies and commits a local move.
    ///
    /// The move is checked locally first and never reaches the store if it
    /// is out of turn or illegal. Otherwise the speculative result is
    /// published at once and the room is written under
    /// `[TurnIs, StatusIs(InProgress), VersionIs]`. If that write fails
    /// for any reason the speculative copy is discarded and
    /// [`SyncError::SubmissionFailed`] is returned; the move is not retried.
    ///
    /// Dropping the returned future abandons the submission. Input is
    /// enabled again at once and the speculative copy is discarded on the
    /// next call.
    pub async fn submit_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> Result<MoveRecord, SyncError> {
        self.discard_abandoned();
        let joined = self.joined.as_ref().ok_or(SyncError::NotJoined)?;
        let color = joined.color;
        let room = joined.authoritative.clone();

        match self.phase {
            SessionPhase::Active => {}
            SessionPhase::Terminal => {
                return Err(SyncError::RoomUnavailable(room.status));
            }
            _ => return Err(SyncError::NotYourTurn),
        }
        if room.current_turn != color {
            return Err(SyncError::NotYourTurn);
        }
        match self.rules.piece_at(&joined.position, from) {
            Ok(Some((owner, _))) if owner == color => {}
            Ok(Some(_)) => {
                return Err(SyncError::IllegalMove(format!(
                    "the piece on {from} is not yours"
                )));
            }
            Ok(None) => {
                return Err(SyncError::IllegalMove(format!("no piece on {from}")));
            }
            Err(e) => return Err(SyncError::IllegalMove(e.to_string())),
        }
        let applied = self
            .rules
            .apply_move(&joined.position, from, to, promotion)
            .map_err(|e| SyncError::IllegalMove(e.to_string()))?;

        // Numbered from the position, not the local log, which may lag.
        let move_number = self.rules.ply_count(&joined.position).saturating_add(1);
        let fullmove = self.rules.fullmove_number(&joined.position);
        let patch = RoomPatch {
            current_turn: Some(self.rules.side_to_move(&applied.position)),
            position: Some(self.rules.serialize(&applied.position)),
            move_log: Some(movelog::append(&room.move_log, color, fullmove, &applied.san)),
            status: applied.outcome.map(|o| o.status()),
            winner: applied.outcome.and_then(|o| o.winner()),
            move_count: Some(move_number),
            ..RoomPatch::default()
        };

        let mut speculative = room.clone();
        speculative.apply(&patch);
        if let Some(joined) = self.joined.as_mut() {
            joined.speculative = Some(speculative);
        }
        let in_flight = InFlight::begin(&self.in_flight);
        self.publish();

        let conditions = vec![
            Condition::TurnIs(color),
            Condition::StatusIs(RoomStatus::InProgress),
            Condition::VersionIs(room.version),
        ];
        let limit = self.config.store_timeout;
        let committed = bounded(
            limit,
            self.rooms.store().update_room(room.id, patch, conditions),
        )
        .await
        .and_then(|result| result.map_err(SyncError::from));

        let committed = match committed {
            Ok(committed) => committed,
            Err(e) => {
                tracing::warn!(
                    room_id = %room.id,
                    move_number,
                    version = room.version,
                    error = %e,
                    "move not committed, rolling back"
                );
                drop(in_flight);
                self.rollback();
                return Err(SyncError::SubmissionFailed(e.to_string()));
            }
        };

        tracing::info!(
            room_id = %room.id,
            move_number,
            %color,
            notation = %applied.san,
            version = committed.version,
            status = %committed.status,
            "move committed"
        );
        if let Some(joined) = self.joined.as_mut() {
            joined.authoritative = committed;
            joined.position = applied.position;
            joined.speculative = None;
        }
        self.refresh_phase();
        self.publish();

        let new_move = NewMove {
            room_id: room.id,
            move_number,
            from_square: applied.from,
            to_square: applied.to,
            piece: applied.piece.letter().to_string(),
            notation: applied.san,
            color,
        };
        let appended = self.append_move(new_move).await;
        drop(in_flight);
        self.publish();
        appended
    }

    /// Board renderer adapter: submits a move, promoting to a queen, and
    /// reports whether the move was committed.
    pub async fn attempt_move(&mut self, from: &str, to: &str) -> bool {
        match self.submit_move(from, to, Some(Promotion::Queen)).await {
            Ok(_) => true,
            // The room update went through; only the log row is missing.
            Err(SyncError::LogAppendFailed { .. }) => true,
            Err(e) => {
                tracing::debug!(from, to, error = %e, "move attempt rejected");
                false
            }
        }
    }

    /// Appends the move row for a committed room update.
    async fn append_move(&mut self, mv: NewMove) -> Result<MoveRecord, SyncError> {
        let attempts = self.config.log_append_attempts.max(1);
        let limit = self.config.store_timeout;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result =
                bounded(limit, self.rooms.store().insert_move(mv.clone())).await;
            match result {
                Ok(Ok(record)) => {
                    self.record_move(record.clone());
                    return Ok(record);
                }
                Ok(Err(StoreError::Conflict(_))) => {
                    // An earlier attempt landed but its answer was lost.
                    tracing::debug!(move_number = mv.move_number, attempt, "move already logged");
                    let record = self.logged_move(&mv).await;
                    self.record_move(record.clone());
                    return Ok(record);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(e) => last_error = e.to_string(),
            }
            tracing::warn!(
                room_id = %mv.room_id,
                move_number = mv.move_number,
                attempt,
                error = %last_error,
                "move append failed"
            );
        }

        Err(SyncError::LogAppendFailed {
            move_number: mv.move_number,
            reason: last_error,
        })
    }

    /// The stored row for an already appended move, falling back to the
    /// submitted fields when it cannot be read back.
    async fn logged_move(&self, mv: &NewMove) -> MoveRecord {
        if let Some(joined) = &self.joined {
            if let Some(record) = joined.moves.get(&mv.move_number) {
                return record.clone();
            }
        }
        let listed =
            bounded(self.config.store_timeout, self.rooms.store().list_moves(mv.room_id))
                .await;
        if let Ok(Ok(moves)) = listed {
            if let Some(record) = moves.into_iter().find(|m| m.move_number == mv.move_number) {
                return record;
            }
        }
        mv.clone().into_record(rookline_protocol::unix_millis())
    }

    fn record_move(&mut self, record: MoveRecord) {
        if let Some(joined) = self.joined.as_mut() {
            joined.moves.entry(record.move_number).or_insert(record);
        }
    }

    fn rollback(&mut self) {
        if let Some(joined) = self.joined.as_mut() {
            joined.speculative = None;
        }
        self.publish();
    }

    /// Drops the speculative copy left by a submission whose future was
    /// dropped before the store answered.
    fn discard_abandoned(&mut self) {
        let abandoned = self
            .joined
            .as_ref()
            .is_some_and(|j| j.speculative.is_some());
        if abandoned && !self.is_in_flight() {
            tracing::debug!("discarding abandoned submission");
            self.rollback();
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Applies one change notification to the local view.
    ///
    /// A room row replaces the authoritative copy only if its version is
    /// newer; older rows and the echo of our own write are ignored. A move
    /// row is added only if its number is not already present.
    pub fn apply_change(&mut self, event: ChangeEvent) -> Result<SyncEvent, SyncError> {
        let Some(joined) = self.joined.as_mut() else {
            return Ok(SyncEvent::Ignored);
        };

        match event {
            ChangeEvent::RoomUpdated(room) => {
                if room.id != joined.authoritative.id {
                    return Ok(SyncEvent::Ignored);
                }
                if room.version <= joined.authoritative.version {
                    tracing::debug!(
                        room_id = %room.id,
                        version = room.version,
                        current = joined.authoritative.version,
                        "stale room update ignored"
                    );
                    return Ok(SyncEvent::Ignored);
                }
                let position = self
                    .rules
                    .load_position(&room.position)
                    .map_err(SyncError::InvalidRecord)?;

                tracing::debug!(room_id = %room.id, version = room.version, status = %room.status, "room updated");
                joined.authoritative = room.clone();
                joined.position = position;
                joined.speculative = None;
                self.refresh_phase();
                self.publish();
                Ok(SyncEvent::RoomChanged(room))
            }
            ChangeEvent::MoveInserted(mv) => {
                if mv.room_id != joined.authoritative.id
                    || joined.moves.contains_key(&mv.move_number)
                {
                    tracing::debug!(room_id = %mv.room_id, move_number = mv.move_number, "duplicate move ignored");
                    return Ok(SyncEvent::Ignored);
                }
                joined.moves.insert(mv.move_number, mv.clone());
                self.publish();
                Ok(SyncEvent::MoveAdded(mv))
            }
        }
    }

    /// Waits for the next notification on either feed and applies it.
    ///
    /// Returns `None` when no room is open or both feeds have closed.
    pub async fn next_change(&mut self) -> Option<Result<SyncEvent, SyncError>> {
        loop {
            let joined = self.joined.as_mut()?;
            if !joined.room_feed_open && !joined.move_feed_open {
                return None;
            }

            let (room_feed, event) = tokio::select! {
                event = joined.room_feed.next(), if joined.room_feed_open => (true, event),
                event = joined.move_feed.next(), if joined.move_feed_open => (false, event),
            };

            match event {
                Some(event) => return Some(self.apply_change(event)),
                None if room_feed => joined.room_feed_open = false,
                None => joined.move_feed_open = false,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn refresh_phase(&mut self) {
        if let Some(joined) = &self.joined {
            let phase = SessionPhase::of(&joined.authoritative);
            self.set_phase(phase);
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::info!(
                from = %self.phase,
                to = %phase,
                color = ?self.color(),
                "session phase changed"
            );
            self.phase = phase;
        }
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            phase: self.phase,
            color: self.color(),
            room: self.room().cloned(),
            moves: self.moves(),
            input_enabled: self.input_enabled(),
        };
        self.snapshots.send_replace(snapshot);
    }
}

/// Bounds a store call by `limit`.
async fn bounded<F: Future>(limit: Duration, fut: F) -> Result<F::Output, SyncError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        SyncError::Persistence(format!("store did not answer within {limit:?}"))
    })
}
