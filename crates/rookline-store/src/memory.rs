//! In-process session store running as an actor task.
//!
//! Every command goes through one mpsc channel and is processed serially
//! by the actor, so condition checks and commits are atomic and change
//! events leave in exactly the order rows were committed.

use std::collections::HashMap;

use rookline_protocol::{
    ChangeEvent, Color, Condition, Feed, MoveRecord, NewMove, NewRoom, Room,
    RoomId, RoomPatch, RoomStatus, SubscriptionId, unix_millis,
};
use tokio::sync::{mpsc, oneshot};

use crate::{SessionStore, StoreError, Subscription};

/// Configuration for a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the actor's command channel. Callers wait when it is
    /// full.
    pub channel_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { channel_size: 256 }
    }
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum StoreCommand {
    CreateRoom {
        room: NewRoom,
        reply: Reply<Room>,
    },
    GetRoom {
        id: RoomId,
        reply: Reply<Room>,
    },
    FindRoomByCode {
        code: String,
        reply: Reply<Option<Room>>,
    },
    UpdateRoom {
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
        reply: Reply<Room>,
    },
    InsertMove {
        mv: NewMove,
        reply: Reply<MoveRecord>,
    },
    ListMoves {
        room_id: RoomId,
        reply: Reply<Vec<MoveRecord>>,
    },
    Subscribe {
        feed: Feed,
        events: mpsc::UnboundedSender<ChangeEvent>,
        reply: Reply<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
}

/// Handle to an in-process store. Cheap to clone; all clones talk to the
/// same actor, which stops when the last clone is dropped.
#[derive(Clone)]
pub struct MemoryStore {
    sender: mpsc::Sender<StoreCommand>,
}

impl MemoryStore {
    /// Spawns a store actor with default settings. Must be called from
    /// within a Tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_with(StoreConfig::default())
    }

    pub fn spawn_with(config: StoreConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_size);
        let actor = StoreActor {
            rooms: HashMap::new(),
            codes: HashMap::new(),
            moves: HashMap::new(),
            subscribers: HashMap::new(),
            next_room_id: 1,
            next_subscription_id: 1,
            receiver: rx,
        };
        tokio::spawn(actor.run());
        Self { sender: tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> StoreCommand,
    ) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| stopped())?;
        reply_rx.await.map_err(|_| stopped())?
    }
}

fn stopped() -> StoreError {
    StoreError::Unavailable("store actor stopped".into())
}

impl SessionStore for MemoryStore {
    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        self.request(|reply| StoreCommand::CreateRoom { room, reply })
            .await
    }

    async fn get_room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.request(|reply| StoreCommand::GetRoom { id, reply }).await
    }

    async fn find_room_by_code(
        &self,
        code: &str,
    ) -> Result<Option<Room>, StoreError> {
        let code = code.to_string();
        self.request(|reply| StoreCommand::FindRoomByCode { code, reply })
            .await
    }

    async fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
    ) -> Result<Room, StoreError> {
        self.request(|reply| StoreCommand::UpdateRoom {
            id,
            patch,
            conditions,
            reply,
        })
        .await
    }

    async fn insert_move(&self, mv: NewMove) -> Result<MoveRecord, StoreError> {
        self.request(|reply| StoreCommand::InsertMove { mv, reply })
            .await
    }

    async fn list_moves(
        &self,
        room_id: RoomId,
    ) -> Result<Vec<MoveRecord>, StoreError> {
        self.request(|reply| StoreCommand::ListMoves { room_id, reply })
            .await
    }

    async fn subscribe(&self, feed: Feed) -> Result<Subscription, StoreError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let id = self
            .request(|reply| StoreCommand::Subscribe {
                feed,
                events: events_tx,
                reply,
            })
            .await?;

        let sender = self.sender.clone();
        Ok(Subscription::new(id, feed, events_rx, move |id| {
            // If the channel is full the actor still prunes this
            // subscriber on its next fan-out, since the receiver is gone.
            let _ = sender.try_send(StoreCommand::Unsubscribe { id });
        }))
    }
}

struct Subscriber {
    feed: Feed,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

/// The actor owning the tables.
struct StoreActor {
    rooms: HashMap<RoomId, Room>,
    codes: HashMap<String, RoomId>,
    /// Moves per room, index `i` holding move number `i + 1`.
    moves: HashMap<RoomId, Vec<MoveRecord>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_room_id: u64,
    next_subscription_id: u64,
    receiver: mpsc::Receiver<StoreCommand>,
}

impl StoreActor {
    async fn run(mut self) {
        tracing::debug!("store actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                StoreCommand::CreateRoom { room, reply } => {
                    let _ = reply.send(self.handle_create(room));
                }
                StoreCommand::GetRoom { id, reply } => {
                    let result = self
                        .rooms
                        .get(&id)
                        .cloned()
                        .ok_or_else(|| room_not_found(id));
                    let _ = reply.send(result);
                }
                StoreCommand::FindRoomByCode { code, reply } => {
                    let room = self
                        .codes
                        .get(&code)
                        .and_then(|id| self.rooms.get(id))
                        .cloned();
                    let _ = reply.send(Ok(room));
                }
                StoreCommand::UpdateRoom {
                    id,
                    patch,
                    conditions,
                    reply,
                } => {
                    let _ = reply.send(self.handle_update(id, patch, conditions));
                }
                StoreCommand::InsertMove { mv, reply } => {
                    let _ = reply.send(self.handle_insert_move(mv));
                }
                StoreCommand::ListMoves { room_id, reply } => {
                    let result = if self.rooms.contains_key(&room_id) {
                        Ok(self.moves.get(&room_id).cloned().unwrap_or_default())
                    } else {
                        Err(room_not_found(room_id))
                    };
                    let _ = reply.send(result);
                }
                StoreCommand::Subscribe {
                    feed,
                    events,
                    reply,
                } => {
                    let id = SubscriptionId(self.next_subscription_id);
                    self.next_subscription_id += 1;
                    self.subscribers.insert(id, Subscriber { feed, events });
                    tracing::debug!(subscription = %id, %feed, "subscribed");
                    let _ = reply.send(Ok(id));
                }
                StoreCommand::Unsubscribe { id } => {
                    if self.subscribers.remove(&id).is_some() {
                        tracing::debug!(subscription = %id, "unsubscribed");
                    }
                }
            }
        }

        tracing::debug!("store actor stopped");
    }

    fn handle_create(&mut self, new_room: NewRoom) -> Result<Room, StoreError> {
        if self.codes.contains_key(&new_room.code) {
            return Err(StoreError::Conflict(format!(
                "room code {} already in use",
                new_room.code
            )));
        }

        let id = RoomId(self.next_room_id);
        self.next_room_id += 1;
        let now = unix_millis();
        let room = Room {
            id,
            code: new_room.code,
            white_seat: None,
            black_seat: None,
            current_turn: new_room.current_turn,
            position: new_room.position,
            move_log: String::new(),
            status: RoomStatus::Waiting,
            winner: None,
            move_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.codes.insert(room.code.clone(), id);
        self.rooms.insert(id, room.clone());
        self.moves.insert(id, Vec::new());
        tracing::info!(room_id = %id, code = %room.code, "room created");
        Ok(room)
    }

    fn handle_update(
        &mut self,
        id: RoomId,
        patch: RoomPatch,
        conditions: Vec<Condition>,
    ) -> Result<Room, StoreError> {
        let current = self.rooms.get(&id).ok_or_else(|| room_not_found(id))?;
        check_update(current, &patch, &conditions)?;

        let room = self.rooms.get_mut(&id).ok_or_else(|| room_not_found(id))?;
        room.apply(&patch);
        room.version += 1;
        room.updated_at = unix_millis();
        let room = room.clone();

        tracing::debug!(room_id = %id, version = room.version, status = %room.status, "room updated");
        self.fan_out(ChangeEvent::RoomUpdated(room.clone()));
        Ok(room)
    }

    fn handle_insert_move(&mut self, mv: NewMove) -> Result<MoveRecord, StoreError> {
        let room = self
            .rooms
            .get(&mv.room_id)
            .ok_or_else(|| room_not_found(mv.room_id))?;

        let committed = room.move_count;
        let log = self.moves.entry(mv.room_id).or_default();
        let expected = log.len() as u32 + 1;
        if mv.move_number == 0 || mv.move_number > expected {
            return Err(StoreError::ConditionFailed(format!(
                "expected move {expected}, got {}",
                mv.move_number
            )));
        }
        if mv.move_number < expected {
            return Err(StoreError::Conflict(format!(
                "move {} already recorded for room {}",
                mv.move_number, mv.room_id
            )));
        }
        // Rows trail the room update that commits their ply, so a terminal
        // room still takes the move that ended the game and nothing after.
        if mv.move_number > committed {
            return Err(StoreError::ConditionFailed(format!(
                "move {} has no committed room update ({committed} plies committed)",
                mv.move_number
            )));
        }

        let record = mv.into_record(unix_millis());
        log.push(record.clone());
        tracing::debug!(room_id = %record.room_id, move_number = record.move_number, "move inserted");
        self.fan_out(ChangeEvent::MoveInserted(record.clone()));
        Ok(record)
    }

    /// Delivers `event` to every matching subscriber, dropping those whose
    /// receiver is gone.
    fn fan_out(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|id, sub| {
            if !sub.feed.matches(&event) {
                return true;
            }
            let delivered = sub.events.send(event.clone()).is_ok();
            if !delivered {
                tracing::debug!(subscription = %id, "pruning closed subscriber");
            }
            delivered
        });
    }
}

/// Decides whether `patch` may be committed on top of `room`.
fn check_update(
    room: &Room,
    patch: &RoomPatch,
    conditions: &[Condition],
) -> Result<(), StoreError> {
    if room.status.is_terminal() {
        return Err(StoreError::ConditionFailed(format!(
            "room {} is {} and accepts no updates",
            room.id, room.status
        )));
    }
    if let Some(failed) = conditions.iter().find(|c| !c.holds(room)) {
        tracing::debug!(room_id = %room.id, condition = %failed, version = room.version, "update rejected");
        return Err(StoreError::ConditionFailed(format!(
            "{failed} does not hold"
        )));
    }
    // Seats are filled once and never handed to someone else.
    for (color, token) in [
        (Color::White, &patch.white_seat),
        (Color::Black, &patch.black_seat),
    ] {
        if let (Some(new), Some(held)) = (token, room.seat(color)) {
            if new != held {
                return Err(StoreError::ConditionFailed(format!(
                    "{color} seat already taken"
                )));
            }
        }
    }
    Ok(())
}

fn room_not_found(id: RoomId) -> StoreError {
    StoreError::NotFound(format!("room {id}"))
}
