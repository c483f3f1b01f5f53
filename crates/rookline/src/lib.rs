//! # Rookline
//!
//! Two-player remote chess on top of a shared session store.
//!
//! Each participant runs a [`SessionSync`](rookline_session::SessionSync)
//! against a store. The store is either in-process
//! ([`MemoryStore`](rookline_store::MemoryStore)) or hosted by a
//! [`StoreServer`] and reached through a
//! [`RemoteStore`](rookline_store::RemoteStore).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rookline::prelude::*;
//!
//! # async fn run() -> Result<(), RooklineError> {
//! let server = StoreServer::builder().bind("127.0.0.1:7878").build().await?;
//! tokio::spawn(server.run());
//!
//! let store = RemoteStore::connect("ws://127.0.0.1:7878").await?;
//! let room = RoomManager::new(store.clone()).create_room().await?;
//!
//! let mut session = SessionSync::new(
//!     store,
//!     ChessRules::new(),
//!     generate_token(),
//!     SessionConfig::default(),
//! );
//! let color = session.open(&room.code).await?;
//! # let _ = color;
//! # Ok(())
//! # }
//! ```

mod error;
mod handler;
mod logging;
mod server;

pub use error::RooklineError;
pub use logging::init_logging;
pub use server::{ServerConfig, StoreServer, StoreServerBuilder};

pub mod prelude {
    pub use crate::{
        RooklineError, ServerConfig, StoreServer, StoreServerBuilder,
        init_logging,
    };
    pub use rookline_protocol::{
        ChangeEvent, Color, Envelope, Feed, MoveRecord, PROTOCOL_VERSION,
        ParticipantToken, Payload, Room, RoomId, RoomStatus, StoreRequest,
        StoreResponse,
    };
    pub use rookline_room::{RoomConfig, RoomError, RoomManager, SeatClaim};
    pub use rookline_rules::{ChessRules, Promotion, RulesEngine, RulesError};
    pub use rookline_session::{
        BoardView, SessionConfig, SessionPhase, SessionSnapshot, SessionSync,
        SyncError, SyncEvent, generate_token, load_or_create_token,
    };
    pub use rookline_store::{
        MemoryStore, RemoteConfig, RemoteStore, SessionStore, StoreError,
        Subscription,
    };
}
