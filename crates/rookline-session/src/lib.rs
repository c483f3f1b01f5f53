//! Client-side session synchronizer for Rookline.
//!
//! A [`SessionSync`] is one participant's view of one room. It joins a
//! seat, keeps an authoritative copy of the room and its move log in
//! step with the store's change feeds, and turns a local move into a
//! conditional write that the store accepts only if it is still this
//! participant's turn on the same room version.
//!
//! # How it fits in the stack
//!
//! ```text
//! Display / board renderer  ← watch(), board_view(), attempt_move()
//!     ↕
//! Session Synchronizer (this crate)
//!     ↕
//! Room manager + Session store + Rules engine
//! ```

mod error;
mod session;
mod sync;
mod token;

pub use error::SyncError;
pub use session::{BoardView, SessionConfig, SessionPhase, SessionSnapshot, SyncEvent};
pub use sync::SessionSync;
pub use token::{generate_token, load_or_create_token};
