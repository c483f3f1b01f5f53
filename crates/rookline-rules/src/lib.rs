//! Game rules for Rookline.
//!
//! The synchronizer never computes legality itself; it asks a
//! [`RulesEngine`]. This crate defines that contract and ships
//! [`ChessRules`], an adapter over the `chess` crate.
//!
//! # Key types
//!
//! - [`RulesEngine`]: legality, position serialization, terminal detection
//! - [`ChessRules`] / [`ChessPosition`]: the standard chess implementation
//! - [`AppliedMove`]: everything the synchronizer needs after one move
//! - [`movelog`]: PGN-style movetext kept on the room row
//! - [`replay`]: rebuilds a position from committed move rows

mod engine;
mod error;
pub mod movelog;
mod replay;
mod standard;

pub use engine::{AppliedMove, Outcome, PieceKind, Promotion, RulesEngine};
pub use error::RulesError;
pub use replay::{Replay, replay};
pub use standard::{ChessPosition, ChessRules, STANDARD_START};
