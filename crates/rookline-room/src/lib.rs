//! Room lifecycle management for Rookline.
//!
//! Rooms are rows in a [`SessionStore`](rookline_store::SessionStore).
//! The manager creates them under a fresh join code and hands out seats
//! through conditional updates, so two participants racing for the same
//! seat can never both get it.
//!
//! # Key types
//!
//! - [`RoomManager`]: create, look up, and join rooms
//! - [`RoomConfig`]: join code shape and starting position
//! - [`SeatClaim`]: the outcome of a successful join

mod code;
mod config;
mod error;
mod manager;

pub use code::generate_code;
pub use config::RoomConfig;
pub use error::RoomError;
pub use manager::{RoomManager, SeatClaim};
