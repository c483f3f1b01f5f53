//! The session store: the one place the shared game record lives.
//!
//! Rooms and moves are rows; every room write is a conditional update and
//! every committed change is fanned out to subscribers in commit order.
//!
//! # Key types
//!
//! - [`SessionStore`]: the contract the room manager and synchronizer use
//! - [`MemoryStore`]: an in-process store running as an actor task
//! - [`RemoteStore`]: the same contract over a WebSocket connection
//! - [`Subscription`]: a live change feed

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "remote")]
mod remote;
mod store;

pub use error::StoreError;
pub use memory::{MemoryStore, StoreConfig};
#[cfg(feature = "remote")]
pub use remote::{RemoteConfig, RemoteStore};
pub use store::{SessionStore, Subscription};
