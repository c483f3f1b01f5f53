//! Shared records and wire protocol for Rookline.
//!
//! This crate defines the "language" every other layer speaks:
//!
//! - **Model** ([`Room`], [`MoveRecord`], [`Condition`], [`ChangeEvent`], …):
//!   the authoritative game record and the guards on writes to it.
//! - **Wire types** ([`Envelope`], [`Payload`], [`StoreRequest`],
//!   [`StoreResponse`]): what travels between a store host and its clients.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Store (rows + change feeds)
//! ```

mod codec;
mod error;
mod model;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use model::{
    ChangeEvent, Color, Condition, Feed, MoveRecord, NewMove, NewRoom,
    ParticipantToken, Room, RoomId, RoomPatch, RoomStatus, SubscriptionId,
    unix_millis,
};
pub use types::{
    Envelope, FailureKind, PROTOCOL_VERSION, Payload, StoreRequest,
    StoreResponse,
};
