//! Unified error type for Rookline.

use rookline_protocol::ProtocolError;
use rookline_room::RoomError;
use rookline_rules::RulesError;
use rookline_session::SyncError;
use rookline_store::StoreError;
use rookline_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// `#[from]` on each variant lets `?` convert layer errors automatically,
/// so an application built on the `rookline` crate deals with one type.
#[derive(Debug, thiserror::Error)]
pub enum RooklineError {
    /// Binding, accepting, sending, or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded, or broke a protocol rule.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Creating or joining a room failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// A session operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}
