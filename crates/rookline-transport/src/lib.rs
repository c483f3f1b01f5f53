//! Byte transport between a Rookline store host and its clients.
//!
//! The host accepts connections through a [`Transport`]; both sides then
//! exchange opaque frames over a [`Connection`]. Framing into envelopes is
//! the protocol layer's job, not this one's.
//!
//! ```text
//! StoreServer ── Transport::accept ──→ Connection ←── ClientConnection ── RemoteStore
//! ```
//!
//! With the `websocket` feature (default), [`WebSocketTransport`] and
//! [`WebSocketConnection`] implement both traits over `tokio-tungstenite`.

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{ClientConnection, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Process-unique id of one connection, used to tag log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A listening endpoint that hands out connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next client and completes its upgrade.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// The address clients should dial. With port `0` at bind time this is
    /// where the OS-assigned port shows up.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// One end of an established connection.
///
/// Sending and receiving must not block each other: the store host and the
/// remote store both drive a connection from a reader task and a writer
/// task at once.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Waits for the next frame. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;
}
