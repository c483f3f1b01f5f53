//! `StoreServer` builder and accept loop.
//!
//! A store server hosts one [`MemoryStore`] and lets
//! [`RemoteStore`](rookline_store::RemoteStore) clients use it over
//! WebSocket. It ties the layers together: transport → protocol → store.

use std::sync::Arc;
use std::time::Duration;

use rookline_protocol::{Codec, JsonCodec};
use rookline_store::MemoryStore;
use rookline_transport::{Transport, WebSocketTransport};

use crate::RooklineError;
use crate::handler::handle_connection;

/// Timeouts applied to every client connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a new connection may take to send its `Handshake`.
    pub handshake_timeout: Duration,

    /// How long a connection may stay silent before it is dropped.
    /// Clients keep it alive with heartbeats.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
        }
    }
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) store: MemoryStore,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a store server.
///
/// # Example
///
/// ```rust,ignore
/// use rookline::prelude::*;
///
/// let server = StoreServer::builder()
///     .bind("0.0.0.0:7878")
///     .idle_timeout(Duration::from_secs(30))
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct StoreServerBuilder {
    bind_addr: String,
    config: ServerConfig,
    store: Option<MemoryStore>,
}

impl StoreServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:7878".to_string(),
            config: ServerConfig::default(),
            store: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Serves an existing store instead of spawning a fresh one.
    pub fn store(mut self, store: MemoryStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Binds the listener.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build(self) -> Result<StoreServer<JsonCodec>, RooklineError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            store: self.store.unwrap_or_else(MemoryStore::spawn),
            codec: JsonCodec,
            config: self.config,
        });

        Ok(StoreServer { transport, state })
    }
}

impl Default for StoreServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound store server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct StoreServer<C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl StoreServer {
    /// Creates a new builder.
    pub fn builder() -> StoreServerBuilder {
        StoreServerBuilder::new()
    }
}

impl<C: Codec> StoreServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The store this server hosts.
    pub fn store(&self) -> &MemoryStore {
        &self.state.store
    }

    /// Runs the accept loop.
    ///
    /// Each accepted connection gets its own task that performs the
    /// handshake and then serves store requests until the client leaves.
    /// Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), RooklineError> {
        tracing::info!(addr = ?self.local_addr().ok(), "store server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
