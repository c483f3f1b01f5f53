use std::io;

/// Transport failures. Each wraps the underlying I/O or WebSocket error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    BindFailed(#[source] io::Error),

    /// A client reached the listener but its upgrade did not complete.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("connect to {url} failed: {source}")]
    ConnectFailed {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),
}
