/// Failures turning frames into envelopes or envelopes into frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Malformed or truncated frame, or one of the wrong shape.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A well-formed envelope that breaks the conversation: a refused
    /// handshake, a reply of the wrong kind.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
