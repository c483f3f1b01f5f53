//! Turning envelopes into frames and back.
//!
//! Both ends of a store connection hold a [`Codec`]. The host and the
//! remote store only ever use [`JsonCodec`], which keeps frames readable
//! when a connection is traced at `debug`.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Frame encoding shared by a connection's reader and writer tasks.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// [`ProtocolError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// [`ProtocolError::Decode`] for malformed or truncated frames and for
    /// frames of the wrong shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// JSON frames via `serde_json`. Behind the `json` feature (default).
///
/// ```rust
/// use rookline_protocol::{Codec, Envelope, JsonCodec, Payload, PROTOCOL_VERSION};
///
/// let hello = Envelope::new(0, 0, Payload::Handshake { version: PROTOCOL_VERSION });
/// let frame = JsonCodec.encode(&hello).unwrap();
/// assert_eq!(JsonCodec.decode::<Envelope>(&frame).unwrap(), hello);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
