//! Serialization of events for the wire.
//!
//! The transport moves opaque bytes; a [`Codec`] turns an [`Event`] into those
//! bytes and back. [`JsonCodec`] is the default.

use crate::error::SerializationError;
use crate::event::Event;
use bytes::Bytes;

/// Encodes and decodes events.
pub trait Codec: Send + Sync {
  /// Serializes an event.
  fn encode(&self, event: &Event) -> Result<Bytes, SerializationError>;

  /// Deserializes an event.
  fn decode(&self, bytes: &[u8]) -> Result<Event, SerializationError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
  fn encode(&self, event: &Event) -> Result<Bytes, SerializationError> {
    Ok(Bytes::from(serde_json::to_vec(event)?))
  }

  fn decode(&self, bytes: &[u8]) -> Result<Event, SerializationError> {
    Ok(serde_json::from_slice(bytes)?)
  }
}
