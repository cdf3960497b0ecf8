//! # Error Handling
//!
//! Error types for routing, transport, topology and dispatch.
//!
//! Errors are split by concern so callers can tell a per-message failure
//! (a payload that does not decode, a handler miss under a tolerant policy)
//! from a structural one (an empty or unknown topology, an ambiguous handler
//! set). Per-message errors are logged and isolated to the offending message;
//! structural errors are returned to the caller and halt routing for the
//! affected scope.
//!
//! There is no hash error: every [`HashAlgorithm`](crate::hashing::HashAlgorithm)
//! is total and masks its sign bit, so a negative hash cannot be produced.
//!
//! All module errors convert into the crate-level [`Error`] with `?`.

use crate::partitioner::PartitionIndex;
use std::io;

/// Boxed error returned by processing-unit handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while computing the target partition of an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
  /// The topology snapshot has no partitions.
  #[error("no available partition: topology has zero partitions")]
  NoAvailablePartition,
  /// The coordination link is lost; the current membership is unknown.
  #[error("topology unavailable: cluster membership is unknown")]
  TopologyUnavailable,
  /// The key extractor could not derive a routing key from the event.
  #[error("key extraction failed: {0}")]
  KeyExtraction(String),
  /// No key extractor is registered for the event's stream.
  #[error("no key extractor registered for stream [{0}]")]
  UnknownStream(String),
  /// The stream was disabled after a structural dispatch error.
  #[error("stream [{0}] is disabled")]
  StreamDisabled(String),
}

/// Errors raised by the topology service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
  /// The coordination link is lost; membership cannot be read.
  #[error("topology unavailable")]
  Unavailable,
  /// A static cluster description is inconsistent.
  #[error("invalid cluster configuration: {0}")]
  InvalidConfig(String),
}

/// A payload could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("serialization error: {0}")]
pub struct SerializationError(pub String);

impl From<serde_json::Error> for SerializationError {
  fn from(err: serde_json::Error) -> Self {
    SerializationError(err.to_string())
  }
}

/// Errors raised while resolving or invoking a handler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
  /// Two incomparable handler types both match an event type.
  #[error(
    "ambiguous dispatch in unit class [{unit_class}] for event type [{event_type}]: candidates {candidates:?}"
  )]
  AmbiguousDispatch {
    /// The processing-unit class whose table failed to build.
    unit_class: String,
    /// The event type that matches more than one handler.
    event_type: String,
    /// The incomparable handler types.
    candidates: Vec<String>,
  },
  /// No declared handler accepts the event type.
  #[error("cannot dispatch event of type [{event_type}] to unit of class [{unit_class}]: no matching handler")]
  NoMatchingHandler {
    /// The processing-unit class.
    unit_class: String,
    /// The runtime event type.
    event_type: String,
  },
  /// The event type hierarchy is malformed.
  #[error("invalid event type hierarchy: {0}")]
  InvalidHierarchy(String),
  /// No unit type is registered under the requested name.
  #[error("unknown unit type: {0}")]
  UnknownUnitType(String),
  /// The resolved handler returned an error.
  #[error("handler failed: {0}")]
  Handler(#[source] HandlerError),
}

impl DispatchError {
  /// Returns true if the error makes the whole unit class unusable.
  ///
  /// Structural errors are configuration faults; the stream bound to the
  /// class is disabled rather than retried per message.
  pub fn is_structural(&self) -> bool {
    matches!(
      self,
      DispatchError::AmbiguousDispatch { .. }
        | DispatchError::InvalidHierarchy(_)
        | DispatchError::UnknownUnitType(_)
    )
  }
}

/// Errors raised by senders and listeners.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// A blocking wait was interrupted by a shutdown or cancellation request.
  #[error("transport interrupted")]
  Interrupted,
  /// The peer endpoint is closed.
  #[error("transport closed")]
  Closed,
  /// No endpoint is responsible for the partition.
  #[error("no endpoint for partition {0}")]
  UnknownPartition(PartitionIndex),
  /// Network I/O failed.
  #[error("network error: {0}")]
  Io(#[from] io::Error),
  /// A connection could not be established in time.
  #[error("connection timeout")]
  Timeout,
  /// The sender cannot resolve a partition while membership is unknown.
  #[error("topology unavailable")]
  TopologyUnavailable,
}

impl TransportError {
  /// Returns true for the cooperative shutdown signals.
  pub fn is_shutdown(&self) -> bool {
    matches!(self, TransportError::Interrupted | TransportError::Closed)
  }
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Routing failed.
  #[error(transparent)]
  Routing(#[from] RoutingError),
  /// Topology failed.
  #[error(transparent)]
  Topology(#[from] TopologyError),
  /// Serialization failed.
  #[error(transparent)]
  Serialization(#[from] SerializationError),
  /// Dispatch failed.
  #[error(transparent)]
  Dispatch(#[from] DispatchError),
  /// Transport failed.
  #[error(transparent)]
  Transport(#[from] TransportError),
  /// Configuration could not be loaded.
  #[error("configuration error: {0}")]
  Config(String),
}

/// Result type for keyweave operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
