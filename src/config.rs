//! # Configuration
//!
//! Serde-deserializable settings for hashing, transport, dispatch and the
//! static cluster description. Every section has defaults, so a config file
//! only needs the values it changes.
//!
//! ```rust
//! use keyweave::config::{KeyweaveConfig, MissPolicy};
//! use keyweave::hashing::HashAlgorithm;
//!
//! let config = KeyweaveConfig::from_json_str(
//!   r#"{ "hash_algorithm": "ketama", "dispatch": { "on_missing_trigger": "ignore" } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.hash_algorithm, HashAlgorithm::Ketama);
//! assert_eq!(config.dispatch.on_missing_trigger, MissPolicy::Ignore);
//! assert_eq!(config.dispatch.on_missing_event, MissPolicy::Fail);
//! ```

use crate::error::Error;
use crate::hashing::HashAlgorithm;
use crate::topology::NodeDescriptor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyweaveConfig {
  /// Hash algorithm used by the partitioner.
  pub hash_algorithm: HashAlgorithm,
  /// Transport settings.
  pub transport: TransportConfig,
  /// Dispatch settings.
  pub dispatch: DispatchConfig,
  /// Static cluster description, when membership is not fed by a coordinator.
  pub cluster: Option<ClusterConfig>,
}

impl KeyweaveConfig {
  /// Parses settings from a JSON string.
  pub fn from_json_str(json: &str) -> Result<Self, Error> {
    serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
  }

  /// Reads settings from a JSON file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
      .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Self::from_json_str(&raw)
  }

  /// Sets the hash algorithm.
  #[must_use]
  pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
    self.hash_algorithm = algorithm;
    self
  }

  /// Sets the transport settings.
  #[must_use]
  pub fn with_transport(mut self, transport: TransportConfig) -> Self {
    self.transport = transport;
    self
  }

  /// Sets the dispatch settings.
  #[must_use]
  pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
    self.dispatch = dispatch;
    self
  }

  /// Sets the static cluster description.
  #[must_use]
  pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
    self.cluster = Some(cluster);
    self
  }
}

/// Which transport implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
  /// Single partition, in process.
  Loopback,
  /// Several partitions, in process.
  #[default]
  InProcess,
  /// Length-delimited frames over TCP.
  Tcp,
}

/// Transport settings, applied by
/// [`TransportFactory`](crate::transport::factory::TransportFactory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  /// Transport implementation.
  pub kind: TransportKind,
  /// Bounded buffer in front of each listener. `None` keeps the zero-buffer
  /// rendezvous handoff.
  pub listener_buffer: Option<usize>,
  /// TCP connect timeout in milliseconds.
  pub connect_timeout_ms: u64,
}

impl TransportConfig {
  /// TCP connect timeout.
  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  /// Sets the transport implementation.
  #[must_use]
  pub fn with_kind(mut self, kind: TransportKind) -> Self {
    self.kind = kind;
    self
  }

  /// Enables a bounded listener buffer.
  #[must_use]
  pub fn with_listener_buffer(mut self, capacity: usize) -> Self {
    self.listener_buffer = Some(capacity);
    self
  }
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      kind: TransportKind::default(),
      listener_buffer: None,
      connect_timeout_ms: 5_000,
    }
  }
}

/// What to do when no handler matches an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissPolicy {
  /// Fail with `NoMatchingHandler`.
  #[default]
  Fail,
  /// Treat the event as a no-op.
  Ignore,
}

/// Dispatch settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
  /// Policy for input events without a matching handler.
  pub on_missing_event: MissPolicy,
  /// Policy for trigger events without a matching handler.
  pub on_missing_trigger: MissPolicy,
}

impl DispatchConfig {
  /// Sets the input event miss policy.
  #[must_use]
  pub fn with_missing_event(mut self, policy: MissPolicy) -> Self {
    self.on_missing_event = policy;
    self
  }

  /// Sets the trigger miss policy.
  #[must_use]
  pub fn with_missing_trigger(mut self, policy: MissPolicy) -> Self {
    self.on_missing_trigger = policy;
    self
  }
}

/// Static cluster description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
  /// Cluster name.
  pub name: String,
  /// Fixed partition count; defaults to the number of nodes.
  #[serde(default)]
  pub partition_count: Option<u32>,
  /// Members.
  pub nodes: Vec<NodeDescriptor>,
}
