//! # Partitioning
//!
//! Maps an event to the partition that owns it.
//!
//! A [`KeyExtractor`] derives a [`RoutingKey`] from the event, a [`Partitioner`]
//! turns the key into a partition index for the partition count of one
//! [`TopologySnapshot`]. Every node computes the same index for the same key
//! and snapshot, so no broadcast is needed to agree on ownership.
//!
//! ## Usage
//!
//! ```rust
//! use keyweave::event::Event;
//! use keyweave::hashing::HashAlgorithm;
//! use keyweave::partitioner::{FieldKeyExtractor, HashPartitioner, Partitioner};
//! use keyweave::topology::{NodeDescriptor, Topology};
//! use serde_json::json;
//!
//! let topology = Topology::with_nodes(
//!   "demo",
//!   vec![
//!     NodeDescriptor::new(0, "10.0.0.1", 7000),
//!     NodeDescriptor::new(1, "10.0.0.2", 7000),
//!   ],
//! );
//! let partitioner = HashPartitioner::new(HashAlgorithm::Native);
//! let extractor = FieldKeyExtractor::new(["user"]);
//! let event = Event::new("Click").with_field("user", json!("u-1"));
//!
//! let partition = partitioner.route(&event, &extractor, &topology).unwrap();
//! assert!(partition < 2);
//! ```

use crate::error::{RoutingError, TopologyError};
use crate::event::Event;
use crate::hashing::{HashAlgorithm, Hasher};
use crate::topology::{Topology, TopologySnapshot};
use std::fmt;
use std::sync::Arc;

/// Index of a partition, in `[0, partition_count)`.
pub type PartitionIndex = u32;

/// Key that decides both the target partition and the target unit instance.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum RoutingKey {
  /// Text key.
  Text(String),
  /// Binary key.
  Bytes(Vec<u8>),
}

impl RoutingKey {
  /// Returns the key bytes fed to the hash function.
  pub fn as_bytes(&self) -> &[u8] {
    match self {
      RoutingKey::Text(s) => s.as_bytes(),
      RoutingKey::Bytes(b) => b,
    }
  }
}

impl From<String> for RoutingKey {
  fn from(s: String) -> Self {
    RoutingKey::Text(s)
  }
}

impl From<&str> for RoutingKey {
  fn from(s: &str) -> Self {
    RoutingKey::Text(s.to_string())
  }
}

impl From<Vec<u8>> for RoutingKey {
  fn from(bytes: Vec<u8>) -> Self {
    RoutingKey::Bytes(bytes)
  }
}

impl fmt::Display for RoutingKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RoutingKey::Text(s) => f.write_str(s),
      RoutingKey::Bytes(b) => {
        for byte in b {
          write!(f, "{:02x}", byte)?;
        }
        Ok(())
      }
    }
  }
}

/// Derives a routing key from an event.
///
/// Extraction must be deterministic: the same event always yields the same key.
pub trait KeyExtractor: Send + Sync {
  /// Extracts the routing key.
  fn extract(&self, event: &Event) -> Result<RoutingKey, RoutingError>;
}

/// Extracts a key from one or more named fields.
///
/// Multiple fields are joined with the separator in declaration order.
#[derive(Debug, Clone)]
pub struct FieldKeyExtractor {
  fields: Vec<String>,
  separator: String,
}

impl FieldKeyExtractor {
  /// Creates an extractor over the given fields, joined with `"|"`.
  pub fn new<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      fields: fields.into_iter().map(Into::into).collect(),
      separator: "|".to_string(),
    }
  }

  /// Sets the separator used to join multiple fields.
  #[must_use]
  pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
    self.separator = separator.into();
    self
  }
}

impl KeyExtractor for FieldKeyExtractor {
  fn extract(&self, event: &Event) -> Result<RoutingKey, RoutingError> {
    if self.fields.is_empty() {
      return Err(RoutingError::KeyExtraction(
        "no key fields configured".to_string(),
      ));
    }
    let mut parts = Vec::with_capacity(self.fields.len());
    for name in &self.fields {
      let value = event.field_str(name).ok_or_else(|| {
        RoutingError::KeyExtraction(format!(
          "event of type [{}] has no field [{}]",
          event.event_type(),
          name
        ))
      })?;
      parts.push(value);
    }
    Ok(RoutingKey::Text(parts.join(&self.separator)))
  }
}

/// Wrapper that implements `KeyExtractor` for closures.
struct KeyExtractorFn<F> {
  function: F,
}

impl<F> KeyExtractor for KeyExtractorFn<F>
where
  F: Fn(&Event) -> Result<RoutingKey, RoutingError> + Send + Sync,
{
  fn extract(&self, event: &Event) -> Result<RoutingKey, RoutingError> {
    (self.function)(event)
  }
}

/// Creates a key extractor from a closure.
pub fn key_by<F>(function: F) -> Arc<dyn KeyExtractor>
where
  F: Fn(&Event) -> Result<RoutingKey, RoutingError> + Send + Sync + 'static,
{
  Arc::new(KeyExtractorFn { function })
}

/// Maps routing keys to partitions.
pub trait Partitioner: Send + Sync {
  /// Returns the partition index for the key.
  ///
  /// # Errors
  ///
  /// `NoAvailablePartition` when `num_partitions` is zero.
  fn partition(
    &self,
    key: &RoutingKey,
    num_partitions: u32,
  ) -> Result<PartitionIndex, RoutingError>;

  /// Routes a key against one topology snapshot.
  fn partition_in(
    &self,
    key: &RoutingKey,
    snapshot: &TopologySnapshot,
  ) -> Result<PartitionIndex, RoutingError> {
    self.partition(key, snapshot.partition_count())
  }

  /// Extracts the key from the event and routes it against the live topology.
  ///
  /// The partition count is read from a single snapshot, so a concurrent
  /// resize cannot split the computation across two cluster sizes.
  fn route(
    &self,
    event: &Event,
    extractor: &dyn KeyExtractor,
    topology: &Topology,
  ) -> Result<PartitionIndex, RoutingError> {
    let key = extractor.extract(event)?;
    let snapshot = topology.snapshot().map_err(|err| match err {
      TopologyError::Unavailable => RoutingError::TopologyUnavailable,
      TopologyError::InvalidConfig(_) => RoutingError::NoAvailablePartition,
    })?;
    self.partition_in(&key, &snapshot)
  }
}

/// Hash-based partitioner: `hash(key) mod num_partitions`.
#[derive(Debug, Clone)]
pub struct HashPartitioner {
  hasher: Arc<dyn Hasher>,
}

impl HashPartitioner {
  /// Creates a partitioner using a built-in algorithm.
  #[must_use]
  pub fn new(algorithm: HashAlgorithm) -> Self {
    Self {
      hasher: Arc::new(algorithm),
    }
  }

  /// Creates a partitioner using a custom hasher.
  #[must_use]
  pub fn with_hasher(hasher: Arc<dyn Hasher>) -> Self {
    Self { hasher }
  }
}

impl Default for HashPartitioner {
  fn default() -> Self {
    Self::new(HashAlgorithm::default())
  }
}

impl Partitioner for HashPartitioner {
  fn partition(
    &self,
    key: &RoutingKey,
    num_partitions: u32,
  ) -> Result<PartitionIndex, RoutingError> {
    if num_partitions == 0 {
      return Err(RoutingError::NoAvailablePartition);
    }
    let hash = self.hasher.hash(key.as_bytes());
    debug_assert!(hash >= 0, "hasher {:?} returned a negative value", self.hasher);
    Ok((hash.unsigned_abs() % u64::from(num_partitions)) as PartitionIndex)
  }
}

/// Partitioner that delegates to a provided function.
///
/// The result is checked against the partition count; an out-of-range index
/// is folded back with `mod` instead of being trusted.
pub struct CustomPartitioner<F>
where
  F: Fn(&RoutingKey, u32) -> u32 + Send + Sync,
{
  partition_fn: F,
}

impl<F> CustomPartitioner<F>
where
  F: Fn(&RoutingKey, u32) -> u32 + Send + Sync,
{
  /// Creates a new custom partitioner with the given function.
  #[must_use]
  pub fn new(partition_fn: F) -> Self {
    Self { partition_fn }
  }
}

impl<F> Partitioner for CustomPartitioner<F>
where
  F: Fn(&RoutingKey, u32) -> u32 + Send + Sync,
{
  fn partition(
    &self,
    key: &RoutingKey,
    num_partitions: u32,
  ) -> Result<PartitionIndex, RoutingError> {
    if num_partitions == 0 {
      return Err(RoutingError::NoAvailablePartition);
    }
    Ok((self.partition_fn)(key, num_partitions) % num_partitions)
  }
}

/// Utility functions for partition rebalancing.
pub mod rebalance {
  use super::{Partitioner, RoutingKey};

  /// Reports where a key lives before and after a partition count change.
  ///
  /// Returns `None` when either count is zero.
  pub fn needs_rebalance(
    partitioner: &dyn Partitioner,
    key: &RoutingKey,
    old_num_partitions: u32,
    new_num_partitions: u32,
  ) -> Option<(u32, u32, bool)> {
    let old_partition = partitioner.partition(key, old_num_partitions).ok()?;
    let new_partition = partitioner.partition(key, new_num_partitions).ok()?;
    Some((old_partition, new_partition, old_partition != new_partition))
  }

  /// Fraction (0.0 to 1.0) of the sample keys that change partition.
  pub fn moved_fraction(
    partitioner: &dyn Partitioner,
    sample_keys: &[RoutingKey],
    old_num_partitions: u32,
    new_num_partitions: u32,
  ) -> f64 {
    if sample_keys.is_empty() {
      return 0.0;
    }
    let moved = sample_keys
      .iter()
      .filter(|key| {
        matches!(
          needs_rebalance(partitioner, key, old_num_partitions, new_num_partitions),
          Some((_, _, true))
        )
      })
      .count();
    moved as f64 / sample_keys.len() as f64
  }
}
