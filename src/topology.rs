//! # Cluster Topology
//!
//! The live, versioned view of which nodes exist and which partitions they own.
//!
//! A [`Topology`] holds one immutable [`TopologySnapshot`] at a time. Membership
//! changes from the coordination layer arrive through [`Topology::apply`]; each
//! change builds a new snapshot, swaps it in, then notifies the registered
//! [`TopologyChangeListener`]s. A listener that reads the topology from inside
//! its callback always sees the new snapshot.
//!
//! Losing the coordination link is reported as [`TopologyEvent::Unavailable`]
//! and reads fail with [`TopologyError::Unavailable`]; it is never treated as a
//! cluster of zero members.
//!
//! Topologies are plain values shared through `Arc`, so independent clusters
//! can coexist in one process.

use crate::config::ClusterConfig;
use crate::error::TopologyError;
use crate::partitioner::PartitionIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
  /// Partition owned by the node.
  pub partition: PartitionIndex,
  /// Host name or IP address.
  pub host: String,
  /// Transport port.
  pub port: u16,
  /// Coordination-layer task identifier.
  #[serde(default)]
  pub task_id: String,
}

impl NodeDescriptor {
  /// Creates a descriptor with an empty task id.
  pub fn new(partition: PartitionIndex, host: impl Into<String>, port: u16) -> Self {
    Self {
      partition,
      host: host.into(),
      port,
      task_id: String::new(),
    }
  }

  /// Sets the task id.
  #[must_use]
  pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
    self.task_id = task_id.into();
    self
  }

  /// `host:port` address of the node's transport endpoint.
  pub fn address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

impl fmt::Display for NodeDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{{partition={},address={},task={}}}",
      self.partition,
      self.address(),
      self.task_id
    )
  }
}

/// Immutable membership at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
  version: u64,
  partition_count: u32,
  fixed_partitions: Option<u32>,
  nodes: Vec<NodeDescriptor>,
}

impl TopologySnapshot {
  fn build(version: u64, nodes: Vec<NodeDescriptor>, fixed_partitions: Option<u32>) -> Self {
    let partition_count = fixed_partitions.unwrap_or(nodes.len() as u32);
    Self::sized(version, nodes, partition_count, fixed_partitions.is_some())
  }

  fn sized(version: u64, mut nodes: Vec<NodeDescriptor>, partition_count: u32, fixed: bool) -> Self {
    nodes.sort_by(|a, b| a.partition.cmp(&b.partition).then_with(|| a.task_id.cmp(&b.task_id)));
    Self {
      version,
      partition_count,
      fixed_partitions: fixed.then_some(partition_count),
      nodes,
    }
  }

  /// Monotonic version, bumped on every change.
  pub fn version(&self) -> u64 {
    self.version
  }

  /// Number of partitions keys are spread over.
  ///
  /// Unless configured as fixed, it is derived from the members when the
  /// topology is built or replaced, and grows when a node joins past it. A
  /// leaving node never shrinks it.
  pub fn partition_count(&self) -> u32 {
    self.partition_count
  }

  /// Members ordered by partition.
  pub fn members(&self) -> &[NodeDescriptor] {
    &self.nodes
  }

  /// The node that owns a partition, if any.
  pub fn node_for(&self, partition: PartitionIndex) -> Option<&NodeDescriptor> {
    self.nodes.iter().find(|n| n.partition == partition)
  }

  /// Returns true if the snapshot has no partitions.
  pub fn is_empty(&self) -> bool {
    self.partition_count == 0
  }
}

/// Notification delivered to listeners.
#[derive(Debug, Clone)]
pub enum TopologyEvent {
  /// Membership changed; carries the new snapshot.
  Changed(Arc<TopologySnapshot>),
  /// The coordination link is lost; membership is unknown.
  Unavailable,
}

/// Receives topology notifications.
///
/// Called synchronously on the thread applying the change. Implementations
/// must not call [`Topology::apply`] from inside the callback.
pub trait TopologyChangeListener: Send + Sync {
  /// Handles one change.
  fn on_change(&self, event: &TopologyEvent);
}

impl<F> TopologyChangeListener for F
where
  F: Fn(&TopologyEvent) + Send + Sync,
{
  fn on_change(&self, event: &TopologyEvent) {
    self(event)
  }
}

/// A membership change pushed by the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
  /// A node joined, or re-registered for its partition.
  Join(NodeDescriptor),
  /// The node owning the partition left.
  Leave(PartitionIndex),
  /// Full membership replacement, e.g. after reconnecting.
  Replace {
    /// New members.
    nodes: Vec<NodeDescriptor>,
    /// Fixed partition count; `None` derives it from the member count.
    partition_count: Option<u32>,
  },
  /// The coordination link is lost.
  ConnectionLost,
}

#[derive(Debug, Clone)]
enum State {
  Known(Arc<TopologySnapshot>),
  Unknown { last_known: Arc<TopologySnapshot> },
}

/// The authoritative membership of one cluster.
pub struct Topology {
  name: String,
  state: RwLock<State>,
  listeners: Mutex<Vec<Arc<dyn TopologyChangeListener>>>,
  writer: Mutex<()>,
}

impl Topology {
  /// Creates an empty topology with zero partitions.
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_snapshot(name, TopologySnapshot::build(0, Vec::new(), None))
  }

  /// Creates a topology whose partition count equals the member count.
  pub fn with_nodes(name: impl Into<String>, nodes: Vec<NodeDescriptor>) -> Self {
    Self::with_snapshot(name, TopologySnapshot::build(0, nodes, None))
  }

  /// Creates a topology from a static cluster description.
  ///
  /// # Errors
  ///
  /// `InvalidConfig` if two nodes claim the same partition or a node's
  /// partition is outside the configured partition count.
  pub fn from_config(config: &ClusterConfig) -> Result<Self, TopologyError> {
    config.validate()?;
    Ok(Self::with_snapshot(
      config.name.clone(),
      TopologySnapshot::build(0, config.nodes.clone(), config.partition_count),
    ))
  }

  fn with_snapshot(name: impl Into<String>, snapshot: TopologySnapshot) -> Self {
    Self {
      name: name.into(),
      state: RwLock::new(State::Known(Arc::new(snapshot))),
      listeners: Mutex::new(Vec::new()),
      writer: Mutex::new(()),
    }
  }

  /// Cluster name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Returns the current snapshot.
  ///
  /// # Errors
  ///
  /// `Unavailable` while the coordination link is lost.
  pub fn snapshot(&self) -> Result<Arc<TopologySnapshot>, TopologyError> {
    match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
      State::Known(snapshot) => Ok(Arc::clone(snapshot)),
      State::Unknown { .. } => Err(TopologyError::Unavailable),
    }
  }

  /// Returns the current members ordered by partition.
  pub fn current_members(&self) -> Result<Vec<NodeDescriptor>, TopologyError> {
    Ok(self.snapshot()?.members().to_vec())
  }

  /// Returns the current partition count.
  pub fn partition_count(&self) -> Result<u32, TopologyError> {
    Ok(self.snapshot()?.partition_count())
  }

  /// Returns true while membership is known.
  pub fn is_available(&self) -> bool {
    self.snapshot().is_ok()
  }

  /// Registers a listener. Registering the same listener twice is a no-op.
  pub fn add_listener(&self, listener: Arc<dyn TopologyChangeListener>) {
    let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    if listeners.iter().any(|l| same_listener(l, &listener)) {
      return;
    }
    debug!(cluster = %self.name, "adding topology change listener");
    listeners.push(listener);
  }

  /// Unregisters a listener. Removing an unknown listener is a no-op.
  pub fn remove_listener(&self, listener: &Arc<dyn TopologyChangeListener>) {
    let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    let before = listeners.len();
    listeners.retain(|l| !same_listener(l, listener));
    if listeners.len() != before {
      debug!(cluster = %self.name, "removed topology change listener");
    }
  }

  /// Number of registered listeners.
  pub fn listener_count(&self) -> usize {
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Applies a membership change, then notifies every listener once.
  ///
  /// `Join` and `Leave` keep the partition count. A join for a partition past
  /// a derived count grows the count to include it; a departed node leaves
  /// its partition without an owner instead of shrinking the cluster.
  ///
  /// # Errors
  ///
  /// `InvalidConfig` if the resulting membership is inconsistent. The current
  /// snapshot is kept and no listener is notified.
  pub fn apply(&self, change: MembershipChange) -> Result<(), TopologyError> {
    let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

    let event = {
      let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
      let base = match &*state {
        State::Known(snapshot) => Arc::clone(snapshot),
        State::Unknown { last_known } => Arc::clone(last_known),
      };
      let next = match change {
        MembershipChange::ConnectionLost => None,
        MembershipChange::Join(node) => {
          let (partition_count, fixed) = match base.fixed_partitions {
            Some(count) => (count, true),
            None => (base.partition_count.max(node.partition.saturating_add(1)), false),
          };
          let mut nodes: Vec<NodeDescriptor> = base
            .nodes
            .iter()
            .filter(|n| n.partition != node.partition)
            .cloned()
            .collect();
          nodes.push(node);
          validate_members(&nodes, partition_count)?;
          Some(TopologySnapshot::sized(
            base.version + 1,
            nodes,
            partition_count,
            fixed,
          ))
        }
        MembershipChange::Leave(partition) => {
          let nodes = base
            .nodes
            .iter()
            .filter(|n| n.partition != partition)
            .cloned()
            .collect();
          Some(TopologySnapshot::sized(
            base.version + 1,
            nodes,
            base.partition_count,
            base.fixed_partitions.is_some(),
          ))
        }
        MembershipChange::Replace {
          nodes,
          partition_count,
        } => {
          let count = partition_count.unwrap_or(nodes.len() as u32);
          validate_members(&nodes, count)?;
          Some(TopologySnapshot::build(base.version + 1, nodes, partition_count))
        }
      };

      match next {
        Some(snapshot) => {
          let snapshot = Arc::new(snapshot);
          info!(
            cluster = %self.name,
            version = snapshot.version(),
            partitions = snapshot.partition_count(),
            members = snapshot.members().len(),
            "changing cluster topology"
          );
          crate::metrics::record_topology(snapshot.version(), snapshot.partition_count());
          *state = State::Known(Arc::clone(&snapshot));
          TopologyEvent::Changed(snapshot)
        }
        None => {
          warn!(
            cluster = %self.name,
            version = base.version(),
            "coordination link lost, cluster topology unknown"
          );
          *state = State::Unknown { last_known: base };
          TopologyEvent::Unavailable
        }
      }
    };

    let listeners: Vec<Arc<dyn TopologyChangeListener>> = self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    for listener in listeners {
      listener.on_change(&event);
    }
    Ok(())
  }
}

impl fmt::Debug for Topology {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Topology")
      .field("name", &self.name)
      .field("snapshot", &self.snapshot().ok())
      .finish()
  }
}

fn same_listener(a: &Arc<dyn TopologyChangeListener>, b: &Arc<dyn TopologyChangeListener>) -> bool {
  std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ClusterConfig {
  /// Checks partition ownership is unique and within range.
  pub fn validate(&self) -> Result<(), TopologyError> {
    let count = self.partition_count.unwrap_or(self.nodes.len() as u32);
    validate_members(&self.nodes, count)
  }
}

fn validate_members(nodes: &[NodeDescriptor], partition_count: u32) -> Result<(), TopologyError> {
  let mut seen = HashSet::new();
  for node in nodes {
    if !seen.insert(node.partition) {
      return Err(TopologyError::InvalidConfig(format!(
        "partition {} is assigned to more than one node",
        node.partition
      )));
    }
    if node.partition >= partition_count {
      return Err(TopologyError::InvalidConfig(format!(
        "node {} owns partition {} but the cluster has {} partitions",
        node.address(),
        node.partition,
        partition_count
      )));
    }
  }
  Ok(())
}
