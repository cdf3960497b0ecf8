//! In-process network of per-partition listeners.
//!
//! A [`LocalNetwork`] maps node addresses to handoff channels. Each node binds
//! an [`InProcessListener`] under its descriptor's address; an
//! [`InProcessSender`] resolves the owner of a partition through a
//! [`Topology`] snapshot on every send, so membership changes take effect on
//! the next message without reconnecting.

use super::handoff::{HandoffReceiver, HandoffSender, handoff};
use super::{Listener, Sender};
use crate::error::TransportError;
use crate::partitioner::PartitionIndex;
use crate::topology::{NodeDescriptor, Topology, TopologySnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry of the endpoints bound in this process.
#[derive(Clone, Default)]
pub struct LocalNetwork {
  endpoints: Arc<Mutex<HashMap<String, HandoffSender>>>,
}

impl LocalNetwork {
  /// Creates an empty network.
  pub fn new() -> Self {
    Self::default()
  }

  /// Binds a listener for `node`, replacing any endpoint at the same address.
  pub fn bind(&self, node: &NodeDescriptor) -> InProcessListener {
    let (tx, rx) = handoff(node.partition);
    let address = node.address();
    let previous = self
      .endpoints
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(address.clone(), tx);
    if previous.is_some() {
      debug!(%address, "replacing in-process endpoint");
    }
    info!(%address, partition = node.partition, "in-process listener bound");
    InProcessListener {
      address,
      rx,
      network: self.clone(),
    }
  }

  /// Creates a sender that resolves partitions through `topology`.
  pub fn sender(&self, topology: Arc<Topology>) -> InProcessSender {
    InProcessSender {
      network: self.clone(),
      topology,
      closed: CancellationToken::new(),
    }
  }

  /// Number of bound endpoints.
  pub fn len(&self) -> usize {
    self.endpoints.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Returns true if no endpoint is bound.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn endpoint(&self, address: &str) -> Option<HandoffSender> {
    self
      .endpoints
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(address)
      .cloned()
  }

  fn unbind(&self, address: &str) {
    let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
    // Leave a newer binding at the same address in place.
    if endpoints.get(address).is_some_and(HandoffSender::is_closed) {
      endpoints.remove(address);
    }
  }
}

/// Listener bound into a [`LocalNetwork`].
pub struct InProcessListener {
  address: String,
  rx: HandoffReceiver,
  network: LocalNetwork,
}

impl InProcessListener {
  /// Address the listener is bound under.
  pub fn address(&self) -> &str {
    &self.address
  }
}

#[async_trait]
impl Listener for InProcessListener {
  async fn recv(&self) -> Result<Bytes, TransportError> {
    self.rx.recv().await
  }

  fn partition_id(&self) -> PartitionIndex {
    self.rx.partition()
  }

  fn close(&self) {
    if self.rx.is_closed() {
      return;
    }
    self.rx.close();
    self.network.unbind(&self.address);
    info!(address = %self.address, partition = self.rx.partition(), "in-process listener closed");
  }
}

impl Drop for InProcessListener {
  fn drop(&mut self) {
    self.rx.close();
    self.network.unbind(&self.address);
  }
}

/// Sender over a [`LocalNetwork`].
pub struct InProcessSender {
  network: LocalNetwork,
  topology: Arc<Topology>,
  closed: CancellationToken,
}

impl InProcessSender {
  fn resolve(
    &self,
    snapshot: &TopologySnapshot,
    partition: PartitionIndex,
  ) -> Result<HandoffSender, TransportError> {
    let node = snapshot
      .node_for(partition)
      .ok_or(TransportError::UnknownPartition(partition))?;
    self
      .network
      .endpoint(&node.address())
      .ok_or(TransportError::UnknownPartition(partition))
  }
}

#[async_trait]
impl Sender for InProcessSender {
  async fn send(&self, partition: PartitionIndex, payload: Bytes) -> Result<(), TransportError> {
    let snapshot = self
      .topology
      .snapshot()
      .map_err(|_| TransportError::TopologyUnavailable)?;
    self.send_in(&snapshot, partition, payload).await
  }

  async fn send_in(
    &self,
    snapshot: &TopologySnapshot,
    partition: PartitionIndex,
    payload: Bytes,
  ) -> Result<(), TransportError> {
    if self.closed.is_cancelled() {
      return Err(TransportError::Closed);
    }
    let endpoint = self.resolve(snapshot, partition)?;
    tokio::select! {
      biased;
      _ = self.closed.cancelled() => Err(TransportError::Closed),
      result = endpoint.deliver(payload) => {
        result?;
        crate::metrics::record_event_sent(partition);
        Ok(())
      }
    }
  }

  fn partition_count(&self) -> u32 {
    self.topology.partition_count().unwrap_or(0)
  }

  async fn close(&self) {
    self.closed.cancel();
  }
}
