//! Single-partition, in-process transport.
//!
//! Sender and listener share one handoff channel, which makes the loopback
//! the simplest way to drive a [`Receiver`](crate::receiver::Receiver) in a
//! one-node deployment or a test.

use super::handoff::{HandoffReceiver, HandoffSender, handoff};
use super::{Listener, Sender};
use crate::error::TransportError;
use crate::partitioner::PartitionIndex;
use async_trait::async_trait;
use bytes::Bytes;

/// Loopback transport serving partition 0.
pub struct LoopbackTransport {
  tx: HandoffSender,
  rx: HandoffReceiver,
}

impl LoopbackTransport {
  /// Creates a loopback transport.
  pub fn new() -> Self {
    let (tx, rx) = handoff(0);
    Self { tx, rx }
  }
}

impl Default for LoopbackTransport {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Sender for LoopbackTransport {
  async fn send(&self, partition: PartitionIndex, payload: Bytes) -> Result<(), TransportError> {
    if partition != 0 {
      return Err(TransportError::UnknownPartition(partition));
    }
    self.tx.deliver(payload).await?;
    crate::metrics::record_event_sent(partition);
    Ok(())
  }

  fn partition_count(&self) -> u32 {
    1
  }

  async fn close(&self) {
    self.rx.close();
  }
}

#[async_trait]
impl Listener for LoopbackTransport {
  async fn recv(&self) -> Result<Bytes, TransportError> {
    self.rx.recv().await
  }

  fn partition_id(&self) -> PartitionIndex {
    0
  }

  fn close(&self) {
    self.rx.close();
  }
}
