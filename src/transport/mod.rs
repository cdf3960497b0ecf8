//! # Transport
//!
//! Moves opaque byte payloads from a sender to the listener that owns a
//! partition.
//!
//! Every listener receives through a zero-buffer handoff: a send completes only
//! once the listener has taken the payload, so a slow consumer pushes back on
//! its producers. [`BufferedListener`](buffered::BufferedListener) trades that
//! for a bounded queue that drops on overflow.
//!
//! ## Implementations
//!
//! - [`loopback`]: one partition, in process.
//! - [`in_process`]: a local network of per-partition listeners resolved
//!   through the [`Topology`](crate::topology::Topology).
//! - [`tcp`]: length-delimited frames over TCP.
//! - [`buffered`]: bounded, lossy buffer in front of any listener.
//!
//! [`factory::TransportFactory`] builds the configured kind from
//! [`TransportConfig`](crate::config::TransportConfig).
//!
//! Shutdown is cooperative. `close` on a listener wakes a blocked `recv` with
//! [`TransportError::Interrupted`]; a cancelled token wakes a blocked send the
//! same way through [`send_cancellable`].

use crate::error::TransportError;
use crate::partitioner::PartitionIndex;
use crate::topology::TopologySnapshot;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub mod buffered;
pub mod factory;
pub mod handoff;
pub mod in_process;
pub mod loopback;
pub mod tcp;

/// Sends payloads to partitions.
#[async_trait]
pub trait Sender: Send + Sync {
  /// Delivers `payload` to the listener owning `partition`.
  ///
  /// Blocks until the listener takes the payload.
  ///
  /// # Errors
  ///
  /// `UnknownPartition` when nothing serves the partition, `Closed` when the
  /// listener is gone, `Io`/`Timeout` for network failures.
  async fn send(&self, partition: PartitionIndex, payload: Bytes) -> Result<(), TransportError>;

  /// Delivers `payload` to the owner of `partition` in `snapshot`.
  ///
  /// Routers pass the snapshot the partition was computed from, so the owner
  /// is resolved against the same membership even if the topology changes
  /// in between. Senders that do not consult a topology ignore it.
  async fn send_in(
    &self,
    _snapshot: &TopologySnapshot,
    partition: PartitionIndex,
    payload: Bytes,
  ) -> Result<(), TransportError> {
    self.send(partition, payload).await
  }

  /// Number of partitions the sender can reach.
  fn partition_count(&self) -> u32;

  /// Releases connections. Further sends fail with `Closed`.
  async fn close(&self);
}

/// Receives payloads for one partition.
#[async_trait]
pub trait Listener: Send + Sync {
  /// Waits for the next payload.
  ///
  /// # Errors
  ///
  /// `Interrupted` once the listener is closed, `Closed` when every sender is
  /// gone.
  async fn recv(&self) -> Result<Bytes, TransportError>;

  /// Partition served by this listener.
  fn partition_id(&self) -> PartitionIndex;

  /// Stops the listener and wakes any blocked `recv`.
  fn close(&self);
}

/// Sends through `sender`, giving up when `cancel` fires.
///
/// A cancelled send returns `Interrupted`; the payload may or may not have
/// been delivered. The token stays cancelled so the caller's loop observes it.
pub async fn send_cancellable(
  sender: &dyn Sender,
  partition: PartitionIndex,
  payload: Bytes,
  cancel: &CancellationToken,
) -> Result<(), TransportError> {
  cancellable(partition, sender.send(partition, payload), cancel).await
}

/// As [`send_cancellable`], resolving the owner in `snapshot`.
pub async fn send_in_cancellable(
  sender: &dyn Sender,
  snapshot: &TopologySnapshot,
  partition: PartitionIndex,
  payload: Bytes,
  cancel: &CancellationToken,
) -> Result<(), TransportError> {
  cancellable(partition, sender.send_in(snapshot, partition, payload), cancel).await
}

async fn cancellable(
  partition: PartitionIndex,
  send: impl Future<Output = Result<(), TransportError>>,
  cancel: &CancellationToken,
) -> Result<(), TransportError> {
  tokio::select! {
    biased;
    result = send => result,
    _ = cancel.cancelled() => {
      error!(partition, "interrupted while sending to partition");
      Err(TransportError::Interrupted)
    }
  }
}
