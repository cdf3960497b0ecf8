//! Bounded buffer in front of a listener.
//!
//! A pump task drains the inner listener into a bounded queue, so senders to
//! that listener no longer wait for the consumer. When the queue is full the
//! payload is dropped and counted instead of blocking the pump.
//!
//! Closing stops the pump but keeps what was already queued: `recv` drains the
//! queue before it reports `Interrupted`.

use super::Listener;
use crate::error::TransportError;
use crate::partitioner::PartitionIndex;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Listener wrapper with a bounded, lossy buffer.
pub struct BufferedListener {
  inner: Arc<dyn Listener>,
  rx: Mutex<mpsc::Receiver<Bytes>>,
  dropped: Arc<AtomicU64>,
  shutdown: CancellationToken,
}

impl BufferedListener {
  /// Wraps `inner` with a buffer of `capacity` payloads (at least one).
  ///
  /// Must be called within a tokio runtime.
  pub fn new(inner: Arc<dyn Listener>, capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let shutdown = CancellationToken::new();
    tokio::spawn(pump(
      Arc::clone(&inner),
      tx,
      Arc::clone(&dropped),
      shutdown.clone(),
    ));
    debug!(partition = inner.partition_id(), capacity, "buffered listener started");
    Self {
      inner,
      rx: Mutex::new(rx),
      dropped,
      shutdown,
    }
  }

  /// Number of payloads dropped because the buffer was full.
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }
}

async fn pump(
  inner: Arc<dyn Listener>,
  tx: mpsc::Sender<Bytes>,
  dropped: Arc<AtomicU64>,
  shutdown: CancellationToken,
) {
  let partition = inner.partition_id();
  loop {
    let payload = tokio::select! {
      biased;
      _ = shutdown.cancelled() => break,
      payload = inner.recv() => payload,
    };
    match payload {
      Ok(payload) => match tx.try_send(payload) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
          let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
          crate::metrics::record_event_dropped(partition, "buffer_full");
          warn!(partition, dropped = total, "listener buffer full, dropping payload");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => break,
      },
      Err(e) => {
        debug!(partition, error = %e, "buffered listener pump stopped");
        break;
      }
    }
  }
}

#[async_trait]
impl Listener for BufferedListener {
  /// Waits for the next buffered payload.
  ///
  /// After [`close`](Listener::close) the payloads already queued are still
  /// returned; `Interrupted` follows once the queue is empty.
  async fn recv(&self) -> Result<Bytes, TransportError> {
    let mut rx = self.rx.lock().await;
    if self.shutdown.is_cancelled() {
      return rx.try_recv().map_err(|_| TransportError::Interrupted);
    }
    tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => rx.try_recv().map_err(|_| TransportError::Interrupted),
      payload = rx.recv() => payload.ok_or(TransportError::Closed),
    }
  }

  fn partition_id(&self) -> PartitionIndex {
    self.inner.partition_id()
  }

  fn close(&self) {
    self.shutdown.cancel();
    self.inner.close();
  }
}

impl Drop for BufferedListener {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::Sender;
  use crate::transport::loopback::LoopbackTransport;
  use std::time::Duration;

  #[tokio::test]
  async fn test_sender_does_not_wait_for_consumer() {
    let transport = Arc::new(LoopbackTransport::new());
    let buffered = BufferedListener::new(transport.clone(), 4);

    for payload in ["a", "b", "c"] {
      tokio::time::timeout(Duration::from_secs(1), transport.send(0, Bytes::from(payload)))
        .await
        .unwrap()
        .unwrap();
    }
    for expected in ["a", "b", "c"] {
      assert_eq!(buffered.recv().await.unwrap(), expected);
    }
    assert_eq!(buffered.dropped(), 0);
  }

  #[tokio::test]
  async fn test_full_buffer_drops_and_counts() {
    let transport = Arc::new(LoopbackTransport::new());
    let buffered = BufferedListener::new(transport.clone(), 1);

    for payload in ["a", "b", "c"] {
      transport.send(0, Bytes::from(payload)).await.unwrap();
    }
    // The pump hands the last payload off before it tries to enqueue it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(buffered.recv().await.unwrap(), "a");
    assert_eq!(buffered.dropped(), 2);
  }

  #[tokio::test]
  async fn test_zero_capacity_is_clamped() {
    let transport = Arc::new(LoopbackTransport::new());
    let buffered = BufferedListener::new(transport.clone(), 0);
    transport.send(0, Bytes::from_static(b"x")).await.unwrap();
    assert_eq!(buffered.recv().await.unwrap(), "x");
  }

  #[tokio::test]
  async fn test_close_unblocks_recv() {
    let transport = Arc::new(LoopbackTransport::new());
    let buffered = Arc::new(BufferedListener::new(transport, 2));
    let parked = Arc::clone(&buffered);
    let waiter = tokio::spawn(async move { parked.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    buffered.close();
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(result, Err(TransportError::Interrupted)));
    assert_eq!(buffered.partition_id(), 0);
  }

  #[tokio::test]
  async fn test_close_drains_queued_payloads() {
    let transport = Arc::new(LoopbackTransport::new());
    let buffered = BufferedListener::new(transport.clone(), 4);
    for payload in ["a", "b"] {
      transport.send(0, Bytes::from(payload)).await.unwrap();
    }
    // Let the pump enqueue the last payload it took.
    tokio::time::sleep(Duration::from_millis(20)).await;

    buffered.close();
    assert_eq!(buffered.recv().await.unwrap(), "a");
    assert_eq!(buffered.recv().await.unwrap(), "b");
    assert!(matches!(
      buffered.recv().await,
      Err(TransportError::Interrupted)
    ));
  }
}
