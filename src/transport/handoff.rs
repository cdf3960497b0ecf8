//! Zero-buffer rendezvous channel.
//!
//! [`HandoffSender::deliver`] returns only after a [`HandoffReceiver`] has
//! taken the payload. Each payload travels with a one-shot acknowledgement;
//! the receiver fires it as it takes the payload. A payload whose sender gave
//! up before the acknowledgement is discarded by the receiver, so a cancelled
//! send is never delivered after the fact.

use crate::error::TransportError;
use crate::partitioner::PartitionIndex;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct Envelope {
  payload: Bytes,
  ack: oneshot::Sender<()>,
}

/// Sending half of a handoff channel.
#[derive(Clone)]
pub struct HandoffSender {
  partition: PartitionIndex,
  tx: mpsc::Sender<Envelope>,
  shutdown: CancellationToken,
}

/// Receiving half of a handoff channel.
pub struct HandoffReceiver {
  partition: PartitionIndex,
  rx: Mutex<mpsc::Receiver<Envelope>>,
  shutdown: CancellationToken,
}

/// Creates a handoff channel for one partition.
pub fn handoff(partition: PartitionIndex) -> (HandoffSender, HandoffReceiver) {
  let (tx, rx) = mpsc::channel(1);
  let shutdown = CancellationToken::new();
  (
    HandoffSender {
      partition,
      tx,
      shutdown: shutdown.clone(),
    },
    HandoffReceiver {
      partition,
      rx: Mutex::new(rx),
      shutdown,
    },
  )
}

impl HandoffSender {
  /// Hands `payload` to the receiver and waits until it is taken.
  ///
  /// # Errors
  ///
  /// `Closed` if the receiver is closed or dropped.
  pub async fn deliver(&self, payload: Bytes) -> Result<(), TransportError> {
    let (ack, taken) = oneshot::channel();
    let envelope = Envelope { payload, ack };
    tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => Err(TransportError::Closed),
      result = async {
        self.tx.send(envelope).await.map_err(|_| TransportError::Closed)?;
        taken.await.map_err(|_| TransportError::Closed)
      } => result,
    }
  }

  /// Partition served by the receiving half.
  pub fn partition(&self) -> PartitionIndex {
    self.partition
  }

  /// Returns true once the receiver is closed or dropped.
  pub fn is_closed(&self) -> bool {
    self.shutdown.is_cancelled() || self.tx.is_closed()
  }
}

impl HandoffReceiver {
  /// Takes the next payload.
  ///
  /// # Errors
  ///
  /// `Interrupted` after [`close`](Self::close), `Closed` once every sender
  /// is dropped.
  pub async fn recv(&self) -> Result<Bytes, TransportError> {
    tokio::select! {
      biased;
      _ = self.shutdown.cancelled() => Err(TransportError::Interrupted),
      result = self.take() => result,
    }
  }

  async fn take(&self) -> Result<Bytes, TransportError> {
    let mut rx = self.rx.lock().await;
    loop {
      let Some(envelope) = rx.recv().await else {
        return Err(TransportError::Closed);
      };
      if envelope.ack.send(()).is_ok() {
        return Ok(envelope.payload);
      }
      trace!(partition = self.partition, "discarding payload of an abandoned send");
    }
  }

  /// Partition served by this receiver.
  pub fn partition(&self) -> PartitionIndex {
    self.partition
  }

  /// Closes the channel. Blocked and future `recv` calls return
  /// `Interrupted`; pending and future sends return `Closed`.
  pub fn close(&self) {
    self.shutdown.cancel();
  }

  /// Returns true once [`close`](Self::close) was called.
  pub fn is_closed(&self) -> bool {
    self.shutdown.is_cancelled()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_send_waits_for_receiver() {
    let (tx, rx) = handoff(0);
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let sender = tokio::spawn(async move {
      tx.deliver(Bytes::from_static(b"m")).await.unwrap();
      flag.store(true, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!done.load(Ordering::SeqCst), "send completed before any receive");

    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"m"));
    sender.await.unwrap();
    assert!(done.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_close_unblocks_recv() {
    let (_tx, rx) = handoff(0);
    let rx = Arc::new(rx);
    let parked = Arc::clone(&rx);
    let waiter = tokio::spawn(async move { parked.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    rx.close();
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(result, Err(TransportError::Interrupted)));
  }

  #[tokio::test]
  async fn test_close_fails_pending_send() {
    let (tx, rx) = handoff(0);
    let pending = tokio::spawn(async move { tx.deliver(Bytes::from_static(b"m")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    rx.close();
    assert!(matches!(pending.await.unwrap(), Err(TransportError::Closed)));
  }

  #[tokio::test]
  async fn test_dropped_senders_close_receiver() {
    let (tx, rx) = handoff(0);
    drop(tx);
    assert!(matches!(rx.recv().await, Err(TransportError::Closed)));
  }

  #[tokio::test]
  async fn test_abandoned_send_is_not_delivered() {
    let (tx, rx) = handoff(0);
    let abandoned = tokio::time::timeout(
      Duration::from_millis(20),
      tx.deliver(Bytes::from_static(b"stale")),
    )
    .await;
    assert!(abandoned.is_err());

    let fresh = tx.clone();
    let sender = tokio::spawn(async move { fresh.deliver(Bytes::from_static(b"fresh")).await });
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"fresh"));
    sender.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_fifo_per_sender() {
    let (tx, rx) = handoff(2);
    let sender = tokio::spawn(async move {
      for payload in ["a", "b", "c"] {
        tx.deliver(Bytes::from(payload)).await.unwrap();
      }
    });
    let mut received = Vec::new();
    for _ in 0..3 {
      received.push(rx.recv().await.unwrap());
    }
    sender.await.unwrap();
    assert_eq!(received, vec!["a", "b", "c"]);
    assert_eq!(rx.partition(), 2);
  }

  #[tokio::test]
  async fn test_deliver_pending_until_taken() {
    let (tx, rx) = handoff(0);
    let mut delivery = tokio_test::task::spawn(tx.deliver(Bytes::from_static(b"m")));
    tokio_test::assert_pending!(delivery.poll());
    tokio_test::assert_pending!(delivery.poll());

    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"m"));
    assert!(delivery.is_woken());
    tokio_test::assert_ready_ok!(delivery.poll());
  }
}
