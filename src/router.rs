//! # Event Router
//!
//! The emit path: stream lookup, key extraction, partitioning, encoding and
//! sending. Each stream registers the key extractor that decides which
//! partition, and on that partition which processing-unit instance, an event
//! belongs to.
//!
//! ```rust,no_run
//! use keyweave::codec::JsonCodec;
//! use keyweave::event::Event;
//! use keyweave::hashing::HashAlgorithm;
//! use keyweave::partitioner::{FieldKeyExtractor, HashPartitioner};
//! use keyweave::router::EventRouter;
//! use keyweave::topology::{NodeDescriptor, Topology};
//! use keyweave::transport::in_process::LocalNetwork;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> keyweave::Result<()> {
//! let network = LocalNetwork::new();
//! let topology = Arc::new(Topology::with_nodes(
//!   "demo",
//!   vec![NodeDescriptor::new(0, "local", 1)],
//! ));
//! let router = EventRouter::new(
//!   Arc::new(network.sender(Arc::clone(&topology))),
//!   topology,
//!   Arc::new(HashPartitioner::new(HashAlgorithm::Native)),
//!   Arc::new(JsonCodec),
//! );
//! router.register_stream("clicks", Arc::new(FieldKeyExtractor::new(["user"])));
//! router
//!   .emit("clicks", Event::new("Click").with_field("user", json!("u-1")))
//!   .await?;
//! # Ok(())
//! # }
//! ```

use crate::codec::Codec;
use crate::error::{Error, RoutingError, TopologyError, TransportError};
use crate::event::Event;
use crate::partitioner::{KeyExtractor, PartitionIndex, Partitioner};
use crate::topology::{Topology, TopologySnapshot};
use crate::transport::{Sender, send_in_cancellable};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Routes emitted events to their owning partitions.
pub struct EventRouter {
  sender: Arc<dyn Sender>,
  topology: Arc<Topology>,
  partitioner: Arc<dyn Partitioner>,
  codec: Arc<dyn Codec>,
  streams: RwLock<HashMap<String, Arc<dyn KeyExtractor>>>,
}

impl EventRouter {
  /// Creates a router without streams.
  pub fn new(
    sender: Arc<dyn Sender>,
    topology: Arc<Topology>,
    partitioner: Arc<dyn Partitioner>,
    codec: Arc<dyn Codec>,
  ) -> Self {
    Self {
      sender,
      topology,
      partitioner,
      codec,
      streams: RwLock::new(HashMap::new()),
    }
  }

  /// Registers the key extractor of a stream, replacing any previous one.
  pub fn register_stream(&self, stream: impl Into<String>, extractor: Arc<dyn KeyExtractor>) {
    let stream = stream.into();
    debug!(%stream, "registered stream");
    self
      .streams
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(stream, extractor);
  }

  /// Computes the partition `event` would be sent to on `stream`.
  ///
  /// # Errors
  ///
  /// `UnknownStream` for an unregistered stream, otherwise the errors of
  /// [`Partitioner::route`].
  pub fn partition_for(&self, stream: &str, event: &Event) -> Result<PartitionIndex, RoutingError> {
    let extractor = self.extractor(stream)?;
    self
      .partitioner
      .route(event, extractor.as_ref(), &self.topology)
  }

  /// Sends `event` on `stream` to the partition owning its key.
  ///
  /// The partition and its owner come from one topology snapshot. Waits until
  /// the owning listener takes the event. Returns the partition.
  ///
  /// # Errors
  ///
  /// Routing, serialization and transport errors. Nothing is sent when
  /// routing fails.
  pub async fn emit(&self, stream: &str, event: Event) -> Result<PartitionIndex, Error> {
    let (snapshot, partition, payload) = self.prepare(stream, event)?;
    self.sender.send_in(&snapshot, partition, payload).await?;
    Ok(partition)
  }

  /// As [`emit`](Self::emit), giving up when `cancel` fires.
  ///
  /// # Errors
  ///
  /// `Interrupted` on cancellation; the token stays cancelled.
  pub async fn emit_cancellable(
    &self,
    stream: &str,
    event: Event,
    cancel: &CancellationToken,
  ) -> Result<PartitionIndex, Error> {
    let (snapshot, partition, payload) = self.prepare(stream, event)?;
    send_in_cancellable(self.sender.as_ref(), &snapshot, partition, payload, cancel).await?;
    Ok(partition)
  }

  /// Sends `event` on `stream` to every owned partition and returns how many
  /// were reached.
  ///
  /// Stops at the first transport failure.
  ///
  /// # Errors
  ///
  /// `TopologyUnavailable` while membership is unknown, `NoAvailablePartition`
  /// for an empty topology, otherwise serialization and transport errors.
  pub async fn broadcast(&self, stream: &str, event: Event) -> Result<u32, Error> {
    self.extractor(stream)?;
    let snapshot = self.snapshot()?;
    if snapshot.is_empty() {
      return Err(RoutingError::NoAvailablePartition.into());
    }
    let payload = self.codec.encode(&event.with_stream(stream))?;
    let mut reached = 0;
    for partition in 0..snapshot.partition_count() {
      match self.sender.send_in(&snapshot, partition, payload.clone()).await {
        Ok(()) => reached += 1,
        // Sparse clusters leave some partitions without an owner.
        Err(TransportError::UnknownPartition(p)) => {
          warn!(stream, partition = p, "no owner for partition, skipping broadcast");
        }
        Err(e) => return Err(e.into()),
      }
    }
    Ok(reached)
  }

  fn prepare(
    &self,
    stream: &str,
    event: Event,
  ) -> Result<(Arc<TopologySnapshot>, PartitionIndex, bytes::Bytes), Error> {
    let event = event.with_stream(stream);
    let key = self.extractor(stream)?.extract(&event)?;
    let snapshot = self.snapshot()?;
    let partition = self.partitioner.partition_in(&key, &snapshot)?;
    let payload = self.codec.encode(&event)?;
    Ok((snapshot, partition, payload))
  }

  fn snapshot(&self) -> Result<Arc<TopologySnapshot>, RoutingError> {
    self.topology.snapshot().map_err(|err| match err {
      TopologyError::Unavailable => RoutingError::TopologyUnavailable,
      TopologyError::InvalidConfig(_) => RoutingError::NoAvailablePartition,
    })
  }

  fn extractor(&self, stream: &str) -> Result<Arc<dyn KeyExtractor>, RoutingError> {
    self
      .streams
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(stream)
      .cloned()
      .ok_or_else(|| RoutingError::UnknownStream(stream.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::JsonCodec;
  use crate::hashing::HashAlgorithm;
  use crate::partitioner::{FieldKeyExtractor, HashPartitioner};
  use crate::topology::{MembershipChange, NodeDescriptor};
  use crate::transport::Listener;
  use crate::transport::loopback::LoopbackTransport;
  use serde_json::json;

  fn loopback_router() -> (EventRouter, Arc<LoopbackTransport>, Arc<Topology>) {
    let transport = Arc::new(LoopbackTransport::new());
    let topology = Arc::new(Topology::with_nodes(
      "loop",
      vec![NodeDescriptor::new(0, "local", 1)],
    ));
    let router = EventRouter::new(
      transport.clone(),
      Arc::clone(&topology),
      Arc::new(HashPartitioner::new(HashAlgorithm::Native)),
      Arc::new(JsonCodec),
    );
    router.register_stream("clicks", Arc::new(FieldKeyExtractor::new(["user"])));
    (router, transport, topology)
  }

  #[tokio::test]
  async fn test_emit_encodes_with_stream_name() {
    let (router, transport, _topology) = loopback_router();
    let listening = Arc::clone(&transport);
    let receiving = tokio::spawn(async move { listening.recv().await });

    let partition = router
      .emit("clicks", Event::new("Click").with_field("user", json!("u-1")))
      .await
      .unwrap();
    assert_eq!(partition, 0);

    let bytes = receiving.await.unwrap().unwrap();
    let event = JsonCodec.decode(&bytes).unwrap();
    assert_eq!(event.stream(), "clicks");
    assert_eq!(event.field_str("user").as_deref(), Some("u-1"));
  }

  #[tokio::test]
  async fn test_unknown_stream() {
    let (router, _transport, _topology) = loopback_router();
    let err = router.emit("views", Event::new("View")).await.unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::UnknownStream(_))));
  }

  #[tokio::test]
  async fn test_missing_key_field_sends_nothing() {
    let (router, _transport, _topology) = loopback_router();
    let err = router.emit("clicks", Event::new("Click")).await.unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::KeyExtraction(_))));
  }

  #[tokio::test]
  async fn test_unavailable_topology_halts_routing() {
    let (router, _transport, topology) = loopback_router();
    topology.apply(MembershipChange::ConnectionLost).unwrap();
    let event = Event::new("Click").with_field("user", json!("u-1"));
    let err = router.emit("clicks", event.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::TopologyUnavailable)));
    let err = router.broadcast("clicks", event).await.unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::TopologyUnavailable)));
  }

  #[tokio::test]
  async fn test_empty_topology() {
    let (router, _transport, topology) = loopback_router();
    topology
      .apply(MembershipChange::Replace {
        nodes: Vec::new(),
        partition_count: None,
      })
      .unwrap();
    let event = Event::new("Click").with_field("user", json!("u-1"));
    let err = router.emit("clicks", event).await.unwrap_err();
    assert!(matches!(err, Error::Routing(RoutingError::NoAvailablePartition)));
  }

  #[tokio::test]
  async fn test_emit_cancellable() {
    let (router, _transport, _topology) = loopback_router();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let event = Event::new("Click").with_field("user", json!("u-1"));
    let err = router
      .emit_cancellable("clicks", event, &cancel)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Interrupted)));
    assert!(cancel.is_cancelled());
  }

  #[tokio::test]
  async fn test_broadcast_skips_unowned_partitions() {
    let transport = Arc::new(LoopbackTransport::new());
    let config = crate::config::ClusterConfig {
      name: "sparse".to_string(),
      partition_count: Some(3),
      nodes: vec![NodeDescriptor::new(0, "local", 1)],
    };
    let topology = Arc::new(Topology::from_config(&config).unwrap());
    let router = EventRouter::new(
      transport.clone(),
      topology,
      Arc::new(HashPartitioner::default()),
      Arc::new(JsonCodec),
    );
    router.register_stream("clicks", Arc::new(FieldKeyExtractor::new(["user"])));
    let listening = Arc::clone(&transport);
    let receiving = tokio::spawn(async move { listening.recv().await });

    let reached = router
      .broadcast("clicks", Event::new("Reset").with_field("user", json!("all")))
      .await
      .unwrap();
    assert_eq!(reached, 1);
    assert!(receiving.await.unwrap().is_ok());
  }

  /// Records the snapshot each send was resolved against.
  #[derive(Default)]
  struct SnapshotRecorder {
    seen: std::sync::Mutex<Vec<(u64, u32, PartitionIndex)>>,
  }

  #[async_trait::async_trait]
  impl Sender for SnapshotRecorder {
    async fn send(&self, _: PartitionIndex, _: bytes::Bytes) -> Result<(), TransportError> {
      Err(TransportError::Closed)
    }

    async fn send_in(
      &self,
      snapshot: &TopologySnapshot,
      partition: PartitionIndex,
      _: bytes::Bytes,
    ) -> Result<(), TransportError> {
      self.seen.lock().unwrap().push((
        snapshot.version(),
        snapshot.partition_count(),
        partition,
      ));
      Ok(())
    }

    fn partition_count(&self) -> u32 {
      0
    }

    async fn close(&self) {}
  }

  #[tokio::test]
  async fn test_owner_resolved_from_routing_snapshot() {
    let recorder = Arc::new(SnapshotRecorder::default());
    let topology = Arc::new(Topology::with_nodes(
      "resize",
      (0..2).map(|p| NodeDescriptor::new(p, "local", 7000 + p as u16)).collect(),
    ));
    let router = EventRouter::new(
      recorder.clone(),
      Arc::clone(&topology),
      Arc::new(HashPartitioner::new(HashAlgorithm::Native)),
      Arc::new(JsonCodec),
    );
    router.register_stream("clicks", Arc::new(FieldKeyExtractor::new(["user"])));
    let click = || Event::new("Click").with_field("user", json!("u-7"));

    let before = router.emit("clicks", click()).await.unwrap();
    topology
      .apply(MembershipChange::Join(NodeDescriptor::new(4, "local", 7004)))
      .unwrap();
    let after = router.emit("clicks", click()).await.unwrap();

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(0, 2, before), (1, 5, after)]);
  }
}
