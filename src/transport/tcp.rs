//! # TCP Transport
//!
//! Length-delimited frames over `tokio::net`.
//!
//! A [`TcpTransportListener`] accepts connections and feeds every frame into a
//! handoff channel. The connection reader waits for each frame to be taken,
//! so a slow consumer stalls the socket and TCP flow control pushes back on
//! the remote sender.
//!
//! A [`TcpSender`] keeps one connection per destination node, opened lazily
//! and resolved through the [`Topology`]. A failed write drops the connection
//! and the next send reconnects. Registered as a topology listener, it also
//! drops connections to nodes that left the cluster.
//!
//! ## Example
//!
//! ```rust,no_run
//! use keyweave::topology::{NodeDescriptor, Topology};
//! use keyweave::transport::tcp::{TcpSender, TcpTransportListener};
//! use keyweave::transport::{Listener, Sender};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), keyweave::error::TransportError> {
//! let listener = TcpTransportListener::bind("127.0.0.1:7000", 0).await?;
//! let topology = Arc::new(Topology::with_nodes(
//!   "demo",
//!   vec![NodeDescriptor::new(0, "127.0.0.1", 7000)],
//! ));
//! let sender = Arc::new(TcpSender::new(Arc::clone(&topology), Duration::from_secs(5)));
//! topology.add_listener(sender.clone());
//!
//! sender.send(0, "hello".into()).await?;
//! let frame = listener.recv().await?;
//! # Ok(())
//! # }
//! ```

use super::handoff::{HandoffReceiver, HandoffSender, handoff};
use super::{Listener, Sender};
use crate::error::TransportError;
use crate::partitioner::PartitionIndex;
use crate::topology::{Topology, TopologyChangeListener, TopologyEvent, TopologySnapshot};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Listener accepting length-delimited frames over TCP.
pub struct TcpTransportListener {
  partition: PartitionIndex,
  local_addr: SocketAddr,
  rx: HandoffReceiver,
  shutdown: CancellationToken,
}

impl TcpTransportListener {
  /// Binds `addr` and starts accepting connections for `partition`.
  ///
  /// Binding port 0 picks a free port; see [`local_addr`](Self::local_addr).
  ///
  /// # Errors
  ///
  /// `Io` if the address cannot be bound.
  pub async fn bind(
    addr: impl ToSocketAddrs,
    partition: PartitionIndex,
  ) -> Result<Self, TransportError> {
    let socket = TcpListener::bind(addr).await?;
    let local_addr = socket.local_addr()?;
    let (tx, rx) = handoff(partition);
    let shutdown = CancellationToken::new();
    info!(%local_addr, partition, "tcp listener bound");

    tokio::spawn(accept_loop(socket, tx, shutdown.clone()));

    Ok(Self {
      partition,
      local_addr,
      rx,
      shutdown,
    })
  }

  /// Address the listener is bound to.
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }
}

async fn accept_loop(socket: TcpListener, tx: HandoffSender, shutdown: CancellationToken) {
  loop {
    let accepted = tokio::select! {
      biased;
      _ = shutdown.cancelled() => break,
      accepted = socket.accept() => accepted,
    };
    match accepted {
      Ok((stream, peer)) => {
        debug!(%peer, partition = tx.partition(), "accepted connection");
        tokio::spawn(read_frames(stream, peer, tx.clone(), shutdown.child_token()));
      }
      Err(e) => {
        warn!(error = %e, "failed to accept connection");
      }
    }
  }
  debug!(partition = tx.partition(), "tcp accept loop stopped");
}

async fn read_frames(
  stream: TcpStream,
  peer: SocketAddr,
  tx: HandoffSender,
  shutdown: CancellationToken,
) {
  let mut frames = FramedRead::new(stream, LengthDelimitedCodec::new());
  loop {
    let frame = tokio::select! {
      biased;
      _ = shutdown.cancelled() => break,
      frame = frames.next() => frame,
    };
    match frame {
      Some(Ok(frame)) => {
        if tx.deliver(frame.freeze()).await.is_err() {
          break;
        }
      }
      Some(Err(e)) => {
        warn!(%peer, error = %e, "dropping connection after a malformed frame");
        break;
      }
      None => break,
    }
  }
  debug!(%peer, "connection closed");
}

#[async_trait]
impl Listener for TcpTransportListener {
  async fn recv(&self) -> Result<Bytes, TransportError> {
    self.rx.recv().await
  }

  fn partition_id(&self) -> PartitionIndex {
    self.partition
  }

  fn close(&self) {
    if self.shutdown.is_cancelled() {
      return;
    }
    self.shutdown.cancel();
    self.rx.close();
    info!(local_addr = %self.local_addr, partition = self.partition, "tcp listener closed");
  }
}

impl Drop for TcpTransportListener {
  fn drop(&mut self) {
    self.shutdown.cancel();
    self.rx.close();
  }
}

type Connection = Arc<tokio::sync::Mutex<FramedWrite<TcpStream, LengthDelimitedCodec>>>;

/// Sender writing length-delimited frames to the node owning a partition.
pub struct TcpSender {
  topology: Arc<Topology>,
  connect_timeout: Duration,
  connections: Mutex<HashMap<String, Connection>>,
  closed: CancellationToken,
}

impl TcpSender {
  /// Creates a sender resolving nodes through `topology`.
  pub fn new(topology: Arc<Topology>, connect_timeout: Duration) -> Self {
    Self {
      topology,
      connect_timeout,
      connections: Mutex::new(HashMap::new()),
      closed: CancellationToken::new(),
    }
  }

  /// Number of open connections.
  pub fn connection_count(&self) -> usize {
    self.lock_connections().len()
  }

  /// Drops connections to addresses not in `keep`.
  pub fn prune(&self, keep: &HashSet<String>) {
    let mut connections = self.lock_connections();
    let before = connections.len();
    connections.retain(|address, _| keep.contains(address));
    if connections.len() != before {
      debug!(dropped = before - connections.len(), "pruned tcp connections");
    }
  }

  fn lock_connections(&self) -> std::sync::MutexGuard<'_, HashMap<String, Connection>> {
    self.connections.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn connection(&self, address: &str) -> Result<Connection, TransportError> {
    if let Some(existing) = self.lock_connections().get(address) {
      return Ok(Arc::clone(existing));
    }

    let stream = timeout(self.connect_timeout, TcpStream::connect(address))
      .await
      .map_err(|_| TransportError::Timeout)??;
    stream.set_nodelay(true)?;
    debug!(%address, "opened tcp connection");

    let fresh = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
      stream,
      LengthDelimitedCodec::new(),
    )));
    // A concurrent send may have connected first; keep its connection.
    let connection = Arc::clone(
      self
        .lock_connections()
        .entry(address.to_string())
        .or_insert(fresh),
    );
    Ok(connection)
  }

  fn discard(&self, address: &str, connection: &Connection) {
    let mut connections = self.lock_connections();
    if connections
      .get(address)
      .is_some_and(|current| Arc::ptr_eq(current, connection))
    {
      connections.remove(address);
    }
  }
}

#[async_trait]
impl Sender for TcpSender {
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
    let address = snapshot
      .node_for(partition)
      .map(|node| node.address())
      .ok_or(TransportError::UnknownPartition(partition))?;

    let connection = self.connection(&address).await?;
    let written = {
      let mut framed = connection.lock().await;
      tokio::select! {
        biased;
        _ = self.closed.cancelled() => Err(TransportError::Closed),
        result = framed.send(payload) => result.map_err(TransportError::from),
      }
    };
    match written {
      Ok(()) => {
        crate::metrics::record_event_sent(partition);
        Ok(())
      }
      Err(e) => {
        error!(%address, partition, error = %e, "tcp send failed, dropping connection");
        self.discard(&address, &connection);
        Err(e)
      }
    }
  }

  fn partition_count(&self) -> u32 {
    self.topology.partition_count().unwrap_or(0)
  }

  async fn close(&self) {
    self.closed.cancel();
    let connections: Vec<Connection> = self.lock_connections().drain().map(|(_, c)| c).collect();
    for connection in connections {
      let mut framed = connection.lock().await;
      if let Err(e) = SinkExt::<Bytes>::close(&mut *framed).await {
        debug!(error = %e, "error closing tcp connection");
      }
    }
  }
}

impl TopologyChangeListener for TcpSender {
  fn on_change(&self, event: &TopologyEvent) {
    if let TopologyEvent::Changed(snapshot) = event {
      let keep = snapshot.members().iter().map(|n| n.address()).collect();
      self.prune(&keep);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::topology::{MembershipChange, NodeDescriptor};

  async fn bound() -> (TcpTransportListener, Arc<Topology>) {
    let listener = TcpTransportListener::bind("127.0.0.1:0", 0).await.unwrap();
    let port = listener.local_addr().port();
    let topology = Arc::new(Topology::with_nodes(
      "tcp",
      vec![NodeDescriptor::new(0, "127.0.0.1", port)],
    ));
    (listener, topology)
  }

  #[tokio::test]
  async fn test_frames_arrive_in_order() {
    let (listener, topology) = bound().await;
    let sender = Arc::new(TcpSender::new(topology, Duration::from_secs(2)));
    let sending = Arc::clone(&sender);
    let producer = tokio::spawn(async move {
      for payload in ["a", "b", "c"] {
        sending.send(0, Bytes::from(payload)).await.unwrap();
      }
    });

    let mut received = Vec::new();
    for _ in 0..3 {
      received.push(listener.recv().await.unwrap());
    }
    producer.await.unwrap();
    assert_eq!(received, vec!["a", "b", "c"]);
    assert_eq!(sender.connection_count(), 1);
  }

  #[tokio::test]
  async fn test_unknown_partition() {
    let (_listener, topology) = bound().await;
    let sender = TcpSender::new(topology, Duration::from_secs(2));
    let result = sender.send(3, Bytes::from_static(b"x")).await;
    assert!(matches!(result, Err(TransportError::UnknownPartition(3))));
  }

  #[tokio::test]
  async fn test_leaving_node_drops_connection() {
    let (listener, topology) = bound().await;
    let sender = Arc::new(TcpSender::new(Arc::clone(&topology), Duration::from_secs(2)));
    topology.add_listener(sender.clone());

    let sending = Arc::clone(&sender);
    let producer = tokio::spawn(async move { sending.send(0, Bytes::from_static(b"x")).await });
    listener.recv().await.unwrap();
    producer.await.unwrap().unwrap();
    assert_eq!(sender.connection_count(), 1);

    topology.apply(MembershipChange::Leave(0)).unwrap();
    assert_eq!(sender.connection_count(), 0);
  }

  #[tokio::test]
  async fn test_close_unblocks_recv() {
    let (listener, _topology) = bound().await;
    let listener = Arc::new(listener);
    let parked = Arc::clone(&listener);
    let waiter = tokio::spawn(async move { parked.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    listener.close();
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(result, Err(TransportError::Interrupted)));
  }
}
