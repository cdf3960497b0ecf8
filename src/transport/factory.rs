//! Builds senders and listeners from [`TransportConfig`].
//!
//! The configured [`TransportKind`] picks the implementation, `listener_buffer`
//! puts a [`BufferedListener`] in front of every listener, and
//! `connect_timeout_ms` bounds TCP connection setup.
//!
//! ```rust,no_run
//! use keyweave::config::KeyweaveConfig;
//! use keyweave::topology::{NodeDescriptor, Topology};
//! use keyweave::transport::factory::TransportFactory;
//! use std::sync::Arc;
//!
//! # async fn run() -> keyweave::Result<()> {
//! let config = KeyweaveConfig::from_file("keyweave.json")?;
//! let node = NodeDescriptor::new(0, "10.0.0.1", 7000);
//! let topology = Arc::new(Topology::with_nodes("prod", vec![node.clone()]));
//!
//! let factory = TransportFactory::new(config.transport, topology);
//! let listener = factory.listener(&node).await?;
//! let sender = factory.sender();
//! # Ok(())
//! # }
//! ```

use super::buffered::BufferedListener;
use super::in_process::LocalNetwork;
use super::loopback::LoopbackTransport;
use super::tcp::{TcpSender, TcpTransportListener};
use super::{Listener, Sender};
use crate::config::{TransportConfig, TransportKind};
use crate::error::TransportError;
use crate::topology::{NodeDescriptor, Topology};
use std::sync::Arc;
use tracing::debug;

/// Creates the configured transport endpoints for one topology.
pub struct TransportFactory {
  config: TransportConfig,
  topology: Arc<Topology>,
  network: LocalNetwork,
  loopback: Arc<LoopbackTransport>,
}

impl TransportFactory {
  /// Creates a factory with a private in-process network.
  pub fn new(config: TransportConfig, topology: Arc<Topology>) -> Self {
    Self {
      config,
      topology,
      network: LocalNetwork::new(),
      loopback: Arc::new(LoopbackTransport::new()),
    }
  }

  /// Uses `network` for in-process endpoints, so several factories can share
  /// one process-wide network.
  #[must_use]
  pub fn with_network(mut self, network: LocalNetwork) -> Self {
    self.network = network;
    self
  }

  /// Settings the factory was built with.
  pub fn config(&self) -> &TransportConfig {
    &self.config
  }

  /// Creates a sender of the configured kind.
  ///
  /// A TCP sender is registered as a listener of the topology so it drops
  /// the connections of departed nodes.
  pub fn sender(&self) -> Arc<dyn Sender> {
    debug!(kind = ?self.config.kind, cluster = %self.topology.name(), "creating sender");
    match self.config.kind {
      TransportKind::Loopback => self.loopback.clone(),
      TransportKind::InProcess => Arc::new(self.network.sender(Arc::clone(&self.topology))),
      TransportKind::Tcp => {
        let sender = Arc::new(TcpSender::new(
          Arc::clone(&self.topology),
          self.config.connect_timeout(),
        ));
        self.topology.add_listener(sender.clone());
        sender
      }
    }
  }

  /// Creates the listener serving `node`'s partition.
  ///
  /// # Errors
  ///
  /// `UnknownPartition` for a loopback listener on any partition but 0, `Io`
  /// when the TCP address cannot be bound.
  pub async fn listener(&self, node: &NodeDescriptor) -> Result<Arc<dyn Listener>, TransportError> {
    let inner: Arc<dyn Listener> = match self.config.kind {
      TransportKind::Loopback => {
        if node.partition != 0 {
          return Err(TransportError::UnknownPartition(node.partition));
        }
        self.loopback.clone()
      }
      TransportKind::InProcess => Arc::new(self.network.bind(node)),
      TransportKind::Tcp => Arc::new(TcpTransportListener::bind(node.address(), node.partition).await?),
    };
    Ok(match self.config.listener_buffer {
      Some(capacity) => Arc::new(BufferedListener::new(inner, capacity)),
      None => inner,
    })
  }
}
