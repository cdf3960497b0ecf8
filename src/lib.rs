//! # Keyweave
//!
//! Keyed event routing, transport and runtime dispatch for partitioned stream
//! processing.
//!
//! Events carry a runtime type tag and named fields. An emitted event is keyed
//! by its stream's extractor, the key is hashed onto one partition of the live
//! cluster topology, and the encoded event is handed to the transport for that
//! partition. On the owning node a receiver decodes it, finds the
//! processing-unit instance for the same key and runs the handler that most
//! specifically matches the event's runtime type.
//!
//! ## Key Features
//!
//! - **Deterministic partitioning**: eight hash algorithms, all masked to be
//!   non-negative, over a versioned topology snapshot
//! - **Topology service**: membership feed, change listeners and an explicit
//!   unavailable state when the coordination link drops
//! - **Backpressured transport**: zero-buffer handoff in process, length-delimited
//!   frames over TCP, optional bounded buffering
//! - **Runtime dispatch**: per-class tables resolved against a type hierarchy,
//!   ambiguity rejected when the table is built
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keyweave::codec::JsonCodec;
//! use keyweave::config::DispatchConfig;
//! use keyweave::dispatch::{HandlerSet, ProcessingUnit, TypeHierarchy, UnitRegistry, UnitType};
//! use keyweave::event::Event;
//! use keyweave::partitioner::{FieldKeyExtractor, HashPartitioner, RoutingKey};
//! use keyweave::receiver::{Receiver, StreamBinding};
//! use keyweave::router::EventRouter;
//! use keyweave::topology::{NodeDescriptor, Topology};
//! use keyweave::transport::in_process::LocalNetwork;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Clicks(u64);
//! impl ProcessingUnit for Clicks {}
//!
//! # async fn run() -> keyweave::Result<()> {
//! let node = NodeDescriptor::new(0, "local", 1);
//! let topology = Arc::new(Topology::with_nodes("demo", vec![node.clone()]));
//! let network = LocalNetwork::new();
//!
//! let hierarchy = TypeHierarchy::builder().root("Click").build()?;
//! let registry = Arc::new(UnitRegistry::new(Arc::new(hierarchy), DispatchConfig::default()));
//! let handlers = HandlerSet::new().on_event("Click", |c: &mut Clicks, _: &Event| {
//!   c.0 += 1;
//!   Ok(())
//! });
//! registry.deploy(UnitType::new("Clicks", handlers, |_: &RoutingKey| Clicks::default()))?;
//!
//! let extractor = Arc::new(FieldKeyExtractor::new(["user"]));
//! let receiver = Arc::new(Receiver::new(Arc::new(network.bind(&node)), Arc::new(JsonCodec)));
//! receiver.add_stream(Arc::new(StreamBinding::new(
//!   "clicks",
//!   extractor.clone(),
//!   registry,
//!   "Clicks",
//! )?));
//! receiver.spawn();
//!
//! let router = EventRouter::new(
//!   Arc::new(network.sender(Arc::clone(&topology))),
//!   topology,
//!   Arc::new(HashPartitioner::default()),
//!   Arc::new(JsonCodec),
//! );
//! router.register_stream("clicks", extractor);
//! router
//!   .emit("clicks", Event::new("Click").with_field("user", json!("u-1")))
//!   .await?;
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Event serialization for the wire.
pub mod codec;
/// Configuration loading.
pub mod config;
/// Runtime-type dispatch to processing-unit handlers.
pub mod dispatch;
/// Error types.
pub mod error;
/// Runtime-typed events.
pub mod event;
/// Key hashing algorithms.
pub mod hashing;
/// Per-class processing-unit instance cache.
pub mod instances;
/// Operational metrics.
pub mod metrics;
/// Key extraction and partitioning.
pub mod partitioner;
/// Consumer loop and stream bindings.
pub mod receiver;
/// Emit path.
pub mod router;
/// Logging setup.
pub mod telemetry;
/// Cluster membership.
pub mod topology;
/// Senders and listeners.
pub mod transport;

pub use error::{Error, Result};

#[cfg(test)]
mod hashing_test;
#[cfg(test)]
mod partitioner_test;
