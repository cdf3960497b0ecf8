//! # Receiver
//!
//! The consume path of one listener: `recv`, decode, stream lookup, key
//! extraction, instance lookup, dispatch.
//!
//! Failures are isolated by scope:
//!
//! - A payload that does not decode, or names an unknown stream, is logged and
//!   dropped; the loop continues.
//! - A handler miss or handler failure affects only that event.
//! - A structural dispatch failure (ambiguous handlers, undeployed class)
//!   disables the stream's binding; later events on that stream are dropped
//!   with `StreamDisabled` and counted until the binding is re-enabled.
//! - `Interrupted` or `Closed` from the listener ends the loop cleanly.

use crate::codec::Codec;
use crate::dispatch::{HandlerTypeResolver, ProcessingUnit, UnitRegistry};
use crate::error::{DispatchError, Error, RoutingError, TransportError};
use crate::event::Event;
use crate::instances::InstanceCache;
use crate::partitioner::{KeyExtractor, PartitionIndex};
use crate::transport::Listener;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Destination of the events of one stream.
#[async_trait]
pub trait Inbound: Send + Sync {
  /// Stream name.
  fn stream(&self) -> &str;

  /// Handles one event of the stream.
  async fn deliver(&self, event: Event) -> Result<(), Error>;
}

/// Binds a stream to a processing-unit class.
///
/// Events on the stream are keyed with the stream's extractor and dispatched
/// to the class instance owning that key.
pub struct StreamBinding<U> {
  stream: String,
  extractor: Arc<dyn KeyExtractor>,
  registry: Arc<UnitRegistry<U>>,
  unit_class: String,
  instances: Arc<InstanceCache<U>>,
  enabled: AtomicBool,
}

impl<U: ProcessingUnit> StreamBinding<U> {
  /// Binds `stream` to the deployed class `unit_class`.
  ///
  /// # Errors
  ///
  /// `UnknownUnitType` if the class is not deployed.
  pub fn new(
    stream: impl Into<String>,
    extractor: Arc<dyn KeyExtractor>,
    registry: Arc<UnitRegistry<U>>,
    unit_class: impl Into<String>,
  ) -> Result<Self, DispatchError> {
    let unit_class = unit_class.into();
    let unit = registry.resolve_handler_type(&unit_class)?;
    let instances = Arc::new(InstanceCache::new(unit_class.clone(), unit.factory()));
    Ok(Self::with_instances(stream, extractor, registry, instances))
  }

  /// Binds `stream` to the class of an existing instance cache.
  pub fn with_instances(
    stream: impl Into<String>,
    extractor: Arc<dyn KeyExtractor>,
    registry: Arc<UnitRegistry<U>>,
    instances: Arc<InstanceCache<U>>,
  ) -> Self {
    Self {
      stream: stream.into(),
      extractor,
      registry,
      unit_class: instances.unit_class().to_string(),
      instances,
      enabled: AtomicBool::new(true),
    }
  }

  /// Instance cache of the bound class.
  pub fn instances(&self) -> &Arc<InstanceCache<U>> {
    &self.instances
  }

  /// Returns false once a structural dispatch error disabled the binding.
  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }

  /// Re-enables a disabled binding, e.g. after redeploying its class.
  pub fn enable(&self) {
    if !self.enabled.swap(true, Ordering::SeqCst) {
      info!(stream = %self.stream, unit_class = %self.unit_class, "stream re-enabled");
    }
  }

  /// Runs the trigger handlers of every live instance for `event`.
  ///
  /// Returns the number of instances the trigger reached. Per-instance
  /// failures are logged.
  ///
  /// # Errors
  ///
  /// Structural dispatch errors, which also disable the binding.
  pub async fn fire_trigger(&self, event: &Event) -> Result<usize, DispatchError> {
    if !self.is_enabled() {
      return Ok(0);
    }
    let table = self
      .registry
      .table(&self.unit_class)
      .map_err(|e| self.fail_structural(e))?;
    let mut fired = 0;
    for (key, instance) in self.instances.snapshot() {
      let mut unit = instance.lock().await;
      match table.dispatch_trigger(&mut unit, event) {
        Ok(()) => fired += 1,
        Err(e) => {
          crate::metrics::record_dispatch_error(&self.unit_class, error_kind(&e));
          warn!(stream = %self.stream, %key, error = %e, "trigger failed");
        }
      }
    }
    trace!(stream = %self.stream, fired, "fired trigger");
    Ok(fired)
  }

  /// Fires a trigger of `event_type` every `period` until `cancel` fires.
  pub fn schedule_trigger(
    self: &Arc<Self>,
    event_type: impl Into<String>,
    period: Duration,
    cancel: CancellationToken,
  ) -> JoinHandle<()> {
    let binding = Arc::clone(self);
    let event_type = event_type.into();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.tick().await;
      loop {
        tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => {
            let trigger = Event::new(event_type.as_str()).with_stream(binding.stream.as_str());
            if let Err(e) = binding.fire_trigger(&trigger).await {
              error!(stream = %binding.stream, error = %e, "stopping scheduled trigger");
              break;
            }
          }
        }
      }
      debug!(stream = %binding.stream, %event_type, "scheduled trigger stopped");
    })
  }

  fn fail_structural(&self, e: DispatchError) -> DispatchError {
    if e.is_structural() && self.enabled.swap(false, Ordering::SeqCst) {
      crate::metrics::record_dispatch_error(&self.unit_class, error_kind(&e));
      error!(
        stream = %self.stream,
        unit_class = %self.unit_class,
        error = %e,
        "disabling stream after structural dispatch error"
      );
    }
    e
  }
}

#[async_trait]
impl<U: ProcessingUnit> Inbound for StreamBinding<U> {
  fn stream(&self) -> &str {
    &self.stream
  }

  async fn deliver(&self, event: Event) -> Result<(), Error> {
    if !self.is_enabled() {
      return Err(RoutingError::StreamDisabled(self.stream.clone()).into());
    }
    let key = self.extractor.extract(&event)?;
    let table = self
      .registry
      .table(&self.unit_class)
      .map_err(|e| self.fail_structural(e))?;
    let instance = self.instances.get_or_create(&key);
    let mut unit = instance.lock().await;
    table.dispatch(&mut unit, &event).map_err(|e| {
      crate::metrics::record_dispatch_error(&self.unit_class, error_kind(&e));
      Error::from(e)
    })
  }
}

fn error_kind(e: &DispatchError) -> &'static str {
  match e {
    DispatchError::AmbiguousDispatch { .. } => "ambiguous",
    DispatchError::NoMatchingHandler { .. } => "no_handler",
    DispatchError::InvalidHierarchy(_) => "invalid_hierarchy",
    DispatchError::UnknownUnitType(_) => "unknown_unit",
    DispatchError::Handler(_) => "handler",
  }
}

/// Counters of one receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
  /// Payloads taken off the listener.
  pub received: u64,
  /// Events dispatched without error.
  pub delivered: u64,
  /// Payloads dropped before dispatch.
  pub dropped: u64,
  /// Events whose dispatch failed.
  pub failed: u64,
}

/// Consumer loop of one listener.
pub struct Receiver {
  listener: Arc<dyn Listener>,
  codec: Arc<dyn Codec>,
  streams: RwLock<HashMap<String, Arc<dyn Inbound>>>,
  received: AtomicU64,
  delivered: AtomicU64,
  dropped: AtomicU64,
  failed: AtomicU64,
}

impl Receiver {
  /// Creates a receiver without streams.
  pub fn new(listener: Arc<dyn Listener>, codec: Arc<dyn Codec>) -> Self {
    Self {
      listener,
      codec,
      streams: RwLock::new(HashMap::new()),
      received: AtomicU64::new(0),
      delivered: AtomicU64::new(0),
      dropped: AtomicU64::new(0),
      failed: AtomicU64::new(0),
    }
  }

  /// Partition served by the listener.
  pub fn partition_id(&self) -> PartitionIndex {
    self.listener.partition_id()
  }

  /// Adds a stream, replacing any stream of the same name.
  pub fn add_stream(&self, inbound: Arc<dyn Inbound>) {
    let stream = inbound.stream().to_string();
    debug!(partition = self.partition_id(), %stream, "added stream");
    self
      .streams
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(stream, inbound);
  }

  /// Removes a stream.
  pub fn remove_stream(&self, stream: &str) -> bool {
    self
      .streams
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(stream)
      .is_some()
  }

  /// Decodes one payload and delivers it to its stream.
  ///
  /// # Errors
  ///
  /// `Serialization`, `UnknownStream` or `StreamDisabled` when the payload is
  /// dropped, otherwise the stream's delivery error.
  pub async fn receive(&self, payload: Bytes) -> Result<(), Error> {
    let partition = self.partition_id();
    let event = match self.codec.decode(&payload) {
      Ok(event) => event,
      Err(e) => {
        self.drop_payload(partition, "serialization");
        return Err(e.into());
      }
    };
    let inbound = self
      .streams
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(event.stream())
      .cloned();
    let Some(inbound) = inbound else {
      self.drop_payload(partition, "unknown_stream");
      return Err(RoutingError::UnknownStream(event.stream().to_string()).into());
    };

    match inbound.deliver(event).await {
      Ok(()) => {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
      }
      Err(e @ Error::Routing(RoutingError::StreamDisabled(_))) => {
        self.drop_payload(partition, "stream_disabled");
        Err(e)
      }
      Err(e) => {
        self.failed.fetch_add(1, Ordering::Relaxed);
        Err(e)
      }
    }
  }

  /// Runs the consumer loop until the listener is closed.
  ///
  /// # Errors
  ///
  /// Listener errors other than `Interrupted` and `Closed`.
  pub async fn run(&self) -> Result<(), TransportError> {
    let partition = self.partition_id();
    info!(partition, "receiver started");
    loop {
      match self.listener.recv().await {
        Ok(payload) => {
          self.received.fetch_add(1, Ordering::Relaxed);
          crate::metrics::record_event_received(partition);
          if let Err(e) = self.receive(payload).await {
            warn!(partition, error = %e, "dropping event");
          }
        }
        Err(e) if e.is_shutdown() => {
          info!(partition, reason = %e, "receiver stopped");
          return Ok(());
        }
        Err(e) => {
          error!(partition, error = %e, "receiver failed");
          return Err(e);
        }
      }
    }
  }

  /// Runs the consumer loop on a new task.
  pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<(), TransportError>> {
    let receiver = Arc::clone(self);
    tokio::spawn(async move { receiver.run().await })
  }

  /// Closes the listener, ending the consumer loop.
  pub fn close(&self) {
    self.listener.close();
  }

  /// Current counters.
  pub fn stats(&self) -> ReceiverStats {
    ReceiverStats {
      received: self.received.load(Ordering::Relaxed),
      delivered: self.delivered.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
    }
  }

  fn drop_payload(&self, partition: PartitionIndex, reason: &'static str) {
    self.dropped.fetch_add(1, Ordering::Relaxed);
    crate::metrics::record_event_dropped(partition, reason);
  }
}
