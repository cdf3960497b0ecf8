//! # Instance Cache
//!
//! Holds the live processing-unit instances of one class, one per routing
//! key. Lookup and creation happen under a single lock, so two events for a
//! new key racing through different tasks still end up on the same instance.
//!
//! Instances are handed out as `Arc<tokio::sync::Mutex<U>>`: handlers run with
//! exclusive access to their unit, while events for other keys proceed in
//! parallel.
//!
//! With an idle TTL, [`InstanceCache::evict_idle`] removes instances that have
//! not been looked up for longer than the TTL.

use crate::dispatch::{ProcessingUnit, UnitFactory};
use crate::partitioner::RoutingKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Shared handle to a processing-unit instance.
pub type Instance<U> = Arc<tokio::sync::Mutex<U>>;

struct Entry<U> {
  instance: Instance<U>,
  last_access: Instant,
}

/// Per-class cache of processing-unit instances.
pub struct InstanceCache<U> {
  unit_class: String,
  factory: UnitFactory<U>,
  ttl: Option<Duration>,
  entries: Mutex<HashMap<RoutingKey, Entry<U>>>,
}

impl<U: ProcessingUnit> InstanceCache<U> {
  /// Creates an empty cache without expiry.
  pub fn new(unit_class: impl Into<String>, factory: UnitFactory<U>) -> Self {
    Self {
      unit_class: unit_class.into(),
      factory,
      ttl: None,
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// Expires instances idle for longer than `ttl`.
  #[must_use]
  pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  /// Processing-unit class of the cached instances.
  pub fn unit_class(&self) -> &str {
    &self.unit_class
  }

  /// Returns the instance for `key`, creating it on first reference.
  pub fn get_or_create(&self, key: &RoutingKey) -> Instance<U> {
    let mut entries = self.lock();
    let now = Instant::now();
    if let Some(entry) = entries.get_mut(key) {
      entry.last_access = now;
      return Arc::clone(&entry.instance);
    }

    let mut unit = (self.factory)(key);
    unit.on_create(key);
    let instance = Arc::new(tokio::sync::Mutex::new(unit));
    entries.insert(
      key.clone(),
      Entry {
        instance: Arc::clone(&instance),
        last_access: now,
      },
    );
    debug!(unit_class = %self.unit_class, %key, "created processing-unit instance");
    instance
  }

  /// Returns the instance for `key` without creating one.
  pub fn get(&self, key: &RoutingKey) -> Option<Instance<U>> {
    self.lock().get(key).map(|entry| Arc::clone(&entry.instance))
  }

  /// Removes the instance for `key`, running its `on_remove` hook.
  pub async fn remove(&self, key: &RoutingKey) -> bool {
    let removed = self.lock().remove(key);
    match removed {
      Some(entry) => {
        entry.instance.lock().await.on_remove();
        debug!(unit_class = %self.unit_class, %key, "removed processing-unit instance");
        true
      }
      None => false,
    }
  }

  /// Removes every instance idle for longer than the TTL.
  ///
  /// Returns the evicted keys. A cache without TTL evicts nothing.
  pub async fn evict_idle(&self) -> Vec<RoutingKey> {
    let Some(ttl) = self.ttl else {
      return Vec::new();
    };
    let now = Instant::now();
    let expired: Vec<(RoutingKey, Instance<U>)> = {
      let mut entries = self.lock();
      let keys: Vec<RoutingKey> = entries
        .iter()
        .filter(|(_, entry)| now.duration_since(entry.last_access) > ttl)
        .map(|(key, _)| key.clone())
        .collect();
      keys
        .into_iter()
        .filter_map(|key| entries.remove(&key).map(|entry| (key, entry.instance)))
        .collect()
    };

    let mut evicted = Vec::with_capacity(expired.len());
    for (key, instance) in expired {
      instance.lock().await.on_remove();
      trace!(unit_class = %self.unit_class, %key, "evicted idle processing-unit instance");
      evicted.push(key);
    }
    if !evicted.is_empty() {
      debug!(unit_class = %self.unit_class, count = evicted.len(), "evicted idle instances");
    }
    evicted
  }

  /// Current instances, in no particular order.
  pub fn snapshot(&self) -> Vec<(RoutingKey, Instance<U>)> {
    self
      .lock()
      .iter()
      .map(|(key, entry)| (key.clone(), Arc::clone(&entry.instance)))
      .collect()
  }

  /// Number of live instances.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  /// Returns true if there are no live instances.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RoutingKey, Entry<U>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
