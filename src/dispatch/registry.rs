//! Processing-unit classes and their cached dispatch tables.
//!
//! A [`UnitType`] is the declaration of a processing-unit class: a name, its
//! handlers and a factory for new instances. The [`UnitRegistry`] resolves
//! class names to declarations and lets a class be redeployed at runtime;
//! [`DispatchTables`] caches one table per class and drops it when the class
//! is replaced.

use super::hierarchy::TypeHierarchy;
use super::table::{DispatchTable, HandlerSet};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::partitioner::RoutingKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// A stateful processing unit.
///
/// One instance exists per routing key. The hooks run when the instance
/// cache creates or removes an instance.
pub trait ProcessingUnit: Send + 'static {
  /// Called once after the instance is created for `key`.
  fn on_create(&mut self, _key: &RoutingKey) {}

  /// Called once when the instance is removed from its cache.
  fn on_remove(&mut self) {}
}

/// Creates a processing-unit instance for a routing key.
pub type UnitFactory<U> = Arc<dyn Fn(&RoutingKey) -> U + Send + Sync>;

/// Declaration of a processing-unit class.
pub struct UnitType<U> {
  name: String,
  handlers: HandlerSet<U>,
  factory: UnitFactory<U>,
}

impl<U> UnitType<U> {
  /// Declares a class with its handlers and instance factory.
  pub fn new<F>(name: impl Into<String>, handlers: HandlerSet<U>, factory: F) -> Self
  where
    F: Fn(&RoutingKey) -> U + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      handlers,
      factory: Arc::new(factory),
    }
  }

  /// Class name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Declared handlers.
  pub fn handlers(&self) -> &HandlerSet<U> {
    &self.handlers
  }

  /// Instance factory.
  pub fn factory(&self) -> UnitFactory<U> {
    Arc::clone(&self.factory)
  }

  /// Creates an instance for `key`.
  pub fn create(&self, key: &RoutingKey) -> U {
    (self.factory)(key)
  }
}

/// Materializes processing-unit classes by name.
///
/// The seam for runtime-loaded handler code: the host supplies an
/// implementation backed by whatever loading mechanism it uses.
pub trait HandlerTypeResolver<U>: Send + Sync {
  /// Returns the current declaration of `name`.
  ///
  /// # Errors
  ///
  /// `UnknownUnitType` if no class has that name.
  fn resolve_handler_type(&self, name: &str) -> Result<Arc<UnitType<U>>, DispatchError>;
}

/// Process-wide cache of dispatch tables, one per class.
pub struct DispatchTables<U> {
  hierarchy: Arc<TypeHierarchy>,
  config: DispatchConfig,
  tables: Mutex<HashMap<String, Arc<DispatchTable<U>>>>,
}

impl<U> DispatchTables<U> {
  /// Creates an empty cache resolving against `hierarchy`.
  pub fn new(hierarchy: Arc<TypeHierarchy>, config: DispatchConfig) -> Self {
    Self {
      hierarchy,
      config,
      tables: Mutex::new(HashMap::new()),
    }
  }

  /// Event type hierarchy tables are built against.
  pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
    &self.hierarchy
  }

  /// Returns the cached table for `unit`, building it on first use.
  ///
  /// # Errors
  ///
  /// The build errors of [`DispatchTable::build`]. A failed build is not
  /// cached.
  pub fn table_for(&self, unit: &UnitType<U>) -> Result<Arc<DispatchTable<U>>, DispatchError> {
    if let Some(table) = self.lock().get(unit.name()) {
      return Ok(Arc::clone(table));
    }
    let built = Arc::new(DispatchTable::build(
      unit.name(),
      unit.handlers(),
      &self.hierarchy,
      self.config,
    )?);
    let table = Arc::clone(self.lock().entry(unit.name().to_string()).or_insert(built));
    Ok(table)
  }

  /// Drops the cached table of a class.
  pub fn invalidate(&self, unit_class: &str) -> bool {
    let removed = self.lock().remove(unit_class).is_some();
    if removed {
      debug!(unit_class, "invalidated dispatch table");
    }
    removed
  }

  /// Returns true if a table for the class is cached.
  pub fn is_cached(&self, unit_class: &str) -> bool {
    self.lock().contains_key(unit_class)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<DispatchTable<U>>>> {
    self.tables.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Name-to-declaration registry supporting redeployment.
pub struct UnitRegistry<U> {
  units: RwLock<HashMap<String, Arc<UnitType<U>>>>,
  tables: DispatchTables<U>,
  generation: AtomicU64,
}

impl<U> UnitRegistry<U> {
  /// Creates an empty registry.
  pub fn new(hierarchy: Arc<TypeHierarchy>, config: DispatchConfig) -> Self {
    Self {
      units: RwLock::new(HashMap::new()),
      tables: DispatchTables::new(hierarchy, config),
      generation: AtomicU64::new(0),
    }
  }

  /// Deploys a class, replacing any class of the same name.
  ///
  /// The dispatch table is built before the class becomes visible, so a
  /// declaration with ambiguous handlers is rejected and the previous version
  /// stays deployed. Returns the new registry generation.
  ///
  /// # Errors
  ///
  /// The build errors of [`DispatchTable::build`].
  pub fn deploy(&self, unit: UnitType<U>) -> Result<u64, DispatchError> {
    let table = DispatchTable::build(
      unit.name(),
      unit.handlers(),
      self.tables.hierarchy(),
      self.tables.config,
    )?;
    let name = unit.name().to_string();
    let replaced = {
      let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
      let replaced = units.insert(name.clone(), Arc::new(unit)).is_some();
      self.tables.invalidate(&name);
      self.tables.lock().insert(name.clone(), Arc::new(table));
      replaced
    };
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    if replaced {
      info!(unit_class = %name, generation, "redeployed processing-unit class");
    } else {
      info!(unit_class = %name, generation, "deployed processing-unit class");
    }
    Ok(generation)
  }

  /// Removes a class and its cached table.
  pub fn undeploy(&self, name: &str) -> bool {
    let removed = self
      .units
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(name)
      .is_some();
    if removed {
      self.tables.invalidate(name);
      self.generation.fetch_add(1, Ordering::SeqCst);
      info!(unit_class = name, "undeployed processing-unit class");
    }
    removed
  }

  /// Returns the dispatch table of a deployed class.
  ///
  /// # Errors
  ///
  /// `UnknownUnitType` if the class is not deployed.
  pub fn table(&self, name: &str) -> Result<Arc<DispatchTable<U>>, DispatchError> {
    let unit = self.resolve_handler_type(name)?;
    self.tables.table_for(&unit)
  }

  /// Bumped on every deploy and undeploy.
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Names of the deployed classes, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self
      .units
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    names.sort();
    names
  }

  /// The table cache.
  pub fn tables(&self) -> &DispatchTables<U> {
    &self.tables
  }
}

impl<U> HandlerTypeResolver<U> for UnitRegistry<U> {
  fn resolve_handler_type(&self, name: &str) -> Result<Arc<UnitType<U>>, DispatchError> {
    self
      .units
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .cloned()
      .ok_or_else(|| DispatchError::UnknownUnitType(name.to_string()))
  }
}
