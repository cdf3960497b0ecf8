//! Per-class dispatch tables.
//!
//! A [`DispatchTable`] maps every type of a [`TypeHierarchy`] to the most
//! specific handler a processing-unit class declares for it. Resolution runs
//! once, when the table is built; dispatch is then a map lookup. Input events
//! and trigger events resolve against separate handler sets with the same
//! rule.

use super::hierarchy::TypeHierarchy;
use crate::config::{DispatchConfig, MissPolicy};
use crate::error::{DispatchError, HandlerError};
use crate::event::Event;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// A handler for one event type on a unit of type `U`.
pub type HandlerFn<U> = Arc<dyn Fn(&mut U, &Event) -> Result<(), HandlerError> + Send + Sync>;

/// Handlers declared by one processing-unit class.
pub struct HandlerSet<U> {
  events: Vec<(String, HandlerFn<U>)>,
  triggers: Vec<(String, HandlerFn<U>)>,
}

impl<U> HandlerSet<U> {
  /// Creates an empty set.
  pub fn new() -> Self {
    Self {
      events: Vec::new(),
      triggers: Vec::new(),
    }
  }

  /// Declares an input event handler for `event_type` and its subtypes.
  #[must_use]
  pub fn on_event<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
  where
    F: Fn(&mut U, &Event) -> Result<(), HandlerError> + Send + Sync + 'static,
  {
    self.events.push((event_type.into(), Arc::new(handler)));
    self
  }

  /// Declares a trigger handler for `event_type` and its subtypes.
  #[must_use]
  pub fn on_trigger<F>(mut self, event_type: impl Into<String>, handler: F) -> Self
  where
    F: Fn(&mut U, &Event) -> Result<(), HandlerError> + Send + Sync + 'static,
  {
    self.triggers.push((event_type.into(), Arc::new(handler)));
    self
  }

  /// Declared input event types.
  pub fn event_types(&self) -> impl Iterator<Item = &str> {
    self.events.iter().map(|(ty, _)| ty.as_str())
  }

  /// Declared trigger types.
  pub fn trigger_types(&self) -> impl Iterator<Item = &str> {
    self.triggers.iter().map(|(ty, _)| ty.as_str())
  }
}

impl<U> Default for HandlerSet<U> {
  fn default() -> Self {
    Self::new()
  }
}

impl<U> Clone for HandlerSet<U> {
  fn clone(&self) -> Self {
    Self {
      events: self.events.clone(),
      triggers: self.triggers.clone(),
    }
  }
}

struct Resolved<U> {
  handler_type: String,
  handler: HandlerFn<U>,
}

#[derive(Clone, Copy, Debug)]
enum Path {
  Event,
  Trigger,
}

impl Path {
  fn label(self) -> &'static str {
    match self {
      Path::Event => "onEvent",
      Path::Trigger => "onTrigger",
    }
  }
}

/// Resolved handlers of one processing-unit class.
pub struct DispatchTable<U> {
  unit_class: String,
  events: HashMap<String, Resolved<U>>,
  triggers: HashMap<String, Resolved<U>>,
  config: DispatchConfig,
}

impl<U> DispatchTable<U> {
  /// Resolves `handlers` against every type of `hierarchy`.
  ///
  /// # Errors
  ///
  /// - `InvalidHierarchy` if a handler names an undeclared type.
  /// - `AmbiguousDispatch` if some type matches two handlers, neither of
  ///   which is more specific than the other. A type declared by two
  ///   handlers of the same set is ambiguous too.
  pub fn build(
    unit_class: impl Into<String>,
    handlers: &HandlerSet<U>,
    hierarchy: &TypeHierarchy,
    config: DispatchConfig,
  ) -> Result<Self, DispatchError> {
    let unit_class = unit_class.into();
    let events = resolve_all(&unit_class, &handlers.events, hierarchy)?;
    let triggers = resolve_all(&unit_class, &handlers.triggers, hierarchy)?;
    debug!(
      unit_class = %unit_class,
      events = events.len(),
      triggers = triggers.len(),
      "built dispatch table"
    );
    Ok(Self {
      unit_class,
      events,
      triggers,
      config,
    })
  }

  /// Processing-unit class the table belongs to.
  pub fn unit_class(&self) -> &str {
    &self.unit_class
  }

  /// Invokes the input event handler for the event's runtime type.
  ///
  /// # Errors
  ///
  /// `NoMatchingHandler` when nothing matches and the miss policy is
  /// [`MissPolicy::Fail`], `Handler` when the handler fails.
  pub fn dispatch(&self, unit: &mut U, event: &Event) -> Result<(), DispatchError> {
    self.invoke(Path::Event, unit, event)
  }

  /// Invokes the trigger handler for the event's runtime type.
  ///
  /// # Errors
  ///
  /// As [`dispatch`](Self::dispatch), under the trigger miss policy.
  pub fn dispatch_trigger(&self, unit: &mut U, event: &Event) -> Result<(), DispatchError> {
    self.invoke(Path::Trigger, unit, event)
  }

  /// Handler type an input event of `event_type` resolves to.
  pub fn resolve(&self, event_type: &str) -> Option<&str> {
    self.events.get(event_type).map(|r| r.handler_type.as_str())
  }

  /// Handler type a trigger of `event_type` resolves to.
  pub fn resolve_trigger(&self, event_type: &str) -> Option<&str> {
    self.triggers.get(event_type).map(|r| r.handler_type.as_str())
  }

  fn invoke(&self, path: Path, unit: &mut U, event: &Event) -> Result<(), DispatchError> {
    let (resolved, policy) = match path {
      Path::Event => (&self.events, self.config.on_missing_event),
      Path::Trigger => (&self.triggers, self.config.on_missing_trigger),
    };
    match resolved.get(event.event_type()) {
      Some(entry) => (entry.handler)(unit, event).map_err(DispatchError::Handler),
      None => match policy {
        MissPolicy::Ignore => {
          debug!(
            unit_class = %self.unit_class,
            event_type = event.event_type(),
            "no matching {} handler, ignoring",
            path.label()
          );
          Ok(())
        }
        MissPolicy::Fail => {
          error!(
            "Cannot dispatch event of type [{}] to unit of class [{}]: no matching {} handler found",
            event.event_type(),
            self.unit_class,
            path.label()
          );
          Err(DispatchError::NoMatchingHandler {
            unit_class: self.unit_class.clone(),
            event_type: event.event_type().to_string(),
          })
        }
      },
    }
  }
}

impl<U> fmt::Debug for DispatchTable<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut events: Vec<_> = self
      .events
      .iter()
      .map(|(ty, r)| (ty.as_str(), r.handler_type.as_str()))
      .collect();
    events.sort_unstable();
    let mut triggers: Vec<_> = self
      .triggers
      .iter()
      .map(|(ty, r)| (ty.as_str(), r.handler_type.as_str()))
      .collect();
    triggers.sort_unstable();
    f.debug_struct("DispatchTable")
      .field("unit_class", &self.unit_class)
      .field("events", &events)
      .field("triggers", &triggers)
      .finish()
  }
}

fn resolve_all<U>(
  unit_class: &str,
  handlers: &[(String, HandlerFn<U>)],
  hierarchy: &TypeHierarchy,
) -> Result<HashMap<String, Resolved<U>>, DispatchError> {
  for (declared, _) in handlers {
    if !hierarchy.contains(declared) {
      return Err(DispatchError::InvalidHierarchy(format!(
        "unit class [{}] declares a handler for undeclared type [{}]",
        unit_class, declared
      )));
    }
  }

  let mut table = HashMap::new();
  for event_type in hierarchy.types() {
    let candidates: Vec<&(String, HandlerFn<U>)> = handlers
      .iter()
      .filter(|(declared, _)| hierarchy.is_subtype_of(event_type, declared))
      .collect();
    // Keep the candidates no other candidate is strictly more specific than.
    let best: Vec<&(String, HandlerFn<U>)> = candidates
      .iter()
      .enumerate()
      .filter(|(i, (ty, _))| {
        !candidates.iter().enumerate().any(|(j, (other, _))| {
          *i != j && other != ty && hierarchy.is_subtype_of(other, ty)
        })
      })
      .map(|(_, c)| *c)
      .collect();
    match best.as_slice() {
      [] => {}
      [(handler_type, handler)] => {
        table.insert(
          event_type.to_string(),
          Resolved {
            handler_type: handler_type.clone(),
            handler: Arc::clone(handler),
          },
        );
      }
      _ => {
        let mut candidates: Vec<String> = best.iter().map(|(ty, _)| ty.clone()).collect();
        candidates.sort();
        return Err(DispatchError::AmbiguousDispatch {
          unit_class: unit_class.to_string(),
          event_type: event_type.to_string(),
          candidates,
        });
      }
    }
  }
  Ok(table)
}
