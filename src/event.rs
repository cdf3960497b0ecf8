//! # Events
//!
//! The immutable, runtime-typed payload that flows between partitions.
//!
//! An [`Event`] carries a type tag used for dispatch, the name of the stream it
//! is addressed to, a creation timestamp and a map of named fields used for key
//! extraction. Events are built once with the `with_*` methods and never
//! mutated after emission.
//!
//! ## Example
//!
//! ```rust
//! use keyweave::event::Event;
//! use serde_json::json;
//!
//! let event = Event::new("PageView")
//!   .with_stream("views")
//!   .with_field("user", json!("u-17"))
//!   .with_field("path", json!("/index.html"));
//!
//! assert_eq!(event.event_type(), "PageView");
//! assert_eq!(event.field_str("user").as_deref(), Some("u-17"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A runtime-typed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  event_type: String,
  #[serde(default)]
  stream: String,
  time: DateTime<Utc>,
  #[serde(default)]
  fields: BTreeMap<String, Value>,
}

impl Event {
  /// Creates an event of the given runtime type, timestamped now.
  pub fn new(event_type: impl Into<String>) -> Self {
    Self {
      event_type: event_type.into(),
      stream: String::new(),
      time: Utc::now(),
      fields: BTreeMap::new(),
    }
  }

  /// Sets the target stream.
  #[must_use]
  pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
    self.stream = stream.into();
    self
  }

  /// Sets an explicit creation time.
  #[must_use]
  pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
    self.time = time;
    self
  }

  /// Adds or replaces a named field.
  #[must_use]
  pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(name.into(), value.into());
    self
  }

  /// The runtime type tag.
  pub fn event_type(&self) -> &str {
    &self.event_type
  }

  /// The target stream name; empty when not addressed to a stream.
  pub fn stream(&self) -> &str {
    &self.stream
  }

  /// Creation time.
  pub fn time(&self) -> DateTime<Utc> {
    self.time
  }

  /// Returns a field value.
  pub fn field(&self, name: &str) -> Option<&Value> {
    self.fields.get(name)
  }

  /// Returns a field rendered as a string.
  ///
  /// Strings are returned verbatim, other values in their JSON form.
  pub fn field_str(&self, name: &str) -> Option<String> {
    self.fields.get(name).map(|value| match value {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    })
  }

  /// All fields, ordered by name.
  pub fn fields(&self) -> &BTreeMap<String, Value> {
    &self.fields
  }
}
