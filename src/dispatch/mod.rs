//! # Event Dispatch
//!
//! Runtime-type dispatch of received events to processing-unit handlers.
//!
//! A processing-unit class declares handlers over event types of a
//! [`TypeHierarchy`]. When an event arrives, the handler whose declared type is
//! the closest ancestor-or-self of the event's runtime type runs. The choice is
//! precomputed per class into a [`DispatchTable`], so no resolution happens on
//! the hot path and an ambiguous declaration fails when the table is built
//! rather than on some later event.
//!
//! ## Example
//!
//! ```rust
//! use keyweave::config::DispatchConfig;
//! use keyweave::dispatch::{DispatchTable, HandlerSet, TypeHierarchy};
//! use keyweave::event::Event;
//!
//! #[derive(Default)]
//! struct Counter {
//!   clicks: u32,
//!   other: u32,
//! }
//!
//! let hierarchy = TypeHierarchy::builder()
//!   .root("Event")
//!   .declare("Click", ["Event"])
//!   .declare("DoubleClick", ["Click"])
//!   .build()
//!   .unwrap();
//! let handlers = HandlerSet::new()
//!   .on_event("Event", |c: &mut Counter, _: &Event| {
//!     c.other += 1;
//!     Ok(())
//!   })
//!   .on_event("Click", |c: &mut Counter, _: &Event| {
//!     c.clicks += 1;
//!     Ok(())
//!   });
//! let table = DispatchTable::build("Counter", &handlers, &hierarchy, DispatchConfig::default())
//!   .unwrap();
//!
//! let mut counter = Counter::default();
//! table.dispatch(&mut counter, &Event::new("DoubleClick")).unwrap();
//! table.dispatch(&mut counter, &Event::new("Event")).unwrap();
//! assert_eq!((counter.clicks, counter.other), (1, 1));
//! ```

pub mod hierarchy;
pub mod registry;
pub mod table;

pub use hierarchy::{TypeHierarchy, TypeHierarchyBuilder};
pub use registry::{
  DispatchTables, HandlerTypeResolver, ProcessingUnit, UnitFactory, UnitRegistry, UnitType,
};
pub use table::{DispatchTable, HandlerFn, HandlerSet};
