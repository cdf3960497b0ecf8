//! Operational metrics for routing, transport and dispatch.
//!
//! Recorded through the `metrics` facade. Without an installed recorder every
//! call is a no-op, so the core never depends on an exporter.
//!
//! - `keyweave_events_sent_total{partition}`
//! - `keyweave_events_received_total{partition}`
//! - `keyweave_events_dropped_total{partition,reason}`
//! - `keyweave_dispatch_errors_total{unit_class,kind}`
//! - `keyweave_topology_version`, `keyweave_partition_count`

use crate::partitioner::PartitionIndex;

/// Records an event handed to the transport.
pub fn record_event_sent(partition: PartitionIndex) {
  ::metrics::counter!(
    "keyweave_events_sent_total",
    "partition" => partition.to_string()
  )
  .increment(1);
}

/// Records an event taken off a listener.
pub fn record_event_received(partition: PartitionIndex) {
  ::metrics::counter!(
    "keyweave_events_received_total",
    "partition" => partition.to_string()
  )
  .increment(1);
}

/// Records a message dropped on the receive path.
pub fn record_event_dropped(partition: PartitionIndex, reason: &'static str) {
  ::metrics::counter!(
    "keyweave_events_dropped_total",
    "partition" => partition.to_string(),
    "reason" => reason
  )
  .increment(1);
}

/// Records a dispatch failure.
pub fn record_dispatch_error(unit_class: &str, kind: &'static str) {
  ::metrics::counter!(
    "keyweave_dispatch_errors_total",
    "unit_class" => unit_class.to_string(),
    "kind" => kind
  )
  .increment(1);
}

/// Records the current topology version and size.
pub fn record_topology(version: u64, partition_count: u32) {
  ::metrics::gauge!("keyweave_topology_version").set(version as f64);
  ::metrics::gauge!("keyweave_partition_count").set(f64::from(partition_count));
}
