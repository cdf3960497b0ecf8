//! Tests for partitioning and routing.

use crate::error::RoutingError;
use crate::event::Event;
use crate::hashing::HashAlgorithm;
use crate::partitioner::{
  CustomPartitioner, FieldKeyExtractor, HashPartitioner, KeyExtractor, Partitioner, RoutingKey,
  key_by, rebalance,
};
use crate::topology::{MembershipChange, NodeDescriptor, Topology};
use proptest::prelude::*;
use serde_json::json;

fn topology(partitions: u32) -> Topology {
  Topology::with_nodes(
    "test",
    (0..partitions)
      .map(|p| NodeDescriptor::new(p, "10.0.0.1", 7000 + p as u16))
      .collect(),
  )
}

#[test]
fn test_zero_partitions() {
  let partitioner = HashPartitioner::default();
  let err = partitioner
    .partition(&RoutingKey::from("k"), 0)
    .unwrap_err();
  assert_eq!(err, RoutingError::NoAvailablePartition);

  let event = Event::new("Click").with_field("user", json!("u-1"));
  let extractor = FieldKeyExtractor::new(["user"]);
  let err = partitioner
    .route(&event, &extractor, &Topology::new("empty"))
    .unwrap_err();
  assert_eq!(err, RoutingError::NoAvailablePartition);
}

#[test]
fn test_unavailable_topology() {
  let topology = topology(3);
  topology.apply(MembershipChange::ConnectionLost).unwrap();
  let event = Event::new("Click").with_field("user", json!("u-1"));
  let err = HashPartitioner::default()
    .route(&event, &FieldKeyExtractor::new(["user"]), &topology)
    .unwrap_err();
  assert_eq!(err, RoutingError::TopologyUnavailable);
}

#[test]
fn test_route_matches_hash_mod_partitions() {
  let topology = topology(7);
  let partitioner = HashPartitioner::new(HashAlgorithm::Native);
  let event = Event::new("Click").with_field("user", json!("hello"));
  let partition = partitioner
    .route(&event, &FieldKeyExtractor::new(["user"]), &topology)
    .unwrap();
  // "hello".hashCode() == 99162322
  assert_eq!(partition, 99162322 % 7);
}

#[test]
fn test_single_partition_routes_everything_to_zero() {
  let partitioner = HashPartitioner::new(HashAlgorithm::Fnv1aHash64);
  for key in ["a", "b", "user-42", ""] {
    assert_eq!(partitioner.partition(&RoutingKey::from(key), 1).unwrap(), 0);
  }
}

#[test]
fn test_field_extractor() {
  let event = Event::new("Click")
    .with_field("user", json!("u-1"))
    .with_field("page", json!(17));
  let key = FieldKeyExtractor::new(["user", "page"]).extract(&event).unwrap();
  assert_eq!(key, RoutingKey::from("u-1|17"));

  let key = FieldKeyExtractor::new(["user", "page"])
    .with_separator("/")
    .extract(&event)
    .unwrap();
  assert_eq!(key.to_string(), "u-1/17");

  let err = FieldKeyExtractor::new(["session"]).extract(&event).unwrap_err();
  assert!(matches!(err, RoutingError::KeyExtraction(_)));
  let err = FieldKeyExtractor::new(Vec::<String>::new())
    .extract(&event)
    .unwrap_err();
  assert!(matches!(err, RoutingError::KeyExtraction(_)));
}

#[test]
fn test_closure_extractor() {
  let extractor = key_by(|event: &Event| Ok(RoutingKey::from(event.event_type())));
  let partitioner = HashPartitioner::default();
  let topology = topology(4);
  let a = partitioner
    .route(&Event::new("Click"), extractor.as_ref(), &topology)
    .unwrap();
  let b = partitioner
    .route(&Event::new("Click"), extractor.as_ref(), &topology)
    .unwrap();
  assert_eq!(a, b);
}

#[test]
fn test_binary_key_display() {
  let key = RoutingKey::from(vec![0x00, 0xab, 0xff]);
  assert_eq!(key.to_string(), "00abff");
  assert_eq!(key.as_bytes(), &[0x00, 0xab, 0xff]);
}

#[test]
fn test_custom_partitioner_folds_out_of_range() {
  let partitioner = CustomPartitioner::new(|_: &RoutingKey, _: u32| 10);
  assert_eq!(partitioner.partition(&RoutingKey::from("k"), 4).unwrap(), 2);
  assert_eq!(
    partitioner.partition(&RoutingKey::from("k"), 0),
    Err(RoutingError::NoAvailablePartition)
  );
}

#[test]
fn test_partition_count_follows_membership() {
  let topology = topology(2);
  let partitioner = HashPartitioner::default();
  let key = RoutingKey::from("user-42");
  let before = partitioner.partition_in(&key, &topology.snapshot().unwrap()).unwrap();
  assert!(before < 2);

  topology.apply(MembershipChange::Join(NodeDescriptor::new(2, "10.0.0.3", 7002))).unwrap();
  let after = partitioner.partition_in(&key, &topology.snapshot().unwrap()).unwrap();
  assert!(after < 3);
  assert_eq!(
    rebalance::needs_rebalance(&partitioner, &key, 2, 3),
    Some((before, after, before != after))
  );
}

#[test]
fn test_moved_fraction() {
  let partitioner = HashPartitioner::default();
  let keys: Vec<RoutingKey> = (0..200).map(|i| RoutingKey::from(format!("key-{i}"))).collect();
  assert_eq!(rebalance::moved_fraction(&partitioner, &keys, 4, 4), 0.0);
  let moved = rebalance::moved_fraction(&partitioner, &keys, 4, 5);
  assert!(moved > 0.0 && moved <= 1.0);
  assert_eq!(rebalance::moved_fraction(&partitioner, &[], 4, 5), 0.0);
  assert_eq!(rebalance::needs_rebalance(&partitioner, &keys[0], 0, 5), None);
}

proptest! {
  #[test]
  fn prop_partition_in_range_and_deterministic(
    key in proptest::collection::vec(any::<u8>(), 0..64),
    partitions in 1u32..1024,
  ) {
    for alg in HashAlgorithm::ALL {
      let partitioner = HashPartitioner::new(alg);
      let key = RoutingKey::from(key.clone());
      let first = partitioner.partition(&key, partitions).unwrap();
      prop_assert!(first < partitions);
      prop_assert_eq!(first, partitioner.partition(&key, partitions).unwrap());
    }
  }

  #[test]
  fn prop_route_agrees_across_nodes(user in "[a-z0-9-]{1,24}", partitions in 1u32..16) {
    // Two independent nodes with the same snapshot pick the same partition.
    let left = topology(partitions);
    let right = topology(partitions);
    let event = Event::new("Click").with_field("user", json!(user));
    let extractor = FieldKeyExtractor::new(["user"]);
    let partitioner = HashPartitioner::new(HashAlgorithm::Ketama);
    prop_assert_eq!(
      partitioner.route(&event, &extractor, &left).unwrap(),
      partitioner.route(&event, &extractor, &right).unwrap()
    );
  }
}
