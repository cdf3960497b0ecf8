//! Tests for key hashing.

use crate::hashing::{HashAlgorithm, Hasher};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;

/// Keys of the shape seen on production streams, plus edge cases.
const CORPUS: &[&str] = &[
  "",
  " ",
  "a",
  "user-42",
  "polygenelubricants",
  "GydZG_",
  "DESIGNING WORKHOUSES",
  "héllo wörld",
  "日本語のキー",
  "🦀🦀🦀",
  "dXNlcl9pZD0xMjM0NQ==",
  "AAECAwQFBgcICQoLDA0ODw==",
  "/////w==",
  "gICAgICAgICAgA==",
  "9J+mgPCfpoA=",
  "ZGF0YQ==",
];

#[test]
fn test_corpus_is_non_negative_for_all_algorithms() {
  for line in CORPUS {
    let decoded = STANDARD.decode(line).unwrap_or_default();
    for alg in HashAlgorithm::ALL {
      let h = alg.hash_str(line);
      assert!(h >= 0, "{} produced {} for {:?}", alg, h, line);
      assert!((h as i32) >= 0, "{} truncates negative for {:?}", alg, line);

      let h = alg.hash(&decoded);
      assert!((h as i32) >= 0, "{} truncates negative for decoded {:?}", alg, line);
    }
  }
}

#[test]
fn test_native_matches_java_string_hash() {
  assert_eq!(HashAlgorithm::Native.hash_str(""), 0);
  assert_eq!(HashAlgorithm::Native.hash_str("a"), 97);
  assert_eq!(HashAlgorithm::Native.hash_str("hello"), 99_162_322);
  assert_eq!(HashAlgorithm::Native.hash_str("héllo"), 103_094_734);
}

#[test]
fn test_native_masks_min_value() {
  // Java hashes this key to i32::MIN; without the mask it would index negatively.
  assert_eq!(HashAlgorithm::Native.hash_str("polygenelubricants"), 0);
}

#[test]
fn test_known_values() {
  assert_eq!(HashAlgorithm::Crc32.hash_str("123456789"), 19_444);
  assert_eq!(HashAlgorithm::Fnv1aHash32.hash_str(""), 18_652_613);
  assert_eq!(HashAlgorithm::Fnv1aHash32.hash_str("a"), 1_678_518_572);
  assert_eq!(HashAlgorithm::Fnv1Hash32.hash_str("a"), 84_696_446);
  assert_eq!(HashAlgorithm::Fnv1Hash64.hash_str(""), 69_346_085);
  assert_eq!(HashAlgorithm::Fnv1Hash64.hash_str("a"), 100_775_870);
  assert_eq!(HashAlgorithm::Fnv1aHash64.hash_str("a"), 100_789_388);
  assert_eq!(HashAlgorithm::Ketama.hash_str(""), 1_502_354_900);
  assert_eq!(HashAlgorithm::Ketama.hash_str("abc"), 407_896_464);
  assert_eq!(HashAlgorithm::Sha256.hash_str(""), 1_672_528_962);
}

#[test]
fn test_parse_and_display_names() {
  for alg in HashAlgorithm::ALL {
    let parsed: HashAlgorithm = alg.to_string().parse().unwrap();
    assert_eq!(parsed, alg);
  }
  assert_eq!("  KETAMA ".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Ketama);
  assert!("md4".parse::<HashAlgorithm>().is_err());
}

#[test]
fn test_serde_names() {
  let alg: HashAlgorithm = serde_json::from_str("\"fnv1a-64\"").unwrap();
  assert_eq!(alg, HashAlgorithm::Fnv1aHash64);
  assert_eq!(serde_json::to_string(&HashAlgorithm::Crc32).unwrap(), "\"crc32\"");
}

proptest! {
  #[test]
  fn test_any_bytes_hash_non_negative(key in prop::collection::vec(any::<u8>(), 0..256)) {
    for alg in HashAlgorithm::ALL {
      let h = alg.hash(&key);
      prop_assert!(h >= 0);
      prop_assert!((h as i32) >= 0);
      prop_assert!(h <= i64::from(i32::MAX));
    }
  }

  #[test]
  fn test_any_string_hash_deterministic(key in ".*") {
    for alg in HashAlgorithm::ALL {
      prop_assert_eq!(alg.hash_str(&key), alg.hash_str(&key));
    }
  }
}
