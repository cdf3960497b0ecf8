//! # Key Hashing
//!
//! Hash functions that map a routing key to a non-negative integer.
//!
//! Every [`HashAlgorithm`] variant is total over arbitrary bytes (empty input
//! and binary content included) and masks the sign bit before returning, so
//! the result stays non-negative after truncation to a 32-bit signed index.
//! A partitioner can therefore take `hash % partition_count` without ever
//! producing a negative index.
//!
//! ## Example
//!
//! ```rust
//! use keyweave::hashing::{HashAlgorithm, Hasher};
//!
//! let h = HashAlgorithm::Native.hash(b"user-42");
//! assert!(h >= 0);
//! assert!((h as i32) >= 0);
//! ```

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Non-negative hash of a routing key.
///
/// Always fits in `[0, i32::MAX]`.
pub type HashValue = i64;

const SIGN_MASK: u32 = 0x7FFF_FFFF;

const FNV_32_INIT: u32 = 0x811c_9dc5;
const FNV_32_PRIME: u32 = 16_777_619;
const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Maps a routing key to a [`HashValue`].
///
/// Implementations must be pure and must never return a negative value.
pub trait Hasher: Send + Sync + fmt::Debug {
  /// Hashes a key given as raw bytes.
  fn hash(&self, key: &[u8]) -> HashValue;

  /// Hashes a key given as a string.
  fn hash_str(&self, key: &str) -> HashValue {
    self.hash(key.as_bytes())
  }
}

/// Built-in hash algorithms, selectable by configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
  /// Legacy Java-style string hash (`h = 31 * h + c` over UTF-16 code units).
  #[default]
  #[serde(rename = "native")]
  Native,
  /// Upper half of the CRC-32 checksum, limited to 15 bits.
  #[serde(rename = "crc32")]
  Crc32,
  /// FNV-1, 64-bit state, truncated to 32 bits.
  #[serde(rename = "fnv1-64")]
  Fnv1Hash64,
  /// FNV-1a, 64-bit state, truncated to 32 bits.
  #[serde(rename = "fnv1a-64")]
  Fnv1aHash64,
  /// FNV-1, 32-bit.
  #[serde(rename = "fnv1-32")]
  Fnv1Hash32,
  /// FNV-1a, 32-bit.
  #[serde(rename = "fnv1a-32")]
  Fnv1aHash32,
  /// First four bytes of the MD5 digest, little-endian.
  #[serde(rename = "ketama")]
  Ketama,
  /// First four bytes of the SHA-256 digest, big-endian.
  #[serde(rename = "sha256")]
  Sha256,
}

impl HashAlgorithm {
  /// All built-in algorithms.
  pub const ALL: [HashAlgorithm; 8] = [
    HashAlgorithm::Native,
    HashAlgorithm::Crc32,
    HashAlgorithm::Fnv1Hash64,
    HashAlgorithm::Fnv1aHash64,
    HashAlgorithm::Fnv1Hash32,
    HashAlgorithm::Fnv1aHash32,
    HashAlgorithm::Ketama,
    HashAlgorithm::Sha256,
  ];

  /// Configuration name of the algorithm.
  pub fn name(&self) -> &'static str {
    match self {
      HashAlgorithm::Native => "native",
      HashAlgorithm::Crc32 => "crc32",
      HashAlgorithm::Fnv1Hash64 => "fnv1-64",
      HashAlgorithm::Fnv1aHash64 => "fnv1a-64",
      HashAlgorithm::Fnv1Hash32 => "fnv1-32",
      HashAlgorithm::Fnv1aHash32 => "fnv1a-32",
      HashAlgorithm::Ketama => "ketama",
      HashAlgorithm::Sha256 => "sha256",
    }
  }

  fn raw(&self, key: &[u8]) -> u32 {
    match self {
      HashAlgorithm::Native => native_hash(key),
      HashAlgorithm::Crc32 => (crc32fast::hash(key) >> 16) & 0x7fff,
      HashAlgorithm::Fnv1Hash64 => {
        let mut h = FNV_64_INIT;
        for &b in key {
          h = h.wrapping_mul(FNV_64_PRIME);
          h ^= u64::from(b);
        }
        h as u32
      }
      HashAlgorithm::Fnv1aHash64 => {
        let mut h = FNV_64_INIT;
        for &b in key {
          h ^= u64::from(b);
          h = h.wrapping_mul(FNV_64_PRIME);
        }
        h as u32
      }
      HashAlgorithm::Fnv1Hash32 => {
        let mut h = FNV_32_INIT;
        for &b in key {
          h = h.wrapping_mul(FNV_32_PRIME);
          h ^= u32::from(b);
        }
        h
      }
      HashAlgorithm::Fnv1aHash32 => {
        let mut h = FNV_32_INIT;
        for &b in key {
          h ^= u32::from(b);
          h = h.wrapping_mul(FNV_32_PRIME);
        }
        h
      }
      HashAlgorithm::Ketama => {
        let d = Md5::digest(key);
        u32::from_le_bytes([d[0], d[1], d[2], d[3]])
      }
      HashAlgorithm::Sha256 => {
        let d = Sha256::digest(key);
        u32::from_be_bytes([d[0], d[1], d[2], d[3]])
      }
    }
  }
}

/// Java `String.hashCode` over the lossily decoded key.
fn native_hash(key: &[u8]) -> u32 {
  let text = String::from_utf8_lossy(key);
  text
    .encode_utf16()
    .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit))) as u32
}

impl Hasher for HashAlgorithm {
  fn hash(&self, key: &[u8]) -> HashValue {
    HashValue::from(self.raw(key) & SIGN_MASK)
  }
}

impl fmt::Display for HashAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Error returned when parsing an unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown hash algorithm: {0}")]
pub struct UnknownHashAlgorithm(pub String);

impl FromStr for HashAlgorithm {
  type Err = UnknownHashAlgorithm;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_ascii_lowercase();
    HashAlgorithm::ALL
      .into_iter()
      .find(|alg| alg.name() == wanted)
      .ok_or(UnknownHashAlgorithm(s.to_string()))
  }
}
