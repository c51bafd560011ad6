//! Hashing utilities for fingerprints and cache entry naming.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 digest
//! - `hash_reader()`: streaming digest of a reader
//! - `hash_bytes()`: digest of arbitrary bytes
//! - `short_hash()`: truncated digest used for directory names

use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::ID_HASH_PREFIX_LEN;

/// A full 64-character SHA-256 hash, lowercase hexadecimal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash everything a reader yields.
pub fn hash_reader(mut reader: impl Read) -> io::Result<ContentHash> {
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = reader.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Truncated hash of a string, safe to use as a directory name.
pub fn short_hash(value: &str) -> String {
  let full = hash_bytes(value.as_bytes());
  full.0[..ID_HASH_PREFIX_LEN].to_string()
}
