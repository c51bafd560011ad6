use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use super::{BuildCache, CacheError, IdentityLocks};
use crate::builder::BuilderId;
use crate::fingerprint::{Fingerprint, encode};
use crate::fs::{FileSystemDirectory, RelativePath};

struct MemoryEntry {
  fingerprint: Vec<u8>,
  files: BTreeMap<RelativePath, Arc<[u8]>>,
}

/// Process-local build cache.
///
/// Fingerprints are kept in their encoded form; two fingerprints are equal
/// exactly when their encodings are.
#[derive(Default)]
pub struct MemoryBuildCache {
  entries: RwLock<HashMap<BuilderId, MemoryEntry>>,
  locks: IdentityLocks,
}

impl MemoryBuildCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop the entry for `id`; returns whether one existed.
  pub fn remove(&self, id: &BuilderId) -> bool {
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.remove(id).is_some()
  }
}

impl BuildCache for MemoryBuildCache {
  fn identity_lock(&self, id: &BuilderId) -> Arc<Mutex<()>> {
    self.locks.get(id)
  }

  fn contains(&self, id: &BuilderId, fingerprint: &dyn Fingerprint) -> bool {
    let encoded = match encode(fingerprint) {
      Ok(encoded) => encoded,
      Err(err) => {
        warn!(builder = %id, error = %err, "cannot encode fingerprint, treating as cache miss");
        return false;
      }
    };

    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
    entries.get(id).is_some_and(|entry| entry.fingerprint == encoded)
  }

  fn store(
    &self,
    id: &BuilderId,
    fingerprint: &dyn Fingerprint,
    outputs: &BTreeSet<RelativePath>,
    source: &dyn FileSystemDirectory,
  ) -> Result<(), CacheError> {
    let encoded = encode(fingerprint).map_err(|source| CacheError::Protocol { id: id.clone(), source })?;

    let mut files = BTreeMap::new();
    for path in outputs {
      let contents = source.read_file(path).map_err(|source| CacheError::Artifact {
        id: id.clone(),
        source,
      })?;
      files.insert(path.clone(), Arc::from(contents));
    }

    debug!(builder = %id, files = files.len(), "stored build outputs in memory cache");
    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    entries.insert(
      id.clone(),
      MemoryEntry {
        fingerprint: encoded,
        files,
      },
    );
    Ok(())
  }

  fn restore(&self, id: &BuilderId, target: &dyn FileSystemDirectory) -> Result<BTreeSet<RelativePath>, CacheError> {
    let files = {
      let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
      let entry = entries.get(id).ok_or_else(|| CacheError::Missing(id.clone()))?;
      entry.files.clone()
    };

    for (path, contents) in &files {
      target.write_file(path, contents).map_err(|source| CacheError::Artifact {
        id: id.clone(),
        source,
      })?;
    }
    Ok(files.into_keys().collect())
  }
}
