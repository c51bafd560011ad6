//! Build caches: persistent maps from (builder identity, fingerprint) to the
//! artifacts the builder produced for that input state.
//!
//! A cache holds at most one entry per identity. `contains` answers whether
//! that entry was stored for an equal fingerprint; `restore` copies the
//! stored artifacts regardless of the current fingerprint, so callers check
//! `contains` first. Callers serialize the check/restore/store sequence for
//! one identity through [`BuildCache::identity_lock`].

mod cached_builder;
mod file;
mod memory;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::builder::BuilderId;
use crate::cache_lock::CacheLockError;
use crate::fingerprint::{Fingerprint, ProtocolError};
use crate::fs::{FileSystemDirectory, FsError, RelativePath};

pub use cached_builder::CachedBuilder;
pub use file::FileBuildCache;
pub use memory::MemoryBuildCache;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache i/o error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cannot copy artifact for {id}: {source}")]
  Artifact {
    id: BuilderId,
    #[source]
    source: FsError,
  },

  #[error("no cache entry for {0}")]
  Missing(BuilderId),

  #[error("corrupt cache entry for {id}: {reason}")]
  Corrupt { id: BuilderId, reason: String },

  #[error("cannot encode fingerprint of {id}: {source}")]
  Protocol {
    id: BuilderId,
    #[source]
    source: ProtocolError,
  },

  #[error("no cache directory could be determined; set KILN_CACHE_DIR")]
  NoCacheRoot,

  #[error(transparent)]
  Lock(#[from] CacheLockError),
}

impl CacheError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Store of previously produced artifact sets.
///
/// Implementations support concurrent use; operations for distinct
/// identities never block each other.
pub trait BuildCache: Send + Sync {
  /// The mutex serializing cache use for one identity.
  fn identity_lock(&self, id: &BuilderId) -> Arc<Mutex<()>>;

  /// Whether the entry for `id` was stored under a fingerprint equal to
  /// `fingerprint`. Unreadable entries count as absent.
  fn contains(&self, id: &BuilderId, fingerprint: &dyn Fingerprint) -> bool;

  /// Replace the entry for `id` with the files in `outputs`, read from `source`.
  fn store(
    &self,
    id: &BuilderId,
    fingerprint: &dyn Fingerprint,
    outputs: &BTreeSet<RelativePath>,
    source: &dyn FileSystemDirectory,
  ) -> Result<(), CacheError>;

  /// Copy the stored artifacts of `id` into `target` and return their paths.
  fn restore(&self, id: &BuilderId, target: &dyn FileSystemDirectory) -> Result<BTreeSet<RelativePath>, CacheError>;
}

/// Lazily created per-identity mutexes.
#[derive(Debug, Default)]
pub struct IdentityLocks {
  locks: Mutex<HashMap<BuilderId, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// The lock for `id`; the same `Arc` is returned for equal identities.
  pub fn get(&self, id: &BuilderId) -> Arc<Mutex<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(id.clone()).or_default().clone()
  }
}
