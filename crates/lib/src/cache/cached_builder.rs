use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError};

use tracing::{debug, info, warn};

use super::BuildCache;
use crate::builder::{Builder, BuilderError, BuilderId, BuilderRef};
use crate::deps::Dependencies;
use crate::fs::{FileSystemDirectory, RelativePath};

/// A builder that consults a [`BuildCache`] before running the builder it wraps.
///
/// For an input state already seen, the stored artifacts are restored into
/// `target` and the wrapped builder is not invoked. Otherwise the wrapped
/// builder runs and its outputs, read back from `target`, are stored. A failed
/// run never reaches the cache.
pub struct CachedBuilder {
  inner: BuilderRef,
  cache: Arc<dyn BuildCache>,
  target: Arc<dyn FileSystemDirectory>,
}

impl CachedBuilder {
  pub fn new(inner: BuilderRef, cache: Arc<dyn BuildCache>, target: Arc<dyn FileSystemDirectory>) -> Self {
    Self { inner, cache, target }
  }

  pub fn inner(&self) -> &BuilderRef {
    &self.inner
  }
}

impl Builder for CachedBuilder {
  fn id(&self) -> &BuilderId {
    self.inner.id()
  }

  fn dependencies(&self) -> &dyn Dependencies {
    self.inner.dependencies()
  }

  fn run(&self) -> Result<BTreeSet<RelativePath>, BuilderError> {
    let id = self.inner.id();
    let lock = self.cache.identity_lock(id);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

    let fingerprint = self.inner.dependencies().create_fingerprint()?;

    if self.cache.contains(id, fingerprint.as_ref()) {
      match self.cache.restore(id, self.target.as_ref()) {
        Ok(outputs) => {
          info!(builder = %id, files = outputs.len(), "up to date, restored from cache");
          return Ok(outputs);
        }
        Err(err) => {
          warn!(builder = %id, error = %err, "cache restore failed, rebuilding");
        }
      }
    } else {
      debug!(builder = %id, "cache miss");
    }

    let outputs = self.inner.run()?;

    if let Err(err) = self
      .cache
      .store(id, fingerprint.as_ref(), &outputs, self.target.as_ref())
    {
      warn!(builder = %id, error = %err, "failed to store build outputs in cache");
    }

    Ok(outputs)
  }
}
