use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{BuildCache, CacheError, IdentityLocks};
use crate::builder::BuilderId;
use crate::cache_lock::CacheLock;
use crate::consts::{APP_NAME, ENTRY_FILES_DIR, ENTRY_FINGERPRINT_FILENAME, ENTRY_INDEX_FILENAME};
use crate::fingerprint::{Fingerprint, ProtocolRegistry, encode};
use crate::fs::{FileSystemDirectory, LocalDirectory, RelativePath};
use crate::platform::paths::cache_dir;
use crate::util::hash::short_hash;

const ENTRY_VERSION: u32 = 1;

const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Serialize, Deserialize)]
struct EntryIndex {
  version: u32,
  builder: BuilderId,
  files: BTreeSet<RelativePath>,
}

/// On-disk build cache.
///
/// ```text
/// <root>/
///   .lock
///   <short-hash(id)>/
///     fingerprint.bin    encoded fingerprint
///     entry.json         builder id and artifact list
///     files/...          artifact copies
/// ```
///
/// Entries are written to a staging directory under the root and renamed
/// into place, so a reader never sees a half-written entry. A failed store
/// leaves nothing behind. The cache root is locked for the
/// lifetime of the value.
pub struct FileBuildCache {
  root: PathBuf,
  registry: Arc<ProtocolRegistry>,
  locks: IdentityLocks,
  lock: CacheLock,
}

impl FileBuildCache {
  /// Open (creating if needed) the cache at `root`.
  pub fn open(root: impl Into<PathBuf>, registry: Arc<ProtocolRegistry>) -> Result<Self, CacheError> {
    let root = root.into();
    let lock = CacheLock::acquire(&root, APP_NAME)?;
    info!(root = %root.display(), "opened build cache");
    Ok(Self {
      root,
      registry,
      locks: IdentityLocks::new(),
      lock,
    })
  }

  /// Open the cache at the default location (see [`cache_dir`]).
  pub fn open_default(registry: Arc<ProtocolRegistry>) -> Result<Self, CacheError> {
    let root = cache_dir().ok_or(CacheError::NoCacheRoot)?;
    Self::open(root, registry)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn lock(&self) -> &CacheLock {
    &self.lock
  }

  fn entry_dir(&self, id: &BuilderId) -> PathBuf {
    self.root.join(short_hash(&id.to_string()))
  }

  fn read_index(&self, id: &BuilderId, entry: &Path) -> Result<EntryIndex, CacheError> {
    let path = entry.join(ENTRY_INDEX_FILENAME);
    let contents = match fs::read_to_string(&path) {
      Ok(contents) => contents,
      Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(CacheError::Missing(id.clone())),
      Err(err) => return Err(CacheError::io(path, err)),
    };
    let index: EntryIndex = serde_json::from_str(&contents).map_err(|e| CacheError::Corrupt {
      id: id.clone(),
      reason: format!("unreadable index: {e}"),
    })?;

    if index.version != ENTRY_VERSION {
      return Err(CacheError::Corrupt {
        id: id.clone(),
        reason: format!("unsupported entry version {}", index.version),
      });
    }
    if &index.builder != id {
      return Err(CacheError::Corrupt {
        id: id.clone(),
        reason: format!("entry belongs to {}", index.builder),
      });
    }
    Ok(index)
  }

  fn stored_fingerprint(&self, id: &BuilderId) -> Result<Box<dyn Fingerprint>, CacheError> {
    let entry = self.entry_dir(id);
    self.read_index(id, &entry)?;

    let path = entry.join(ENTRY_FINGERPRINT_FILENAME);
    let bytes = fs::read(&path).map_err(|e| CacheError::io(path, e))?;
    self.registry.decode(&bytes).map_err(|e| CacheError::Corrupt {
      id: id.clone(),
      reason: format!("undecodable fingerprint: {e}"),
    })
  }

  /// Delete the entry for `id`; returns whether one existed.
  pub fn remove(&self, id: &BuilderId) -> Result<bool, CacheError> {
    let lock = self.identity_lock(id);
    let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    let entry = self.entry_dir(id);
    match fs::remove_dir_all(&entry) {
      Ok(()) => Ok(true),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(err) => Err(CacheError::io(entry, err)),
    }
  }

  /// Delete every entry, keeping the lock file.
  pub fn clear(&self) -> Result<(), CacheError> {
    let entries = fs::read_dir(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
    for entry in entries {
      let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
      let path = entry.path();
      if path == self.lock.lock_path() {
        continue;
      }
      let result = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      result.map_err(|e| CacheError::io(&path, e))?;
    }
    info!(root = %self.root.display(), "cleared build cache");
    Ok(())
  }
}

impl BuildCache for FileBuildCache {
  fn identity_lock(&self, id: &BuilderId) -> Arc<Mutex<()>> {
    self.locks.get(id)
  }

  fn contains(&self, id: &BuilderId, fingerprint: &dyn Fingerprint) -> bool {
    match self.stored_fingerprint(id) {
      Ok(stored) => stored.eq_fingerprint(fingerprint),
      Err(CacheError::Missing(_)) => false,
      Err(err) => {
        warn!(builder = %id, error = %err, "ignoring unusable cache entry");
        false
      }
    }
  }

  fn store(
    &self,
    id: &BuilderId,
    fingerprint: &dyn Fingerprint,
    outputs: &BTreeSet<RelativePath>,
    source: &dyn FileSystemDirectory,
  ) -> Result<(), CacheError> {
    let encoded = encode(fingerprint).map_err(|source| CacheError::Protocol { id: id.clone(), source })?;

    let entry = self.entry_dir(id);
    let staging = tempfile::Builder::new()
      .prefix(STAGING_PREFIX)
      .tempdir_in(&self.root)
      .map_err(|e| CacheError::io(&self.root, e))?;

    let files = LocalDirectory::new(staging.path().join(ENTRY_FILES_DIR));
    fs::create_dir_all(files.root()).map_err(|e| CacheError::io(files.root(), e))?;
    for path in outputs {
      let contents = source.read_file(path).map_err(|source| CacheError::Artifact {
        id: id.clone(),
        source,
      })?;
      files.write_file(path, &contents).map_err(|source| CacheError::Artifact {
        id: id.clone(),
        source,
      })?;
    }

    let index = EntryIndex {
      version: ENTRY_VERSION,
      builder: id.clone(),
      files: outputs.clone(),
    };
    let index_path = staging.path().join(ENTRY_INDEX_FILENAME);
    let index_json = serde_json::to_string_pretty(&index).map_err(|e| CacheError::io(&index_path, io::Error::other(e)))?;
    fs::write(&index_path, index_json).map_err(|e| CacheError::io(&index_path, e))?;

    let fingerprint_path = staging.path().join(ENTRY_FINGERPRINT_FILENAME);
    fs::write(&fingerprint_path, encoded).map_err(|e| CacheError::io(&fingerprint_path, e))?;

    if entry.exists() {
      fs::remove_dir_all(&entry).map_err(|e| CacheError::io(&entry, e))?;
    }
    let staged = staging.keep();
    if let Err(err) = fs::rename(&staged, &entry) {
      let _ = fs::remove_dir_all(&staged);
      return Err(CacheError::io(&entry, err));
    }

    debug!(builder = %id, files = outputs.len(), entry = %entry.display(), "stored build outputs");
    Ok(())
  }

  fn restore(&self, id: &BuilderId, target: &dyn FileSystemDirectory) -> Result<BTreeSet<RelativePath>, CacheError> {
    let entry = self.entry_dir(id);
    let index = self.read_index(id, &entry)?;
    let files = LocalDirectory::new(entry.join(ENTRY_FILES_DIR));

    for path in &index.files {
      let contents = files.read_file(path).map_err(|e| CacheError::Corrupt {
        id: id.clone(),
        reason: e.to_string(),
      })?;
      target.write_file(path, &contents).map_err(|source| CacheError::Artifact {
        id: id.clone(),
        source,
      })?;
    }

    debug!(builder = %id, files = index.files.len(), "restored build outputs");
    Ok(index.files)
  }
}
