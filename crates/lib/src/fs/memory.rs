//! In-memory backend.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, PoisonError, RwLock};

use super::{FileSystemDirectory, FsError, RelativePath};

/// A directory tree held in memory.
///
/// The map lock is only held for the duration of a single insert, lookup or
/// removal; file contents are shared immutable buffers, so readers never hold
/// the lock while consuming data.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
  name: String,
  files: RwLock<BTreeMap<RelativePath, Arc<[u8]>>>,
}

impl MemoryDirectory {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      files: RwLock::default(),
    }
  }

  /// Number of files currently stored.
  pub fn len(&self) -> usize {
    self.files.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn get(&self, path: &RelativePath) -> Option<Arc<[u8]>> {
    self.files.read().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
  }
}

impl FileSystemDirectory for MemoryDirectory {
  fn describe(&self) -> String {
    format!("memory:{}", self.name)
  }

  fn exists(&self, path: &RelativePath) -> bool {
    self.get(path).is_some()
  }

  fn open_file(&self, path: &RelativePath) -> Result<Box<dyn Read + Send + '_>, FsError> {
    let data = self.get(path).ok_or_else(|| FsError::NotFound(path.clone()))?;
    Ok(Box::new(Cursor::new(data)))
  }

  fn write_file(&self, path: &RelativePath, contents: &[u8]) -> Result<(), FsError> {
    let data: Arc<[u8]> = Arc::from(contents);
    self.files.write().unwrap_or_else(PoisonError::into_inner).insert(path.clone(), data);
    Ok(())
  }

  fn delete_file(&self, path: &RelativePath) -> Result<(), FsError> {
    self
      .files
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(path)
      .map(|_| ())
      .ok_or_else(|| FsError::NotFound(path.clone()))
  }

  fn list_files(&self, dir: Option<&RelativePath>) -> Result<Vec<RelativePath>, FsError> {
    let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
    Ok(
      files
        .keys()
        .filter(|path| dir.is_none_or(|dir| path.starts_with(dir) && *path != dir))
        .cloned()
        .collect(),
    )
  }
}
