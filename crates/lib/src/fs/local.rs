//! Local disk backend.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{FileSystemDirectory, FsError, RelativePath};

/// A directory on the local file system.
///
/// Writes go through a temporary file in the destination directory followed
/// by a rename, so concurrent writers of different paths never block each
/// other and readers never observe half-written files.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
  root: PathBuf,
}

impl LocalDirectory {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// A directory rooted at a subdirectory of this one.
  pub fn child(&self, dir: &RelativePath) -> LocalDirectory {
    LocalDirectory::new(dir.to_path(&self.root))
  }
}

impl FileSystemDirectory for LocalDirectory {
  fn describe(&self) -> String {
    self.root.display().to_string()
  }

  fn exists(&self, path: &RelativePath) -> bool {
    path.to_path(&self.root).is_file()
  }

  fn open_file(&self, path: &RelativePath) -> Result<Box<dyn Read + Send + '_>, FsError> {
    match fs::File::open(path.to_path(&self.root)) {
      Ok(file) => Ok(Box::new(io::BufReader::new(file))),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::NotFound(path.clone())),
      Err(e) => Err(FsError::io(path, e)),
    }
  }

  fn write_file(&self, path: &RelativePath, contents: &[u8]) -> Result<(), FsError> {
    let full = path.to_path(&self.root);
    let parent = full.parent().unwrap_or(&self.root);
    fs::create_dir_all(parent).map_err(|e| FsError::io(path, e))?;

    let mut staged = NamedTempFile::new_in(parent).map_err(|e| FsError::io(path, e))?;
    staged.write_all(contents).map_err(|e| FsError::io(path, e))?;
    staged.persist(&full).map_err(|e| FsError::io(path, e.error))?;
    Ok(())
  }

  fn delete_file(&self, path: &RelativePath) -> Result<(), FsError> {
    match fs::remove_file(path.to_path(&self.root)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::NotFound(path.clone())),
      Err(e) => Err(FsError::io(path, e)),
    }
  }

  fn list_files(&self, dir: Option<&RelativePath>) -> Result<Vec<RelativePath>, FsError> {
    let start = match dir {
      Some(dir) => dir.to_path(&self.root),
      None => self.root.clone(),
    };
    if !start.is_dir() {
      return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&start).sort_by_file_name() {
      let entry = entry.map_err(|e| {
        let path = e.path().map(|p| p.display().to_string()).unwrap_or_else(|| self.describe());
        FsError::io(path, io::Error::other(e.to_string()))
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
      files.push(RelativePath::from_path(rel)?);
    }

    files.sort();
    Ok(files)
  }
}
