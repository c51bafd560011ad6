//! Rooted file system access with relative-path addressing.
//!
//! Builders, fingerprints and caches never see OS paths directly: they address
//! files through [`RelativePath`] inside a [`FileSystemDirectory`]. This keeps
//! the core portable across storage backends (local disk, memory, ...).

mod local;
mod memory;

use std::fmt;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalDirectory;
pub use memory::MemoryDirectory;

/// Errors raised by file system access.
#[derive(Debug, Error)]
pub enum FsError {
  /// The path is not a valid relative path.
  #[error("invalid relative path {path:?}: {reason}")]
  InvalidPath { path: String, reason: &'static str },

  /// The file does not exist.
  #[error("file not found: {0}")]
  NotFound(RelativePath),

  /// I/O error while accessing a file.
  #[error("io error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },
}

impl FsError {
  /// Create an I/O error with path context.
  pub fn io(path: impl fmt::Display, source: io::Error) -> Self {
    Self::Io {
      path: path.to_string(),
      source,
    }
  }
}

/// A normalized, forward-slash separated path relative to some root.
///
/// Empty paths, absolute paths and `..` segments are rejected; `.` segments and
/// repeated separators are dropped, and `\` is accepted as a separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
  pub fn new(path: impl AsRef<str>) -> Result<Self, FsError> {
    let raw = path.as_ref();
    let invalid = |reason| FsError::InvalidPath {
      path: raw.to_string(),
      reason,
    };

    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
      return Err(invalid("absolute paths are not allowed"));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
      match segment {
        "" | "." => continue,
        ".." => return Err(invalid("parent segments are not allowed")),
        s if segments.is_empty() && s.len() == 2 && s.ends_with(':') => {
          return Err(invalid("drive prefixes are not allowed"));
        }
        s => segments.push(s),
      }
    }

    if segments.is_empty() {
      return Err(invalid("path is empty"));
    }

    Ok(Self(segments.join("/")))
  }

  /// Convert a relative OS path (e.g. from a directory walk) into a `RelativePath`.
  ///
  /// Segments must be valid UTF-8 and must not contain `\`, so the result
  /// always resolves back to the same file.
  pub fn from_path(path: &Path) -> Result<Self, FsError> {
    let invalid = |reason| FsError::InvalidPath {
      path: path.display().to_string(),
      reason,
    };

    let mut segments = Vec::new();
    for component in path.components() {
      match component {
        Component::Normal(s) => {
          let segment = s.to_str().ok_or_else(|| invalid("file names must be valid UTF-8"))?;
          if segment.contains('\\') {
            return Err(invalid("file names must not contain a backslash"));
          }
          segments.push(segment);
        }
        Component::CurDir => {}
        _ => return Err(invalid("only plain segments are allowed")),
      }
    }
    Self::new(segments.join("/"))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Append another relative path.
  pub fn join(&self, other: &RelativePath) -> RelativePath {
    RelativePath(format!("{}/{}", self.0, other.0))
  }

  /// The containing directory, or `None` for a top-level entry.
  pub fn parent(&self) -> Option<RelativePath> {
    self.0.rsplit_once('/').map(|(parent, _)| RelativePath(parent.to_string()))
  }

  /// The last segment.
  pub fn file_name(&self) -> &str {
    self.0.rsplit_once('/').map(|(_, name)| name).unwrap_or(&self.0)
  }

  /// Whether `self` is `dir` or lies beneath it.
  pub fn starts_with(&self, dir: &RelativePath) -> bool {
    self.0 == dir.0 || (self.0.starts_with(&dir.0) && self.0.as_bytes().get(dir.0.len()) == Some(&b'/'))
  }

  /// Resolve against an OS directory.
  pub fn to_path(&self, root: &Path) -> PathBuf {
    self.0.split('/').fold(root.to_path_buf(), |acc, segment| acc.join(segment))
  }
}

impl fmt::Display for RelativePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for RelativePath {
  type Err = FsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::new(s)
  }
}

impl TryFrom<String> for RelativePath {
  type Error = FsError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl From<RelativePath> for String {
  fn from(value: RelativePath) -> Self {
    value.0
  }
}

/// A directory tree addressed by relative paths.
///
/// Implementations must be safe to share between concurrently running
/// builders. Writes to distinct paths must not serialize on a directory-wide
/// lock.
pub trait FileSystemDirectory: Send + Sync {
  /// Human readable description of the root, for logs and errors.
  fn describe(&self) -> String;

  /// Check whether a file exists.
  fn exists(&self, path: &RelativePath) -> bool;

  /// Open a file for streaming reads.
  fn open_file(&self, path: &RelativePath) -> Result<Box<dyn Read + Send + '_>, FsError>;

  /// Read a whole file.
  fn read_file(&self, path: &RelativePath) -> Result<Vec<u8>, FsError> {
    let mut reader = self.open_file(path)?;
    let mut contents = Vec::new();
    reader
      .read_to_end(&mut contents)
      .map_err(|e| FsError::io(path, e))?;
    Ok(contents)
  }

  /// Create or replace a file, creating missing parent directories.
  fn write_file(&self, path: &RelativePath, contents: &[u8]) -> Result<(), FsError>;

  /// Delete a file. Deleting a missing file is an error.
  fn delete_file(&self, path: &RelativePath) -> Result<(), FsError>;

  /// Recursively list files below `dir` (or the whole tree), sorted.
  fn list_files(&self, dir: Option<&RelativePath>) -> Result<Vec<RelativePath>, FsError>;
}
