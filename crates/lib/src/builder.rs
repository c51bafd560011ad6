//! The builder contract: a named unit of work producing file artifacts.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::deps::Dependencies;
use crate::fs::RelativePath;

/// Failure reported by a builder's `run`.
pub type BuilderError = Box<dyn std::error::Error + Send + Sync>;

/// Stable identity of a builder: its kind plus a configuration key.
///
/// The identity outlives a single build; caches key their entries by it, so
/// two builders with the same id are treated as the same unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuilderId {
  kind: String,
  key: String,
}

impl BuilderId {
  pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      key: key.into(),
    }
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn key(&self) -> &str {
    &self.key
  }
}

impl fmt::Display for BuilderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.key)
  }
}

/// A unit of work producing a set of output-relative paths.
///
/// `run` is blocking and is never called concurrently for the same identity
/// by the build context. Given an unchanged fingerprint it must produce an
/// equivalent result set.
pub trait Builder: Send + Sync {
  fn id(&self) -> &BuilderId;

  /// The inputs this builder observes.
  fn dependencies(&self) -> &dyn Dependencies;

  fn run(&self) -> Result<BTreeSet<RelativePath>, BuilderError>;
}

pub type BuilderRef = Arc<dyn Builder>;
