//! Dependencies: the objects that compute a builder's current fingerprint.
//!
//! Creating a fingerprint may read files but never mutates build state. An
//! unreadable input is reported as an error and is never treated as
//! "changed" or "unchanged".

mod parameters;
mod source_set;

use std::sync::Arc;

use thiserror::Error;

use crate::fingerprint::{CombinedFingerprint, EmptyFingerprint, Fingerprint};
use crate::fs::{FsError, RelativePath};

pub use parameters::ParametersDependencies;
pub use source_set::{IgnoreList, SharedSourceSet, SourceSet, SourceSetDependencies};

/// Errors raised while computing a fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
  /// A declared input could not be read.
  #[error("cannot read input {path} in {root}: {source}")]
  Unreadable {
    root: String,
    path: RelativePath,
    #[source]
    source: FsError,
  },

  /// Enumerating an input directory failed.
  #[error("cannot enumerate inputs in {root}: {source}")]
  Enumerate {
    root: String,
    #[source]
    source: FsError,
  },

  /// An ignore rule is not a valid glob.
  #[error("invalid ignore pattern {pattern:?}: {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  /// A parameter block could not be serialized.
  #[error("cannot serialize parameters {name:?}: {source}")]
  Parameters {
    name: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Computes the fingerprint of a builder's current input state.
pub trait Dependencies: Send + Sync {
  fn create_fingerprint(&self) -> Result<Box<dyn Fingerprint>, FingerprintError>;
}

/// Shared handle to a dependencies object.
pub type DependenciesRef = Arc<dyn Dependencies>;

/// Dependencies of a builder without observable inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl Dependencies for NoDependencies {
  fn create_fingerprint(&self) -> Result<Box<dyn Fingerprint>, FingerprintError> {
    Ok(Box::new(EmptyFingerprint))
  }
}

/// Several dependencies fingerprinted together, in order.
#[derive(Default, Clone)]
pub struct MultipleDependencies {
  parts: Vec<DependenciesRef>,
}

impl MultipleDependencies {
  pub fn new(parts: impl IntoIterator<Item = DependenciesRef>) -> Self {
    Self {
      parts: parts.into_iter().collect(),
    }
  }

  pub fn push(&mut self, dependencies: DependenciesRef) {
    self.parts.push(dependencies);
  }

  pub fn len(&self) -> usize {
    self.parts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.parts.is_empty()
  }
}

impl Dependencies for MultipleDependencies {
  fn create_fingerprint(&self) -> Result<Box<dyn Fingerprint>, FingerprintError> {
    let parts = self
      .parts
      .iter()
      .map(|part| part.create_fingerprint())
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Box::new(CombinedFingerprint::new(parts)))
  }
}
