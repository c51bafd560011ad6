use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Dependencies, FingerprintError};
use crate::fingerprint::{Fingerprint, SourceSetFingerprint};
use crate::fs::{FileSystemDirectory, FsError, RelativePath};
use crate::util::hash::hash_reader;

/// A named set of suite-relative source files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet {
  name: String,
  files: BTreeSet<RelativePath>,
}

/// A source set shared between its owner and the dependencies observing it.
pub type SharedSourceSet = Arc<RwLock<SourceSet>>;

impl SourceSet {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      files: BTreeSet::new(),
    }
  }

  pub fn with_files(mut self, files: impl IntoIterator<Item = RelativePath>) -> Self {
    self.files.extend(files);
    self
  }

  /// Collect every file below `dir` (or the whole tree) into a new set.
  pub fn scan(
    name: impl Into<String>,
    root: &dyn FileSystemDirectory,
    dir: Option<&RelativePath>,
  ) -> Result<Self, FsError> {
    let files = root.list_files(dir)?;
    Ok(Self::new(name).with_files(files))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Add a file; returns `false` if it was already present.
  pub fn add(&mut self, path: RelativePath) -> bool {
    self.files.insert(path)
  }

  /// Remove a file; returns `false` if it was not present.
  pub fn remove(&mut self, path: &RelativePath) -> bool {
    self.files.remove(path)
  }

  pub fn contains(&self, path: &RelativePath) -> bool {
    self.files.contains(path)
  }

  pub fn files(&self) -> impl Iterator<Item = &RelativePath> {
    self.files.iter()
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn into_shared(self) -> SharedSourceSet {
    Arc::new(RwLock::new(self))
  }
}

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

/// Glob rules for files that never take part in a fingerprint.
///
/// A rule matches either the whole relative path (`obj/**`, `*.tmp`) or the
/// file name alone (`Thumbs.db`).
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
  patterns: Vec<glob::Pattern>,
}

impl IgnoreList {
  pub fn new<I, S>(patterns: I) -> Result<Self, FingerprintError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut list = Self::default();
    for pattern in patterns {
      list.add(pattern.as_ref())?;
    }
    Ok(list)
  }

  pub fn add(&mut self, pattern: &str) -> Result<(), FingerprintError> {
    let compiled = glob::Pattern::new(pattern).map_err(|source| FingerprintError::InvalidPattern {
      pattern: pattern.to_string(),
      source,
    })?;
    self.patterns.push(compiled);
    Ok(())
  }

  /// `*` and `?` stay within one segment; only `**` crosses directories.
  pub fn matches(&self, path: &RelativePath) -> bool {
    self.patterns.iter().any(|pattern| {
      pattern.matches_with(path.as_str(), MATCH_OPTIONS) || pattern.matches_with(path.file_name(), MATCH_OPTIONS)
    })
  }

  /// The rule texts, in insertion order.
  pub fn rules(&self) -> Vec<String> {
    self.patterns.iter().map(|p| p.as_str().to_string()).collect()
  }

  pub fn is_empty(&self) -> bool {
    self.patterns.is_empty()
  }
}

/// Dependency on the contents of a source set.
///
/// Every non-ignored file of the set is hashed from `root`. With
/// `full_dependency` the ignore rules are part of the fingerprint as well, so
/// editing them invalidates cached results.
pub struct SourceSetDependencies {
  root: Arc<dyn FileSystemDirectory>,
  sources: SharedSourceSet,
  ignore: IgnoreList,
  full_dependency: bool,
}

impl SourceSetDependencies {
  pub fn new(root: Arc<dyn FileSystemDirectory>, sources: SharedSourceSet) -> Self {
    Self {
      root,
      sources,
      ignore: IgnoreList::default(),
      full_dependency: false,
    }
  }

  pub fn with_ignore(mut self, ignore: IgnoreList) -> Self {
    self.ignore = ignore;
    self
  }

  pub fn with_full_dependency(mut self, full_dependency: bool) -> Self {
    self.full_dependency = full_dependency;
    self
  }

  pub fn sources(&self) -> &SharedSourceSet {
    &self.sources
  }
}

impl Dependencies for SourceSetDependencies {
  fn create_fingerprint(&self) -> Result<Box<dyn Fingerprint>, FingerprintError> {
    let files: Vec<RelativePath> = {
      let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
      sources.files().filter(|path| !self.ignore.matches(path)).cloned().collect()
    };

    let mut digests = BTreeMap::new();
    for path in files {
      let digest = self
        .root
        .open_file(&path)
        .and_then(|reader| hash_reader(reader).map_err(|e| FsError::io(&path, e)))
        .map_err(|source| FingerprintError::Unreadable {
          root: self.root.describe(),
          path: path.clone(),
          source,
        })?;
      trace!(file = %path, digest = %digest, "hashed source file");
      digests.insert(path, digest);
    }

    let exclusions = self.full_dependency.then(|| self.ignore.rules());
    Ok(Box::new(SourceSetFingerprint::new(digests, exclusions)))
  }
}
