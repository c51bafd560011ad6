//! Error, report and configuration types for build execution.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;

use thiserror::Error;
use tracing::warn;

use crate::builder::{BuilderError, BuilderId};
use crate::consts::{FAIL_FAST_ENV, JOBS_ENV};
use crate::fs::RelativePath;

/// Errors raised by a [`BuildContext`](super::BuildContext).
#[derive(Debug, Error)]
pub enum BuildError {
  /// A graph transformation vetoed the run; no builder executed.
  #[error("build cancelled by transformation")]
  Cancelled,

  /// The prerequisite graph has a cycle through `builder`.
  #[error("dependency cycle detected involving {builder}")]
  Cycle { builder: BuilderId },

  /// A builder id that was never added to this context.
  #[error("builder {0} is not part of this build context")]
  UnknownBuilder(BuilderId),

  /// Results were requested for a builder that has not executed.
  #[error("builder {0} has not run in this build context")]
  NotRun(BuilderId),

  /// The context already ran and can no longer be modified or rerun.
  #[error("build context has already run")]
  ContextSealed,

  /// A builder's `run` failed.
  #[error("builder {builder} failed: {source}")]
  BuilderFailed {
    builder: BuilderId,
    #[source]
    source: BuilderError,
  },

  /// The worker executing a builder panicked or was aborted.
  #[error("builder {builder} did not complete: {source}")]
  Join {
    builder: BuilderId,
    #[source]
    source: tokio::task::JoinError,
  },

  /// Writing a graph dump failed.
  #[error("cannot write graph dump: {0}")]
  Dump(#[source] io::Error),
}

/// A builder that was never dispatched because a prerequisite failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBuilder {
  pub builder: BuilderId,
  /// The failed (or itself skipped) prerequisite.
  pub failed_prerequisite: BuilderId,
}

impl fmt::Display for SkippedBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} (prerequisite {} failed)", self.builder, self.failed_prerequisite)
  }
}

/// Outcome of one build run.
#[derive(Debug, Default)]
pub struct RunReport {
  /// Result sets of the builders that succeeded.
  pub results: BTreeMap<BuilderId, BTreeSet<RelativePath>>,

  /// Successful builders by wave, then by insertion order within a wave.
  pub executed: Vec<BuilderId>,

  /// Failures, in wave order and then insertion order within a wave.
  pub failed: Vec<BuildError>,

  /// Builders skipped because a prerequisite failed.
  pub skipped: Vec<SkippedBuilder>,

  /// Builders never dispatched because fail-fast stopped the run.
  pub not_started: Vec<BuilderId>,
}

impl RunReport {
  /// Returns true if every scheduled builder succeeded.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty() && self.not_started.is_empty()
  }

  /// The union of every executed builder's result set.
  pub fn outputs(&self) -> BTreeSet<RelativePath> {
    self.results.values().flatten().cloned().collect()
  }

  /// The unioned outputs, or the first failure.
  pub fn into_result(mut self) -> Result<BTreeSet<RelativePath>, BuildError> {
    if self.failed.is_empty() {
      Ok(self.outputs())
    } else {
      Err(self.failed.swap_remove(0))
    }
  }
}

/// Configuration for build execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
  /// Maximum number of builders running at the same time.
  pub parallelism: usize,

  /// Stop dispatching new waves after the first failure.
  pub fail_fast: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      fail_fast: false,
    }
  }
}

impl BuildConfig {
  /// Defaults overridden by `KILN_JOBS` and `KILN_FAIL_FAST`.
  ///
  /// Unparsable values are ignored with a warning.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(jobs) = std::env::var(JOBS_ENV) {
      match jobs.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.parallelism = n,
        _ => warn!(var = JOBS_ENV, value = %jobs, "ignoring invalid job count"),
      }
    }

    if let Ok(value) = std::env::var(FAIL_FAST_ENV) {
      match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => config.fail_fast = true,
        "0" | "false" | "no" | "off" | "" => config.fail_fast = false,
        _ => warn!(var = FAIL_FAST_ENV, value = %value, "ignoring invalid boolean"),
      }
    }

    config
  }

  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
    self.fail_fast = fail_fast;
    self
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
