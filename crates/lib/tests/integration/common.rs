//! Shared helpers for kiln-lib integration tests.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_lib::builder::{Builder, BuilderError, BuilderId, BuilderRef};
use kiln_lib::deps::{Dependencies, DependenciesRef, NoDependencies};
use kiln_lib::execute::{BuildContext, BuildError};
use kiln_lib::fs::{FileSystemDirectory, MemoryDirectory, RelativePath};

pub fn rel(path: &str) -> RelativePath {
  RelativePath::new(path).unwrap()
}

pub fn paths(items: &[&str]) -> BTreeSet<RelativePath> {
  items.iter().map(|p| rel(p)).collect()
}

/// Run a future on a fresh current-thread runtime.
pub fn block_on<F: Future>(f: F) -> F::Output {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
    .block_on(f)
}

/// Records which builders started and finished, and any ordering violation.
#[derive(Default)]
pub struct RunLog {
  finished: Mutex<Vec<BuilderId>>,
  violations: Mutex<Vec<String>>,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

impl RunLog {
  pub fn finished(&self) -> Vec<String> {
    self.finished.lock().unwrap().iter().map(|id| id.key().to_string()).collect()
  }

  pub fn has_finished(&self, id: &BuilderId) -> bool {
    self.finished.lock().unwrap().contains(id)
  }

  pub fn violations(&self) -> Vec<String> {
    self.violations.lock().unwrap().clone()
  }

  pub fn max_running(&self) -> usize {
    self.max_running.load(Ordering::SeqCst)
  }
}

/// Shared target directory and run log for one test.
pub struct TestEnv {
  pub target: Arc<MemoryDirectory>,
  pub log: Arc<RunLog>,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      target: Arc::new(MemoryDirectory::new("target")),
      log: Arc::new(RunLog::default()),
    }
  }

  pub fn builder(&self, key: &str) -> TestBuilderSpec {
    TestBuilderSpec {
      id: BuilderId::new("test", key),
      outputs: Vec::new(),
      prerequisites: Vec::new(),
      dependencies: Arc::new(NoDependencies),
      fail: false,
      delay: Duration::ZERO,
      target: self.target.clone(),
      log: self.log.clone(),
    }
  }
}

pub struct TestBuilderSpec {
  id: BuilderId,
  outputs: Vec<RelativePath>,
  prerequisites: Vec<BuilderRef>,
  dependencies: DependenciesRef,
  fail: bool,
  delay: Duration,
  target: Arc<dyn FileSystemDirectory>,
  log: Arc<RunLog>,
}

impl TestBuilderSpec {
  pub fn outputs(mut self, outputs: &[&str]) -> Self {
    self.outputs = outputs.iter().map(|p| rel(p)).collect();
    self
  }

  pub fn after(mut self, prerequisites: &[&Arc<TestBuilder>]) -> Self {
    self.prerequisites = prerequisites.iter().map(|b| b.node()).collect();
    self
  }

  pub fn dependencies(mut self, dependencies: DependenciesRef) -> Self {
    self.dependencies = dependencies;
    self
  }

  pub fn failing(mut self) -> Self {
    self.fail = true;
    self
  }

  pub fn delay_ms(mut self, ms: u64) -> Self {
    self.delay = Duration::from_millis(ms);
    self
  }

  pub fn build(self) -> Arc<TestBuilder> {
    Arc::new(TestBuilder {
      id: self.id,
      outputs: self.outputs,
      prerequisites: self.prerequisites,
      dependencies: self.dependencies,
      fail: AtomicBool::new(self.fail),
      delay: self.delay,
      runs: AtomicUsize::new(0),
      target: self.target,
      log: self.log,
    })
  }
}

/// A builder that writes its outputs into the test target and records its run.
///
/// Each output file contains the builder key. A run that starts before one
/// of its declared prerequisites finished is recorded as a violation.
pub struct TestBuilder {
  id: BuilderId,
  outputs: Vec<RelativePath>,
  prerequisites: Vec<BuilderRef>,
  dependencies: DependenciesRef,
  fail: AtomicBool,
  delay: Duration,
  runs: AtomicUsize,
  target: Arc<dyn FileSystemDirectory>,
  log: Arc<RunLog>,
}

impl TestBuilder {
  pub fn node(self: &Arc<Self>) -> BuilderRef {
    self.clone()
  }

  /// Add to `ctx` with the prerequisites given at construction.
  pub fn register(self: &Arc<Self>, ctx: &mut BuildContext) -> Result<(), BuildError> {
    ctx.add_builder(self.node(), self.prerequisites.clone())
  }

  pub fn runs(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }

  pub fn set_failing(&self, fail: bool) {
    self.fail.store(fail, Ordering::SeqCst);
  }

  pub fn expected_outputs(&self) -> BTreeSet<RelativePath> {
    self.outputs.iter().cloned().collect()
  }
}

impl Builder for TestBuilder {
  fn id(&self) -> &BuilderId {
    &self.id
  }

  fn dependencies(&self) -> &dyn Dependencies {
    self.dependencies.as_ref()
  }

  fn run(&self) -> Result<BTreeSet<RelativePath>, BuilderError> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    let running = self.log.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.log.max_running.fetch_max(running, Ordering::SeqCst);

    for prerequisite in &self.prerequisites {
      if !self.log.has_finished(prerequisite.id()) {
        self
          .log
          .violations
          .lock()
          .unwrap()
          .push(format!("{} started before {}", self.id, prerequisite.id()));
      }
    }

    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }

    let result: Result<BTreeSet<RelativePath>, BuilderError> = if self.fail.load(Ordering::SeqCst) {
      Err(format!("{} exploded", self.id).into())
    } else {
      self
        .outputs
        .iter()
        .try_for_each(|path| self.target.write_file(path, self.id.key().as_bytes()))
        .map(|()| self.expected_outputs())
        .map_err(BuilderError::from)
    };

    self.log.running.fetch_sub(1, Ordering::SeqCst);
    if result.is_ok() {
      self.log.finished.lock().unwrap().push(self.id.clone());
    }
    result
  }
}
