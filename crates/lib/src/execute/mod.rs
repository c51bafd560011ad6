//! Build execution.
//!
//! [`BuildContext`] owns the builder graph for one build invocation:
//! - builders and their prerequisites are registered during setup
//! - queued transformations may edit the edge set or veto the run
//! - the graph is pruned to the root's subgraph and split into waves
//! - waves run in order, builders within a wave in parallel
//! - dependents of a failed builder are skipped, never run on stale inputs

pub mod graph;
pub mod types;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::builder::{BuilderError, BuilderId, BuilderRef};
use crate::fs::RelativePath;

pub use graph::{BuilderGraph, Edge, EdgeSet, Plan};
pub use types::{BuildConfig, BuildError, RunReport, SkippedBuilder};

type Transformation = Box<dyn FnMut(&mut EdgeSet) -> bool + Send + Sync>;

type Outcome = Result<BTreeSet<RelativePath>, BuildError>;

/// The builder graph and results of one build invocation.
///
/// A context runs once. After [`execute`](Self::execute) or
/// [`run`](Self::run) it is sealed: the graph can still be queried and its
/// results read, but nothing can be added and it cannot run again.
pub struct BuildContext {
  config: BuildConfig,
  graph: BuilderGraph,
  transformations: Vec<Transformation>,
  results: HashMap<BuilderId, BTreeSet<RelativePath>>,
  sealed: bool,
}

impl Default for BuildContext {
  fn default() -> Self {
    Self::new(BuildConfig::default())
  }
}

impl BuildContext {
  pub fn new(config: BuildConfig) -> Self {
    Self {
      config,
      graph: BuilderGraph::new(),
      transformations: Vec::new(),
      results: HashMap::new(),
      sealed: false,
    }
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  pub fn graph(&self) -> &BuilderGraph {
    &self.graph
  }

  pub fn is_sealed(&self) -> bool {
    self.sealed
  }

  /// Register `builder` with the given prerequisites.
  ///
  /// Prerequisites that are not in the context yet are registered as nodes
  /// without prerequisites of their own; adding them explicitly later
  /// contributes further edges. Re-adding a builder id keeps the first
  /// instance and merges the edges.
  pub fn add_builder<I>(&mut self, builder: BuilderRef, prerequisites: I) -> Result<(), BuildError>
  where
    I: IntoIterator<Item = BuilderRef>,
  {
    if self.sealed {
      return Err(BuildError::ContextSealed);
    }

    let dependent = builder.id().clone();
    self.graph.add_node(builder);

    for prerequisite in prerequisites {
      let prerequisite_id = prerequisite.id().clone();
      if !self.graph.contains(&prerequisite_id) {
        debug!(builder = %prerequisite_id, dependent = %dependent, "registering prerequisite");
      }
      self.graph.add_node(prerequisite);
      self.graph.add_edge(prerequisite_id, dependent.clone());
    }
    Ok(())
  }

  /// Queue a transformation over the edge set.
  ///
  /// Transformations run in registration order at the start of a run.
  /// Returning `false` cancels the run before any builder executes.
  pub fn add_transformation<F>(&mut self, transformation: F) -> Result<(), BuildError>
  where
    F: FnMut(&mut EdgeSet) -> bool + Send + Sync + 'static,
  {
    if self.sealed {
      return Err(BuildError::ContextSealed);
    }
    self.transformations.push(Box::new(transformation));
    Ok(())
  }

  /// Whether `id` was added, directly or as a prerequisite.
  pub fn contains(&self, id: &BuilderId) -> bool {
    self.graph.contains(id)
  }

  /// Builders that declared `id` as a prerequisite.
  pub fn get_dependencies(&self, id: &BuilderId) -> Vec<BuilderRef> {
    self.graph.dependents(id)
  }

  /// The result set of a builder that ran in this context.
  pub fn get_results(&self, id: &BuilderId) -> Result<&BTreeSet<RelativePath>, BuildError> {
    if !self.graph.contains(id) {
      return Err(BuildError::UnknownBuilder(id.clone()));
    }
    self.results.get(id).ok_or_else(|| BuildError::NotRun(id.clone()))
  }

  /// Write the graph, or the part of it `root` depends on, as Graphviz DOT.
  pub fn dump(&self, out: &mut dyn Write, root: Option<&BuilderId>) -> Result<(), BuildError> {
    self.graph.write_dot(out, root)
  }

  /// Run the build and return the union of every executed builder's results.
  ///
  /// Fails with the first builder failure, if any.
  pub async fn run(&mut self, root: Option<&BuilderId>) -> Result<BTreeSet<RelativePath>, BuildError> {
    self.execute(root).await?.into_result()
  }

  /// Run the build and report every builder's outcome.
  ///
  /// Configuration errors (veto, unknown builder, cycle) are returned as
  /// `Err` before anything runs. Builder failures are collected in the report.
  pub async fn execute(&mut self, root: Option<&BuilderId>) -> Result<RunReport, BuildError> {
    if self.sealed {
      return Err(BuildError::ContextSealed);
    }
    self.sealed = true;

    let root_label = root.map_or_else(|| "<all>".to_string(), ToString::to_string);
    info!(
      builders = self.graph.len(),
      edges = self.graph.edges().len(),
      root = %root_label,
      "starting build"
    );

    for (idx, transformation) in self.transformations.iter_mut().enumerate() {
      if !transformation(self.graph.edges_mut()) {
        warn!(transformation = idx, "build cancelled by transformation");
        return Err(BuildError::Cancelled);
      }
    }

    let plan = self.graph.plan(root)?;
    if plan.len() < self.graph.len() {
      debug!(kept = plan.len(), pruned = self.graph.len() - plan.len(), "pruned graph to root");
    }
    info!(waves = plan.waves.len(), builders = plan.len(), "computed execution waves");

    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut report = RunReport::default();
    let mut failed: HashSet<usize> = HashSet::new();

    for (wave_idx, wave) in plan.waves.iter().enumerate() {
      let mut ready = Vec::with_capacity(wave.len());
      for &idx in wave {
        let failed_prerequisite = plan
          .prerequisites
          .get(&idx)
          .into_iter()
          .flatten()
          .find(|&&p| failed.contains(&p));

        match failed_prerequisite {
          Some(&prerequisite) => {
            let skipped = SkippedBuilder {
              builder: self.graph.node(idx).id().clone(),
              failed_prerequisite: self.graph.node(prerequisite).id().clone(),
            };
            warn!(
              builder = %skipped.builder,
              failed_prerequisite = %skipped.failed_prerequisite,
              "skipping builder due to failed prerequisite"
            );
            report.skipped.push(skipped);
            failed.insert(idx);
          }
          None => ready.push(idx),
        }
      }

      if ready.is_empty() {
        continue;
      }

      if self.config.fail_fast && !report.failed.is_empty() {
        debug!(wave = wave_idx, builders = ready.len(), "fail-fast, not dispatching wave");
        report
          .not_started
          .extend(ready.iter().map(|&idx| self.graph.node(idx).id().clone()));
        continue;
      }

      debug!(wave = wave_idx, builders = ready.len(), "dispatching wave");
      let outcomes = self.run_wave(&ready, &semaphore).await;
      for (idx, outcome) in outcomes {
        let id = self.graph.node(idx).id().clone();
        match outcome {
          Ok(outputs) => {
            info!(builder = %id, outputs = outputs.len(), "builder succeeded");
            self.results.insert(id.clone(), outputs.clone());
            report.results.insert(id.clone(), outputs);
            report.executed.push(id);
          }
          Err(err) => {
            error!(builder = %id, error = %err, "builder failed");
            failed.insert(idx);
            report.failed.push(err);
          }
        }
      }
    }

    info!(
      executed = report.executed.len(),
      failed = report.failed.len(),
      skipped = report.skipped.len(),
      not_started = report.not_started.len(),
      "build finished"
    );

    Ok(report)
  }

  /// Run one wave of builders on blocking worker threads.
  ///
  /// Outcomes are returned in insertion order regardless of completion order.
  /// With a parallelism of one the wave runs strictly in insertion order.
  async fn run_wave(&self, wave: &[usize], semaphore: &Arc<Semaphore>) -> Vec<(usize, Outcome)> {
    let mut outcomes = Vec::with_capacity(wave.len());

    if self.config.parallelism <= 1 {
      for &idx in wave {
        let builder = self.graph.node(idx).clone();
        let joined = tokio::task::spawn_blocking(move || builder.run()).await;
        outcomes.push((idx, self.outcome(idx, joined)));
      }
      return outcomes;
    }

    let mut join_set = JoinSet::new();
    let mut tasks = HashMap::with_capacity(wave.len());

    for &idx in wave {
      let builder = self.graph.node(idx).clone();
      let semaphore = semaphore.clone();
      let handle = join_set.spawn(async move {
        let _permit = semaphore.acquire().await;
        tokio::task::spawn_blocking(move || builder.run()).await
      });
      tasks.insert(handle.id(), idx);
    }

    while let Some(joined) = join_set.join_next_with_id().await {
      let (task, joined) = match joined {
        Ok((task, joined)) => (task, joined),
        Err(err) => (err.id(), Err(err)),
      };
      match tasks.get(&task) {
        Some(&idx) => outcomes.push((idx, self.outcome(idx, joined))),
        None => error!(task = %task, "finished task does not belong to the current wave"),
      }
    }

    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes
  }

  fn outcome(&self, idx: usize, joined: Result<Result<BTreeSet<RelativePath>, BuilderError>, JoinError>) -> Outcome {
    let builder = self.graph.node(idx).id().clone();
    match joined {
      Ok(Ok(outputs)) => Ok(outputs),
      Ok(Err(source)) => Err(BuildError::BuilderFailed { builder, source }),
      Err(source) => Err(BuildError::Join { builder, source }),
    }
  }
}
