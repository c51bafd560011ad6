//! The builder graph: nodes keyed by builder identity, prerequisite edges,
//! root pruning and parallel execution waves.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use super::types::BuildError;
use crate::builder::{BuilderId, BuilderRef};

/// A "prerequisite of" relation: `prerequisite` must finish before `dependent` runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
  pub prerequisite: BuilderId,
  pub dependent: BuilderId,
}

impl Edge {
  pub fn new(prerequisite: BuilderId, dependent: BuilderId) -> Self {
    Self {
      prerequisite,
      dependent,
    }
  }
}

/// The edge set handed to graph transformations.
pub type EdgeSet = BTreeSet<Edge>;

/// Execution plan for one run: waves of node indices, each wave ordered by
/// insertion, plus the prerequisites of every planned node.
#[derive(Debug, Default)]
pub struct Plan {
  pub waves: Vec<Vec<usize>>,
  pub prerequisites: HashMap<usize, Vec<usize>>,
}

impl Plan {
  pub fn len(&self) -> usize {
    self.waves.iter().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.waves.is_empty()
  }
}

/// Builders in insertion order plus the prerequisite edges between them.
#[derive(Default)]
pub struct BuilderGraph {
  nodes: Vec<BuilderRef>,
  index: HashMap<BuilderId, usize>,
  edges: EdgeSet,
}

impl BuilderGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a builder, returning its index. A builder whose id is already
  /// present keeps the first registered instance.
  pub fn add_node(&mut self, builder: BuilderRef) -> usize {
    if let Some(&idx) = self.index.get(builder.id()) {
      if !Arc::ptr_eq(&self.nodes[idx], &builder) {
        debug!(builder = %builder.id(), "builder id already registered, keeping the first instance");
      }
      return idx;
    }

    let idx = self.nodes.len();
    self.index.insert(builder.id().clone(), idx);
    self.nodes.push(builder);
    idx
  }

  pub fn add_edge(&mut self, prerequisite: BuilderId, dependent: BuilderId) {
    self.edges.insert(Edge::new(prerequisite, dependent));
  }

  pub fn contains(&self, id: &BuilderId) -> bool {
    self.index.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn node(&self, idx: usize) -> &BuilderRef {
    &self.nodes[idx]
  }

  pub fn get(&self, id: &BuilderId) -> Option<&BuilderRef> {
    self.index.get(id).map(|&idx| &self.nodes[idx])
  }

  pub fn edges(&self) -> &EdgeSet {
    &self.edges
  }

  pub fn edges_mut(&mut self) -> &mut EdgeSet {
    &mut self.edges
  }

  /// Builders that declared `id` as a prerequisite, in insertion order.
  pub fn dependents(&self, id: &BuilderId) -> Vec<BuilderRef> {
    self.collect_sorted(self.edges.iter().filter(|e| &e.prerequisite == id).map(|e| &e.dependent))
  }

  /// Direct prerequisites of `id`, in insertion order.
  pub fn prerequisites(&self, id: &BuilderId) -> Vec<BuilderRef> {
    self.collect_sorted(self.edges.iter().filter(|e| &e.dependent == id).map(|e| &e.prerequisite))
  }

  fn collect_sorted<'a>(&self, ids: impl Iterator<Item = &'a BuilderId>) -> Vec<BuilderRef> {
    let mut indices: Vec<usize> = ids.filter_map(|id| self.index.get(id).copied()).collect();
    indices.sort_unstable();
    indices.dedup();
    indices.into_iter().map(|idx| self.nodes[idx].clone()).collect()
  }

  fn lookup(&self, id: &BuilderId) -> Result<usize, BuildError> {
    self.index.get(id).copied().ok_or_else(|| BuildError::UnknownBuilder(id.clone()))
  }

  /// Edges as index pairs. Fails if a transformation introduced an edge to
  /// a builder that was never added.
  fn index_edges(&self) -> Result<Vec<(usize, usize)>, BuildError> {
    self
      .edges
      .iter()
      .map(|edge| Ok((self.lookup(&edge.prerequisite)?, self.lookup(&edge.dependent)?)))
      .collect()
  }

  /// Nodes to consider for a run: everything, or `root` and its transitive prerequisites.
  fn select(&self, edges: &[(usize, usize)], root: Option<&BuilderId>) -> Result<BTreeSet<usize>, BuildError> {
    let Some(root) = root else {
      return Ok((0..self.nodes.len()).collect());
    };

    let mut prerequisites: HashMap<usize, Vec<usize>> = HashMap::new();
    for &(from, to) in edges {
      prerequisites.entry(to).or_default().push(from);
    }

    let root = self.lookup(root)?;
    let mut selected = BTreeSet::from([root]);
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
      for &prerequisite in prerequisites.get(&idx).into_iter().flatten() {
        if selected.insert(prerequisite) {
          stack.push(prerequisite);
        }
      }
    }
    Ok(selected)
  }

  /// The petgraph view of the selected nodes. Node weights are insertion
  /// indices, and graph indices grow with them.
  fn subgraph(selected: &BTreeSet<usize>, edges: &[(usize, usize)]) -> DiGraph<usize, ()> {
    let mut graph = DiGraph::with_capacity(selected.len(), edges.len());
    let mut node_of = HashMap::with_capacity(selected.len());
    for &idx in selected {
      node_of.insert(idx, graph.add_node(idx));
    }
    for (from, to) in edges {
      if let (Some(&a), Some(&b)) = (node_of.get(from), node_of.get(to)) {
        graph.add_edge(a, b, ());
      }
    }
    graph
  }

  /// Prune to `root` (if any), reject cycles, and group the remaining
  /// builders into waves.
  pub fn plan(&self, root: Option<&BuilderId>) -> Result<Plan, BuildError> {
    let edges = self.index_edges()?;
    let selected = self.select(&edges, root)?;
    let graph = Self::subgraph(&selected, &edges);

    toposort(&graph, None).map_err(|cycle| BuildError::Cycle {
      builder: self.nodes[graph[cycle.node_id()]].id().clone(),
    })?;

    let mut in_degree: HashMap<NodeIndex, usize> = graph
      .node_indices()
      .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
      .collect();
    let mut remaining: BTreeSet<NodeIndex> = graph.node_indices().collect();
    let mut plan = Plan::default();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|&&n| in_degree[&n] == 0).copied().collect();
      if ready.is_empty() {
        let stuck = remaining.iter().next().map(|&n| graph[n]).unwrap_or_default();
        return Err(BuildError::Cycle {
          builder: self.nodes[stuck].id().clone(),
        });
      }

      for &n in &ready {
        remaining.remove(&n);
        for dependent in graph.neighbors_directed(n, Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&dependent) {
            *degree = degree.saturating_sub(1);
          }
        }
      }
      plan.waves.push(ready.into_iter().map(|n| graph[n]).collect());
    }

    for n in graph.node_indices() {
      let mut prerequisites: Vec<usize> = graph.neighbors_directed(n, Direction::Incoming).map(|p| graph[p]).collect();
      prerequisites.sort_unstable();
      prerequisites.dedup();
      plan.prerequisites.insert(graph[n], prerequisites);
    }

    Ok(plan)
  }

  /// Write the graph (or the subgraph needed by `root`) as Graphviz DOT.
  pub fn write_dot(&self, out: &mut dyn Write, root: Option<&BuilderId>) -> Result<(), BuildError> {
    let edges = self.index_edges()?;
    let selected = self.select(&edges, root)?;

    let mut graph: DiGraph<String, &str> = DiGraph::new();
    let mut node_of = HashMap::new();
    for &idx in &selected {
      node_of.insert(idx, graph.add_node(self.nodes[idx].id().to_string()));
    }
    for (from, to) in &edges {
      if let (Some(&a), Some(&b)) = (node_of.get(from), node_of.get(to)) {
        graph.add_edge(a, b, "prerequisite");
      }
    }

    writeln!(out, "{}", Dot::new(&graph)).map_err(BuildError::Dump)
  }
}
