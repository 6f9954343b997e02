//! Release dependency DAG.
//!
//! Nodes are release IDs; edges point from a dependency to its dependent.
//! Layers group nodes by depth, where depth is the longest path from any
//! root, so every edge crosses from a lower layer to a higher one.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::release::ReleaseId;

use super::PlanError;

#[derive(Debug, Default)]
pub struct ReleaseDag {
  graph: DiGraph<ReleaseId, ()>,
  nodes: HashMap<ReleaseId, NodeIndex>,
}

impl ReleaseDag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a release node. Adding the same ID twice returns the existing node.
  pub fn add_release(&mut self, id: &ReleaseId) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(id) {
      return idx;
    }
    let idx = self.graph.add_node(id.clone());
    self.nodes.insert(id.clone(), idx);
    idx
  }

  /// Record that `dependent` must wait for `dependency`.
  pub fn add_dependency(&mut self, dependent: &ReleaseId, dependency: &ReleaseId) {
    let from = self.add_release(dependency);
    let to = self.add_release(dependent);
    if self.graph.find_edge(from, to).is_none() {
      self.graph.add_edge(from, to, ());
    }
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, id: &ReleaseId) -> bool {
    self.nodes.contains_key(id)
  }

  /// Direct dependencies of a release.
  pub fn dependencies(&self, id: &ReleaseId) -> Vec<ReleaseId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };

    let mut deps: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
    deps.sort();
    deps.into_iter().map(|dep| self.graph[dep].clone()).collect()
  }

  /// Depth of every node.
  pub fn depths(&self) -> Result<HashMap<ReleaseId, usize>, PlanError> {
    // Kahn's algorithm, one level at a time
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut depths = HashMap::new();
    let mut level = 0;

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|idx| in_degree[*idx] == 0).copied().collect();

      if ready.is_empty() {
        let mut stuck: Vec<NodeIndex> = remaining.into_iter().collect();
        stuck.sort();
        return Err(PlanError::Cycle {
          releases: stuck.into_iter().map(|idx| self.graph[idx].clone()).collect(),
        });
      }

      for idx in ready {
        remaining.remove(&idx);
        depths.insert(self.graph[idx].clone(), level);
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(degree) = in_degree.get_mut(&dependent) {
            *degree = degree.saturating_sub(1);
          }
        }
      }

      level += 1;
    }

    Ok(depths)
  }

  /// Nodes grouped by depth. Within a layer, nodes keep insertion order.
  pub fn layers(&self) -> Result<Vec<Vec<ReleaseId>>, PlanError> {
    let depths = self.depths()?;
    let max_depth = depths.values().copied().max();

    let Some(max_depth) = max_depth else {
      return Ok(Vec::new());
    };

    let mut layers: Vec<Vec<ReleaseId>> = vec![Vec::new(); max_depth + 1];
    for idx in self.graph.node_indices() {
      let id = &self.graph[idx];
      layers[depths[id]].push(id.clone());
    }

    Ok(layers)
  }
}
