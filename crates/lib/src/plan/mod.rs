//! Dependency planning.
//!
//! Turns a release universe plus a selected subset into a [`Plan`]: an
//! ordered list of batches where every surviving `needs` edge points into a
//! strictly earlier batch (or a strictly later one for reversed plans).
//! Planning is all-or-nothing; any policy violation aborts it.

pub mod dag;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::release::{ReleaseId, ReleaseSpec, ResolveError, collect_needs, index_by_id};

pub use dag::ReleaseDag;

/// How `needs` pointing outside the selection are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NeedsPolicy {
  /// Unselected, enabled dependencies are an error.
  #[default]
  Enforce,
  /// Edges leaving the selection are dropped.
  Skip,
  /// Direct dependencies are pulled into the plan.
  IncludeDirect,
  /// The full transitive closure is pulled into the plan.
  IncludeTransitive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
  pub needs: NeedsPolicy,

  /// Invert batch order, so dependents come before their dependencies.
  pub reverse: bool,
}

impl PlanOptions {
  pub fn forward(needs: NeedsPolicy) -> Self {
    Self { needs, reverse: false }
  }

  pub fn reversed(needs: NeedsPolicy) -> Self {
    Self { needs, reverse: true }
  }
}

#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(
    "release \"{release}\" depends on \"{need}\" which does not match the selectors. \
     Please add a selector like \"--selector name={need_name}\", or indicate whether to skip (--skip-needs) \
     or include (--include-needs) these dependencies"
  )]
  UnselectedNeed {
    release: ReleaseId,
    need: ReleaseId,
    need_name: String,
  },

  #[error("dependency cycle detected among releases: {}", join_ids(.releases))]
  Cycle { releases: Vec<ReleaseId> },
}

fn join_ids(ids: &[ReleaseId]) -> String {
  ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", ")
}

/// Releases with no surviving dependency edges between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
  pub releases: Vec<ReleaseSpec>,
}

impl Batch {
  pub fn ids(&self) -> Vec<ReleaseId> {
    self.releases.iter().map(ReleaseSpec::id).collect()
  }

  pub fn len(&self) -> usize {
    self.releases.len()
  }

  pub fn is_empty(&self) -> bool {
    self.releases.is_empty()
  }
}

/// Ordered batches covering the planned releases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
  pub batches: Vec<Batch>,
}

impl Plan {
  pub fn len(&self) -> usize {
    self.batches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.batches.is_empty()
  }

  /// All planned releases, batch by batch.
  pub fn releases(&self) -> impl Iterator<Item = &ReleaseSpec> {
    self.batches.iter().flat_map(|batch| batch.releases.iter())
  }

  pub fn release_count(&self) -> usize {
    self.batches.iter().map(Batch::len).sum()
  }

  /// Member IDs per batch.
  pub fn ids(&self) -> Vec<Vec<ReleaseId>> {
    self.batches.iter().map(Batch::ids).collect()
  }

  /// Index of the batch containing a release.
  pub fn batch_of(&self, id: &ReleaseId) -> Option<usize> {
    self
      .batches
      .iter()
      .position(|batch| batch.releases.iter().any(|release| &release.id() == id))
  }
}

/// Plan `selected` against `universe`.
///
/// References to releases missing from the universe always fail. Disabled
/// dependencies count as satisfied. Within a batch, releases keep universe
/// order.
pub fn plan_releases(
  universe: &[ReleaseSpec],
  selected: &[ReleaseSpec],
  options: &PlanOptions,
) -> Result<Plan, PlanError> {
  let index = index_by_id(universe);

  for release in selected {
    for need in release.need_ids() {
      if !index.contains_key(&need) {
        return Err(
          ResolveError::UndefinedNeed {
            release: release.id(),
            need,
          }
          .into(),
        );
      }
    }
  }

  let included = match options.needs {
    NeedsPolicy::Enforce | NeedsPolicy::Skip => Vec::new(),
    NeedsPolicy::IncludeDirect => collect_needs(selected, universe, false)?,
    NeedsPolicy::IncludeTransitive => collect_needs(selected, universe, true)?,
  };

  let selected_ids: HashSet<ReleaseId> = selected.iter().map(ReleaseSpec::id).collect();
  let mut pending: HashMap<ReleaseId, &ReleaseSpec> = selected
    .iter()
    .chain(included.iter())
    .map(|release| (release.id(), release))
    .collect();

  // Members in universe order, then any selected release the universe lacks.
  let mut members: Vec<ReleaseSpec> = Vec::with_capacity(pending.len());
  for release in universe {
    if let Some(member) = pending.remove(&release.id()) {
      members.push(member.clone());
    }
  }
  for release in selected {
    if let Some(member) = pending.remove(&release.id()) {
      members.push(member.clone());
    }
  }

  let member_ids: HashSet<ReleaseId> = members.iter().map(ReleaseSpec::id).collect();

  let mut dag = ReleaseDag::new();
  for member in &members {
    dag.add_release(&member.id());
  }

  for member in &members {
    let id = member.id();
    for need in member.need_ids() {
      if member_ids.contains(&need) {
        dag.add_dependency(&id, &need);
        continue;
      }

      let Some(target) = index.get(&need) else {
        return Err(ResolveError::UndefinedNeed { release: id, need }.into());
      };

      if !target.installed {
        continue;
      }

      if options.needs == NeedsPolicy::Enforce && selected_ids.contains(&id) {
        return Err(PlanError::UnselectedNeed {
          release: id,
          need_name: target.name.clone(),
          need,
        });
      }
    }
  }

  let mut layers = dag.layers()?;
  if options.reverse {
    layers.reverse();
  }

  let by_id: HashMap<ReleaseId, ReleaseSpec> = members.into_iter().map(|release| (release.id(), release)).collect();
  let batches: Vec<Batch> = layers
    .into_iter()
    .map(|layer| Batch {
      releases: layer.iter().filter_map(|id| by_id.get(id).cloned()).collect(),
    })
    .collect();

  let plan = Plan { batches };
  debug!(
    batches = plan.len(),
    releases = plan.release_count(),
    reverse = options.reverse,
    "planned releases"
  );

  Ok(plan)
}
