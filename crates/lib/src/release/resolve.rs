//! Selector resolution, deduplication and needs closure.
//!
//! Resolution only computes membership; ordering is the planner's job.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tracing::debug;

use super::selector::Selectors;
use super::types::{ReleaseId, ReleaseSpec};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
  #[error("found {count} duplicate releases with ID \"{id}\"")]
  Duplicate { count: usize, id: ReleaseId },

  #[error("release \"{release}\" depends on \"{need}\" which is not defined")]
  UndefinedNeed { release: ReleaseId, need: ReleaseId },
}

/// Result of applying selectors to a release universe.
#[derive(Debug, Clone, Default)]
pub struct Selection {
  /// Releases matching the selectors.
  pub selected: Vec<ReleaseSpec>,

  /// Deduplicated view of the full universe.
  pub universe: Vec<ReleaseSpec>,
}

impl Selection {
  pub fn is_empty(&self) -> bool {
    self.selected.is_empty()
  }
}

/// Apply selectors to the universe and deduplicate releases sharing an ID.
///
/// Releases sharing an ID collapse onto the position of the first
/// occurrence. The selected instance represents the ID when there is one,
/// otherwise the first instance does. More than one selected instance of the
/// same ID is ambiguous and fails.
pub fn select_releases(all: &[ReleaseSpec], selectors: &Selectors) -> Result<Selection, ResolveError> {
  let matched: Vec<bool> = all
    .iter()
    .map(|release| selectors.matches(&release.selector_labels()))
    .collect();

  let mut order: Vec<ReleaseId> = Vec::new();
  let mut groups: HashMap<ReleaseId, Vec<usize>> = HashMap::new();
  for (idx, release) in all.iter().enumerate() {
    let id = release.id();
    if !groups.contains_key(&id) {
      order.push(id.clone());
    }
    groups.entry(id).or_default().push(idx);
  }

  let mut selection = Selection::default();
  for id in order {
    let indices = &groups[&id];
    let chosen: Vec<usize> = indices.iter().copied().filter(|&idx| matched[idx]).collect();

    if chosen.len() > 1 {
      return Err(ResolveError::Duplicate { count: chosen.len(), id });
    }
    if indices.len() > 1 {
      debug!(release = %id, instances = indices.len(), "collapsed duplicate release");
    }

    let keep = chosen.first().copied().unwrap_or(indices[0]);
    selection.universe.push(all[keep].clone());
    if !chosen.is_empty() {
      selection.selected.push(all[keep].clone());
    }
  }

  debug!(
    selected = selection.selected.len(),
    universe = selection.universe.len(),
    selectors = %selectors,
    "resolved selectors"
  );

  Ok(selection)
}

/// Index a universe by release ID.
pub fn index_by_id(universe: &[ReleaseSpec]) -> HashMap<ReleaseId, &ReleaseSpec> {
  universe.iter().map(|release| (release.id(), release)).collect()
}

/// Releases needed by `selected` that are not selected themselves.
///
/// With `transitive`, the needs of pulled-in releases are followed as well.
/// Disabled releases are never pulled in. The result keeps universe order.
pub fn collect_needs(
  selected: &[ReleaseSpec],
  universe: &[ReleaseSpec],
  transitive: bool,
) -> Result<Vec<ReleaseSpec>, ResolveError> {
  let index = index_by_id(universe);
  let selected_ids: HashSet<ReleaseId> = selected.iter().map(ReleaseSpec::id).collect();

  let mut included: HashSet<ReleaseId> = HashSet::new();
  let mut queue: VecDeque<&ReleaseSpec> = selected.iter().collect();

  while let Some(release) = queue.pop_front() {
    for need in release.need_ids() {
      let Some(target) = index.get(&need) else {
        return Err(ResolveError::UndefinedNeed {
          release: release.id(),
          need,
        });
      };

      if !target.installed || selected_ids.contains(&need) || included.contains(&need) {
        continue;
      }

      included.insert(need);
      if transitive {
        queue.push_back(target);
      }
    }
  }

  Ok(
    universe
      .iter()
      .filter(|release| included.contains(&release.id()))
      .cloned()
      .collect(),
  )
}
