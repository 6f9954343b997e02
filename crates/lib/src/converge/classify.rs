//! Release classification.
//!
//! Every planned release is probed once (diff or deployed check) and the
//! probes are sorted into disjoint update / delete / rollback / no-op sets.
//! The classification is computed once per command and never changes while
//! acting on it.

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use serde::Serialize;

use crate::helm::Revision;
use crate::release::{ReleaseId, ReleaseSpec};

/// What probing found out about one release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
  /// Installed release whose deployed state differs. `rollback_to` holds the
  /// revision to roll back to when that is allowed and possible.
  Changed { rollback_to: Option<u64> },
  /// Installed release already in the desired state.
  Unchanged,
  /// Release that must be absent but is still deployed.
  DisabledDeployed,
  /// Release that must be absent and already is.
  DisabledAbsent,
}

#[derive(Debug, Clone)]
pub struct Probe {
  pub release: ReleaseSpec,
  pub state: ProbeState,
}

/// A release scheduled for rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackTarget {
  pub release: ReleaseSpec,
  pub revision: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
  pub to_update: BTreeMap<ReleaseId, ReleaseSpec>,
  pub to_delete: BTreeMap<ReleaseId, ReleaseSpec>,
  pub to_rollback: BTreeMap<ReleaseId, RollbackTarget>,
  pub no_op: BTreeSet<ReleaseId>,
}

/// Serializable view of a classification, in universe order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
  pub update: Vec<ReleaseId>,
  pub delete: Vec<ReleaseId>,
  pub rollback: Vec<ReleaseId>,
  pub unchanged: Vec<ReleaseId>,
}

impl ChangeSet {
  pub fn is_empty(&self) -> bool {
    self.update.is_empty() && self.delete.is_empty() && self.rollback.is_empty()
  }
}

impl Classification {
  /// Nothing to act on.
  pub fn is_empty(&self) -> bool {
    self.to_update.is_empty() && self.to_delete.is_empty() && self.to_rollback.is_empty()
  }

  pub fn action_count(&self) -> usize {
    self.to_update.len() + self.to_delete.len() + self.to_rollback.len()
  }

  /// Releases to upgrade or roll back, in universe order.
  pub fn forward_targets(&self) -> Vec<ReleaseSpec> {
    let mut targets: Vec<ReleaseSpec> = self
      .to_update
      .values()
      .cloned()
      .chain(self.to_rollback.values().map(|target| target.release.clone()))
      .collect();
    targets.sort_by_key(|release| release.order);
    targets
  }

  /// Releases to delete, in universe order.
  pub fn delete_targets(&self) -> Vec<ReleaseSpec> {
    let mut targets: Vec<ReleaseSpec> = self.to_delete.values().cloned().collect();
    targets.sort_by_key(|release| release.order);
    targets
  }

  /// All changed releases in universe order.
  pub fn changed(&self) -> Vec<ReleaseId> {
    let mut changed: Vec<(usize, ReleaseId)> = self
      .to_update
      .values()
      .chain(self.to_delete.values())
      .chain(self.to_rollback.values().map(|target| &target.release))
      .map(|release| (release.order, release.id()))
      .collect();
    changed.sort();
    changed.into_iter().map(|(_, id)| id).collect()
  }

  pub fn change_set(&self, planned: &[ReleaseSpec]) -> ChangeSet {
    let mut set = ChangeSet::default();
    for release in planned {
      let id = release.id();
      if self.to_update.contains_key(&id) {
        set.update.push(id);
      } else if self.to_delete.contains_key(&id) {
        set.delete.push(id);
      } else if self.to_rollback.contains_key(&id) {
        set.rollback.push(id);
      } else if self.no_op.contains(&id) {
        set.unchanged.push(id);
      }
    }
    set
  }

  /// Human-readable list of pending actions for the confirmation prompt.
  pub fn describe(&self) -> String {
    let mut out = String::new();
    let mut section = |title: &str, lines: Vec<String>| {
      if lines.is_empty() {
        return;
      }
      out.push_str(title);
      out.push_str(":\n");
      for line in lines {
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
      }
    };

    section(
      "Releases to upgrade",
      self.to_update.values().map(describe_release).collect(),
    );
    section(
      "Releases to roll back",
      self
        .to_rollback
        .values()
        .map(|target| format!("{} (to revision {})", describe_release(&target.release), target.revision))
        .collect(),
    );
    section(
      "Releases to delete",
      self.to_delete.values().map(describe_release).collect(),
    );
    out
  }
}

fn describe_release(release: &ReleaseSpec) -> String {
  match &release.version {
    Some(version) => format!("{} ({} {})", release.id(), release.chart, version),
    None => format!("{} ({})", release.id(), release.chart),
  }
}

/// Sort probes into a classification.
pub fn classify(probes: Vec<Probe>) -> Classification {
  let mut classification = Classification::default();
  for Probe { release, state } in probes {
    let id = release.id();
    match state {
      ProbeState::Changed {
        rollback_to: Some(revision),
      } => {
        classification.to_rollback.insert(id, RollbackTarget { release, revision });
      }
      ProbeState::Changed { rollback_to: None } => {
        classification.to_update.insert(id, release);
      }
      ProbeState::DisabledDeployed => {
        classification.to_delete.insert(id, release);
      }
      ProbeState::Unchanged | ProbeState::DisabledAbsent => {
        classification.no_op.insert(id);
      }
    }
  }
  classification
}

fn parse_version(raw: &str) -> Option<Version> {
  let raw = raw.trim();
  Version::parse(raw.strip_prefix('v').unwrap_or(raw)).ok()
}

/// Revision to roll back to for a requested chart version.
///
/// A rollback needs the requested version to be strictly lower than the
/// deployed one and an earlier revision deployed at exactly that version.
/// Anything else, including unparsable versions, is an upgrade.
pub fn rollback_target(requested: &str, history: &[Revision]) -> Option<u64> {
  let requested = parse_version(requested)?;
  let current = history
    .iter()
    .rev()
    .find(|revision| revision.is_deployed())
    .or_else(|| history.last())?;
  let deployed = parse_version(&current.chart_version)?;

  if requested >= deployed {
    return None;
  }

  history
    .iter()
    .rev()
    .filter(|revision| revision.revision < current.revision)
    .find(|revision| parse_version(&revision.chart_version).is_some_and(|version| version == requested))
    .map(|revision| revision.revision)
}
