//! Accumulator of releases touched by a command.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::release::{ReleaseId, ReleaseSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedRelease {
  pub id: ReleaseId,
  pub name: String,
  pub namespace: String,
  pub context: String,
  pub chart: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  pub duration: Duration,
  #[serde(skip)]
  pub order: usize,
}

impl AffectedRelease {
  pub fn new(release: &ReleaseSpec, duration: Duration) -> Self {
    Self {
      id: release.id(),
      name: release.name.clone(),
      namespace: release.namespace.clone(),
      context: release.context.clone(),
      chart: release.chart.clone(),
      version: release.version.clone(),
      duration,
      order: release.order,
    }
  }
}

/// Snapshot of affected releases, each list in universe order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffectedSummary {
  pub upgraded: Vec<AffectedRelease>,
  pub rolled_back: Vec<AffectedRelease>,
  pub deleted: Vec<AffectedRelease>,
  pub failed: Vec<AffectedRelease>,
}

impl AffectedSummary {
  pub fn is_empty(&self) -> bool {
    self.upgraded.is_empty() && self.rolled_back.is_empty() && self.deleted.is_empty() && self.failed.is_empty()
  }

  /// Number of releases successfully acted upon.
  pub fn acted(&self) -> usize {
    self.upgraded.len() + self.rolled_back.len() + self.deleted.len()
  }

  /// IDs of releases successfully acted upon.
  pub fn acted_ids(&self) -> impl Iterator<Item = &ReleaseId> {
    self
      .upgraded
      .iter()
      .chain(&self.rolled_back)
      .chain(&self.deleted)
      .map(|entry| &entry.id)
  }

  pub fn merge(&mut self, other: AffectedSummary) {
    self.upgraded.extend(other.upgraded);
    self.rolled_back.extend(other.rolled_back);
    self.deleted.extend(other.deleted);
    self.failed.extend(other.failed);
  }
}

/// Shared, lock-guarded record of what workers did.
#[derive(Debug, Default)]
pub struct AffectedReleases {
  inner: Mutex<AffectedSummary>,
}

impl AffectedReleases {
  pub fn new() -> Self {
    Self::default()
  }

  fn record(&self, pick: impl FnOnce(&mut AffectedSummary) -> &mut Vec<AffectedRelease>, entry: AffectedRelease) {
    let mut summary = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    pick(&mut summary).push(entry);
  }

  pub fn upgraded(&self, release: &ReleaseSpec, duration: Duration) {
    self.record(|s| &mut s.upgraded, AffectedRelease::new(release, duration));
  }

  pub fn rolled_back(&self, release: &ReleaseSpec, duration: Duration) {
    self.record(|s| &mut s.rolled_back, AffectedRelease::new(release, duration));
  }

  pub fn deleted(&self, release: &ReleaseSpec, duration: Duration) {
    self.record(|s| &mut s.deleted, AffectedRelease::new(release, duration));
  }

  pub fn failed(&self, release: &ReleaseSpec, duration: Duration) {
    self.record(|s| &mut s.failed, AffectedRelease::new(release, duration));
  }

  /// Copy of the current state with every list sorted by universe order.
  pub fn snapshot(&self) -> AffectedSummary {
    let mut summary = self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone();
    for list in [
      &mut summary.upgraded,
      &mut summary.rolled_back,
      &mut summary.deleted,
      &mut summary.failed,
    ] {
      list.sort_by_key(|entry| entry.order);
    }
    summary
  }
}
