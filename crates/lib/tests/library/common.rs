use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stevedore_lib::context::Context;
use stevedore_lib::converge::{Engine, Prompt};
use stevedore_lib::helm::{DiffOracle, DiffOutcome, HelmContext, HelmError, HelmExec, Revision};
use stevedore_lib::release::{HookDef, ReleaseSpec, RepositorySpec};
use stevedore_lib::state::StateDocument;

#[derive(Debug, Default)]
struct Inner {
  /// Deployed history per release ID, newest last.
  deployed: HashMap<String, Vec<Revision>>,
  dirty: HashSet<String>,
  failures: HashSet<(String, String)>,
  calls: Vec<String>,
  repo_syncs: Vec<String>,
}

/// Scripted in-memory Helm.
///
/// A release diffs as changed when it is not deployed, when its deployed
/// chart version differs from the requested one, or when it was marked dirty.
#[derive(Debug, Default)]
pub struct FakeHelm {
  inner: Mutex<Inner>,
}

impl FakeHelm {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap()
  }

  /// Pretend `release` is deployed with the given chart versions, oldest first.
  pub fn deploy(&self, release: &ReleaseSpec, versions: &[&str]) {
    let history = versions
      .iter()
      .enumerate()
      .map(|(idx, version)| Revision {
        revision: idx as u64 + 1,
        chart_version: version.to_string(),
        status: if idx + 1 == versions.len() { "deployed" } else { "superseded" }.to_string(),
      })
      .collect();
    self.lock().deployed.insert(release.id().to_string(), history);
  }

  pub fn mark_dirty(&self, release: &ReleaseSpec) {
    self.lock().dirty.insert(release.id().to_string());
  }

  /// Make `op` fail for the release with this name.
  pub fn fail(&self, op: &str, name: &str) {
    self.lock().failures.insert((op.to_string(), name.to_string()));
  }

  pub fn calls(&self) -> Vec<String> {
    self.lock().calls.clone()
  }

  /// Release names `op` was called for, in call order.
  pub fn calls_for(&self, op: &str) -> Vec<String> {
    let prefix = format!("{op} ");
    self
      .calls()
      .into_iter()
      .filter_map(|call| call.strip_prefix(&prefix).map(str::to_string))
      .collect()
  }

  pub fn repo_syncs(&self) -> Vec<String> {
    self.lock().repo_syncs.clone()
  }

  pub fn has_deployed(&self, release: &ReleaseSpec) -> bool {
    self.lock().deployed.contains_key(&release.id().to_string())
  }

  fn record(&self, op: &str, release: &ReleaseSpec) -> Result<(), HelmError> {
    let mut inner = self.lock();
    inner.calls.push(format!("{op} {}", release.name));
    if inner.failures.contains(&(op.to_string(), release.name.clone())) {
      return Err(HelmError::Other(format!("{op} of {} failed", release.name)));
    }
    Ok(())
  }

  fn push_revision(&self, release: &ReleaseSpec, version: String) {
    let mut inner = self.lock();
    let id = release.id().to_string();
    inner.dirty.remove(&id);
    let history = inner.deployed.entry(id).or_default();
    for revision in history.iter_mut() {
      revision.status = "superseded".to_string();
    }
    history.push(Revision {
      revision: history.len() as u64 + 1,
      chart_version: version,
      status: "deployed".to_string(),
    });
  }
}

#[async_trait]
impl DiffOracle for FakeHelm {
  async fn diff(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<DiffOutcome, HelmError> {
    self.record("diff", release)?;
    let inner = self.lock();
    let id = release.id().to_string();
    let changed = match inner.deployed.get(&id).and_then(|history| history.last()) {
      None => true,
      Some(current) => {
        inner.dirty.contains(&id) || release.version.as_deref().is_some_and(|v| v != current.chart_version)
      }
    };
    Ok(if changed { DiffOutcome::Changed } else { DiffOutcome::Unchanged })
  }
}

#[async_trait]
impl HelmExec for FakeHelm {
  async fn sync_repositories(&self, repos: &[RepositorySpec]) -> Result<(), HelmError> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut inner = self.lock();
    inner.repo_syncs.extend(repos.iter().map(|repo| repo.name.clone()));
    Ok(())
  }

  async fn upgrade(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<(), HelmError> {
    self.record("upgrade", release)?;
    self.push_revision(release, release.version.clone().unwrap_or_else(|| "0.1.0".to_string()));
    Ok(())
  }

  async fn rollback(&self, release: &ReleaseSpec, revision: u64, _ctx: &HelmContext) -> Result<(), HelmError> {
    self.record("rollback", release)?;
    let version = {
      let inner = self.lock();
      inner
        .deployed
        .get(&release.id().to_string())
        .and_then(|history| history.iter().find(|r| r.revision == revision))
        .map(|r| r.chart_version.clone())
        .ok_or_else(|| HelmError::Other(format!("no revision {revision}")))?
    };
    self.push_revision(release, version);
    Ok(())
  }

  async fn delete(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<(), HelmError> {
    self.record("delete", release)?;
    self.lock().deployed.remove(&release.id().to_string());
    Ok(())
  }

  async fn is_deployed(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<bool, HelmError> {
    self.record("is_deployed", release)?;
    Ok(self.has_deployed(release))
  }

  async fn history(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<Vec<Revision>, HelmError> {
    self.record("history", release)?;
    Ok(
      self
        .lock()
        .deployed
        .get(&release.id().to_string())
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn status(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<String, HelmError> {
    self.record("status", release)?;
    Ok(format!("STATUS: {}", release.name))
  }

  async fn test(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<String, HelmError> {
    self.record("test", release)?;
    Ok(format!("TEST SUITE: {}", release.name))
  }

  async fn lint(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<String, HelmError> {
    self.record("lint", release)?;
    Ok(format!("linted {}", release.chart))
  }

  async fn template(&self, release: &ReleaseSpec, _ctx: &HelmContext) -> Result<String, HelmError> {
    self.record("template", release)?;
    Ok(format!("kind: ConfigMap\nmetadata:\n  name: {}\n", release.name))
  }
}

/// Prompt that always answers with the same value.
pub struct FixedAnswer(pub bool);

impl Prompt for FixedAnswer {
  fn confirm(&self, _message: &str) -> std::io::Result<bool> {
    Ok(self.0)
  }
}

pub fn release(name: &str) -> ReleaseSpec {
  ReleaseSpec::new(name, "stable/app")
    .in_namespace("default")
    .in_context("kind")
    .with_version("1.0.0")
}

pub fn document(dir: &Path, releases: Vec<ReleaseSpec>) -> StateDocument {
  StateDocument::new(dir.join("stevedore.yaml"), releases).with_repository("stable", "https://charts.example.com")
}

pub fn engine(helm: &Arc<FakeHelm>) -> Engine {
  Engine::new(helm.clone())
}

pub fn context() -> Arc<Context> {
  Context::new().unwrap()
}

/// Hook appending `<release> <event>` to `events.log` in the document directory.
pub fn event_logger(events: &[&str]) -> HookDef {
  HookDef {
    name: Some("log".to_string()),
    events: events.iter().map(|e| e.to_string()).collect(),
    command: "/bin/sh".to_string(),
    args: vec![
      "-c".to_string(),
      "echo \"$STEVEDORE_RELEASE_NAME $STEVEDORE_HOOK_EVENT\" >> events.log".to_string(),
    ],
    show_logs: false,
  }
}

pub fn logged_events(dir: &Path) -> Vec<String> {
  std::fs::read_to_string(dir.join("events.log"))
    .unwrap_or_default()
    .lines()
    .map(str::to_string)
    .collect()
}
