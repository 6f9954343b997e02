//! Convergence engine.
//!
//! Every Helm-touching command runs the same prelude: resolve selectors,
//! plan, sync the repositories planned releases use, stage values and fire
//! `prepare` hooks. Then `apply`, `sync` and `destroy` probe every planned
//! release, classify the results and act: deletions first along the
//! reversed plan, then upgrades and rollbacks along the forward plan.
//! `cleanup` hooks fire at the end for releases classified as no-ops and
//! releases that were acted upon successfully. Releases that failed, or that
//! were never reached, skip them.

pub mod affected;
pub mod classify;
pub mod options;

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::error::{AggregateError, BoxError, ReleaseError, RunError};
use crate::execute::{BatchOutcome, ExecuteResult, run_batches, run_bounded};
use crate::helm::{DiffOutcome, Helm, HelmContext, HelmError};
use crate::hooks::{HookEvent, HookRunner};
use crate::plan::{Batch, NeedsPolicy, Plan, PlanOptions, plan_releases};
use crate::release::{ReleaseId, ReleaseSpec, RepositorySpec, Selectors, ValuesEntry, select_releases};
use crate::state::StateDocument;

use affected::{AffectedReleases, AffectedSummary};
use classify::{ChangeSet, Classification, Probe, ProbeState, classify, rollback_target};

pub use options::{ApplyOptions, DestroyOptions, DiffOptions, ReleaseOpOptions, SyncOptions};

/// Asks the user to confirm pending changes.
pub trait Prompt: Send + Sync {
  fn confirm(&self, message: &str) -> io::Result<bool>;
}

/// Confirms everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Prompt for AssumeYes {
  fn confirm(&self, _message: &str) -> io::Result<bool> {
    Ok(true)
  }
}

/// Output of a read-only release operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseOutput {
  pub release: ReleaseId,
  pub output: String,
  #[serde(skip)]
  pub order: usize,
}

/// What a command did to one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
  pub document: PathBuf,

  /// Selectors matched at least one release.
  pub matched: bool,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub changes: Option<ChangeSet>,

  pub affected: AffectedSummary,

  /// The user declined the confirmation prompt.
  pub declined: bool,

  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<ReleaseOutput>,

  /// Selected releases, filled by `list`.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub releases: Vec<ReleaseSpec>,

  #[serde(skip)]
  pub detailed_exitcode: bool,
}

impl Report {
  fn unmatched(doc: &StateDocument) -> Self {
    Self {
      document: doc.path.clone(),
      ..Default::default()
    }
  }

  fn matched(doc: &StateDocument) -> Self {
    Self {
      document: doc.path.clone(),
      matched: true,
      ..Default::default()
    }
  }

  /// `2` when a detailed exit code was requested and releases were changed.
  pub fn exit_code(&self) -> i32 {
    if self.detailed_exitcode && self.affected.acted() > 0 {
      crate::error::EXIT_DIFF_DETECTED
    } else {
      crate::error::EXIT_SUCCESS
    }
  }
}

#[derive(Debug, Clone, Copy)]
enum ProbeMode {
  /// Diff installed releases, check disabled ones.
  Diff { allow_rollback: bool },
  /// Treat every installed release as changed, check disabled ones.
  Sync { allow_rollback: bool },
  /// Check every release for presence.
  Deployed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
  Upgrade,
  Rollback(u64),
  Delete,
}

#[derive(Debug, Clone, Copy)]
enum ReleaseOp {
  Status,
  Test,
  Lint,
  Template,
}

struct Converge {
  concurrency: usize,
  interactive: bool,
  probe: ProbeMode,
  pre: Option<HookEvent>,
}

/// Prelude output shared by all Helm-touching commands.
struct Prepared {
  hooks: HookRunner,
  plan: Plan,

  /// Planned releases with staged values, in universe order.
  planned: Vec<ReleaseSpec>,

  /// Deduplicated release universe of the document.
  universe: Vec<ReleaseSpec>,
}

#[derive(Clone)]
pub struct Engine {
  helm: Arc<dyn Helm>,
  prompt: Arc<dyn Prompt>,
}

impl Engine {
  pub fn new(helm: Arc<dyn Helm>) -> Self {
    Self {
      helm,
      prompt: Arc::new(AssumeYes),
    }
  }

  pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
    self.prompt = prompt;
    self
  }

  /// Diff, then upgrade, roll back or delete whatever differs.
  pub async fn apply(&self, doc: &StateDocument, ctx: &Context, opts: &ApplyOptions) -> Result<Report, RunError> {
    let Some(prep) = self.prepare(doc, ctx, opts.needs).await? else {
      return Ok(Report::unmatched(doc));
    };

    let mut report = Report::matched(doc);
    report.detailed_exitcode = opts.detailed_exitcode;
    let settings = Converge {
      concurrency: opts.concurrency,
      interactive: opts.interactive,
      probe: ProbeMode::Diff {
        allow_rollback: opts.allow_rollback,
      },
      pre: Some(HookEvent::PreApply),
    };

    let mut reached = HashSet::new();
    let outcome = self.converge(doc, &prep, ctx, settings, &mut report, &mut reached).await;
    self.finish(doc, &prep, report, &reached, outcome).await
  }

  /// Upgrade every installed release and delete deployed disabled ones, without diffing.
  pub async fn sync(&self, doc: &StateDocument, ctx: &Context, opts: &SyncOptions) -> Result<Report, RunError> {
    let Some(prep) = self.prepare(doc, ctx, opts.needs).await? else {
      return Ok(Report::unmatched(doc));
    };

    let mut report = Report::matched(doc);
    let settings = Converge {
      concurrency: opts.concurrency,
      interactive: opts.interactive,
      probe: ProbeMode::Sync {
        allow_rollback: opts.allow_rollback,
      },
      pre: Some(HookEvent::PreSync),
    };

    let mut reached = HashSet::new();
    let outcome = self.converge(doc, &prep, ctx, settings, &mut report, &mut reached).await;
    self.finish(doc, &prep, report, &reached, outcome).await
  }

  /// Delete every planned release that is deployed, dependents first.
  pub async fn destroy(&self, doc: &StateDocument, ctx: &Context, opts: &DestroyOptions) -> Result<Report, RunError> {
    let Some(prep) = self.prepare(doc, ctx, opts.needs).await? else {
      return Ok(Report::unmatched(doc));
    };

    let mut report = Report::matched(doc);
    let settings = Converge {
      concurrency: opts.concurrency,
      interactive: opts.interactive,
      probe: ProbeMode::Deployed,
      pre: None,
    };

    let mut reached = HashSet::new();
    let outcome = self.converge(doc, &prep, ctx, settings, &mut report, &mut reached).await;
    self.finish(doc, &prep, report, &reached, outcome).await
  }

  /// Diff and classify without acting.
  pub async fn diff(&self, doc: &StateDocument, ctx: &Context, opts: &DiffOptions) -> Result<Report, RunError> {
    let Some(prep) = self.prepare(doc, ctx, opts.needs).await? else {
      return Ok(Report::unmatched(doc));
    };

    let mut report = Report::matched(doc);
    let mut reached = HashSet::new();
    let probe = ProbeMode::Diff {
      allow_rollback: opts.allow_rollback,
    };

    let outcome = match self.probe_all(&prep, opts.concurrency, probe).await {
      Err(errors) => Ok(errors),
      Ok(probes) => {
        let classification = classify(probes);
        report.changes = Some(classification.change_set(&prep.planned));
        reached.extend(classification.no_op.iter().cloned());
        info!(
          document = %doc.path.display(),
          changed = classification.action_count(),
          unchanged = classification.no_op.len(),
          "diff complete"
        );

        if opts.detailed_exitcode {
          Ok(
            classification
              .changed()
              .into_iter()
              .map(|id| ReleaseError::ChangeDetected { id })
              .collect(),
          )
        } else {
          Ok(Vec::new())
        }
      }
    };

    self.finish(doc, &prep, report, &reached, outcome).await
  }

  pub async fn status(&self, doc: &StateDocument, ctx: &Context, opts: &ReleaseOpOptions) -> Result<Report, RunError> {
    self.release_op(doc, ctx, opts, ReleaseOp::Status).await
  }

  pub async fn test(&self, doc: &StateDocument, ctx: &Context, opts: &ReleaseOpOptions) -> Result<Report, RunError> {
    self.release_op(doc, ctx, opts, ReleaseOp::Test).await
  }

  pub async fn lint(&self, doc: &StateDocument, ctx: &Context, opts: &ReleaseOpOptions) -> Result<Report, RunError> {
    self.release_op(doc, ctx, opts, ReleaseOp::Lint).await
  }

  pub async fn template(&self, doc: &StateDocument, ctx: &Context, opts: &ReleaseOpOptions) -> Result<Report, RunError> {
    self.release_op(doc, ctx, opts, ReleaseOp::Template).await
  }

  /// Selected releases, without touching Helm.
  pub fn list(&self, doc: &StateDocument) -> Result<Report, RunError> {
    let selection = self.select(doc)?.1;
    if selection.is_empty() {
      return Ok(Report::unmatched(doc));
    }

    let mut report = Report::matched(doc);
    report.releases = selection.selected;
    Ok(report)
  }

  fn select(&self, doc: &StateDocument) -> Result<(Selectors, crate::release::Selection), RunError> {
    let selectors = Selectors::parse(&doc.selectors).map_err(|source| RunError::Selector {
      path: doc.path.clone(),
      source,
    })?;
    let selection = select_releases(&doc.releases, &selectors).map_err(|source| RunError::Resolve {
      path: doc.path.clone(),
      source,
    })?;
    Ok((selectors, selection))
  }

  async fn prepare(&self, doc: &StateDocument, ctx: &Context, needs: NeedsPolicy) -> Result<Option<Prepared>, RunError> {
    let (selectors, selection) = self.select(doc)?;
    if selection.is_empty() {
      info!(document = %doc.path.display(), %selectors, "no releases matched");
      return Ok(None);
    }

    let mut plan =
      plan_releases(&selection.universe, &selection.selected, &PlanOptions::forward(needs)).map_err(|source| {
        RunError::Plan {
          path: doc.path.clone(),
          source,
        }
      })?;

    self.sync_repositories(doc, ctx, &plan).await?;
    stage_values(doc, ctx, &mut plan)?;

    let planned: Vec<ReleaseSpec> = {
      let staged: HashMap<ReleaseId, &ReleaseSpec> = plan.releases().map(|release| (release.id(), release)).collect();
      selection
        .universe
        .iter()
        .filter_map(|release| staged.get(&release.id()).map(|staged| (*staged).clone()))
        .collect()
    };

    let hooks = HookRunner::new(&doc.base_dir);
    let errors = fire_all(&hooks, &planned, HookEvent::Prepare).await;
    if let Some(source) = AggregateError::from_errors(errors) {
      return Err(RunError::Releases {
        path: doc.path.clone(),
        source,
        summary: AffectedSummary::default(),
      });
    }

    Ok(Some(Prepared {
      hooks,
      plan,
      planned,
      universe: selection.universe,
    }))
  }

  async fn sync_repositories(&self, doc: &StateDocument, ctx: &Context, plan: &Plan) -> Result<(), RunError> {
    let wanted: HashSet<&str> = plan.releases().filter_map(ReleaseSpec::repository).collect();
    let repos: Vec<RepositorySpec> = doc
      .repositories
      .iter()
      .filter(|repo| wanted.contains(repo.name.as_str()))
      .cloned()
      .collect();
    if repos.is_empty() {
      return Ok(());
    }

    let helm = self.helm.clone();
    ctx
      .repos()
      .sync_once(&repos, |pending| async move { helm.sync_repositories(&pending).await })
      .await
      .map_err(|source| RunError::RepoSync {
        path: doc.path.clone(),
        source,
      })?;
    Ok(())
  }

  async fn probe_all(&self, prep: &Prepared, concurrency: usize, mode: ProbeMode) -> Result<Vec<Probe>, Vec<ReleaseError>> {
    let helm = self.helm.clone();
    let working_dir = prep.hooks.base_dir().to_path_buf();

    let results = run_bounded(prep.planned.clone(), concurrency, move |worker, release| {
      let helm = helm.clone();
      let working_dir = working_dir.clone();
      async move { probe_release(helm, release, worker, working_dir, mode).await }
    })
    .await;

    let mut probes = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
      match result {
        Ok(probe) => probes.push(probe),
        Err(err) => errors.push(err),
      }
    }

    if errors.is_empty() { Ok(probes) } else { Err(errors) }
  }

  async fn converge(
    &self,
    doc: &StateDocument,
    prep: &Prepared,
    ctx: &Context,
    settings: Converge,
    report: &mut Report,
    reached: &mut HashSet<ReleaseId>,
  ) -> Result<Vec<ReleaseError>, RunError> {
    let classification = match self.probe_all(prep, settings.concurrency, settings.probe).await {
      Ok(probes) => classify(probes),
      Err(errors) => return Ok(errors),
    };
    report.changes = Some(classification.change_set(&prep.planned));
    reached.extend(classification.no_op.iter().cloned());

    if classification.is_empty() {
      info!(document = %doc.path.display(), "no releases to converge");
      return Ok(Vec::new());
    }

    if settings.interactive && !self.confirm(&classification).await? {
      info!(document = %doc.path.display(), "declined, nothing changed");
      report.declined = true;
      return Ok(Vec::new());
    }

    let affected = Arc::new(AffectedReleases::new());
    let actor = Actor {
      helm: self.helm.clone(),
      hooks: prep.hooks.clone(),
      affected: affected.clone(),
      pre: settings.pre,
    };

    let result = act(doc, prep, ctx, &classification, settings.concurrency, actor).await;
    report.affected = affected.snapshot();
    reached.extend(report.affected.acted_ids().cloned());

    let result = result?;
    if result.cancelled {
      return Err(RunError::Cancelled);
    }
    Ok(result.errors)
  }

  async fn confirm(&self, classification: &Classification) -> Result<bool, RunError> {
    let message = format!("{}\nDo you really want to proceed?", classification.describe());
    let prompt = self.prompt.clone();

    tokio::task::spawn_blocking(move || prompt.confirm(&message))
      .await
      .map_err(|e| RunError::Prompt(io::Error::other(e)))?
      .map_err(RunError::Prompt)
  }

  async fn release_op(
    &self,
    doc: &StateDocument,
    ctx: &Context,
    opts: &ReleaseOpOptions,
    op: ReleaseOp,
  ) -> Result<Report, RunError> {
    let Some(prep) = self.prepare(doc, ctx, opts.needs).await? else {
      return Ok(Report::unmatched(doc));
    };

    let mut report = Report::matched(doc);
    let working_dir = prep.hooks.base_dir().to_path_buf();
    let collected: Arc<Mutex<Vec<ReleaseOutput>>> = Arc::new(Mutex::new(Vec::new()));

    let outcome = match op {
      ReleaseOp::Status | ReleaseOp::Test => {
        let result = run_batches(&prep.plan, ctx, opts.concurrency, |batch, concurrency| {
          let helm = self.helm.clone();
          let working_dir = working_dir.clone();
          let collected = collected.clone();
          async move {
            let releases: Vec<ReleaseSpec> = batch.releases.into_iter().filter(|r| r.installed).collect();
            if releases.is_empty() {
              return BatchOutcome::default();
            }

            let mut errors = Vec::new();
            for result in run_op(helm, working_dir, op, releases, concurrency).await {
              match result {
                Ok(output) => collected.lock().unwrap_or_else(|e| e.into_inner()).push(output),
                Err(err) => errors.push(err),
              }
            }
            BatchOutcome::failed(errors)
          }
        })
        .await;

        if result.cancelled {
          Err(RunError::Cancelled)
        } else {
          Ok(result.errors)
        }
      }
      ReleaseOp::Lint | ReleaseOp::Template => {
        let releases: Vec<ReleaseSpec> = prep.planned.iter().filter(|r| r.installed).cloned().collect();
        let mut errors = Vec::new();
        for result in run_op(self.helm.clone(), working_dir, op, releases, opts.concurrency).await {
          match result {
            Ok(output) => collected.lock().unwrap_or_else(|e| e.into_inner()).push(output),
            Err(err) => errors.push(err),
          }
        }
        Ok(errors)
      }
    };

    let mut outputs = std::mem::take(&mut *collected.lock().unwrap_or_else(|e| e.into_inner()));
    outputs.sort_by_key(|output| output.order);
    let reached: HashSet<ReleaseId> = outputs.iter().map(|output| output.release.clone()).collect();
    report.outputs = outputs;

    self.finish(doc, &prep, report, &reached, outcome).await
  }

  /// Fire `cleanup` hooks for the `reached` releases and fold every error into the command result.
  async fn finish(
    &self,
    doc: &StateDocument,
    prep: &Prepared,
    report: Report,
    reached: &HashSet<ReleaseId>,
    outcome: Result<Vec<ReleaseError>, RunError>,
  ) -> Result<Report, RunError> {
    let cleanup: Vec<ReleaseSpec> = prep
      .planned
      .iter()
      .filter(|release| reached.contains(&release.id()))
      .cloned()
      .collect();
    let cleanup_errors = fire_all(&prep.hooks, &cleanup, HookEvent::Cleanup).await;

    let mut errors = outcome?;
    errors.extend(cleanup_errors);

    match AggregateError::from_errors(errors) {
      None => Ok(report),
      Some(source) => Err(RunError::Releases {
        path: doc.path.clone(),
        source,
        summary: report.affected,
      }),
    }
  }
}

/// Write inline values to the scratch directory and resolve values files.
fn stage_values(doc: &StateDocument, ctx: &Context, plan: &mut Plan) -> Result<(), RunError> {
  for batch in &mut plan.batches {
    for release in &mut batch.releases {
      release.staged_values =
        stage_release_values(release, &doc.base_dir, ctx.scratch_dir()).map_err(|source| RunError::Staging {
          path: doc.path.clone(),
          release: release.id(),
          source,
        })?;
    }
  }
  Ok(())
}

fn stage_release_values(release: &ReleaseSpec, base_dir: &Path, scratch: &Path) -> io::Result<Vec<PathBuf>> {
  let mut staged = Vec::with_capacity(release.values.len());
  for entry in &release.values {
    match entry {
      ValuesEntry::File(file) => staged.push(base_dir.join(file)),
      ValuesEntry::Inline(mapping) => {
        let rendered = serde_yaml::to_string(mapping).map_err(io::Error::other)?;
        let mut file = tempfile::Builder::new()
          .prefix(&format!("{}-values-", release.name))
          .suffix(".yaml")
          .tempfile_in(scratch)?;
        file.write_all(rendered.as_bytes())?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        debug!(release = %release.id(), path = %path.display(), "staged inline values");
        staged.push(path);
      }
    }
  }
  Ok(staged)
}

async fn fire_all(hooks: &HookRunner, releases: &[ReleaseSpec], event: HookEvent) -> Vec<ReleaseError> {
  let mut errors = Vec::new();
  for release in releases {
    if let Err(err) = hooks.fire(release, event).await {
      warn!(release = %release.id(), %event, error = %err, "hook failed");
      errors.push(ReleaseError::fatal(release.id(), err));
    }
  }
  errors
}

async fn probe_release(
  helm: Arc<dyn Helm>,
  release: ReleaseSpec,
  worker: usize,
  working_dir: PathBuf,
  mode: ProbeMode,
) -> Result<Probe, ReleaseError> {
  let ctx = HelmContext::for_release(&release, worker, working_dir);
  let id = release.id();
  let fatal = |err: HelmError| ReleaseError::fatal(id.clone(), err);

  let must_be_absent = matches!(mode, ProbeMode::Deployed) || !release.installed;
  let state = if must_be_absent {
    if helm.is_deployed(&release, &ctx).await.map_err(fatal)? {
      ProbeState::DisabledDeployed
    } else {
      ProbeState::DisabledAbsent
    }
  } else {
    match mode {
      ProbeMode::Diff { allow_rollback } => match helm.diff(&release, &ctx).await.map_err(fatal)? {
        DiffOutcome::Unchanged => ProbeState::Unchanged,
        DiffOutcome::Changed => ProbeState::Changed {
          rollback_to: rollback_revision(helm.as_ref(), &release, &ctx, allow_rollback)
            .await
            .map_err(fatal)?,
        },
      },
      ProbeMode::Sync { allow_rollback } => ProbeState::Changed {
        rollback_to: rollback_revision(helm.as_ref(), &release, &ctx, allow_rollback)
          .await
          .map_err(fatal)?,
      },
      ProbeMode::Deployed => ProbeState::DisabledAbsent,
    }
  };

  debug!(release = %id, worker, state = ?state, "probed release");
  Ok(Probe { release, state })
}

async fn rollback_revision(
  helm: &dyn Helm,
  release: &ReleaseSpec,
  ctx: &HelmContext,
  allow_rollback: bool,
) -> Result<Option<u64>, HelmError> {
  let Some(version) = release.version.as_deref().filter(|_| allow_rollback) else {
    return Ok(None);
  };

  let history = helm.history(release, ctx).await?;
  Ok(rollback_target(version, &history))
}

/// Deletions along the reversed plan, then upgrades and rollbacks along the forward plan.
async fn act(
  doc: &StateDocument,
  prep: &Prepared,
  ctx: &Context,
  classification: &Classification,
  concurrency: usize,
  actor: Actor,
) -> Result<ExecuteResult, RunError> {
  let mut actions: HashMap<ReleaseId, Action> = HashMap::new();
  for id in classification.to_update.keys() {
    actions.insert(id.clone(), Action::Upgrade);
  }
  for (id, target) in &classification.to_rollback {
    actions.insert(id.clone(), Action::Rollback(target.revision));
  }
  for id in classification.to_delete.keys() {
    actions.insert(id.clone(), Action::Delete);
  }
  let actions = Arc::new(actions);

  let plan_err = |source| RunError::Plan {
    path: doc.path.clone(),
    source,
  };

  let mut total = ExecuteResult::default();
  let stages = [
    (
      classification.delete_targets(),
      PlanOptions::reversed(NeedsPolicy::Skip),
    ),
    (
      classification.forward_targets(),
      PlanOptions::forward(NeedsPolicy::Skip),
    ),
  ];

  for (targets, options) in stages {
    if targets.is_empty() {
      continue;
    }

    let plan = plan_releases(&prep.universe, &targets, &options).map_err(plan_err)?;
    let result = run_batches(&plan, ctx, concurrency, |batch, concurrency| {
      converge_batch(actor.clone(), actions.clone(), batch, concurrency)
    })
    .await;

    total.processed |= result.processed;
    total.batches_run += result.batches_run;
    total.cancelled = result.cancelled;
    total.errors = result.errors;
    if !total.is_ok() {
      break;
    }
  }

  Ok(total)
}

async fn converge_batch(
  actor: Actor,
  actions: Arc<HashMap<ReleaseId, Action>>,
  batch: Batch,
  concurrency: usize,
) -> BatchOutcome {
  let items: Vec<(ReleaseSpec, Action)> = batch
    .releases
    .into_iter()
    .filter_map(|release| actions.get(&release.id()).map(|action| (release, *action)))
    .collect();
  if items.is_empty() {
    return BatchOutcome::default();
  }

  let results = run_bounded(items, concurrency, move |worker, (release, action)| {
    let actor = actor.clone();
    async move { actor.act(release, action, worker).await }
  })
  .await;

  BatchOutcome::failed(results.into_iter().filter_map(Result::err).collect())
}

/// Acts on single releases from pool workers.
#[derive(Clone)]
struct Actor {
  helm: Arc<dyn Helm>,
  hooks: HookRunner,
  affected: Arc<AffectedReleases>,
  pre: Option<HookEvent>,
}

impl Actor {
  async fn act(&self, release: ReleaseSpec, action: Action, worker: usize) -> Result<(), ReleaseError> {
    let started = Instant::now();
    let id = release.id();

    match self.perform(&release, action, worker).await {
      Ok(()) => {
        let elapsed = started.elapsed();
        match action {
          Action::Upgrade => self.affected.upgraded(&release, elapsed),
          Action::Rollback(_) => self.affected.rolled_back(&release, elapsed),
          Action::Delete => self.affected.deleted(&release, elapsed),
        }
        info!(release = %id, action = ?action, elapsed = ?elapsed, "release converged");
        Ok(())
      }
      Err(source) => {
        self.affected.failed(&release, started.elapsed());
        error!(release = %id, action = ?action, error = %source, "release failed");
        Err(ReleaseError::Fatal { id, source })
      }
    }
  }

  async fn perform(&self, release: &ReleaseSpec, action: Action, worker: usize) -> Result<(), BoxError> {
    if let Some(event) = self.pre {
      self.hooks.fire(release, event).await?;
    }

    let ctx = HelmContext::for_release(release, worker, self.hooks.base_dir());
    match action {
      Action::Delete => {
        self.hooks.fire(release, HookEvent::PreUninstall).await?;
        self.helm.delete(release, &ctx).await?;
        self.hooks.fire(release, HookEvent::PostUninstall).await?;
      }
      Action::Upgrade => {
        self.helm.upgrade(release, &ctx).await?;
        self.hooks.fire(release, HookEvent::PostSync).await?;
      }
      Action::Rollback(revision) => {
        self.helm.rollback(release, revision, &ctx).await?;
        self.hooks.fire(release, HookEvent::PostSync).await?;
      }
    }
    Ok(())
  }
}

async fn run_op(
  helm: Arc<dyn Helm>,
  working_dir: PathBuf,
  op: ReleaseOp,
  releases: Vec<ReleaseSpec>,
  concurrency: usize,
) -> Vec<Result<ReleaseOutput, ReleaseError>> {
  run_bounded(releases, concurrency, move |worker, release| {
    let helm = helm.clone();
    let ctx = HelmContext::for_release(&release, worker, working_dir.clone());
    async move {
      let result = match op {
        ReleaseOp::Status => helm.status(&release, &ctx).await,
        ReleaseOp::Test => helm.test(&release, &ctx).await,
        ReleaseOp::Lint => helm.lint(&release, &ctx).await,
        ReleaseOp::Template => helm.template(&release, &ctx).await,
      };
      result
        .map(|output| ReleaseOutput {
          release: release.id(),
          output,
          order: release.order,
        })
        .map_err(|err| ReleaseError::fatal(release.id(), err))
    }
  })
  .await
}
