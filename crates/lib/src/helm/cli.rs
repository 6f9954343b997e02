//! Helm collaborator backed by the `helm` binary.
//!
//! Diffs go through the `helm-diff` plugin with `--detailed-exitcode`, where
//! exit code 2 means the release would change.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{DiffOracle, DiffOutcome, HelmContext, HelmError, HelmExec, Revision};
use crate::release::{ReleaseSpec, RepositorySpec};

const DEFAULT_BINARY: &str = "helm";

/// Exit code of `helm diff --detailed-exitcode` when there are changes.
const DIFF_CHANGED_CODE: i32 = 2;

#[derive(Debug, Clone)]
pub struct HelmCli {
  binary: String,
}

impl Default for HelmCli {
  fn default() -> Self {
    Self::new(DEFAULT_BINARY)
  }
}

struct Captured {
  code: Option<i32>,
  stdout: String,
  stderr: String,
}

impl HelmCli {
  pub fn new(binary: impl Into<String>) -> Self {
    Self { binary: binary.into() }
  }

  pub fn binary(&self) -> &str {
    &self.binary
  }

  async fn run(&self, args: &[String], working_dir: &Path) -> Result<Captured, HelmError> {
    debug!(binary = %self.binary, args = %args.join(" "), "running helm");

    let mut command = Command::new(&self.binary);
    command.args(args).stdin(Stdio::null());
    if !working_dir.as_os_str().is_empty() {
      command.current_dir(working_dir);
    }

    let output = command.output().await.map_err(|source| HelmError::Spawn {
      binary: self.binary.clone(),
      source,
    })?;

    Ok(Captured {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
  }

  /// Run and require a zero exit code, returning stdout.
  async fn run_ok(&self, args: &[String], working_dir: &Path) -> Result<String, HelmError> {
    let captured = self.run(args, working_dir).await?;
    if captured.code == Some(0) {
      Ok(captured.stdout)
    } else {
      Err(self.command_failed(args, &captured))
    }
  }

  fn command_failed(&self, args: &[String], captured: &Captured) -> HelmError {
    HelmError::Command {
      command: format!("{} {}", self.binary, args.join(" ")),
      status: captured
        .code
        .map(|code| format!("exit code {code}"))
        .unwrap_or_else(|| "signal".to_string()),
      stderr: captured.stderr.clone(),
    }
  }
}

fn target_args(release: &ReleaseSpec, ctx: &HelmContext) -> Vec<String> {
  let mut args = Vec::new();
  if !ctx.kube_context.is_empty() {
    args.push("--kube-context".to_string());
    args.push(ctx.kube_context.clone());
  }
  if !release.namespace.is_empty() {
    args.push("--namespace".to_string());
    args.push(release.namespace.clone());
  }
  args
}

fn chart_args(release: &ReleaseSpec) -> Vec<String> {
  let mut args = Vec::new();
  if let Some(version) = &release.version {
    args.push("--version".to_string());
    args.push(version.clone());
  }
  for values in &release.staged_values {
    args.push("--values".to_string());
    args.push(values.display().to_string());
  }
  args
}

fn args(parts: &[&str]) -> Vec<String> {
  parts.iter().map(|part| part.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
  revision: u64,
  chart: String,
  status: String,
}

/// Split the chart version off a `name-version` history entry.
fn chart_version(entry_chart: &str, chart_name: &str) -> String {
  if let Some(version) = entry_chart.strip_prefix(chart_name).and_then(|rest| rest.strip_prefix('-')) {
    return version.to_string();
  }

  let bytes = entry_chart.as_bytes();
  for (idx, byte) in bytes.iter().enumerate() {
    if *byte == b'-' && bytes.get(idx + 1).is_some_and(u8::is_ascii_digit) {
      return entry_chart[idx + 1..].to_string();
    }
  }
  entry_chart.to_string()
}

fn parse_history(raw: &str, chart_name: &str, command: &str) -> Result<Vec<Revision>, HelmError> {
  let entries: Vec<HistoryEntry> = serde_json::from_str(raw).map_err(|source| HelmError::Parse {
    command: command.to_string(),
    source,
  })?;

  Ok(
    entries
      .into_iter()
      .map(|entry| Revision {
        revision: entry.revision,
        chart_version: chart_version(&entry.chart, chart_name),
        status: entry.status,
      })
      .collect(),
  )
}

#[async_trait]
impl DiffOracle for HelmCli {
  async fn diff(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<DiffOutcome, HelmError> {
    let mut argv = args(&["diff", "upgrade", &release.name, &release.chart]);
    argv.extend(args(&["--detailed-exitcode", "--allow-unreleased"]));
    argv.extend(target_args(release, ctx));
    argv.extend(chart_args(release));

    let captured = self.run(&argv, &ctx.working_dir).await?;
    match captured.code {
      Some(0) => Ok(DiffOutcome::Unchanged),
      Some(DIFF_CHANGED_CODE) => {
        if !captured.stdout.is_empty() {
          info!(release = %release.id(), "changes detected\n{}", captured.stdout.trim_end());
        }
        Ok(DiffOutcome::Changed)
      }
      _ => Err(self.command_failed(&argv, &captured)),
    }
  }
}

#[async_trait]
impl HelmExec for HelmCli {
  async fn sync_repositories(&self, repos: &[RepositorySpec]) -> Result<(), HelmError> {
    if repos.is_empty() {
      return Ok(());
    }

    let cwd = Path::new("");
    for repo in repos {
      self
        .run_ok(&args(&["repo", "add", &repo.name, &repo.url, "--force-update"]), cwd)
        .await?;
    }

    let mut update = args(&["repo", "update"]);
    update.extend(repos.iter().map(|repo| repo.name.clone()));
    self.run_ok(&update, cwd).await?;
    Ok(())
  }

  async fn upgrade(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<(), HelmError> {
    let mut argv = args(&["upgrade", "--install", &release.name, &release.chart]);
    argv.extend(target_args(release, ctx));
    argv.extend(chart_args(release));
    self.run_ok(&argv, &ctx.working_dir).await?;
    Ok(())
  }

  async fn rollback(&self, release: &ReleaseSpec, revision: u64, ctx: &HelmContext) -> Result<(), HelmError> {
    let mut argv = args(&["rollback", &release.name, &revision.to_string()]);
    argv.extend(target_args(release, ctx));
    self.run_ok(&argv, &ctx.working_dir).await?;
    Ok(())
  }

  async fn delete(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<(), HelmError> {
    let mut argv = args(&["uninstall", &release.name]);
    argv.extend(target_args(release, ctx));
    self.run_ok(&argv, &ctx.working_dir).await?;
    Ok(())
  }

  async fn is_deployed(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<bool, HelmError> {
    let filter = format!("^{}$", release.name);
    let mut argv = args(&["list", "--filter", &filter, "--short"]);
    argv.extend(target_args(release, ctx));
    let stdout = self.run_ok(&argv, &ctx.working_dir).await?;
    Ok(stdout.lines().any(|line| line.trim() == release.name))
  }

  async fn history(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<Vec<Revision>, HelmError> {
    let mut argv = args(&["history", &release.name, "--output", "json"]);
    argv.extend(target_args(release, ctx));

    let captured = self.run(&argv, &ctx.working_dir).await?;
    if captured.code != Some(0) {
      if captured.stderr.contains("not found") {
        return Ok(Vec::new());
      }
      return Err(self.command_failed(&argv, &captured));
    }

    parse_history(&captured.stdout, release.chart_name(), &argv.join(" "))
  }

  async fn status(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError> {
    let mut argv = args(&["status", &release.name]);
    argv.extend(target_args(release, ctx));
    self.run_ok(&argv, &ctx.working_dir).await
  }

  async fn test(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError> {
    let mut argv = args(&["test", &release.name]);
    argv.extend(target_args(release, ctx));
    self.run_ok(&argv, &ctx.working_dir).await
  }

  async fn lint(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError> {
    let mut argv = args(&["lint", &release.chart]);
    for values in &release.staged_values {
      argv.push("--values".to_string());
      argv.push(values.display().to_string());
    }
    self.run_ok(&argv, &ctx.working_dir).await
  }

  async fn template(&self, release: &ReleaseSpec, ctx: &HelmContext) -> Result<String, HelmError> {
    let mut argv = args(&["template", &release.name, &release.chart]);
    if !release.namespace.is_empty() {
      argv.push("--namespace".to_string());
      argv.push(release.namespace.clone());
    }
    argv.extend(chart_args(release));
    self.run_ok(&argv, &ctx.working_dir).await
  }
}
