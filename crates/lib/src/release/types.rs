//! Release definitions and identity.
//!
//! A release is one desired Helm deployment. Its identity is the triple
//! `(namespace, name, context)`, rendered as a [`ReleaseId`] of the form
//! `context/namespace/name`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable key of a release, used for set membership, map indexing and need resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub String);

impl ReleaseId {
  pub fn new(context: &str, namespace: &str, name: &str) -> Self {
    ReleaseId(format!("{}/{}/{}", context, namespace, name))
  }
}

impl fmt::Display for ReleaseId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A values source passed to Helm.
///
/// Files are resolved relative to the state document; inline mappings are
/// written to the invocation scratch directory before Helm is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValuesEntry {
  File(String),
  Inline(serde_yaml::Mapping),
}

/// A lifecycle hook declared on a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  /// Event names this hook reacts to (`prepare`, `preapply`, `cleanup`, ...).
  #[serde(default)]
  pub events: Vec<String>,

  pub command: String,

  #[serde(default)]
  pub args: Vec<String>,

  /// Forward the hook's stdout to the log at info level.
  #[serde(default, rename = "showlogs")]
  pub show_logs: bool,
}

/// One desired deployable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
  pub name: String,

  #[serde(default)]
  pub namespace: String,

  /// Target kube context.
  #[serde(default, rename = "kubeContext")]
  pub context: String,

  /// Chart reference, either `repo/chart` or a local path.
  pub chart: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,

  /// Desired state: `false` means the release must be absent.
  #[serde(default = "default_installed")]
  pub installed: bool,

  #[serde(default)]
  pub labels: BTreeMap<String, String>,

  /// References to other releases: `name`, `namespace/name` or `context/namespace/name`.
  #[serde(default)]
  pub needs: Vec<String>,

  #[serde(default)]
  pub hooks: Vec<HookDef>,

  #[serde(default)]
  pub values: Vec<ValuesEntry>,

  /// Position in the loaded universe. Only used for deterministic output.
  #[serde(skip)]
  pub order: usize,

  /// Values files ready to be handed to Helm, filled in by staging.
  #[serde(skip)]
  pub staged_values: Vec<PathBuf>,
}

fn default_installed() -> bool {
  true
}

impl ReleaseSpec {
  pub fn new(name: &str, chart: &str) -> Self {
    Self {
      name: name.to_string(),
      namespace: String::new(),
      context: String::new(),
      chart: chart.to_string(),
      version: None,
      installed: true,
      labels: BTreeMap::new(),
      needs: Vec::new(),
      hooks: Vec::new(),
      values: Vec::new(),
      order: 0,
      staged_values: Vec::new(),
    }
  }

  pub fn in_namespace(mut self, namespace: &str) -> Self {
    self.namespace = namespace.to_string();
    self
  }

  pub fn in_context(mut self, context: &str) -> Self {
    self.context = context.to_string();
    self
  }

  pub fn with_version(mut self, version: &str) -> Self {
    self.version = Some(version.to_string());
    self
  }

  pub fn with_label(mut self, key: &str, value: &str) -> Self {
    self.labels.insert(key.to_string(), value.to_string());
    self
  }

  pub fn with_need(mut self, need: &str) -> Self {
    self.needs.push(need.to_string());
    self
  }

  pub fn with_hook(mut self, hook: HookDef) -> Self {
    self.hooks.push(hook);
    self
  }

  pub fn with_installed(mut self, installed: bool) -> Self {
    self.installed = installed;
    self
  }

  pub fn id(&self) -> ReleaseId {
    ReleaseId::new(&self.context, &self.namespace, &self.name)
  }

  /// Labels used for selector matching.
  ///
  /// Every release carries `name`, `namespace` and `chart`; declared labels
  /// take precedence over them.
  pub fn selector_labels(&self) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("name".to_string(), self.name.clone());
    labels.insert("namespace".to_string(), self.namespace.clone());
    labels.insert("chart".to_string(), self.chart_name().to_string());
    for (key, value) in &self.labels {
      labels.insert(key.clone(), value.clone());
    }
    labels
  }

  /// Resolve `needs` references into release IDs.
  ///
  /// Missing namespace or context segments default to this release's own.
  /// The context is whatever precedes the last two segments, so contexts
  /// containing `/` resolve correctly.
  pub fn need_ids(&self) -> Vec<ReleaseId> {
    self.needs.iter().map(|need| self.resolve_need(need)).collect()
  }

  fn resolve_need(&self, need: &str) -> ReleaseId {
    let mut parts = need.rsplitn(3, '/');
    let name = parts.next().unwrap_or_default();
    let namespace = parts.next().unwrap_or(&self.namespace);
    let context = parts.next().unwrap_or(&self.context);
    ReleaseId::new(context, namespace, name)
  }

  /// Chart name without any repository prefix.
  pub fn chart_name(&self) -> &str {
    self.chart.rsplit('/').next().unwrap_or(&self.chart)
  }

  /// Repository name for `repo/chart` references; `None` for local charts.
  pub fn repository(&self) -> Option<&str> {
    if self.chart.starts_with('.') || self.chart.starts_with('/') || self.chart.contains("://") {
      return None;
    }
    match self.chart.split_once('/') {
      Some((repo, chart)) if !repo.is_empty() && !chart.is_empty() && !chart.contains('/') => Some(repo),
      _ => None,
    }
  }

  /// Hooks registered for the given event name.
  pub fn hooks_for<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a HookDef> + 'a {
    self.hooks.iter().filter(move |hook| hook.events.iter().any(|e| e == event))
  }
}

/// A chart repository declared by a state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
  pub name: String,
  pub url: String,
}
