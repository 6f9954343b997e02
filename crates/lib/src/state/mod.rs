//! State document loading.
//!
//! A state file is plain YAML (no templating) declaring repositories,
//! releases, document-wide defaults and nested sub-documents:
//!
//! ```yaml
//! defaults:
//!   namespace: web
//!   kubeContext: kind
//! repositories:
//!   - name: stable
//!     url: https://charts.example.com
//! releases:
//!   - name: frontend
//!     chart: stable/nginx
//!     needs: [backend]
//! documents:
//!   - path: infra/stevedore.yaml
//!     selectors: [tier=db]
//! ```
//!
//! Loading flattens sub-documents into a list of [`StateDocument`]s, each
//! carrying the selectors it is converged with.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::release::{ReleaseSpec, RepositorySpec};

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("no state files found in {}", path.display())]
  Empty { path: PathBuf },

  #[error(
    "in {}: sub-document \"{document}\" sets both selectors and selectorsInherited",
    path.display()
  )]
  ConflictingSelectors { path: PathBuf, document: String },

  #[error("state document {} includes itself", path.display())]
  Recursive { path: PathBuf },
}

/// How sub-documents without explicit selectors pick theirs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectorInheritance {
  /// Sub-documents without `selectors` inherit the parent's.
  #[default]
  Legacy,
  /// Sub-documents only inherit with `selectorsInherited: true`; otherwise
  /// they select everything unless they list their own selectors.
  Explicit,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
  /// Selectors given on the command line.
  pub selectors: Vec<String>,
  pub inheritance: SelectorInheritance,
}

/// One loaded document, ready to be converged.
#[derive(Debug, Clone, Default)]
pub struct StateDocument {
  pub path: PathBuf,

  /// Directory relative paths (values files, local charts, hooks) resolve against.
  pub base_dir: PathBuf,
  pub repositories: Vec<RepositorySpec>,

  /// The release universe of this document.
  pub releases: Vec<ReleaseSpec>,
  pub selectors: Vec<String>,
}

impl StateDocument {
  /// Build a document from releases, numbering them in declaration order.
  pub fn new(path: impl Into<PathBuf>, releases: Vec<ReleaseSpec>) -> Self {
    let path = path.into();
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut doc = Self {
      path,
      base_dir,
      releases,
      ..Default::default()
    };
    doc.renumber();
    doc
  }

  pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
    self.base_dir = base_dir.into();
    self
  }

  pub fn with_repository(mut self, name: &str, url: &str) -> Self {
    self.repositories.push(RepositorySpec {
      name: name.to_string(),
      url: url.to_string(),
    });
    self
  }

  pub fn with_selectors<S: AsRef<str>>(mut self, selectors: &[S]) -> Self {
    self.selectors = selectors.iter().map(|s| s.as_ref().to_string()).collect();
    self
  }

  fn renumber(&mut self) {
    for (idx, release) in self.releases.iter_mut().enumerate() {
      release.order = idx;
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
  #[serde(default)]
  defaults: Defaults,

  #[serde(default)]
  repositories: Vec<RepositorySpec>,

  #[serde(default)]
  releases: Vec<ReleaseSpec>,

  #[serde(default)]
  documents: Vec<SubDocumentEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Defaults {
  namespace: Option<String>,
  kube_context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubDocumentEntry {
  Path(String),
  Detailed(SubDocument),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubDocument {
  path: String,

  #[serde(default)]
  selectors: Option<Vec<String>>,

  #[serde(default)]
  selectors_inherited: bool,
}

impl SubDocumentEntry {
  fn into_parts(self) -> SubDocument {
    match self {
      SubDocumentEntry::Path(path) => SubDocument {
        path,
        selectors: None,
        selectors_inherited: false,
      },
      SubDocumentEntry::Detailed(sub) => sub,
    }
  }
}

/// Load a state file, or every `*.yaml`/`*.yml` file of a directory in name
/// order, flattening sub-documents depth first. A sub-document comes before
/// the document that includes it.
pub fn load(path: &Path, options: &LoadOptions) -> Result<Vec<StateDocument>, StateError> {
  let mut documents = Vec::new();
  let mut stack = HashSet::new();

  for file in state_files(path)? {
    load_file(&file, &options.selectors, options.inheritance, &mut stack, &mut documents)?;
  }

  info!(
    path = %path.display(),
    documents = documents.len(),
    releases = documents.iter().map(|d| d.releases.len()).sum::<usize>(),
    "loaded state"
  );
  Ok(documents)
}

fn state_files(path: &Path) -> Result<Vec<PathBuf>, StateError> {
  let read_err = |source| StateError::Read {
    path: path.to_path_buf(),
    source,
  };

  let metadata = std::fs::metadata(path).map_err(read_err)?;
  if !metadata.is_dir() {
    return Ok(vec![path.to_path_buf()]);
  }

  let mut files: Vec<PathBuf> = std::fs::read_dir(path)
    .map_err(read_err)?
    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
    .filter(|file| {
      file.is_file()
        && file
          .extension()
          .and_then(|ext| ext.to_str())
          .is_some_and(|ext| ext == "yaml" || ext == "yml")
    })
    .collect();
  files.sort();

  if files.is_empty() {
    return Err(StateError::Empty {
      path: path.to_path_buf(),
    });
  }
  Ok(files)
}

fn load_file(
  path: &Path,
  selectors: &[String],
  inheritance: SelectorInheritance,
  stack: &mut HashSet<PathBuf>,
  out: &mut Vec<StateDocument>,
) -> Result<(), StateError> {
  let canonical = dunce::canonicalize(path).map_err(|source| StateError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  if !stack.insert(canonical.clone()) {
    return Err(StateError::Recursive { path: canonical });
  }

  let raw = std::fs::read_to_string(&canonical).map_err(|source| StateError::Read {
    path: canonical.clone(),
    source,
  })?;
  let parsed: RawDocument = if raw.trim().is_empty() {
    RawDocument::default()
  } else {
    serde_yaml::from_str(&raw).map_err(|source| StateError::Parse {
      path: canonical.clone(),
      source,
    })?
  };

  let base_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
  debug!(
    path = %canonical.display(),
    releases = parsed.releases.len(),
    documents = parsed.documents.len(),
    "parsed state file"
  );

  let has_subdocuments = !parsed.documents.is_empty();
  for entry in parsed.documents {
    let sub = entry.into_parts();
    let sub_selectors = inherited_selectors(&canonical, &sub, selectors, inheritance)?;
    for file in state_files(&base_dir.join(&sub.path))? {
      load_file(&file, &sub_selectors, inheritance, stack, out)?;
    }
  }

  if !parsed.releases.is_empty() || !has_subdocuments {
    let mut releases = parsed.releases;
    for release in &mut releases {
      if release.namespace.is_empty() {
        release.namespace = parsed.defaults.namespace.clone().unwrap_or_default();
      }
      if release.context.is_empty() {
        release.context = parsed.defaults.kube_context.clone().unwrap_or_default();
      }
    }

    let mut doc = StateDocument::new(canonical.clone(), releases).with_base_dir(base_dir);
    doc.repositories = parsed.repositories;
    doc.selectors = selectors.to_vec();
    out.push(doc);
  }

  stack.remove(&canonical);
  Ok(())
}

fn inherited_selectors(
  parent: &Path,
  sub: &SubDocument,
  parent_selectors: &[String],
  inheritance: SelectorInheritance,
) -> Result<Vec<String>, StateError> {
  if sub.selectors_inherited && sub.selectors.is_some() {
    return Err(StateError::ConflictingSelectors {
      path: parent.to_path_buf(),
      document: sub.path.clone(),
    });
  }

  if sub.selectors_inherited {
    return Ok(parent_selectors.to_vec());
  }

  Ok(match (&sub.selectors, inheritance) {
    (Some(explicit), _) => explicit.clone(),
    (None, SelectorInheritance::Legacy) => parent_selectors.to_vec(),
    (None, SelectorInheritance::Explicit) => Vec::new(),
  })
}
