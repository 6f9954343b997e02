use std::sync::Arc;

use stevedore_lib::converge::ApplyOptions;
use stevedore_lib::error::{EXIT_FAILURE, RunError};
use stevedore_lib::run::{Command, RunOptions, run_documents};
use stevedore_lib::state::StateDocument;
use tempfile::TempDir;

use super::common::{FakeHelm, context, document, engine, release};

fn apply() -> Command {
  Command::Apply(ApplyOptions::default())
}

fn two_documents(dir: &TempDir, first: &[&str], second: &[&str]) -> Vec<StateDocument> {
  let docs = [("one", first), ("two", second)];
  docs
    .iter()
    .map(|(sub, names)| {
      let path = dir.path().join(sub);
      std::fs::create_dir_all(&path).unwrap();
      document(&path, names.iter().map(|name| release(name)).collect())
    })
    .collect()
}

#[tokio::test]
async fn shared_repositories_sync_once_per_run() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let docs = two_documents(&dir, &["a"], &["b"]);

  let reports = run_documents(Arc::new(engine(&helm)), docs, context(), apply(), RunOptions::default())
    .await
    .unwrap();

  assert_eq!(reports.len(), 2);
  assert_eq!(helm.repo_syncs(), vec!["stable"]);
  let mut upgraded = helm.calls_for("upgrade");
  upgraded.sort();
  assert_eq!(upgraded, vec!["a", "b"]);
}

#[tokio::test]
async fn no_match_in_any_document_fails() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let docs = two_documents(&dir, &["a"], &["b"])
    .into_iter()
    .map(|doc| doc.with_selectors(&["name=zzz"]))
    .collect();

  let err = run_documents(Arc::new(engine(&helm)), docs, context(), apply(), RunOptions::default())
    .await
    .unwrap_err();

  assert!(matches!(err, RunError::NoMatchingReleases { .. }));
  assert_eq!(err.to_string(), "no releases found that match the selectors [name=zzz]");
  assert_eq!(err.exit_code(), EXIT_FAILURE);
  assert!(helm.calls().is_empty());
}

#[tokio::test]
async fn one_matching_document_is_enough() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let docs = two_documents(&dir, &["a"], &["b"])
    .into_iter()
    .map(|doc| doc.with_selectors(&["name=a"]))
    .collect();

  let reports = run_documents(Arc::new(engine(&helm)), docs, context(), apply(), RunOptions::default())
    .await
    .unwrap();

  let matched: Vec<bool> = reports.iter().map(|report| report.matched).collect();
  assert_eq!(matched, vec![true, false]);
  assert_eq!(helm.calls_for("upgrade"), vec!["a"]);
}

#[tokio::test]
async fn sequential_run_stops_at_first_failure() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  helm.fail("upgrade", "a");
  let docs = two_documents(&dir, &["a"], &["b"]);

  let err = run_documents(
    Arc::new(engine(&helm)),
    docs,
    context(),
    apply(),
    RunOptions { sequential: true },
  )
  .await
  .unwrap_err();

  assert!(matches!(err, RunError::Releases { .. }));
  assert_eq!(helm.calls_for("upgrade"), vec!["a"]);
  assert!(helm.calls_for("diff").iter().all(|name| name == "a"));
}

#[tokio::test]
async fn parallel_run_collects_every_failure() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  helm.fail("upgrade", "a");
  helm.fail("upgrade", "b");
  let docs = two_documents(&dir, &["a"], &["b"]);

  let err = run_documents(Arc::new(engine(&helm)), docs, context(), apply(), RunOptions::default())
    .await
    .unwrap_err();

  match &err {
    RunError::Documents(errors) => assert_eq!(errors.len(), 2),
    other => panic!("unexpected error: {other}"),
  }
  assert!(err.to_string().starts_with("2 documents failed:"));
  assert_eq!(err.exit_code(), EXIT_FAILURE);
}

#[tokio::test]
async fn list_runs_without_helm() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let docs = two_documents(&dir, &["a", "b"], &["c"]);

  let reports = run_documents(Arc::new(engine(&helm)), docs, context(), Command::List, RunOptions::default())
    .await
    .unwrap();

  let listed: usize = reports.iter().map(|report| report.releases.len()).sum();
  assert_eq!(listed, 3);
  assert!(helm.calls().is_empty());
  assert!(helm.repo_syncs().is_empty());
}
