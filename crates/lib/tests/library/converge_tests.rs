use std::sync::Arc;

use stevedore_lib::converge::{ApplyOptions, DestroyOptions, DiffOptions, ReleaseOpOptions, SyncOptions};
use stevedore_lib::error::{EXIT_DIFF_DETECTED, EXIT_FAILURE, ReleaseError, RunError};
use stevedore_lib::plan::{NeedsPolicy, PlanError};
use stevedore_lib::release::ResolveError;
use tempfile::TempDir;

use super::common::{FakeHelm, FixedAnswer, context, document, engine, release};
#[cfg(unix)]
use super::common::{event_logger, logged_events};

fn apply_with(needs: NeedsPolicy) -> ApplyOptions {
  ApplyOptions {
    needs,
    concurrency: 2,
    ..Default::default()
  }
}

#[tokio::test]
async fn unselected_need_fails_before_touching_helm() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a").with_need("b"), release("b")]).with_selectors(&["name=a"]);

  let err = engine(&helm)
    .apply(&doc, &context(), &apply_with(NeedsPolicy::Enforce))
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    RunError::Plan {
      source: PlanError::UnselectedNeed { .. },
      ..
    }
  ));
  assert!(err.to_string().contains("does not match the selectors"));
  assert!(helm.calls().is_empty());
  assert!(helm.repo_syncs().is_empty());
}

#[tokio::test]
async fn skip_needs_acts_on_selection_only() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a").with_need("b"), release("b")]).with_selectors(&["name=a"]);

  let report = engine(&helm)
    .apply(&doc, &context(), &apply_with(NeedsPolicy::Skip))
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["a"]);
  assert_eq!(report.affected.upgraded.len(), 1);
}

#[tokio::test]
async fn include_needs_acts_on_dependency_first() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a").with_need("b"), release("b")]).with_selectors(&["name=a"]);

  engine(&helm)
    .apply(&doc, &context(), &apply_with(NeedsPolicy::IncludeDirect))
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["b", "a"]);
}

#[tokio::test]
async fn include_needs_stops_at_direct_dependencies() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(
    dir.path(),
    vec![release("a").with_need("b"), release("b").with_need("c"), release("c")],
  )
  .with_selectors(&["name=a"]);

  engine(&helm)
    .apply(&doc, &context(), &apply_with(NeedsPolicy::IncludeDirect))
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["b", "a"]);
}

#[tokio::test]
async fn include_transitive_needs_walks_the_chain() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(
    dir.path(),
    vec![release("a").with_need("b"), release("b").with_need("c"), release("c")],
  )
  .with_selectors(&["name=a"]);

  engine(&helm)
    .apply(&doc, &context(), &apply_with(NeedsPolicy::IncludeTransitive))
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn unselected_disabled_need_is_satisfied() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(
    dir.path(),
    vec![release("a").with_need("b"), release("b").with_installed(false)],
  )
  .with_selectors(&["name=a"]);

  let report = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["a"]);
  assert!(helm.calls_for("delete").is_empty());
  assert_eq!(report.affected.upgraded.len(), 1);
}

#[tokio::test]
async fn apply_detailed_exitcode_reports_changes_without_errors() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a"), release("b"), release("c")]);
  let opts = ApplyOptions {
    detailed_exitcode: true,
    ..Default::default()
  };

  let report = engine(&helm).apply(&doc, &context(), &opts).await.unwrap();

  assert_eq!(report.exit_code(), EXIT_DIFF_DETECTED);
  assert_eq!(report.affected.upgraded.len(), 3);
  assert!(report.affected.failed.is_empty());
}

#[tokio::test]
async fn diff_detailed_exitcode_is_all_change_detected() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let unchanged = release("steady");
  helm.deploy(&unchanged, &["1.0.0"]);
  let doc = document(dir.path(), vec![release("a"), unchanged, release("b")]);
  let opts = DiffOptions {
    detailed_exitcode: true,
    ..Default::default()
  };

  let err = engine(&helm).diff(&doc, &context(), &opts).await.unwrap_err();

  assert_eq!(err.exit_code(), EXIT_DIFF_DETECTED);
  match err {
    RunError::Releases { source, .. } => {
      assert_eq!(source.len(), 2);
      assert!(source.errors().iter().all(ReleaseError::is_change_detected));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(helm.calls_for("upgrade").is_empty());
}

#[tokio::test]
async fn diff_without_detailed_exitcode_only_reports() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a")]);

  let report = engine(&helm)
    .diff(&doc, &context(), &DiffOptions::default())
    .await
    .unwrap();

  let changes = report.changes.as_ref().unwrap();
  assert_eq!(changes.update.len(), 1);
  assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn second_apply_is_a_no_op() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a").with_need("b"), release("b")]);
  let engine = engine(&helm);

  let first = engine.apply(&doc, &context(), &ApplyOptions::default()).await.unwrap();
  assert_eq!(first.affected.upgraded.len(), 2);

  let second = engine.apply(&doc, &context(), &ApplyOptions::default()).await.unwrap();
  let changes = second.changes.unwrap();
  assert!(changes.is_empty());
  assert_eq!(changes.unchanged.len(), 2);
  assert!(second.affected.is_empty());
  assert_eq!(helm.calls_for("upgrade").len(), 2);
}

#[tokio::test]
async fn drifted_release_is_upgraded_again() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let web = release("web");
  let db = release("db");
  helm.deploy(&web, &["1.0.0"]);
  helm.deploy(&db, &["1.0.0"]);
  helm.mark_dirty(&db);
  let doc = document(dir.path(), vec![web, db]);

  let report = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["db"]);
  let changes = report.changes.unwrap();
  assert_eq!(changes.unchanged.len(), 1);
  assert_eq!(changes.update.len(), 1);
}

#[tokio::test]
async fn duplicate_selected_releases_fail() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a"), release("a")]);

  let err = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    RunError::Resolve {
      source: ResolveError::Duplicate { count: 2, .. },
      ..
    }
  ));
  assert!(err.to_string().contains("found 2 duplicate releases with ID \"kind/default/a\""));
}

#[tokio::test]
async fn deletions_run_before_upgrades() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let gone = release("gone").with_installed(false);
  helm.deploy(&gone, &["1.0.0"]);
  let doc = document(dir.path(), vec![release("web"), gone.clone()]);

  let report = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap();

  let calls = helm.calls();
  let delete_at = calls.iter().position(|c| c == "delete gone").unwrap();
  let upgrade_at = calls.iter().position(|c| c == "upgrade web").unwrap();
  assert!(delete_at < upgrade_at);
  assert!(!helm.has_deployed(&gone));
  assert_eq!(report.affected.deleted[0].name, "gone");
}

#[tokio::test]
async fn diff_errors_are_collected_for_every_release() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  helm.fail("diff", "a");
  helm.fail("diff", "c");
  let doc = document(dir.path(), vec![release("a"), release("b"), release("c")]);

  let err = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap_err();

  assert_eq!(err.exit_code(), EXIT_FAILURE);
  match err {
    RunError::Releases { source, .. } => assert_eq!(source.len(), 2),
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(helm.calls_for("diff").len(), 3);
  assert!(helm.calls_for("upgrade").is_empty());
}

#[tokio::test]
async fn failed_batch_stops_later_batches() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  helm.fail("upgrade", "db");
  let doc = document(
    dir.path(),
    vec![release("web").with_need("db"), release("db"), release("cache")],
  );

  let err = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap_err();

  assert_eq!(err.exit_code(), EXIT_FAILURE);
  let summary = err.summary().unwrap();
  assert_eq!(summary.failed[0].name, "db");
  assert_eq!(summary.upgraded[0].name, "cache");
  assert!(!helm.calls_for("upgrade").contains(&"web".to_string()));
}

#[tokio::test]
async fn declined_confirmation_changes_nothing() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a")]);
  let opts = ApplyOptions {
    interactive: true,
    ..Default::default()
  };

  let report = engine(&helm)
    .with_prompt(Arc::new(FixedAnswer(false)))
    .apply(&doc, &context(), &opts)
    .await
    .unwrap();

  assert!(report.declined);
  assert!(helm.calls_for("upgrade").is_empty());
}

#[tokio::test]
async fn rollback_when_requested_version_is_older() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let web = release("web");
  helm.deploy(&web, &["1.0.0", "1.1.0"]);
  let doc = document(dir.path(), vec![web.clone()]);

  let opts = ApplyOptions {
    allow_rollback: true,
    ..Default::default()
  };
  let report = engine(&helm).apply(&doc, &context(), &opts).await.unwrap();

  assert_eq!(helm.calls_for("rollback"), vec!["web"]);
  assert!(helm.calls_for("upgrade").is_empty());
  assert_eq!(report.affected.rolled_back.len(), 1);
  assert_eq!(report.changes.unwrap().rollback.len(), 1);
}

#[tokio::test]
async fn older_version_upgrades_without_rollback_flag() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let web = release("web");
  helm.deploy(&web, &["1.0.0", "1.1.0"]);
  let doc = document(dir.path(), vec![web]);

  engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap();

  assert_eq!(helm.calls_for("upgrade"), vec!["web"]);
  assert!(helm.calls_for("history").is_empty());
}

#[tokio::test]
async fn sync_upgrades_without_diffing() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let steady = release("steady");
  helm.deploy(&steady, &["1.0.0"]);
  let gone = release("gone").with_installed(false);
  helm.deploy(&gone, &["1.0.0"]);
  let doc = document(dir.path(), vec![steady, gone]);

  let report = engine(&helm)
    .sync(&doc, &context(), &SyncOptions::default())
    .await
    .unwrap();

  assert!(helm.calls_for("diff").is_empty());
  assert_eq!(helm.calls_for("upgrade"), vec!["steady"]);
  assert_eq!(helm.calls_for("delete"), vec!["gone"]);
  assert_eq!(report.affected.acted(), 2);
}

#[tokio::test]
async fn destroy_deletes_dependents_first() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let releases = vec![release("web").with_need("api"), release("api").with_need("db"), release("db")];
  for r in &releases {
    helm.deploy(r, &["1.0.0"]);
  }
  let never = release("never");
  let mut all = releases.clone();
  all.push(never);
  let doc = document(dir.path(), all);

  let report = engine(&helm)
    .destroy(&doc, &context(), &DestroyOptions::default())
    .await
    .unwrap();

  assert_eq!(helm.calls_for("delete"), vec!["web", "api", "db"]);
  assert_eq!(report.affected.deleted.len(), 3);
}

#[tokio::test]
async fn cancelled_context_acts_on_nothing() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a")]);
  let ctx = context();
  ctx.cancel();

  let err = engine(&helm)
    .apply(&doc, &ctx, &ApplyOptions::default())
    .await
    .unwrap_err();

  assert!(matches!(err, RunError::Cancelled));
  assert!(helm.calls_for("upgrade").is_empty());
}

#[tokio::test]
async fn status_follows_plan_and_skips_disabled() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(
    dir.path(),
    vec![release("web").with_need("db"), release("db"), release("off").with_installed(false)],
  );

  let report = engine(&helm)
    .status(&doc, &context(), &ReleaseOpOptions::default())
    .await
    .unwrap();

  assert_eq!(helm.calls_for("status"), vec!["db", "web"]);
  let outputs: Vec<&str> = report.outputs.iter().map(|o| o.output.as_str()).collect();
  assert_eq!(outputs, vec!["STATUS: web", "STATUS: db"]);
}

#[tokio::test]
async fn template_renders_every_installed_release() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a"), release("b")]);

  let report = engine(&helm)
    .template(&doc, &context(), &ReleaseOpOptions::default())
    .await
    .unwrap();

  assert_eq!(report.outputs.len(), 2);
  assert!(report.outputs[0].output.contains("name: a"));
}

#[tokio::test]
async fn list_needs_no_helm() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(
    dir.path(),
    vec![release("a").with_label("tier", "web"), release("b")],
  )
  .with_selectors(&["tier=web"]);

  let report = engine(&helm).list(&doc).unwrap();
  assert!(report.matched);
  assert_eq!(report.releases.len(), 1);
  assert!(helm.calls().is_empty());
}

#[tokio::test]
async fn malformed_selector_names_document() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("a")]).with_selectors(&["oops"]);

  let err = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap_err();

  let message = err.to_string();
  assert!(message.contains("stevedore.yaml"));
  assert!(message.contains("malformed label: oops"));
}

#[cfg(unix)]
const ALL_EVENTS: &[&str] = &["prepare", "preapply", "presync", "preuninstall", "postuninstall", "postsync", "cleanup"];

#[cfg(unix)]
#[tokio::test]
async fn hooks_fire_around_upgrades() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("web").with_hook(event_logger(ALL_EVENTS))]);

  engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap();

  assert_eq!(
    logged_events(dir.path()),
    vec!["web prepare", "web preapply", "web postsync", "web cleanup"]
  );
}

#[cfg(unix)]
#[tokio::test]
async fn unchanged_apply_fires_only_bookend_hooks() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let doc = document(dir.path(), vec![release("web").with_hook(event_logger(ALL_EVENTS))]);
  let engine = engine(&helm);

  engine.apply(&doc, &context(), &ApplyOptions::default()).await.unwrap();
  std::fs::remove_file(dir.path().join("events.log")).unwrap();

  engine.apply(&doc, &context(), &ApplyOptions::default()).await.unwrap();
  assert_eq!(logged_events(dir.path()), vec!["web prepare", "web cleanup"]);
}

#[cfg(unix)]
#[tokio::test]
async fn cleanup_skips_failed_and_unreached_releases() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  helm.fail("upgrade", "db");
  let steady = release("steady").with_hook(event_logger(&["cleanup"]));
  helm.deploy(&steady, &["1.0.0"]);
  let doc = document(
    dir.path(),
    vec![
      release("web").with_need("db").with_hook(event_logger(&["cleanup"])),
      release("db").with_hook(event_logger(&["cleanup"])),
      release("cache").with_hook(event_logger(&["cleanup"])),
      steady,
    ],
  );

  let err = engine(&helm)
    .apply(&doc, &context(), &ApplyOptions::default())
    .await
    .unwrap_err();

  assert_eq!(err.exit_code(), EXIT_FAILURE);
  let mut upgraded = helm.calls_for("upgrade");
  upgraded.sort();
  assert_eq!(upgraded, vec!["cache", "db"]);
  assert_eq!(logged_events(dir.path()), vec!["cache cleanup", "steady cleanup"]);
}

#[cfg(unix)]
#[tokio::test]
async fn declined_confirmation_cleans_up_only_no_ops() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let steady = release("steady").with_hook(event_logger(ALL_EVENTS));
  helm.deploy(&steady, &["1.0.0"]);
  let doc = document(dir.path(), vec![release("web").with_hook(event_logger(ALL_EVENTS)), steady]);
  let opts = ApplyOptions {
    interactive: true,
    ..Default::default()
  };

  let report = engine(&helm)
    .with_prompt(Arc::new(FixedAnswer(false)))
    .apply(&doc, &context(), &opts)
    .await
    .unwrap();

  assert!(report.declined);
  assert_eq!(
    logged_events(dir.path()),
    vec!["web prepare", "steady prepare", "steady cleanup"]
  );
}

#[cfg(unix)]
#[tokio::test]
async fn destroy_fires_uninstall_hooks() {
  let dir = TempDir::new().unwrap();
  let helm = FakeHelm::new();
  let web = release("web").with_hook(event_logger(ALL_EVENTS));
  helm.deploy(&web, &["1.0.0"]);
  let doc = document(dir.path(), vec![web]);

  engine(&helm)
    .destroy(&doc, &context(), &DestroyOptions::default())
    .await
    .unwrap();

  assert_eq!(
    logged_events(dir.path()),
    vec!["web prepare", "web preuninstall", "web postuninstall", "web cleanup"]
  );
}
