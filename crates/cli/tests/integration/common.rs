//! Shared test helpers for CLI integration tests.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Stand-in for `helm`: logs every invocation and answers from environment variables.
///
/// - `FAKE_HELM_DIFF_EXIT`: exit code of `helm diff` (default 2, changed)
/// - `FAKE_HELM_DEPLOYED`: space separated release names `helm list` reports
/// - `FAKE_HELM_FAIL`: release name whose `helm upgrade` fails
const FAKE_HELM: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_HELM_LOG"
case "$1" in
  diff)
    exit "${FAKE_HELM_DIFF_EXIT:-2}"
    ;;
  list)
    for name in $FAKE_HELM_DEPLOYED; do echo "$name"; done
    ;;
  upgrade)
    if [ "$3" = "$FAKE_HELM_FAIL" ]; then
      echo "upgrade of $3 failed" >&2
      exit 1
    fi
    ;;
  status)
    echo "NAME: $2"
    echo "STATUS: deployed"
    ;;
  template)
    printf '%s\n' "---" "kind: ConfigMap" "metadata:" "  name: $2"
    ;;
esac
exit 0
"#;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the state document,
/// the fake `helm` and its invocation log.
pub struct TestEnv {
  pub temp: TempDir,
  pub state_path: PathBuf,
  helm_path: PathBuf,
}

impl TestEnv {
  /// Copy a fixture to `stevedore.yaml` in a fresh temporary directory.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let state_path = temp.path().join("stevedore.yaml");
    std::fs::copy(fixture_path(name), &state_path).unwrap();

    let helm_path = temp.path().join("helm");
    std::fs::write(&helm_path, FAKE_HELM).unwrap();
    std::fs::set_permissions(&helm_path, std::fs::Permissions::from_mode(0o755)).unwrap();

    Self {
      temp,
      state_path,
      helm_path,
    }
  }

  pub fn log_path(&self) -> PathBuf {
    self.temp.path().join("helm.log")
  }

  /// Helm invocations so far, one argument string per call.
  pub fn helm_calls(&self) -> Vec<String> {
    std::fs::read_to_string(self.log_path())
      .unwrap_or_default()
      .lines()
      .map(str::to_string)
      .collect()
  }

  /// Helm invocations starting with `prefix`.
  pub fn helm_calls_for(&self, prefix: &str) -> Vec<String> {
    self
      .helm_calls()
      .into_iter()
      .filter(|call| call.starts_with(prefix))
      .collect()
  }

  /// Get a pre-configured Command for the stv binary.
  ///
  /// Points `--file` at the state document and `--helm-binary` at the fake helm.
  pub fn stv_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("stv");
    cmd.arg("--file").arg(&self.state_path);
    cmd.arg("--helm-binary").arg(&self.helm_path);
    cmd.env("FAKE_HELM_LOG", self.log_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}
