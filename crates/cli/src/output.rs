//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, release summaries and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use stevedore_lib::converge::affected::{AffectedRelease, AffectedSummary};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
  pub const ROLLBACK: &str = "↺";
}

/// Durations rounded to whole milliseconds, e.g. `1s 500ms`.
pub fn format_duration(duration: Duration) -> String {
  let rounded = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(rounded).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Print the releases a run upgraded, rolled back, deleted or failed on.
pub fn print_summary(summary: &AffectedSummary) {
  print_section("UPDATED RELEASES", &summary.upgraded);
  print_section("ROLLED BACK RELEASES", &summary.rolled_back);
  print_section("DELETED RELEASES", &summary.deleted);
  print_section("FAILED RELEASES", &summary.failed);

  if summary.failed.is_empty() {
    print_success(&format!("{} release(s) converged", summary.acted()));
  }
}

fn print_section(title: &str, releases: &[AffectedRelease]) {
  if releases.is_empty() {
    return;
  }

  println!();
  println!("{}", title.if_supports_color(Stream::Stdout, |s| s.bold()));
  for line in summary_table(releases) {
    println!("{line}");
  }
}

fn summary_table(releases: &[AffectedRelease]) -> Vec<String> {
  let header = ["NAME", "NAMESPACE", "CHART", "VERSION", "DURATION"].map(String::from);
  let rows: Vec<[String; 5]> = releases
    .iter()
    .map(|release| {
      [
        release.name.clone(),
        release.namespace.clone(),
        release.chart.clone(),
        release.version.clone().unwrap_or_default(),
        format_duration(release.duration),
      ]
    })
    .collect();

  let mut widths = header.clone().map(|cell| cell.len());
  for row in &rows {
    for (width, cell) in widths.iter_mut().zip(row) {
      *width = (*width).max(cell.len());
    }
  }

  std::iter::once(&header)
    .chain(&rows)
    .map(|row| {
      row
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
    })
    .collect()
}
