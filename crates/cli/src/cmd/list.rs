//! `stv list`: print the selected releases without contacting Helm.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use stevedore_lib::converge::Report;
use stevedore_lib::release::ReleaseSpec;
use stevedore_lib::run::Command;

use super::{Invocation, execute, report_failure};
use crate::output::{OutputFormat, print_json};

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct ListedRelease<'a> {
  name: &'a str,
  namespace: &'a str,
  context: &'a str,
  installed: bool,
  labels: String,
  chart: &'a str,
  version: &'a str,
}

impl<'a> ListedRelease<'a> {
  fn new(release: &'a ReleaseSpec) -> Self {
    let labels = release
      .labels
      .iter()
      .map(|(key, value)| format!("{key}:{value}"))
      .collect::<Vec<_>>()
      .join(",");
    Self {
      name: &release.name,
      namespace: &release.namespace,
      context: &release.context,
      installed: release.installed,
      labels,
      chart: &release.chart,
      version: release.version.as_deref().unwrap_or(""),
    }
  }
}

pub fn cmd_list(invocation: &Invocation, args: ListArgs) -> Result<i32> {
  let reports = match execute(invocation, Command::List, false)? {
    Ok(reports) => reports,
    Err(err) => return Ok(report_failure(&err)),
  };

  let rows: Vec<ListedRelease<'_>> = reports
    .iter()
    .flat_map(|report: &Report| &report.releases)
    .map(ListedRelease::new)
    .collect();

  if args.output.is_json() {
    print_json(&rows)?;
  } else {
    print_table(&rows);
  }
  Ok(0)
}

fn print_table(rows: &[ListedRelease<'_>]) {
  let header = ["NAME", "NAMESPACE", "CONTEXT", "INSTALLED", "LABELS", "CHART", "VERSION"];
  let cells: Vec<[String; 7]> = rows
    .iter()
    .map(|row| {
      [
        row.name.to_string(),
        row.namespace.to_string(),
        row.context.to_string(),
        row.installed.to_string(),
        row.labels.clone(),
        row.chart.to_string(),
        row.version.to_string(),
      ]
    })
    .collect();

  let mut widths = header.map(str::len);
  for row in &cells {
    for (width, cell) in widths.iter_mut().zip(row) {
      *width = (*width).max(cell.len());
    }
  }

  let render = |cells: &[String]| {
    cells
      .iter()
      .zip(widths)
      .map(|(cell, width)| format!("{cell:<width$}"))
      .collect::<Vec<_>>()
      .join("  ")
      .trim_end()
      .to_string()
  };

  println!("{}", render(header.map(String::from).as_slice()));
  for row in &cells {
    println!("{}", render(row.as_slice()));
  }
}
