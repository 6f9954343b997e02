//! Label selectors.
//!
//! A selector is one or more comma-joined clauses, each `key=value` or
//! `key!=value`. All clauses of a selector must hold (AND). A list of
//! selectors matches when any of them matches (OR); an empty list matches
//! everything.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
  #[error("malformed label: {clause}. Expected label in form k=v or k!=v")]
  Malformed { clause: String },
}

/// A single parsed selector (AND of its clauses).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
  raw: String,
  positive: Vec<(String, String)>,
  negative: Vec<(String, String)>,
}

impl LabelFilter {
  pub fn parse(raw: &str) -> Result<Self, SelectorError> {
    let mut filter = LabelFilter {
      raw: raw.to_string(),
      ..Default::default()
    };

    for clause in raw.split(',') {
      let clause = clause.trim();
      let malformed = || SelectorError::Malformed {
        clause: clause.to_string(),
      };

      // Operator at the first `=`. At most one per clause.
      let Some((key, value)) = clause.split_once('=') else {
        return Err(malformed());
      };
      if value.contains('=') {
        return Err(malformed());
      }
      let (key, negated) = match key.strip_suffix('!') {
        Some(key) => (key.trim(), true),
        None => (key.trim(), false),
      };
      if key.is_empty() || key.contains('!') {
        return Err(malformed());
      }

      let pair = (key.to_string(), value.trim().to_string());
      if negated {
        filter.negative.push(pair);
      } else {
        filter.positive.push(pair);
      }
    }

    Ok(filter)
  }

  pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
    let positive = self
      .positive
      .iter()
      .all(|(key, value)| labels.get(key).is_some_and(|v| v == value));
    let negative = self
      .negative
      .iter()
      .all(|(key, value)| labels.get(key).is_none_or(|v| v != value));
    positive && negative
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }
}

impl FromStr for LabelFilter {
  type Err = SelectorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    LabelFilter::parse(s)
  }
}

impl fmt::Display for LabelFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

/// OR-combination of label filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors(Vec<LabelFilter>);

impl Selectors {
  pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, SelectorError> {
    raw
      .iter()
      .map(|s| LabelFilter::parse(s.as_ref()))
      .collect::<Result<Vec<_>, _>>()
      .map(Selectors)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
    self.0.is_empty() || self.0.iter().any(|filter| filter.matches(labels))
  }
}

impl fmt::Display for Selectors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<&str> = self.0.iter().map(LabelFilter::as_str).collect();
    write!(f, "[{}]", parts.join(" "))
  }
}
