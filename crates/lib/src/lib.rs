//! stevedore-lib: release scheduling and convergence for stevedore
//!
//! This crate provides the engine behind the `stv` binary:
//! - `release`: release identity, label selectors and selector resolution
//! - `plan`: dependency DAG and depth-batched plans built from `needs`
//! - `execute`: sequential batch execution and the bounded worker pool
//! - `converge`: diff, classify and act for apply / sync / destroy / diff
//! - `state`: YAML state documents and sub-document flattening

pub mod context;
pub mod converge;
pub mod error;
pub mod execute;
pub mod helm;
pub mod hooks;
pub mod plan;
pub mod release;
pub mod repo;
pub mod run;
pub mod state;

pub use context::Context;
pub use converge::Engine;
pub use error::{AggregateError, ReleaseError, RunError};
