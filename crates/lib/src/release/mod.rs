//! Releases, their identity and selector resolution.

pub mod resolve;
pub mod selector;
pub mod types;

pub use resolve::{ResolveError, Selection, collect_needs, index_by_id, select_releases};
pub use selector::{LabelFilter, SelectorError, Selectors};
pub use types::{HookDef, ReleaseId, ReleaseSpec, RepositorySpec, ValuesEntry};
