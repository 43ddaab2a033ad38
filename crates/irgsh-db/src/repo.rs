//! Repository traits and implementations.

pub mod iso_jobs;
pub mod jobs;

pub use iso_jobs::{IsoJobRepo, SqliteIsoJobRepo};
pub use jobs::{JobRepo, SqliteJobRepo};

/// States a row can no longer leave, as a SQL list literal.
pub(crate) const TERMINAL_STATES_SQL: &str = "('SUCCESS', 'DONE', 'FAILURE', 'FAILED')";

/// Listings without an explicit limit return this many rows.
pub(crate) const DEFAULT_RECENT_LIMIT: usize = 10;
