//! HTTP API of the irgsh chief.
//!
//! Accepts package submissions, reports pipeline status and exposes the
//! worker fleet.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
