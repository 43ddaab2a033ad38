//! External-command collaborators for irgsh.
//!
//! Provides the production implementations of the core storage and
//! verification traits:
//! - Local submission storage (`tar`, `cp`, `chown`, optionally via `sudo`)
//! - GnuPG signature verification

pub mod command;
pub mod gpg;
pub mod storage;

pub use gpg::GpgVerifier;
pub use irgsh_core::artifact::{SignatureVerifier, SubmissionStorage};
pub use storage::LocalStorage;
