//! Submission artifact storage and signature verification.
//!
//! Both are thin wrappers over external commands in production; the
//! pipeline logic only sees these traits.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::{Result, TaskUuid};

/// Filesystem layout of submitted bundles.
///
/// Uploaded bundles land as `submissions/<upload>.tar.gz` with a detached
/// signature `submissions/<upload>.token`. Admission re-addresses them by
/// pipeline id: `submissions/<uuid>.tar.gz`, the extracted tree in
/// `submissions/<uuid>/` and the signature as `submissions/<uuid>.sig.txt`.
#[async_trait]
pub trait SubmissionStorage: Send + Sync {
    /// Write an uploaded bundle and its signature token under `upload_id`.
    ///
    /// Returns the path of the stored token.
    async fn store_upload(&self, upload_id: &str, token: &[u8], blob: &[u8]) -> Result<PathBuf>;

    /// Remove whatever `store_upload` wrote for `upload_id`.
    async fn discard_upload(&self, upload_id: &str) -> Result<()>;

    /// Move an uploaded bundle under the pipeline id and extract it.
    ///
    /// Returns the extracted submission directory.
    async fn admit_upload(&self, upload_id: &str, uuid: &TaskUuid) -> Result<PathBuf>;

    /// Whether the bundle of a pipeline is still on disk.
    async fn tarball_exists(&self, uuid: &TaskUuid) -> Result<bool>;

    /// Copy a pipeline's bundle and extracted tree to a new pipeline id.
    async fn copy_submission(&self, from: &TaskUuid, to: &TaskUuid) -> Result<()>;

    /// Give the copied artifacts of a pipeline back to this process' user.
    async fn reclaim_ownership(&self, uuid: &TaskUuid) -> Result<()>;
}

/// Checks the maintainer signature of an extracted submission.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Fails with `Error::Unauthorized` when the signature does not verify.
    async fn verify_submission(&self, submission_dir: &Path) -> Result<()>;

    /// Check a signed upload token. Fails with `Error::Unauthorized`.
    async fn verify_token(&self, token: &Path) -> Result<()>;
}
