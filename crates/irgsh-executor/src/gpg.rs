//! GnuPG signature verification.

use async_trait::async_trait;
use irgsh_core::artifact::SignatureVerifier;
use irgsh_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::command::CommandLine;

/// Verifies the signed source descriptions (`signed/*.dsc`) of a submission.
#[derive(Debug, Clone, Default)]
pub struct GpgVerifier {
    /// Keyring home; `None` uses the invoking user's default keyring.
    gnupg_home: Option<PathBuf>,
}

impl GpgVerifier {
    pub fn new(gnupg_home: Option<PathBuf>) -> Self {
        Self { gnupg_home }
    }

    async fn signed_descriptions(dir: &Path) -> Result<Vec<PathBuf>> {
        let signed = dir.join("signed");
        let mut entries = match tokio::fs::read_dir(&signed).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Internal(format!(
                    "failed to read {}: {}",
                    signed.display(),
                    e
                )));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("failed to read {}: {}", signed.display(), e)))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "dsc") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl SignatureVerifier for GpgVerifier {
    async fn verify_submission(&self, submission_dir: &Path) -> Result<()> {
        let files = Self::signed_descriptions(submission_dir).await?;
        if files.is_empty() {
            return Err(Error::Unauthorized(
                "submission carries no signed source description".to_string(),
            ));
        }

        for file in &files {
            let mut cmd = CommandLine::new("gpg")
                .arg("--batch")
                .arg("--verify")
                .arg(file)
                .current_dir(submission_dir);
            if let Some(home) = &self.gnupg_home {
                cmd = cmd.env("GNUPGHOME", home);
            }

            let output = cmd.output().await?;
            if !output.success {
                warn!(file = %file.display(), stderr = %output.stderr, "Signature verification failed");
                return Err(Error::Unauthorized(format!(
                    "signature verification failed for {}",
                    file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                )));
            }
        }

        info!(dir = %submission_dir.display(), files = files.len(), "Submission signature verified");
        Ok(())
    }

    async fn verify_token(&self, token: &Path) -> Result<()> {
        let mut cmd = CommandLine::new("gpg").arg("--batch").arg("--verify").arg(token);
        if let Some(home) = &self.gnupg_home {
            cmd = cmd.env("GNUPGHOME", home);
        }

        let output = cmd.output().await?;
        if !output.success {
            warn!(token = %token.display(), stderr = %output.stderr, "Upload token rejected");
            return Err(Error::Unauthorized("upload token signature is invalid".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("irgsh-gpg-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_missing_signed_dir_is_unauthorized() {
        let dir = scratch();
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let err = GpgVerifier::default().verify_submission(&dir).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_only_dsc_files_are_considered() {
        let dir = scratch();
        tokio::fs::create_dir_all(dir.join("signed")).await.unwrap();
        tokio::fs::write(dir.join("signed/foo.changes"), "x").await.unwrap();
        tokio::fs::write(dir.join("signed/foo_1.0.dsc"), "x").await.unwrap();

        let files = GpgVerifier::signed_descriptions(&dir).await.unwrap();
        assert_eq!(files, vec![dir.join("signed/foo_1.0.dsc")]);

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
