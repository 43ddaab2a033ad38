//! Local filesystem layout of submissions.

use async_trait::async_trait;
use irgsh_core::artifact::SubmissionStorage;
use irgsh_core::{Error, Result, TaskUuid};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::command::CommandLine;

/// Submissions under `<workdir>/submissions`.
///
/// With `privileged` set, copies and ownership changes go through `sudo`,
/// since artifacts may belong to the worker's service user.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    workdir: PathBuf,
    privileged: bool,
}

impl LocalStorage {
    pub fn new(workdir: impl Into<PathBuf>, privileged: bool) -> Self {
        Self {
            workdir: workdir.into(),
            privileged,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn submissions_dir(&self) -> PathBuf {
        self.workdir.join("submissions")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.workdir.join("artifacts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.workdir.join("logs")
    }

    pub fn tarball_path(&self, uuid: &TaskUuid) -> PathBuf {
        self.submissions_dir().join(format!("{}.tar.gz", uuid))
    }

    pub fn submission_dir(&self, uuid: &TaskUuid) -> PathBuf {
        self.submissions_dir().join(uuid.as_str())
    }

    pub fn signature_path(&self, uuid: &TaskUuid) -> PathBuf {
        self.submissions_dir().join(format!("{}.sig.txt", uuid))
    }

    fn upload_tarball(&self, upload_id: &str) -> PathBuf {
        self.submissions_dir().join(format!("{}.tar.gz", upload_id))
    }

    fn upload_token(&self, upload_id: &str) -> PathBuf {
        self.submissions_dir().join(format!("{}.token", upload_id))
    }

    /// Create the directories the chief writes into.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [self.submissions_dir(), self.artifacts_dir(), self.logs_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_error("create", &dir, e))?;
        }
        Ok(())
    }

    fn owner(&self) -> String {
        format!(
            "{}:{}",
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw()
        )
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Internal(format!("failed to {} {}: {}", action, path.display(), err))
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| io_error("stat", path, e))
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("remove", path, e)),
    }
}

#[async_trait]
impl SubmissionStorage for LocalStorage {
    async fn store_upload(&self, upload_id: &str, token: &[u8], blob: &[u8]) -> Result<PathBuf> {
        let dir = self.submissions_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create", &dir, e))?;

        let token_path = self.upload_token(upload_id);
        tokio::fs::write(&token_path, token)
            .await
            .map_err(|e| io_error("write", &token_path, e))?;

        let tarball = self.upload_tarball(upload_id);
        tokio::fs::write(&tarball, blob)
            .await
            .map_err(|e| io_error("write", &tarball, e))?;

        debug!(upload_id, bytes = blob.len(), "Upload stored");
        Ok(token_path)
    }

    async fn discard_upload(&self, upload_id: &str) -> Result<()> {
        remove_if_present(&self.upload_token(upload_id)).await?;
        remove_if_present(&self.upload_tarball(upload_id)).await
    }

    async fn admit_upload(&self, upload_id: &str, uuid: &TaskUuid) -> Result<PathBuf> {
        let upload = self.upload_tarball(upload_id);
        if !exists(&upload).await? {
            return Err(Error::NotFound(format!("uploaded bundle {}", upload_id)));
        }

        let dir = self.submission_dir(uuid);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create", &dir, e))?;

        let tarball = self.tarball_path(uuid);
        tokio::fs::rename(&upload, &tarball)
            .await
            .map_err(|e| io_error("move", &upload, e))?;

        CommandLine::new("tar")
            .arg("-xf")
            .arg(&tarball)
            .arg("-C")
            .arg(&dir)
            .run()
            .await?;

        let token = self.upload_token(upload_id);
        if exists(&token).await? {
            let signature = self.signature_path(uuid);
            tokio::fs::rename(&token, &signature)
                .await
                .map_err(|e| io_error("move", &token, e))?;
        } else {
            warn!(task_uuid = %uuid, upload_id, "Upload has no signature token");
        }

        info!(task_uuid = %uuid, upload_id, "Submission admitted to storage");
        Ok(dir)
    }

    async fn tarball_exists(&self, uuid: &TaskUuid) -> Result<bool> {
        exists(&self.tarball_path(uuid)).await
    }

    async fn copy_submission(&self, from: &TaskUuid, to: &TaskUuid) -> Result<()> {
        CommandLine::with_privilege("cp", self.privileged)
            .arg(self.tarball_path(from))
            .arg(self.tarball_path(to))
            .run()
            .await?;

        let source_dir = self.submission_dir(from);
        if exists(&source_dir).await? {
            CommandLine::with_privilege("cp", self.privileged)
                .arg("-r")
                .arg(&source_dir)
                .arg(self.submission_dir(to))
                .run()
                .await?;
        } else {
            debug!(task_uuid = %from, "No extracted submission to copy");
        }

        Ok(())
    }

    async fn reclaim_ownership(&self, uuid: &TaskUuid) -> Result<()> {
        if !self.privileged {
            return Ok(());
        }

        let owner = self.owner();
        CommandLine::with_privilege("chown", true)
            .arg(&owner)
            .arg(self.tarball_path(uuid))
            .run()
            .await?;

        let dir = self.submission_dir(uuid);
        if exists(&dir).await? {
            CommandLine::with_privilege("chown", true)
                .arg("-R")
                .arg(&owner)
                .arg(&dir)
                .run()
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("irgsh-storage-{}", uuid::Uuid::new_v4()))
    }

    /// An upload as the maintainer tool leaves it: a bundle with a
    /// `signed/` directory, plus its token.
    async fn upload(storage: &LocalStorage, upload_id: &str) {
        storage.ensure_layout().await.unwrap();
        let staging = storage.workdir().join("staging");
        tokio::fs::create_dir_all(staging.join("signed")).await.unwrap();
        tokio::fs::write(staging.join("signed/foo_1.0-1.dsc"), "dsc").await.unwrap();

        CommandLine::new("tar")
            .arg("-czf")
            .arg(storage.submissions_dir().join(format!("{}.tar.gz", upload_id)))
            .arg("-C")
            .arg(&staging)
            .arg(".")
            .run()
            .await
            .unwrap();
        tokio::fs::write(
            storage.submissions_dir().join(format!("{}.token", upload_id)),
            "token",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_admit_upload() {
        let root = scratch();
        let storage = LocalStorage::new(&root, false);
        upload(&storage, "up1").await;

        let uuid = TaskUuid::mint("DEADBEEF", "foo");
        let dir = storage.admit_upload("up1", &uuid).await.unwrap();

        assert_eq!(dir, storage.submission_dir(&uuid));
        assert!(dir.join("signed/foo_1.0-1.dsc").exists());
        assert!(storage.tarball_exists(&uuid).await.unwrap());
        assert!(storage.signature_path(&uuid).exists());
        assert!(!storage.submissions_dir().join("up1.tar.gz").exists());
        assert!(!storage.submissions_dir().join("up1.token").exists());

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_stored_upload_can_be_admitted() {
        let root = scratch();
        let source = LocalStorage::new(root.join("source"), false);
        upload(&source, "up1").await;
        let blob = tokio::fs::read(source.submissions_dir().join("up1.tar.gz")).await.unwrap();

        let storage = LocalStorage::new(root.join("chief"), false);
        let token = storage.store_upload("up2", b"token", &blob).await.unwrap();
        assert_eq!(token, storage.submissions_dir().join("up2.token"));

        let uuid = TaskUuid::mint("DEADBEEF", "foo");
        let dir = storage.admit_upload("up2", &uuid).await.unwrap();
        assert!(dir.join("signed/foo_1.0-1.dsc").exists());
        assert!(storage.signature_path(&uuid).exists());

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_upload() {
        let root = scratch();
        let storage = LocalStorage::new(&root, false);
        storage.store_upload("up1", b"token", b"blob").await.unwrap();

        storage.discard_upload("up1").await.unwrap();
        assert!(!storage.submissions_dir().join("up1.token").exists());
        assert!(!storage.submissions_dir().join("up1.tar.gz").exists());

        // Nothing left to remove is fine.
        storage.discard_upload("up1").await.unwrap();

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_admit_missing_upload() {
        let root = scratch();
        let storage = LocalStorage::new(&root, false);
        storage.ensure_layout().await.unwrap();

        let err = storage
            .admit_upload("nope", &TaskUuid::mint("DEADBEEF", "foo"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_submission_unprivileged() {
        let root = scratch();
        let storage = LocalStorage::new(&root, false);
        upload(&storage, "up1").await;
        let old = TaskUuid::mint("DEADBEEF", "foo");
        storage.admit_upload("up1", &old).await.unwrap();

        let new = TaskUuid::mint("DEADBEEF", "foo");
        assert!(!storage.tarball_exists(&new).await.unwrap());
        storage.copy_submission(&old, &new).await.unwrap();
        storage.reclaim_ownership(&new).await.unwrap();

        assert!(storage.tarball_exists(&new).await.unwrap());
        assert!(storage.tarball_exists(&old).await.unwrap());
        assert!(storage.submission_dir(&new).join("signed/foo_1.0-1.dsc").exists());

        tokio::fs::remove_dir_all(root).await.unwrap();
    }
}
