//! Request-scoped scratch files.
//!
//! Every artifact is owned by an [`ArtifactHandle`]. The backing file is removed
//! exactly once: either by an explicit [`ArtifactHandle::release`], or when the
//! last reference to the artifact goes away. Staging I/O and explicit releases
//! run on the blocking pool and hold their own reference, so a request that is
//! cancelled mid-write still leaves nothing behind once that write has
//! finished. Only the drop path removes the file inline.

use crate::error::ArtifactError;
use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use tokio::fs::File;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    Input,
    Output,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Input => "input",
            ArtifactRole::Output => "output",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ArtifactRole::Input => "upload",
            ArtifactRole::Output => "png",
        }
    }

    fn owns_file_name(name: &str) -> bool {
        [ArtifactRole::Input, ArtifactRole::Output]
            .iter()
            .any(|role| name.starts_with(&format!("{}-", role.as_str())))
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactManager {
    scratch_dir: PathBuf,
}

impl ArtifactManager {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Reserves a fresh, unpredictable path. The file itself is created by the
    /// first write.
    pub async fn acquire(&self, role: ArtifactRole) -> Result<ArtifactHandle, ArtifactError> {
        self.ensure_scratch_dir().await?;

        let id = Uuid::new_v4();
        let path = self.scratch_dir.join(format!(
            "{}-{}.{}",
            role.as_str(),
            id.simple(),
            role.extension()
        ));
        debug!(artifact = %id, role = role.as_str(), "Acquired artifact slot");

        Ok(ArtifactHandle {
            slot: Arc::new(ArtifactSlot {
                id,
                role,
                path,
                released: Mutex::new(false),
            }),
        })
    }

    /// Removes artifacts left behind by an earlier process. Returns how many
    /// files were deleted.
    pub async fn purge_stale(&self) -> Result<usize, ArtifactError> {
        self.ensure_scratch_dir().await?;

        let scratch_error = |e| ArtifactError::ScratchDir(e, self.scratch_dir.clone());
        let mut entries = tokio::fs::read_dir(&self.scratch_dir)
            .await
            .map_err(scratch_error)?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(scratch_error)? {
            let name = entry.file_name();
            if !ArtifactRole::owns_file_name(&name.to_string_lossy()) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to purge stale artifact {:?}: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            debug!("Purged {} stale artifact(s) from {:?}", removed, self.scratch_dir);
        }
        Ok(removed)
    }

    async fn ensure_scratch_dir(&self) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| ArtifactError::ScratchDir(e, self.scratch_dir.clone()))
    }
}

#[derive(Debug)]
struct ArtifactSlot {
    id: Uuid,
    role: ArtifactRole,
    path: PathBuf,
    // Held across writes so a release can never interleave with one.
    released: Mutex<bool>,
}

impl ArtifactSlot {
    fn write(&self, bytes: &[u8]) -> Result<(), ArtifactError> {
        let released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        if *released {
            return Err(ArtifactError::Released(self.path.clone()));
        }
        std::fs::write(&self.path, bytes).map_err(|e| ArtifactError::Write(e, self.path.clone()))
    }

    fn read(&self) -> Result<Vec<u8>, ArtifactError> {
        let released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        if *released {
            return Err(ArtifactError::Released(self.path.clone()));
        }
        std::fs::read(&self.path).map_err(|e| ArtifactError::Read(e, self.path.clone()))
    }

    fn is_released(&self) -> bool {
        *self.released.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self) {
        let mut released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        if *released {
            return;
        }
        *released = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(artifact = %self.id, role = self.role.as_str(), "Released artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                artifact = %self.id,
                "Failed to remove artifact {:?}: {}",
                self.path,
                e
            ),
        }
    }
}

impl Drop for ArtifactSlot {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owner of one scratch file.
#[derive(Debug)]
pub struct ArtifactHandle {
    slot: Arc<ArtifactSlot>,
}

impl ArtifactHandle {
    pub fn id(&self) -> Uuid {
        self.slot.id
    }

    pub fn role(&self) -> ArtifactRole {
        self.slot.role
    }

    pub fn path(&self) -> &Path {
        &self.slot.path
    }

    pub fn is_released(&self) -> bool {
        self.slot.is_released()
    }

    pub async fn write(&self, bytes: Bytes) -> Result<(), ArtifactError> {
        let slot = Arc::clone(&self.slot);
        tokio::task::spawn_blocking(move || slot.write(&bytes))
            .await
            .map_err(|e| ArtifactError::Task(e.to_string()))?
    }

    pub async fn read(&self) -> Result<Vec<u8>, ArtifactError> {
        let slot = Arc::clone(&self.slot);
        tokio::task::spawn_blocking(move || slot.read())
            .await
            .map_err(|e| ArtifactError::Task(e.to_string()))?
    }

    /// Deletes the backing file. Safe to call any number of times, and on
    /// artifacts that were never written.
    pub async fn release(&self) {
        if self.is_released() {
            return;
        }
        if let Err(e) = self.spawn_release().await {
            warn!(artifact = %self.id(), "Artifact release task failed: {}", e);
        }
    }

    fn spawn_release(&self) -> JoinHandle<()> {
        let slot = Arc::clone(&self.slot);
        tokio::task::spawn_blocking(move || slot.release())
    }

    /// Streams the file contents; the artifact is released once the stream
    /// ends or is dropped.
    pub async fn into_stream(self) -> Result<ArtifactStream, ArtifactError> {
        if self.is_released() {
            return Err(ArtifactError::Released(self.slot.path.clone()));
        }
        let file = File::open(self.path())
            .await
            .map_err(|e| ArtifactError::Read(e, self.slot.path.clone()))?;
        Ok(ArtifactStream {
            reader: Some(ReaderStream::new(file)),
            releasing: None,
            artifact: self,
        })
    }
}

pub struct ArtifactStream {
    reader: Option<ReaderStream<File>>,
    // Set once the body is exhausted; the stream ends when the file is gone.
    releasing: Option<JoinHandle<()>>,
    artifact: ArtifactHandle,
}

impl ArtifactStream {
    pub fn artifact_id(&self) -> Uuid {
        self.artifact.id()
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(task) = self.releasing.as_mut() {
                let outcome = ready!(Pin::new(task).poll(cx));
                self.releasing = None;
                match outcome {
                    Ok(()) => debug!(artifact = %self.artifact.id(), "Artifact delivered"),
                    Err(e) => warn!(
                        artifact = %self.artifact.id(),
                        "Artifact release task failed: {}",
                        e
                    ),
                }
                return Poll::Ready(None);
            }

            let Some(reader) = self.reader.as_mut() else {
                return Poll::Ready(None);
            };
            match Pin::new(reader).poll_next(cx) {
                Poll::Ready(None) => {
                    self.reader = None;
                    let task = self.artifact.spawn_release();
                    self.releasing = Some(task);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn acquire_creates_scratch_dir_but_not_the_file() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path().join("scratch"));

        let handle = manager.acquire(ArtifactRole::Input).await.unwrap();
        assert!(manager.scratch_dir().is_dir());
        assert!(!handle.path().exists());
        assert!(handle
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("input-"));
    }

    #[tokio::test]
    async fn concurrent_acquisitions_never_collide() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let mut paths = std::collections::HashSet::new();
        for _ in 0..64 {
            let handle = manager.acquire(ArtifactRole::Output).await.unwrap();
            assert!(paths.insert(handle.path().to_path_buf()));
        }
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Input).await.unwrap();
        handle.write(Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(entries(root.path()), 1);

        handle.release().await;
        handle.release().await;
        assert!(handle.is_released());
        assert_eq!(entries(root.path()), 0);
        drop(handle);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn abandoned_release_still_removes_the_file() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Output).await.unwrap();
        handle.write(Bytes::from_static(b"payload")).await.unwrap();

        // The removal runs on the blocking pool, not inside the awaiting task.
        let _ = tokio::time::timeout(std::time::Duration::ZERO, handle.release()).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(handle.is_released());
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn releasing_an_unwritten_artifact_is_a_no_op() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Output).await.unwrap();
        handle.release().await;
        assert!(handle.is_released());
    }

    #[tokio::test]
    async fn dropping_the_handle_removes_the_file() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Input).await.unwrap();
        handle.write(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(handle.read().await.unwrap(), b"abc");
        drop(handle);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn writes_after_release_are_refused() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Input).await.unwrap();
        handle.release().await;
        let result = handle.write(Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(ArtifactError::Released(_))));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn fully_consumed_stream_releases_before_drop() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Output).await.unwrap();
        handle.write(Bytes::from(vec![7u8; 100_000])).await.unwrap();

        let mut stream = handle.into_stream().await.unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received.len(), 100_000);
        assert_eq!(entries(root.path()), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn abandoned_stream_releases_on_drop() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path());

        let handle = manager.acquire(ArtifactRole::Output).await.unwrap();
        handle.write(Bytes::from(vec![1u8; 200_000])).await.unwrap();

        let mut stream = handle.into_stream().await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(entries(root.path()), 1);
        drop(stream);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn purge_removes_only_artifacts() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("input-deadbeef.upload"), b"x").unwrap();
        std::fs::write(root.path().join("output-deadbeef.png"), b"x").unwrap();
        std::fs::write(root.path().join("keep.txt"), b"x").unwrap();

        let manager = ArtifactManager::new(root.path());
        assert_eq!(manager.purge_stale().await.unwrap(), 2);
        assert_eq!(entries(root.path()), 1);
        assert!(root.path().join("keep.txt").exists());
    }
}
