use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use super::upload::ImageKind;

/// Local directory holding uploaded images while their analysis runs.
pub struct ArtifactStore {
    root: PathBuf,
}

/// An uploaded image on disk, owned by exactly one job. Not `Clone`.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opaque reference recorded on the job row.
    pub fn reference(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Hands an artifact out for deletion at most once, whichever path asks first.
#[derive(Debug)]
pub struct ArtifactLease {
    path: PathBuf,
    artifact: Mutex<Option<Artifact>>,
}

impl ArtifactLease {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            path: artifact.path.clone(),
            artifact: Mutex::new(Some(artifact)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn take(&self) -> Option<Artifact> {
        // A poisoned lock still guards a valid Option.
        let mut slot = match self.artifact.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the upload directory if needed.
    pub async fn init(&self) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArtifactError::Io {
                path: self.root.clone(),
                source,
            })
    }

    /// Write image bytes to a fresh file. A failed write leaves nothing behind.
    pub async fn persist(&self, bytes: &[u8], kind: ImageKind) -> Result<Artifact, ArtifactError> {
        let path = self
            .root
            .join(format!("{}.{}", Uuid::new_v4(), kind.extension()));

        if let Err(e) = tokio::fs::write(&path, bytes).await {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!(artifact = %path.display(), error = %cleanup, "Failed to remove partial upload");
                }
            }
            return Err(ArtifactError::Io { path, source: e });
        }

        tracing::debug!(artifact = %path.display(), bytes = bytes.len(), "Persisted upload");
        Ok(Artifact { path })
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(path)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Delete an artifact. Consumes it so it cannot be deleted twice.
    pub async fn discard(&self, artifact: Artifact) {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => tracing::debug!(artifact = %artifact.path.display(), "Removed upload"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(artifact = %artifact.path.display(), "Upload already gone")
            }
            Err(e) => {
                tracing::error!(artifact = %artifact.path.display(), error = %e, "Failed to remove upload")
            }
        }
    }

    /// Discard the leased artifact if nobody has yet. Returns whether this call did it.
    pub async fn release(&self, lease: &ArtifactLease) -> bool {
        match lease.take() {
            Some(artifact) => {
                self.discard(artifact).await;
                true
            }
            None => false,
        }
    }

    /// Health probe: the upload directory exists and is a directory.
    pub async fn check(&self) -> Result<(), ArtifactError> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|source| ArtifactError::Io {
                path: self.root.clone(),
                source,
            })?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(ArtifactError::NotADirectory(self.root.clone()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Upload storage I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload directory {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_and_release_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let artifact = store.persist(b"bytes", ImageKind::Png).await.unwrap();
        assert!(artifact.reference().ends_with(".png"));
        assert!(artifact.path().exists());

        let lease = ArtifactLease::new(artifact);
        assert_eq!(store.read(lease.path()).await.unwrap(), b"bytes");

        assert!(store.release(&lease).await);
        assert!(!lease.path().exists());
        assert!(!store.release(&lease).await);
    }

    #[tokio::test]
    async fn test_persist_into_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("missing"));

        let err = store.persist(b"bytes", ImageKind::Jpeg).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
        assert!(store.check().await.is_err());
    }

    #[tokio::test]
    async fn test_init_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("uploads"));
        store.init().await.unwrap();
        assert!(store.check().await.is_ok());
    }
}
