//! Flat on-disk artifact repository.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::harvest::{ArtifactStore, ArtifactStream, HarvestError};

const PARTIAL_SUFFIX: &str = ".partial";

/// Stores each artifact as `root/<id>`.
///
/// Downloads are streamed into `<id>.partial` and renamed into place once
/// complete, so `exists` never sees a half-written file.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the repository directory if it does not exist.
    pub async fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Resolves `id` to a file directly inside the repository root.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::InvalidArtifactId`] if `id` is empty, absolute,
    /// contains a path separator or would otherwise escape the root.
    pub fn artifact_path(&self, id: &str) -> Result<PathBuf, HarvestError> {
        let invalid = || HarvestError::InvalidArtifactId(id.to_string());

        if id.is_empty() || id.contains('/') || id.contains('\\') {
            return Err(invalid());
        }

        let relative = Path::new(id);
        if relative.is_absolute() {
            return Err(invalid());
        }

        // Exactly one normal component: rejects ".", ".." and drive prefixes
        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(relative)),
            _ => Err(invalid()),
        }
    }

    fn partial_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    async fn write_stream(path: &Path, mut stream: ArtifactStream) -> Result<u64, HarvestError> {
        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ArtifactStore for FlatFileStore {
    fn validate_id(&self, id: &str) -> Result<(), HarvestError> {
        self.artifact_path(id).map(|_| ())
    }

    async fn exists(&self, id: &str) -> bool {
        match self.artifact_path(id) {
            Ok(path) => fs::metadata(&path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn persist(&self, id: &str, stream: ArtifactStream) -> Result<(), HarvestError> {
        let path = self.artifact_path(id)?;
        let partial = Self::partial_path(&path);

        match Self::write_stream(&partial, stream).await {
            Ok(bytes) => {
                fs::rename(&partial, &path).await?;
                debug!(artifact = %id, bytes, path = %path.display(), "Artifact written");
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    debug!(artifact = %id, error = %cleanup, "Could not remove partial file");
                }
                Err(e)
            }
        }
    }
}
