//! Durable cursor storage.
//!
//! The committed position is written to a small JSON file with a
//! write-then-rename, so a crash leaves either the old or the new
//! position on disk, never a torn one.

use chrono::{DateTime, Utc};
use pipeline_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    position: i64,
    committed_at: DateTime<Utc>,
}

/// File-backed cursor checkpoint.
#[derive(Debug, Clone)]
pub struct OffsetCheckpoint {
    path: PathBuf,
}

impl OffsetCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the committed position, or `None` if nothing was ever committed.
    pub async fn load(&self) -> Result<Option<i64>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let file: CheckpointFile = serde_json::from_slice(&bytes)?;
                Ok(Some(file.position))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::queue(format!(
                "Failed to read checkpoint {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Persist `position` as the committed cursor.
    pub async fn store(&self, position: i64) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec(&CheckpointFile {
            position,
            committed_at: Utc::now(),
        })?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body).await.map_err(|e| {
            Error::queue(format!("Failed to write checkpoint {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::queue(format!(
                "Failed to move checkpoint into {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), position, "Checkpoint stored");
        Ok(())
    }
}
