use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use wc_handoff_core::{DurabilityPort, PortError};

const MARKER_FILE: &str = ".persist";

/// Keeps local state under a directory and flushes it to disk on request.
#[derive(Debug, Clone)]
pub struct FsDurability {
    dir: PathBuf,
}

impl FsDurability {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DurabilityPort for FsDurability {
    async fn request_persistence(&self) -> Result<bool, PortError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PortError::Transport(format!("create state dir failed: {e}")))?;
        let marker = self.dir.join(MARKER_FILE);
        let mut file = tokio::fs::File::create(&marker)
            .await
            .map_err(|e| PortError::Transport(format!("open persistence marker failed: {e}")))?;
        file.write_all(b"persisted\n")
            .await
            .map_err(|e| PortError::Transport(format!("write persistence marker failed: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| PortError::Transport(format!("sync state dir failed: {e}")))?;
        debug!(dir = %self.dir.display(), "local state flushed");
        Ok(true)
    }
}

/// For hosts without durable local storage; every request is declined.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDurability;

#[async_trait]
impl DurabilityPort for NoDurability {
    async fn request_persistence(&self) -> Result<bool, PortError> {
        Ok(false)
    }
}
