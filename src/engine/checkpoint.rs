// ABOUTME: Persisted checkpoint store contract and the JSON-lines file implementation
// ABOUTME: Loads prior successful results at startup and appends new ones durably

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::CheckpointError;

/// One persisted memoization entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub hashsum: String,
    pub value: Value,
}

/// Durable store for checkpointable task results.
///
/// The store is append-only; eviction, compaction, and capacity are outside
/// the engine's scope. The durability contract is: if `append` returns Ok,
/// the entry survives a process restart.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load all persisted entries, earliest first.
    async fn load(&self) -> Result<Vec<CheckpointEntry>, CheckpointError>;

    /// Durably append one entry.
    async fn append(&self, entry: &CheckpointEntry) -> Result<(), CheckpointError>;
}

/// Append-only JSON-lines file store.
///
/// Each line is one serialized [`CheckpointEntry`]. Malformed lines found at
/// load time are skipped with a warning rather than failing the whole load,
/// since a torn final line after a crash is expected.
pub struct FileCheckpointStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint file, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CheckpointError::Io(e)),
        };

        let mut entries = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        error = %e,
                        "skipping malformed checkpoint line"
                    );
                }
            }
        }
        debug!(
            path = %self.path.display(),
            count = entries.len(),
            "loaded checkpoint entries"
        );
        Ok(entries)
    }

    async fn append(&self, entry: &CheckpointEntry) -> Result<(), CheckpointError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        // Serialize writers so concurrent appends never interleave lines.
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}
