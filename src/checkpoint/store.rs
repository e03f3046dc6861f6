use super::{CheckpointError, CheckpointStore};
use crate::domain::Timestamp;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Value left behind by provisioning before a real checkpoint was ever written.
const PLACEHOLDER_VALUE: &str = "<default_value>";

/// Checkpoint kept as a decimal timestamp in a text file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
    initial: Timestamp,
}

impl FileCheckpointStore {
    /// `initial` is returned until the first checkpoint is written.
    pub fn new(path: impl Into<PathBuf>, initial: Timestamp) -> Self {
        Self {
            path: path.into(),
            initial,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read_checkpoint(&self) -> Result<Timestamp, CheckpointError> {
        info!("Reading checkpoint from {}...", self.path.display());

        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    initial = self.initial,
                    "No checkpoint file yet, starting from initial checkpoint"
                );
                return Ok(self.initial);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let value = content.trim();
        if value.is_empty() {
            return Err(CheckpointError::Empty(self.path.clone()));
        }
        if value == PLACEHOLDER_VALUE {
            return Err(CheckpointError::Placeholder(self.path.clone()));
        }

        value.parse().map_err(|_| CheckpointError::InvalidValue {
            value: value.to_string(),
        })
    }

    async fn write_checkpoint(&self, checkpoint: Timestamp) -> Result<(), CheckpointError> {
        info!("Writing checkpoint {} to {}...", checkpoint, self.path.display());

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        // Write-then-rename so a crash never leaves a truncated checkpoint.
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, format!("{checkpoint}\n"))
            .await
            .map_err(|e| self.io_error(e))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(checkpoint, "Checkpoint persisted");
        Ok(())
    }
}

/// In-process checkpoint store. Keeps a log of every write.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    current: Mutex<Timestamp>,
    writes: Mutex<Vec<Timestamp>>,
}

impl MemoryCheckpointStore {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            current: Mutex::new(initial),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Timestamp {
        *self.current.lock()
    }

    pub fn writes(&self) -> Vec<Timestamp> {
        self.writes.lock().clone()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn read_checkpoint(&self) -> Result<Timestamp, CheckpointError> {
        Ok(self.current())
    }

    async fn write_checkpoint(&self, checkpoint: Timestamp) -> Result<(), CheckpointError> {
        *self.current.lock() = checkpoint;
        self.writes.lock().push(checkpoint);
        Ok(())
    }
}
