//! Checkpoint tracking and persistence.
//!
//! The checkpoint is the highest event timestamp known to be delivered. It is
//! read once when a run starts, advanced in memory as batches are confirmed,
//! and written at most once when the run ends.

pub mod store;

pub use store::{FileCheckpointStore, MemoryCheckpointStore};

use crate::domain::Timestamp;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Checkpoint at {0} is empty")]
    Empty(PathBuf),
    #[error("Checkpoint at {0} still holds a placeholder value")]
    Placeholder(PathBuf),
    #[error("Checkpoint value '{value}' is not a timestamp")]
    InvalidValue { value: String },
}

/// Backing store for the persisted checkpoint.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn read_checkpoint(&self) -> Result<Timestamp, CheckpointError>;
    async fn write_checkpoint(&self, checkpoint: Timestamp) -> Result<(), CheckpointError>;
}

/// Tracks the delivered watermark for one run.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    start: Timestamp,
    watermark: Option<Timestamp>,
    lowest_undelivered: Option<Timestamp>,
}

impl CheckpointManager {
    pub fn new(start: Timestamp) -> Self {
        Self {
            start,
            watermark: None,
            lowest_undelivered: None,
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Highest max-timestamp among confirmed batches, if any.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    pub fn lowest_undelivered(&self) -> Option<Timestamp> {
        self.lowest_undelivered
    }

    /// Merge a confirmed batch's max timestamp. Never moves backwards.
    pub fn advance(&mut self, delivered_max: Timestamp) {
        let next = self.watermark.map_or(delivered_max, |w| w.max(delivered_max));
        if Some(next) != self.watermark {
            debug!(watermark = next, "Advanced delivered watermark");
        }
        self.watermark = Some(next);
    }

    /// Note a record that will not be delivered in this run.
    ///
    /// The checkpoint is then held below it so the next run fetches it again.
    pub fn hold_back(&mut self, undelivered: Timestamp) {
        self.lowest_undelivered = Some(
            self.lowest_undelivered
                .map_or(undelivered, |low| low.min(undelivered)),
        );
    }

    /// The value to persist, or `None` when the checkpoint should stay put.
    pub fn resolve(&self) -> Option<Timestamp> {
        let mut candidate = self.watermark?;
        if let Some(low) = self.lowest_undelivered {
            candidate = candidate.min(low.saturating_sub(1));
        }
        (candidate > self.start).then_some(candidate)
    }

    /// Persist the resolved checkpoint and return the value now in effect.
    pub async fn commit(&self, store: &dyn CheckpointStore) -> Result<Timestamp, CheckpointError> {
        match self.resolve() {
            Some(next) => {
                store.write_checkpoint(next).await?;
                info!(previous = self.start, checkpoint = next, "Checkpoint advanced");
                Ok(next)
            }
            None => {
                info!(checkpoint = self.start, "Checkpoint unchanged");
                Ok(self.start)
            }
        }
    }
}
