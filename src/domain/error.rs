use crate::checkpoint::CheckpointError;
use crate::source::SourceError;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a forwarding run.
///
/// Only run-fatal conditions live here. Oversized records and failed batch
/// deliveries are recovered inside the pipeline and reported in the run summary.
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] SourceError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}
