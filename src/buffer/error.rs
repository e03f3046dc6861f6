use crate::domain::{RecordError, Timestamp};
use thiserror::Error;

/// Errors raised while assembling batches.
///
/// Record-level variants are recoverable: the record is skipped and counted,
/// and assembly continues with the next one.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error(
        "Record at timestamp {timestamp} is {size} bytes, over the {limit} byte limit"
    )]
    OversizedRecord {
        size: usize,
        limit: usize,
        timestamp: Timestamp,
    },

    #[error("Record at timestamp {timestamp} could not be serialized: {source}")]
    UnserializableRecord {
        timestamp: Timestamp,
        #[source]
        source: RecordError,
    },

    #[error("Invalid batch limits: {0}")]
    InvalidLimits(String),
}

impl BufferError {
    /// Whether the error only concerns a single record.
    pub fn is_record_rejection(&self) -> bool {
        matches!(
            self,
            BufferError::OversizedRecord { .. } | BufferError::UnserializableRecord { .. }
        )
    }
}
