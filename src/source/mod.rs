//! Upstream record sources.
//!
//! A source yields the rows created after a checkpoint as a lazy stream. The
//! pipeline consumes that stream exactly once, in order.

pub mod warehouse;

pub use warehouse::{WarehouseConfig, WarehouseSource};

use crate::domain::{EventRecord, RecordError, Timestamp};
use futures::stream::BoxStream;
use thiserror::Error;

pub type RecordStream<'a> = BoxStream<'a, Result<EventRecord, SourceError>>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid source configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Warehouse returned HTTP {status}: {message}")]
    HttpError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] RecordError),
}

/// Produces the event records newer than a checkpoint.
pub trait RecordSource: Send + Sync {
    /// Stream up to `row_limit` records whose timestamp is after `since`.
    fn fetch_records(&self, since: Timestamp, row_limit: usize) -> RecordStream<'_>;
}
