//! Batch assembly: size estimation and byte-bounded batching of event records.

pub mod batch;
pub mod error;
pub mod estimator;

pub use batch::{
    BATCH_ENVELOPE_OVERHEAD, Batch, BatchAssembler, BatchLimits, SealedBatch,
};
pub use error::BufferError;
pub use estimator::SizeEstimator;
