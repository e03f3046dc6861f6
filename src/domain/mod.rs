//! Domain layer for event-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `EventRecord`: one enriched warehouse row plus its event timestamp
//! - `FieldMapping`: which row fields feed the tracking envelope
//! - `ForwarderError`: Top-level error type for a run

pub mod error;
pub mod event_record;

pub use error::ForwarderError;
pub use event_record::{EventRecord, FieldMapping, RecordError, Timestamp, TrackEvent};
