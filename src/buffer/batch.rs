use super::error::BufferError;
use super::estimator::SizeEstimator;
use crate::domain::{EventRecord, FieldMapping, Timestamp};
use bytes::Bytes;
use uuid::Uuid;

const BATCH_ENVELOPE_PREFIX: &[u8] = br#"{"batch":["#;
const BATCH_ENVELOPE_SUFFIX: &[u8] = b"]}";

/// Bytes of `{"batch":[` + `]}` surrounding the records of every batch body.
pub const BATCH_ENVELOPE_OVERHEAD: usize =
    BATCH_ENVELOPE_PREFIX.len() + BATCH_ENVELOPE_SUFFIX.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Ceiling for a whole request body, framing included.
    pub max_batch_bytes: usize,
    /// Ceiling for one serialized record.
    pub max_record_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_bytes: 500 * 1024, // 500KB
            max_record_bytes: 32 * 1024, // 32KB
        }
    }
}

impl BatchLimits {
    /// A record at the per-record ceiling must always fit in an empty batch.
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.max_record_bytes == 0 {
            return Err(BufferError::InvalidLimits(
                "Record byte limit must be greater than 0".to_string(),
            ));
        }

        let required = self.max_record_bytes.saturating_add(BATCH_ENVELOPE_OVERHEAD);
        if required > self.max_batch_bytes {
            return Err(BufferError::InvalidLimits(format!(
                "Record limit ({}) plus batch framing ({}) exceeds batch limit ({})",
                self.max_record_bytes, BATCH_ENVELOPE_OVERHEAD, self.max_batch_bytes
            )));
        }

        Ok(())
    }
}

/// An open batch, still accepting records.
///
/// The request body is built incrementally so that `byte_size` is always the
/// exact length the body will have once sealed.
#[derive(Debug)]
pub struct Batch {
    records: Vec<EventRecord>,
    body: Vec<u8>,
    min_timestamp: Option<Timestamp>,
    max_timestamp: Option<Timestamp>,
}

impl Batch {
    pub fn with_capacity(records: usize, bytes: usize) -> Self {
        let mut body = Vec::with_capacity(bytes);
        body.extend_from_slice(BATCH_ENVELOPE_PREFIX);

        Self {
            records: Vec::with_capacity(records),
            body,
            min_timestamp: None,
            max_timestamp: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.body.len() + BATCH_ENVELOPE_SUFFIX.len()
    }

    /// Body length after appending a record of `encoded_len` bytes.
    pub fn size_with(&self, encoded_len: usize) -> usize {
        let separator = usize::from(!self.is_empty());
        self.byte_size() + separator + encoded_len
    }

    pub fn min_timestamp(&self) -> Option<Timestamp> {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> Option<Timestamp> {
        self.max_timestamp
    }

    fn push(&mut self, record: EventRecord, encoded: &[u8]) {
        if !self.is_empty() {
            self.body.push(b',');
        }
        self.body.extend_from_slice(encoded);

        let ts = record.timestamp();
        self.min_timestamp = Some(self.min_timestamp.map_or(ts, |m| m.min(ts)));
        self.max_timestamp = Some(self.max_timestamp.map_or(ts, |m| m.max(ts)));
        self.records.push(record);
    }

    fn seal(mut self) -> Option<SealedBatch> {
        let (min_timestamp, max_timestamp) = (self.min_timestamp?, self.max_timestamp?);
        self.body.extend_from_slice(BATCH_ENVELOPE_SUFFIX);

        Some(SealedBatch {
            id: Uuid::new_v4().to_string(),
            records: self.records,
            payload: Bytes::from(self.body),
            min_timestamp,
            max_timestamp,
        })
    }
}

/// A finished batch. Immutable; delivery only reads its payload.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    id: String,
    records: Vec<EventRecord>,
    payload: Bytes,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
}

impl SealedBatch {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn byte_size(&self) -> usize {
        self.payload.len()
    }

    /// The serialized request body. Cloning `Bytes` does not copy.
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    pub fn min_timestamp(&self) -> Timestamp {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> Timestamp {
        self.max_timestamp
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }
}

/// Streaming batch builder.
///
/// Records are appended in arrival order; a batch is sealed as soon as the
/// next record would push it past the byte ceiling or the current
/// records-per-batch target.
pub struct BatchAssembler {
    limits: BatchLimits,
    mapping: FieldMapping,
    estimator: SizeEstimator,
    target_records: usize,
    current: Batch,
}

impl BatchAssembler {
    pub fn new(
        limits: BatchLimits,
        mapping: FieldMapping,
        initial_target: usize,
    ) -> Result<Self, BufferError> {
        limits.validate()?;
        let target_records = initial_target.max(1);

        Ok(Self {
            limits,
            mapping,
            estimator: SizeEstimator::new(limits),
            target_records,
            current: Self::open_batch(target_records, limits),
        })
    }

    pub fn target_records(&self) -> usize {
        self.target_records
    }

    pub fn pending(&self) -> &Batch {
        &self.current
    }

    /// Add a record, returning the batch it displaced if one was sealed.
    ///
    /// A rejected record is dropped and leaves the open batch untouched.
    pub fn push(&mut self, record: EventRecord) -> Result<Option<SealedBatch>, BufferError> {
        let encoded = record.encode(&self.mapping).map_err(|source| {
            BufferError::UnserializableRecord {
                timestamp: record.timestamp(),
                source,
            }
        })?;

        let empty_size = BATCH_ENVELOPE_OVERHEAD + encoded.len();
        if encoded.len() > self.limits.max_record_bytes || empty_size > self.limits.max_batch_bytes
        {
            return Err(BufferError::OversizedRecord {
                size: encoded.len(),
                limit: self.limits.max_record_bytes,
                timestamp: record.timestamp(),
            });
        }

        let sealed = if !self.current.is_empty()
            && (self.current.size_with(encoded.len()) > self.limits.max_batch_bytes
                || self.current.len() >= self.target_records)
        {
            self.rotate()
        } else {
            None
        };

        self.estimator.observe(encoded.len());
        self.current.push(record, &encoded);
        Ok(sealed)
    }

    /// Seal whatever is left at end of input.
    pub fn finish(self) -> Option<SealedBatch> {
        self.current.seal()
    }

    fn rotate(&mut self) -> Option<SealedBatch> {
        self.target_records = self.estimator.records_per_batch();
        let next = Self::open_batch(self.target_records, self.limits);
        std::mem::replace(&mut self.current, next).seal()
    }

    fn open_batch(target_records: usize, limits: BatchLimits) -> Batch {
        // Cap the up-front allocation; the estimate can be large for tiny records.
        Batch::with_capacity(target_records.min(4096), limits.max_batch_bytes.min(1024 * 1024))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    /// A record whose encoded track event is exactly `size` bytes.
    fn record_of_size(ts: Timestamp, size: usize) -> EventRecord {
        let mut fields = Map::new();
        fields.insert("pad".to_string(), Value::String(String::new()));
        let base = EventRecord::new(fields.clone(), ts)
            .encode(&FieldMapping::default())
            .unwrap()
            .len();
        assert!(size >= base, "size {size} below minimum {base}");
        fields.insert("pad".to_string(), Value::String("x".repeat(size - base)));
        let record = EventRecord::new(fields, ts);
        assert_eq!(record.encode(&FieldMapping::default()).unwrap().len(), size);
        record
    }

    fn assembler(max_batch: usize, max_record: usize) -> BatchAssembler {
        BatchAssembler::new(
            BatchLimits {
                max_batch_bytes: max_batch,
                max_record_bytes: max_record,
            },
            FieldMapping::default(),
            usize::MAX,
        )
        .unwrap()
    }

    #[test]
    fn test_limits_validation() {
        assert!(BatchLimits::default().validate().is_ok());

        let inverted = BatchLimits {
            max_batch_bytes: 1024,
            max_record_bytes: 2048,
        };
        assert!(matches!(inverted.validate(), Err(BufferError::InvalidLimits(_))));

        let no_room_for_framing = BatchLimits {
            max_batch_bytes: 1024,
            max_record_bytes: 1024,
        };
        assert!(no_room_for_framing.validate().is_err());
    }

    #[test]
    fn test_records_share_a_batch_until_bytes_run_out() {
        let mut assembler = assembler(12 + 3 * 200 + 2, 300);

        assert!(assembler.push(record_of_size(1, 200)).unwrap().is_none());
        assert!(assembler.push(record_of_size(2, 200)).unwrap().is_none());
        assert!(assembler.push(record_of_size(3, 200)).unwrap().is_none());
        assert_eq!(assembler.pending().byte_size(), 12 + 3 * 200 + 2);

        let sealed = assembler.push(record_of_size(4, 200)).unwrap().unwrap();
        assert_eq!(sealed.record_count(), 3);
        assert_eq!(sealed.byte_size(), 12 + 3 * 200 + 2);
        assert_eq!(sealed.max_timestamp(), 3);

        let last = assembler.finish().unwrap();
        assert_eq!(last.record_count(), 1);
        assert_eq!(last.min_timestamp(), 4);
    }

    #[test]
    fn test_payload_is_the_exact_batch_body() {
        let mut assembler = assembler(10_000, 1_000);
        assembler.push(record_of_size(5, 150)).unwrap();
        assembler.push(record_of_size(9, 160)).unwrap();
        let sealed = assembler.finish().unwrap();

        let payload = sealed.payload();
        assert_eq!(payload.len(), sealed.byte_size());

        let body: Value = serde_json::from_slice(&payload).unwrap();
        let events = body["batch"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "track");
        assert_eq!(events[1]["timestamp"], "1970-01-01T00:00:09Z");
    }

    #[test]
    fn test_oversized_record_is_rejected_and_batch_untouched() {
        let mut assembler = assembler(10_000, 500);
        assembler.push(record_of_size(1, 200)).unwrap();

        let err = assembler.push(record_of_size(99, 600)).unwrap_err();
        match err {
            BufferError::OversizedRecord {
                size,
                limit,
                timestamp,
            } => {
                assert_eq!(size, 600);
                assert_eq!(limit, 500);
                assert_eq!(timestamp, 99);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(
            assembler
                .push(record_of_size(98, 501))
                .unwrap_err()
                .is_record_rejection()
        );

        let sealed = assembler.finish().unwrap();
        assert_eq!(sealed.record_count(), 1);
        assert_eq!(sealed.max_timestamp(), 1);
    }

    #[test]
    fn test_record_target_seals_early() {
        let mut assembler = BatchAssembler::new(
            BatchLimits::default(),
            FieldMapping::default(),
            2,
        )
        .unwrap();

        assert!(assembler.push(record_of_size(1, 200)).unwrap().is_none());
        assert!(assembler.push(record_of_size(2, 200)).unwrap().is_none());
        let sealed = assembler.push(record_of_size(3, 200)).unwrap().unwrap();
        assert_eq!(sealed.record_count(), 2);
    }

    #[test]
    fn test_target_adapts_to_observed_sizes() {
        let mut assembler = BatchAssembler::new(
            BatchLimits {
                max_batch_bytes: 10_000,
                max_record_bytes: 1_000,
            },
            FieldMapping::default(),
            1,
        )
        .unwrap();

        assembler.push(record_of_size(1, 200)).unwrap();
        let sealed = assembler.push(record_of_size(2, 200)).unwrap();
        assert!(sealed.is_some());
        // 10_000 / mean(200) after the first observed record
        assert_eq!(assembler.target_records(), 50);
    }

    #[test]
    fn test_empty_input_yields_no_batch() {
        assert!(assembler(1_000, 100).finish().is_none());
    }

    #[test]
    fn test_order_and_bounds_hold_for_mixed_sizes() {
        let limits = BatchLimits {
            max_batch_bytes: 2_048,
            max_record_bytes: 700,
        };
        let mut assembler = BatchAssembler::new(limits, FieldMapping::default(), 3).unwrap();

        let sizes = [150, 650, 120, 800, 300, 699, 700, 195, 1_500, 410, 410, 410, 410, 200];
        let mut expected = Vec::new();
        let mut batches = Vec::new();
        let mut skipped = 0;

        for (i, size) in sizes.iter().enumerate() {
            let record = record_of_size(i as Timestamp, *size);
            if *size <= limits.max_record_bytes {
                expected.push(record.clone());
            }
            match assembler.push(record) {
                Ok(Some(batch)) => batches.push(batch),
                Ok(None) => {}
                Err(_) => skipped += 1,
            }
        }
        batches.extend(assembler.finish());

        assert_eq!(skipped, 2);
        for batch in &batches {
            assert!(batch.byte_size() <= limits.max_batch_bytes);
            for record in batch.records() {
                let len = record.encode(&FieldMapping::default()).unwrap().len();
                assert!(len <= limits.max_record_bytes);
            }
        }

        let delivered: Vec<EventRecord> =
            batches.into_iter().flat_map(SealedBatch::into_records).collect();
        assert_eq!(delivered, expected);
    }

    #[test]
    fn test_json_fields_survive_assembly() {
        let mut fields = Map::new();
        fields.insert("user_id".to_string(), json!("u-7"));
        fields.insert("event".to_string(), json!("purchase"));
        fields.insert("amount".to_string(), json!(12.5));

        let mut assembler = assembler(10_000, 1_000);
        assembler.push(EventRecord::new(fields, 1)).unwrap();
        let body: Value = serde_json::from_slice(&assembler.finish().unwrap().payload()).unwrap();

        assert_eq!(body["batch"][0]["userId"], "u-7");
        assert_eq!(body["batch"][0]["properties"]["amount"], 12.5);
    }
}
