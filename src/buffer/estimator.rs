use super::batch::BatchLimits;
use crate::domain::FieldMapping;
use crate::source::RecordStream;
use futures::{StreamExt, stream};

/// Running estimate of how many records fit in one batch.
#[derive(Debug, Clone)]
pub struct SizeEstimator {
    limits: BatchLimits,
    total_bytes: u64,
    observed: u64,
}

impl SizeEstimator {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            total_bytes: 0,
            observed: 0,
        }
    }

    pub fn observe(&mut self, encoded_len: usize) {
        self.total_bytes += encoded_len as u64;
        self.observed += 1;
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Mean serialized record size, rounded down.
    pub fn mean_size(&self) -> Option<u64> {
        (self.observed > 0).then(|| self.total_bytes / self.observed)
    }

    /// `max_batch_bytes / mean`, never below 1.
    pub fn records_per_batch(&self) -> usize {
        let mean = self.mean_size().unwrap_or(1).max(1);
        ((self.limits.max_batch_bytes as u64 / mean) as usize).max(1)
    }

    /// Pull up to `sample_size` items off `records` to seed the estimate.
    ///
    /// Sampled items are buffered and replayed ahead of the rest of the stream,
    /// so the caller still sees every record, in order. Sampling stops early at
    /// the first fetch error, which is replayed in place. Records over the
    /// per-record ceiling are not counted.
    pub async fn sample<'a>(
        &mut self,
        mut records: RecordStream<'a>,
        sample_size: usize,
        mapping: &FieldMapping,
    ) -> RecordStream<'a> {
        let mut buffered = Vec::with_capacity(sample_size.min(1024));

        while buffered.len() < sample_size {
            match records.next().await {
                Some(Ok(record)) => {
                    if let Ok(encoded) = record.encode(mapping)
                        && encoded.len() <= self.limits.max_record_bytes
                    {
                        self.observe(encoded.len());
                    }
                    buffered.push(Ok(record));
                }
                Some(Err(e)) => {
                    buffered.push(Err(e));
                    break;
                }
                None => break,
            }
        }

        tracing::debug!(
            sampled = buffered.len(),
            mean_size = ?self.mean_size(),
            records_per_batch = self.records_per_batch(),
            "Sampled records for batch size estimate"
        );

        stream::iter(buffered).chain(records).boxed()
    }
}
