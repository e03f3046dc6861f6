pub mod retry;

pub use retry::{
    AttemptOutcome, DeliveryAttempt, DeliveryError, RetryConfig, RetryPolicy,
};

use crate::buffer::SealedBatch;
use crate::sender::BatchTransmitter;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};

/// A batch confirmed by the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub batch_id: String,
    pub attempts: u32,
    pub status_code: u16,
    pub elapsed: Duration,
}

/// Ships sealed batches one at a time, with bounded retries and pacing.
///
/// At least `send_delay` separates the end of one batch's last attempt from
/// the first attempt of the next.
pub struct DeliveryManager {
    transmitter: BatchTransmitter,
    policy: RetryPolicy,
    send_delay: Duration,
    last_finished: Option<Instant>,
}

impl DeliveryManager {
    pub fn new(transmitter: BatchTransmitter, retry_config: RetryConfig, send_delay: Duration) -> Self {
        Self {
            transmitter,
            policy: RetryPolicy::new(retry_config),
            send_delay,
            last_finished: None,
        }
    }

    pub async fn deliver(&mut self, batch: &SealedBatch) -> Result<DeliveryReceipt, DeliveryError> {
        if let Some(last) = self.last_finished {
            sleep_until(last + self.send_delay).await;
        }

        let result = self.attempt_with_retries(batch).await;
        self.last_finished = Some(Instant::now());
        result
    }

    async fn attempt_with_retries(
        &self,
        batch: &SealedBatch,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();

            let outcome = match self.transmitter.send_batch(batch, attempt).await {
                Ok(result) => AttemptOutcome::from_status(result.status_code, result.response_body),
                Err(e) => AttemptOutcome::Transient {
                    reason: e.to_string(),
                },
            };

            let record = DeliveryAttempt {
                batch_id: batch.id().to_string(),
                attempt,
                outcome,
                latency: attempt_started.elapsed(),
            };
            log_attempt(batch, &record, self.policy.max_attempts());

            if self.policy.should_retry(attempt, &record.outcome) {
                tracing::info!(
                    "Retrying batch {} in {:?} (attempt {})",
                    batch.id(),
                    self.policy.delay(),
                    attempt + 1
                );
                sleep(self.policy.delay()).await;
                continue;
            }

            return match record.outcome {
                AttemptOutcome::Delivered { status } => Ok(DeliveryReceipt {
                    batch_id: record.batch_id,
                    attempts: attempt,
                    status_code: status,
                    elapsed: started.elapsed(),
                }),
                AttemptOutcome::Rejected { status, body } => Err(DeliveryError::Rejected {
                    batch_id: record.batch_id,
                    status,
                    body,
                    attempts: attempt,
                }),
                AttemptOutcome::Transient { reason } => Err(DeliveryError::RetriesExhausted {
                    batch_id: record.batch_id,
                    attempts: attempt,
                    last_error: reason,
                }),
            };
        }
    }
}

fn log_attempt(batch: &SealedBatch, record: &DeliveryAttempt, max_attempts: u32) {
    match &record.outcome {
        AttemptOutcome::Delivered { status } => tracing::info!(
            batch_id = %record.batch_id,
            batch_bytes = batch.byte_size(),
            records = batch.record_count(),
            attempt = record.attempt,
            max_attempts,
            outcome = record.outcome.label(),
            status,
            latency_ms = record.latency.as_millis() as u64,
            "Batch delivered"
        ),
        AttemptOutcome::Transient { reason } => tracing::warn!(
            batch_id = %record.batch_id,
            batch_bytes = batch.byte_size(),
            records = batch.record_count(),
            attempt = record.attempt,
            max_attempts,
            outcome = record.outcome.label(),
            reason = %reason,
            latency_ms = record.latency.as_millis() as u64,
            "Batch delivery attempt failed"
        ),
        AttemptOutcome::Rejected { status, body } => tracing::error!(
            batch_id = %record.batch_id,
            batch_bytes = batch.byte_size(),
            records = batch.record_count(),
            attempt = record.attempt,
            max_attempts,
            outcome = record.outcome.label(),
            status,
            body = %body,
            latency_ms = record.latency.as_millis() as u64,
            "Batch rejected by ingestion endpoint"
        ),
    }
}
