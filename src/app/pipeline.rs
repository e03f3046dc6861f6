use super::summary::{RunStatus, RunSummary};
use crate::buffer::{BatchAssembler, BatchLimits, BufferError, SealedBatch, SizeEstimator};
use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::domain::{FieldMapping, ForwarderError};
use crate::reliability::DeliveryManager;
use crate::source::RecordSource;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{error, info, warn};

/// Per-run knobs of the forwarding pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub row_limit: usize,
    pub sample_size: usize,
    pub limits: BatchLimits,
    pub mapping: FieldMapping,
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            row_limit: 5000,
            sample_size: 50,
            limits: BatchLimits::default(),
            mapping: FieldMapping::default(),
            run_timeout: None,
        }
    }
}

/// One forwarding run: fetch → sample → assemble → deliver → commit.
///
/// Everything happens on the calling task, strictly in order. The checkpoint
/// is read once at the start and written at most once at the end.
pub struct Pipeline {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn CheckpointStore>,
    delivery: DeliveryManager,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn CheckpointStore>,
        delivery: DeliveryManager,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            delivery,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Execute a run. Failures are folded into the returned summary.
    pub async fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let result = match self.settings.run_timeout {
            Some(limit) => match timeout(limit, self.execute(&mut summary)).await {
                Ok(result) => result,
                Err(_) => Err(ForwarderError::DeadlineExceeded(limit)),
            },
            None => self.execute(&mut summary).await,
        };

        if let Err(e) = result {
            error!("Run aborted: {}", e);
            summary.final_checkpoint = summary.starting_checkpoint;
            summary.fail(e.to_string());
        }

        summary.set_duration(started.elapsed());
        summary
    }

    async fn execute(&mut self, summary: &mut RunSummary) -> Result<(), ForwarderError> {
        let start = self.store.read_checkpoint().await?;
        *summary = RunSummary::new(start);
        info!(checkpoint = start, row_limit = self.settings.row_limit, "Starting run");

        let mut checkpoint = CheckpointManager::new(start);
        let limits = self.settings.limits;

        let source = Arc::clone(&self.source);
        let records = source.fetch_records(start, self.settings.row_limit);
        let mut estimator = SizeEstimator::new(limits);
        let mut records = estimator
            .sample(records, self.settings.sample_size, &self.settings.mapping)
            .await;

        let mut assembler = BatchAssembler::new(
            limits,
            self.settings.mapping.clone(),
            estimator.records_per_batch(),
        )
        .map_err(|e| ForwarderError::Config(e.to_string()))?;
        info!(
            target_records = assembler.target_records(),
            "Initial records-per-batch target"
        );

        let mut halted = false;
        while let Some(item) = records.next().await {
            let record = item?;
            summary.records_fetched += 1;

            if halted {
                checkpoint.hold_back(record.timestamp());
                continue;
            }

            match assembler.push(record) {
                Ok(Some(batch)) => {
                    if !self.deliver(&batch, &mut checkpoint, summary).await {
                        halted = true;
                        checkpoint.hold_back(batch.min_timestamp());
                        if let Some(pending) = assembler.pending().min_timestamp() {
                            checkpoint.hold_back(pending);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_record_rejection() => {
                    summary.records_skipped += 1;
                    log_rejection(&e);
                }
                Err(e) => return Err(ForwarderError::Config(e.to_string())),
            }
        }

        if !halted
            && let Some(batch) = assembler.finish()
            && !self.deliver(&batch, &mut checkpoint, summary).await
        {
            halted = true;
            checkpoint.hold_back(batch.min_timestamp());
        }

        summary.final_checkpoint = checkpoint.commit(self.store.as_ref()).await?;
        summary.status = if halted {
            RunStatus::Degraded
        } else {
            RunStatus::Success
        };
        Ok(())
    }

    /// Deliver one batch; `false` means delivery stops for this run.
    async fn deliver(
        &mut self,
        batch: &SealedBatch,
        checkpoint: &mut CheckpointManager,
        summary: &mut RunSummary,
    ) -> bool {
        summary.batches_attempted += 1;

        match self.delivery.deliver(batch).await {
            Ok(receipt) => {
                summary.delivery_attempts += u64::from(receipt.attempts);
                summary.batches_delivered += 1;
                summary.records_delivered += batch.record_count() as u64;
                checkpoint.advance(batch.max_timestamp());
                true
            }
            Err(e) => {
                summary.delivery_attempts += u64::from(e.attempts());
                error!(
                    batch_id = %e.batch_id(),
                    records = batch.record_count(),
                    min_timestamp = batch.min_timestamp(),
                    max_timestamp = batch.max_timestamp(),
                    "Stopping delivery: {}",
                    e
                );
                false
            }
        }
    }
}

fn log_rejection(e: &BufferError) {
    match e {
        BufferError::OversizedRecord {
            size,
            limit,
            timestamp,
        } => warn!(size, limit, timestamp, "Skipping oversized record"),
        other => warn!("Skipping record: {}", other),
    }
}
