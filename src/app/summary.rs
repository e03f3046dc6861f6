use crate::domain::Timestamp;
use serde::Serialize;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every assembled batch was delivered.
    #[default]
    Success,
    /// At least one batch could not be delivered.
    Degraded,
    /// The run aborted before it could commit.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Degraded => 2,
        }
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub records_fetched: u64,
    /// Records dropped for exceeding the per-record ceiling.
    pub records_skipped: u64,
    pub records_delivered: u64,
    pub batches_attempted: u64,
    pub batches_delivered: u64,
    pub delivery_attempts: u64,
    pub starting_checkpoint: Timestamp,
    pub final_checkpoint: Timestamp,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(starting_checkpoint: Timestamp) -> Self {
        Self {
            starting_checkpoint,
            final_checkpoint: starting_checkpoint,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(reason.into());
    }

    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status.exit_code())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!(r#"{{"status":"{}"}}"#, self.status.as_str()))
    }

    pub fn log(&self) {
        match self.status {
            RunStatus::Success => info!(
                records_fetched = self.records_fetched,
                records_skipped = self.records_skipped,
                records_delivered = self.records_delivered,
                batches_attempted = self.batches_attempted,
                batches_delivered = self.batches_delivered,
                delivery_attempts = self.delivery_attempts,
                starting_checkpoint = self.starting_checkpoint,
                final_checkpoint = self.final_checkpoint,
                duration_ms = self.duration_ms,
                status = self.status.as_str(),
                "Run finished"
            ),
            RunStatus::Degraded => warn!(
                records_fetched = self.records_fetched,
                records_skipped = self.records_skipped,
                records_delivered = self.records_delivered,
                batches_attempted = self.batches_attempted,
                batches_delivered = self.batches_delivered,
                delivery_attempts = self.delivery_attempts,
                starting_checkpoint = self.starting_checkpoint,
                final_checkpoint = self.final_checkpoint,
                duration_ms = self.duration_ms,
                status = self.status.as_str(),
                "Run finished with undelivered batches"
            ),
            RunStatus::Failed => error!(
                records_fetched = self.records_fetched,
                records_skipped = self.records_skipped,
                batches_attempted = self.batches_attempted,
                batches_delivered = self.batches_delivered,
                starting_checkpoint = self.starting_checkpoint,
                final_checkpoint = self.final_checkpoint,
                duration_ms = self.duration_ms,
                error = self.error.as_deref().unwrap_or("unknown"),
                "Run failed"
            ),
        }
    }
}
