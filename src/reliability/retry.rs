use std::time::Duration;
use thiserror::Error;

/// A batch that could not be delivered in this run.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Batch {batch_id} rejected with HTTP {status} after {attempts} attempt(s): {body}")]
    Rejected {
        batch_id: String,
        status: u16,
        body: String,
        attempts: u32,
    },
    #[error("Batch {batch_id} still failing after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        batch_id: String,
        attempts: u32,
        last_error: String,
    },
}

impl DeliveryError {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Rejected { attempts, .. }
            | DeliveryError::RetriesExhausted { attempts, .. } => *attempts,
        }
    }

    pub fn batch_id(&self) -> &str {
        match self {
            DeliveryError::Rejected { batch_id, .. }
            | DeliveryError::RetriesExhausted { batch_id, .. } => batch_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a single POST of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered { status: u16 },
    /// Network failure, timeout, 5xx or rate limiting. Worth retrying.
    Transient { reason: String },
    /// Any other non-success response. Retrying cannot help.
    Rejected { status: u16, body: String },
}

impl AttemptOutcome {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            200..=299 => AttemptOutcome::Delivered { status },
            429 | 500..=599 => AttemptOutcome::Transient {
                reason: format!("HTTP {status}: {body}"),
            },
            _ => AttemptOutcome::Rejected { status, body },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Delivered { .. } => "delivered",
            AttemptOutcome::Transient { .. } => "transient",
            AttemptOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// One delivery attempt, kept for logging only.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub batch_id: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

/// Fixed-delay, bounded-attempt retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, outcome: &AttemptOutcome) -> bool {
        matches!(outcome, AttemptOutcome::Transient { .. }) && attempt < self.config.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.config.retry_delay
    }
}
