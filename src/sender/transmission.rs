use super::HttpClient;
use crate::buffer::SealedBatch;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Transmission timeout after {0:?}")]
    Timeout(Duration),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

#[derive(Debug, Clone)]
pub struct TransmissionResult {
    pub success: bool,
    pub status_code: u16,
    pub latency: Duration,
    pub batch_id: String,
    pub bytes_sent: usize,
    pub attempt: u32,
    pub response_body: String,
}

/// Sends one sealed batch body in a single POST.
#[derive(Debug, Clone)]
pub struct BatchTransmitter {
    pub client: HttpClient,
}

impl BatchTransmitter {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn send_batch(
        &self,
        batch: &SealedBatch,
        attempt: u32,
    ) -> Result<TransmissionResult, TransmissionError> {
        let start = Instant::now();
        let payload = batch.payload();
        let bytes_sent = payload.len();

        debug!(
            "Sending batch {} with {} records (attempt {})",
            batch.id(),
            batch.record_count(),
            attempt
        );

        let headers = self.build_headers(batch, attempt)?;

        let response = self
            .client
            .client
            .post(self.client.batch_url.clone())
            .basic_auth(&self.client.config.write_key, None::<&str>)
            .headers(headers)
            .timeout(self.client.config.timeout)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransmissionError::Timeout(self.client.config.timeout)
                } else {
                    TransmissionError::RequestError(e)
                }
            })?;

        let status_code = response.status().as_u16();
        let success = response.status().is_success();
        // The body is diagnostic only; an unreadable body must not mask the status.
        let response_body = response.text().await.unwrap_or_default();
        let latency = start.elapsed();

        Ok(TransmissionResult {
            success,
            status_code,
            latency,
            batch_id: batch.id().to_string(),
            bytes_sent,
            attempt,
            response_body,
        })
    }

    pub fn build_headers(
        &self,
        batch: &SealedBatch,
        attempt: u32,
    ) -> Result<HeaderMap, TransmissionError> {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        headers.insert(
            HeaderName::from_static("x-batch-id"),
            HeaderValue::from_str(batch.id()).map_err(|e| {
                TransmissionError::InvalidHeaderValue(format!("Invalid batch ID: {e}"))
            })?,
        );

        headers.insert(
            HeaderName::from_static("x-batch-size"),
            HeaderValue::from(batch.record_count() as u64),
        );

        headers.insert(
            HeaderName::from_static("x-delivery-attempt"),
            HeaderValue::from(attempt),
        );

        headers.insert(
            HeaderName::from_static("x-forwarder-version"),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );

        Ok(headers)
    }
}
