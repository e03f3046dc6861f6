use super::{RecordSource, RecordStream, SourceError};
use crate::domain::{EventRecord, Timestamp};
use futures::{StreamExt, future, stream};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Host (`api.tinybird.co`) or full base URL of the warehouse API.
    pub api_root: String,
    pub pipe: String,
    pub token: String,
    pub timestamp_field: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            api_root: "api.tinybird.co".to_string(),
            pipe: "api_enriched_user_events_export".to_string(),
            token: String::new(),
            timestamp_field: "timestamp".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("event-forwarder/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Reads new rows from a published warehouse pipe.
///
/// One run issues a single `GET {root}/v0/pipes/{pipe}.json` bounded by
/// `row_limit`; the request is sent when the stream is first polled.
#[derive(Debug, Clone)]
pub struct WarehouseSource {
    client: Client,
    pipe_url: Url,
    config: WarehouseConfig,
}

impl WarehouseSource {
    pub fn new(config: WarehouseConfig) -> Result<Self, SourceError> {
        let base = if config.api_root.contains("://") {
            config.api_root.clone()
        } else {
            format!("https://{}", config.api_root)
        };
        let base: Url = base.parse().map_err(|e| {
            SourceError::InvalidConfiguration(format!("Invalid warehouse API root: {e}"))
        })?;

        let mut pipe_url = base;
        let path = format!(
            "{}/v0/pipes/{}.json",
            pipe_url.path().trim_end_matches('/'),
            config.pipe
        );
        pipe_url.set_path(&path);

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                SourceError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            pipe_url,
            config,
        })
    }

    pub fn pipe_url(&self) -> &Url {
        &self.pipe_url
    }

    async fn fetch_page(
        &self,
        since: Timestamp,
        row_limit: usize,
    ) -> Result<Vec<EventRecord>, SourceError> {
        debug!(url = %self.pipe_url, since, row_limit, "Fetching rows from warehouse");

        let response = self
            .client
            .get(self.pipe_url.clone())
            .query(&[
                ("last_ts", since.to_string()),
                ("row_limit", row_limit.to_string()),
                ("token", self.config.token.clone()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(SourceError::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        let mut document: Value = serde_json::from_str(&body)
            .map_err(|e| SourceError::MalformedResponse(format!("Body is not JSON: {e}")))?;
        let rows = match document.get_mut("data").map(Value::take) {
            Some(Value::Array(rows)) => rows,
            Some(other) => {
                return Err(SourceError::MalformedResponse(format!(
                    "'data' is not an array: {other}"
                )));
            }
            None => {
                return Err(SourceError::MalformedResponse(
                    "Response has no 'data' field".to_string(),
                ));
            }
        };

        info!("Received {} rows from warehouse", rows.len());

        rows.into_iter()
            .map(|row| match row {
                Value::Object(fields) => {
                    Ok(EventRecord::from_row(fields, &self.config.timestamp_field)?)
                }
                other => Err(SourceError::MalformedResponse(format!(
                    "Row is not an object: {other}"
                ))),
            })
            .collect()
    }
}

impl RecordSource for WarehouseSource {
    fn fetch_records(&self, since: Timestamp, row_limit: usize) -> RecordStream<'_> {
        stream::once(self.fetch_page(since, row_limit))
            .map(|page| match page {
                Ok(records) => stream::iter(records.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::once(future::ready(Err(e))).right_stream(),
            })
            .flatten()
            .boxed()
    }
}
