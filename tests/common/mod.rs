#![allow(dead_code)]

use event_forwarder::domain::{EventRecord, FieldMapping, Timestamp};
use event_forwarder::reliability::{DeliveryManager, RetryConfig};
use event_forwarder::sender::{BatchTransmitter, ClientConfig, HttpClient};
use event_forwarder::source::{RecordSource, RecordStream, SourceError};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::time::Duration;

pub const WRITE_KEY: &str = "test-key";
/// `base64("test-key:")`
pub const BASIC_AUTH: &str = "Basic dGVzdC1rZXk6";

/// A record shaped like a warehouse row whose encoded track event is exactly `size` bytes.
pub fn record_of_size(ts: Timestamp, size: usize) -> EventRecord {
    let mapping = FieldMapping::default();
    let mut fields = Map::new();
    fields.insert("user_id".to_string(), json!("user-1"));
    fields.insert("event".to_string(), json!("page_view"));
    fields.insert("timestamp".to_string(), json!(ts));
    fields.insert("pad".to_string(), Value::String(String::new()));

    let base = EventRecord::new(fields.clone(), ts)
        .encode(&mapping)
        .unwrap()
        .len();
    assert!(size >= base, "size {size} below minimum {base}");
    fields.insert("pad".to_string(), Value::String("x".repeat(size - base)));

    let record = EventRecord::new(fields, ts);
    assert_eq!(record.encode(&mapping).unwrap().len(), size);
    record
}

/// In-memory source honoring `since` and `row_limit`, with optional failure injection.
pub struct VecSource {
    records: Vec<EventRecord>,
    fail_after: Option<usize>,
    fetches: Mutex<Vec<(Timestamp, usize)>>,
}

impl VecSource {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self {
            records,
            fail_after: None,
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Yield `n` records, then a fetch error.
    pub fn failing_after(records: Vec<EventRecord>, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(records)
        }
    }

    pub fn fetches(&self) -> Vec<(Timestamp, usize)> {
        self.fetches.lock().clone()
    }
}

impl RecordSource for VecSource {
    fn fetch_records(&self, since: Timestamp, row_limit: usize) -> RecordStream<'_> {
        self.fetches.lock().push((since, row_limit));

        let mut items: Vec<Result<EventRecord, SourceError>> = self
            .records
            .iter()
            .filter(|r| r.timestamp() > since)
            .take(row_limit)
            .cloned()
            .map(Ok)
            .collect();

        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(SourceError::MalformedResponse(
                "connection reset mid-page".to_string(),
            )));
        }

        stream::iter(items).boxed()
    }
}

pub fn http_client(endpoint: String) -> HttpClient {
    HttpClient::new(ClientConfig {
        endpoint,
        write_key: WRITE_KEY.to_string(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

pub fn delivery_manager(endpoint: String, send_delay: Duration) -> DeliveryManager {
    DeliveryManager::new(
        BatchTransmitter::new(http_client(endpoint)),
        RetryConfig {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
        },
        send_delay,
    )
}

/// Number of records inside a received `{"batch":[...]}` body.
pub fn batch_len(body: &[u8]) -> usize {
    let value: Value = serde_json::from_slice(body).unwrap();
    value["batch"].as_array().unwrap().len()
}
