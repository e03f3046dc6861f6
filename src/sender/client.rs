use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Batch ingestion endpoint, e.g. `https://api.segment.io/v1/batch`.
    pub endpoint: String,
    /// Write key sent as the Basic auth username.
    pub write_key: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.segment.io/v1/batch".to_string(),
            write_key: String::new(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 4,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("event-forwarder/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("write_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_connections", &self.max_connections)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub config: ClientConfig,
    pub batch_url: Url,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let batch_url: Url = config.endpoint.parse().map_err(|e| {
            ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        if config.write_key.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "Write key must not be empty".to_string(),
            ));
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            batch_url,
        })
    }
}
