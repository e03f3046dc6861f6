use super::env_helpers::{
    load_env_enum, load_env_list, load_env_path, load_env_path_opt, load_env_string,
    load_env_var,
};
use super::{ConfigError, LogFormat, LogLevel, Secret};
use crate::buffer::BatchLimits;
use crate::checkpoint::FileCheckpointStore;
use crate::domain::{FieldMapping, Timestamp};
use crate::reliability::RetryConfig;
use crate::sender::ClientConfig;
use crate::source::WarehouseConfig;
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(
    author,
    version,
    about = "Forward newly created warehouse events to a batch ingestion API",
    long_about = None
)]
#[serde(default)]
pub struct Config {
    /// Warehouse API host or base URL
    #[arg(long, env = "WAREHOUSE_API_ROOT", default_value = "api.tinybird.co")]
    pub warehouse_api_root: String,

    /// Warehouse pipe exporting the enriched events
    #[arg(
        long,
        env = "WAREHOUSE_PIPE",
        default_value = "api_enriched_user_events_export"
    )]
    pub warehouse_pipe: String,

    /// Warehouse read token
    #[arg(long, env = "WAREHOUSE_TOKEN", default_value = "", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub warehouse_token: Secret,

    /// Batch ingestion endpoint URL
    #[arg(
        long,
        env = "INGEST_ENDPOINT",
        default_value = "https://api.segment.io/v1/batch"
    )]
    pub ingest_endpoint: String,

    /// Ingestion write key
    #[arg(long, env = "INGEST_WRITE_KEY", default_value = "", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub write_key: Secret,

    /// File holding the last delivered event timestamp
    #[arg(
        long,
        env = "CHECKPOINT_PATH",
        default_value = "/var/lib/event-forwarder/last_ts"
    )]
    pub checkpoint_path: PathBuf,

    /// Checkpoint to start from while no checkpoint file exists
    #[arg(long, env = "INITIAL_CHECKPOINT", default_value = "0", allow_negative_numbers = true)]
    pub initial_checkpoint: Timestamp,

    /// Maximum rows fetched per run
    #[arg(long, env = "ROW_LIMIT", default_value = "5000")]
    pub row_limit: usize,

    /// Maximum request body size per batch, in bytes
    #[arg(long, env = "MAX_BATCH_BYTES", default_value = "512000")]
    pub max_batch_bytes: usize,

    /// Maximum serialized size of a single record, in bytes
    #[arg(long, env = "MAX_RECORD_BYTES", default_value = "32768")]
    pub max_record_bytes: usize,

    /// Minimum pause between consecutive batches, in milliseconds (1000 = one second)
    #[arg(long, env = "BATCH_SEND_DELAY_MS", default_value = "1000")]
    pub batch_send_delay_ms: u64,

    /// Records sampled to estimate the records-per-batch target
    #[arg(long, env = "BATCH_SAMPLE_SIZE", default_value = "50")]
    pub batch_sample_size: usize,

    /// Attempts per batch before giving up on transient failures
    #[arg(long, env = "MAX_DELIVERY_ATTEMPTS", default_value = "3")]
    pub max_delivery_attempts: u32,

    /// Pause between attempts of the same batch in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "1000")]
    pub retry_delay_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Abort the run after this many seconds (0 disables the deadline)
    #[arg(long, env = "RUN_TIMEOUT_SECS", default_value = "0")]
    pub run_timeout_secs: u64,

    /// Row field holding the user id
    #[arg(long, env = "USER_ID_FIELD", default_value = "user_id")]
    pub user_id_field: String,

    /// Row field holding the event name
    #[arg(long, env = "EVENT_FIELD", default_value = "event")]
    pub event_field: String,

    /// Row field holding the epoch-seconds event timestamp
    #[arg(long, env = "TIMESTAMP_FIELD", default_value = "timestamp")]
    pub timestamp_field: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", ignore_case = true)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "text", ignore_case = true)]
    pub log_format: LogFormat,

    /// Per-target level overrides, e.g. `reqwest=debug,event_forwarder::reliability=trace`
    #[arg(long, env = "LOG_DIRECTIVES", value_delimiter = ',')]
    pub log_directives: Vec<String>,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub batch_send_delay: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_delay: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub run_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            warehouse_api_root: "api.tinybird.co".to_string(),
            warehouse_pipe: "api_enriched_user_events_export".to_string(),
            warehouse_token: Secret::default(),
            ingest_endpoint: "https://api.segment.io/v1/batch".to_string(),
            write_key: Secret::default(),
            checkpoint_path: PathBuf::from("/var/lib/event-forwarder/last_ts"),
            initial_checkpoint: 0,
            row_limit: 5000,
            max_batch_bytes: 500 * 1024,
            max_record_bytes: 32 * 1024,
            batch_send_delay_ms: 1000,
            batch_sample_size: 50,
            max_delivery_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout_secs: 30,
            run_timeout_secs: 0,
            user_id_field: "user_id".to_string(),
            event_field: "event".to_string(),
            timestamp_field: "timestamp".to_string(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            log_directives: Vec::new(),
            config_file: None,
            batch_send_delay: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            run_timeout: None,
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse arguments; when a config file is named, it becomes the base layer.
    ///
    /// Precedence is file, then environment, then command line.
    pub fn from_args_or_file<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Config::command().try_get_matches_from(args)?;
        let mut cli = Config::from_arg_matches(&matches)?;

        let Some(path) = cli.config_file.clone() else {
            cli.post_process()?;
            cli.validate()?;
            return Ok(cli);
        };

        let content = std::fs::read_to_string(&path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.load_env_overrides()?;
        config.apply_command_line(cli, &matches);
        config.config_file = Some(path);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.load_env_overrides()?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn load_env_overrides(&mut self) -> Result<(), ConfigError> {
        load_env_string("WAREHOUSE_API_ROOT", &mut self.warehouse_api_root);
        load_env_string("WAREHOUSE_PIPE", &mut self.warehouse_pipe);
        load_env_var("WAREHOUSE_TOKEN", &mut self.warehouse_token)?;
        load_env_string("INGEST_ENDPOINT", &mut self.ingest_endpoint);
        load_env_var("INGEST_WRITE_KEY", &mut self.write_key)?;
        load_env_path("CHECKPOINT_PATH", &mut self.checkpoint_path);
        load_env_var("INITIAL_CHECKPOINT", &mut self.initial_checkpoint)?;
        load_env_var("ROW_LIMIT", &mut self.row_limit)?;
        load_env_var("MAX_BATCH_BYTES", &mut self.max_batch_bytes)?;
        load_env_var("MAX_RECORD_BYTES", &mut self.max_record_bytes)?;
        load_env_var("BATCH_SEND_DELAY_MS", &mut self.batch_send_delay_ms)?;
        load_env_var("BATCH_SAMPLE_SIZE", &mut self.batch_sample_size)?;
        load_env_var("MAX_DELIVERY_ATTEMPTS", &mut self.max_delivery_attempts)?;
        load_env_var("RETRY_DELAY_MS", &mut self.retry_delay_ms)?;
        load_env_var("REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        load_env_var("RUN_TIMEOUT_SECS", &mut self.run_timeout_secs)?;
        load_env_string("USER_ID_FIELD", &mut self.user_id_field);
        load_env_string("EVENT_FIELD", &mut self.event_field);
        load_env_string("TIMESTAMP_FIELD", &mut self.timestamp_field);
        load_env_enum("LOG_LEVEL", &mut self.log_level)?;
        load_env_enum("LOG_FORMAT", &mut self.log_format)?;
        load_env_list("LOG_DIRECTIVES", &mut self.log_directives);
        load_env_path_opt("CONFIG_FILE", &mut self.config_file);
        Ok(())
    }

    /// Copy over the values given explicitly on the command line.
    fn apply_command_line(&mut self, cli: Config, matches: &ArgMatches) {
        let given = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);

        macro_rules! take_given {
            ($($field:ident),* $(,)?) => {
                $(
                    if given(stringify!($field)) {
                        self.$field = cli.$field;
                    }
                )*
            };
        }

        take_given!(
            warehouse_api_root,
            warehouse_pipe,
            warehouse_token,
            ingest_endpoint,
            write_key,
            checkpoint_path,
            initial_checkpoint,
            row_limit,
            max_batch_bytes,
            max_record_bytes,
            batch_send_delay_ms,
            batch_sample_size,
            max_delivery_attempts,
            retry_delay_ms,
            request_timeout_secs,
            run_timeout_secs,
            user_id_field,
            event_field,
            timestamp_field,
            log_level,
            log_format,
            log_directives,
        );
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.batch_send_delay = Duration::from_millis(self.batch_send_delay_ms);
        self.retry_delay = Duration::from_millis(self.retry_delay_ms);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.run_timeout =
            (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs));
        Ok(())
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_batch_bytes: self.max_batch_bytes,
            max_record_bytes: self.max_record_bytes,
        }
    }

    pub fn field_mapping(&self) -> FieldMapping {
        FieldMapping {
            user_id: self.user_id_field.clone(),
            event: self.event_field.clone(),
            timestamp: self.timestamp_field.clone(),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_delivery_attempts,
            retry_delay: self.retry_delay,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.ingest_endpoint.clone(),
            write_key: self.write_key.expose().to_string(),
            timeout: self.request_timeout,
            ..ClientConfig::default()
        }
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig {
            api_root: self.warehouse_api_root.clone(),
            pipe: self.warehouse_pipe.clone(),
            token: self.warehouse_token.expose().to_string(),
            timestamp_field: self.timestamp_field.clone(),
            timeout: self.request_timeout,
            ..WarehouseConfig::default()
        }
    }

    pub fn checkpoint_store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(&self.checkpoint_path, self.initial_checkpoint)
    }
}
