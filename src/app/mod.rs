pub mod config;
pub mod initialization;
pub mod logging_system;
pub mod pipeline;
pub mod summary;

pub use config::{Config, ConfigError, LogFormat, LogLevel, Secret};
pub use initialization::InitializationError;
pub use logging_system::{LoggingSystem, setup_logging_safe};
pub use pipeline::{Pipeline, PipelineSettings};
pub use summary::{RunStatus, RunSummary};

use crate::checkpoint::CheckpointStore;
use crate::reliability::DeliveryManager;
use crate::sender::{BatchTransmitter, HttpClient};
use crate::source::{RecordSource, WarehouseSource};
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// A configured, ready-to-run forwarder.
pub struct App {
    config: Config,
    pipeline: Pipeline,
}

impl App {
    pub fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_or_file(args).context("Invalid configuration")?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let source: Arc<dyn RecordSource> = Arc::new(
            WarehouseSource::new(config.warehouse_config())
                .context("Failed to build warehouse source")?,
        );
        let store: Arc<dyn CheckpointStore> = Arc::new(config.checkpoint_store());

        Self::with_parts(config, source, store)
    }

    /// Build around an arbitrary source and checkpoint store.
    pub fn with_parts(
        config: Config,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn CheckpointStore>,
    ) -> anyhow::Result<Self> {
        let client =
            HttpClient::new(config.client_config()).context("Failed to build ingestion client")?;
        let delivery = DeliveryManager::new(
            BatchTransmitter::new(client),
            config.retry_config(),
            config.batch_send_delay,
        );

        let settings = PipelineSettings {
            row_limit: config.row_limit,
            sample_size: config.batch_sample_size,
            limits: config.batch_limits(),
            mapping: config.field_mapping(),
            run_timeout: config.run_timeout,
        };

        Ok(Self {
            pipeline: Pipeline::new(source, store, delivery, settings),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(mut self) -> RunSummary {
        info!("Starting event-forwarder v{}", env!("CARGO_PKG_VERSION"));
        info!(
            endpoint = %self.config.ingest_endpoint,
            pipe = %self.config.warehouse_pipe,
            checkpoint_path = %self.config.checkpoint_path.display(),
            row_limit = self.config.row_limit,
            max_batch_bytes = self.config.max_batch_bytes,
            max_record_bytes = self.config.max_record_bytes,
            "Configuration loaded"
        );

        let summary = self.pipeline.run().await;
        summary.log();
        summary
    }
}

/// Binary entry point: one run, summary on stdout, status as exit code.
pub async fn main() -> ExitCode {
    let config = match Config::from_args_or_file(std::env::args_os()) {
        Ok(config) => config,
        // --help and --version
        Err(ConfigError::Cli(e)) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(ConfigError::Cli(e)) => {
            let _ = e.print();
            return ExitCode::from(RunStatus::Failed.exit_code());
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(RunStatus::Failed.exit_code());
        }
    };

    if let Err(e) =
        setup_logging_safe(config.log_level, config.log_format, &config.log_directives)
    {
        eprintln!("Warning: {e}");
    }

    let app = match App::from_config(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return ExitCode::from(RunStatus::Failed.exit_code());
        }
    };

    let summary = app.run().await;
    println!("{}", summary.to_json());
    summary.exit_code()
}
