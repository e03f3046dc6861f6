use super::config::{LogFormat, LogLevel};
use super::initialization::{FallbackStrategy, InitializationError, LogDirective};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Dependencies that are chatty at info level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
            fallback_level: LogLevel::Info,
        }
    }

    /// Add a `target=level` directive, applying the error's fallback strategy.
    pub fn add_directive(&self, directive_str: &str) -> Result<(), InitializationError> {
        match LogDirective::parse(directive_str) {
            Ok(directive) => {
                self.directives.write().push(directive);
                Ok(())
            }
            Err(e) => match e.fallback_strategy() {
                FallbackStrategy::UseDefaultLevel => {
                    eprintln!("Warning: {e}, using default level");
                    self.add_default_directive(directive_str);
                    Ok(())
                }
                FallbackStrategy::SkipDirective => {
                    eprintln!("Warning: {e}, skipping directive");
                    Ok(())
                }
                FallbackStrategy::AbortStartup => Err(e),
            },
        }
    }

    fn add_default_directive(&self, directive_str: &str) {
        let target = directive_str.split('=').next().unwrap_or("unknown").trim();
        self.directives
            .write()
            .push(LogDirective::new(target, self.fallback_level));
    }

    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in QUIET_TARGETS {
            directives.push(LogDirective::new(*target, LogLevel::Warn));
        }
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), InitializationError> {
        let filter_string = self.build_filter_string(default_level);

        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| {
            InitializationError::LoggingInitFailed {
                details: format!("Failed to create EnvFilter with '{filter_string}'"),
                source: Box::new(e),
            }
        })?;

        // Logs go to stderr; stdout carries the run summary.
        let result = match format {
            LogFormat::Text => tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true)
                        .with_ansi(false)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                        .with_current_span(false)
                        .flatten_event(true),
                )
                .try_init(),
        };

        result.map_err(|e| InitializationError::LoggingInitFailed {
            details: "Failed to set global tracing subscriber".to_string(),
            source: Box::new(e),
        })
    }

    /// Default level first, then per-target overrides.
    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();

        let mut filter_parts = Vec::with_capacity(directives.len() + 1);
        filter_parts.push(default_level.as_str().to_string());
        filter_parts.extend(directives.iter().map(LogDirective::to_filter_string));

        filter_parts.join(",")
    }

}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global subscriber once per process.
///
/// `directives` are `target=level` overrides applied after the quiet defaults,
/// so `reqwest=debug` re-enables the HTTP client. Later calls return the
/// outcome of the first one.
pub fn setup_logging_safe(
    level: LogLevel,
    format: LogFormat,
    directives: &[String],
) -> Result<(), InitializationError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    let outcome = INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        for directive in directives {
            logging_system
                .add_directive(directive)
                .map_err(|e| e.to_string())?;
        }
        logging_system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())
    });

    outcome
        .clone()
        .map_err(|details| InitializationError::LoggingInitFailed {
            details,
            source: Box::new(std::io::Error::other("Logging initialization error")),
        })
}
