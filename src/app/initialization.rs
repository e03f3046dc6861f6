use super::config::LogLevel;
use clap::ValueEnum;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("Invalid log level '{input}'. Valid levels: {valid_levels:?}")]
    InvalidLogLevel {
        input: String,
        valid_levels: Vec<String>,
    },

    #[error("Invalid directive format '{input}'. Expected: '{expected}'")]
    InvalidDirectiveFormat { input: String, expected: String },

    #[error("Empty target in directive '{input}'")]
    EmptyTarget { input: String },

    #[error("Logging system initialization failed: {details}")]
    LoggingInitFailed {
        details: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl InitializationError {
    pub fn fallback_strategy(&self) -> FallbackStrategy {
        match self {
            InitializationError::InvalidLogLevel { .. } => FallbackStrategy::UseDefaultLevel,
            InitializationError::InvalidDirectiveFormat { .. }
            | InitializationError::EmptyTarget { .. } => FallbackStrategy::SkipDirective,
            InitializationError::LoggingInitFailed { .. } => FallbackStrategy::AbortStartup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    UseDefaultLevel,
    SkipDirective,
    AbortStartup,
}

/// Parse a level name, ignoring case. `warning` is accepted for `warn`.
pub fn parse_level(input: &str) -> Result<LogLevel, InitializationError> {
    let normalized = input.trim().to_lowercase();
    let normalized = if normalized == "warning" {
        "warn"
    } else {
        normalized.as_str()
    };

    LogLevel::from_str(normalized, true).map_err(|_| InitializationError::InvalidLogLevel {
        input: input.to_string(),
        valid_levels: LogLevel::value_variants()
            .iter()
            .map(|level| level.as_str().to_string())
            .collect(),
    })
}

/// A per-target level override, e.g. `reqwest=warn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, InitializationError> {
        let Some((target, level)) = directive.split_once('=') else {
            return Err(InitializationError::InvalidDirectiveFormat {
                input: directive.to_string(),
                expected: "target=level".to_string(),
            });
        };

        if level.contains('=') {
            return Err(InitializationError::InvalidDirectiveFormat {
                input: directive.to_string(),
                expected: "target=level".to_string(),
            });
        }

        let target = target.trim();
        if target.is_empty() {
            return Err(InitializationError::EmptyTarget {
                input: directive.to_string(),
            });
        }

        Ok(LogDirective::new(target, parse_level(level)?))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}
