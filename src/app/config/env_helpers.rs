//! Helpers for overlaying individual environment variables onto a config.

use super::ConfigError;

/// Load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
pub fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

/// Load a value-enum environment variable, ignoring case.
pub fn load_env_enum<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: clap::ValueEnum,
{
    if let Ok(value) = std::env::var(name) {
        *target = T::from_str(&value, true)
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

pub fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

pub fn load_env_path(name: &str, target: &mut std::path::PathBuf) {
    if let Ok(value) = std::env::var(name) {
        *target = std::path::PathBuf::from(value);
    }
}

pub fn load_env_path_opt(name: &str, target: &mut Option<std::path::PathBuf>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(std::path::PathBuf::from(value));
    }
}

/// Comma-separated list; blank items are dropped.
pub fn load_env_list(name: &str, target: &mut Vec<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
    }
}
