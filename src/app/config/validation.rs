use super::{Config, ConfigError, Secret};
use url::Url;

/// Marker left behind by deployment templates that were never filled in.
const PLACEHOLDER: &str = "<default_value>";

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.ingest_endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid ingestion endpoint URL '{}': {}",
                self.ingest_endpoint, e
            ))
        })?;

        if self.warehouse_api_root.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(
                "Warehouse API root must not be empty".to_string(),
            ));
        }

        if self.warehouse_pipe.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Warehouse pipe must not be empty".to_string(),
            ));
        }

        validate_secret("WAREHOUSE_TOKEN", &self.warehouse_token)?;
        validate_secret("INGEST_WRITE_KEY", &self.write_key)?;

        if self.row_limit == 0 {
            return Err(ConfigError::InvalidConfig(
                "Row limit must be greater than 0".to_string(),
            ));
        }

        self.batch_limits()
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.batch_sample_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch sample size must be greater than 0".to_string(),
            ));
        }

        if self.max_delivery_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Delivery attempts must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("user_id_field", &self.user_id_field),
            ("event_field", &self.event_field),
            ("timestamp_field", &self.timestamp_field),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must not be empty"
                )));
            }
        }

        Ok(())
    }
}

fn validate_secret(name: &str, secret: &Secret) -> Result<(), ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::InvalidSecret(format!("{name} is not set")));
    }
    if secret.expose() == PLACEHOLDER {
        return Err(ConfigError::InvalidSecret(format!(
            "{name} still holds the template placeholder"
        )));
    }
    Ok(())
}
