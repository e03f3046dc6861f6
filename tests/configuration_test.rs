use event_forwarder::app::{Config, ConfigError, LogFormat, LogLevel};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "WAREHOUSE_API_ROOT",
    "WAREHOUSE_PIPE",
    "WAREHOUSE_TOKEN",
    "INGEST_ENDPOINT",
    "INGEST_WRITE_KEY",
    "CHECKPOINT_PATH",
    "INITIAL_CHECKPOINT",
    "ROW_LIMIT",
    "MAX_BATCH_BYTES",
    "MAX_RECORD_BYTES",
    "BATCH_SEND_DELAY_MS",
    "BATCH_SAMPLE_SIZE",
    "MAX_DELIVERY_ATTEMPTS",
    "RETRY_DELAY_MS",
    "REQUEST_TIMEOUT_SECS",
    "RUN_TIMEOUT_SECS",
    "USER_ID_FIELD",
    "EVENT_FIELD",
    "TIMESTAMP_FIELD",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "LOG_DIRECTIVES",
    "CONFIG_FILE",
];

fn clear_env() {
    for name in ENV_VARS {
        // SAFETY: env-touching tests are serialized with #[serial].
        unsafe { std::env::remove_var(name) };
    }
}

fn set_env(name: &str, value: &str) {
    // SAFETY: env-touching tests are serialized with #[serial].
    unsafe { std::env::set_var(name, value) };
}

#[test]
#[serial]
fn test_defaults_from_args() {
    clear_env();

    let config = Config::from_args([
        "event-forwarder",
        "--warehouse-token",
        "wh-token",
        "--write-key",
        "write-key",
    ])
    .unwrap();

    assert_eq!(config.row_limit, 5000);
    assert_eq!(config.max_batch_bytes, 512_000);
    assert_eq!(config.max_record_bytes, 32_768);
    assert_eq!(config.batch_sample_size, 50);
    assert_eq!(config.max_delivery_attempts, 3);
    assert_eq!(config.batch_send_delay, Duration::from_secs(1));
    assert_eq!(config.retry_delay, Duration::from_secs(1));
    assert_eq!(config.run_timeout, None);
    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(config.write_key.expose(), "write-key");
    assert_eq!(config.client_config().write_key, "write-key");
}

#[test]
#[serial]
fn test_cli_overrides() {
    clear_env();

    let config = Config::from_args([
        "event-forwarder",
        "--warehouse-token",
        "wh-token",
        "--write-key",
        "write-key",
        "--row-limit",
        "100",
        "--max-batch-bytes",
        "65536",
        "--max-record-bytes",
        "4096",
        "--batch-send-delay-ms",
        "250",
        "--run-timeout-secs",
        "60",
        "--initial-checkpoint",
        "-1",
        "--log-format",
        "json",
    ])
    .unwrap();

    assert_eq!(config.row_limit, 100);
    assert_eq!(config.batch_limits().max_batch_bytes, 65_536);
    assert_eq!(config.batch_limits().max_record_bytes, 4_096);
    assert_eq!(config.batch_send_delay, Duration::from_millis(250));
    assert_eq!(config.run_timeout, Some(Duration::from_secs(60)));
    assert_eq!(config.initial_checkpoint, -1);
    assert_eq!(config.log_format, LogFormat::Json);
}

#[test]
#[serial]
fn test_env_configuration() {
    clear_env();
    set_env("WAREHOUSE_TOKEN", "env-token");
    set_env("INGEST_WRITE_KEY", "env-key");
    set_env("WAREHOUSE_PIPE", "custom_pipe");
    set_env("MAX_DELIVERY_ATTEMPTS", "5");
    set_env("RETRY_DELAY_MS", "200");
    set_env("LOG_LEVEL", "DEBUG");
    set_env("EVENT_FIELD", "event_name");

    let config = Config::from_env().unwrap();
    assert_eq!(config.warehouse_pipe, "custom_pipe");
    assert_eq!(config.warehouse_config().token, "env-token");
    assert_eq!(config.retry_config().max_attempts, 5);
    assert_eq!(config.retry_config().retry_delay, Duration::from_millis(200));
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.field_mapping().event, "event_name");

    // clap reads the same variables
    let from_args = Config::from_args(["event-forwarder"]).unwrap();
    assert_eq!(from_args.warehouse_pipe, "custom_pipe");
    assert_eq!(from_args.max_delivery_attempts, 5);

    clear_env();
}

#[test]
#[serial]
fn test_invalid_env_value() {
    clear_env();
    set_env("WAREHOUSE_TOKEN", "env-token");
    set_env("INGEST_WRITE_KEY", "env-key");
    set_env("ROW_LIMIT", "lots");

    assert!(matches!(Config::from_env(), Err(ConfigError::EnvError(_))));

    clear_env();
}

#[test]
#[serial]
fn test_missing_credentials_fail_fast() {
    clear_env();

    assert!(matches!(
        Config::from_args(["event-forwarder", "--write-key", "k"]),
        Err(ConfigError::InvalidSecret(_))
    ));
    assert!(matches!(
        Config::from_args([
            "event-forwarder",
            "--warehouse-token",
            "<default_value>",
            "--write-key",
            "k"
        ]),
        Err(ConfigError::InvalidSecret(_))
    ));
}

#[test]
#[serial]
fn test_inconsistent_limits_fail_fast() {
    clear_env();

    let result = Config::from_args([
        "event-forwarder",
        "--warehouse-token",
        "t",
        "--write-key",
        "k",
        "--max-batch-bytes",
        "1000",
        "--max-record-bytes",
        "1000",
    ]);
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
#[serial]
fn test_config_file() {
    clear_env();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
warehouse_api_root = "http://localhost:7181"
warehouse_token = "file-token"
write_key = "file-key"
checkpoint_path = "/tmp/event-forwarder/last_ts"
row_limit = 250
batch_sample_size = 10
log_level = "warn"
log_format = "json"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.warehouse_api_root, "http://localhost:7181");
    assert_eq!(config.write_key.expose(), "file-key");
    assert_eq!(config.row_limit, 250);
    assert_eq!(config.batch_sample_size, 10);
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.log_format, LogFormat::Json);
    // Unset keys keep their defaults and derived fields are filled in.
    assert_eq!(config.max_batch_bytes, 500 * 1024);
    assert_eq!(config.request_timeout, Duration::from_secs(30));

    let args_path = file.path().to_string_lossy().to_string();
    let via_args =
        Config::from_args_or_file(["event-forwarder", "--config-file", args_path.as_str()])
            .unwrap();
    assert_eq!(via_args.row_limit, 250);
}

#[test]
#[serial]
fn test_config_file_keeps_env_secrets() {
    clear_env();
    set_env("WAREHOUSE_TOKEN", "env-token");
    set_env("INGEST_WRITE_KEY", "env-key");

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "row_limit = 10").unwrap();
    let path = file.path().to_string_lossy().to_string();

    let config =
        Config::from_args_or_file(["event-forwarder", "--config-file", path.as_str()]).unwrap();
    assert_eq!(config.row_limit, 10);
    assert_eq!(config.warehouse_token.expose(), "env-token");
    assert_eq!(config.write_key.expose(), "env-key");
    assert_eq!(config.config_file.as_deref(), Some(file.path()));

    clear_env();
}

#[test]
#[serial]
fn test_config_file_precedence() {
    clear_env();
    set_env("ROW_LIMIT", "20");
    set_env("MAX_DELIVERY_ATTEMPTS", "7");

    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
warehouse_token = "file-token"
write_key = "file-key"
row_limit = 10
max_delivery_attempts = 2
batch_sample_size = 5
retry_delay_ms = 300
"#
    )
    .unwrap();
    let path = file.path().to_string_lossy().to_string();

    let config = Config::from_args_or_file([
        "event-forwarder",
        "--config-file",
        path.as_str(),
        "--max-delivery-attempts",
        "9",
        "--write-key",
        "cli-key",
    ])
    .unwrap();

    // file < env < command line
    assert_eq!(config.batch_sample_size, 5);
    assert_eq!(config.retry_delay, Duration::from_millis(300));
    assert_eq!(config.row_limit, 20);
    assert_eq!(config.max_delivery_attempts, 9);
    assert_eq!(config.warehouse_token.expose(), "file-token");
    assert_eq!(config.write_key.expose(), "cli-key");

    clear_env();
}

#[test]
#[serial]
fn test_log_directives() {
    clear_env();
    set_env("WAREHOUSE_TOKEN", "env-token");
    set_env("INGEST_WRITE_KEY", "env-key");
    set_env("LOG_DIRECTIVES", "reqwest=debug, event_forwarder::reliability=trace,");

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.log_directives,
        vec!["reqwest=debug", "event_forwarder::reliability=trace"]
    );

    let config = Config::from_args([
        "event-forwarder",
        "--log-directives",
        "hyper=info,h2=debug",
    ])
    .unwrap();
    assert_eq!(config.log_directives, vec!["hyper=info", "h2=debug"]);

    clear_env();
}

#[test]
#[serial]
fn test_secrets_stay_out_of_debug_and_serialization() {
    clear_env();

    let config = Config::from_args([
        "event-forwarder",
        "--warehouse-token",
        "very-secret-token",
        "--write-key",
        "very-secret-key",
    ])
    .unwrap();

    let debug = format!("{config:?}");
    assert!(!debug.contains("very-secret"));

    let serialized = toml::to_string(&config).unwrap();
    assert!(!serialized.contains("very-secret"));
}
