// Integration tests for loading configuration files from disk

use chronolens::config::load_config;
use chronolens::resilience::RetryPolicy;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[retry]
max_retries = 2
base_delay_ms = 100
jitter_ms = 0

[lazy]
visibility_threshold = 0.6

[server]
port = 8080

[[pregeneration.catalog]]
id = "petra"
name = "Petra"
location = "Ma'an, Jordan"
"#
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();

    assert_eq!(config.server.port, 8080);
    assert_eq!(config.lazy.visibility_threshold, 0.6);
    // Unset values keep their defaults
    assert_eq!(config.lazy.panoramic_visibility_threshold, 1.0);
    assert_eq!(config.pipeline.event_count, 4);

    let catalog = config.pregeneration.catalog();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].id, "petra");

    let policy = RetryPolicy::from(&config.retry);
    assert_eq!(
        policy.backoff_schedule(),
        vec![Duration::from_millis(100), Duration::from_millis(150)]
    );
}

#[test]
fn test_missing_file_is_an_error() {
    let err = load_config(std::path::Path::new("/nonexistent/chronolens.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[retry\nmax_retries = ").unwrap();

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config TOML"));
}
