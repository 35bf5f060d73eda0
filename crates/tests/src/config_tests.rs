//! Layered configuration: TOML file plus environment overrides.

use nectar_core::config::{AppConfig, SourceKind};
use serial_test::serial;
use std::io::Write;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn file_values_override_defaults() {
    let file = write_config(
        r#"
environment = "production"

[server]
bind_port = 9000

[oracle]
freshness_seconds = 120

[[oracle.sources]]
name = "venus"
kind = "lending"
url = "https://venus.example/pools"
"#,
    );

    let config = AppConfig::from_file(file.path()).unwrap();
    assert_eq!(config.environment, "production");
    assert_eq!(config.server.bind_port, 9000);
    assert_eq!(config.oracle.freshness_seconds, 120);
    assert_eq!(config.oracle.sources.len(), 1);
    assert_eq!(config.oracle.sources[0].kind, SourceKind::Lending);
    // Untouched sections keep their defaults.
    assert_eq!(config.cache.default_ttl_seconds, 300);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn env_vars_override_file_values() {
    let file = write_config(
        r#"
[server]
bind_port = 9000
"#,
    );

    std::env::set_var("NECTAR__SERVER__BIND_PORT", "9100");
    std::env::set_var("NECTAR__CACHE__DEFAULT_TTL_SECONDS", "600");
    let config = AppConfig::from_file(file.path()).unwrap();
    std::env::remove_var("NECTAR__SERVER__BIND_PORT");
    std::env::remove_var("NECTAR__CACHE__DEFAULT_TTL_SECONDS");

    assert_eq!(config.server.bind_port, 9100, "env beats file");
    assert_eq!(config.cache.default_ttl_seconds, 600, "env beats defaults");
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let config = AppConfig::from_file("/nonexistent/nectar.toml").unwrap();
    assert_eq!(config.server.bind_port, 4020);
    assert!(!config.oracle.sources.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn invalid_source_urls_fail_validation() {
    let file = write_config(
        r#"
[[oracle.sources]]
name = "bad"
kind = "price"
url = "not-a-url"
"#,
    );

    let config = AppConfig::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}
