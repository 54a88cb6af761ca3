//! Tests for loading client configuration from files and the environment

use serial_test::serial;
use signalflow_rs::config::{ENV_REALM, ENV_STREAM_URL, ENV_TOKEN};
use signalflow_rs::{Client, ClientConfig, SignalFlowError};
use std::time::Duration;
use tempfile::TempDir;

fn clear_env() {
    std::env::remove_var(ENV_TOKEN);
    std::env::remove_var(ENV_REALM);
    std::env::remove_var(ENV_STREAM_URL);
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let config = ClientConfig::new("abcdefgh", "eu0")
        .with_receive_timeout(Duration::from_secs(5))
        .with_stream_url("ws://127.0.0.1:9000/connect");
    config.save(&path).unwrap();

    let loaded = ClientConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.receive_timeout(), Duration::from_secs(5));
}

#[test]
fn test_load_missing_file_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let err = ClientConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SignalFlowError::Configuration(_)));
}

#[test]
fn test_load_or_default_tolerates_bad_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "realm = [not toml").unwrap();

    assert!(ClientConfig::load(&path).is_err());
    assert_eq!(ClientConfig::load_or_default(&path), ClientConfig::default());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "realm = \"us1\"\ntoken = \"fromfile\"\n").unwrap();

    std::env::set_var(ENV_TOKEN, "fromenv123");
    let config = ClientConfig::load(&path).unwrap().apply_env();
    clear_env();

    assert_eq!(config.token, "fromenv123");
    assert_eq!(config.realm, "us1");
}

#[test]
#[serial]
fn test_from_env_defaults_realm() {
    clear_env();
    std::env::set_var(ENV_TOKEN, "envtoken");
    let config = ClientConfig::from_env();
    clear_env();

    assert_eq!(config.realm, "us0");
    assert_eq!(
        config.endpoint().url,
        "wss://stream.us0.signalfx.com/v2/signalflow/connect"
    );
    assert!(Client::with_config(config).is_ok());
}

#[test]
#[serial]
fn test_from_env_reads_realm_and_url() {
    clear_env();
    std::env::set_var(ENV_TOKEN, "envtoken");
    std::env::set_var(ENV_REALM, "jp0");
    std::env::set_var(ENV_STREAM_URL, "ws://localhost:8080/v2/signalflow/connect");
    let config = ClientConfig::from_env();
    clear_env();

    assert_eq!(config.realm, "jp0");
    assert_eq!(config.endpoint().url, "ws://localhost:8080/v2/signalflow/connect");
}

#[test]
#[serial]
fn test_missing_token_fails_client_creation() {
    clear_env();
    let err = Client::with_config(ClientConfig::from_env()).unwrap_err();
    assert!(matches!(err, SignalFlowError::Configuration(_)));
}
