//! Configuration module for the SignalFlow client
//!
//! This module handles client configuration:
//! - Realm and access token
//! - Optional stream URL override (for proxies and local test endpoints)
//! - Connect, receive and close timeouts
//!
//! # Sources
//!
//! Configuration is layered, later sources winning:
//!
//! 1. Built-in defaults (realm [`DEFAULT_REALM`])
//! 2. A TOML file, by default `config.toml` in the platform config directory
//!    under `signalflow-rs`:
//!    - **Linux**: `~/.config/signalflow-rs/`
//!    - **macOS**: `~/Library/Application Support/signalflow-rs/`
//!    - **Windows**: `%APPDATA%\signalflow-rs\`
//! 3. Environment variables [`ENV_TOKEN`], [`ENV_REALM`] and [`ENV_STREAM_URL`]
//!
//! # Example
//!
//! ```ignore
//! use signalflow_rs::config::ClientConfig;
//!
//! let config = ClientConfig::load_or_default(ClientConfig::default_path())
//!     .apply_env()
//!     .with_receive_timeout(std::time::Duration::from_secs(30));
//! config.validate()?;
//! ```

use crate::error::{Result, SignalFlowError};
use crate::transport::Endpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "signalflow-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Realm used when nothing else is configured
pub const DEFAULT_REALM: &str = "us0";

/// Environment variable holding the access token
pub const ENV_TOKEN: &str = "O11Y_TOKEN";

/// Environment variable holding the realm
pub const ENV_REALM: &str = "O11Y_REALM";

/// Environment variable overriding the stream URL
pub const ENV_STREAM_URL: &str = "SIGNALFLOW_STREAM_URL";

/// Default timeout for opening and authenticating the channel in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time to wait for one frame in milliseconds
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 60_000;

/// Default budget for best-effort close frames in milliseconds
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;

/// Number of token characters that may appear in logs
const TOKEN_PREVIEW_LEN: usize = 5;

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Client configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Realm (deployment region) of the organization
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Access token used to authenticate the stream
    #[serde(default)]
    pub token: String,

    /// Full stream URL, overriding the one derived from the realm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,

    /// Timeout for opening and authenticating the channel
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum time `next()` waits for one frame
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Budget for sending detach/stop frames while closing
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_close_timeout_ms() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            realm: default_realm(),
            token: String::new(),
            stream_url: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("realm", &self.realm)
            .field("token", &format_args!("{}...", self.token_preview()))
            .field("stream_url", &self.stream_url)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("receive_timeout_ms", &self.receive_timeout_ms)
            .field("close_timeout_ms", &self.close_timeout_ms)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration for a token and realm with default timeouts
    pub fn new(token: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            realm: realm.into(),
            ..Self::default()
        }
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        default_config_path().unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SignalFlowError::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            SignalFlowError::Configuration(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load configuration, returning defaults if the file is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SignalFlowError::Configuration(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            SignalFlowError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            SignalFlowError::Configuration(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Override fields from the process environment
    pub fn apply_env(mut self) -> Self {
        if let Some(token) = env_var(ENV_TOKEN) {
            self.token = token;
        }
        if let Some(realm) = env_var(ENV_REALM) {
            self.realm = realm;
        }
        if let Some(url) = env_var(ENV_STREAM_URL) {
            self.stream_url = Some(url);
        }
        self
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Set the stream URL override
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the receive timeout
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the close timeout
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Receive timeout as a Duration
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Close timeout as a Duration
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// The endpoint this configuration points at
    pub fn endpoint(&self) -> Endpoint {
        match &self.stream_url {
            Some(url) => Endpoint::with_url(self.realm.clone(), url.clone()),
            None => Endpoint::for_realm(self.realm.clone()),
        }
    }

    /// The first few characters of the token, safe to log
    pub fn token_preview(&self) -> &str {
        let end = self
            .token
            .char_indices()
            .nth(TOKEN_PREVIEW_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.token.len());
        &self.token[..end]
    }

    /// Check that the configuration can be used to connect
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(SignalFlowError::Configuration(
                "access token must not be empty".to_string(),
            ));
        }
        if self.token.chars().any(char::is_whitespace) {
            return Err(SignalFlowError::Configuration(
                "access token must not contain whitespace".to_string(),
            ));
        }
        if self.realm.is_empty() {
            return Err(SignalFlowError::Configuration(
                "realm must not be empty".to_string(),
            ));
        }
        if !self
            .realm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(SignalFlowError::Configuration(format!(
                "realm '{}' must contain only lowercase letters, digits and '-'",
                self.realm
            )));
        }
        if let Some(url) = &self.stream_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(SignalFlowError::Configuration(format!(
                    "stream URL '{}' must use ws:// or wss://",
                    url
                )));
            }
        }
        if self.receive_timeout_ms == 0 || self.connect_timeout_ms == 0 || self.close_timeout_ms == 0
        {
            return Err(SignalFlowError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.realm, DEFAULT_REALM);
        assert!(config.token.is_empty());
        assert_eq!(config.receive_timeout(), Duration::from_secs(60));
        assert_eq!(config.close_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_empty_token() {
        let err = ClientConfig::new("", "us1").validate().unwrap_err();
        assert!(matches!(err, SignalFlowError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_realm() {
        assert!(ClientConfig::new("tok", "").validate().is_err());
        assert!(ClientConfig::new("tok", "US 1").validate().is_err());
        assert!(ClientConfig::new("tok", "us1").validate().is_ok());
        assert!(ClientConfig::new("tok", "eu-west-2").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = ClientConfig::new("tok", "us1");
        assert!(config.clone().with_close_timeout(Duration::ZERO).validate().is_err());
        assert!(config.clone().with_receive_timeout(Duration::ZERO).validate().is_err());
        assert!(config.with_connect_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_http_url() {
        let config = ClientConfig::new("tok", "us1").with_stream_url("http://localhost");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_override() {
        let config = ClientConfig::new("tok", "us1");
        assert_eq!(
            config.endpoint().url,
            "wss://stream.us1.signalfx.com/v2/signalflow/connect"
        );

        let config = config.with_stream_url("ws://127.0.0.1:8080/connect");
        assert_eq!(config.endpoint().url, "ws://127.0.0.1:8080/connect");
        assert_eq!(config.endpoint().realm, "us1");
    }

    #[test]
    fn test_token_preview_and_debug() {
        let config = ClientConfig::new("abcdefghijkl", "us1");
        assert_eq!(config.token_preview(), "abcde");
        let debug = format!("{:?}", config);
        assert!(debug.contains("abcde..."));
        assert!(!debug.contains("abcdefghijkl"));

        assert_eq!(ClientConfig::new("ab", "us1").token_preview(), "ab");
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let config: ClientConfig = toml::from_str("token = \"xyz\"\n").unwrap();
        assert_eq!(config.token, "xyz");
        assert_eq!(config.realm, DEFAULT_REALM);
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }
}
