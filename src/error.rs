//! Error handling for the SignalFlow client
//!
//! This module defines the error taxonomy shared by the client, its computation
//! sessions and the transports, together with a Result alias.
//!
//! Errors are `Clone`: a session that has failed stores the error it observed and
//! hands the same value back on every later access.

use thiserror::Error;

/// Main error type for SignalFlow client operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalFlowError {
    /// Bad token, realm or configuration file
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A request argument was rejected before anything was sent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection-level fault (unreachable, reset, handshake failure, premature close)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded into a protocol message
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// No frame arrived within the receive budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The remote computation reported an error
    #[error("Service error{}: {message}", fmt_code(.code))]
    Service {
        /// Numeric error code sent by the service, if any
        code: Option<i64>,
        /// Human readable description
        message: String,
    },

    /// Operation attempted on a closed computation session
    #[error("Session closed")]
    SessionClosed,

    /// Operation attempted on a closed client
    #[error("Client closed")]
    ClientClosed,

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SignalFlowError>,
    },
}

impl SignalFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SignalFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with any context layers stripped
    pub fn root(&self) -> &SignalFlowError {
        match self {
            SignalFlowError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error (ignoring context) is a receive timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), SignalFlowError::Timeout(_))
    }

    /// Whether this error (ignoring context) is a closed session
    pub fn is_session_closed(&self) -> bool {
        matches!(self.root(), SignalFlowError::SessionClosed)
    }
}

fn fmt_code(code: &Option<i64>) -> String {
    code.map(|c| format!(" {}", c)).unwrap_or_default()
}

impl From<std::io::Error> for SignalFlowError {
    fn from(err: std::io::Error) -> Self {
        SignalFlowError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SignalFlowError {
    fn from(err: serde_json::Error) -> Self {
        SignalFlowError::ProtocolDecode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalFlowError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalFlowError::Transport(err.to_string())
    }
}

/// Result type alias for SignalFlow client operations
pub type Result<T> = std::result::Result<T, SignalFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
