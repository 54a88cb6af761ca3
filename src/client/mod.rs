//! SignalFlow client
//!
//! The [`Client`] owns one connection to the SignalFlow streaming endpoint and
//! every computation started through it. The connection is opened lazily, on the
//! first [`Client::execute`] (or an explicit [`Client::connect`]), and is never
//! re-established behind the caller's back: once it dies, further executes fail.
//!
//! # Architecture
//!
//! ```text
//! Client ──execute──> Connection.sink ──> transport
//!                                           │
//! Computation <── per-channel queue <── FrameRouter
//! ```
//!
//! # Example
//!
//! ```ignore
//! use signalflow_rs::Client;
//!
//! let client = Client::new(token, "us1")?;
//! let computation = client
//!     .execute("data('cpu.utilization').mean().publish()", start, end, 60_000)
//!     .await?;
//! let result = computation.collect().await?;
//! client.close().await?;
//! ```

pub(crate) mod connection;
pub(crate) mod router;

use crate::computation::{Computation, ExecuteRequest, SessionRegistry};
use crate::config::ClientConfig;
use crate::error::{Result, SignalFlowError};
use crate::protocol::Request;
use crate::transport::{Connector, WebSocketConnector};
use connection::Connection;
use std::fmt;
use std::sync::Arc;

enum ClientState {
    /// No connection opened yet
    Idle,
    Connected(Arc<Connection>),
    Closed,
}

/// Entry point for running SignalFlow computations
pub struct Client {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: tokio::sync::Mutex<ClientState>,
    sessions: Arc<SessionRegistry>,
}

impl Client {
    /// Create a client for a token and realm
    ///
    /// Nothing is sent until the first computation is executed.
    ///
    /// # Errors
    ///
    /// `Configuration` if the token is empty or the realm is malformed.
    pub fn new(token: impl Into<String>, realm: impl Into<String>) -> Result<Self> {
        Self::with_config(ClientConfig::new(token, realm))
    }

    /// Create a client from a full configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketConnector::new()))
    }

    /// Create a client that opens its channel through `connector`
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            "Created client for realm {} (token {}...)",
            config.realm,
            config.token_preview()
        );
        Ok(Self {
            config,
            connector,
            state: tokio::sync::Mutex::new(ClientState::Idle),
            sessions: Arc::new(SessionRegistry::default()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open and authenticate the connection now rather than on first execute
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_connection(&mut state).await.map(|_| ())
    }

    /// Whether a live connection is currently held
    pub async fn is_connected(&self) -> bool {
        match &*self.state.lock().await {
            ClientState::Connected(connection) => connection.dead_reason().is_none(),
            _ => false,
        }
    }

    /// Number of sessions not yet closed
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Start a computation
    ///
    /// `start` and `end` are epoch milliseconds, passed through unchanged.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `resolution_ms` is not positive; nothing is sent
    /// - `Transport` if the connection cannot be opened or has died
    /// - `ClientClosed` after [`close`](Self::close)
    pub async fn execute(
        &self,
        program: impl Into<String>,
        start: i64,
        end: i64,
        resolution_ms: i64,
    ) -> Result<Computation> {
        self.execute_request(ExecuteRequest::new(program, start, end, resolution_ms))
            .await
    }

    /// Start a computation from a full request
    pub async fn execute_request(&self, request: ExecuteRequest) -> Result<Computation> {
        request.validate()?;

        let mut state = self.state.lock().await;
        let connection = self.ensure_connection(&mut state).await?;

        let channel = connection.allocate_channel();
        let inbound = connection.register(&channel)?;

        let execute = Request::Execute(request.to_frame(channel.clone()));
        if let Err(e) = connection.send(&execute).await {
            connection.deregister(&channel);
            return Err(e.with_context(format!("failed to start computation on {}", channel)));
        }
        tracing::info!(
            "Started computation on {} ({} .. {}, resolution {} ms)",
            channel,
            request.start,
            request.end,
            request.resolution_ms
        );

        Ok(Computation::running(
            channel,
            request,
            connection,
            self.sessions.clone(),
            inbound,
            self.config.receive_timeout(),
            self.config.close_timeout(),
        ))
    }

    async fn ensure_connection(&self, state: &mut ClientState) -> Result<Arc<Connection>> {
        if let ClientState::Idle = state {
            let connection =
                Arc::new(Connection::establish(self.connector.as_ref(), &self.config).await?);
            *state = ClientState::Connected(connection.clone());
            return Ok(connection);
        }

        match &*state {
            ClientState::Connected(connection) => match connection.dead_reason() {
                Some(reason) => Err(SignalFlowError::Transport(format!(
                    "connection to {} is no longer usable: {}",
                    connection.endpoint(),
                    reason
                ))),
                None => Ok(connection.clone()),
            },
            ClientState::Idle | ClientState::Closed => Err(SignalFlowError::ClientClosed),
        }
    }

    /// Close every session, then the connection
    ///
    /// Errors while closing sessions are logged; the result reports how closing
    /// the transport went. Calling this again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, ClientState::Closed);

        let sessions = self.sessions.drain();
        if !sessions.is_empty() {
            tracing::debug!("Closing {} open computations", sessions.len());
        }
        for session in sessions {
            session.close().await;
        }

        match previous {
            ClientState::Connected(connection) => {
                connection.close(self.config.close_timeout()).await
            }
            ClientState::Idle => Ok(()),
            ClientState::Closed => {
                tracing::trace!("Client already closed");
                Ok(())
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for session in self.sessions.drain() {
            session.close_now();
        }
        if let Ok(mut state) = self.state.try_lock() {
            if let ClientState::Connected(connection) =
                std::mem::replace(&mut *state, ClientState::Closed)
            {
                connection.shutdown_now();
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("open_sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
