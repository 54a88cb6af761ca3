//! Computation sessions
//!
//! A [`Computation`] is the client-side view of one SignalFlow program execution.
//! It reads the frames the router queued for its channel, decodes them and moves
//! through its lifecycle:
//!
//! ```text
//! Created -> Running -> Completed
//!                    -> Errored
//!        (any state) -> Closed
//! ```
//!
//! `Completed`, `Errored` and `Closed` are sticky: once a session reached one of
//! them, every later [`Computation::next`] reports the same outcome.
//!
//! # Example
//!
//! ```ignore
//! let computation = client.execute("data('cpu.utilization').publish()", start, end, 60_000).await?;
//! while let Some(message) = computation.next().await? {
//!     println!("{}", message.kind());
//! }
//! computation.close().await;
//! ```

pub mod aggregator;
pub mod request;

pub use aggregator::ResultAggregator;
pub use request::ExecuteRequest;

use crate::client::connection::Connection;
use crate::client::router::Delivery;
use crate::error::{Result, SignalFlowError};
use crate::protocol::{codec, ControlEvent, Message, Request};
use crate::types::{CollectedResult, Properties};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Lifecycle state of a computation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Allocated, execute request not yet sent
    Created,
    /// Execute request sent, messages may arrive
    Running,
    /// End of channel received
    Completed,
    /// The session failed; the error is kept
    Errored,
    /// Closed by the caller or by the client
    Closed,
}

impl SessionState {
    /// Whether no further messages will be delivered
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Created | SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct SessionStatus {
    state: SessionState,
    error: Option<SignalFlowError>,
    /// The error arrived on this session's own channel, so the job is over
    ended_by_service: bool,
    handle: Option<String>,
    resolution_ms: Option<i64>,
    metadata: HashMap<String, Properties>,
}

/// Sessions a client still has to close, keyed by channel
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Weak<SessionShared>>>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Weak<SessionShared>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, session: &Arc<SessionShared>) {
        self.lock()
            .insert(session.channel.clone(), Arc::downgrade(session));
    }

    fn remove(&self, channel: &str) {
        self.lock().remove(channel);
    }

    /// Take every live session out of the registry
    pub fn drain(&self) -> Vec<Arc<SessionShared>> {
        self.lock()
            .drain()
            .filter_map(|(_, session)| session.upgrade())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// State shared between a [`Computation`] handle and the client that started it
pub(crate) struct SessionShared {
    channel: String,
    request: ExecuteRequest,
    connection: Arc<Connection>,
    registry: Arc<SessionRegistry>,
    status: Mutex<SessionStatus>,
    inbound: tokio::sync::Mutex<UnboundedReceiver<Delivery>>,
    receive_timeout: Duration,
    close_timeout: Duration,
}

impl SessionShared {
    fn status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> SessionState {
        self.status().state
    }

    /// The outcome every later `next()` reports, if the session is settled
    fn settled(&self) -> Option<Result<Option<Message>>> {
        let status = self.status();
        match status.state {
            SessionState::Closed => Some(Err(SignalFlowError::SessionClosed)),
            SessionState::Completed => Some(Ok(None)),
            SessionState::Errored => Some(Err(status
                .error
                .clone()
                .unwrap_or_else(|| SignalFlowError::Transport("session failed".to_string())))),
            SessionState::Created | SessionState::Running => None,
        }
    }

    /// Move to `Errored` and hand the error back
    ///
    /// A session that was closed meanwhile stays closed. The route is dropped
    /// so nothing queues up behind a failed session, but the registry entry
    /// stays until close so the channel can still be detached.
    fn fail(&self, error: SignalFlowError) -> SignalFlowError {
        self.settle_error(error, false)
    }

    /// Like [`fail`](Self::fail), for an error the service sent on this channel
    fn fail_by_service(&self, error: SignalFlowError) -> SignalFlowError {
        self.settle_error(error, true)
    }

    fn settle_error(&self, error: SignalFlowError, ended_by_service: bool) -> SignalFlowError {
        {
            let mut status = self.status();
            match status.state {
                SessionState::Closed => return SignalFlowError::SessionClosed,
                SessionState::Errored | SessionState::Completed => {
                    return status
                        .error
                        .clone()
                        .unwrap_or(SignalFlowError::SessionClosed)
                }
                SessionState::Created | SessionState::Running => {
                    tracing::warn!("Computation on {} failed: {}", self.channel, error);
                    status.state = SessionState::Errored;
                    status.error = Some(error.clone());
                    status.ended_by_service = ended_by_service;
                }
            }
        }
        self.connection.deregister(&self.channel);
        error
    }

    /// Read one message, assuming the caller holds the inbound queue
    async fn next_locked(
        &self,
        inbound: &mut UnboundedReceiver<Delivery>,
    ) -> Result<Option<Message>> {
        if let Some(outcome) = self.settled() {
            return outcome;
        }

        let delivery = match tokio::time::timeout(self.receive_timeout, inbound.recv()).await {
            Err(_) => {
                return Err(self.fail(SignalFlowError::Timeout(format!(
                    "no message on channel {} within {:?}",
                    self.channel, self.receive_timeout
                ))))
            }
            Ok(None) => {
                if self.state() == SessionState::Closed {
                    return Err(SignalFlowError::SessionClosed);
                }
                return Err(self.fail(SignalFlowError::Transport(
                    "connection closed before end of stream".to_string(),
                )));
            }
            Ok(Some(delivery)) => delivery,
        };

        if self.state() == SessionState::Closed {
            return Err(SignalFlowError::SessionClosed);
        }

        match delivery {
            Delivery::Fault(error) => Err(self.fail(error)),
            Delivery::Frame(frame) => match codec::decode(&frame) {
                Ok(inbound) => self.observe(inbound.message),
                Err(e) => {
                    let error = match e.root() {
                        SignalFlowError::ProtocolDecode(_) => e,
                        other => SignalFlowError::ProtocolDecode(other.to_string()),
                    };
                    Err(self.fail(error))
                }
            },
        }
    }

    /// Apply a decoded message to the session state
    fn observe(&self, message: Message) -> Result<Option<Message>> {
        let failure = {
            let mut status = self.status();
            match &message {
                Message::ControlMessage(control) => match control.event {
                    ControlEvent::JobStart => {
                        status.handle = control.handle.clone();
                        tracing::debug!(
                            "Computation on {} started (handle {})",
                            self.channel,
                            control.handle.as_deref().unwrap_or("none")
                        );
                        None
                    }
                    ControlEvent::ChannelAbort => {
                        let reason = control
                            .abort_info
                            .as_ref()
                            .and_then(|info| info.get("sf_job_abortReason"))
                            .and_then(|reason| reason.as_str())
                            .unwrap_or("computation aborted")
                            .to_string();
                        Some(SignalFlowError::Service {
                            code: None,
                            message: reason,
                        })
                    }
                    ControlEvent::EndOfChannel => {
                        if status.state == SessionState::Running {
                            status.state = SessionState::Completed;
                        }
                        tracing::debug!("Computation on {} completed", self.channel);
                        None
                    }
                    _ => None,
                },
                Message::Info(info) => {
                    if let Some(resolution) = info.running_resolution_ms() {
                        status.resolution_ms = Some(resolution);
                    }
                    None
                }
                Message::Metadata(meta) => {
                    status
                        .metadata
                        .insert(meta.ts_id.clone(), meta.properties.clone());
                    None
                }
                Message::Error(error) => Some(SignalFlowError::Service {
                    code: error.error,
                    message: error.description(),
                }),
                _ => None,
            }
        };

        if let Some(error) = failure {
            return Err(self.fail_by_service(error));
        }
        if message.is_end() {
            self.connection.deregister(&self.channel);
        }
        Ok(Some(message))
    }

    /// Drop the route and the registry entry; safe to call repeatedly
    fn release(&self) {
        self.connection.deregister(&self.channel);
        self.registry.remove(&self.channel);
    }

    /// Mark closed without any network traffic
    fn mark_closed(&self) -> (SessionState, bool) {
        let previous = {
            let mut status = self.status();
            let previous = (status.state, status.ended_by_service);
            status.state = SessionState::Closed;
            previous
        };
        self.release();
        previous
    }

    pub(crate) async fn close(&self) {
        let (previous, ended_by_service) = self.mark_closed();
        if previous == SessionState::Closed {
            return;
        }

        if needs_detach(previous, ended_by_service) {
            self.detach().await;
        }
        tracing::debug!("Closed computation on {} (was {})", self.channel, previous);
    }

    /// Close without detaching, for use from `Drop`
    pub(crate) fn close_now(&self) {
        self.mark_closed();
    }

    async fn detach(&self) {
        if let Some(reason) = self.connection.dead_reason() {
            tracing::debug!("Not detaching {}: {}", self.channel, reason);
            return;
        }
        let request = Request::Detach {
            channel: self.channel.clone(),
            reason: Some("closed by client".to_string()),
        };
        match tokio::time::timeout(self.close_timeout, self.connection.send(&request)).await {
            Ok(Ok(())) => tracing::debug!("Detached from {}", self.channel),
            Ok(Err(e)) => tracing::warn!("Failed to detach from {}: {}", self.channel, e),
            Err(_) => tracing::warn!(
                "Timed out after {:?} detaching from {}",
                self.close_timeout,
                self.channel
            ),
        }
    }
}

/// Whether the service may still be streaming into the channel
///
/// Only an error or abort on the session's own channel ends the job; timeouts,
/// decode failures and connection-level errors leave it running. A dead
/// connection is checked separately in `detach`.
fn needs_detach(previous: SessionState, ended_by_service: bool) -> bool {
    match previous {
        SessionState::Running => true,
        SessionState::Errored => !ended_by_service,
        _ => false,
    }
}

/// A running SignalFlow computation
///
/// Obtained from [`Client::execute`](crate::Client::execute). Only one `next()` or
/// `collect()` runs at a time per session; concurrent callers wait their turn.
/// Dropping the handle releases its channel without detaching.
pub struct Computation {
    shared: Arc<SessionShared>,
}

impl Computation {
    /// Wire up a session whose execute request has been sent
    pub(crate) fn running(
        channel: String,
        request: ExecuteRequest,
        connection: Arc<Connection>,
        registry: Arc<SessionRegistry>,
        inbound: UnboundedReceiver<Delivery>,
        receive_timeout: Duration,
        close_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            channel,
            request,
            connection,
            registry: registry.clone(),
            status: Mutex::new(SessionStatus {
                state: SessionState::Running,
                error: None,
                ended_by_service: false,
                handle: None,
                resolution_ms: None,
                metadata: HashMap::new(),
            }),
            inbound: tokio::sync::Mutex::new(inbound),
            receive_timeout,
            close_timeout,
        });
        registry.insert(&shared);
        Self { shared }
    }

    /// Next message for this computation
    ///
    /// Returns `Ok(None)` once the end of the channel was delivered. The end
    /// control message itself is returned first.
    ///
    /// # Errors
    ///
    /// - `Timeout` if nothing arrives within the receive timeout
    /// - `ProtocolDecode` for a frame that does not decode
    /// - `Service` for an error message or an aborted computation
    /// - `Transport` if the connection ends before the end of the channel
    /// - `SessionClosed` once the session is closed, including while waiting
    ///
    /// Errors are sticky: every later call returns the same error.
    pub async fn next(&self) -> Result<Option<Message>> {
        if let Some(outcome) = self.shared.settled() {
            return outcome;
        }
        let mut inbound = self.shared.inbound.lock().await;
        self.shared.next_locked(&mut inbound).await
    }

    /// Drain the computation into per-series results
    ///
    /// Reads until the end of the channel. On any error the partial data is
    /// discarded and the error returned.
    pub async fn collect(&self) -> Result<CollectedResult> {
        let mut inbound = self.shared.inbound.lock().await;
        let mut aggregator = ResultAggregator::new();
        while let Some(message) = self.shared.next_locked(&mut inbound).await? {
            aggregator.ingest(&message);
        }
        tracing::debug!(
            "Collected {} points over {} messages on {}",
            aggregator.point_count(),
            aggregator.message_count(),
            self.shared.channel
        );
        Ok(aggregator.finish())
    }

    /// Close the session
    ///
    /// Detaches from the channel if the service may still be streaming, bounded
    /// by the close timeout. Failures are logged, never returned. Idempotent.
    pub async fn close(&self) {
        self.shared.close().await;
    }

    /// Stop the computation on the service side, then close
    ///
    /// Without a known job handle this is the same as [`close`](Self::close).
    pub async fn stop(&self, reason: Option<&str>) -> Result<()> {
        let (state, handle) = {
            let status = self.shared.status();
            (status.state, status.handle.clone())
        };
        if state == SessionState::Closed {
            return Err(SignalFlowError::SessionClosed);
        }

        let mut result = Ok(());
        match handle {
            Some(handle) if !state.is_terminal() => {
                let request = Request::Stop {
                    handle,
                    reason: reason.map(str::to_string),
                };
                result = self.shared.connection.send(&request).await;
                if let Err(e) = &result {
                    tracing::warn!("Failed to stop computation on {}: {}", self.shared.channel, e);
                }
            }
            _ => tracing::debug!("No running job to stop on {}", self.shared.channel),
        }

        self.close().await;
        result
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Channel name correlating this session's frames
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn request(&self) -> &ExecuteRequest {
        &self.shared.request
    }

    /// Job handle, known once the computation started
    pub fn handle(&self) -> Option<String> {
        self.shared.status().handle.clone()
    }

    /// Resolution the service actually runs the computation at
    pub fn resolution_ms(&self) -> Option<i64> {
        self.shared.status().resolution_ms
    }

    /// Latest metadata seen for a series
    pub fn metadata(&self, tsid: &str) -> Option<Properties> {
        self.shared.status().metadata.get(tsid).cloned()
    }

    /// The error that moved the session to `Errored`
    pub fn error(&self) -> Option<SignalFlowError> {
        self.shared.status().error.clone()
    }
}

impl Drop for Computation {
    fn drop(&mut self) {
        if self.shared.state() != SessionState::Closed {
            tracing::debug!("Computation on {} dropped without close", self.shared.channel);
        }
        self.shared.close_now();
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("channel", &self.shared.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
