//! An authenticated SignalFlow connection
//!
//! Wraps the sending half of a channel behind an async mutex, and the receiving
//! half behind the [`FrameRouter`] task. Shared by the client and every session it
//! starts.

use super::router::{Delivery, FrameRouter, RouteTable};
use crate::config::ClientConfig;
use crate::error::{Result, ResultExt, SignalFlowError};
use crate::protocol::{codec, Message, Request};
use crate::transport::{Channel, Connector, Endpoint, FrameSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub(crate) struct Connection {
    endpoint: Endpoint,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    routes: Arc<RouteTable>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    router: Mutex<Option<JoinHandle<()>>>,
    next_channel: AtomicU64,
}

impl Connection {
    /// Open a channel, authenticate and start routing
    pub async fn establish(connector: &dyn Connector, config: &ClientConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        tracing::info!(
            "Connecting to {} (realm {}, token {}...)",
            endpoint,
            endpoint.realm,
            config.token_preview()
        );

        let handshake = authenticate(connector, &endpoint, &config.token);
        let channel = tokio::time::timeout(config.connect_timeout(), handshake)
            .await
            .map_err(|_| {
                SignalFlowError::Transport(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout(),
                    endpoint
                ))
            })??;

        let routes = Arc::new(RouteTable::new());
        let (shutdown, router) = FrameRouter::spawn(channel.source, routes.clone());
        tracing::info!("Connected to {}", endpoint);

        Ok(Self {
            endpoint,
            sink: tokio::sync::Mutex::new(channel.sink),
            routes,
            shutdown: Mutex::new(Some(shutdown)),
            router: Mutex::new(Some(router)),
            next_channel: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Allocate a fresh channel name for an execute request
    pub fn allocate_channel(&self) -> String {
        format!("R{}", self.next_channel.fetch_add(1, Ordering::SeqCst))
    }

    pub fn register(&self, channel: &str) -> Result<UnboundedReceiver<Delivery>> {
        self.routes.register(channel)
    }

    pub fn deregister(&self, channel: &str) -> bool {
        self.routes.deregister(channel)
    }

    /// Why the connection can no longer be used, if it can't
    pub fn dead_reason(&self) -> Option<SignalFlowError> {
        self.routes.dead_reason()
    }

    /// Send one request; concurrent sends are serialized
    pub async fn send(&self, request: &Request) -> Result<()> {
        let frame = codec::encode(request)?;
        tracing::debug!("Sending {} request ({} bytes)", request.kind(), frame.len());
        let mut sink = self.sink.lock().await;
        sink.send(frame).await
    }

    /// Stop routing and close the transport, bounded by `timeout`
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        self.routes.shut_down(SignalFlowError::ClientClosed);
        self.stop_router();

        let result = match tokio::time::timeout(timeout, async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SignalFlowError::Transport(format!(
                "timed out after {:?} closing connection to {}",
                timeout, self.endpoint
            ))),
        };

        let router = self.take_router();
        if let Some(router) = router {
            if tokio::time::timeout(timeout, router).await.is_err() {
                tracing::warn!("Frame router did not stop in time");
            }
        }

        match &result {
            Ok(()) => tracing::info!("Disconnected from {}", self.endpoint),
            Err(e) => tracing::warn!("Error closing connection to {}: {}", self.endpoint, e),
        }
        result
    }

    /// Tear down without waiting, for use from `Drop`
    pub fn shutdown_now(&self) {
        self.routes.shut_down(SignalFlowError::ClientClosed);
        self.stop_router();
        if let Some(router) = self.take_router() {
            router.abort();
        }
    }

    fn stop_router(&self) {
        let trigger = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(trigger) = trigger {
            let _ = trigger.send(());
        }
    }

    fn take_router(&self) -> Option<JoinHandle<()>> {
        self.router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(router) = self.take_router() {
            router.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("sessions", &self.routes.len())
            .finish_non_exhaustive()
    }
}

/// Open a channel and run the authenticate handshake on it
async fn authenticate(connector: &dyn Connector, endpoint: &Endpoint, token: &str) -> Result<Channel> {
    let mut channel = connector
        .open(endpoint)
        .await
        .with_context(|| format!("failed to open channel to {}", endpoint))?;

    let request = Request::Authenticate {
        token: token.to_string(),
    };
    channel.sink.send(codec::encode(&request)?).await?;

    loop {
        let frame = channel.source.receive().await?.ok_or_else(|| {
            SignalFlowError::Transport("connection closed during authentication".to_string())
        })?;

        match codec::decode(&frame) {
            Ok(inbound) => match inbound.message {
                Message::Authenticated { org_id, .. } => {
                    tracing::debug!(
                        "Authenticated (org {})",
                        org_id.as_deref().unwrap_or("unknown")
                    );
                    return Ok(channel);
                }
                Message::Error(error) => {
                    return Err(SignalFlowError::Transport(format!(
                        "authentication rejected: {}",
                        error.description()
                    )));
                }
                other => {
                    tracing::trace!("Skipping {} message during authentication", other.kind());
                }
            },
            Err(e) => {
                return Err(SignalFlowError::Transport(format!(
                    "unexpected frame during authentication: {}",
                    e
                )));
            }
        }
    }
}
