//! Inbound frame routing
//!
//! One router task per connection owns the [`FrameSource`] and is the only reader
//! of the transport. Every frame is peeked for its channel name and pushed into the
//! queue of the session that owns that channel; sessions never touch the socket.
//!
//! # Routing rules
//!
//! - Frame with a known channel: delivered to that session's queue
//! - Frame with an unknown channel: dropped with a debug log
//! - Frame without a channel: handled at connection level (keep-alives are
//!   ignored, errors are fanned out to every session)
//! - Frame that cannot even be peeked: fanned out as a decode fault
//! - Transport closed or failed: fanned out as a transport fault, and the route
//!   table is marked dead so no new session can register

use crate::error::{Result, SignalFlowError};
use crate::protocol::codec::{self, peek_channel};
use crate::protocol::{ControlEvent, Frame, Message};
use crate::transport::FrameSource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What the router hands to a session
#[derive(Debug)]
pub(crate) enum Delivery {
    /// A raw frame for the session's channel, decoded by the session itself
    Frame(Frame),
    /// A fault that concerns every session on the connection
    Fault(SignalFlowError),
}

#[derive(Debug, Default)]
struct RouteInner {
    routes: HashMap<String, UnboundedSender<Delivery>>,
    dead: Option<SignalFlowError>,
}

/// Channel name to session queue mapping, shared by the router and the client
#[derive(Debug, Default)]
pub(crate) struct RouteTable {
    inner: Mutex<RouteInner>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a channel and get the receiving end of its queue
    pub fn register(&self, channel: &str) -> Result<UnboundedReceiver<Delivery>> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.dead {
            return Err(dead_connection(reason));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.routes.insert(channel.to_string(), tx);
        Ok(rx)
    }

    /// Remove a channel; its queue ends once drained
    pub fn deregister(&self, channel: &str) -> bool {
        self.lock().routes.remove(channel).is_some()
    }

    /// Deliver to one channel, returning false if nobody listens on it
    pub fn route(&self, channel: &str, delivery: Delivery) -> bool {
        let mut inner = self.lock();
        match inner.routes.get(channel) {
            Some(tx) => {
                if tx.send(delivery).is_ok() {
                    return true;
                }
                // Receiver dropped without deregistering
                inner.routes.remove(channel);
                false
            }
            None => false,
        }
    }

    /// Deliver a fault to every registered channel
    pub fn broadcast(&self, fault: SignalFlowError) -> usize {
        let inner = self.lock();
        inner
            .routes
            .values()
            .filter(|tx| tx.send(Delivery::Fault(fault.clone())).is_ok())
            .count()
    }

    /// Mark the connection dead and end every queue
    pub fn shut_down(&self, reason: SignalFlowError) {
        let mut inner = self.lock();
        if inner.dead.is_none() {
            inner.dead = Some(reason);
        }
        inner.routes.clear();
    }

    /// Why the connection is unusable, if it is
    pub fn dead_reason(&self) -> Option<SignalFlowError> {
        self.lock().dead.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().routes.len()
    }
}

fn dead_connection(reason: &SignalFlowError) -> SignalFlowError {
    match reason.root() {
        SignalFlowError::ClientClosed => SignalFlowError::ClientClosed,
        other => SignalFlowError::Transport(format!("connection is no longer usable: {}", other)),
    }
}

/// The task that reads the transport and feeds session queues
pub(crate) struct FrameRouter {
    source: Box<dyn FrameSource>,
    routes: Arc<RouteTable>,
    shutdown: oneshot::Receiver<()>,
}

impl FrameRouter {
    /// Spawn the router on the current runtime
    ///
    /// Returns the shutdown trigger and the task handle.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        routes: Arc<RouteTable>,
    ) -> (oneshot::Sender<()>, JoinHandle<()>) {
        let (tx, rx) = oneshot::channel();
        let router = Self {
            source,
            routes,
            shutdown: rx,
        };
        (tx, tokio::spawn(router.run()))
    }

    async fn run(mut self) {
        tracing::debug!("Frame router started");
        loop {
            let received = tokio::select! {
                _ = &mut self.shutdown => {
                    tracing::debug!("Frame router shutting down");
                    break;
                }
                received = self.source.receive() => received,
            };

            match received {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => {
                    tracing::info!("SignalFlow connection closed by the service");
                    let fault =
                        SignalFlowError::Transport("connection closed by the service".to_string());
                    self.routes.broadcast(fault.clone());
                    self.routes.shut_down(fault);
                    break;
                }
                Err(e) => {
                    tracing::error!("SignalFlow connection failed: {}", e);
                    self.routes.broadcast(e.clone());
                    self.routes.shut_down(e);
                    break;
                }
            }
        }
        tracing::debug!("Frame router stopped");
    }

    fn dispatch(&self, frame: Frame) {
        match peek_channel(&frame) {
            Ok(Some(channel)) => {
                if !self.routes.route(&channel, Delivery::Frame(frame)) {
                    tracing::debug!("Dropping frame for unknown channel {}", channel);
                }
            }
            Ok(None) => self.connection_frame(&frame),
            Err(e) => {
                tracing::warn!("Undecodable frame without channel: {}", e);
                self.routes.broadcast(e);
            }
        }
    }

    fn connection_frame(&self, frame: &Frame) {
        let message = match codec::decode(frame) {
            Ok(inbound) => inbound.message,
            Err(e) => {
                tracing::warn!("Undecodable connection-level frame: {}", e);
                self.routes.broadcast(e);
                return;
            }
        };

        match message {
            Message::ControlMessage(control) if control.event == ControlEvent::KeepAlive => {
                tracing::trace!("Keep-alive");
            }
            Message::Error(error) => {
                let fault = SignalFlowError::Service {
                    code: error.error,
                    message: error.description(),
                };
                let reached = self.routes.broadcast(fault.clone());
                tracing::warn!("Connection-level {} (delivered to {} sessions)", fault, reached);
            }
            Message::Authenticated { .. } => {
                tracing::debug!("Ignoring repeated authenticated message");
            }
            other => {
                tracing::debug!("Ignoring connection-level {} message", other.kind());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Connector, Endpoint, MemoryConnector};
    use serde_json::json;

    #[test]
    fn test_route_to_registered_channel_only() {
        let table = RouteTable::new();
        let mut rx = table.register("R1").unwrap();

        assert!(table.route("R1", Delivery::Frame(Frame::from("x"))));
        assert!(!table.route("R2", Delivery::Frame(Frame::from("y"))));
        assert!(matches!(rx.try_recv(), Ok(Delivery::Frame(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deregister_ends_queue() {
        let table = RouteTable::new();
        let mut rx = table.register("R1").unwrap();
        assert!(table.deregister("R1"));
        assert!(!table.deregister("R1"));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dead_table_rejects_registration() {
        let table = RouteTable::new();
        let _rx = table.register("R1").unwrap();
        table.shut_down(SignalFlowError::Transport("reset".to_string()));

        assert_eq!(table.len(), 0);
        let err = table.register("R2").unwrap_err();
        assert!(matches!(err, SignalFlowError::Transport(_)));
    }

    #[test]
    fn test_closed_table_reports_client_closed() {
        let table = RouteTable::new();
        table.shut_down(SignalFlowError::ClientClosed);
        assert_eq!(table.register("R1").unwrap_err(), SignalFlowError::ClientClosed);
    }

    #[tokio::test]
    async fn test_router_demultiplexes_and_fans_out() {
        let (connector, mut listener) = MemoryConnector::pair();
        let channel = connector.open(&Endpoint::for_realm("test")).await.unwrap();
        let peer = listener.accept().await.unwrap();

        let table = Arc::new(RouteTable::new());
        let mut one = table.register("R1").unwrap();
        let mut two = table.register("R2").unwrap();
        let (_shutdown, handle) = FrameRouter::spawn(channel.source, table.clone());

        peer.send_json(json!({"type": "control-message", "channel": "R2", "event": "STREAM_START"}))
            .unwrap();
        peer.send_json(json!({"type": "control-message", "event": "KEEP_ALIVE"}))
            .unwrap();
        peer.send_json(json!({"type": "error", "error": 500, "message": "boom"}))
            .unwrap();

        assert!(matches!(two.recv().await, Some(Delivery::Frame(_))));
        match one.recv().await {
            Some(Delivery::Fault(SignalFlowError::Service { code, .. })) => {
                assert_eq!(code, Some(500))
            }
            other => panic!("unexpected delivery {:?}", other),
        }
        assert!(matches!(
            two.recv().await,
            Some(Delivery::Fault(SignalFlowError::Service { .. }))
        ));

        drop(peer);
        handle.await.unwrap();
        assert!(matches!(
            one.recv().await,
            Some(Delivery::Fault(SignalFlowError::Transport(_)))
        ));
        assert!(one.recv().await.is_none());
        assert!(table.dead_reason().is_some());
    }
}
