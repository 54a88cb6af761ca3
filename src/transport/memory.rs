//! In-memory transport
//!
//! A [`MemoryConnector`] opens channels whose far end is a [`MemoryPeer`] living in
//! the same process. Each call to [`Connector::open`] hands a new peer to the
//! [`PeerListener`] created alongside the connector, so a test or a local harness
//! can play the part of the SignalFlow service: read what the client sent and
//! script the frames it gets back.
//!
//! # Example
//!
//! ```ignore
//! use signalflow_rs::transport::MemoryConnector;
//!
//! let (connector, mut listener) = MemoryConnector::pair();
//! // hand `connector` to a Client, then:
//! let mut peer = listener.accept().await.unwrap();
//! let auth = peer.recv_json().await.unwrap();
//! assert_eq!(auth["type"], "authenticate");
//! peer.send_json(serde_json::json!({"type": "authenticated"}))?;
//! ```

use super::{Channel, Connector, Endpoint, FrameSink, FrameSource};
use crate::error::{Result, SignalFlowError};
use crate::protocol::Frame;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Opens in-process channels
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    /// Where newly opened peers are announced
    peers: UnboundedSender<MemoryPeer>,
    /// Number of channels opened so far
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its peers
    pub fn pair() -> (Self, PeerListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers: tx,
            opened: Arc::new(AtomicUsize::new(0)),
        };
        (connector, PeerListener { peers: rx })
    }

    /// Number of channels opened through this connector
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Channel> {
        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            to_client: Some(peer_tx),
            from_client: peer_rx,
        };
        self.peers.send(peer).map_err(|_| {
            SignalFlowError::Transport(format!("no listener accepting connections to {}", endpoint))
        })?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened in-memory channel to {}", endpoint);

        Ok(Channel {
            sink: Box::new(MemorySink {
                tx: Some(client_tx),
            }),
            source: Box::new(MemorySource { rx: client_rx }),
        })
    }
}

/// Receives the service side of every channel a [`MemoryConnector`] opens
#[derive(Debug)]
pub struct PeerListener {
    peers: UnboundedReceiver<MemoryPeer>,
}

impl PeerListener {
    /// Wait for the next opened channel
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Take an already opened channel without waiting
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// The service side of an in-memory channel
#[derive(Debug)]
pub struct MemoryPeer {
    endpoint: Endpoint,
    to_client: Option<UnboundedSender<Frame>>,
    from_client: UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// The endpoint the client asked for
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Deliver a frame to the client
    pub fn send(&self, frame: impl Into<Frame>) -> Result<()> {
        let tx = self.to_client.as_ref().ok_or_else(|| {
            SignalFlowError::Transport("in-memory peer already closed".to_string())
        })?;
        tx.send(frame.into())
            .map_err(|_| SignalFlowError::Transport("client side dropped".to_string()))
    }

    /// Deliver a JSON text frame to the client
    pub fn send_json(&self, value: serde_json::Value) -> Result<()> {
        self.send(Frame::Text(value.to_string()))
    }

    /// Wait for the next frame the client sent
    ///
    /// Returns `None` once the client closed its side.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Wait for the next text frame the client sent and parse it as JSON
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return serde_json::from_str(&text).ok(),
                Frame::Binary(_) => continue,
            }
        }
    }

    /// Take a frame the client already sent without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Close the service side; the client's source ends
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

struct MemorySink {
    tx: Option<UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SignalFlowError::Transport("channel is closed".to_string()))?;
        tx.send(frame)
            .map_err(|_| SignalFlowError::Transport("peer went away".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn receive(&mut self) -> Result<Option<Frame>> {
        Ok(self.rx.recv().await)
    }
}
