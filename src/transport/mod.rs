//! Channel transports
//!
//! A transport provides an ordered, reliable, message-framed duplex connection to
//! the SignalFlow streaming endpoint. The client never talks to a socket directly;
//! it goes through a [`Connector`], which hands back the two halves of a
//! [`Channel`]:
//!
//! - [`FrameSink`] - sends frames and closes the connection
//! - [`FrameSource`] - receives frames in the order the peer sent them
//!
//! # Implementations
//!
//! - [`WebSocketConnector`] - the real endpoint over `wss://`
//! - [`MemoryConnector`] - an in-process peer for tests and local harnesses
//!
//! # Example
//!
//! ```ignore
//! use signalflow_rs::transport::{Connector, Endpoint, WebSocketConnector};
//!
//! let endpoint = Endpoint::for_realm("us1");
//! let mut channel = WebSocketConnector::new().open(&endpoint).await?;
//! channel.sink.send(frame).await?;
//! while let Some(frame) = channel.source.receive().await? {
//!     // ...
//! }
//! ```

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryPeer, PeerListener};
pub use websocket::WebSocketConnector;

use crate::error::Result;
use crate::protocol::Frame;
use async_trait::async_trait;
use std::fmt;

/// Where a transport connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Realm the endpoint belongs to
    pub realm: String,
    /// Full stream URL
    pub url: String,
}

impl Endpoint {
    /// Endpoint for the public stream URL of a realm
    pub fn for_realm(realm: impl Into<String>) -> Self {
        let realm = realm.into();
        let url = stream_url_for_realm(&realm);
        Self { realm, url }
    }

    /// Endpoint with an explicit URL
    pub fn with_url(realm: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Stream URL of the SignalFlow WebSocket endpoint for a realm
pub fn stream_url_for_realm(realm: &str) -> String {
    format!("wss://stream.{}.signalfx.com/v2/signalflow/connect", realm)
}

/// Sending half of a channel
///
/// Implementations must deliver whole frames; the client serializes calls so no
/// two sends overlap.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the connection
    ///
    /// Any pending [`FrameSource::receive`] on the peer half must return
    /// `Ok(None)` or an error afterwards rather than hang.
    async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a channel
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame
    ///
    /// Returns `Ok(None)` once the connection is closed.
    async fn receive(&mut self) -> Result<Option<Frame>>;
}

/// An open duplex channel, split into its halves
pub struct Channel {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Factory for channels
///
/// The client calls [`Connector::open`] once, lazily, on first use.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel to `endpoint`
    async fn open(&self, endpoint: &Endpoint) -> Result<Channel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_for_realm() {
        assert_eq!(
            stream_url_for_realm("us1"),
            "wss://stream.us1.signalfx.com/v2/signalflow/connect"
        );
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::with_url("local", "ws://127.0.0.1:9000/connect");
        assert_eq!(endpoint.to_string(), "ws://127.0.0.1:9000/connect");
        assert_eq!(Endpoint::for_realm("eu0").realm, "eu0");
    }
}
