//! WebSocket transport
//!
//! Connects to the SignalFlow stream endpoint with `tokio-tungstenite` and splits
//! the socket into a [`FrameSink`] and a [`FrameSource`].
//!
//! Ping/pong frames are answered by tungstenite itself and never surface as
//! frames; a close frame from the server ends the source.

use super::{Channel, Connector, Endpoint, FrameSink, FrameSource};
use crate::error::{Result, SignalFlowError};
use crate::protocol::Frame;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens channels over WebSocket
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Channel> {
        tracing::debug!("Opening WebSocket to {}", endpoint);
        let (stream, response) = connect_async(endpoint.url.as_str()).await.map_err(|e| {
            SignalFlowError::Transport(format!("failed to connect to {}: {}", endpoint, e))
        })?;
        tracing::debug!("WebSocket handshake completed ({})", response.status());

        let (sink, source) = stream.split();
        Ok(Channel {
            sink: Box::new(WsSink { inner: sink }),
            source: Box::new(WsSource { inner: source }),
        })
    }
}

struct WsSink {
    inner: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
        };
        self.inner.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            // Closing an already closed socket is not a failure
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn receive(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)) => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(Frame::Text(text))),
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(Some(Frame::Binary(bytes))),
                Some(Ok(WsMessage::Close(reason))) => {
                    tracing::debug!("Server closed the WebSocket: {:?}", reason);
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
            }
        }
    }
}
