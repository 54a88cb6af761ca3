//! Helpers that play the service side of an in-memory connection

use serde_json::{json, Value};
use signalflow_rs::protocol::Frame;
use signalflow_rs::transport::{MemoryPeer, PeerListener};

/// Accept the next connection and complete the authenticate handshake
pub async fn accept_authenticated(listener: &mut PeerListener) -> MemoryPeer {
    let mut peer = listener.accept().await.expect("client never connected");
    let auth = peer.recv_json().await.expect("no authenticate frame");
    assert_eq!(auth["type"], "authenticate");
    assert!(auth["token"].is_string());
    peer.send_json(json!({"type": "authenticated", "orgId": "ORG", "userId": "USER"}))
        .unwrap();
    peer
}

/// Wait for the next request and check its type
pub async fn expect_request(peer: &mut MemoryPeer, kind: &str) -> Value {
    let request = peer
        .recv_json()
        .await
        .unwrap_or_else(|| panic!("connection closed while waiting for {}", kind));
    assert_eq!(request["type"], kind, "unexpected request {}", request);
    request
}

/// Answer the next execute request with frames built for its channel
///
/// Returns the channel the client picked.
pub async fn answer_execute<F>(peer: &mut MemoryPeer, frames: F) -> String
where
    F: FnOnce(&str) -> Vec<Frame>,
{
    let execute = expect_request(peer, "execute").await;
    let channel = execute["channel"]
        .as_str()
        .expect("execute carries a channel")
        .to_string();
    for frame in frames(&channel) {
        peer.send(frame).unwrap();
    }
    channel
}
