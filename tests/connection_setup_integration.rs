//! Integration tests for opening and authenticating the connection

mod common;

use async_trait::async_trait;
use common::builders;
use common::mock_helpers::{accept_authenticated, expect_request};
use common::{PROGRAM, TOKEN};
use mockall::mock;
use serde_json::json;
use signalflow_rs::transport::{Channel, Connector, Endpoint};
use signalflow_rs::{Client, Result, SignalFlowError};
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub FailingConnector {}

    #[async_trait]
    impl Connector for FailingConnector {
        async fn open(&self, endpoint: &Endpoint) -> Result<Channel>;
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let mut connector = MockFailingConnector::new();
    connector
        .expect_open()
        .withf(|endpoint: &Endpoint| endpoint.realm == "test")
        .times(1)
        .returning(|endpoint| {
            Err(SignalFlowError::Transport(format!(
                "connection refused by {}",
                endpoint
            )))
        });

    let client = Client::with_connector(common::test_config(), Arc::new(connector)).unwrap();
    let err = client.execute(PROGRAM, 0, 60_000, 1_000).await.unwrap_err();

    assert!(matches!(err.root(), SignalFlowError::Transport(_)));
    assert!(err.to_string().contains("connection refused"));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_connect_uses_realm_stream_url() {
    let mut connector = MockFailingConnector::new();
    connector
        .expect_open()
        .withf(|endpoint: &Endpoint| {
            endpoint.url == "wss://stream.test.signalfx.com/v2/signalflow/connect"
        })
        .returning(|_| Err(SignalFlowError::Transport("offline".to_string())));

    let client = Client::with_connector(common::test_config(), Arc::new(connector)).unwrap();
    assert!(client.connect().await.is_err());
}

#[tokio::test]
async fn test_authenticate_carries_token() {
    let (client, _connector, mut listener) = common::memory_client(common::test_config());

    let service = tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        let auth = expect_request(&mut peer, "authenticate").await;
        peer.send_json(json!({"type": "authenticated"})).unwrap();
        (peer, auth)
    });

    client.connect().await.unwrap();
    let (_peer, auth) = service.await.unwrap();
    assert_eq!(auth, json!({"type": "authenticate", "token": TOKEN}));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_token_is_transport_error() {
    let (client, _connector, mut listener) = common::memory_client(common::test_config());

    let service = tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        expect_request(&mut peer, "authenticate").await;
        peer.send(builders::error(None, 401, "invalid token")).unwrap();
        peer
    });

    let err = client.execute(PROGRAM, 0, 60_000, 1_000).await.unwrap_err();
    let _peer = service.await.unwrap();

    assert!(matches!(err, SignalFlowError::Transport(_)));
    assert!(err.to_string().contains("invalid token"));
}

#[tokio::test]
async fn test_close_during_handshake_is_transport_error() {
    let (client, _connector, mut listener) = common::memory_client(common::test_config());

    let service = tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        expect_request(&mut peer, "authenticate").await;
        peer.close();
        peer
    });

    let err = client.connect().await.unwrap_err();
    let _peer = service.await.unwrap();
    assert!(matches!(err, SignalFlowError::Transport(_)));
}

#[tokio::test]
async fn test_silent_service_times_out_connecting() {
    let config = common::test_config().with_connect_timeout(common::test_timeout());
    let (client, _connector, mut listener) = common::memory_client(config);

    let service = tokio::spawn(async move {
        let mut peer = listener.accept().await.unwrap();
        expect_request(&mut peer, "authenticate").await;
        // Never answer
        tokio::time::sleep(Duration::from_millis(500)).await;
        peer
    });

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, SignalFlowError::Transport(_)));
    assert!(err.to_string().contains("timed out"));
    drop(service);
}

#[tokio::test]
async fn test_connection_opened_once_for_many_executes() {
    let (client, connector, mut listener) = common::memory_client(common::test_config());

    let service = tokio::spawn(async move {
        let mut peer = accept_authenticated(&mut listener).await;
        let mut channels = Vec::new();
        for _ in 0..3 {
            let execute = expect_request(&mut peer, "execute").await;
            channels.push(execute["channel"].as_str().unwrap().to_string());
        }
        (peer, channels)
    });

    for _ in 0..3 {
        client.execute(PROGRAM, 0, 60_000, 1_000).await.unwrap();
    }
    let (_peer, channels) = service.await.unwrap();

    assert_eq!(connector.open_count(), 1);
    assert_eq!(channels, vec!["R1", "R2", "R3"]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_execute_frame_carries_request_options() {
    let (client, _connector, mut listener) = common::memory_client(common::test_config());

    let service = tokio::spawn(async move {
        let mut peer = accept_authenticated(&mut listener).await;
        let execute = expect_request(&mut peer, "execute").await;
        (peer, execute)
    });

    let request = signalflow_rs::ExecuteRequest::new(PROGRAM, 5_000, 1_000, 10_000)
        .immediate(true)
        .max_delay(2_000)
        .timezone("UTC");
    let computation = client.execute_request(request).await.unwrap();
    let (_peer, execute) = service.await.unwrap();

    assert_eq!(
        execute,
        json!({
            "type": "execute",
            "channel": computation.channel(),
            "program": PROGRAM,
            "start": 5_000,
            "stop": 1_000,
            "resolution": 10_000,
            "immediate": true,
            "maxDelay": 2_000,
            "timezone": "UTC",
        })
    );
    client.close().await.unwrap();
}
