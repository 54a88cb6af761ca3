//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use signalflow_rs::transport::{MemoryConnector, PeerListener};
use signalflow_rs::{Client, ClientConfig};
use std::sync::Arc;
use std::time::Duration;

/// A program used where its text does not matter
pub const PROGRAM: &str = "data('demo.trans.latency').publish()";

/// Token used by every test client
pub const TOKEN: &str = "TESTtoken0123456789";

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Configuration with short timeouts suitable for in-memory tests
pub fn test_config() -> ClientConfig {
    ClientConfig::new(TOKEN, "test")
        .with_connect_timeout(Duration::from_secs(2))
        .with_receive_timeout(Duration::from_secs(2))
        .with_close_timeout(Duration::from_millis(200))
}

/// A client wired to an in-memory service
pub fn memory_client(config: ClientConfig) -> (Client, MemoryConnector, PeerListener) {
    let (connector, listener) = MemoryConnector::pair();
    let client = Client::with_connector(config, Arc::new(connector.clone()))
        .expect("test configuration is valid");
    (client, connector, listener)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
