//! # signalflow-rs: SignalFlow streaming client
//!
//! A client for running SignalFlow analytics programs against the Splunk
//! Observability streaming endpoint and consuming their results, either message by
//! message or collected into per-series time series.
//!
//! ## Architecture
//!
//! - **Client**: Owns the connection and every computation started through it
//! - **Transport**: Ordered, message-framed duplex channel (WebSocket or in-memory)
//! - **Protocol**: Typed messages and the codec for JSON and binary frames
//! - **Computation**: Per-execution state machine fed by a frame router
//! - **Aggregation**: Folds data and metadata messages into a [`CollectedResult`]
//!
//! ## Configuration
//!
//! [`ClientConfig`] can be built in code, read from a TOML file in the platform
//! configuration directory under `signalflow-rs`, or taken from the environment:
//!
//! - `O11Y_TOKEN` - access token
//! - `O11Y_REALM` - realm, `us0` when unset
//! - `SIGNALFLOW_STREAM_URL` - explicit stream URL, overriding the realm's
//!
//! ## Example
//!
//! ```ignore
//! use signalflow_rs::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> signalflow_rs::Result<()> {
//!     let client = Client::with_config(ClientConfig::from_env())?;
//!
//!     let end = chrono::Utc::now().timestamp_millis();
//!     let start = end - 30 * 60 * 1000;
//!     let computation = client
//!         .execute("data('cpu.utilization').mean().publish()", start, end, 60_000)
//!         .await?;
//!
//!     let result = computation.collect().await?;
//!     for tsid in result.tsids() {
//!         println!("{}: {} points", tsid, result.get(tsid).map_or(0, |s| s.len()));
//!     }
//!
//!     client.close().await
//! }
//! ```

pub mod client;
pub mod computation;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use client::Client;
pub use computation::{Computation, ExecuteRequest, ResultAggregator, SessionState};
pub use config::ClientConfig;
pub use error::{Result, ResultExt, SignalFlowError};
pub use protocol::Message;
pub use types::{CollectedResult, DataPoint, DataValue, Properties, TimeSeries};
