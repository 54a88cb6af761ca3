//! SignalFlow wire protocol
//!
//! Typed messages exchanged with the SignalFlow streaming endpoint and the codec
//! that maps them to and from transport frames.
//!
//! # Inbound
//!
//! Every inbound frame carries a message [`Message`] and, for computation-scoped
//! messages, the name of the channel it belongs to. Channel names are assigned by
//! the client when it issues an execute request and are the correlator used to
//! route frames to computation sessions.
//!
//! # Outbound
//!
//! [`Request`] covers the frames a client sends: authenticate, execute, detach and
//! stop. All outbound frames are JSON text.

pub mod codec;
pub mod frame;

pub use codec::{decode, encode, InboundFrame};
pub use frame::Frame;

use crate::types::{DataValue, Properties};
use serde::{Deserialize, Serialize};

/// Control events reported through `control-message` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlEvent {
    /// The channel is attached and will start streaming
    StreamStart,
    /// The computation job started; carries the job handle
    JobStart,
    /// Progress of a historical computation
    JobProgress,
    /// The computation was aborted by the service
    ChannelAbort,
    /// The computation finished, no more messages for this channel
    EndOfChannel,
    /// Connection keep-alive
    KeepAlive,
    /// Event this client does not know about
    #[serde(other)]
    Unknown,
}

/// A `control-message` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    pub event: ControlEvent,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
    /// Computation handle, present on `JOB_START`
    #[serde(default)]
    pub handle: Option<String>,
    /// Completion percentage, present on `JOB_PROGRESS`
    #[serde(default)]
    pub progress: Option<i64>,
    /// Abort details, present on `CHANNEL_ABORT`
    #[serde(default)]
    pub abort_info: Option<serde_json::Value>,
}

impl ControlMessage {
    /// Whether this event ends the computation normally
    pub fn is_end(&self) -> bool {
        self.event == ControlEvent::EndOfChannel
    }
}

/// Body of an informational `message` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoBody {
    pub message_code: String,
    #[serde(default)]
    pub message_level: Option<String>,
    #[serde(default)]
    pub contents: Option<serde_json::Value>,
}

/// An informational `message` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoMessage {
    #[serde(default)]
    pub logical_timestamp_ms: Option<i64>,
    pub message: InfoBody,
}

impl InfoMessage {
    /// The resolution announced by `JOB_RUNNING_RESOLUTION`, if this is one
    pub fn running_resolution_ms(&self) -> Option<i64> {
        if self.message.message_code != "JOB_RUNNING_RESOLUTION" {
            return None;
        }
        self.message
            .contents
            .as_ref()?
            .get("resolutionMs")?
            .as_i64()
    }
}

/// Metadata describing one time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataMessage {
    pub ts_id: String,
    #[serde(default)]
    pub properties: Properties,
}

/// One sample inside a data batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    pub ts_id: String,
    pub value: DataValue,
}

/// A batch of samples sharing one logical timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    pub logical_timestamp_ms: i64,
    #[serde(default)]
    pub data: Vec<DataPayload>,
    #[serde(default)]
    pub max_delay_ms: Option<i64>,
}

/// An event emitted by a detector or event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub ts_id: String,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub metadata: Properties,
    #[serde(default)]
    pub properties: Properties,
}

/// An `error` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(default)]
    pub error: Option<i64>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorMessage {
    /// Human readable description, falling back to the error type or code
    pub fn description(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error_type.clone())
            .unwrap_or_else(|| "unspecified service error".to_string())
    }
}

/// An inbound protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Reply to a successful authenticate request
    #[serde(rename_all = "camelCase")]
    Authenticated {
        #[serde(default)]
        org_id: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
    },
    /// Lifecycle event for a channel or the connection
    ControlMessage(ControlMessage),
    /// Informational message about the computation
    #[serde(rename = "message")]
    Info(InfoMessage),
    /// Time series metadata
    Metadata(MetadataMessage),
    /// Batch of data points
    Data(DataMessage),
    /// Detector event
    Event(EventMessage),
    /// A time series will no longer receive data
    #[serde(rename_all = "camelCase")]
    ExpiredTsid { ts_id: String },
    /// Fatal error for the channel or the connection
    Error(ErrorMessage),
}

impl Message {
    /// Short name of the message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Authenticated { .. } => "authenticated",
            Message::ControlMessage(_) => "control-message",
            Message::Info(_) => "message",
            Message::Metadata(_) => "metadata",
            Message::Data(_) => "data",
            Message::Event(_) => "event",
            Message::ExpiredTsid { .. } => "expired-tsid",
            Message::Error(_) => "error",
        }
    }

    /// Whether this is the end-of-channel control event
    pub fn is_end(&self) -> bool {
        matches!(self, Message::ControlMessage(c) if c.is_end())
    }
}

/// Body of an execute request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteFrame {
    pub channel: String,
    pub program: String,
    pub start: i64,
    pub stop: i64,
    pub resolution: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immediate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// An outbound request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    /// First frame on a new connection
    Authenticate { token: String },
    /// Start a computation streaming into `channel`
    Execute(ExecuteFrame),
    /// Stop streaming into `channel`
    Detach {
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Stop the computation identified by `handle`
    Stop {
        handle: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Request {
    /// Short name of the request kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Authenticate { .. } => "authenticate",
            Request::Execute(_) => "execute",
            Request::Detach { .. } => "detach",
            Request::Stop { .. } => "stop",
        }
    }
}
