//! Builders for the frames a SignalFlow service sends

use serde_json::json;
use signalflow_rs::protocol::codec::encode_binary_data;
use signalflow_rs::protocol::{DataMessage, DataPayload, Frame};
use signalflow_rs::DataValue;

pub fn stream_start(channel: &str) -> Frame {
    control(channel, "STREAM_START")
}

pub fn job_start(channel: &str, handle: &str) -> Frame {
    json_frame(json!({
        "type": "control-message",
        "channel": channel,
        "event": "JOB_START",
        "handle": handle,
        "timestampMs": 0,
    }))
}

pub fn end_of_channel(channel: &str) -> Frame {
    control(channel, "END_OF_CHANNEL")
}

pub fn channel_abort(channel: &str, reason: &str) -> Frame {
    json_frame(json!({
        "type": "control-message",
        "channel": channel,
        "event": "CHANNEL_ABORT",
        "abortInfo": {"sf_job_abortState": "FAILED", "sf_job_abortReason": reason},
    }))
}

pub fn keep_alive() -> Frame {
    json_frame(json!({"type": "control-message", "event": "KEEP_ALIVE", "timestampMs": 0}))
}

pub fn running_resolution(channel: &str, resolution_ms: i64) -> Frame {
    json_frame(json!({
        "type": "message",
        "channel": channel,
        "logicalTimestampMs": 0,
        "message": {
            "messageCode": "JOB_RUNNING_RESOLUTION",
            "messageLevel": "INFO",
            "contents": {"resolutionMs": resolution_ms},
        },
    }))
}

pub fn metadata(channel: &str, tsid: &str, metric: &str) -> Frame {
    json_frame(json!({
        "type": "metadata",
        "channel": channel,
        "tsId": tsid,
        "properties": {"sf_metric": metric, "sf_streamLabel": "A"},
    }))
}

pub fn error(channel: Option<&str>, code: i64, message: &str) -> Frame {
    let mut value = json!({"type": "error", "error": code, "message": message});
    if let Some(channel) = channel {
        value["channel"] = channel.into();
    }
    json_frame(value)
}

/// Builder for data batches, rendered as JSON or binary frames
pub struct DataBuilder {
    channel: String,
    timestamp: i64,
    max_delay: Option<i64>,
    points: Vec<DataPayload>,
}

impl DataBuilder {
    pub fn new(channel: &str, timestamp: i64) -> Self {
        Self {
            channel: channel.to_string(),
            timestamp,
            max_delay: None,
            points: Vec::new(),
        }
    }

    pub fn point(mut self, tsid: &str, value: impl Into<DataValue>) -> Self {
        self.points.push(DataPayload {
            ts_id: tsid.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn max_delay(mut self, max_delay: i64) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn message(&self) -> DataMessage {
        DataMessage {
            logical_timestamp_ms: self.timestamp,
            data: self.points.clone(),
            max_delay_ms: self.max_delay,
        }
    }

    pub fn json(self) -> Frame {
        let mut value = serde_json::to_value(self.message()).expect("data message serializes");
        value["type"] = "data".into();
        value["channel"] = self.channel.into();
        json_frame(value)
    }

    pub fn binary(self) -> Frame {
        encode_binary_data(&self.channel, &self.message()).expect("binary data encodes")
    }
}

fn control(channel: &str, event: &str) -> Frame {
    json_frame(json!({
        "type": "control-message",
        "channel": channel,
        "event": event,
        "timestampMs": 0,
    }))
}

fn json_frame(value: serde_json::Value) -> Frame {
    Frame::Text(value.to_string())
}
