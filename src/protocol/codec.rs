//! Frame codec
//!
//! Decodes inbound frames into [`Message`]s tagged with their channel, and encodes
//! outbound [`Request`]s into text frames.
//!
//! # Binary frames
//!
//! ```text
//! 0       1       2       3       4                     20
//! +-------+-------+-------+-------+---------------------+---------
//! |version| type  | flags | rsvd  | channel (16, NUL)   | payload
//! +-------+-------+-------+-------+---------------------+---------
//! ```
//!
//! Flag `0x01` marks a zlib-compressed payload and `0x02` a JSON payload. A
//! non-JSON payload of type [`BINARY_TYPE_DATA`] is a data batch:
//!
//! ```text
//! version 1:    i64 timestamp | u32 count | count x point
//! version 2, 3: i64 timestamp | i64 max delay | u32 count | count x point
//! point:        u8 value type | 8 byte series id | 8 byte value
//! ```
//!
//! All integers are big-endian.

use super::frame::{binary_channel, Frame, BINARY_HEADER_LEN, CHANNEL_NAME_LEN};
use super::{DataMessage, DataPayload, Message, Request};
use crate::error::{Result, SignalFlowError};
use crate::types::DataValue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::io::Read;

/// Binary message type for data batches
pub const BINARY_TYPE_DATA: u8 = 5;

/// Payload is zlib-compressed
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Payload is JSON text
pub const FLAG_JSON: u8 = 0x02;

const VALUE_TYPE_LONG: u8 = 1;
const VALUE_TYPE_DOUBLE: u8 = 2;
const VALUE_TYPE_INT: u8 = 3;

const POINT_LEN: usize = 17;

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Channel the message belongs to; `None` for connection-level messages
    pub channel: Option<String>,
    /// The decoded message
    pub message: Message,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    channel: Option<String>,
}

/// Find the channel a frame belongs to without decoding the whole message
///
/// Returns `Err` if the frame is not even well-formed enough to carry a channel.
pub fn peek_channel(frame: &Frame) -> Result<Option<String>> {
    match frame {
        Frame::Text(text) => {
            let envelope: Envelope = serde_json::from_str(text)?;
            Ok(envelope.channel)
        }
        Frame::Binary(bytes) => binary_channel(bytes).map(Some).ok_or_else(|| {
            SignalFlowError::ProtocolDecode("binary frame header is malformed".to_string())
        }),
    }
}

/// Decode one inbound frame
pub fn decode(frame: &Frame) -> Result<InboundFrame> {
    match frame {
        Frame::Text(text) => decode_json(text.as_bytes(), None),
        Frame::Binary(bytes) => decode_binary(bytes),
    }
}

/// Encode an outbound request as a text frame
pub fn encode(request: &Request) -> Result<Frame> {
    serde_json::to_string(request)
        .map(Frame::Text)
        .map_err(|e| SignalFlowError::InvalidArgument(format!("unencodable request: {}", e)))
}

fn decode_json(bytes: &[u8], header_channel: Option<String>) -> Result<InboundFrame> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let channel = value
        .get("channel")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .or(header_channel);
    let message: Message = serde_json::from_value(value)?;
    Ok(InboundFrame { channel, message })
}

fn decode_binary(bytes: &[u8]) -> Result<InboundFrame> {
    if bytes.len() < BINARY_HEADER_LEN {
        return Err(SignalFlowError::ProtocolDecode(format!(
            "binary frame of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let version = bytes[0];
    let message_type = bytes[1];
    let flags = bytes[2];
    let channel = binary_channel(bytes).ok_or_else(|| {
        SignalFlowError::ProtocolDecode("binary frame channel is not UTF-8".to_string())
    })?;

    let raw = &bytes[BINARY_HEADER_LEN..];
    let inflated;
    let payload = if flags & FLAG_COMPRESSED != 0 {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| {
                SignalFlowError::ProtocolDecode(format!("failed to inflate frame: {}", e))
            })?;
        inflated = out;
        &inflated[..]
    } else {
        raw
    };

    if flags & FLAG_JSON != 0 {
        return decode_json(payload, Some(channel));
    }

    if message_type != BINARY_TYPE_DATA {
        return Err(SignalFlowError::ProtocolDecode(format!(
            "unsupported binary message type {}",
            message_type
        )));
    }

    let data = decode_binary_data(version, payload)?;
    Ok(InboundFrame {
        channel: Some(channel),
        message: Message::Data(data),
    })
}

fn decode_binary_data(version: u8, payload: &[u8]) -> Result<DataMessage> {
    let mut cursor = Cursor::new(payload);
    let logical_timestamp_ms = cursor.i64()?;
    let max_delay_ms = match version {
        1 => None,
        2 | 3 => Some(cursor.i64()?),
        other => {
            return Err(SignalFlowError::ProtocolDecode(format!(
                "unsupported binary data version {}",
                other
            )))
        }
    };
    let count = cursor.u32()? as usize;
    if cursor.remaining() < count.saturating_mul(POINT_LEN) {
        return Err(SignalFlowError::ProtocolDecode(format!(
            "binary data frame announces {} points but holds {} bytes",
            count,
            cursor.remaining()
        )));
    }

    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        let value_type = cursor.u8()?;
        let ts_id = URL_SAFE_NO_PAD.encode(cursor.take(8)?);
        let raw = cursor.take(8)?;
        let value = match value_type {
            VALUE_TYPE_LONG => DataValue::Integer(i64::from_be_bytes(to_array(raw))),
            VALUE_TYPE_DOUBLE => DataValue::Double(f64::from_be_bytes(to_array(raw))),
            VALUE_TYPE_INT => {
                DataValue::Integer(i32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as i64)
            }
            other => {
                return Err(SignalFlowError::ProtocolDecode(format!(
                    "unknown binary value type {}",
                    other
                )))
            }
        };
        data.push(DataPayload { ts_id, value });
    }

    Ok(DataMessage {
        logical_timestamp_ms,
        data,
        max_delay_ms,
    })
}

/// Encode a data batch as an uncompressed binary frame
///
/// Series ids must be the unpadded URL-safe base64 form of eight bytes, as the
/// service produces them.
pub fn encode_binary_data(channel: &str, message: &DataMessage) -> Result<Frame> {
    if channel.len() > CHANNEL_NAME_LEN {
        return Err(SignalFlowError::InvalidArgument(format!(
            "channel name '{}' does not fit a binary header",
            channel
        )));
    }
    let version: u8 = if message.max_delay_ms.is_some() { 2 } else { 1 };

    let mut out = Vec::with_capacity(BINARY_HEADER_LEN + 20 + message.data.len() * POINT_LEN);
    out.extend_from_slice(&[version, BINARY_TYPE_DATA, 0, 0]);
    let mut name = [0u8; CHANNEL_NAME_LEN];
    name[..channel.len()].copy_from_slice(channel.as_bytes());
    out.extend_from_slice(&name);

    out.extend_from_slice(&message.logical_timestamp_ms.to_be_bytes());
    if let Some(delay) = message.max_delay_ms {
        out.extend_from_slice(&delay.to_be_bytes());
    }
    out.extend_from_slice(&(message.data.len() as u32).to_be_bytes());

    for payload in &message.data {
        let id = URL_SAFE_NO_PAD.decode(&payload.ts_id).map_err(|e| {
            SignalFlowError::InvalidArgument(format!("series id '{}': {}", payload.ts_id, e))
        })?;
        if id.len() != 8 {
            return Err(SignalFlowError::InvalidArgument(format!(
                "series id '{}' is not eight bytes",
                payload.ts_id
            )));
        }
        match payload.value {
            DataValue::Integer(v) => {
                out.push(VALUE_TYPE_LONG);
                out.extend_from_slice(&id);
                out.extend_from_slice(&v.to_be_bytes());
            }
            DataValue::Double(v) => {
                out.push(VALUE_TYPE_DOUBLE);
                out.extend_from_slice(&id);
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
    }

    Ok(Frame::Binary(out))
}

fn to_array(raw: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    buf
}

/// Big-endian reader over a byte slice
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SignalFlowError::ProtocolDecode(format!(
                "binary frame truncated at byte {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(to_array(self.take(8)?)))
    }
}
