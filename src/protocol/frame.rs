//! Transport frames
//!
//! A [`Frame`] is one unit of the message stream as the transport delivers it:
//! either a JSON text frame or a binary frame.

use std::fmt;

/// Length of the fixed binary frame header
pub const BINARY_HEADER_LEN: usize = 20;

/// Length of the NUL-padded channel name inside the binary header
pub const CHANNEL_NAME_LEN: usize = 16;

/// One frame of the duplex message stream
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text, always JSON
    Text(String),
    /// Binary frame with a fixed header
    Binary(Vec<u8>),
}

impl Frame {
    /// Size of the frame payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text payload, if this is a text frame
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(s) => Some(s),
            Frame::Binary(_) => None,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Text(s) => write!(f, "Text({})", s),
            Frame::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::Text(s)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(b: Vec<u8>) -> Self {
        Frame::Binary(b)
    }
}

/// Extract the channel name from a binary frame header
///
/// Returns `None` if the frame is too short or the name is not UTF-8.
pub fn binary_channel(bytes: &[u8]) -> Option<String> {
    if bytes.len() < BINARY_HEADER_LEN {
        return None;
    }
    let raw = &bytes[4..4 + CHANNEL_NAME_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(CHANNEL_NAME_LEN);
    std::str::from_utf8(&raw[..end]).ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_channel() {
        let mut bytes = vec![1u8, 5, 0, 0];
        let mut name = [0u8; CHANNEL_NAME_LEN];
        name[..2].copy_from_slice(b"R7");
        bytes.extend_from_slice(&name);
        assert_eq!(binary_channel(&bytes), Some("R7".to_string()));
    }

    #[test]
    fn test_binary_channel_short_frame() {
        assert_eq!(binary_channel(&[1, 5, 0]), None);
    }

    #[test]
    fn test_frame_debug_hides_binary_payload() {
        let frame = Frame::Binary(vec![0; 64]);
        assert_eq!(format!("{:?}", frame), "Binary(64 bytes)");
    }
}
