//! Line codec for controller messages
//!
//! Frames on the wire are single JSON objects terminated by `\r\n`. A single
//! read from the socket may contain several frames, or end in the middle of
//! one, so inbound bytes go through a [`FrameBuffer`] first.
//!
//! # Examples
//!
//! ```rust
//! use iclink_core::{codec, Message};
//!
//! let mut buffer = codec::FrameBuffer::new();
//! let frames = buffer.push(r#"{"command":"NotifyList","objectList":[]}"#.as_bytes());
//! assert!(frames.is_empty());
//!
//! let frames = buffer.push(b"\r\n");
//! assert_eq!(frames.len(), 1);
//! let frame = frames[0].as_ref().unwrap();
//! assert!(codec::decode(frame).unwrap().is_notification());
//! ```

use crate::error::{Error, Result};
use crate::types::{Message, Notification, Request, Response};
use serde_json::Value;

/// Frame terminator
pub const TERMINATOR: &str = "\r\n";

/// Longest partial frame a [`FrameBuffer`] holds before giving up on it
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Encode a request as a terminated frame
pub fn encode_request(request: &Request) -> Result<String> {
    let mut text = serde_json::to_string(request)?;
    text.push_str(TERMINATOR);
    Ok(text)
}

/// Decode one frame into a message
///
/// A frame with a `response` field is a response; anything else carrying a
/// `command` is a notification.
///
/// # Errors
///
/// Returns `Error::Protocol` when the frame is not a JSON object or lacks the
/// fields its shape requires.
pub fn decode(frame: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(frame.trim())
        .map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| Error::Protocol("frame is not a JSON object".into()))?;

    if !object.contains_key("command") {
        return Err(Error::Protocol("missing required field 'command'".into()));
    }

    if object.contains_key("response") {
        let response: Response = serde_json::from_value(normalize_id(value))
            .map_err(|e| Error::Protocol(format!("malformed response: {}", e)))?;
        Ok(Message::Response(response))
    } else {
        let notification: Notification = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed notification: {}", e)))?;
        Ok(Message::Notification(notification))
    }
}

// The controller normally quotes identifiers but numeric ones show up too.
fn normalize_id(mut value: Value) -> Value {
    if let Some(object) = value.as_object_mut() {
        if let Some(id) = object.get("messageID") {
            if !id.is_string() {
                let rendered = id.to_string();
                object.insert("messageID".into(), Value::String(rendered));
            }
        }
    }
    value
}

/// Accumulates inbound bytes and yields complete frames
#[derive(Debug)]
pub struct FrameBuffer {
    pending: String,
    max_len: usize,
    discarding: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer holding at most `max_len` bytes of one frame
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: String::new(),
            max_len,
            discarding: false,
        }
    }

    /// Append received bytes and return every frame completed by them
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the frame then fails
    /// JSON decoding and is reported as a protocol error by the caller.
    ///
    /// A partial frame growing past the maximum length yields one
    /// `Error::Protocol`; its bytes are dropped up to the next terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(end) = self.pending.find(TERMINATOR) {
            let frame: String = self.pending.drain(..end + TERMINATOR.len()).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let frame = &frame[..frame.len() - TERMINATOR.len()];
            if !frame.trim().is_empty() {
                frames.push(Ok(frame.to_string()));
            }
        }

        if !self.discarding && self.pending.len() > self.max_len {
            frames.push(Err(Error::Protocol(format!(
                "frame exceeds {} bytes without terminator",
                self.max_len
            ))));
            self.discarding = true;
        }
        if self.discarding {
            // a trailing '\r' may be the first half of the terminator
            let split_terminator = self.pending.ends_with('\r');
            self.pending.clear();
            if split_terminator {
                self.pending.push('\r');
            }
        }
        frames
    }

    /// Number of buffered bytes not yet forming a frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }
}
