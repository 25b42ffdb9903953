//! Common test utilities for iclink-client integration tests
//!
//! [`MockTransport`] stands in for the TCP session. The test keeps the
//! matching [`MockController`] and plays the controller's part: it sees every
//! request written, answers, pushes notifications and drops the session.

#![allow(dead_code)]

use async_trait::async_trait;
use iclink_client::{Coordinator, CoordinatorBuilder, SessionSink, Transport};
use iclink_core::{commands, Error, Message, Notification, Request, Response, Result, SYSTEM_OBJECT};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct ControllerState {
    sink: Option<SessionSink>,
    fail_connects: u32,
    fail_writes: bool,
    auto_handshake: bool,
    auto_reply: bool,
    opens: u32,
    closes: u32,
}

/// Transport half handed to the coordinator
pub struct MockTransport {
    state: Arc<Mutex<ControllerState>>,
    writes: mpsc::UnboundedSender<Request>,
    opens: mpsc::UnboundedSender<Instant>,
}

/// Controller half kept by the test
pub struct MockController {
    state: Arc<Mutex<ControllerState>>,
    writes: mpsc::UnboundedReceiver<Request>,
    opens: mpsc::UnboundedReceiver<Instant>,
}

impl MockController {
    /// Controller that completes handshakes and leaves other requests unanswered
    pub fn new() -> (Self, MockTransport) {
        let state = Arc::new(Mutex::new(ControllerState {
            sink: None,
            fail_connects: 0,
            fail_writes: false,
            auto_handshake: true,
            auto_reply: false,
            opens: 0,
            closes: 0,
        }));
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let (opens_tx, opens_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::clone(&state),
                writes: writes_rx,
                opens: opens_rx,
            },
            MockTransport {
                state,
                writes: writes_tx,
                opens: opens_tx,
            },
        )
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().unwrap().fail_connects = count;
    }

    /// Answer every non-handshake request with `200`
    pub fn set_auto_reply(&self, enable: bool) {
        self.state.lock().unwrap().auto_reply = enable;
    }

    /// Answer handshakes automatically
    pub fn set_auto_handshake(&self, enable: bool) {
        self.state.lock().unwrap().auto_handshake = enable;
    }

    /// Fail every write
    pub fn set_fail_writes(&self, enable: bool) {
        self.state.lock().unwrap().fail_writes = enable;
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }

    /// Wait for the next connection attempt, successful or not
    pub async fn next_open(&mut self) -> Instant {
        self.opens.recv().await.expect("transport dropped")
    }

    /// Wait for the next request written by the coordinator
    pub async fn next_write(&mut self) -> Request {
        self.writes.recv().await.expect("transport dropped")
    }

    /// Next written request, if one is already there
    pub fn try_write(&mut self) -> Option<Request> {
        self.writes.try_recv().ok()
    }

    /// Answer `request` with `code` and extra body fields
    pub fn respond(&self, request: &Request, code: &str, body: Value) {
        self.respond_with_id(&request.message_id, &request.command, code, body);
    }

    /// Answer with an arbitrary message id
    pub fn respond_with_id(&self, message_id: &str, command: &str, code: &str, body: Value) {
        let response = response(message_id, command, code, body);
        if let Some(sink) = self.sink() {
            sink.message(Message::Response(response));
        }
    }

    /// Push a `NotifyList` with the given `objectList` entries
    pub fn notify(&self, object_list: Value) {
        let notification: Notification = serde_json::from_value(json!({
            "command": commands::NOTIFY_LIST,
            "objectList": object_list,
        }))
        .unwrap();
        if let Some(sink) = self.sink() {
            sink.message(Message::Notification(notification));
        }
    }

    /// Report an undecodable frame
    pub fn protocol_error(&self, detail: &str) {
        if let Some(sink) = self.sink() {
            sink.protocol_error(detail);
        }
    }

    /// End the session from the controller's side
    pub fn drop_connection(&self, reason: &str) {
        let sink = self.state.lock().unwrap().sink.take();
        if let Some(sink) = sink {
            sink.closed(reason);
        }
    }

    fn sink(&self) -> Option<SessionSink> {
        self.state.lock().unwrap().sink.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, _host: &str, _port: u16, sink: SessionSink) -> Result<()> {
        let _ = self.opens.send(Instant::now());
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(Error::Transport("connection refused".into()));
        }
        state.sink = Some(sink);
        Ok(())
    }

    async fn write(&mut self, request: &Request) -> Result<()> {
        let state = self.state.lock().unwrap();
        let Some(sink) = state.sink.clone() else {
            return Err(Error::NotConnected);
        };
        if state.fail_writes {
            return Err(Error::Transport("broken pipe".into()));
        }
        let _ = self.writes.send(request.clone());

        if is_handshake(request) {
            if state.auto_handshake {
                sink.message(Message::Response(handshake_response(request)));
            }
        } else if state.auto_reply {
            sink.message(Message::Response(response(
                &request.message_id,
                &request.command,
                "200",
                json!({}),
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.sink = None;
        state.closes += 1;
    }
}

/// Build a response frame
pub fn response(message_id: &str, command: &str, code: &str, body: Value) -> Response {
    let mut value = json!({
        "messageID": message_id,
        "command": command,
        "response": code,
    });
    if let (Some(target), Some(extra)) = (value.as_object_mut(), body.as_object()) {
        target.extend(extra.clone());
    }
    serde_json::from_value(value).unwrap()
}

/// Successful handshake answer carrying the system object
pub fn handshake_response(request: &Request) -> Response {
    response(
        &request.message_id,
        "SendParamList",
        "200",
        json!({
            "objectList": [{
                "objnam": SYSTEM_OBJECT,
                "params": {
                    "VER": "1.064",
                    "MODE": "ENGLISH",
                    "SNAME": "IntelliCenter",
                    "PROPNAME": "Backyard"
                }
            }]
        }),
    )
}

/// The `objectList` entries of a request
pub fn object_list(request: &Request) -> Vec<Value> {
    request
        .params
        .get("objectList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// First `objnam` of a request's `objectList`
pub fn first_objnam(request: &Request) -> Option<String> {
    object_list(request)
        .first()
        .and_then(|item| item["objnam"].as_str())
        .map(str::to_string)
}

/// Number of attribute keys across a request's `objectList`
pub fn pair_count(request: &Request) -> usize {
    object_list(request)
        .iter()
        .map(|item| item["keys"].as_array().map_or(0, Vec::len))
        .sum()
}

/// Whether `request` is the connection handshake
pub fn is_handshake(request: &Request) -> bool {
    request.command == commands::GET_PARAM_LIST
        && object_list(request).iter().any(|item| {
            item["objnam"] == SYSTEM_OBJECT
                && item["keys"]
                    .as_array()
                    .is_some_and(|keys| keys.iter().any(|k| k == "PROPNAME"))
        })
}

/// Whether `request` is a keepalive probe
pub fn is_keepalive(request: &Request) -> bool {
    request.command == commands::GET_PARAM_LIST
        && !is_handshake(request)
        && first_objnam(request).as_deref() == Some(SYSTEM_OBJECT)
}

/// Coordinator on a mock transport with default settings
pub fn coordinator(transport: MockTransport) -> Coordinator {
    builder(transport).build().unwrap()
}

/// Builder on a mock transport
pub fn builder(transport: MockTransport) -> CoordinatorBuilder {
    CoordinatorBuilder::new("mock-controller").with_transport(Box::new(transport))
}

/// Assert that `actual` is `expected` after `start`, within a few milliseconds
pub fn assert_elapsed(start: Instant, actual: Instant, expected: Duration) {
    let elapsed = actual.duration_since(start);
    let diff = if elapsed > expected {
        elapsed - expected
    } else {
        expected - elapsed
    };
    assert!(
        diff <= Duration::from_millis(5),
        "expected {:?} after start, got {:?}",
        expected,
        elapsed
    );
}
