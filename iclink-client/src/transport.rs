//! Transport sessions
//!
//! A [`Transport`] opens and closes the byte stream and writes requests. It
//! reports everything that arrives through the [`SessionSink`] handed to
//! `open`. Each sink carries the generation of the session it belongs to, so
//! the coordinator can ignore stragglers from a session it already tore down.
//!
//! [`TcpTransport`] is the production implementation: one `TcpStream`, a
//! reader task splitting the stream into `\r\n` frames and decoding them with
//! the core codec.

use async_trait::async_trait;
use iclink_core::{codec, Error, Message, Request, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Bound on writing one frame when none is configured
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Something the transport observed on the session
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded inbound message
    Message(Message),
    /// A frame that could not be decoded
    ProtocolError(String),
    /// The stream ended or failed
    Closed(String),
}

#[derive(Debug)]
pub(crate) struct SessionEvent {
    pub(crate) generation: u64,
    pub(crate) event: TransportEvent,
}

/// Delivers transport events for one session to the coordinator
#[derive(Debug, Clone)]
pub struct SessionSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    /// Session this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a decoded message
    pub fn message(&self, message: Message) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    /// Report an undecodable frame
    pub fn protocol_error(&self, detail: impl Into<String>) -> bool {
        self.emit(TransportEvent::ProtocolError(detail.into()))
    }

    /// Report the end of the session
    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed(reason.into()))
    }

    /// Returns false once the coordinator is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Whether the coordinator stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Byte-stream session to the controller
#[async_trait]
pub trait Transport: Send + 'static {
    /// Open a session; inbound traffic goes to `sink`
    async fn open(&mut self, host: &str, port: u16, sink: SessionSink) -> Result<()>;

    /// Write one request
    async fn write(&mut self, request: &Request) -> Result<()>;

    /// Close the session, if open
    async fn close(&mut self);
}

/// TCP transport with `\r\n` line framing
///
/// Writes are bounded by a timeout: the coordinator awaits them inline, so a
/// controller that stops reading must not stall it.
pub struct TcpTransport {
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    write_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            writer: None,
            reader: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl TcpTransport {
    /// Transport with no session open
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail a write that has not completed within `timeout`
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    async fn read_loop(mut stream: tokio::net::tcp::OwnedReadHalf, sink: SessionSink) {
        let mut buffer = codec::FrameBuffer::new();
        let mut chunk = vec![0u8; 8192];
        loop {
            let read = match stream.read(&mut chunk).await {
                Ok(0) => {
                    sink.closed("connection closed by controller");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    sink.closed(format!("read failed: {}", e));
                    return;
                }
            };
            for frame in buffer.push(&chunk[..read]) {
                let delivered = match frame.and_then(|frame| codec::decode(&frame)) {
                    Ok(message) => sink.message(message),
                    Err(e) => {
                        tracing::debug!(error = %e, "Undecodable frame");
                        sink.protocol_error(e.to_string())
                    }
                };
                if !delivered {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self, host: &str, port: u16, sink: SessionSink) -> Result<()> {
        self.close().await;

        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let generation = sink.generation();
        self.reader = Some(tokio::spawn(Self::read_loop(read_half, sink)));
        self.writer = Some(write_half);
        tracing::debug!(host, port, generation, "TCP session open");
        Ok(())
    }

    async fn write(&mut self, request: &Request) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        let frame = codec::encode_request(request)?;
        let write = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Transport(format!(
                "write timed out after {:?}",
                self.write_timeout
            ))),
        }
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "Error shutting down TCP writer");
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iclink_core::{commands, Params};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = SessionSink::new(7, tx);
        assert!(sink.closed("bye"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, 7);
        assert!(matches!(event.event, TransportEvent::Closed(ref r) if r == "bye"));

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.protocol_error("late"));
    }

    #[tokio::test]
    async fn test_write_without_session() {
        let mut transport = TcpTransport::new();
        let request = Request::new(1, commands::GET_PARAM_LIST, Params::new());
        assert_eq!(transport.write(&request).await, Err(Error::NotConnected));
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();

            // one malformed frame, then a split response
            write_half.write_all(b"not json\r\n").await.unwrap();
            let reply = format!(
                r#"{{"messageID":"{}","command":"GetParamList","response":"200"}}"#,
                request["messageID"].as_str().unwrap()
            );
            let (head, tail) = reply.split_at(10);
            write_half.write_all(head.as_bytes()).await.unwrap();
            write_half.flush().await.unwrap();
            write_half.write_all(tail.as_bytes()).await.unwrap();
            write_half.write_all(b"\r\n").await.unwrap();
            write_half.shutdown().await.unwrap();
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::new();
        transport
            .open("127.0.0.1", port, SessionSink::new(1, tx))
            .await
            .unwrap();
        transport
            .write(&Request::new(42, commands::GET_PARAM_LIST, Params::new()))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event, TransportEvent::ProtocolError(_)));

        match rx.recv().await.unwrap().event {
            TransportEvent::Message(Message::Response(response)) => {
                assert_eq!(response.id(), Some(42));
            }
            other => panic!("Expected response, got {:?}", other),
        }

        let last = rx.recv().await.unwrap();
        assert!(matches!(last.event, TransportEvent::Closed(_)));

        transport.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_times_out_when_peer_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            // accept, then never read
            let (_stream, _) = listener.accept().await.unwrap();
            let _ = hold_rx.await;
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::new().with_write_timeout(Duration::from_millis(200));
        transport
            .open("127.0.0.1", port, SessionSink::new(1, tx))
            .await
            .unwrap();

        // larger than any socket buffer pair on loopback
        let mut params = Params::new();
        params.insert("blob".into(), serde_json::Value::String("x".repeat(64 << 20)));
        let request = Request::new(1, commands::SET_PARAM_LIST, params);
        match transport.write(&request).await {
            Err(Error::Transport(reason)) => assert!(reason.contains("timed out")),
            other => panic!("Expected write timeout, got {:?}", other),
        }

        transport.close().await;
        let _ = hold_tx.send(());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::new();
        let result = transport.open("127.0.0.1", port, SessionSink::new(1, tx)).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
