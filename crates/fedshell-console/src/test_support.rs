//! In-memory transport and shell doubles shared by unit tests.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use fedshell_proto::v1::{self as pb, exec_request};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use crate::auth::Identity;
use crate::registry::SessionId;
use crate::shell::{ShellConnector, ShellError, ShellEvent, ShellStream, TargetRef, TerminalSize};
use crate::transport::{ControlMessage, TransportConfig, TransportEndpoint};

pub fn target(pod: &str) -> TargetRef {
    TargetRef {
        namespace: "fl-jobs".into(),
        pod: pod.into(),
        container: "worker".into(),
        command: vec!["/bin/sh".into()],
        endpoint: "http://127.0.0.1:50080".into(),
    }
}

pub fn alice() -> Identity {
    Identity {
        user_id: "u-1".into(),
        username: "alice".into(),
        role: "operator".into(),
    }
}

pub fn transport_config(watermark: usize) -> TransportConfig {
    TransportConfig {
        outbound_frames: 16,
        watermark_bytes: watermark,
        heartbeat_interval: Duration::from_secs(3600),
    }
}

/// Browser side of an in-memory transport.
pub struct FakeClient {
    pub tx: mpsc::Sender<Result<Message, Infallible>>,
    pub rx: mpsc::Receiver<Message>,
}

/// Build a transport whose socket is a pair of channels. `capacity` bounds
/// the frames the fake socket accepts before the writer blocks.
pub fn transport_pair(config: &TransportConfig, capacity: usize) -> (TransportEndpoint, FakeClient) {
    let (sink_tx, rx) = mpsc::channel(capacity);
    let (tx, stream_rx) = mpsc::channel(64);
    let endpoint =
        TransportEndpoint::from_parts(PollSender::new(sink_tx), ReceiverStream::new(stream_rx), config);
    (endpoint, FakeClient { tx, rx })
}

/// Everything the client observed up to the WebSocket close frame.
#[derive(Debug, Default)]
pub struct Transcript {
    pub messages: Vec<ControlMessage>,
    pub close_code: Option<u16>,
}

impl Transcript {
    pub fn data(&self) -> Vec<u8> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                ControlMessage::Data(d) => Some(d.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn closes(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                ControlMessage::Close(r) => Some(r.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl FakeClient {
    pub async fn send(&self, message: ControlMessage) {
        self.tx.send(Ok(message.to_frame())).await.unwrap();
    }

    pub async fn send_raw(&self, frame: Message) {
        self.tx.send(Ok(frame)).await.unwrap();
    }

    /// Next control message, skipping pings. `None` at the close frame.
    pub async fn next_message(&mut self) -> Option<ControlMessage> {
        loop {
            match self.rx.recv().await? {
                Message::Binary(b) => return Some(ControlMessage::decode(&b).unwrap()),
                Message::Text(t) => {
                    return Some(ControlMessage::decode(t.as_str().as_bytes()).unwrap());
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => return None,
            }
        }
    }

    /// Read until the close frame or the end of the socket.
    pub async fn transcript(&mut self) -> Transcript {
        let mut transcript = Transcript::default();
        while let Some(frame) = self.rx.recv().await {
            match frame {
                Message::Binary(b) => transcript
                    .messages
                    .push(ControlMessage::decode(&b).unwrap()),
                Message::Text(t) => transcript
                    .messages
                    .push(ControlMessage::decode(t.as_str().as_bytes()).unwrap()),
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(frame) => {
                    transcript.close_code = frame.map(|f| f.code);
                    break;
                }
            }
        }
        transcript
    }
}

/// Pod side of a fake shell stream.
pub struct FakeShell {
    pub start_size: TerminalSize,
    pub requests: mpsc::Receiver<pb::ExecRequest>,
    pub events: mpsc::Sender<ShellEvent>,
}

impl FakeShell {
    pub async fn next_payload(&mut self) -> Option<exec_request::Payload> {
        self.requests.recv().await.and_then(|r| r.payload)
    }

    /// Collect stdin until `len` bytes have arrived.
    pub async fn read_stdin(&mut self, len: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        while buf.len() < len {
            match self.next_payload().await {
                Some(exec_request::Payload::Stdin(data)) => buf.extend(data),
                Some(_) => {}
                None => break,
            }
        }
        buf
    }

    pub async fn emit(&self, event: ShellEvent) {
        self.events.send(event).await.unwrap();
    }
}

/// Connector handing out [`FakeShell`]s, with scripted failures.
pub struct FakeConnector {
    failures: Mutex<VecDeque<ShellError>>,
    shells: mpsc::UnboundedSender<FakeShell>,
    open_delay: Option<Duration>,
    pub attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeShell>) {
        let (shells, rx) = mpsc::unbounded_channel();
        (
            Self {
                failures: Mutex::new(VecDeque::new()),
                shells,
                open_delay: None,
                attempts: AtomicUsize::new(0),
            },
            rx,
        )
    }

    /// Fail the next opens with these errors, in order.
    pub fn failing(self, errors: impl IntoIterator<Item = ShellError>) -> Self {
        self.failures.lock().unwrap().extend(errors);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellConnector for FakeConnector {
    async fn open(
        &self,
        _session_id: SessionId,
        _target: &TargetRef,
        size: TerminalSize,
    ) -> Result<ShellStream, ShellError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let (req_tx, req_rx) = mpsc::channel(64);
        let (ev_tx, ev_rx) = mpsc::channel(16);
        self.shells
            .send(FakeShell {
                start_size: size,
                requests: req_rx,
                events: ev_tx,
            })
            .unwrap();
        Ok(ShellStream::new(req_tx, ReceiverStream::new(ev_rx)))
    }
}
