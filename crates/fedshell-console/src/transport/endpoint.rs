//! WebSocket endpoint: bounded outbound queue, writer task, inbound decoder.

use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use fedshell_core::config::BridgeConfig;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::error::TransportError;
use super::message::ControlMessage;

/// WebSocket close frame reasons are limited to 123 bytes.
const MAX_CLOSE_REASON: usize = 123;

type InboundStream = Pin<Box<dyn Stream<Item = Result<Message, String>> + Send>>;

/// Outbound queue sizing and keepalive.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Frames that may sit in the writer queue.
    pub outbound_frames: usize,
    /// `Data` bytes that may be queued or in flight at once.
    pub watermark_bytes: usize,
    pub heartbeat_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for TransportConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            outbound_frames: config.outbound_frames,
            watermark_bytes: config.watermark_bytes,
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// WebSocket close status sent after the final `Close` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Session ended normally.
    Normal,
    /// Connection rejected (authentication, resolution, admission).
    Policy,
    /// Shell stream or internal failure.
    Error,
}

impl CloseCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Policy => 1008,
            Self::Error => 1011,
        }
    }
}

enum Outbound {
    Frame {
        message: ControlMessage,
        credit: Option<OwnedSemaphorePermit>,
    },
    Close {
        reason: String,
        code: CloseCode,
    },
}

/// One client connection, split into its three owned halves.
pub struct TransportEndpoint {
    sender: TransportSender,
    receiver: TransportReceiver,
    writer: TransportWriter,
}

impl TransportEndpoint {
    /// Wrap an upgraded axum WebSocket.
    pub fn from_websocket(socket: WebSocket, config: &TransportConfig) -> Self {
        let (sink, stream) = socket.split();
        Self::from_parts(sink, stream, config)
    }

    /// Build an endpoint from any frame sink and frame stream.
    ///
    /// Spawns the writer task, so this must run inside a tokio runtime.
    pub fn from_parts<Si, St, E>(sink: Si, stream: St, config: &TransportConfig) -> Self
    where
        Si: Sink<Message> + Send + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Message, E>> + Send + 'static,
        E: Display + 'static,
    {
        let watermark = config.watermark_bytes.max(1);
        let (tx, rx) = mpsc::channel(config.outbound_frames.max(1));
        let credit = Arc::new(Semaphore::new(watermark));

        let handle = tokio::spawn(write_loop(
            Box::pin(sink),
            rx,
            Arc::clone(&credit),
            config.heartbeat_interval,
        ));

        let inbound: InboundStream = stream.map(|item| item.map_err(|e| e.to_string())).boxed();

        Self {
            sender: TransportSender {
                tx,
                credit,
                watermark,
            },
            receiver: TransportReceiver {
                stream: inbound,
                finished: false,
            },
            writer: TransportWriter { handle },
        }
    }

    pub fn into_parts(self) -> (TransportSender, TransportReceiver, TransportWriter) {
        (self.sender, self.receiver, self.writer)
    }
}

/// Cloneable handle for queueing outbound messages.
#[derive(Clone)]
pub struct TransportSender {
    tx: mpsc::Sender<Outbound>,
    credit: Arc<Semaphore>,
    watermark: usize,
}

impl TransportSender {
    /// Largest `Data` payload a single slot may carry.
    pub const fn max_chunk(&self) -> usize {
        self.watermark
    }

    /// Wait for room for one frame carrying `len` data bytes.
    ///
    /// Cancel safe: dropping the future releases anything acquired so far.
    /// `len` is clamped to the watermark, so callers must chunk larger
    /// payloads with [`Self::max_chunk`].
    pub async fn reserve(&self, len: usize) -> Result<SendSlot, TransportError> {
        let bytes = len.min(self.watermark);
        let credit = if bytes == 0 {
            None
        } else {
            let permits = u32::try_from(bytes)
                .map_err(|_| TransportError::Protocol(format!("frame too large: {bytes}")))?;
            Some(
                Arc::clone(&self.credit)
                    .acquire_many_owned(permits)
                    .await
                    .map_err(|_| TransportError::Closed)?,
            )
        };
        let permit = self
            .tx
            .clone()
            .reserve_owned()
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(SendSlot { permit, credit })
    }

    /// Queue a message, splitting oversized `Data` into watermark chunks.
    pub async fn send(&self, message: ControlMessage) -> Result<(), TransportError> {
        match message {
            ControlMessage::Data(data) if data.len() > self.watermark => {
                for chunk in data.chunks(self.watermark) {
                    self.reserve(chunk.len())
                        .await?
                        .send(ControlMessage::Data(chunk.to_vec()));
                }
                Ok(())
            }
            other => {
                self.reserve(other.data_len()).await?.send(other);
                Ok(())
            }
        }
    }

    /// Queue the final `Close` message; the writer stops after sending it.
    pub async fn close(
        &self,
        reason: impl Into<String>,
        code: CloseCode,
    ) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Close {
                reason: reason.into(),
                code,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Reserved queue position plus byte credit for one outbound frame.
pub struct SendSlot {
    permit: mpsc::OwnedPermit<Outbound>,
    credit: Option<OwnedSemaphorePermit>,
}

impl SendSlot {
    /// Queue `message` without waiting. The byte credit is held until the
    /// writer has handed the frame to the socket.
    pub fn send(self, message: ControlMessage) {
        let _sender = self.permit.send(Outbound::Frame {
            message,
            credit: self.credit,
        });
    }
}

/// Inbound half: decodes frames into control messages.
pub struct TransportReceiver {
    stream: InboundStream,
    finished: bool,
}

impl TransportReceiver {
    /// Next inbound message, or `None` once the connection is closed.
    ///
    /// A decode or socket error is yielded once and ends the sequence.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Result<ControlMessage, TransportError>> {
        if self.finished {
            return None;
        }
        loop {
            let Some(item) = self.stream.next().await else {
                self.finished = true;
                return None;
            };
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(TransportError::Socket(e)));
                }
            };
            let decoded = match frame {
                Message::Text(text) => ControlMessage::decode(text.as_str().as_bytes()),
                Message::Binary(data) => ControlMessage::decode(&data),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    self.finished = true;
                    return None;
                }
            };
            if decoded.is_err() {
                self.finished = true;
            }
            return Some(decoded);
        }
    }
}

/// Handle to the writer task.
pub struct TransportWriter {
    handle: JoinHandle<()>,
}

impl TransportWriter {
    /// Wait for the writer to flush and close the socket, aborting it after
    /// `timeout`.
    pub async fn finish(mut self, timeout: Duration) {
        if tokio::time::timeout(timeout, &mut self.handle).await.is_err() {
            warn!("transport writer did not finish in time, aborting");
            self.handle.abort();
        }
    }
}

async fn write_loop<Si>(
    mut sink: Pin<Box<Si>>,
    mut rx: mpsc::Receiver<Outbound>,
    credit: Arc<Semaphore>,
    heartbeat: Duration,
) where
    Si: Sink<Message> + Send,
    Si::Error: Display,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(Outbound::Frame { message, credit: permit }) => {
                    let result = sink.send(message.to_frame()).await;
                    drop(permit);
                    if let Err(e) = result {
                        debug!(error = %e, "websocket write failed");
                        break;
                    }
                }
                Some(Outbound::Close { reason, code }) => {
                    let message = ControlMessage::Close(reason.clone()).to_frame();
                    if let Err(e) = sink.send(message).await {
                        debug!(error = %e, "failed to send close message");
                        break;
                    }
                    let frame = CloseFrame {
                        code: code.as_u16(),
                        reason: truncate_reason(&reason).into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "failed to send close frame");
                    }
                    break;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %e, "heartbeat ping failed");
                    break;
                }
            }
        }
    }

    credit.close();
    rx.close();
    let _ = sink.close().await;
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
