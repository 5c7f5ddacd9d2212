//! Shell stream handles and the connector seam.

use std::pin::Pin;

use async_trait::async_trait;
use fedshell_proto::v1::{self as pb, exec_request};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::error::ShellError;
use super::target::{TargetRef, TerminalSize};
use crate::registry::SessionId;
use crate::transport::SignalKind;

/// Event produced by a remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// The process exited; always the last event.
    Exited(i32),
    /// The stream failed; always the last event.
    Error(ShellError),
}

impl ShellEvent {
    const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Error(_))
    }
}

pub type ShellEventStream = Pin<Box<dyn Stream<Item = ShellEvent> + Send>>;

/// Opens shell streams for resolved targets.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Establish the stream and wait until the shell has started.
    ///
    /// Fails with `TargetUnreachable` or `TargetRejected`; never retries.
    async fn open(
        &self,
        session_id: SessionId,
        target: &TargetRef,
        size: TerminalSize,
    ) -> Result<ShellStream, ShellError>;
}

/// An open shell stream: an input handle plus the event sequence.
pub struct ShellStream {
    input: ShellInput,
    events: ShellEventStream,
}

impl ShellStream {
    /// Build a stream from a request sender and raw events.
    ///
    /// The event sequence is normalised: it stops after the first `Exited`
    /// or `Error`, and a source that ends without either yields one
    /// `Error` instead.
    pub fn new<S>(requests: mpsc::Sender<pb::ExecRequest>, events: S) -> Self
    where
        S: Stream<Item = ShellEvent> + Send + 'static,
    {
        Self {
            input: ShellInput { tx: requests },
            events: terminate_once(events),
        }
    }

    pub fn into_parts(self) -> (ShellInput, ShellEventStream) {
        (self.input, self.events)
    }
}

fn terminate_once<S>(events: S) -> ShellEventStream
where
    S: Stream<Item = ShellEvent> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            yield event;
            if terminal {
                return;
            }
        }
        yield ShellEvent::Error(ShellError::Stream(
            "shell stream ended without exit status".into(),
        ));
    })
}

/// Sending half of a shell stream. Dropping every clone half-closes the RPC.
#[derive(Clone)]
pub struct ShellInput {
    tx: mpsc::Sender<pb::ExecRequest>,
}

impl ShellInput {
    pub async fn send_input(&self, data: Vec<u8>) -> Result<(), ShellError> {
        self.send(exec_request::Payload::Stdin(data)).await
    }

    pub async fn send_resize(&self, size: TerminalSize) -> Result<(), ShellError> {
        self.send(exec_request::Payload::Resize(size.into())).await
    }

    pub async fn send_signal(&self, kind: SignalKind) -> Result<(), ShellError> {
        self.send(exec_request::Payload::Signal(signal_to_proto(kind) as i32))
            .await
    }

    /// Wait for room for one request. Cancel safe.
    pub async fn reserve(&self) -> Result<InputSlot<'_>, ShellError> {
        self.tx
            .reserve()
            .await
            .map(|permit| InputSlot { permit })
            .map_err(|_| ShellError::Stream("shell input closed".into()))
    }

    async fn send(&self, payload: exec_request::Payload) -> Result<(), ShellError> {
        self.reserve().await?.send(payload);
        Ok(())
    }
}

/// Reserved room for one request on the shell stream.
pub struct InputSlot<'a> {
    permit: mpsc::Permit<'a, pb::ExecRequest>,
}

impl InputSlot<'_> {
    pub fn send(self, payload: exec_request::Payload) {
        self.permit.send(pb::ExecRequest {
            payload: Some(payload),
        });
    }
}

pub const fn signal_to_proto(kind: SignalKind) -> pb::Signal {
    match kind {
        SignalKind::Interrupt => pb::Signal::Interrupt,
        SignalKind::Terminate => pb::Signal::Terminate,
        SignalKind::Kill => pb::Signal::Kill,
        SignalKind::Hangup => pb::Signal::Hangup,
        SignalKind::Quit => pb::Signal::Quit,
    }
}
