//! Bridge session reactor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use fedshell_core::config::BridgeConfig;
use fedshell_proto::v1::exec_request;
use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

use super::reason::CloseReason;
use crate::registry::{Session, SessionState};
use crate::shell::{
    ShellConnector, ShellError, ShellEvent, ShellStream, TerminalSize, signal_to_proto,
};
use crate::transport::{
    ControlMessage, TransportEndpoint, TransportError, TransportReceiver, TransportSender,
    TransportWriter,
};

/// Timeouts governing one bridge session.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub idle_timeout: Duration,
    pub open_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            open_timeout: config.open_timeout(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// Ties one transport endpoint to one shell stream.
///
/// Lifecycle: `Connecting -> Active -> Closing -> Closed`, or
/// `Connecting -> Closed` when the shell never opens. The client receives
/// exactly one `Close` message whenever the connection is still writable.
pub struct BridgeSession {
    session: Arc<Session>,
    transport: TransportEndpoint,
    connector: Arc<dyn ShellConnector>,
    settings: BridgeSettings,
    size: TerminalSize,
}

impl BridgeSession {
    pub fn new(
        session: Arc<Session>,
        transport: TransportEndpoint,
        connector: Arc<dyn ShellConnector>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            session,
            transport,
            connector,
            settings,
            size: TerminalSize::default(),
        }
    }

    /// Initial terminal size passed to the shell on open.
    #[must_use]
    pub const fn with_size(mut self, size: TerminalSize) -> Self {
        self.size = size;
        self
    }

    /// Drive the session to completion.
    #[instrument(
        skip_all,
        fields(session_id = %self.session.id(), pod = %self.session.target())
    )]
    pub async fn run(self) -> CloseReason {
        let Self {
            session,
            transport,
            connector,
            settings,
            size,
        } = self;
        let (sender, mut receiver, writer) = transport.into_parts();

        let (reason, next) =
            match connect(&session, connector.as_ref(), &settings, &mut receiver, &sender, size)
                .await
            {
                Ok((shell, early)) => {
                    advance(&session, SessionState::Active);
                    info!(user = %session.identity().username, "Session active");
                    let reason = relay(&session, &settings, &sender, &mut receiver, shell, early).await;
                    (reason, SessionState::Closing)
                }
                Err(reason) => (reason, SessionState::Closed),
            };

        if next == SessionState::Closing {
            advance(&session, SessionState::Closing);
        }
        info!(reason = %reason, "Closing session");

        drop(receiver);
        finish_transport(sender, writer, &reason, settings.close_timeout).await;
        advance(&session, SessionState::Closed);
        reason
    }
}

/// Client messages kept while the shell opens.
const MAX_EARLY_MESSAGES: usize = 64;

/// Client input waiting for room on the shell stream.
type PendingInput = VecDeque<exec_request::Payload>;

fn advance(session: &Session, next: SessionState) {
    if let Err(e) = session.transition(next) {
        warn!(error = %e, "Unexpected session state");
    }
}

fn terminated_reason(session: &Session) -> CloseReason {
    CloseReason::Terminated(
        session
            .terminate_reason()
            .unwrap_or_else(|| "terminated".to_string()),
    )
}

/// Open the shell while watching the client.
///
/// Client messages that arrive before the shell is up are kept, in order,
/// up to one watermark of data and [`MAX_EARLY_MESSAGES`] messages, and
/// returned for replay. Further client frames wait in the socket.
async fn connect(
    session: &Session,
    connector: &dyn ShellConnector,
    settings: &BridgeSettings,
    receiver: &mut TransportReceiver,
    sender: &TransportSender,
    size: TerminalSize,
) -> Result<(ShellStream, PendingInput), CloseReason> {
    let mut open = connector.open(session.id(), session.target(), size);
    let deadline = tokio::time::sleep(settings.open_timeout);
    tokio::pin!(deadline);

    let byte_limit = sender.max_chunk();
    let mut early = PendingInput::new();
    let mut early_count = 0usize;
    let mut early_bytes = 0usize;

    loop {
        let room = early_count < MAX_EARLY_MESSAGES && early_bytes < byte_limit;
        tokio::select! {
            biased;
            () = session.terminated() => return Err(terminated_reason(session)),
            opened = &mut open => {
                return opened.map(|shell| (shell, early)).map_err(CloseReason::Open);
            }
            () = &mut deadline => {
                return Err(CloseReason::Open(ShellError::TargetUnreachable(format!(
                    "shell did not start within {}s",
                    settings.open_timeout.as_secs()
                ))));
            }
            inbound = receiver.recv(), if room => match inbound {
                Some(Ok(message)) => {
                    early_count += 1;
                    early_bytes += message.data_len();
                    if let Some(reason) = queue_input(session, &mut early, message) {
                        return Err(reason);
                    }
                }
                Some(Err(e)) => return Err(transport_failure(e)),
                None => return Err(CloseReason::ClientDisconnected),
            },
        }
    }
}

fn transport_failure(error: TransportError) -> CloseReason {
    match error {
        TransportError::Protocol(msg) => CloseReason::Protocol(msg),
        TransportError::Socket(msg) => {
            debug!(error = %msg, "Client socket failed");
            CloseReason::ClientDisconnected
        }
        TransportError::Closed => CloseReason::ClientDisconnected,
    }
}

/// Turn one client message into shell input. Returns a reason when the
/// session must close.
fn queue_input(
    session: &Session,
    pending: &mut PendingInput,
    message: ControlMessage,
) -> Option<CloseReason> {
    match message {
        ControlMessage::Close(reason) => return Some(CloseReason::ClientClosed(reason)),
        ControlMessage::Data(data) => {
            session.touch_inbound(data.len());
            if !data.is_empty() {
                pending.push_back(exec_request::Payload::Stdin(data));
            }
        }
        ControlMessage::Resize { rows, cols } => {
            debug!(rows, cols, "Resizing terminal");
            pending.push_back(exec_request::Payload::Resize(
                TerminalSize { rows, cols }.into(),
            ));
        }
        ControlMessage::Signal(kind) => {
            debug!(signal = %kind, "Forwarding signal");
            pending.push_back(exec_request::Payload::Signal(signal_to_proto(kind) as i32));
        }
    }
    None
}

/// Relay between client and shell until either side ends.
///
/// Shell input and client output are both reserved inside the one
/// `select!`; at most one client message waits for the shell at a time.
async fn relay(
    session: &Session,
    settings: &BridgeSettings,
    sender: &TransportSender,
    receiver: &mut TransportReceiver,
    shell: ShellStream,
    mut pending: PendingInput,
) -> CloseReason {
    let (input, mut events) = shell.into_parts();
    let max_chunk = sender.max_chunk();
    let mut outbox: VecDeque<Vec<u8>> = VecDeque::new();

    let reason = loop {
        let idle_deadline = session.last_activity() + settings.idle_timeout;
        let next_len = outbox.front().map_or(0, Vec::len);

        tokio::select! {
            biased;
            () = session.terminated() => break terminated_reason(session),
            () = tokio::time::sleep_until(idle_deadline) => break CloseReason::IdleTimeout,
            slot = sender.reserve(next_len), if !outbox.is_empty() => {
                let Ok(slot) = slot else {
                    break CloseReason::ClientDisconnected;
                };
                if let Some(chunk) = outbox.pop_front() {
                    session.touch_outbound(chunk.len());
                    slot.send(ControlMessage::Data(chunk));
                }
            }
            slot = input.reserve(), if !pending.is_empty() => match slot {
                Ok(slot) => {
                    if let Some(payload) = pending.pop_front() {
                        slot.send(payload);
                    }
                }
                Err(e) => {
                    // The shell side is going away; its event stream reports how.
                    debug!(error = %e, dropped = pending.len(), "Dropping client input");
                    pending.clear();
                }
            },
            inbound = receiver.recv(), if pending.is_empty() => match inbound {
                Some(Ok(message)) => {
                    if let Some(reason) = queue_input(session, &mut pending, message) {
                        break reason;
                    }
                }
                Some(Err(e)) => break transport_failure(e),
                None => break CloseReason::ClientDisconnected,
            },
            event = events.next(), if outbox.is_empty() => match event {
                Some(ShellEvent::Stdout(data) | ShellEvent::Stderr(data)) => {
                    outbox.extend(data.chunks(max_chunk).map(<[u8]>::to_vec));
                }
                Some(ShellEvent::Exited(code)) => break CloseReason::Exited(code),
                Some(ShellEvent::Error(e)) => break CloseReason::Stream(e),
                None => {
                    break CloseReason::Stream(ShellError::Stream("shell stream ended".into()));
                }
            },
        }
    };

    // Releases the shell stream: the request side half-closes, the response
    // side is cancelled.
    drop(input);
    drop(events);
    reason
}

/// Send the final `Close`, then let the writer flush and shut the socket.
async fn finish_transport(
    sender: TransportSender,
    writer: TransportWriter,
    reason: &CloseReason,
    timeout: Duration,
) {
    let close = sender.close(reason.to_string(), reason.close_code());
    match tokio::time::timeout(timeout, close).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Client gone before close"),
        Err(_) => warn!("Timed out queueing close message"),
    }
    drop(sender);
    writer.finish(timeout).await;
}
