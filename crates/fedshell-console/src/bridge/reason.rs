//! Why a bridge session ended.

use std::fmt;

use crate::shell::ShellError;
use crate::transport::CloseCode;

/// Terminal outcome of a bridge session, reported to the client as the
/// reason of its final `Close` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The shell process exited with this code.
    Exited(i32),
    /// The client sent `Close` with this reason.
    ClientClosed(String),
    /// The WebSocket went away without a `Close` message.
    ClientDisconnected,
    /// The client sent a malformed frame.
    Protocol(String),
    /// The shell stream could not be opened.
    Open(ShellError),
    /// The shell stream failed after it was opened.
    Stream(ShellError),
    /// No bytes moved in either direction for the idle timeout.
    IdleTimeout,
    /// Forced teardown through the registry.
    Terminated(String),
}

impl CloseReason {
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::Exited(_)
            | Self::ClientClosed(_)
            | Self::ClientDisconnected
            | Self::IdleTimeout
            | Self::Terminated(_) => CloseCode::Normal,
            Self::Protocol(_) => CloseCode::Policy,
            Self::Open(_) | Self::Stream(_) => CloseCode::Error,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit {code}"),
            Self::ClientClosed(_) => f.write_str("client closed"),
            Self::ClientDisconnected => f.write_str("client disconnected"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Open(err) | Self::Stream(err) => write!(f, "{err}"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::Terminated(reason) => write!(f, "terminated: {reason}"),
        }
    }
}
