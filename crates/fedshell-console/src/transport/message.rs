//! Control messages and their WebSocket frame encoding.
//!
//! Every frame carries exactly one message. The first byte is an ASCII tag:
//!
//! | tag | message  | payload                         |
//! |-----|----------|---------------------------------|
//! | `0` | `Data`   | raw terminal bytes              |
//! | `1` | `Resize` | `{"rows":u16,"cols":u16}`       |
//! | `2` | `Signal` | signal name (`INT`, `SIGTERM`…) |
//! | `3` | `Close`  | UTF-8 reason                    |
//!
//! Both text and binary frames are accepted. Outbound `Data` is sent as a
//! binary frame, everything else as text.

use std::fmt;

use axum::body::Bytes;
use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use super::error::TransportError;

pub const TAG_DATA: u8 = b'0';
pub const TAG_RESIZE: u8 = b'1';
pub const TAG_SIGNAL: u8 = b'2';
pub const TAG_CLOSE: u8 = b'3';

/// A terminal event flowing between the browser and the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Terminal bytes: keystrokes inbound, shell output outbound.
    Data(Vec<u8>),
    /// New terminal window size.
    Resize { rows: u16, cols: u16 },
    /// Signal to deliver to the shell's foreground process.
    Signal(SignalKind),
    /// Terminal message; nothing follows it.
    Close(String),
}

impl ControlMessage {
    /// Number of payload bytes accounted against the outbound watermark.
    pub fn data_len(&self) -> usize {
        match self {
            Self::Data(data) => data.len(),
            _ => 0,
        }
    }

    /// Encode into a WebSocket frame.
    pub fn to_frame(&self) -> Message {
        match self {
            Self::Data(data) => {
                let mut buf = Vec::with_capacity(data.len() + 1);
                buf.push(TAG_DATA);
                buf.extend_from_slice(data);
                Message::Binary(Bytes::from(buf))
            }
            Self::Resize { rows, cols } => {
                let payload = serde_json::json!({ "rows": rows, "cols": cols });
                Message::Text(format!("{}{payload}", char::from(TAG_RESIZE)).into())
            }
            Self::Signal(kind) => {
                Message::Text(format!("{}{}", char::from(TAG_SIGNAL), kind.name()).into())
            }
            Self::Close(reason) => {
                Message::Text(format!("{}{reason}", char::from(TAG_CLOSE)).into())
            }
        }
    }

    /// Decode the payload of a text or binary frame.
    pub fn decode(frame: &[u8]) -> Result<Self, TransportError> {
        let (&tag, payload) = frame
            .split_first()
            .ok_or_else(|| TransportError::Protocol("empty frame".into()))?;

        match tag {
            TAG_DATA => Ok(Self::Data(payload.to_vec())),
            TAG_RESIZE => {
                let size: ResizePayload = serde_json::from_slice(payload)
                    .map_err(|e| TransportError::Protocol(format!("malformed resize: {e}")))?;
                if size.rows == 0 || size.cols == 0 {
                    return Err(TransportError::Protocol(format!(
                        "invalid terminal size {}x{}",
                        size.rows, size.cols
                    )));
                }
                Ok(Self::Resize {
                    rows: size.rows,
                    cols: size.cols,
                })
            }
            TAG_SIGNAL => {
                let name = std::str::from_utf8(payload)
                    .map_err(|_| TransportError::Protocol("signal name is not UTF-8".into()))?;
                SignalKind::parse(name)
                    .map(Self::Signal)
                    .ok_or_else(|| TransportError::Protocol(format!("unknown signal {name:?}")))
            }
            TAG_CLOSE => {
                let reason = std::str::from_utf8(payload)
                    .map_err(|_| TransportError::Protocol("close reason is not UTF-8".into()))?;
                Ok(Self::Close(reason.to_string()))
            }
            other => Err(TransportError::Protocol(format!(
                "unknown frame tag 0x{other:02x}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ResizePayload {
    rows: u16,
    cols: u16,
}

/// Signals a client may forward to the remote shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Kill,
    Hangup,
    Quit,
}

impl SignalKind {
    /// Short POSIX name without the `SIG` prefix.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "INT",
            Self::Terminate => "TERM",
            Self::Kill => "KILL",
            Self::Hangup => "HUP",
            Self::Quit => "QUIT",
        }
    }

    /// Parse `INT`, `sigint`, `SIGTERM`, ...
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let short = upper.strip_prefix("SIG").unwrap_or(&upper);
        match short {
            "INT" => Some(Self::Interrupt),
            "TERM" => Some(Self::Terminate),
            "KILL" => Some(Self::Kill),
            "HUP" => Some(Self::Hangup),
            "QUIT" => Some(Self::Quit),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.name())
    }
}
