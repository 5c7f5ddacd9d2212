//! Browser-facing transport endpoint.
//!
//! One WebSocket connection carries one terminal session. Frames are decoded
//! into [`ControlMessage`]s on the way in and encoded on the way out by a
//! dedicated writer task that owns the socket's sink half.

pub mod endpoint;
pub mod error;
pub mod message;

pub use endpoint::{
    CloseCode, SendSlot, TransportConfig, TransportEndpoint, TransportReceiver, TransportSender,
    TransportWriter,
};
pub use error::TransportError;
pub use message::{ControlMessage, SignalKind};
