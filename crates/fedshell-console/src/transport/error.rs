//! Transport error types.

/// Errors surfaced by the transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// A frame could not be decoded into a control message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The underlying socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The connection is closed; nothing more can be sent.
    #[error("transport closed")]
    Closed,
}
