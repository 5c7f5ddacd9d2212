//! Bridge session: the per-connection state machine.
//!
//! A bridge owns one transport endpoint and, once opened, one shell stream.
//! It runs as a single reactor task relaying bytes and control messages
//! between them until either side ends, the session idles out, or the
//! registry terminates it.

mod reason;
mod session;


pub use reason::CloseReason;
pub use session::{BridgeSession, BridgeSettings};
