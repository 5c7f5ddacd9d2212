//! fedshell Console Library
//!
//! Terminal session bridge between browser terminals and pod shells:
//! - WebSocket transport endpoint with a byte-bounded outbound queue
//! - Session registry and administrative listing/termination
//! - gRPC shell stream client towards pod agents
//! - Bridge session state machine relaying bytes and control messages
//! - Session supervisor (authentication, target resolution, retries)

pub mod auth;
pub mod bridge;
pub mod registry;
pub mod server;
pub mod shell;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
