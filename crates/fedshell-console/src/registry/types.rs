//! Registry types.

use std::fmt;
use std::time::SystemTime;

use thiserror::Error;

use crate::shell::TargetRef;

/// Random 128-bit session identifier.
pub type SessionId = uuid::Uuid;

/// Bridge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active | Self::Closed)
                | (Self::Active, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session for listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub target: TargetRef,
    pub user: String,
    pub state: SessionState,
    pub created_at: SystemTime,
    pub last_activity: SystemTime,
    /// Bytes received from the client.
    pub bytes_in: u64,
    /// Bytes sent to the client.
    pub bytes_out: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("too many active sessions (limit {limit})")]
    Full { limit: usize },

    #[error("invalid session state transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

#[cfg(test)]
mod tests {
    use super::SessionState::{Active, Closed, Closing, Connecting};

    #[test]
    fn lifecycle_edges() {
        let all = [Connecting, Active, Closing, Closed];
        let allowed = [
            (Connecting, Active),
            (Connecting, Closed),
            (Active, Closing),
            (Closing, Closed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }
}
