//! Shell stream errors and gRPC status mapping.

use thiserror::Error;
use tonic::{Code, Status};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// The agent could not be reached or did not answer in time.
    #[error("target unreachable: {0}")]
    TargetUnreachable(String),

    /// The agent answered but refused to start the shell.
    #[error("target rejected: {0}")]
    TargetRejected(String),

    /// The shell stream failed after it was established.
    #[error("shell stream error: {0}")]
    Stream(String),
}

impl ShellError {
    /// Classify a status received while opening the stream.
    pub fn from_open_status(status: &Status) -> Self {
        if is_peer_disconnect(status) || status.code() == Code::DeadlineExceeded {
            Self::TargetUnreachable(describe(status))
        } else {
            Self::TargetRejected(describe(status))
        }
    }

    /// Classify a status received after the shell started.
    pub fn from_stream_status(status: &Status) -> Self {
        if is_peer_disconnect(status) {
            Self::Stream(format!("connection to agent lost: {}", status.message()))
        } else {
            Self::Stream(describe(status))
        }
    }

    /// Only unreachable targets are worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TargetUnreachable(_))
    }
}

fn describe(status: &Status) -> String {
    format!("{:?}: {}", status.code(), status.message())
}

/// Check if a gRPC status represents the agent or the network going away
/// rather than an application-level refusal.
///
/// The status code is checked first. The substring checks cover transport
/// failures that hyper/h2 surface as `Unknown` or `Internal`; their wording
/// is not stable across library versions.
pub fn is_peer_disconnect(status: &Status) -> bool {
    match status.code() {
        Code::Unavailable | Code::Cancelled => return true,
        _ => {}
    }

    let msg = status.message();
    msg.contains("h2 protocol error")
        || msg.contains("broken pipe")
        || msg.contains("connection reset")
        || msg.contains("transport error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_status_mapping() {
        for status in [
            Status::unavailable("connection refused"),
            Status::deadline_exceeded("slow"),
            Status::cancelled("gone"),
            Status::unknown("transport error"),
        ] {
            assert!(
                matches!(ShellError::from_open_status(&status), ShellError::TargetUnreachable(_)),
                "{status:?}"
            );
        }
        for status in [
            Status::not_found("no such container"),
            Status::permission_denied("program not allowed"),
            Status::invalid_argument("empty command"),
            Status::failed_precondition("pod mismatch"),
            Status::unauthenticated("bad token"),
        ] {
            assert!(
                matches!(ShellError::from_open_status(&status), ShellError::TargetRejected(_)),
                "{status:?}"
            );
        }
    }

    #[test]
    fn stream_status_is_always_stream_error() {
        let err = ShellError::from_stream_status(&Status::unavailable("reset"));
        assert_eq!(err, ShellError::Stream("connection to agent lost: reset".into()));
        assert!(!err.is_retryable());
        assert!(matches!(
            ShellError::from_stream_status(&Status::internal("boom")),
            ShellError::Stream(_)
        ));
    }

    #[test]
    fn only_unreachable_is_retryable() {
        assert!(ShellError::TargetUnreachable(String::new()).is_retryable());
        assert!(!ShellError::TargetRejected(String::new()).is_retryable());
    }
}
