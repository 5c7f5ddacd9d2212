//! Exec errors and their gRPC status mapping.

use thiserror::Error;
use tonic::Status;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("pod {requested} is not served here (agent pod: {served})")]
    PodMismatch { requested: String, served: String },

    #[error("command must not be empty")]
    EmptyCommand,

    #[error("program {0} is not allowed")]
    ProgramNotAllowed(String),

    #[error("program {0} not found")]
    ProgramNotFound(String),

    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },
}

impl From<ExecError> for Status {
    fn from(err: ExecError) -> Self {
        match &err {
            ExecError::PodMismatch { .. } | ExecError::ProgramNotFound(_) => {
                Self::not_found(err.to_string())
            }
            ExecError::EmptyCommand => Self::invalid_argument(err.to_string()),
            ExecError::ProgramNotAllowed(_) => Self::permission_denied(err.to_string()),
            ExecError::SpawnFailed { .. } => Self::failed_precondition(err.to_string()),
        }
    }
}
