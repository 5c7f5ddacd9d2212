//! fedshell Protocol Buffers
//!
//! Generated protobuf code for the fedshell gRPC API.
//!
//! This crate contains:
//! - `ShellService` for bidirectional shell exec streams into pods
//! - `SessionAdminService` for listing and terminating bridge sessions

#![allow(clippy::derive_partial_eq_without_eq)]

/// fedshell v1 API definitions.
pub mod v1 {
    tonic::include_proto!("fedshell.v1");
}

pub mod methods;

// Re-export v1 as the default API version for convenience
pub use v1::*;

// Re-export prost_types for downstream crates that need Timestamp conversion
pub use prost_types;
