//! Shell stream client.
//!
//! Opens the bidirectional `Exec` RPC against a pod's shell agent and turns
//! it into a typed input handle plus a finite sequence of [`ShellEvent`]s.

pub mod client;
pub mod error;
pub mod grpc;
pub mod target;

pub use client::{
    InputSlot, ShellConnector, ShellEvent, ShellEventStream, ShellInput, ShellStream,
    signal_to_proto,
};
pub use error::ShellError;
pub use grpc::GrpcShellConnector;
pub use target::{TargetRef, TerminalSize};
