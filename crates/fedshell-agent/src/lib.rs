//! fedshell Agent Library
//!
//! Runs inside a pod and serves `ShellService/Exec`:
//! - Start request validation against the agent's exec policy
//! - Process spawning with piped stdio
//! - Output pumping, stdin forwarding, signal delivery and exit status

pub mod exec;
pub mod server;
