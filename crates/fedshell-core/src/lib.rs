//! fedshell Core Library
//!
//! Shared functionality for fedshell components:
//! - Configuration resolution and hierarchy
//! - Common error types
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::ConsoleConfig;
pub use error::{Error, Result};
