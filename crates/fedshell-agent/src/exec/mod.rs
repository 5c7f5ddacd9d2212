//! Shell process execution.

mod error;
mod policy;
mod process;

pub use error::ExecError;
pub use policy::ExecPolicy;
pub use process::{OUTPUT_BUFFER, SpawnedShell, exit_code};
