//! Process-wide session registry.
//!
//! The registry is the only state shared between sessions. It hands out
//! [`Session`] records on creation and is the sole authority on which
//! sessions exist; each record is mutated by its bridge and, for forced
//! teardown, through [`SessionRegistry::terminate`].

mod session;
mod store;
mod types;

pub use session::Session;
pub use store::SessionRegistry;
pub use types::{RegistryError, SessionId, SessionState, SessionSummary};
