//! gRPC surface of the agent.

pub mod interceptor;
pub mod shell_svc;

pub use interceptor::token_interceptor;
pub use shell_svc::ShellServiceImpl;
