//! Network surfaces of the console: the browser WebSocket endpoint and the
//! session admin gRPC service.

pub mod admin_svc;
pub mod interceptor;
pub mod ws;


pub use admin_svc::SessionAdminServiceImpl;
pub use interceptor::{admin_interceptor, extract_claims};
pub use ws::{ConsoleState, build_router};
