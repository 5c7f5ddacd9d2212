//! Named constants for gRPC method strings.
//!
//! Used in log fields and interceptor allow-lists so method names stay in
//! sync with the protobuf service definitions.

/// `ShellService/Exec`
pub const METHOD_EXEC: &str = "ShellService/Exec";

/// `SessionAdminService/ListSessions`
pub const METHOD_LIST_SESSIONS: &str = "SessionAdminService/ListSessions";

/// `SessionAdminService/TerminateSession`
pub const METHOD_TERMINATE_SESSION: &str = "SessionAdminService/TerminateSession";
