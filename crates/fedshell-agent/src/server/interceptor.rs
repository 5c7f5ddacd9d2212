//! Shared-token check for console connections.

use std::sync::Arc;

use tonic::{Request, Status};

/// Require `authorization: Bearer <token>` when a token is configured.
pub fn token_interceptor(
    expected: Option<String>,
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone {
    let expected: Option<Arc<str>> = expected.map(Arc::from);
    move |req: Request<()>| {
        let Some(expected) = expected.as_deref() else {
            return Ok(req);
        };
        let token = req
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?;
        if token != expected {
            return Err(Status::unauthenticated("Invalid agent token"));
        }
        Ok(req)
    }
}
