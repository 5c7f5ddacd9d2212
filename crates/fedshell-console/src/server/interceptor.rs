//! JWT interceptor guarding the admin gRPC service.

use std::sync::Arc;

use tonic::{Request, Status};

use crate::auth::{Claims, JwtManager};

/// Require an access token with the `admin` role in the `authorization`
/// metadata.
pub fn admin_interceptor(
    jwt: Arc<JwtManager>,
) -> impl Fn(Request<()>) -> Result<Request<()>, Status> + Clone {
    move |mut req: Request<()>| {
        let token = req
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?;

        let claims = jwt
            .validate(token)
            .map_err(|_| Status::unauthenticated("Invalid token"))?;

        if !claims.is_access() {
            return Err(Status::unauthenticated("Not an access token"));
        }
        if !claims.is_admin() {
            return Err(Status::permission_denied("Admin role required"));
        }

        req.extensions_mut().insert(claims);
        Ok(req)
    }
}

/// Claims attached by [`admin_interceptor`].
#[allow(clippy::result_large_err)]
pub fn extract_claims<T>(req: &Request<T>) -> Result<&Claims, Status> {
    req.extensions()
        .get::<Claims>()
        .ok_or_else(|| Status::internal("Claims not found in request extensions"))
}
