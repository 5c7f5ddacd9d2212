//! Client authentication.
//!
//! The bridge only needs an [`Identity`] for each connection; how tokens are
//! minted is the login service's business. The default [`JwtAuthenticator`]
//! validates HS256 access tokens signed with the console's shared secret.

pub mod claims;
pub mod jwt;

use async_trait::async_trait;
use thiserror::Error;

pub use claims::Claims;
pub use jwt::JwtManager;

/// Authenticated principal behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: String,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == claims::ROLE_ADMIN
    }
}

/// Credentials presented by a connecting client.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    /// Bearer token from the `Authorization` header or the `token` query
    /// parameter.
    pub bearer: Option<String>,
    /// Peer address, for logging.
    pub peer: Option<std::net::SocketAddr>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("wrong token type: {0}")]
    WrongTokenType(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, ctx: &ConnectionContext) -> Result<Identity, AuthError>;
}

/// Accepts access tokens issued by [`JwtManager`].
#[derive(Clone)]
pub struct JwtAuthenticator {
    jwt: JwtManager,
}

impl JwtAuthenticator {
    pub const fn new(jwt: JwtManager) -> Self {
        Self { jwt }
    }

    /// Validate a raw bearer token.
    pub fn identify(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self
            .jwt
            .validate(token)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if !claims.is_access() {
            return Err(AuthError::WrongTokenType(claims.token_type));
        }
        Ok(Identity {
            user_id: claims.sub,
            username: claims.username,
            role: claims.role,
        })
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, ctx: &ConnectionContext) -> Result<Identity, AuthError> {
        let token = ctx
            .bearer
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        self.identify(token)
    }
}

/// Strip an optional `Bearer ` prefix from an authorization value.
pub fn bearer_token(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value).trim()
}
