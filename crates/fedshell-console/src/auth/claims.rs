//! JWT claims carried by console tokens.

use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_OPERATOR: &str = "operator";

/// JWT claims embedded in console tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID (unique per token).
    pub jti: String,
    /// Subject (user ID).
    pub sub: String,
    pub username: String,
    /// `operator` or `admin`.
    #[serde(default = "default_role")]
    pub role: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// "access" or "refresh".
    pub token_type: String,
}

fn default_role() -> String {
    ROLE_OPERATOR.to_string()
}

impl Claims {
    pub fn is_access(&self) -> bool {
        self.token_type == "access"
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}
