//! Console session tokens (JWT, HS256).

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::AuthError;
use crate::user::{Role, User};
use maxiofs_common::now_secs;

/// JWT claims carried by a console session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User ID
    pub sub: String,
    /// Login name
    pub name: String,
    /// Tenant scope; `None` for global users
    pub tenant: Option<String>,
    pub roles: Vec<Role>,
    /// Token ID, used for logout revocation
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issues and verifies console JWTs. Logout revokes the token ID until
/// its natural expiry.
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
    revoked: RwLock<HashSet<String>>,
}

impl SessionManager {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
            revoked: RwLock::new(HashSet::new()),
        }
    }

    /// Issue a session token for an authenticated user.
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = now_secs();
        let claims = SessionClaims {
            sub: user.id.clone(),
            name: user.username.clone(),
            tenant: user.tenant_id.clone(),
            roles: user.roles.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        encode(&jsonwebtoken::Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::InvalidSession)?;
        if self.revoked.read().contains(&data.claims.jti) {
            return Err(AuthError::InvalidSession);
        }
        Ok(data.claims)
    }

    /// Revoke a token (logout).
    pub fn revoke(&self, claims: &SessionClaims) {
        self.revoked.write().insert(claims.jti.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User::new("alice", "hash".into(), vec![Role::Admin], None)
    }

    #[test]
    fn test_issue_and_verify() {
        let mgr = SessionManager::new(b"secret", 3600);
        let token = mgr.issue(&test_user()).unwrap();
        let claims = mgr.verify(&token).unwrap();
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.roles, vec![Role::Admin]);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mgr = SessionManager::new(b"secret", 3600);
        let token = mgr.issue(&test_user()).unwrap();
        let other = SessionManager::new(b"different", 3600);
        assert!(matches!(other.verify(&token), Err(AuthError::InvalidSession)));
    }

    #[test]
    fn test_logout_revokes() {
        let mgr = SessionManager::new(b"secret", 3600);
        let token = mgr.issue(&test_user()).unwrap();
        let claims = mgr.verify(&token).unwrap();
        mgr.revoke(&claims);
        assert!(matches!(mgr.verify(&token), Err(AuthError::InvalidSession)));
    }
}
