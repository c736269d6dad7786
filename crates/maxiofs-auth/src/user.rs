//! Tenant, user, and access key types

use maxiofs_common::now_secs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Inactive,
}

/// Per-tenant quota limits (zero = unlimited)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuotas {
    pub max_storage_bytes: u64,
    pub max_buckets: u64,
    pub max_access_keys: u64,
}

/// An isolation boundary grouping users, buckets, and quotas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Immutable identifier
    pub id: String,
    /// Unique short name
    pub name: String,
    /// Human-readable name
    pub display_name: String,
    pub status: TenantStatus,
    pub quotas: TenantQuotas,
    pub created_at: u64,
}

impl Tenant {
    /// Create a new tenant with a generated ID
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            display_name: display_name.into(),
            status: TenantStatus::Active,
            quotas: TenantQuotas::default(),
            created_at: now_secs(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// User role within a tenant (or globally for tenant-less users)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Write,
    Read,
}

/// User status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: String,
    /// Login name, unique across the tenant and the global scope
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    /// Argon2id PHC string
    pub password_hash: String,
    pub roles: Vec<Role>,
    /// Owning tenant; `None` for global users who see all tenants
    pub tenant_id: Option<String>,
    pub status: UserStatus,
    /// Consecutive failed logins since the last success
    pub failed_login_attempts: u32,
    /// Epoch seconds until which logins are refused (0 = unlocked)
    pub locked_until: u64,
    /// Base32 TOTP secret when 2FA is enabled
    pub mfa_secret: Option<String>,
    pub created_at: u64,
}

impl User {
    /// Create a new user with a generated ID
    pub fn new(
        username: impl Into<String>,
        password_hash: String,
        roles: Vec<Role>,
        tenant_id: Option<String>,
    ) -> Self {
        let username = username.into();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: username.clone(),
            username,
            email: None,
            password_hash,
            roles,
            tenant_id,
            status: UserStatus::Active,
            failed_login_attempts: 0,
            locked_until: 0,
            mfa_secret: None,
            created_at: now_secs(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Global users have no tenant and see everything
    pub fn is_global(&self) -> bool {
        self.tenant_id.is_none()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// ARN used by bucket policies (e.g. `arn:aws:iam::tenant:user/name`)
    #[must_use]
    pub fn arn(&self) -> String {
        let account = self.tenant_id.as_deref().unwrap_or("global");
        format!("arn:aws:iam::{account}:user/{}", self.username)
    }
}

/// Access key status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    #[default]
    Active,
    Inactive,
}

/// An access key for S3 API authentication.
///
/// The secret is sealed with the node master key before it reaches the
/// metadata store; the plaintext is returned exactly once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    /// Access key ID (20 chars, e.g. "MXIOA1B2C3D4E5F6G7H8")
    pub access_key_id: String,
    /// Sealed secret access key (base64 nonce+ciphertext), or the
    /// plaintext when no master key is configured
    pub secret_sealed: String,
    pub user_id: String,
    /// Denormalized from the owning user
    pub tenant_id: Option<String>,
    pub created_at: u64,
    pub last_used_at: u64,
    pub status: KeyStatus,
}

impl AccessKey {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

/// Generate an access key ID (20 uppercase alphanumeric characters
/// starting with MXIO)
#[must_use]
pub fn generate_access_key_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    let random_part: String = (0..16)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();

    format!("MXIO{random_part}")
}

/// Generate a secret access key (40 characters)
#[must_use]
pub fn generate_secret_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut rng = rand::thread_rng();

    (0..40)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Result of a successful S3 request authentication
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub user_id: String,
    pub user_arn: String,
    pub tenant_id: Option<String>,
    pub roles: Vec<Role>,
    pub access_key_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_access_key_id() {
        let key_id = generate_access_key_id();
        assert_eq!(key_id.len(), 20);
        assert!(key_id.starts_with("MXIO"));
    }

    #[test]
    fn test_generate_secret_key() {
        let secret = generate_secret_key();
        assert_eq!(secret.len(), 40);
    }

    #[test]
    fn test_user_arn() {
        let global = User::new("root", "hash".into(), vec![Role::Admin], None);
        assert_eq!(global.arn(), "arn:aws:iam::global:user/root");
        assert!(global.is_global());

        let scoped = User::new("bob", "hash".into(), vec![Role::Read], Some("t1".into()));
        assert_eq!(scoped.arn(), "arn:aws:iam::t1:user/bob");
        assert!(!scoped.is_global());
    }

    #[test]
    fn test_tenant_defaults() {
        let t = Tenant::new("acme", "Acme Corp");
        assert!(t.is_active());
        assert_eq!(t.quotas.max_buckets, 0);
    }
}
