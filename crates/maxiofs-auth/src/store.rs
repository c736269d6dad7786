//! Identity storage: tenants, users, and access keys.
//!
//! All records live in the metadata store; cross-record updates (user +
//! username index, key + user link) go through atomic batches. Access
//! key secrets are sealed with the node master key before storage.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::password::{hash_password, verify_password};
use crate::throttle::{LOCKOUT_SECS, LOCKOUT_THRESHOLD};
use crate::totp;
use crate::user::{
    generate_access_key_id, generate_secret_key, AccessKey, KeyStatus, Role, Tenant, TenantQuotas,
    User, UserStatus,
};
use maxiofs_blob::MasterKey;
use maxiofs_common::now_secs;
use maxiofs_meta::{keys, BatchOp, MetaError, MetaStore};

/// Aggregate usage counters for a tenant
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TenantUsage {
    pub storage_bytes: i64,
    pub objects: i64,
    pub buckets: i64,
}

/// Identity store over the shared metadata store.
pub struct IdentityStore {
    meta: Arc<MetaStore>,
    master_key: Option<MasterKey>,
}

impl IdentityStore {
    pub fn new(meta: Arc<MetaStore>, master_key: Option<MasterKey>) -> Self {
        Self { meta, master_key }
    }

    /// Create the bootstrap global admin on first start. No-op when any
    /// user already exists.
    pub fn bootstrap_admin(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if !self.meta.scan(keys::USER_ALL, None, 1)?.is_empty() {
            return Ok(());
        }
        if password.is_empty() {
            warn!("auth.admin_password is empty; refusing to create bootstrap admin");
            return Ok(());
        }
        let user = self.create_user(username, password, vec![Role::Admin], None)?;
        info!(username, user_id = %user.id, "created bootstrap global admin");
        Ok(())
    }

    // =========== Tenant Operations ===========

    pub fn create_tenant(
        &self,
        name: &str,
        display_name: &str,
        quotas: TenantQuotas,
    ) -> Result<Tenant, AuthError> {
        let mut tenant = Tenant::new(name, display_name);
        tenant.quotas = quotas;

        let ops = vec![
            BatchOp::PutIfAbsent {
                key: keys::tenant_name_index(name),
                value: tenant.id.clone().into_bytes(),
            },
            BatchOp::put_json(keys::tenant(&tenant.id), &tenant)?,
        ];
        match self.meta.batch(ops) {
            Ok(()) => Ok(tenant),
            Err(MetaError::AlreadyExists(_)) => {
                Err(AuthError::TenantAlreadyExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_tenant(&self, tenant_id: &str) -> Result<Tenant, AuthError> {
        self.meta
            .get_json(&keys::tenant(tenant_id))?
            .ok_or_else(|| AuthError::TenantNotFound(tenant_id.to_string()))
    }

    pub fn get_tenant_by_name(&self, name: &str) -> Result<Tenant, AuthError> {
        let id = self
            .meta
            .get(&keys::tenant_name_index(name))?
            .ok_or_else(|| AuthError::TenantNotFound(name.to_string()))?;
        let id = String::from_utf8_lossy(&id).to_string();
        self.get_tenant(&id)
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>, AuthError> {
        let entries = self.meta.scan(keys::TENANT_ALL, None, usize::MAX)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode()?);
        }
        Ok(out)
    }

    pub fn update_tenant(&self, tenant: &Tenant) -> Result<(), AuthError> {
        // Existence check keeps updates from resurrecting deleted tenants
        self.get_tenant(&tenant.id)?;
        self.meta.put_json(&keys::tenant(&tenant.id), tenant)?;
        Ok(())
    }

    /// Delete a tenant. Refused while it still owns buckets or users.
    pub fn delete_tenant(&self, tenant_id: &str) -> Result<(), AuthError> {
        let tenant = self.get_tenant(tenant_id)?;

        if self.meta.counter(&keys::usage_buckets(tenant_id)).unwrap_or(0) > 0 {
            return Err(AuthError::TenantNotEmpty(tenant.name));
        }
        let has_users = self
            .list_users(Some(tenant_id))?
            .iter()
            .any(|u| u.status == UserStatus::Active);
        if has_users {
            return Err(AuthError::TenantNotEmpty(tenant.name));
        }

        self.meta.batch(vec![
            BatchOp::delete(keys::tenant(tenant_id)),
            BatchOp::delete(keys::tenant_name_index(&tenant.name)),
            BatchOp::delete(keys::usage_bytes(tenant_id)),
            BatchOp::delete(keys::usage_objects(tenant_id)),
            BatchOp::delete(keys::usage_buckets(tenant_id)),
        ])?;
        Ok(())
    }

    pub fn tenant_usage(&self, tenant_id: &str) -> Result<TenantUsage, AuthError> {
        Ok(TenantUsage {
            storage_bytes: self.meta.counter(&keys::usage_bytes(tenant_id))?,
            objects: self.meta.counter(&keys::usage_objects(tenant_id))?,
            buckets: self.meta.counter(&keys::usage_buckets(tenant_id))?,
        })
    }

    // =========== User Operations ===========

    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        roles: Vec<Role>,
        tenant_id: Option<String>,
    ) -> Result<User, AuthError> {
        if let Some(tid) = &tenant_id {
            self.get_tenant(tid)?;
        }
        let user = User::new(username, hash_password(password)?, roles, tenant_id);

        let ops = vec![
            BatchOp::PutIfAbsent {
                key: keys::username_index(username),
                value: user.id.clone().into_bytes(),
            },
            BatchOp::put_json(keys::user(&user.id), &user)?,
        ];
        match self.meta.batch(ops) {
            Ok(()) => Ok(user),
            Err(MetaError::AlreadyExists(_)) => {
                Err(AuthError::UserAlreadyExists(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, user_id: &str) -> Result<User, AuthError> {
        self.meta
            .get_json(&keys::user(user_id))?
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
    }

    pub fn get_user_by_name(&self, username: &str) -> Result<User, AuthError> {
        let id = self
            .meta
            .get(&keys::username_index(username))?
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
        self.get_user(&String::from_utf8_lossy(&id))
    }

    pub fn list_users(&self, tenant_id: Option<&str>) -> Result<Vec<User>, AuthError> {
        let entries = self.meta.scan(keys::USER_ALL, None, usize::MAX)?;
        let mut out = Vec::new();
        for e in entries {
            let user: User = e.decode()?;
            if tenant_id.is_none() || user.tenant_id.as_deref() == tenant_id {
                out.push(user);
            }
        }
        Ok(out)
    }

    pub fn update_user(&self, user: &User) -> Result<(), AuthError> {
        self.get_user(&user.id)?;
        self.meta.put_json(&keys::user(&user.id), user)?;
        Ok(())
    }

    pub fn set_password(&self, user_id: &str, password: &str) -> Result<(), AuthError> {
        let mut user = self.get_user(user_id)?;
        user.password_hash = hash_password(password)?;
        self.update_user(&user)
    }

    /// Delete a user and deactivate all of their access keys.
    pub fn delete_user(&self, user_id: &str) -> Result<(), AuthError> {
        let user = self.get_user(user_id)?;
        let mut ops = vec![
            BatchOp::delete(keys::user(user_id)),
            BatchOp::delete(keys::username_index(&user.username)),
        ];
        for mut key in self.list_access_keys(user_id)? {
            key.status = KeyStatus::Inactive;
            ops.push(BatchOp::put_json(
                keys::access_key(&key.access_key_id),
                &key,
            )?);
        }
        self.meta.batch(ops)?;
        Ok(())
    }

    // =========== Authentication ===========

    /// Verify a console login. Applies the persisted per-user lockout
    /// and, when the user has 2FA enrolled, requires a valid TOTP code.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        totp_code: Option<&str>,
    ) -> Result<User, AuthError> {
        let mut user = self
            .get_user_by_name(username)
            .map_err(|_| AuthError::InvalidCredentials)?;

        if !user.is_active() {
            return Err(AuthError::UserSuspended);
        }

        let now = now_secs();
        if user.locked_until > now {
            return Err(AuthError::AccountLocked(user.locked_until));
        }

        if !verify_password(password, &user.password_hash) {
            user.failed_login_attempts += 1;
            if user.failed_login_attempts >= LOCKOUT_THRESHOLD {
                user.locked_until = now + LOCKOUT_SECS;
                user.failed_login_attempts = 0;
                warn!(username, until = user.locked_until, "account locked");
            }
            self.update_user(&user)?;
            return Err(AuthError::InvalidCredentials);
        }

        if let Some(secret) = &user.mfa_secret {
            let code = totp_code.ok_or(AuthError::MfaRequired)?;
            if !totp::verify_code(secret, code, now) {
                user.failed_login_attempts += 1;
                self.update_user(&user)?;
                return Err(AuthError::InvalidMfaCode);
            }
        }

        if user.failed_login_attempts != 0 || user.locked_until != 0 {
            user.failed_login_attempts = 0;
            user.locked_until = 0;
            self.update_user(&user)?;
        }
        Ok(user)
    }

    /// Enroll 2FA: generates and stores the secret, returning it for
    /// authenticator setup.
    pub fn enable_mfa(&self, user_id: &str) -> Result<String, AuthError> {
        let mut user = self.get_user(user_id)?;
        let secret = totp::generate_secret();
        user.mfa_secret = Some(secret.clone());
        self.update_user(&user)?;
        Ok(secret)
    }

    pub fn verify_mfa(&self, user_id: &str, code: &str) -> Result<bool, AuthError> {
        let user = self.get_user(user_id)?;
        let Some(secret) = &user.mfa_secret else {
            return Ok(false);
        };
        Ok(totp::verify_code(secret, code, now_secs()))
    }

    pub fn disable_mfa(&self, user_id: &str) -> Result<(), AuthError> {
        let mut user = self.get_user(user_id)?;
        user.mfa_secret = None;
        self.update_user(&user)
    }

    // =========== Access Key Operations ===========

    /// Create an access key for a user. The plaintext secret is only
    /// ever returned here.
    pub fn create_access_key(&self, user_id: &str) -> Result<(AccessKey, String), AuthError> {
        let user = self.get_user(user_id)?;
        if !user.is_active() {
            return Err(AuthError::UserSuspended);
        }

        if let Some(tid) = &user.tenant_id {
            let tenant = self.get_tenant(tid)?;
            if tenant.quotas.max_access_keys > 0 {
                let existing = self
                    .list_all_access_keys()?
                    .iter()
                    .filter(|k| k.tenant_id.as_deref() == Some(tid.as_str()))
                    .count() as u64;
                if existing >= tenant.quotas.max_access_keys {
                    return Err(AuthError::AccessKeyQuota(tid.clone()));
                }
            }
        }

        let secret = generate_secret_key();
        let sealed = match &self.master_key {
            Some(master) => master
                .seal_secret(secret.as_bytes())
                .map_err(|e| AuthError::Internal(e.to_string()))?,
            None => secret.clone(),
        };

        let key = AccessKey {
            access_key_id: generate_access_key_id(),
            secret_sealed: sealed,
            user_id: user.id.clone(),
            tenant_id: user.tenant_id.clone(),
            created_at: now_secs(),
            last_used_at: 0,
            status: KeyStatus::Active,
        };
        self.meta
            .put_json(&keys::access_key(&key.access_key_id), &key)?;
        Ok((key, secret))
    }

    /// Resolve an access key for request signing: returns the key, its
    /// owning user, and the plaintext secret.
    pub fn resolve_access_key(
        &self,
        access_key_id: &str,
    ) -> Result<(AccessKey, User, String), AuthError> {
        let mut key: AccessKey = self
            .meta
            .get_json(&keys::access_key(access_key_id))?
            .ok_or_else(|| AuthError::AccessKeyNotFound(access_key_id.to_string()))?;

        if !key.is_active() {
            return Err(AuthError::AccessKeyInactive);
        }
        let user = self.get_user(&key.user_id)?;
        if !user.is_active() {
            return Err(AuthError::UserSuspended);
        }

        let secret = match &self.master_key {
            Some(master) => {
                let plain = master
                    .open_secret(&key.secret_sealed)
                    .map_err(|e| AuthError::Internal(e.to_string()))?;
                String::from_utf8_lossy(&plain).to_string()
            }
            None => key.secret_sealed.clone(),
        };

        // Best-effort last-used stamp; losing it under a race is fine
        key.last_used_at = now_secs();
        let _ = self
            .meta
            .put_json(&keys::access_key(access_key_id), &key);

        Ok((key, user, secret))
    }

    pub fn list_access_keys(&self, user_id: &str) -> Result<Vec<AccessKey>, AuthError> {
        Ok(self
            .list_all_access_keys()?
            .into_iter()
            .filter(|k| k.user_id == user_id)
            .collect())
    }

    fn list_all_access_keys(&self) -> Result<Vec<AccessKey>, AuthError> {
        let entries = self.meta.scan(keys::ACCESS_KEY_ALL, None, usize::MAX)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode()?);
        }
        Ok(out)
    }

    pub fn delete_access_key(&self, access_key_id: &str) -> Result<(), AuthError> {
        if self.meta.get(&keys::access_key(access_key_id))?.is_none() {
            return Err(AuthError::AccessKeyNotFound(access_key_id.to_string()));
        }
        self.meta.delete(&keys::access_key(access_key_id))?;
        Ok(())
    }

    // =========== Cross-node sync ===========
    //
    // Peers push identity records over the HMAC-signed sync RPC so a
    // forwarded S3 request can be signature-checked on any node. These
    // upserts overwrite blindly (last-writer-wins, like the rest of the
    // cluster metadata).

    pub fn import_tenant(&self, tenant: &Tenant) -> Result<(), AuthError> {
        self.meta.batch(vec![
            BatchOp::Put {
                key: keys::tenant_name_index(&tenant.name),
                value: tenant.id.clone().into_bytes(),
            },
            BatchOp::put_json(keys::tenant(&tenant.id), tenant)?,
        ])?;
        Ok(())
    }

    pub fn import_user(&self, user: &User) -> Result<(), AuthError> {
        self.meta.batch(vec![
            BatchOp::Put {
                key: keys::username_index(&user.username),
                value: user.id.clone().into_bytes(),
            },
            BatchOp::put_json(keys::user(&user.id), user)?,
        ])?;
        Ok(())
    }

    pub fn import_access_key(&self, key: &AccessKey) -> Result<(), AuthError> {
        self.meta
            .put_json(&keys::access_key(&key.access_key_id), key)?;
        Ok(())
    }

    /// Snapshot of all identity records for the sync RPC.
    pub fn export_identity(
        &self,
    ) -> Result<(Vec<Tenant>, Vec<User>, Vec<AccessKey>), AuthError> {
        Ok((
            self.list_tenants()?,
            self.list_users(None)?,
            self.list_all_access_keys()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, IdentityStore) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        (dir, IdentityStore::new(meta, Some(MasterKey::new([1u8; 32]))))
    }

    #[test]
    fn test_tenant_lifecycle() {
        let (_dir, store) = open_store();
        let t = store
            .create_tenant("acme", "Acme", TenantQuotas::default())
            .unwrap();
        assert!(matches!(
            store.create_tenant("acme", "Other", TenantQuotas::default()),
            Err(AuthError::TenantAlreadyExists(_))
        ));
        assert_eq!(store.get_tenant_by_name("acme").unwrap().id, t.id);
        store.delete_tenant(&t.id).unwrap();
        assert!(store.get_tenant(&t.id).is_err());
    }

    #[test]
    fn test_tenant_with_users_not_deletable() {
        let (_dir, store) = open_store();
        let t = store
            .create_tenant("acme", "Acme", TenantQuotas::default())
            .unwrap();
        store
            .create_user("bob", "pw", vec![Role::Read], Some(t.id.clone()))
            .unwrap();
        assert!(matches!(
            store.delete_tenant(&t.id),
            Err(AuthError::TenantNotEmpty(_))
        ));
    }

    #[test]
    fn test_user_uniqueness_spans_scopes() {
        let (_dir, store) = open_store();
        store.create_user("alice", "pw", vec![Role::Admin], None).unwrap();
        assert!(matches!(
            store.create_user("alice", "pw2", vec![Role::Read], None),
            Err(AuthError::UserAlreadyExists(_))
        ));
    }

    #[test]
    fn test_authenticate_and_lockout() {
        let (_dir, store) = open_store();
        store.create_user("carol", "s3cret", vec![Role::Write], None).unwrap();

        assert!(store.authenticate("carol", "s3cret", None).is_ok());
        for _ in 0..LOCKOUT_THRESHOLD {
            assert!(store.authenticate("carol", "wrong", None).is_err());
        }
        // Now locked, even with the right password
        assert!(matches!(
            store.authenticate("carol", "s3cret", None),
            Err(AuthError::AccountLocked(_))
        ));
    }

    #[test]
    fn test_mfa_flow() {
        let (_dir, store) = open_store();
        let user = store.create_user("dave", "pw", vec![Role::Read], None).unwrap();
        let secret = store.enable_mfa(&user.id).unwrap();

        assert!(matches!(
            store.authenticate("dave", "pw", None),
            Err(AuthError::MfaRequired)
        ));
        let code = crate::totp::current_code(&secret, now_secs()).unwrap();
        assert!(store.authenticate("dave", "pw", Some(&code)).is_ok());

        store.disable_mfa(&user.id).unwrap();
        assert!(store.authenticate("dave", "pw", None).is_ok());
    }

    #[test]
    fn test_access_key_roundtrip() {
        let (_dir, store) = open_store();
        let user = store.create_user("erin", "pw", vec![Role::Write], None).unwrap();
        let (key, secret) = store.create_access_key(&user.id).unwrap();
        assert_eq!(key.access_key_id.len(), 20);
        assert_eq!(secret.len(), 40);
        // Secret is sealed at rest
        assert_ne!(key.secret_sealed, secret);

        let (resolved, ruser, rsecret) = store.resolve_access_key(&key.access_key_id).unwrap();
        assert_eq!(resolved.access_key_id, key.access_key_id);
        assert_eq!(ruser.id, user.id);
        assert_eq!(rsecret, secret);
    }

    #[test]
    fn test_access_key_quota() {
        let (_dir, store) = open_store();
        let mut quotas = TenantQuotas::default();
        quotas.max_access_keys = 1;
        let t = store.create_tenant("small", "Small", quotas).unwrap();
        let user = store
            .create_user("frank", "pw", vec![Role::Write], Some(t.id.clone()))
            .unwrap();
        store.create_access_key(&user.id).unwrap();
        assert!(matches!(
            store.create_access_key(&user.id),
            Err(AuthError::AccessKeyQuota(_))
        ));
    }

    #[test]
    fn test_delete_user_deactivates_keys() {
        let (_dir, store) = open_store();
        let user = store.create_user("gina", "pw", vec![Role::Write], None).unwrap();
        let (key, _) = store.create_access_key(&user.id).unwrap();
        store.delete_user(&user.id).unwrap();
        assert!(matches!(
            store.resolve_access_key(&key.access_key_id),
            Err(AuthError::AccessKeyInactive)
        ));
    }

    #[test]
    fn test_bootstrap_admin_idempotent() {
        let (_dir, store) = open_store();
        store.bootstrap_admin("admin", "root-pw").unwrap();
        store.bootstrap_admin("admin", "root-pw").unwrap();
        let users = store.list_users(None).unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].has_role(Role::Admin));
    }
}
