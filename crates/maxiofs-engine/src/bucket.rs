//! Bucket lifecycle and per-bucket configuration.

use tracing::info;

use crate::types::{
    BucketRecord, CorsRule, EncryptionConfig, LifecycleRule, NotificationTarget, ObjectLockConfig,
};
use crate::Engine;
use maxiofs_auth::acl::{Acl, PublicAccessBlock};
use maxiofs_auth::policy::BucketPolicy;
use maxiofs_auth::user::Tenant;
use maxiofs_common::{now_secs, BucketName, Error, Result, VersioningState};
use maxiofs_meta::{keys, BatchOp, MetaError};

/// Options for bucket creation
#[derive(Debug, Default)]
pub struct CreateBucketOpts {
    /// Enable Object Lock at creation (forces versioning on)
    pub object_lock: bool,
}

/// Per-bucket object/byte counters
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BucketStats {
    pub objects: i64,
    pub bytes: i64,
}

impl Engine {
    /// Resolve a bucket by its globally-unique name.
    pub fn resolve_bucket(&self, name: &str) -> Result<BucketRecord> {
        let tenant_id = self
            .meta
            .get(&keys::bucket_name_index(name))
            .map_err(meta_err)?
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))?;
        let tenant_id = String::from_utf8_lossy(&tenant_id).to_string();
        self.meta
            .get_json(&keys::bucket(&tenant_id, name))
            .map_err(meta_err)?
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))
    }

    /// Create a bucket: validate the name, atomically claim the global
    /// name index, enforce the tenant bucket quota, and materialize the
    /// default owner-FULL_CONTROL ACL.
    pub fn create_bucket(
        &self,
        tenant: &Tenant,
        owner_user_id: &str,
        owner_display_name: &str,
        name: &str,
        opts: CreateBucketOpts,
    ) -> Result<BucketRecord> {
        let validated = BucketName::new(name)?;

        if tenant.quotas.max_buckets > 0 {
            let current = self
                .meta
                .counter(&keys::usage_buckets(&tenant.id))
                .map_err(meta_err)?;
            if current as u64 >= tenant.quotas.max_buckets {
                return Err(Error::QuotaExceeded(format!(
                    "tenant {} bucket limit ({}) reached",
                    tenant.name, tenant.quotas.max_buckets
                )));
            }
        }

        let record = BucketRecord {
            name: validated.as_str().to_string(),
            tenant_id: tenant.id.clone(),
            owner_user_id: owner_user_id.to_string(),
            owner_display_name: owner_display_name.to_string(),
            region: self.region.clone(),
            created_at: now_secs(),
            versioning: if opts.object_lock {
                VersioningState::Enabled
            } else {
                VersioningState::Unversioned
            },
            object_lock: opts.object_lock.then(ObjectLockConfig::default),
            encryption: None,
            public_access_block: PublicAccessBlock::default(),
            lifecycle: Vec::new(),
            notifications: Vec::new(),
            cors: Vec::new(),
            policy_json: None,
            acl: Acl::private(owner_user_id, owner_display_name),
        };

        let ops = vec![
            BatchOp::PutIfAbsent {
                key: keys::bucket_name_index(name),
                value: tenant.id.clone().into_bytes(),
            },
            BatchOp::put_json(keys::bucket(&tenant.id, name), &record).map_err(meta_err)?,
            BatchOp::add(keys::usage_buckets(&tenant.id), 1),
        ];
        match self.meta.batch(ops) {
            Ok(()) => {
                info!(bucket = name, tenant = %tenant.name, "bucket created");
                Ok(record)
            }
            Err(MetaError::AlreadyExists(_)) => Err(Error::BucketAlreadyExists(name.to_string())),
            Err(e) => Err(meta_err(e)),
        }
    }

    /// Delete a bucket. Refused unless every version, delete marker,
    /// and in-progress multipart upload is gone.
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        let bucket = self.resolve_bucket(name)?;

        let versions = self
            .meta
            .scan(&keys::object_prefix(&bucket.tenant_id, name, ""), None, 1)
            .map_err(meta_err)?;
        if !versions.is_empty() {
            return Err(Error::BucketNotEmpty(name.to_string()));
        }
        let uploads = self
            .meta
            .scan(&keys::multipart_prefix(&bucket.tenant_id, name), None, 1)
            .map_err(meta_err)?;
        if !uploads.is_empty() {
            return Err(Error::BucketNotEmpty(name.to_string()));
        }

        self.meta
            .batch(vec![
                BatchOp::delete(keys::bucket(&bucket.tenant_id, name)),
                BatchOp::delete(keys::bucket_name_index(name)),
                BatchOp::delete(keys::bucket_stat_bytes(&bucket.tenant_id, name)),
                BatchOp::delete(keys::bucket_stat_objects(&bucket.tenant_id, name)),
                BatchOp::add(keys::usage_buckets(&bucket.tenant_id), -1),
            ])
            .map_err(meta_err)?;
        info!(bucket = name, "bucket deleted");
        Ok(())
    }

    /// List buckets, optionally restricted to one tenant.
    pub fn list_buckets(&self, tenant_id: Option<&str>) -> Result<Vec<BucketRecord>> {
        let prefix = match tenant_id {
            Some(t) => keys::bucket_prefix(t),
            None => "bkt:".to_string(),
        };
        let entries = self.meta.scan(&prefix, None, usize::MAX).map_err(meta_err)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode().map_err(meta_err)?);
        }
        Ok(out)
    }

    /// Per-bucket object/byte counters.
    pub fn bucket_stats(&self, bucket: &BucketRecord) -> Result<BucketStats> {
        Ok(BucketStats {
            bytes: self
                .meta
                .counter(&keys::bucket_stat_bytes(&bucket.tenant_id, &bucket.name))
                .map_err(meta_err)?,
            objects: self
                .meta
                .counter(&keys::bucket_stat_objects(&bucket.tenant_id, &bucket.name))
                .map_err(meta_err)?,
        })
    }

    fn store_bucket(&self, record: &BucketRecord) -> Result<()> {
        self.meta
            .put_json(&keys::bucket(&record.tenant_id, &record.name), record)
            .map_err(meta_err)
    }

    /// Change the versioning state, enforcing legal transitions.
    /// Object-Lock buckets can never leave `Enabled`.
    pub fn put_bucket_versioning(&self, name: &str, state: VersioningState) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        if bucket.object_lock.is_some() && state != VersioningState::Enabled {
            return Err(Error::InvalidVersioningTransition(
                "versioning cannot be suspended on an Object Lock bucket".into(),
            ));
        }
        if !bucket.versioning.can_transition_to(state) {
            return Err(Error::InvalidVersioningTransition(format!(
                "{:?} -> {:?}",
                bucket.versioning, state
            )));
        }
        bucket.versioning = state;
        self.store_bucket(&bucket)
    }

    pub fn put_bucket_lifecycle(&self, name: &str, rules: Vec<LifecycleRule>) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        bucket.lifecycle = rules;
        self.store_bucket(&bucket)
    }

    pub fn put_bucket_notifications(
        &self,
        name: &str,
        targets: Vec<NotificationTarget>,
    ) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        bucket.notifications = targets;
        self.store_bucket(&bucket)
    }

    pub fn put_bucket_cors(&self, name: &str, rules: Vec<CorsRule>) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        bucket.cors = rules;
        self.store_bucket(&bucket)
    }

    /// Attach a bucket policy. The JSON must parse; a policy granting
    /// public access is refused while `block_public_policy` is set.
    pub fn put_bucket_policy(&self, name: &str, policy_json: &str) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        let policy = BucketPolicy::from_json(policy_json)
            .map_err(|e| Error::invalid_argument(format!("invalid policy: {e}")))?;
        if bucket.public_access_block.block_public_policy && policy.grants_public_access() {
            return Err(Error::AccessDenied);
        }
        bucket.policy_json = Some(policy_json.to_string());
        self.store_bucket(&bucket)
    }

    pub fn delete_bucket_policy(&self, name: &str) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        bucket.policy_json = None;
        self.store_bucket(&bucket)
    }

    /// Replace the bucket ACL. A public ACL is refused while
    /// `block_public_acls` is set.
    pub fn put_bucket_acl(&self, name: &str, acl: Acl) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        if bucket.public_access_block.block_public_acls && acl.is_public() {
            return Err(Error::AccessDenied);
        }
        bucket.acl = acl;
        self.store_bucket(&bucket)
    }

    pub fn put_bucket_encryption(&self, name: &str, enabled: bool) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        if enabled && self.master_key.is_none() {
            return Err(Error::invalid_request(
                "server has no master key configured; encryption unavailable",
            ));
        }
        bucket.encryption = enabled.then(|| EncryptionConfig {
            algorithm: "AES256".to_string(),
        });
        self.store_bucket(&bucket)
    }

    /// Update the Object Lock configuration. Lock can only be enabled,
    /// never disabled, and enabling forces versioning on.
    pub fn put_bucket_object_lock(&self, name: &str, config: ObjectLockConfig) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        bucket.object_lock = Some(config);
        bucket.versioning = VersioningState::Enabled;
        self.store_bucket(&bucket)
    }

    pub fn put_public_access_block(&self, name: &str, pab: PublicAccessBlock) -> Result<()> {
        let mut bucket = self.resolve_bucket(name)?;
        bucket.public_access_block = pab;
        self.store_bucket(&bucket)
    }
}

pub(crate) fn meta_err(e: MetaError) -> Error {
    Error::Internal(format!("metadata store: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_engine;
    use maxiofs_auth::user::TenantQuotas;

    #[tokio::test]
    async fn test_create_resolve_delete() {
        let (_dir, engine, tenant) = test_engine().await;
        let bucket = engine
            .create_bucket(&tenant, "u1", "User One", "photos", CreateBucketOpts::default())
            .unwrap();
        assert_eq!(bucket.versioning, VersioningState::Unversioned);

        let resolved = engine.resolve_bucket("photos").unwrap();
        assert_eq!(resolved.tenant_id, tenant.id);

        engine.delete_bucket("photos").unwrap();
        assert!(matches!(
            engine.resolve_bucket("photos"),
            Err(Error::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_name_collision_across_tenants() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u1", "U", "shared", CreateBucketOpts::default())
            .unwrap();

        let other = Tenant::new("other", "Other");
        assert!(matches!(
            engine.create_bucket(&other, "u2", "V", "shared", CreateBucketOpts::default()),
            Err(Error::BucketAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let (_dir, engine, tenant) = test_engine().await;
        assert!(matches!(
            engine.create_bucket(&tenant, "u", "U", "No_Caps", CreateBucketOpts::default()),
            Err(Error::InvalidBucketName(_))
        ));
    }

    #[tokio::test]
    async fn test_bucket_quota() {
        let (_dir, engine, mut tenant) = test_engine().await;
        tenant.quotas = TenantQuotas {
            max_buckets: 1,
            ..Default::default()
        };
        engine
            .create_bucket(&tenant, "u", "U", "one", CreateBucketOpts::default())
            .unwrap();
        assert!(matches!(
            engine.create_bucket(&tenant, "u", "U", "two", CreateBucketOpts::default()),
            Err(Error::QuotaExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_object_lock_forces_versioning() {
        let (_dir, engine, tenant) = test_engine().await;
        let bucket = engine
            .create_bucket(
                &tenant,
                "u",
                "U",
                "locked",
                CreateBucketOpts { object_lock: true },
            )
            .unwrap();
        assert_eq!(bucket.versioning, VersioningState::Enabled);
        assert!(bucket.object_lock.is_some());

        // Suspension refused on a lock bucket
        assert!(matches!(
            engine.put_bucket_versioning("locked", VersioningState::Suspended),
            Err(Error::InvalidVersioningTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_versioning_transitions() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u", "U", "vers", CreateBucketOpts::default())
            .unwrap();

        engine
            .put_bucket_versioning("vers", VersioningState::Enabled)
            .unwrap();
        engine
            .put_bucket_versioning("vers", VersioningState::Suspended)
            .unwrap();
        engine
            .put_bucket_versioning("vers", VersioningState::Enabled)
            .unwrap();
        assert!(matches!(
            engine.put_bucket_versioning("vers", VersioningState::Unversioned),
            Err(Error::InvalidVersioningTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_policy_validation_and_pab() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u", "U", "pol", CreateBucketOpts::default())
            .unwrap();

        assert!(engine.put_bucket_policy("pol", "not json").is_err());

        let public = r#"{"Statement":[{"Effect":"Allow","Principal":"*","Action":"s3:GetObject","Resource":"arn:aws:s3:::pol/*"}]}"#;
        engine.put_bucket_policy("pol", public).unwrap();

        let mut pab = PublicAccessBlock::default();
        pab.block_public_policy = true;
        engine.put_public_access_block("pol", pab).unwrap();
        assert!(matches!(
            engine.put_bucket_policy("pol", public),
            Err(Error::AccessDenied)
        ));
    }
}
