//! Lifecycle enforcement.
//!
//! A single worker wakes on an interval and applies each bucket's
//! enabled rules: current-version expiration, noncurrent-version
//! expiration, and expired-delete-marker cleanup. Scans are bounded per
//! bucket per cycle to cap memory. Rules never override Object Lock.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bucket::meta_err;
use crate::types::{BucketRecord, LifecycleRule, VersionRecord};
use crate::Engine;
use maxiofs_common::{now_secs, Result};
use maxiofs_meta::keys;

/// Applies lifecycle rules on an interval.
pub struct LifecycleWorker {
    engine: Arc<Engine>,
    interval: Duration,
    /// Max versions scanned per bucket per cycle
    scan_limit: usize,
    /// Stale multipart uploads older than this are swept too
    multipart_expiry: Duration,
}

impl LifecycleWorker {
    pub fn new(
        engine: Arc<Engine>,
        interval: Duration,
        scan_limit: usize,
        multipart_expiry: Duration,
    ) -> Self {
        Self {
            engine,
            interval,
            scan_limit,
            multipart_expiry,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "lifecycle worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("lifecycle worker stopping");
                        return;
                    }
                }
            }
            if let Err(e) = self.run_once(&mut shutdown).await {
                warn!(error = %e, "lifecycle cycle failed");
            }
        }
    }

    /// One full enforcement pass.
    pub async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<usize> {
        let mut deleted = 0usize;
        let buckets = self.engine.list_buckets(None)?;
        for bucket in &buckets {
            if *shutdown.borrow() {
                break;
            }
            if bucket.lifecycle.iter().any(|r| r.enabled) {
                deleted += self.apply_bucket(bucket, shutdown).await?;
            }
        }

        let swept = self.engine.sweep_stale_uploads(self.multipart_expiry).await?;
        if deleted > 0 || swept > 0 {
            info!(expired = deleted, swept_uploads = swept, "lifecycle pass complete");
        }
        Ok(deleted)
    }

    /// Apply every enabled rule to one bucket.
    async fn apply_bucket(
        &self,
        bucket: &BucketRecord,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<usize> {
        let now = now_secs();
        let prefix = keys::object_prefix(&bucket.tenant_id, &bucket.name, "");
        let entries = self
            .engine
            .meta
            .scan(&prefix, None, self.scan_limit)
            .map_err(meta_err)?;

        // Group versions per key so marker cleanup can see whole chains
        let mut by_key: HashMap<String, Vec<VersionRecord>> = HashMap::new();
        for entry in entries {
            let Some((key, _)) =
                keys::split_object_version(&entry.key, &bucket.tenant_id, &bucket.name)
            else {
                continue;
            };
            by_key
                .entry(key.to_string())
                .or_default()
                .push(entry.decode().map_err(meta_err)?);
        }

        let mut deleted = 0usize;
        for (key, versions) in by_key {
            if *shutdown.borrow() {
                break;
            }
            for rule in bucket.lifecycle.iter().filter(|r| r.enabled) {
                if !key.starts_with(&rule.prefix) {
                    continue;
                }
                deleted += self
                    .apply_rule(bucket, &key, &versions, rule, now)
                    .await?;
            }
        }
        self.engine
            .stats
            .lifecycle_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
        Ok(deleted)
    }

    async fn apply_rule(
        &self,
        bucket: &BucketRecord,
        key: &str,
        versions: &[VersionRecord],
        rule: &LifecycleRule,
        now: u64,
    ) -> Result<usize> {
        let mut deleted = 0usize;

        // Current-version expiration
        if let Some(days) = rule.expiration_days {
            if let Some(current) = versions.iter().find(|v| v.is_latest && !v.is_delete_marker) {
                if age_days(current.created_at, now) > u64::from(days)
                    && !current.locked(now)
                {
                    // Versioned buckets expire by inserting a delete
                    // marker; unversioned buckets delete outright
                    match self.engine.delete_object(bucket, key, None, false).await
                    {
                        Ok(_) => {
                            deleted += 1;
                            debug!(bucket = %bucket.name, key, rule = %rule.id, "expired current version");
                        }
                        Err(e) => warn!(bucket = %bucket.name, key, error = %e, "expiration failed"),
                    }
                }
            }
        }

        // Noncurrent-version expiration
        if let Some(days) = rule.noncurrent_days {
            for version in versions.iter().filter(|v| !v.is_latest) {
                if age_days(version.created_at, now) > u64::from(days) && !version.locked(now) {
                    match self
                        .engine
                        .delete_object(bucket, key, Some(&version.version_id), false)
                        .await
                    {
                        Ok(_) => {
                            deleted += 1;
                            debug!(bucket = %bucket.name, key, version = %version.version_id, rule = %rule.id, "expired noncurrent version");
                        }
                        Err(e) => {
                            warn!(bucket = %bucket.name, key, error = %e, "noncurrent expiration failed");
                        }
                    }
                }
            }
        }

        // Expired delete marker: remove the marker when it is the only
        // version left
        if rule.expired_object_delete_marker {
            let live = self.engine.versions_of(bucket, key)?;
            if live.len() == 1 && live[0].is_delete_marker {
                match self
                    .engine
                    .delete_object(bucket, key, Some(&live[0].version_id), false)
                    .await
                {
                    Ok(_) => {
                        deleted += 1;
                        debug!(bucket = %bucket.name, key, rule = %rule.id, "removed expired delete marker");
                    }
                    Err(e) => warn!(bucket = %bucket.name, key, error = %e, "marker cleanup failed"),
                }
            }
        }

        Ok(deleted)
    }
}

fn age_days(created_at: u64, now: u64) -> u64 {
    now.saturating_sub(created_at) / 86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_days() {
        assert_eq!(age_days(0, 86_400 * 31), 31);
        assert_eq!(age_days(100, 100), 0);
        assert_eq!(age_days(200, 100), 0);
    }
}

#[cfg(test)]
mod worker_tests {
    use super::*;
    use crate::bucket::CreateBucketOpts;
    use crate::test_util::{body, put_input, test_engine};
    use maxiofs_common::{ObjectKey, VersioningState};

    fn backdate(
        engine: &Engine,
        bucket: &BucketRecord,
        key: &str,
        version_id: &str,
        days: u64,
    ) {
        let meta_key = keys::object_version(&bucket.tenant_id, &bucket.name, key, version_id);
        let mut record: VersionRecord = engine
            .meta
            .get_json(&meta_key)
            .unwrap()
            .expect("version exists");
        record.created_at = now_secs() - days * 86_400;
        engine.meta.put_json(&meta_key, &record).unwrap();
    }

    #[tokio::test]
    async fn test_noncurrent_expiration() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u", "U", "lc", CreateBucketOpts::default())
            .unwrap();
        engine
            .put_bucket_versioning("lc", VersioningState::Enabled)
            .unwrap();
        engine
            .put_bucket_lifecycle(
                "lc",
                vec![LifecycleRule {
                    id: "noncurrent".into(),
                    enabled: true,
                    prefix: String::new(),
                    expiration_days: None,
                    noncurrent_days: Some(30),
                    expired_object_delete_marker: false,
                }],
            )
            .unwrap();
        let bucket = engine.resolve_bucket("lc").unwrap();

        let key = ObjectKey::new("k").unwrap();
        let v1 = engine.put_object(&bucket, &key, body(b"v1"), put_input()).await.unwrap();
        let v2 = engine.put_object(&bucket, &key, body(b"v2"), put_input()).await.unwrap();
        let v1_id = v1.version_id.unwrap();

        // v1 is noncurrent and 31 days old; v2 is current
        backdate(&engine, &bucket, "k", &v1_id, 31);

        let worker = LifecycleWorker::new(
            engine.clone(),
            Duration::from_secs(3600),
            10_000,
            Duration::from_secs(7 * 86_400),
        );
        let (_tx, mut rx) = tokio::sync::watch::channel(false);
        let deleted = worker.run_once(&mut rx).await.unwrap();
        assert_eq!(deleted, 1);

        let versions = engine.versions_of(&bucket, "k").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, v2.version_id.unwrap());
        assert!(versions[0].is_latest);
    }

    #[tokio::test]
    async fn test_lifecycle_respects_object_lock() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u", "U", "lcw", CreateBucketOpts { object_lock: true })
            .unwrap();
        engine
            .put_bucket_object_lock(
                "lcw",
                crate::types::ObjectLockConfig {
                    default_mode: Some(maxiofs_common::ObjectLockMode::Compliance),
                    default_days: Some(365),
                },
            )
            .unwrap();
        engine
            .put_bucket_lifecycle(
                "lcw",
                vec![LifecycleRule {
                    id: "nc".into(),
                    enabled: true,
                    prefix: String::new(),
                    expiration_days: None,
                    noncurrent_days: Some(1),
                    expired_object_delete_marker: false,
                }],
            )
            .unwrap();
        let bucket = engine.resolve_bucket("lcw").unwrap();

        let key = ObjectKey::new("k").unwrap();
        let v1 = engine.put_object(&bucket, &key, body(b"a"), put_input()).await.unwrap();
        engine.put_object(&bucket, &key, body(b"b"), put_input()).await.unwrap();
        backdate(&engine, &bucket, "k", &v1.version_id.unwrap(), 10);

        let worker = LifecycleWorker::new(
            engine.clone(),
            Duration::from_secs(3600),
            10_000,
            Duration::from_secs(7 * 86_400),
        );
        let (_tx, mut rx) = tokio::sync::watch::channel(false);
        let deleted = worker.run_once(&mut rx).await.unwrap();

        // The noncurrent version is under COMPLIANCE retention
        assert_eq!(deleted, 0);
        assert_eq!(engine.versions_of(&bucket, "k").unwrap().len(), 2);
    }
}
