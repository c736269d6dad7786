//! Object read/write/delete paths: versioning, delete markers, Object
//! Lock enforcement, per-object ACLs, and listings.
//!
//! Every write to a `(bucket, key)` runs under the striped key mutex:
//! the blob lands first, then one metadata batch commits the version
//! record, the latest-pointer flip, tenant usage, the event queue entry,
//! and any replication tasks together.

use bytes::Bytes;
use futures::Stream;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::bucket::meta_err;
use crate::types::{BucketRecord, EventRecord, ReplicationOp, ReplicationTask, VersionRecord};
use crate::Engine;
use maxiofs_auth::acl::Acl;
use maxiofs_blob::store::{BlobReadOptions, BlobWriteOptions};
use maxiofs_blob::{BlobStore, ByteStream};
use maxiofs_common::{
    generate_version_id, now_secs, Error, ObjectKey, ObjectLockMode, Result, VersioningState,
    NULL_VERSION_ID,
};
use maxiofs_meta::{keys, BatchOp};

/// Inputs for a single-part PUT
pub struct PutObjectInput {
    pub content_type: String,
    pub user_metadata: HashMap<String, String>,
    /// Base64 Content-MD5 header value, when the client sent one
    pub content_md5: Option<String>,
    pub storage_class: String,
    pub acl: Acl,
    /// Tenant storage quota in bytes (0 = unlimited)
    pub quota_max_bytes: u64,
}

/// Result of a committed PUT
#[derive(Debug)]
pub struct PutObjectOutput {
    /// `None` for unversioned buckets
    pub version_id: Option<String>,
    pub etag: String,
    pub size: u64,
}

/// Result of a DELETE
#[derive(Debug)]
pub struct DeleteObjectOutput {
    /// True when the delete created a delete marker
    pub delete_marker: bool,
    pub version_id: Option<String>,
}

/// One key in a batch delete request
#[derive(Debug, Clone)]
pub struct ObjectIdentifier {
    pub key: String,
    pub version_id: Option<String>,
}

/// Listing results (ListObjectsV2 shape)
#[derive(Debug, Default)]
pub struct ListObjectsOutput {
    pub objects: Vec<VersionRecord>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_token: Option<String>,
}

/// Version listing results
#[derive(Debug, Default)]
pub struct ListVersionsOutput {
    pub versions: Vec<VersionRecord>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_marker: Option<String>,
}

impl Engine {
    // ── Write path ────────────────────────────────────────────────────────

    /// Stream a body into a new object version.
    pub async fn put_object<S>(
        &self,
        bucket: &BucketRecord,
        key: &ObjectKey,
        body: S,
        input: PutObjectInput,
    ) -> Result<PutObjectOutput>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        let _guard = self.locks.lock(&bucket.name, key.as_str()).await;

        let versioned = bucket.versioning_enabled();
        let version_id = if versioned {
            generate_version_id()
        } else {
            NULL_VERSION_ID.to_string()
        };

        // The blob path gets a fresh suffix even when the metadata
        // version is "null", so a failed commit never clobbers the blob
        // the old record still points at.
        let blob_suffix = if versioned {
            version_id.clone()
        } else {
            generate_version_id()
        };
        let blob_ref =
            BlobStore::version_path(&bucket.tenant_id, &bucket.name, key.as_str(), &blob_suffix);

        let write_opts = self.write_opts(bucket);
        let put = self.blobs.put_stream(&blob_ref, body, &write_opts).await?;

        // Content-MD5 check happens before any metadata is touched
        if let Some(expected_b64) = &input.content_md5 {
            use base64::Engine as _;
            let expected = base64::engine::general_purpose::STANDARD
                .decode(expected_b64)
                .unwrap_or_default();
            if expected != put.md5 {
                self.blobs.delete(&blob_ref).await.ok();
                return Err(Error::BadDigest {
                    expected: hex::encode(expected),
                    actual: put.etag,
                });
            }
        }

        let existing = self.versions_of(bucket, key.as_str())?;
        let replaced = (!versioned)
            .then(|| existing.iter().find(|v| v.version_id == NULL_VERSION_ID))
            .flatten()
            .cloned();

        // Quota check counts the bytes this write frees on overwrite
        if input.quota_max_bytes > 0 {
            let usage = self
                .meta
                .counter(&keys::usage_bytes(&bucket.tenant_id))
                .map_err(meta_err)?;
            let freed = replaced.as_ref().map_or(0, |r| r.size as i64);
            if usage - freed + put.size as i64 > input.quota_max_bytes as i64 {
                self.blobs.delete(&blob_ref).await.ok();
                return Err(Error::QuotaExceeded(format!(
                    "tenant storage limit of {} bytes reached",
                    input.quota_max_bytes
                )));
            }
        }

        let now = now_secs();
        let (lock_mode, retain_until) = self.default_lock(bucket, now);
        let record = VersionRecord {
            bucket: bucket.name.clone(),
            key: key.as_str().to_string(),
            version_id: version_id.clone(),
            is_latest: true,
            is_delete_marker: false,
            size: put.size,
            stored_size: put.stored_size,
            etag: put.etag.clone(),
            content_type: input.content_type,
            user_metadata: input.user_metadata,
            storage_class: input.storage_class,
            encryption: put.encryption,
            compressed: put.compressed,
            acl: input.acl,
            lock_mode,
            retain_until,
            legal_hold: false,
            blob_ref,
            created_at: now,
            created_at_ms: chrono::Utc::now().timestamp_millis() as u64,
            seq: self.next_seq(),
        };

        let mut ops = Vec::new();
        self.stage_commit(
            bucket,
            &existing,
            &record,
            replaced.as_ref(),
            "s3:ObjectCreated:Put",
            &mut ops,
        )?;

        if let Err(e) = self.meta.batch(ops) {
            // Orphaned blob: best-effort cleanup, surface 500
            warn!(bucket = %bucket.name, key = %record.key, error = %e, "metadata commit failed after blob write");
            self.blobs.delete(&record.blob_ref).await.ok();
            return Err(meta_err(e));
        }

        // The replaced null-version blob is dead only after the commit
        if let Some(old) = replaced {
            if !old.is_delete_marker && !old.blob_ref.is_empty() {
                self.blobs.delete(&old.blob_ref).await.ok();
            }
        }

        debug!(bucket = %bucket.name, key = %key, version = %version_id, size = put.size, "object committed");
        Ok(PutObjectOutput {
            version_id: versioned.then_some(version_id),
            etag: put.etag,
            size: put.size,
        })
    }

    /// Commit an already-written blob as the new latest version. Shared
    /// by `put_object` and multipart complete (which supplies its own
    /// composite ETag).
    pub(crate) fn stage_commit(
        &self,
        bucket: &BucketRecord,
        existing: &[VersionRecord],
        record: &VersionRecord,
        replaced: Option<&VersionRecord>,
        event_name: &str,
        ops: &mut Vec<BatchOp>,
    ) -> Result<()> {
        // Demote whichever version currently claims latest
        for prior in existing {
            if prior.is_latest && prior.version_id != record.version_id {
                let mut demoted = prior.clone();
                demoted.is_latest = false;
                ops.push(
                    BatchOp::put_json(
                        keys::object_version(
                            &bucket.tenant_id,
                            &bucket.name,
                            &record.key,
                            &prior.version_id,
                        ),
                        &demoted,
                    )
                    .map_err(meta_err)?,
                );
            }
        }

        ops.push(
            BatchOp::put_json(
                keys::object_version(
                    &bucket.tenant_id,
                    &bucket.name,
                    &record.key,
                    &record.version_id,
                ),
                record,
            )
            .map_err(meta_err)?,
        );

        let freed = replaced.map_or(0, |r| r.size as i64);
        let freed_objects = match replaced {
            Some(r) if !r.is_delete_marker => 1,
            _ => 0,
        };
        ops.push(BatchOp::add(
            keys::usage_bytes(&bucket.tenant_id),
            record.size as i64 - freed,
        ));
        ops.push(BatchOp::add(
            keys::usage_objects(&bucket.tenant_id),
            1 - freed_objects,
        ));
        ops.push(BatchOp::add(
            keys::bucket_stat_bytes(&bucket.tenant_id, &bucket.name),
            record.size as i64 - freed,
        ));
        ops.push(BatchOp::add(
            keys::bucket_stat_objects(&bucket.tenant_id, &bucket.name),
            1 - freed_objects,
        ));

        self.stage_mutation_fanout(bucket, record, event_name, ReplicationOp::Put, ops)
    }

    /// Queue event and replication entries for a committed mutation.
    pub(crate) fn stage_mutation_fanout(
        &self,
        bucket: &BucketRecord,
        record: &VersionRecord,
        event_name: &str,
        repl_op: ReplicationOp,
        ops: &mut Vec<BatchOp>,
    ) -> Result<()> {
        let now = now_secs();

        for target in &bucket.notifications {
            if !target.matches(event_name, &record.key) {
                continue;
            }
            let event = EventRecord {
                event_name: event_name.to_string(),
                bucket: bucket.name.clone(),
                key: record.key.clone(),
                version_id: record.version_id.clone(),
                size: record.size,
                etag: record.etag.clone(),
                webhook_url: target.webhook_url.clone(),
                created_at: now,
                attempts: 0,
                next_attempt_at: 0,
            };
            ops.push(
                BatchOp::put_json(keys::event(now, self.next_seq()), &event).map_err(meta_err)?,
            );
        }

        for rule in self.replication_rules()? {
            if !rule.enabled || rule.source_bucket != bucket.name {
                continue;
            }
            if repl_op == ReplicationOp::Delete && !rule.replicate_deletes {
                continue;
            }
            let task = ReplicationTask {
                rule_id: rule.id.clone(),
                bucket: bucket.name.clone(),
                key: record.key.clone(),
                version_id: record.version_id.clone(),
                op: repl_op,
                enqueued_at: now,
                attempts: 0,
                next_attempt_at: 0,
            };
            ops.push(
                BatchOp::put_json(
                    keys::replication_task(&rule.id, now, self.next_seq()),
                    &task,
                )
                .map_err(meta_err)?,
            );
        }
        Ok(())
    }

    pub(crate) fn write_opts(&self, bucket: &BucketRecord) -> BlobWriteOptions {
        BlobWriteOptions {
            compress: self.compress_level,
            master_key: bucket
                .encryption
                .as_ref()
                .and_then(|_| self.master_key.clone()),
        }
    }

    pub(crate) fn default_lock(&self, bucket: &BucketRecord, now: u64) -> (Option<ObjectLockMode>, u64) {
        match &bucket.object_lock {
            Some(cfg) => match (cfg.default_mode, cfg.default_days) {
                (Some(mode), Some(days)) => (Some(mode), now + u64::from(days) * 86_400),
                _ => (None, 0),
            },
            None => (None, 0),
        }
    }

    // ── Read path ─────────────────────────────────────────────────────────

    /// All stored versions of a key, unordered.
    pub(crate) fn versions_of(
        &self,
        bucket: &BucketRecord,
        key: &str,
    ) -> Result<Vec<VersionRecord>> {
        let prefix = keys::object_key_prefix(&bucket.tenant_id, &bucket.name, key);
        let entries = self.meta.scan(&prefix, None, usize::MAX).map_err(meta_err)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode().map_err(meta_err)?);
        }
        Ok(out)
    }

    /// Resolve a version reference: an explicit version ID, or the
    /// latest version when none is given.
    pub fn resolve_version(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<VersionRecord> {
        match version_id {
            Some(vid) => self
                .meta
                .get_json(&keys::object_version(
                    &bucket.tenant_id,
                    &bucket.name,
                    key,
                    vid,
                ))
                .map_err(meta_err)?
                .ok_or_else(|| Error::VersionNotFound {
                    bucket: bucket.name.clone(),
                    key: key.to_string(),
                    version_id: vid.to_string(),
                }),
            None => self
                .versions_of(bucket, key)?
                .into_iter()
                .find(|v| v.is_latest)
                .ok_or_else(|| Error::ObjectNotFound {
                    bucket: bucket.name.clone(),
                    key: key.to_string(),
                }),
        }
    }

    /// Resolve and open an object for reading. `range` is the raw
    /// inclusive byte range from the Range header, validated here
    /// against the object size.
    pub async fn get_object(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
        range: Option<(u64, Option<u64>)>,
    ) -> Result<(VersionRecord, ByteStream, Option<(u64, u64)>)> {
        let record = self.resolve_version(bucket, key, version_id)?;

        if record.is_delete_marker {
            // S3: latest-is-marker reads 404; addressing the marker
            // directly is a 405
            return if version_id.is_none() {
                Err(Error::ObjectNotFound {
                    bucket: bucket.name.clone(),
                    key: key.to_string(),
                })
            } else {
                Err(Error::MethodNotAllowed(
                    "the specified version is a delete marker".into(),
                ))
            };
        }

        let effective_range = match range {
            None => None,
            Some((start, end)) => {
                if start >= record.size {
                    return Err(Error::InvalidRange(format!(
                        "range start {start} beyond object size {}",
                        record.size
                    )));
                }
                let end = end.unwrap_or(record.size - 1).min(record.size - 1);
                if start > end {
                    return Err(Error::InvalidRange(format!("bytes={start}-{end}")));
                }
                Some((start, end))
            }
        };

        if record.encryption.is_some() && self.master_key.is_none() {
            return Err(Error::internal(
                "object is encrypted but no master key is configured",
            ));
        }

        let stream = crate::retry::retry_transient(|| async {
            let read_opts = BlobReadOptions {
                compressed: record.compressed,
                dek: match (&record.encryption, &self.master_key) {
                    (Some(info), Some(master)) => Some(master.unwrap_dek(info)?),
                    _ => None,
                },
            };
            self.blobs
                .get_stream(&record.blob_ref, effective_range, read_opts)
                .await
        })
        .await?;
        Ok((record, stream, effective_range))
    }

    // ── Delete path ───────────────────────────────────────────────────────

    /// Delete an object or a specific version, honoring versioning
    /// semantics and Object Lock.
    pub async fn delete_object(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
        bypass_governance: bool,
    ) -> Result<DeleteObjectOutput> {
        let _guard = self.locks.lock(&bucket.name, key).await;

        match version_id {
            Some(vid) => self.delete_specific_version(bucket, key, vid, bypass_governance).await,
            None => match bucket.versioning {
                VersioningState::Enabled => self.insert_delete_marker(bucket, key, None).await,
                VersioningState::Suspended => {
                    self.insert_delete_marker(bucket, key, Some(NULL_VERSION_ID)).await
                }
                VersioningState::Unversioned => {
                    self.delete_unversioned(bucket, key, bypass_governance).await
                }
            },
        }
    }

    async fn insert_delete_marker(
        &self,
        bucket: &BucketRecord,
        key: &str,
        forced_version: Option<&str>,
    ) -> Result<DeleteObjectOutput> {
        let existing = self.versions_of(bucket, key)?;
        let version_id = forced_version
            .map(String::from)
            .unwrap_or_else(generate_version_id);

        // A suspended bucket's marker overwrites the null version
        let replaced = forced_version
            .and_then(|v| existing.iter().find(|r| r.version_id == v))
            .cloned();
        if let Some(r) = &replaced {
            if r.locked(now_secs()) {
                return Err(Error::ObjectLocked(key.to_string()));
            }
        }

        let now = now_secs();
        let marker = VersionRecord {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            version_id: version_id.clone(),
            is_latest: true,
            is_delete_marker: true,
            size: 0,
            stored_size: 0,
            etag: String::new(),
            content_type: String::new(),
            user_metadata: HashMap::new(),
            storage_class: String::new(),
            encryption: None,
            compressed: false,
            acl: bucket.acl.clone(),
            lock_mode: None,
            retain_until: 0,
            legal_hold: false,
            blob_ref: String::new(),
            created_at: now,
            created_at_ms: chrono::Utc::now().timestamp_millis() as u64,
            seq: self.next_seq(),
        };

        let mut ops = Vec::new();
        for prior in &existing {
            if prior.is_latest && prior.version_id != marker.version_id {
                let mut demoted = prior.clone();
                demoted.is_latest = false;
                ops.push(
                    BatchOp::put_json(
                        keys::object_version(
                            &bucket.tenant_id,
                            &bucket.name,
                            key,
                            &prior.version_id,
                        ),
                        &demoted,
                    )
                    .map_err(meta_err)?,
                );
            }
        }
        ops.push(
            BatchOp::put_json(
                keys::object_version(&bucket.tenant_id, &bucket.name, key, &version_id),
                &marker,
            )
            .map_err(meta_err)?,
        );
        if let Some(old) = &replaced {
            if !old.is_delete_marker {
                ops.push(BatchOp::add(
                    keys::usage_bytes(&bucket.tenant_id),
                    -(old.size as i64),
                ));
                ops.push(BatchOp::add(keys::usage_objects(&bucket.tenant_id), -1));
                ops.push(BatchOp::add(
                    keys::bucket_stat_bytes(&bucket.tenant_id, &bucket.name),
                    -(old.size as i64),
                ));
                ops.push(BatchOp::add(
                    keys::bucket_stat_objects(&bucket.tenant_id, &bucket.name),
                    -1,
                ));
            }
        }
        self.stage_mutation_fanout(
            bucket,
            &marker,
            "s3:ObjectRemoved:DeleteMarkerCreated",
            ReplicationOp::Delete,
            &mut ops,
        )?;

        self.meta.batch(ops).map_err(meta_err)?;

        if let Some(old) = replaced {
            if !old.is_delete_marker && !old.blob_ref.is_empty() {
                self.blobs.delete(&old.blob_ref).await.ok();
            }
        }

        Ok(DeleteObjectOutput {
            delete_marker: true,
            version_id: Some(version_id),
        })
    }

    async fn delete_unversioned(
        &self,
        bucket: &BucketRecord,
        key: &str,
        bypass_governance: bool,
    ) -> Result<DeleteObjectOutput> {
        let Some(record) = self
            .versions_of(bucket, key)?
            .into_iter()
            .find(|v| v.version_id == NULL_VERSION_ID)
        else {
            // Deleting a missing key succeeds silently, as on S3
            return Ok(DeleteObjectOutput {
                delete_marker: false,
                version_id: None,
            });
        };
        self.check_lock(&record, bypass_governance, key)?;
        self.remove_version(bucket, key, record, None).await?;
        Ok(DeleteObjectOutput {
            delete_marker: false,
            version_id: None,
        })
    }

    async fn delete_specific_version(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: &str,
        bypass_governance: bool,
    ) -> Result<DeleteObjectOutput> {
        let versions = self.versions_of(bucket, key)?;
        let record = versions
            .iter()
            .find(|v| v.version_id == version_id)
            .cloned()
            .ok_or_else(|| Error::VersionNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
                version_id: version_id.to_string(),
            })?;

        self.check_lock(&record, bypass_governance, key)?;

        // Promote the next-newest survivor when removing the latest
        let promote = record
            .is_latest
            .then(|| {
                versions
                    .iter()
                    .filter(|v| v.version_id != record.version_id)
                    .max_by_key(|v| v.order())
                    .cloned()
            })
            .flatten();

        self.remove_version(bucket, key, record, promote).await?;
        Ok(DeleteObjectOutput {
            delete_marker: false,
            version_id: Some(version_id.to_string()),
        })
    }

    fn check_lock(&self, record: &VersionRecord, bypass: bool, key: &str) -> Result<()> {
        if !record.locked(now_secs()) {
            return Ok(());
        }
        if bypass && record.lock_bypassable() {
            return Ok(());
        }
        Err(Error::ObjectLocked(key.to_string()))
    }

    /// Remove one version record permanently, optionally promoting a
    /// survivor to latest.
    async fn remove_version(
        &self,
        bucket: &BucketRecord,
        key: &str,
        record: VersionRecord,
        promote: Option<VersionRecord>,
    ) -> Result<()> {
        let mut ops = vec![BatchOp::delete(keys::object_version(
            &bucket.tenant_id,
            &bucket.name,
            key,
            &record.version_id,
        ))];

        if let Some(mut next) = promote {
            next.is_latest = true;
            ops.push(
                BatchOp::put_json(
                    keys::object_version(&bucket.tenant_id, &bucket.name, key, &next.version_id),
                    &next,
                )
                .map_err(meta_err)?,
            );
        }

        if !record.is_delete_marker {
            ops.push(BatchOp::add(
                keys::usage_bytes(&bucket.tenant_id),
                -(record.size as i64),
            ));
            ops.push(BatchOp::add(keys::usage_objects(&bucket.tenant_id), -1));
            ops.push(BatchOp::add(
                keys::bucket_stat_bytes(&bucket.tenant_id, &bucket.name),
                -(record.size as i64),
            ));
            ops.push(BatchOp::add(
                keys::bucket_stat_objects(&bucket.tenant_id, &bucket.name),
                -1,
            ));
        }
        self.stage_mutation_fanout(
            bucket,
            &record,
            "s3:ObjectRemoved:Delete",
            ReplicationOp::Delete,
            &mut ops,
        )?;

        self.meta.batch(ops).map_err(meta_err)?;

        if !record.is_delete_marker && !record.blob_ref.is_empty() {
            self.blobs.delete(&record.blob_ref).await.ok();
        }
        Ok(())
    }

    /// Batch delete: per-key results, the request itself always
    /// succeeds.
    pub async fn delete_objects(
        &self,
        bucket: &BucketRecord,
        objects: Vec<ObjectIdentifier>,
        bypass_governance: bool,
    ) -> Vec<(ObjectIdentifier, Result<DeleteObjectOutput>)> {
        let mut results = Vec::with_capacity(objects.len());
        for obj in objects {
            let outcome = self
                .delete_object(bucket, &obj.key, obj.version_id.as_deref(), bypass_governance)
                .await;
            results.push((obj, outcome));
        }
        results
    }

    // ── Copy ──────────────────────────────────────────────────────────────

    /// Server-side copy: streams the source through the normal write
    /// path (re-encrypting under the destination bucket's settings).
    pub async fn copy_object(
        &self,
        src_bucket: &BucketRecord,
        src_key: &str,
        src_version: Option<&str>,
        dst_bucket: &BucketRecord,
        dst_key: &ObjectKey,
        input: PutObjectInput,
    ) -> Result<PutObjectOutput> {
        let (_, stream, _) = self.get_object(src_bucket, src_key, src_version, None).await?;
        self.put_object(dst_bucket, dst_key, stream, input).await
    }

    // ── Per-object ACL and lock subresources ─────────────────────────────

    pub fn get_object_acl(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Acl> {
        Ok(self.resolve_version(bucket, key, version_id)?.acl)
    }

    pub fn put_object_acl(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
        acl: Acl,
    ) -> Result<()> {
        if bucket.public_access_block.block_public_acls && acl.is_public() {
            return Err(Error::AccessDenied);
        }
        let mut record = self.resolve_version(bucket, key, version_id)?;
        record.acl = acl;
        self.meta
            .put_json(
                &keys::object_version(&bucket.tenant_id, &bucket.name, key, &record.version_id),
                &record,
            )
            .map_err(meta_err)
    }

    /// Set or extend retention on a version. Shortening or clearing is
    /// refused for COMPLIANCE, and for GOVERNANCE without bypass.
    pub fn put_object_retention(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
        mode: ObjectLockMode,
        retain_until: u64,
        bypass_governance: bool,
    ) -> Result<()> {
        if bucket.object_lock.is_none() {
            return Err(Error::ObjectLockNotEnabled(bucket.name.clone()));
        }
        let mut record = self.resolve_version(bucket, key, version_id)?;

        let shortening = retain_until < record.retain_until;
        if shortening {
            match record.lock_mode {
                Some(ObjectLockMode::Compliance) if record.retain_until > now_secs() => {
                    return Err(Error::ObjectLocked(key.to_string()));
                }
                Some(ObjectLockMode::Governance) if !bypass_governance => {
                    return Err(Error::ObjectLocked(key.to_string()));
                }
                _ => {}
            }
        }

        record.lock_mode = Some(mode);
        record.retain_until = retain_until;
        self.meta
            .put_json(
                &keys::object_version(&bucket.tenant_id, &bucket.name, key, &record.version_id),
                &record,
            )
            .map_err(meta_err)
    }

    pub fn put_object_legal_hold(
        &self,
        bucket: &BucketRecord,
        key: &str,
        version_id: Option<&str>,
        hold: bool,
    ) -> Result<()> {
        if bucket.object_lock.is_none() {
            return Err(Error::ObjectLockNotEnabled(bucket.name.clone()));
        }
        let mut record = self.resolve_version(bucket, key, version_id)?;
        record.legal_hold = hold;
        self.meta
            .put_json(
                &keys::object_version(&bucket.tenant_id, &bucket.name, key, &record.version_id),
                &record,
            )
            .map_err(meta_err)
    }

    // ── Listings ──────────────────────────────────────────────────────────

    /// List current objects (ListObjectsV2 semantics). The
    /// continuation token is the last emitted object key or common
    /// prefix.
    pub fn list_objects(
        &self,
        bucket: &BucketRecord,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListObjectsOutput> {
        let scan_prefix = keys::object_prefix(&bucket.tenant_id, &bucket.name, prefix);
        let mut after = continuation.map(|token| {
            let base = keys::object_prefix(&bucket.tenant_id, &bucket.name, token);
            if delimiter.is_some_and(|d| token.ends_with(d)) {
                // Common-prefix token: skip its whole subtree
                prefix_successor(&base)
            } else {
                // Object-key token: skip all versions of that key
                format!("{base}\u{1}")
            }
        });

        let mut out = ListObjectsOutput::default();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let mut last_emitted: Option<String> = None;
        let mut group: Option<(String, Vec<VersionRecord>)> = None;

        'outer: loop {
            let page = self
                .meta
                .scan(&scan_prefix, after.as_deref(), 1000)
                .map_err(meta_err)?;
            let page_len = page.len();
            if let Some(last) = page.last() {
                after = Some(last.key.clone());
            }

            for entry in page {
                let Some((key, _)) =
                    keys::split_object_version(&entry.key, &bucket.tenant_id, &bucket.name)
                else {
                    continue;
                };
                let record: VersionRecord = entry.decode().map_err(meta_err)?;

                match &mut group {
                    Some((k, versions)) if k.as_str() == key => {
                        versions.push(record);
                        continue;
                    }
                    _ => {}
                }

                // New key begins; emit the previous group
                if let Some((k, versions)) = group.take() {
                    if out.objects.len() + prefixes.len() >= max_keys {
                        out.is_truncated = true;
                        out.next_token = last_emitted.clone();
                        break 'outer;
                    }
                    Self::emit_listing_group(
                        &k,
                        versions,
                        prefix,
                        delimiter,
                        &mut out,
                        &mut prefixes,
                        &mut last_emitted,
                    );
                }
                group = Some((key.to_string(), vec![record]));
            }

            if page_len < 1000 {
                break;
            }
        }

        if let Some((k, versions)) = group.take() {
            if out.objects.len() + prefixes.len() >= max_keys {
                out.is_truncated = true;
                out.next_token = last_emitted.clone();
            } else {
                Self::emit_listing_group(
                    &k,
                    versions,
                    prefix,
                    delimiter,
                    &mut out,
                    &mut prefixes,
                    &mut last_emitted,
                );
            }
        }

        out.common_prefixes = prefixes.into_iter().collect();
        Ok(out)
    }

    /// Roll one key's versions up into either a listing entry or a
    /// common prefix.
    fn emit_listing_group(
        key: &str,
        versions: Vec<VersionRecord>,
        prefix: &str,
        delimiter: Option<&str>,
        out: &mut ListObjectsOutput,
        prefixes: &mut BTreeSet<String>,
        last_emitted: &mut Option<String>,
    ) {
        if let Some(delim) = delimiter {
            let remainder = &key[prefix.len()..];
            if let Some(pos) = remainder.find(delim) {
                let common = format!("{}{}", prefix, &remainder[..pos + delim.len()]);
                if prefixes.insert(common.clone()) {
                    *last_emitted = Some(common);
                }
                return;
            }
        }

        let latest = versions
            .iter()
            .find(|v| v.is_latest)
            .or_else(|| versions.iter().max_by_key(|v| v.order()));
        if let Some(latest) = latest {
            if !latest.is_delete_marker {
                *last_emitted = Some(key.to_string());
                out.objects.push(latest.clone());
            }
        }
    }

    /// List all versions and delete markers (ListObjectVersions
    /// semantics): keys ascending, versions newest-first within a key.
    pub fn list_object_versions(
        &self,
        bucket: &BucketRecord,
        prefix: &str,
        key_marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ListVersionsOutput> {
        let scan_prefix = keys::object_prefix(&bucket.tenant_id, &bucket.name, prefix);
        let after = key_marker.map(|token| {
            format!(
                "{}\u{1}",
                keys::object_prefix(&bucket.tenant_id, &bucket.name, token)
            )
        });

        let mut grouped: Vec<(String, Vec<VersionRecord>)> = Vec::new();
        let mut scanned_after = after;
        let mut truncated = false;

        'outer: loop {
            let page = self
                .meta
                .scan(&scan_prefix, scanned_after.as_deref(), 1000)
                .map_err(meta_err)?;
            if page.is_empty() {
                break;
            }
            scanned_after = Some(page.last().unwrap().key.clone());

            for entry in &page {
                let Some((key, _)) =
                    keys::split_object_version(&entry.key, &bucket.tenant_id, &bucket.name)
                else {
                    continue;
                };
                let record: VersionRecord = entry.decode().map_err(meta_err)?;
                match grouped.last_mut() {
                    Some((k, versions)) if k.as_str() == key => versions.push(record),
                    _ => {
                        if grouped.len() >= max_keys {
                            truncated = true;
                            break 'outer;
                        }
                        grouped.push((key.to_string(), vec![record]));
                    }
                }
            }
            if page.len() < 1000 {
                break;
            }
        }

        let next_key_marker = truncated.then(|| grouped.last().map(|(k, _)| k.clone())).flatten();
        let mut versions = Vec::new();
        for (_, mut group) in grouped {
            group.sort_by_key(|v| std::cmp::Reverse(v.order()));
            versions.extend(group);
        }

        Ok(ListVersionsOutput {
            versions,
            is_truncated: truncated,
            next_key_marker,
            next_version_marker: None,
        })
    }
}

/// Smallest string strictly greater than every string with this prefix.
fn prefix_successor(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last == 0xff {
            bytes.pop();
        } else {
            *bytes.last_mut().unwrap() = last + 1;
            break;
        }
    }
    String::from_utf8_lossy(&bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::CreateBucketOpts;
    use crate::test_util::{body, put_input, read_all, test_engine, test_engine_encrypted};
    use crate::types::ObjectLockConfig;

    async fn setup_bucket(
        versioned: bool,
    ) -> (tempfile::TempDir, std::sync::Arc<Engine>, BucketRecord) {
        let (dir, engine, tenant) = test_engine().await;
        let bucket = engine
            .create_bucket(&tenant, "u1", "User One", "test-bucket", CreateBucketOpts::default())
            .unwrap();
        let bucket = if versioned {
            engine
                .put_bucket_versioning("test-bucket", VersioningState::Enabled)
                .unwrap();
            engine.resolve_bucket("test-bucket").unwrap()
        } else {
            bucket
        };
        (dir, engine, bucket)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("hello.txt").unwrap();

        let out = engine
            .put_object(&bucket, &key, body(b"hello"), put_input())
            .await
            .unwrap();
        assert_eq!(out.etag, "5d41402abc4b2a76b9719d911017c592");
        assert!(out.version_id.is_none());

        let (record, stream, _) = engine.get_object(&bucket, "hello.txt", None, None).await.unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(read_all(stream).await, b"hello");
    }

    #[tokio::test]
    async fn test_put_get_encrypted_compressed() {
        let (_dir, engine, tenant) = test_engine_encrypted().await;
        let mut bucket = engine
            .create_bucket(&tenant, "u1", "U", "enc-bucket", CreateBucketOpts::default())
            .unwrap();
        engine.put_bucket_encryption("enc-bucket", true).unwrap();
        bucket = engine.resolve_bucket("enc-bucket").unwrap();

        let key = ObjectKey::new("data.bin").unwrap();
        let payload: Vec<u8> = (0..100_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let out = engine
            .put_object(&bucket, &key, body(&payload), put_input())
            .await
            .unwrap();
        assert_eq!(out.size, payload.len() as u64);

        let (record, stream, _) = engine.get_object(&bucket, "data.bin", None, None).await.unwrap();
        assert!(record.encryption.is_some());
        assert!(record.compressed);
        assert_eq!(read_all(stream).await, payload);

        // Ranged read decrypts correctly
        let (_, stream, range) = engine
            .get_object(&bucket, "data.bin", None, Some((10, Some(29))))
            .await
            .unwrap();
        assert_eq!(range, Some((10, 29)));
        assert_eq!(read_all(stream).await, &payload[10..=29]);
    }

    #[tokio::test]
    async fn test_versioned_overwrite_and_restore() {
        let (_dir, engine, bucket) = setup_bucket(true).await;
        let key = ObjectKey::new("k").unwrap();

        let v1 = engine.put_object(&bucket, &key, body(b"A"), put_input()).await.unwrap();
        let v2 = engine.put_object(&bucket, &key, body(b"B"), put_input()).await.unwrap();
        let v1_id = v1.version_id.unwrap();
        let v2_id = v2.version_id.unwrap();

        // Latest is B
        let (_, stream, _) = engine.get_object(&bucket, "k", None, None).await.unwrap();
        assert_eq!(read_all(stream).await, b"B");

        // v1 still readable by version
        let (_, stream, _) = engine.get_object(&bucket, "k", Some(&v1_id), None).await.unwrap();
        assert_eq!(read_all(stream).await, b"A");

        // At most one latest
        let latest: Vec<_> = engine
            .versions_of(&bucket, "k")
            .unwrap()
            .into_iter()
            .filter(|v| v.is_latest)
            .collect();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version_id, v2_id);

        // Delete without version creates a marker; GET turns 404
        let del = engine.delete_object(&bucket, "k", None, false).await.unwrap();
        assert!(del.delete_marker);
        let marker_id = del.version_id.unwrap();
        assert!(matches!(
            engine.get_object(&bucket, "k", None, None).await,
            Err(Error::ObjectNotFound { .. })
        ));

        // Removing the marker restores B
        engine
            .delete_object(&bucket, "k", Some(&marker_id), false)
            .await
            .unwrap();
        let (record, stream, _) = engine.get_object(&bucket, "k", None, None).await.unwrap();
        assert_eq!(record.version_id, v2_id);
        assert_eq!(read_all(stream).await, b"B");
    }

    #[tokio::test]
    async fn test_delete_specific_version_promotes_survivor() {
        let (_dir, engine, bucket) = setup_bucket(true).await;
        let key = ObjectKey::new("k").unwrap();

        let v1 = engine.put_object(&bucket, &key, body(b"one"), put_input()).await.unwrap();
        let v2 = engine.put_object(&bucket, &key, body(b"two"), put_input()).await.unwrap();

        engine
            .delete_object(&bucket, "k", Some(&v2.version_id.unwrap()), false)
            .await
            .unwrap();

        let (record, stream, _) = engine.get_object(&bucket, "k", None, None).await.unwrap();
        assert_eq!(record.version_id, v1.version_id.unwrap());
        assert_eq!(read_all(stream).await, b"one");
    }

    #[tokio::test]
    async fn test_get_marker_by_version_is_405() {
        let (_dir, engine, bucket) = setup_bucket(true).await;
        let key = ObjectKey::new("k").unwrap();
        engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();
        let del = engine.delete_object(&bucket, "k", None, false).await.unwrap();
        let marker = del.version_id.unwrap();
        assert!(matches!(
            engine.get_object(&bucket, "k", Some(&marker), None).await,
            Err(Error::MethodNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_compliance_lock_blocks_delete() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u1", "U", "worm", CreateBucketOpts { object_lock: true })
            .unwrap();
        engine
            .put_bucket_object_lock(
                "worm",
                ObjectLockConfig {
                    default_mode: Some(ObjectLockMode::Compliance),
                    default_days: Some(1),
                },
            )
            .unwrap();
        let bucket = engine.resolve_bucket("worm").unwrap();

        let key = ObjectKey::new("k").unwrap();
        let out = engine.put_object(&bucket, &key, body(b"keep"), put_input()).await.unwrap();
        let vid = out.version_id.unwrap();

        // Plain delete refused
        assert!(matches!(
            engine.delete_object(&bucket, "k", Some(&vid), false).await,
            Err(Error::ObjectLocked(_))
        ));
        // Governance bypass cannot break COMPLIANCE
        assert!(matches!(
            engine.delete_object(&bucket, "k", Some(&vid), true).await,
            Err(Error::ObjectLocked(_))
        ));
    }

    #[tokio::test]
    async fn test_governance_lock_bypass() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u1", "U", "gov", CreateBucketOpts { object_lock: true })
            .unwrap();
        engine
            .put_bucket_object_lock(
                "gov",
                ObjectLockConfig {
                    default_mode: Some(ObjectLockMode::Governance),
                    default_days: Some(1),
                },
            )
            .unwrap();
        let bucket = engine.resolve_bucket("gov").unwrap();

        let key = ObjectKey::new("k").unwrap();
        let out = engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();
        let vid = out.version_id.unwrap();

        assert!(matches!(
            engine.delete_object(&bucket, "k", Some(&vid), false).await,
            Err(Error::ObjectLocked(_))
        ));
        // With bypass the governance hold yields
        engine.delete_object(&bucket, "k", Some(&vid), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_retention_shortening_rules() {
        let (_dir, engine, tenant) = test_engine().await;
        engine
            .create_bucket(&tenant, "u1", "U", "ret", CreateBucketOpts { object_lock: true })
            .unwrap();
        let bucket = engine.resolve_bucket("ret").unwrap();
        let key = ObjectKey::new("k").unwrap();
        let out = engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();
        let vid = out.version_id;

        let far = now_secs() + 10 * 86_400;
        engine
            .put_object_retention(&bucket, "k", vid.as_deref(), ObjectLockMode::Compliance, far, false)
            .unwrap();

        // Shortening COMPLIANCE refused, even with bypass
        assert!(matches!(
            engine.put_object_retention(
                &bucket,
                "k",
                vid.as_deref(),
                ObjectLockMode::Compliance,
                far - 86_400,
                true
            ),
            Err(Error::ObjectLocked(_))
        ));
        // Extending is always fine
        engine
            .put_object_retention(&bucket, "k", vid.as_deref(), ObjectLockMode::Compliance, far + 86_400, false)
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_digest_cleans_up() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("k").unwrap();

        let mut input = put_input();
        // MD5 of "different" rather than "payload"
        use base64::Engine as _;
        input.content_md5 = Some(
            base64::engine::general_purpose::STANDARD.encode(md5_of(b"different")),
        );
        let err = engine
            .put_object(&bucket, &key, body(b"payload"), input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadDigest { .. }));

        // Nothing committed
        assert!(matches!(
            engine.get_object(&bucket, "k", None, None).await,
            Err(Error::ObjectNotFound { .. })
        ));
        assert_eq!(
            engine.meta.counter(&keys::usage_bytes(&bucket.tenant_id)).unwrap(),
            0
        );
    }

    fn md5_of(data: &[u8]) -> [u8; 16] {
        let mut w = maxiofs_blob::Md5Writer::new();
        w.update(data);
        w.finalize().1
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_no_state() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("big").unwrap();
        let mut input = put_input();
        input.quota_max_bytes = 4;

        let err = engine
            .put_object(&bucket, &key, body(b"12345"), input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
        assert_eq!(
            engine.meta.counter(&keys::usage_bytes(&bucket.tenant_id)).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_usage_accounting() {
        let (_dir, engine, bucket) = setup_bucket(true).await;
        let key = ObjectKey::new("k").unwrap();

        engine.put_object(&bucket, &key, body(b"aaaa"), put_input()).await.unwrap();
        let v2 = engine.put_object(&bucket, &key, body(b"bb"), put_input()).await.unwrap();
        // Both versions count toward usage
        assert_eq!(
            engine.meta.counter(&keys::usage_bytes(&bucket.tenant_id)).unwrap(),
            6
        );

        engine
            .delete_object(&bucket, "k", Some(&v2.version_id.unwrap()), false)
            .await
            .unwrap();
        assert_eq!(
            engine.meta.counter(&keys::usage_bytes(&bucket.tenant_id)).unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_suspended_overwrites_null_version() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("k").unwrap();
        engine.put_object(&bucket, &key, body(b"first"), put_input()).await.unwrap();

        engine
            .put_bucket_versioning("test-bucket", VersioningState::Enabled)
            .unwrap();
        engine
            .put_bucket_versioning("test-bucket", VersioningState::Suspended)
            .unwrap();
        let bucket = engine.resolve_bucket("test-bucket").unwrap();

        engine.put_object(&bucket, &key, body(b"second"), put_input()).await.unwrap();
        let versions = engine.versions_of(&bucket, "k").unwrap();
        // The null version was overwritten, not duplicated
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, NULL_VERSION_ID);
        assert_eq!(versions[0].size, 6);
        assert_eq!(
            engine.meta.counter(&keys::usage_bytes(&bucket.tenant_id)).unwrap(),
            6
        );
    }

    #[tokio::test]
    async fn test_range_validation() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("r").unwrap();
        engine.put_object(&bucket, &key, body(b"0123456789"), put_input()).await.unwrap();

        // bytes=0-0 returns one byte
        let (_, stream, range) = engine
            .get_object(&bucket, "r", None, Some((0, Some(0))))
            .await
            .unwrap();
        assert_eq!(range, Some((0, 0)));
        assert_eq!(read_all(stream).await, b"0");

        // End clamped to size
        let (_, stream, _) = engine
            .get_object(&bucket, "r", None, Some((5, Some(100))))
            .await
            .unwrap();
        assert_eq!(read_all(stream).await, b"56789");

        // Start beyond EOF is a 416
        assert!(matches!(
            engine.get_object(&bucket, "r", None, Some((10, None))).await,
            Err(Error::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn test_copy_object() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("src").unwrap();
        engine.put_object(&bucket, &key, body(b"copy me"), put_input()).await.unwrap();

        let dst = ObjectKey::new("dst").unwrap();
        let out = engine
            .copy_object(&bucket, "src", None, &bucket, &dst, put_input())
            .await
            .unwrap();
        assert_eq!(out.size, 7);

        let (_, stream, _) = engine.get_object(&bucket, "dst", None, None).await.unwrap();
        assert_eq!(read_all(stream).await, b"copy me");
    }

    #[tokio::test]
    async fn test_batch_delete_mixed_results() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("present").unwrap();
        engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();

        let results = engine
            .delete_objects(
                &bucket,
                vec![
                    ObjectIdentifier {
                        key: "present".into(),
                        version_id: None,
                    },
                    ObjectIdentifier {
                        key: "absent".into(),
                        version_id: None,
                    },
                    ObjectIdentifier {
                        key: "absent".into(),
                        version_id: Some("nope".into()),
                    },
                ],
                false,
            )
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        // Missing key deletes silently succeed
        assert!(results[1].1.is_ok());
        // Missing version is an error for that key only
        assert!(results[2].1.is_err());
    }

    #[tokio::test]
    async fn test_list_objects_with_delimiter() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        for k in ["a.txt", "dir/one", "dir/two", "dirx", "z.txt"] {
            let key = ObjectKey::new(k).unwrap();
            engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();
        }

        let out = engine
            .list_objects(&bucket, "", Some("/"), None, 1000)
            .unwrap();
        let keys: Vec<_> = out.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "dirx", "z.txt"]);
        assert_eq!(out.common_prefixes, vec!["dir/"]);
        assert!(!out.is_truncated);
    }

    #[tokio::test]
    async fn test_list_objects_pagination() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        for i in 0..5 {
            let key = ObjectKey::new(format!("k{i}")).unwrap();
            engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();
        }

        let page1 = engine.list_objects(&bucket, "", None, None, 2).unwrap();
        assert_eq!(page1.objects.len(), 2);
        assert!(page1.is_truncated);
        let token = page1.next_token.clone().unwrap();

        let page2 = engine
            .list_objects(&bucket, "", None, Some(&token), 10)
            .unwrap();
        let keys: Vec<_> = page2.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k3", "k4"]);
        assert!(!page2.is_truncated);
    }

    #[tokio::test]
    async fn test_list_hides_delete_markers() {
        let (_dir, engine, bucket) = setup_bucket(true).await;
        for k in ["keep", "gone"] {
            let key = ObjectKey::new(k).unwrap();
            engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();
        }
        engine.delete_object(&bucket, "gone", None, false).await.unwrap();

        let out = engine.list_objects(&bucket, "", None, None, 100).unwrap();
        let keys: Vec<_> = out.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["keep"]);

        // Version listing still shows the whole chain
        let versions = engine
            .list_object_versions(&bucket, "", None, 100)
            .unwrap();
        assert_eq!(versions.versions.len(), 3);
        assert!(versions.versions.iter().any(|v| v.is_delete_marker));
    }

    #[tokio::test]
    async fn test_object_acl_roundtrip() {
        let (_dir, engine, bucket) = setup_bucket(false).await;
        let key = ObjectKey::new("k").unwrap();
        engine.put_object(&bucket, &key, body(b"x"), put_input()).await.unwrap();

        let acl = Acl::canned("public-read", "u1", "User One").unwrap();
        engine.put_object_acl(&bucket, "k", None, acl.clone()).unwrap();
        assert_eq!(engine.get_object_acl(&bucket, "k", None).unwrap(), acl);
    }
}
