//! Multipart upload state and the complete/abort paths.
//!
//! Parts land as independent blobs under `parts/{uploadID}/`; Complete
//! validates the client's part list against the stored parts, rewrites
//! them into one contiguous object blob, and commits the new version in
//! a single metadata batch that also retires the upload state. Part
//! blobs are deleted only after that commit, so a crash in between
//! leaves a readable object plus orphans for the stale-upload sweep.

use futures::TryStreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bucket::meta_err;
use crate::object::PutObjectOutput;
use crate::types::{BucketRecord, MultipartRecord, PartRecord, VersionRecord};
use crate::Engine;
use maxiofs_auth::acl::Acl;
use maxiofs_blob::store::BlobReadOptions;
use maxiofs_blob::{multipart_etag, BlobStore, ByteStream};
use maxiofs_common::{
    generate_version_id, now_secs, Error, ObjectKey, Result, NULL_VERSION_ID,
};
use maxiofs_meta::{keys, BatchOp};

/// Inclusive part number bounds
pub const MIN_PART_NUMBER: u32 = 1;
pub const MAX_PART_NUMBER: u32 = 10_000;

/// One entry of the client's CompleteMultipartUpload list
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl Engine {
    /// Start a multipart upload.
    pub fn initiate_multipart(
        &self,
        bucket: &BucketRecord,
        key: &ObjectKey,
        content_type: String,
        user_metadata: HashMap<String, String>,
        acl: Acl,
        initiator_user_id: &str,
    ) -> Result<MultipartRecord> {
        let record = MultipartRecord {
            upload_id: generate_version_id(),
            bucket: bucket.name.clone(),
            tenant_id: bucket.tenant_id.clone(),
            key: key.as_str().to_string(),
            initiator_user_id: initiator_user_id.to_string(),
            content_type,
            user_metadata,
            acl,
            started_at: now_secs(),
        };
        self.meta
            .put_json(
                &keys::multipart(&bucket.tenant_id, &bucket.name, &record.upload_id),
                &record,
            )
            .map_err(meta_err)?;
        debug!(bucket = %bucket.name, key = %key, upload_id = %record.upload_id, "multipart initiated");
        Ok(record)
    }

    /// Look up an in-progress upload.
    pub fn get_multipart(&self, bucket: &BucketRecord, upload_id: &str) -> Result<MultipartRecord> {
        self.meta
            .get_json(&keys::multipart(&bucket.tenant_id, &bucket.name, upload_id))
            .map_err(meta_err)?
            .ok_or_else(|| Error::NoSuchUpload {
                upload_id: upload_id.to_string(),
            })
    }

    /// Upload one part. Re-uploading a part number is last-writer-wins.
    pub async fn upload_part<S>(
        &self,
        bucket: &BucketRecord,
        upload_id: &str,
        part_number: u32,
        body: S,
    ) -> Result<PartRecord>
    where
        S: futures::Stream<Item = Result<bytes::Bytes>> + Send + Unpin,
    {
        if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(Error::invalid_argument(format!(
                "part number must be between {MIN_PART_NUMBER} and {MAX_PART_NUMBER}, got {part_number}"
            )));
        }
        self.get_multipart(bucket, upload_id)?;

        // Parts are stored raw; encryption and compression apply when
        // Complete rewrites them into the object blob
        let path = BlobStore::part_path(upload_id, part_number);
        let put = self
            .blobs
            .put_stream(&path, body, &Default::default())
            .await?;

        let part = PartRecord {
            part_number,
            etag: put.etag,
            size: put.size,
            uploaded_at: now_secs(),
        };
        self.meta
            .put_json(&keys::part(upload_id, part_number), &part)
            .map_err(meta_err)?;
        Ok(part)
    }

    /// Stored parts, ordered by part number.
    pub fn list_parts(
        &self,
        bucket: &BucketRecord,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> Result<(Vec<PartRecord>, bool)> {
        self.get_multipart(bucket, upload_id)?;
        let entries = self
            .meta
            .scan(&keys::part_prefix(upload_id), None, usize::MAX)
            .map_err(meta_err)?;
        let mut parts: Vec<PartRecord> = Vec::with_capacity(entries.len());
        for e in entries {
            parts.push(e.decode().map_err(meta_err)?);
        }
        parts.retain(|p| p.part_number > part_number_marker);
        let truncated = parts.len() > max_parts;
        parts.truncate(max_parts);
        Ok((parts, truncated))
    }

    /// In-progress uploads for a bucket.
    pub fn list_multipart_uploads(&self, bucket: &BucketRecord) -> Result<Vec<MultipartRecord>> {
        let entries = self
            .meta
            .scan(
                &keys::multipart_prefix(&bucket.tenant_id, &bucket.name),
                None,
                usize::MAX,
            )
            .map_err(meta_err)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode().map_err(meta_err)?);
        }
        Ok(out)
    }

    /// Complete a multipart upload: validate the part list, rewrite the
    /// parts into one blob, and commit the object version.
    pub async fn complete_multipart(
        &self,
        bucket: &BucketRecord,
        upload_id: &str,
        client_parts: Vec<CompletedPart>,
        quota_max_bytes: u64,
    ) -> Result<PutObjectOutput> {
        let upload = self.get_multipart(bucket, upload_id)?;

        if client_parts.is_empty() {
            return Err(Error::invalid_request("part list is empty"));
        }
        for window in client_parts.windows(2) {
            if window[1].part_number <= window[0].part_number {
                return Err(Error::InvalidPartOrder);
            }
        }

        let (stored, _) = self.list_parts(bucket, upload_id, 0, usize::MAX)?;
        let by_number: HashMap<u32, &PartRecord> =
            stored.iter().map(|p| (p.part_number, p)).collect();

        let mut total_size: u64 = 0;
        let mut digests: Vec<[u8; 16]> = Vec::with_capacity(client_parts.len());
        let mut ordered: Vec<&PartRecord> = Vec::with_capacity(client_parts.len());
        for cp in &client_parts {
            let stored = by_number.get(&cp.part_number).ok_or(Error::InvalidPart {
                part_number: cp.part_number,
            })?;
            let client_etag = cp.etag.trim_matches('"').to_ascii_lowercase();
            if client_etag != stored.etag {
                return Err(Error::InvalidPart {
                    part_number: cp.part_number,
                });
            }
            let digest: [u8; 16] = hex::decode(&stored.etag)
                .ok()
                .and_then(|d| d.try_into().ok())
                .ok_or_else(|| Error::internal("stored part etag is not an MD5"))?;
            digests.push(digest);
            total_size += stored.size;
            ordered.push(stored);
        }
        let composite_etag = multipart_etag(&digests);

        let key = ObjectKey::new_unchecked(upload.key.clone());
        let _guard = self.locks.lock(&bucket.name, key.as_str()).await;

        let versioned = bucket.versioning_enabled();
        let version_id = if versioned {
            generate_version_id()
        } else {
            NULL_VERSION_ID.to_string()
        };
        let blob_suffix = if versioned {
            version_id.clone()
        } else {
            generate_version_id()
        };
        let blob_ref =
            BlobStore::version_path(&bucket.tenant_id, &bucket.name, key.as_str(), &blob_suffix);

        // Concatenate part streams through the normal write path (this
        // is where encryption and compression kick in)
        let blobs = self.blobs.clone();
        let part_paths: Vec<String> = ordered
            .iter()
            .map(|p| BlobStore::part_path(upload_id, p.part_number))
            .collect();
        let body: ByteStream = Box::pin(
            futures::stream::iter(part_paths.into_iter().map(Ok))
                .and_then(move |path: String| {
                    let blobs = blobs.clone();
                    async move {
                        blobs
                            .get_stream(&path, None, BlobReadOptions::default())
                            .await
                    }
                })
                .try_flatten(),
        );

        let write_opts = self.write_opts(bucket);
        let put = self.blobs.put_stream(&blob_ref, body, &write_opts).await?;
        if put.size != total_size {
            self.blobs.delete(&blob_ref).await.ok();
            return Err(Error::internal(format!(
                "part concatenation wrote {} bytes, expected {total_size}",
                put.size
            )));
        }

        let existing = self.versions_of(bucket, key.as_str())?;
        let replaced = (!versioned)
            .then(|| existing.iter().find(|v| v.version_id == NULL_VERSION_ID))
            .flatten()
            .cloned();

        if quota_max_bytes > 0 {
            let usage = self
                .meta
                .counter(&keys::usage_bytes(&bucket.tenant_id))
                .map_err(meta_err)?;
            let freed = replaced.as_ref().map_or(0, |r| r.size as i64);
            if usage - freed + total_size as i64 > quota_max_bytes as i64 {
                self.blobs.delete(&blob_ref).await.ok();
                return Err(Error::QuotaExceeded(format!(
                    "tenant storage limit of {quota_max_bytes} bytes reached"
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
            size: total_size,
            stored_size: put.stored_size,
            etag: composite_etag.clone(),
            content_type: upload.content_type.clone(),
            user_metadata: upload.user_metadata.clone(),
            storage_class: "STANDARD".to_string(),
            encryption: put.encryption,
            compressed: put.compressed,
            acl: upload.acl.clone(),
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
            "s3:ObjectCreated:CompleteMultipartUpload",
            &mut ops,
        )?;
        // The same batch retires the upload state
        ops.push(BatchOp::delete(keys::multipart(
            &bucket.tenant_id,
            &bucket.name,
            upload_id,
        )));
        for part in &stored {
            ops.push(BatchOp::delete(keys::part(upload_id, part.part_number)));
        }

        if let Err(e) = self.meta.batch(ops) {
            warn!(bucket = %bucket.name, key = %record.key, error = %e, "multipart commit failed after rewrite");
            self.blobs.delete(&record.blob_ref).await.ok();
            return Err(meta_err(e));
        }

        // Part blobs are dead once the object is committed; failures
        // here leave orphans for the stale-upload sweep
        self.blobs.delete_upload_parts(upload_id).await.ok();
        if let Some(old) = replaced {
            if !old.is_delete_marker && !old.blob_ref.is_empty() {
                self.blobs.delete(&old.blob_ref).await.ok();
            }
        }

        info!(bucket = %bucket.name, key = %record.key, upload_id, parts = client_parts.len(), size = total_size, "multipart completed");
        Ok(PutObjectOutput {
            version_id: versioned.then_some(version_id),
            etag: composite_etag,
            size: total_size,
        })
    }

    /// Abort an upload: delete all part state and blobs.
    pub async fn abort_multipart(&self, bucket: &BucketRecord, upload_id: &str) -> Result<()> {
        self.get_multipart(bucket, upload_id)?;

        let mut ops = vec![BatchOp::delete(keys::multipart(
            &bucket.tenant_id,
            &bucket.name,
            upload_id,
        ))];
        let parts = self
            .meta
            .scan(&keys::part_prefix(upload_id), None, usize::MAX)
            .map_err(meta_err)?;
        for entry in &parts {
            ops.push(BatchOp::delete(entry.key.clone()));
        }
        self.meta.batch(ops).map_err(meta_err)?;

        self.blobs.delete_upload_parts(upload_id).await.ok();
        debug!(bucket = %bucket.name, upload_id, "multipart aborted");
        Ok(())
    }

    /// Garbage-collect uploads older than `max_age` plus orphaned part
    /// directories whose upload record is already gone.
    pub async fn sweep_stale_uploads(&self, max_age: Duration) -> Result<usize> {
        let cutoff = now_secs().saturating_sub(max_age.as_secs());
        let mut removed = 0usize;

        let uploads = self
            .meta
            .scan(keys::MULTIPART_ALL, None, usize::MAX)
            .map_err(meta_err)?;
        for entry in uploads {
            let upload: MultipartRecord = entry.decode().map_err(meta_err)?;
            if upload.started_at >= cutoff {
                continue;
            }
            let mut ops = vec![BatchOp::delete(entry.key.clone())];
            let parts = self
                .meta
                .scan(&keys::part_prefix(&upload.upload_id), None, usize::MAX)
                .map_err(meta_err)?;
            for p in &parts {
                ops.push(BatchOp::delete(p.key.clone()));
            }
            self.meta.batch(ops).map_err(meta_err)?;
            self.blobs.delete_upload_parts(&upload.upload_id).await.ok();
            removed += 1;
            info!(upload_id = %upload.upload_id, bucket = %upload.bucket, "stale multipart upload removed");
        }

        // Orphaned part directories with no backing record
        for upload_id in self.blobs.stale_part_uploads(max_age).await? {
            let known = self
                .meta
                .scan(keys::MULTIPART_ALL, None, usize::MAX)
                .map_err(meta_err)?
                .iter()
                .any(|e| e.key.ends_with(&upload_id));
            if !known {
                self.blobs.delete_upload_parts(&upload_id).await.ok();
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::CreateBucketOpts;
    use crate::test_util::{body, read_all, test_engine};
    use maxiofs_auth::acl::Acl;

    async fn setup() -> (
        tempfile::TempDir,
        std::sync::Arc<Engine>,
        crate::types::BucketRecord,
    ) {
        let (dir, engine, tenant) = test_engine().await;
        let bucket = engine
            .create_bucket(&tenant, "u1", "User One", "mp-bucket", CreateBucketOpts::default())
            .unwrap();
        (dir, engine, bucket)
    }

    fn initiate(engine: &Engine, bucket: &crate::types::BucketRecord) -> MultipartRecord {
        engine
            .initiate_multipart(
                bucket,
                &ObjectKey::new("assembled.bin").unwrap(),
                "application/octet-stream".to_string(),
                HashMap::new(),
                Acl::private("u1", "User One"),
                "u1",
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_part_number_bounds() {
        let (_dir, engine, bucket) = setup().await;
        let upload = initiate(&engine, &bucket);

        for bad in [0u32, 10_001] {
            let err = engine
                .upload_part(&bucket, &upload.upload_id, bad, body(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
        engine
            .upload_part(&bucket, &upload.upload_id, 10_000, body(b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_upload_rejected() {
        let (_dir, engine, bucket) = setup().await;
        assert!(matches!(
            engine.upload_part(&bucket, "nope", 1, body(b"x")).await,
            Err(Error::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_out_of_order_upload() {
        let (_dir, engine, bucket) = setup().await;
        let upload = initiate(&engine, &bucket);

        // Upload part 2 before part 1; completion list is ordered
        let part2_data = vec![0xBBu8; 6 * 1024 * 1024];
        let part1_data = vec![0xAAu8; 3 * 1024 * 1024];
        let p2 = engine
            .upload_part(&bucket, &upload.upload_id, 2, body(&part2_data))
            .await
            .unwrap();
        let p1 = engine
            .upload_part(&bucket, &upload.upload_id, 1, body(&part1_data))
            .await
            .unwrap();

        let out = engine
            .complete_multipart(
                &bucket,
                &upload.upload_id,
                vec![
                    CompletedPart {
                        part_number: 1,
                        etag: p1.etag.clone(),
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: p2.etag.clone(),
                    },
                ],
                0,
            )
            .await
            .unwrap();
        assert!(out.etag.ends_with("-2"));
        assert_eq!(out.size, (part1_data.len() + part2_data.len()) as u64);

        // Body is part1 then part2
        let (record, stream, _) = engine
            .get_object(&bucket, "assembled.bin", None, None)
            .await
            .unwrap();
        assert_eq!(record.etag, out.etag);
        let got = read_all(stream).await;
        assert_eq!(&got[..part1_data.len()], part1_data.as_slice());
        assert_eq!(&got[part1_data.len()..], part2_data.as_slice());

        // Upload state is gone
        assert!(matches!(
            engine.get_multipart(&bucket, &upload.upload_id),
            Err(Error::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_validates_part_list() {
        let (_dir, engine, bucket) = setup().await;
        let upload = initiate(&engine, &bucket);
        let p1 = engine
            .upload_part(&bucket, &upload.upload_id, 1, body(b"one"))
            .await
            .unwrap();
        engine
            .upload_part(&bucket, &upload.upload_id, 2, body(b"two"))
            .await
            .unwrap();

        // Wrong etag
        let err = engine
            .complete_multipart(
                &bucket,
                &upload.upload_id,
                vec![CompletedPart {
                    part_number: 1,
                    etag: "d41d8cd98f00b204e9800998ecf8427e".into(),
                }],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPart { part_number: 1 }));

        // Out-of-order completion list
        let err = engine
            .complete_multipart(
                &bucket,
                &upload.upload_id,
                vec![
                    CompletedPart {
                        part_number: 2,
                        etag: "x".into(),
                    },
                    CompletedPart {
                        part_number: 1,
                        etag: p1.etag.clone(),
                    },
                ],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPartOrder));

        // Unknown part number
        let err = engine
            .complete_multipart(
                &bucket,
                &upload.upload_id,
                vec![CompletedPart {
                    part_number: 3,
                    etag: "x".into(),
                }],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPart { part_number: 3 }));
    }

    #[tokio::test]
    async fn test_part_reupload_last_writer_wins() {
        let (_dir, engine, bucket) = setup().await;
        let upload = initiate(&engine, &bucket);

        engine
            .upload_part(&bucket, &upload.upload_id, 1, body(b"old"))
            .await
            .unwrap();
        let newer = engine
            .upload_part(&bucket, &upload.upload_id, 1, body(b"newer"))
            .await
            .unwrap();

        let (parts, _) = engine.list_parts(&bucket, &upload.upload_id, 0, 100).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].etag, newer.etag);
        assert_eq!(parts[0].size, 5);
    }

    #[tokio::test]
    async fn test_abort_cleans_up() {
        let (_dir, engine, bucket) = setup().await;
        let upload = initiate(&engine, &bucket);
        engine
            .upload_part(&bucket, &upload.upload_id, 1, body(b"data"))
            .await
            .unwrap();

        engine.abort_multipart(&bucket, &upload.upload_id).await.unwrap();
        assert!(matches!(
            engine.get_multipart(&bucket, &upload.upload_id),
            Err(Error::NoSuchUpload { .. })
        ));
        // Part blob gone
        assert!(engine
            .blobs
            .stat(&BlobStore::part_path(&upload.upload_id, 1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stale_upload_sweep() {
        let (_dir, engine, bucket) = setup().await;
        let upload = initiate(&engine, &bucket);
        engine
            .upload_part(&bucket, &upload.upload_id, 1, body(b"data"))
            .await
            .unwrap();

        // Not stale yet
        assert_eq!(
            engine.sweep_stale_uploads(Duration::from_secs(3600)).await.unwrap(),
            0
        );
        // Everything older than zero seconds is stale
        assert_eq!(
            engine.sweep_stale_uploads(Duration::from_secs(0)).await.unwrap(),
            1
        );
        assert!(matches!(
            engine.get_multipart(&bucket, &upload.upload_id),
            Err(Error::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_multipart_uploads() {
        let (_dir, engine, bucket) = setup().await;
        let u1 = initiate(&engine, &bucket);
        let u2 = initiate(&engine, &bucket);

        let uploads = engine.list_multipart_uploads(&bucket).unwrap();
        let ids: Vec<_> = uploads.iter().map(|u| u.upload_id.as_str()).collect();
        assert!(ids.contains(&u1.upload_id.as_str()));
        assert!(ids.contains(&u2.upload_id.as_str()));
    }
}
