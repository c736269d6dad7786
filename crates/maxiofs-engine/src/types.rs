//! Persisted record types for the object plane.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use maxiofs_auth::acl::{Acl, PublicAccessBlock};
use maxiofs_blob::EncryptionInfo;
use maxiofs_common::{ObjectLockMode, VersioningState};

/// Bucket-level Object Lock configuration. Presence means the lock is
/// enabled for the bucket; enabling forces versioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectLockConfig {
    /// Default retention mode applied to new object versions
    pub default_mode: Option<ObjectLockMode>,
    /// Default retention period in days
    pub default_days: Option<u32>,
}

/// Bucket-level encryption configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Algorithm tag reported on the wire (always `AES256`)
    pub algorithm: String,
}

/// One CORS rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    #[serde(default)]
    pub max_age_seconds: Option<u32>,
}

/// One lifecycle rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub id: String,
    pub enabled: bool,
    /// Key prefix filter; empty matches everything
    #[serde(default)]
    pub prefix: String,
    /// Delete the current version once older than this many days
    pub expiration_days: Option<u32>,
    /// Delete noncurrent versions once older than this many days
    pub noncurrent_days: Option<u32>,
    /// Remove a delete marker once it is the only remaining version
    #[serde(default)]
    pub expired_object_delete_marker: bool,
}

/// A webhook notification target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Event patterns, e.g. `s3:ObjectCreated:*`
    pub events: Vec<String>,
    /// Key prefix filter; empty matches everything
    #[serde(default)]
    pub prefix: String,
    pub webhook_url: String,
}

impl NotificationTarget {
    /// Does this target subscribe to `event_name` for `key`?
    #[must_use]
    pub fn matches(&self, event_name: &str, key: &str) -> bool {
        if !key.starts_with(&self.prefix) {
            return false;
        }
        self.events.iter().any(|pattern| {
            pattern == event_name
                || pattern
                    .strip_suffix('*')
                    .is_some_and(|p| event_name.starts_with(p))
        })
    }
}

/// Bucket record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRecord {
    pub name: String,
    pub tenant_id: String,
    pub owner_user_id: String,
    pub owner_display_name: String,
    pub region: String,
    pub created_at: u64,
    pub versioning: VersioningState,
    pub object_lock: Option<ObjectLockConfig>,
    pub encryption: Option<EncryptionConfig>,
    #[serde(default)]
    pub public_access_block: PublicAccessBlock,
    #[serde(default)]
    pub lifecycle: Vec<LifecycleRule>,
    #[serde(default)]
    pub notifications: Vec<NotificationTarget>,
    #[serde(default)]
    pub cors: Vec<CorsRule>,
    /// Raw bucket policy JSON
    pub policy_json: Option<String>,
    pub acl: Acl,
}

impl BucketRecord {
    /// Whether new object versions get distinct version IDs
    #[must_use]
    pub fn versioning_enabled(&self) -> bool {
        self.versioning == VersioningState::Enabled
    }
}

/// One object version record.
///
/// Ordering among versions of a key is `(created_at_ms, seq)`; `seq`
/// breaks ties within a millisecond. Version records carry no pointer
/// to their siblings; the latest is found by scanning the key's version
/// range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub is_delete_marker: bool,
    pub size: u64,
    /// On-disk size (differs from `size` for framed blobs)
    pub stored_size: u64,
    pub etag: String,
    pub content_type: String,
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
    pub storage_class: String,
    pub encryption: Option<EncryptionInfo>,
    #[serde(default)]
    pub compressed: bool,
    pub acl: Acl,
    pub lock_mode: Option<ObjectLockMode>,
    /// Epoch seconds; 0 = no retention
    #[serde(default)]
    pub retain_until: u64,
    #[serde(default)]
    pub legal_hold: bool,
    /// Blob path; empty for delete markers
    pub blob_ref: String,
    pub created_at: u64,
    pub created_at_ms: u64,
    pub seq: u64,
}

impl VersionRecord {
    /// Is this version protected from deletion right now?
    #[must_use]
    pub fn locked(&self, now: u64) -> bool {
        self.legal_hold || self.retain_until > now
    }

    /// Can the lock be overridden with governance bypass?
    #[must_use]
    pub fn lock_bypassable(&self) -> bool {
        !self.legal_hold && self.lock_mode == Some(ObjectLockMode::Governance)
    }

    /// Sort key for recency comparisons
    #[must_use]
    pub fn order(&self) -> (u64, u64) {
        (self.created_at_ms, self.seq)
    }
}

/// Multipart upload record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartRecord {
    pub upload_id: String,
    pub bucket: String,
    pub tenant_id: String,
    pub key: String,
    pub initiator_user_id: String,
    pub content_type: String,
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
    pub acl: Acl,
    pub started_at: u64,
}

/// One uploaded part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    /// Hex MD5 of the part body
    pub etag: String,
    pub size: u64,
    pub uploaded_at: u64,
}

/// Replication destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicationDestination {
    /// Another node of this cluster (HMAC-authenticated internal RPC)
    Node { node_id: String, bucket: String },
    /// An external S3 endpoint (SigV4-signed requests)
    External {
        endpoint: String,
        region: String,
        bucket: String,
        access_key_id: String,
        /// Sealed with the node master key
        secret_sealed: String,
    },
}

/// A replication rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationRule {
    pub id: String,
    pub enabled: bool,
    pub source_bucket: String,
    pub destination: ReplicationDestination,
    pub sync_interval_secs: u64,
    pub replicate_deletes: bool,
    pub created_at: u64,
}

/// Replication operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationOp {
    Put,
    Delete,
}

/// A queued replication task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub rule_id: String,
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub op: ReplicationOp,
    pub enqueued_at: u64,
    #[serde(default)]
    pub attempts: u32,
    /// Epoch seconds before which the task is not retried
    #[serde(default)]
    pub next_attempt_at: u64,
}

/// A queued webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub size: u64,
    pub etag: String,
    pub webhook_url: String,
    pub created_at: u64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub next_attempt_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_matching() {
        let target = NotificationTarget {
            events: vec!["s3:ObjectCreated:*".to_string()],
            prefix: "logs/".to_string(),
            webhook_url: "http://hook".to_string(),
        };
        assert!(target.matches("s3:ObjectCreated:Put", "logs/a.txt"));
        assert!(target.matches("s3:ObjectCreated:CompleteMultipartUpload", "logs/b"));
        assert!(!target.matches("s3:ObjectRemoved:Delete", "logs/a.txt"));
        assert!(!target.matches("s3:ObjectCreated:Put", "data/a.txt"));
    }

    #[test]
    fn test_lock_checks() {
        let mut v = VersionRecord {
            bucket: "b".into(),
            key: "k".into(),
            version_id: "v1".into(),
            is_latest: true,
            is_delete_marker: false,
            size: 1,
            stored_size: 1,
            etag: "e".into(),
            content_type: "application/octet-stream".into(),
            user_metadata: HashMap::new(),
            storage_class: "STANDARD".into(),
            encryption: None,
            compressed: false,
            acl: Acl::private("u", "U"),
            lock_mode: Some(maxiofs_common::ObjectLockMode::Governance),
            retain_until: 100,
            legal_hold: false,
            blob_ref: "ref".into(),
            created_at: 1,
            created_at_ms: 1000,
            seq: 1,
        };
        assert!(v.locked(50));
        assert!(v.lock_bypassable());
        // Retention in the past is treated as unlocked
        assert!(!v.locked(200));

        v.lock_mode = Some(maxiofs_common::ObjectLockMode::Compliance);
        assert!(!v.lock_bypassable());

        v.lock_mode = None;
        v.retain_until = 0;
        v.legal_hold = true;
        assert!(v.locked(0));
        assert!(!v.lock_bypassable());
    }
}
