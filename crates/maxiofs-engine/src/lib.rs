//! MaxIOFS object engine
//!
//! Bucket lifecycle, the object/multipart write paths, versioning and
//! Object Lock enforcement, and the background workers for lifecycle
//! expiration, replication shipping, and event delivery.

pub mod audit;
pub mod bucket;
pub mod events;
pub mod keymutex;
pub mod lifecycle;
pub mod multipart;
pub mod object;
pub mod replication;
pub mod retry;
pub mod types;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use maxiofs_blob::{BlobStore, MasterKey};
use maxiofs_meta::MetaStore;

pub use keymutex::KeyMutex;
pub use types::*;

/// Counters the background workers keep for the metrics exporter.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub events_delivered: AtomicU64,
    pub events_dropped: AtomicU64,
    pub replication_shipped: AtomicU64,
    pub replication_failed: AtomicU64,
    pub lifecycle_deleted: AtomicU64,
}

/// Shared object-plane state. One per process; handlers and workers
/// clone the [`Arc`].
pub struct Engine {
    pub(crate) meta: Arc<MetaStore>,
    pub(crate) blobs: Arc<BlobStore>,
    pub(crate) region: String,
    pub(crate) master_key: Option<MasterKey>,
    /// zstd level when bucket-level compression is on
    pub(crate) compress_level: Option<i32>,
    pub(crate) locks: KeyMutex,
    /// Tie-breaker for records created within the same millisecond
    pub(crate) seq: AtomicU64,
    pub stats: WorkerStats,
}

impl Engine {
    pub fn new(
        meta: Arc<MetaStore>,
        blobs: Arc<BlobStore>,
        region: impl Into<String>,
        master_key: Option<MasterKey>,
        compress_level: Option<i32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            meta,
            blobs,
            region: region.into(),
            master_key,
            compress_level,
            locks: KeyMutex::new(),
            seq: AtomicU64::new(1),
            stats: WorkerStats::default(),
        })
    }

    /// The metadata store backing this engine
    #[must_use]
    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    /// The blob store backing this engine
    #[must_use]
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use maxiofs_auth::user::Tenant;

    /// Engine over temp stores plus a tenant to own test buckets.
    pub(crate) async fn test_engine() -> (tempfile::TempDir, Arc<Engine>, Tenant) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        let blobs = Arc::new(BlobStore::open(dir.path().join("objects")).unwrap());
        let engine = Engine::new(meta, blobs, "us-east-1", None, None);
        let tenant = Tenant::new("test", "Test Tenant");
        (dir, engine, tenant)
    }

    /// Engine with encryption + compression enabled.
    pub(crate) async fn test_engine_encrypted() -> (tempfile::TempDir, Arc<Engine>, Tenant) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        let blobs = Arc::new(BlobStore::open(dir.path().join("objects")).unwrap());
        let engine = Engine::new(
            meta,
            blobs,
            "us-east-1",
            Some(MasterKey::new([7u8; 32])),
            Some(3),
        );
        let tenant = Tenant::new("test", "Test Tenant");
        (dir, engine, tenant)
    }

    pub(crate) fn body(data: &[u8]) -> maxiofs_blob::ByteStream {
        Box::pin(futures::stream::iter(vec![Ok(bytes::Bytes::copy_from_slice(data))]))
    }

    pub(crate) fn put_input() -> crate::object::PutObjectInput {
        crate::object::PutObjectInput {
            content_type: "application/octet-stream".to_string(),
            user_metadata: std::collections::HashMap::new(),
            content_md5: None,
            storage_class: "STANDARD".to_string(),
            acl: maxiofs_auth::acl::Acl::private("u1", "User One"),
            quota_max_bytes: 0,
        }
    }

    pub(crate) async fn read_all(mut stream: maxiofs_blob::ByteStream) -> Vec<u8> {
        use futures::StreamExt;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }
}
