//! Cluster membership and bucket→node routing.
//!
//! Node records and bucket locations are ordinary metadata records;
//! they replicate between nodes piggybacked on the internal sync RPC
//! and are eventually consistent. A bucket with no location record is
//! served locally.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use maxiofs_common::{now_secs, Error, Result};
use maxiofs_meta::{keys, MetaStore};

/// Node health as seen by the local prober
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Healthy,
    Unhealthy,
}

/// One cluster node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    /// Base URL of the node's S3 listener
    pub url: String,
    /// Base URL of the node's console listener (internal RPCs)
    pub console_url: String,
    pub status: NodeStatus,
    pub consecutive_failures: u32,
    pub last_seen: u64,
    pub added_at: u64,
}

impl NodeRecord {
    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Healthy
    }
}

/// Where a request for a bucket should be served
#[derive(Debug)]
pub enum Placement {
    /// This node owns the bucket (or no location is recorded)
    Local,
    /// A healthy peer owns it
    Remote(NodeRecord),
    /// The owning peer is unhealthy; fail fast
    Unavailable(String),
}

/// Routing and membership over the shared metadata store.
pub struct ClusterRouter {
    meta: Arc<MetaStore>,
    /// This node's ID; empty until the cluster is initialized
    node_id: parking_lot::RwLock<Option<String>>,
}

impl ClusterRouter {
    pub fn new(meta: Arc<MetaStore>) -> Self {
        let node_id = meta
            .get("cluster:self")
            .ok()
            .flatten()
            .map(|v| String::from_utf8_lossy(&v).to_string());
        Self {
            meta,
            node_id: parking_lot::RwLock::new(node_id),
        }
    }

    /// This node's cluster ID, if clustering is initialized.
    pub fn self_id(&self) -> Option<String> {
        self.node_id.read().clone()
    }

    /// The shared node token, if clustering is initialized.
    pub fn node_token(&self) -> Result<Option<String>> {
        Ok(self
            .meta
            .get(keys::CLUSTER_TOKEN)
            .map_err(|e| Error::internal(e.to_string()))?
            .map(|v| String::from_utf8_lossy(&v).to_string()))
    }

    /// Initialize clustering on this node: mint the shared token and
    /// register the local node record. Idempotent.
    pub fn initialize(&self, name: &str, url: &str, console_url: &str) -> Result<NodeRecord> {
        if let Some(id) = self.self_id() {
            if let Some(existing) = self.get_node(&id)? {
                return Ok(existing);
            }
        }

        let token = {
            let mut raw = [0u8; 32];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut raw);
            hex::encode(raw)
        };
        let record = NodeRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            console_url: console_url.to_string(),
            status: NodeStatus::Healthy,
            consecutive_failures: 0,
            last_seen: now_secs(),
            added_at: now_secs(),
        };

        self.meta
            .batch(vec![
                maxiofs_meta::BatchOp::Put {
                    key: keys::CLUSTER_TOKEN.to_string(),
                    value: token.into_bytes(),
                },
                maxiofs_meta::BatchOp::Put {
                    key: "cluster:self".to_string(),
                    value: record.id.clone().into_bytes(),
                },
                maxiofs_meta::BatchOp::put_json(keys::cluster_node(&record.id), &record)
                    .map_err(|e| Error::internal(e.to_string()))?,
            ])
            .map_err(|e| Error::internal(e.to_string()))?;

        *self.node_id.write() = Some(record.id.clone());
        info!(node = %record.name, id = %record.id, "cluster initialized");
        Ok(record)
    }

    /// Register a peer node. The caller distributes the shared token to
    /// the peer out of band (the console add-node flow does this).
    pub fn add_node(&self, name: &str, url: &str, console_url: &str) -> Result<NodeRecord> {
        if self.node_token()?.is_none() {
            return Err(Error::invalid_request(
                "cluster is not initialized on this node",
            ));
        }
        let record = NodeRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            console_url: console_url.to_string(),
            status: NodeStatus::Healthy,
            consecutive_failures: 0,
            last_seen: now_secs(),
            added_at: now_secs(),
        };
        self.put_node(&record)?;
        info!(node = %record.name, id = %record.id, url = %record.url, "node added");
        Ok(record)
    }

    /// Adopt membership state pushed from a peer (the join flow).
    pub fn join(&self, token: &str, self_record: NodeRecord) -> Result<()> {
        self.meta
            .batch(vec![
                maxiofs_meta::BatchOp::Put {
                    key: keys::CLUSTER_TOKEN.to_string(),
                    value: token.to_string().into_bytes(),
                },
                maxiofs_meta::BatchOp::Put {
                    key: "cluster:self".to_string(),
                    value: self_record.id.clone().into_bytes(),
                },
                maxiofs_meta::BatchOp::put_json(keys::cluster_node(&self_record.id), &self_record)
                    .map_err(|e| Error::internal(e.to_string()))?,
            ])
            .map_err(|e| Error::internal(e.to_string()))?;
        *self.node_id.write() = Some(self_record.id);
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>> {
        self.meta
            .get_json(&keys::cluster_node(node_id))
            .map_err(|e| Error::internal(e.to_string()))
    }

    pub fn put_node(&self, record: &NodeRecord) -> Result<()> {
        self.meta
            .put_json(&keys::cluster_node(&record.id), record)
            .map_err(|e| Error::internal(e.to_string()))
    }

    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        self.meta
            .delete(&keys::cluster_node(node_id))
            .map_err(|e| Error::internal(e.to_string()))
    }

    pub fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let entries = self
            .meta
            .scan(keys::CLUSTER_NODE_ALL, None, usize::MAX)
            .map_err(|e| Error::internal(e.to_string()))?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode().map_err(|e| Error::internal(e.to_string()))?);
        }
        Ok(out)
    }

    // ── Bucket placement ──────────────────────────────────────────────────

    /// Record that `bucket` is owned by `node_id`.
    pub fn set_bucket_location(&self, bucket: &str, node_id: &str) -> Result<()> {
        self.meta
            .put(&keys::cluster_location(bucket), node_id.as_bytes())
            .map_err(|e| Error::internal(e.to_string()))
    }

    pub fn remove_bucket_location(&self, bucket: &str) -> Result<()> {
        self.meta
            .delete(&keys::cluster_location(bucket))
            .map_err(|e| Error::internal(e.to_string()))
    }

    /// All recorded bucket locations as `(bucket, node_id)` pairs.
    pub fn bucket_locations(&self) -> Result<Vec<(String, String)>> {
        let entries = self
            .meta
            .scan(keys::CLUSTER_LOCATION_ALL, None, usize::MAX)
            .map_err(|e| Error::internal(e.to_string()))?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let bucket = e
                    .key
                    .strip_prefix(keys::CLUSTER_LOCATION_ALL)
                    .unwrap_or(&e.key)
                    .to_string();
                (bucket, String::from_utf8_lossy(&e.value).to_string())
            })
            .collect())
    }

    /// Decide where a request for `bucket` should go.
    pub fn placement(&self, bucket: &str) -> Result<Placement> {
        let Some(owner) = self
            .meta
            .get(&keys::cluster_location(bucket))
            .map_err(|e| Error::internal(e.to_string()))?
        else {
            return Ok(Placement::Local);
        };
        let owner = String::from_utf8_lossy(&owner).to_string();

        if Some(owner.as_str()) == self.self_id().as_deref() {
            return Ok(Placement::Local);
        }
        match self.get_node(&owner)? {
            Some(node) if node.is_healthy() => Ok(Placement::Remote(node)),
            Some(node) => Ok(Placement::Unavailable(node.name)),
            // Unknown owner: serve locally rather than failing
            None => Ok(Placement::Local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> (tempfile::TempDir, ClusterRouter) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        (dir, ClusterRouter::new(meta))
    }

    #[test]
    fn test_initialize_idempotent() {
        let (_dir, router) = router();
        let first = router
            .initialize("node-a", "http://a:8080", "http://a:8081")
            .unwrap();
        let again = router
            .initialize("node-a", "http://a:8080", "http://a:8081")
            .unwrap();
        assert_eq!(first.id, again.id);
        assert!(router.node_token().unwrap().is_some());
    }

    #[test]
    fn test_add_node_requires_init() {
        let (_dir, router) = router();
        assert!(router.add_node("b", "http://b", "http://b2").is_err());
        router.initialize("a", "http://a", "http://a2").unwrap();
        let node = router.add_node("b", "http://b", "http://b2").unwrap();
        assert_eq!(router.list_nodes().unwrap().len(), 2);
        assert!(router.get_node(&node.id).unwrap().is_some());
    }

    #[test]
    fn test_placement_local_by_default() {
        let (_dir, router) = router();
        router.initialize("a", "http://a", "http://a2").unwrap();
        assert!(matches!(router.placement("b").unwrap(), Placement::Local));
    }

    #[test]
    fn test_placement_remote_and_unavailable() {
        let (_dir, router) = router();
        router.initialize("a", "http://a", "http://a2").unwrap();
        let mut peer = router.add_node("b", "http://b", "http://b2").unwrap();

        router.set_bucket_location("bkt", &peer.id).unwrap();
        assert!(matches!(
            router.placement("bkt").unwrap(),
            Placement::Remote(_)
        ));

        peer.status = NodeStatus::Unhealthy;
        router.put_node(&peer).unwrap();
        assert!(matches!(
            router.placement("bkt").unwrap(),
            Placement::Unavailable(_)
        ));
    }

    #[test]
    fn test_placement_self_owned_is_local() {
        let (_dir, router) = router();
        let me = router.initialize("a", "http://a", "http://a2").unwrap();
        router.set_bucket_location("mine", &me.id).unwrap();
        assert!(matches!(router.placement("mine").unwrap(), Placement::Local));
    }
}
