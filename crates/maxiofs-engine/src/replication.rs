//! Best-effort cross-node / cross-bucket replication.
//!
//! Object mutations enqueue durable tasks in the same batch as the
//! mutation itself (`repl:task:{rule}:{ts}:{seq}`). The worker drains
//! each rule's queue in order: at-least-once delivery, exponential
//! backoff on failure, and a blocked queue head stalls the rest of that
//! rule's queue so per-rule ordering holds. No ordering is promised
//! across rules.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bucket::meta_err;
use crate::types::{ReplicationDestination, ReplicationOp, ReplicationRule, ReplicationTask};
use crate::Engine;
use maxiofs_blob::ByteStream;
use maxiofs_common::{now_secs, Error, Result};
use maxiofs_meta::keys;

/// Backoff floor and ceiling for failed shipments
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 300;

/// Ships replication payloads to a peer cluster node. Implemented by
/// the cluster layer; injected so the engine stays transport-agnostic.
#[async_trait]
pub trait NodeShipper: Send + Sync {
    async fn replicate_put(
        &self,
        node_id: &str,
        bucket: &str,
        key: &str,
        version_id: &str,
        content_type: &str,
        body: ByteStream,
    ) -> Result<()>;

    async fn replicate_delete(
        &self,
        node_id: &str,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<()>;
}

impl Engine {
    // ── Rule CRUD ─────────────────────────────────────────────────────────

    pub fn replication_rules(&self) -> Result<Vec<ReplicationRule>> {
        let entries = self
            .meta
            .scan(keys::REPLICATION_RULE_ALL, None, usize::MAX)
            .map_err(meta_err)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode().map_err(meta_err)?);
        }
        Ok(out)
    }

    pub fn get_replication_rule(&self, rule_id: &str) -> Result<ReplicationRule> {
        self.meta
            .get_json(&keys::replication_rule(rule_id))
            .map_err(meta_err)?
            .ok_or_else(|| Error::invalid_argument(format!("no such replication rule: {rule_id}")))
    }

    pub fn put_replication_rule(&self, rule: &ReplicationRule) -> Result<()> {
        // The source bucket must exist locally
        self.resolve_bucket(&rule.source_bucket)?;
        self.meta
            .put_json(&keys::replication_rule(&rule.id), rule)
            .map_err(meta_err)
    }

    pub fn delete_replication_rule(&self, rule_id: &str) -> Result<()> {
        self.meta
            .delete(&keys::replication_rule(rule_id))
            .map_err(meta_err)?;
        // Pending tasks for the rule are dropped with it
        let tasks = self
            .meta
            .scan(&keys::replication_task_prefix(rule_id), None, usize::MAX)
            .map_err(meta_err)?;
        for t in tasks {
            self.meta.delete(&t.key).map_err(meta_err)?;
        }
        Ok(())
    }

    /// Pending queue depth across all rules (for metrics).
    pub fn replication_backlog(&self) -> Result<usize> {
        self.meta
            .count_prefix("repl:task:", usize::MAX)
            .map_err(meta_err)
    }

    /// Unseal an external destination secret.
    pub(crate) fn unseal_secret(&self, sealed: &str) -> Result<String> {
        match &self.master_key {
            Some(master) => {
                let plain = master.open_secret(sealed)?;
                Ok(String::from_utf8_lossy(&plain).to_string())
            }
            None => Ok(sealed.to_string()),
        }
    }

    /// Seal a secret for storage in a replication rule.
    pub fn seal_rule_secret(&self, secret: &str) -> Result<String> {
        match &self.master_key {
            Some(master) => master.seal_secret(secret.as_bytes()),
            None => Ok(secret.to_string()),
        }
    }
}

/// Drains replication queues on an interval.
pub struct ReplicationWorker {
    engine: Arc<Engine>,
    http: reqwest::Client,
    shipper: Option<Arc<dyn NodeShipper>>,
    interval: Duration,
}

impl ReplicationWorker {
    pub fn new(
        engine: Arc<Engine>,
        shipper: Option<Arc<dyn NodeShipper>>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            http: reqwest::Client::new(),
            shipper,
            interval,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "replication worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("replication worker stopping");
                        return;
                    }
                }
            }
            if let Err(e) = self.drain_once(&mut shutdown).await {
                warn!(error = %e, "replication cycle failed");
            }
        }
    }

    /// One pass over every rule's queue.
    pub async fn drain_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let rules = self.engine.replication_rules()?;
        for rule in rules.iter().filter(|r| r.enabled) {
            if *shutdown.borrow() {
                return Ok(());
            }
            self.drain_rule(rule).await?;
        }
        Ok(())
    }

    /// Process a rule's queue head-first; stop at the first task whose
    /// backoff has not elapsed so ordering is preserved.
    async fn drain_rule(&self, rule: &ReplicationRule) -> Result<()> {
        let prefix = keys::replication_task_prefix(&rule.id);
        loop {
            let batch = self
                .engine
                .meta
                .scan(&prefix, None, 32)
                .map_err(meta_err)?;
            if batch.is_empty() {
                return Ok(());
            }
            for entry in batch {
                let mut task: ReplicationTask = entry.decode().map_err(meta_err)?;
                if task.next_attempt_at > now_secs() {
                    return Ok(());
                }
                match self.ship(rule, &task).await {
                    Ok(()) => {
                        self.engine.meta.delete(&entry.key).map_err(meta_err)?;
                        self.engine
                            .stats
                            .replication_shipped
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(rule = %rule.id, key = %task.key, op = ?task.op, "replicated");
                    }
                    Err(e) => {
                        task.attempts += 1;
                        task.next_attempt_at = now_secs() + backoff_secs(task.attempts);
                        self.engine
                            .meta
                            .put_json(&entry.key, &task)
                            .map_err(meta_err)?;
                        self.engine
                            .stats
                            .replication_failed
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(rule = %rule.id, key = %task.key, attempts = task.attempts, error = %e, "replication attempt failed");
                        // Head of queue stays blocked; keep order
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn ship(&self, rule: &ReplicationRule, task: &ReplicationTask) -> Result<()> {
        match task.op {
            ReplicationOp::Put => self.ship_put(rule, task).await,
            ReplicationOp::Delete => self.ship_delete(rule, task).await,
        }
    }

    async fn ship_put(&self, rule: &ReplicationRule, task: &ReplicationTask) -> Result<()> {
        let bucket = match self.engine.resolve_bucket(&task.bucket) {
            Ok(b) => b,
            // Bucket removed since enqueue: drop the task
            Err(Error::BucketNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let version_ref = if task.version_id.is_empty() {
            None
        } else {
            Some(task.version_id.as_str())
        };
        let (record, body, _) = match self
            .engine
            .get_object(&bucket, &task.key, version_ref, None)
            .await
        {
            Ok(r) => r,
            // Version already expired or deleted: nothing to ship
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        match &rule.destination {
            ReplicationDestination::Node { node_id, bucket } => {
                let shipper = self
                    .shipper
                    .as_ref()
                    .ok_or_else(|| Error::internal("no node shipper configured"))?;
                shipper
                    .replicate_put(
                        node_id,
                        bucket,
                        &task.key,
                        &task.version_id,
                        &record.content_type,
                        body,
                    )
                    .await
            }
            ReplicationDestination::External {
                endpoint,
                region,
                bucket,
                access_key_id,
                secret_sealed,
            } => {
                let secret = self.engine.unseal_secret(secret_sealed)?;
                let url = maxiofs_auth::presign::presign_url(
                    "PUT",
                    endpoint,
                    region,
                    access_key_id,
                    &secret,
                    bucket,
                    &task.key,
                    Duration::from_secs(300),
                );
                let stream = body.map(|chunk| {
                    chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                });
                let resp = self
                    .http
                    .put(&url)
                    .header("content-type", record.content_type.clone())
                    .body(reqwest::Body::wrap_stream(stream))
                    .send()
                    .await
                    .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(Error::ConnectionFailed(format!(
                        "destination returned {}",
                        resp.status()
                    )));
                }
                Ok(())
            }
        }
    }

    async fn ship_delete(&self, rule: &ReplicationRule, task: &ReplicationTask) -> Result<()> {
        match &rule.destination {
            ReplicationDestination::Node { node_id, bucket } => {
                let shipper = self
                    .shipper
                    .as_ref()
                    .ok_or_else(|| Error::internal("no node shipper configured"))?;
                shipper
                    .replicate_delete(node_id, bucket, &task.key, &task.version_id)
                    .await
            }
            ReplicationDestination::External {
                endpoint,
                region,
                bucket,
                access_key_id,
                secret_sealed,
            } => {
                let secret = self.engine.unseal_secret(secret_sealed)?;
                let url = maxiofs_auth::presign::presign_url(
                    "DELETE",
                    endpoint,
                    region,
                    access_key_id,
                    &secret,
                    bucket,
                    &task.key,
                    Duration::from_secs(300),
                );
                let resp = self
                    .http
                    .delete(&url)
                    .send()
                    .await
                    .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
                if !resp.status().is_success() && resp.status().as_u16() != 404 {
                    return Err(Error::ConnectionFailed(format!(
                        "destination returned {}",
                        resp.status()
                    )));
                }
                Ok(())
            }
        }
    }
}

fn backoff_secs(attempts: u32) -> u64 {
    (BACKOFF_BASE_SECS << attempts.min(9)).min(BACKOFF_CAP_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        assert_eq!(backoff_secs(0), 1);
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(3), 8);
        assert_eq!(backoff_secs(9), 300);
        assert_eq!(backoff_secs(30), 300);
    }
}
