//! Node health probing.
//!
//! Probes every peer's `/health` endpoint on an interval. Three
//! consecutive failures mark the node unhealthy (the router then
//! refuses to forward to it); a single success marks it healthy again.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::router::{ClusterRouter, NodeStatus};

/// Periodic health prober for cluster peers.
pub struct HealthChecker {
    router: Arc<ClusterRouter>,
    http: reqwest::Client,
    interval: Duration,
    failure_threshold: u32,
}

impl HealthChecker {
    pub fn new(router: Arc<ClusterRouter>, interval: Duration, failure_threshold: u32) -> Self {
        Self {
            router,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .unwrap_or_default(),
            interval,
            failure_threshold,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "health checker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("health checker stopping");
                        return;
                    }
                }
            }
            self.probe_all().await;
        }
    }

    /// One probe pass over every peer.
    pub async fn probe_all(&self) {
        let self_id = self.router.self_id();
        let nodes = match self.router.list_nodes() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to list nodes for health probe");
                return;
            }
        };

        for mut node in nodes {
            if Some(node.id.as_str()) == self_id.as_deref() {
                continue;
            }
            let url = format!("{}/health", node.url.trim_end_matches('/'));
            let healthy = matches!(
                self.http.get(&url).send().await,
                Ok(resp) if resp.status().is_success()
            );

            if healthy {
                node.consecutive_failures = 0;
                node.last_seen = maxiofs_common::now_secs();
                if node.status != NodeStatus::Healthy {
                    info!(node = %node.name, "node recovered");
                    node.status = NodeStatus::Healthy;
                }
            } else {
                node.consecutive_failures += 1;
                debug!(node = %node.name, failures = node.consecutive_failures, "health probe failed");
                if node.consecutive_failures >= self.failure_threshold
                    && node.status != NodeStatus::Unhealthy
                {
                    warn!(node = %node.name, "node marked unhealthy");
                    node.status = NodeStatus::Unhealthy;
                }
            }
            if let Err(e) = self.router.put_node(&node) {
                warn!(node = %node.name, error = %e, "failed to persist node status");
            }
        }
    }
}
