//! Replication transport to peer nodes.
//!
//! Implements the engine's [`NodeShipper`] over the HMAC-signed
//! internal ingest endpoints exposed by every node's console listener.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use crate::router::ClusterRouter;
use crate::rpc::{self, sign_rpc_hashed};
use maxiofs_blob::ByteStream;
use maxiofs_common::{Error, Result};
use maxiofs_engine::replication::NodeShipper;

/// Ships replicated objects to peer nodes.
pub struct ClusterShipper {
    router: Arc<ClusterRouter>,
    http: reqwest::Client,
}

impl ClusterShipper {
    pub fn new(router: Arc<ClusterRouter>) -> Self {
        Self {
            router,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn endpoint(&self, node_id: &str, path: &str) -> Result<String> {
        let node = self
            .router
            .get_node(node_id)?
            .ok_or_else(|| Error::ConnectionFailed(format!("unknown node {node_id}")))?;
        if !node.is_healthy() {
            return Err(Error::ServiceUnavailable(format!(
                "node {} is unhealthy",
                node.name
            )));
        }
        Ok(format!("{}{path}", node.console_url.trim_end_matches('/')))
    }

    fn token(&self) -> Result<String> {
        self.router
            .node_token()?
            .ok_or_else(|| Error::internal("cluster not initialized"))
    }
}

#[async_trait]
impl NodeShipper for ClusterShipper {
    async fn replicate_put(
        &self,
        node_id: &str,
        bucket: &str,
        key: &str,
        version_id: &str,
        content_type: &str,
        body: ByteStream,
    ) -> Result<()> {
        let path = format!(
            "/api/v1/cluster/internal/replicate?bucket={bucket}&key={}&versionId={version_id}",
            urlencode(key)
        );
        let url = self.endpoint(node_id, &path)?;
        // Streamed body: the signature covers UNSIGNED-PAYLOAD in place
        // of a body hash
        let sig = sign_rpc_hashed(&self.token()?, "POST", &path, "UNSIGNED-PAYLOAD");

        let stream = body.map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });
        let resp = self
            .http
            .post(&url)
            .header(rpc::HDR_TIMESTAMP, sig.timestamp)
            .header(rpc::HDR_BODY_SHA256, &sig.body_sha256)
            .header(rpc::HDR_SIGNATURE, &sig.signature)
            .header("content-type", content_type)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::ConnectionFailed(format!(
                "replicate ingest returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn replicate_delete(
        &self,
        node_id: &str,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<()> {
        let path = format!(
            "/api/v1/cluster/internal/replicate?bucket={bucket}&key={}&versionId={version_id}&delete=true",
            urlencode(key)
        );
        let url = self.endpoint(node_id, &path)?;
        let sig = sign_rpc_hashed(&self.token()?, "DELETE", &path, "UNSIGNED-PAYLOAD");

        let resp = self
            .http
            .delete(&url)
            .header(rpc::HDR_TIMESTAMP, sig.timestamp)
            .header(rpc::HDR_BODY_SHA256, &sig.body_sha256)
            .header(rpc::HDR_SIGNATURE, &sig.signature)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(Error::ConnectionFailed(format!(
                "replicate delete returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
