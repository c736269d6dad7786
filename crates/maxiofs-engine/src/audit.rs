//! Audit log entries.
//!
//! Authorization denials and console mutations append durable
//! `audit:{ts}:{seq}` records that the console API lists.

use serde::{Deserialize, Serialize};

use crate::bucket::meta_err;
use crate::Engine;
use maxiofs_common::{now_secs, Result};
use maxiofs_meta::keys;

/// One audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Acting user ID, or "anonymous"
    pub user_id: String,
    pub username: String,
    /// Action name, e.g. `s3:DeleteObject` or `console:CreateUser`
    pub action: String,
    /// Affected resource
    pub resource: String,
    /// "allowed" or "denied"
    pub outcome: String,
    pub source_ip: Option<String>,
    pub timestamp: u64,
}

impl Engine {
    /// Append an audit entry.
    pub fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.meta
            .put_json(&keys::audit(entry.timestamp, self.next_seq()), entry)
            .map_err(meta_err)
    }

    /// Convenience constructor + append.
    pub fn audit(
        &self,
        user_id: &str,
        username: &str,
        action: &str,
        resource: &str,
        allowed: bool,
        source_ip: Option<String>,
    ) -> Result<()> {
        self.record_audit(&AuditEntry {
            user_id: user_id.to_string(),
            username: username.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            outcome: if allowed { "allowed" } else { "denied" }.to_string(),
            source_ip,
            timestamp: now_secs(),
        })
    }

    /// Most recent audit entries, newest last.
    pub fn list_audit(&self, start_after: Option<&str>, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries = self
            .meta
            .scan(keys::AUDIT_ALL, start_after, limit)
            .map_err(meta_err)?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            out.push(e.decode().map_err(meta_err)?);
        }
        Ok(out)
    }
}
