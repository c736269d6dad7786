//! Keyspace layout for the metadata store.
//!
//! The single ordered table is partitioned by string prefix. Object
//! version keys embed a NUL separator between the object key and the
//! version ID so that a prefix scan of `obj:{tenant}/{bucket}/` yields
//! all versions of a key grouped together, in order.
//!
//! ```text
//! bkt:{tenant}/{bucket}          bucket record
//! nameidx:{bucket}               global bucket-name claim -> tenant id
//! obj:{tenant}/{bucket}/{key}\x00{versionID}   object version record
//! mpu:{tenant}/{bucket}/{uploadID}             multipart upload record
//! mpp:{uploadID}/{partNumber:05}               part record
//! tnt:{tenantID}                 tenant record
//! usr:{userID}                   user record
//! unam:{username}                username -> user id
//! akey:{accessKeyID}             access key record
//! usage:{tenantID}:bytes|objects|buckets       i64 counters
//! cluster:node:{nodeID}          cluster node record
//! cluster:loc:{bucket}           bucket -> owning node id
//! cluster:token                  shared HMAC node token
//! repl:rule:{ruleID}             replication rule record
//! repl:task:{ruleID}:{ts:020}:{seq:06}         queued replication task
//! evt:{ts:020}:{seq:06}          queued webhook event
//! audit:{ts:020}:{seq:06}        audit log entry
//! ```

/// NUL separator between object key and version ID
pub const VERSION_SEP: char = '\x00';

pub fn bucket(tenant: &str, bucket: &str) -> String {
    format!("bkt:{tenant}/{bucket}")
}

/// Prefix for all of a tenant's bucket records
pub fn bucket_prefix(tenant: &str) -> String {
    format!("bkt:{tenant}/")
}

pub fn bucket_name_index(bucket: &str) -> String {
    format!("nameidx:{bucket}")
}

pub fn object_version(tenant: &str, bucket: &str, key: &str, version_id: &str) -> String {
    format!("obj:{tenant}/{bucket}/{key}{VERSION_SEP}{version_id}")
}

/// Prefix covering every version of one object key
pub fn object_key_prefix(tenant: &str, bucket: &str, key: &str) -> String {
    format!("obj:{tenant}/{bucket}/{key}{VERSION_SEP}")
}

/// Prefix covering every object version in a bucket, optionally narrowed
/// by a key prefix
pub fn object_prefix(tenant: &str, bucket: &str, key_prefix: &str) -> String {
    format!("obj:{tenant}/{bucket}/{key_prefix}")
}

/// Split an object version key back into `(key, version_id)`. The input
/// must carry the `object_prefix(tenant, bucket, "")` prefix.
pub fn split_object_version<'a>(full_key: &'a str, tenant: &str, bucket: &str) -> Option<(&'a str, &'a str)> {
    let prefix = format!("obj:{tenant}/{bucket}/");
    let rest = full_key.strip_prefix(prefix.as_str())?;
    let sep = rest.find(VERSION_SEP)?;
    Some((&rest[..sep], &rest[sep + 1..]))
}

pub fn multipart(tenant: &str, bucket: &str, upload_id: &str) -> String {
    format!("mpu:{tenant}/{bucket}/{upload_id}")
}

pub fn multipart_prefix(tenant: &str, bucket: &str) -> String {
    format!("mpu:{tenant}/{bucket}/")
}

/// All multipart uploads across tenants (stale-upload GC walks this)
pub const MULTIPART_ALL: &str = "mpu:";

pub fn part(upload_id: &str, part_number: u32) -> String {
    format!("mpp:{upload_id}/{part_number:05}")
}

pub fn part_prefix(upload_id: &str) -> String {
    format!("mpp:{upload_id}/")
}

pub fn tenant(tenant_id: &str) -> String {
    format!("tnt:{tenant_id}")
}

pub const TENANT_ALL: &str = "tnt:";

pub fn tenant_name_index(name: &str) -> String {
    format!("tnam:{name}")
}

pub fn user(user_id: &str) -> String {
    format!("usr:{user_id}")
}

pub const USER_ALL: &str = "usr:";

pub fn username_index(username: &str) -> String {
    format!("unam:{username}")
}

pub fn access_key(access_key_id: &str) -> String {
    format!("akey:{access_key_id}")
}

pub const ACCESS_KEY_ALL: &str = "akey:";

pub fn usage_bytes(tenant_id: &str) -> String {
    format!("usage:{tenant_id}:bytes")
}

pub fn usage_objects(tenant_id: &str) -> String {
    format!("usage:{tenant_id}:objects")
}

pub fn usage_buckets(tenant_id: &str) -> String {
    format!("usage:{tenant_id}:buckets")
}

pub fn bucket_stat_bytes(tenant_id: &str, bucket: &str) -> String {
    format!("bstat:{tenant_id}/{bucket}:bytes")
}

pub fn bucket_stat_objects(tenant_id: &str, bucket: &str) -> String {
    format!("bstat:{tenant_id}/{bucket}:objects")
}

pub fn cluster_node(node_id: &str) -> String {
    format!("cluster:node:{node_id}")
}

pub const CLUSTER_NODE_ALL: &str = "cluster:node:";

pub fn cluster_location(bucket: &str) -> String {
    format!("cluster:loc:{bucket}")
}

pub const CLUSTER_LOCATION_ALL: &str = "cluster:loc:";

pub const CLUSTER_TOKEN: &str = "cluster:token";

pub fn replication_rule(rule_id: &str) -> String {
    format!("repl:rule:{rule_id}")
}

pub const REPLICATION_RULE_ALL: &str = "repl:rule:";

pub fn replication_task(rule_id: &str, ts: u64, seq: u64) -> String {
    format!("repl:task:{rule_id}:{ts:020}:{seq:06}")
}

pub fn replication_task_prefix(rule_id: &str) -> String {
    format!("repl:task:{rule_id}:")
}

pub fn event(ts: u64, seq: u64) -> String {
    format!("evt:{ts:020}:{seq:06}")
}

pub const EVENT_ALL: &str = "evt:";

pub fn audit(ts: u64, seq: u64) -> String {
    format!("audit:{ts:020}:{seq:06}")
}

pub const AUDIT_ALL: &str = "audit:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_keys_group_under_object_key() {
        // "a" and "ab" share a prefix; the NUL separator must keep the
        // versions of "a" contiguous and ahead of "ab".
        let a_v1 = object_version("t", "b", "a", "v1");
        let a_v2 = object_version("t", "b", "a", "v2");
        let ab_v1 = object_version("t", "b", "ab", "v1");
        assert!(a_v1 < a_v2);
        assert!(a_v2 < ab_v1);
    }

    #[test]
    fn test_split_object_version() {
        let full = object_version("t", "b", "path/to/file", "abc123");
        let (key, version) = split_object_version(&full, "t", "b").unwrap();
        assert_eq!(key, "path/to/file");
        assert_eq!(version, "abc123");
    }

    #[test]
    fn test_task_keys_sort_by_time_then_seq() {
        let early = replication_task("r1", 100, 2);
        let later = replication_task("r1", 100, 10);
        let latest = replication_task("r1", 5000, 0);
        assert!(early < later);
        assert!(later < latest);
    }
}
