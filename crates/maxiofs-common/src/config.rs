//! Configuration types for MaxIOFS
//!
//! Configuration is layered: built-in defaults, then the YAML file
//! (`/etc/maxiofs/config.yaml` unless overridden on the command line),
//! then `MAXIOFS_*` environment variables with `__` as the section
//! separator (e.g. `MAXIOFS_S3__LISTEN=0.0.0.0:9999`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Root configuration for MaxIOFS
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node identity
    pub node: NodeConfig,
    /// S3 API configuration
    pub s3: S3Config,
    /// Console API configuration
    pub console: ConsoleConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Cluster configuration
    pub cluster: ClusterConfig,
    /// Background worker configuration
    pub workers: WorkerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    pub name: String,
    /// Root data directory; metadata/ and objects/ live below it
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "maxiofs-node".to_string(),
            data_dir: PathBuf::from("/var/lib/maxiofs"),
        }
    }
}

/// S3 API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Listen address for the S3 data plane
    pub listen: SocketAddr,
    /// Region name returned in responses and used in SigV4 scope
    pub region: String,
    /// Maximum single-part object size
    pub max_object_size: u64,
    /// Maximum part size for multipart upload
    pub max_part_size: u64,
    /// Maximum number of parts per upload
    pub max_parts: u32,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".parse().unwrap(),
            region: "us-east-1".to_string(),
            max_object_size: 5 * 1024 * 1024 * 1024, // 5 GiB
            max_part_size: 5 * 1024 * 1024 * 1024,   // 5 GiB
            max_parts: 10_000,
        }
    }
}

/// Console API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Listen address for the management API
    pub listen: SocketAddr,
    /// JWT session lifetime in seconds
    pub session_ttl_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8081".parse().unwrap(),
            session_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Apply zstd compression to object data before encryption
    pub compression: bool,
    /// zstd compression level (1-19)
    pub compression_level: i32,
    /// Encrypt object data at rest (AES-256-GCM, per-object DEKs)
    pub encryption: bool,
    /// Hex-encoded 256-bit master key used to wrap per-object DEKs and
    /// to encrypt stored access-key secrets
    pub master_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: false,
            compression_level: 3,
            encryption: false,
            master_key: String::new(),
        }
    }
}

/// Cluster configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// URL other nodes use to reach this node's S3 endpoint
    pub advertise_url: String,
    /// Health probe interval in seconds
    pub health_interval_secs: u64,
    /// Consecutive probe failures before a node is marked unhealthy
    pub health_failure_threshold: u32,
    /// Inter-node RPC timeout in seconds
    pub rpc_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            advertise_url: String::new(),
            health_interval_secs: 5,
            health_failure_threshold: 3,
            rpc_timeout_secs: 30,
        }
    }
}

/// Background worker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Lifecycle enforcement interval in seconds
    pub lifecycle_interval_secs: u64,
    /// Maximum object versions scanned per bucket per lifecycle cycle
    pub lifecycle_scan_limit: usize,
    /// Replication queue poll interval in seconds
    pub replication_interval_secs: u64,
    /// Age after which incomplete multipart uploads are garbage-collected
    pub multipart_expiry_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lifecycle_interval_secs: 60 * 60,
            lifecycle_scan_limit: 10_000,
            replication_interval_secs: 10,
            multipart_expiry_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Authentication configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Username for the bootstrap global admin (created on first start)
    pub admin_user: String,
    /// Password for the bootstrap global admin
    pub admin_password: String,
    /// Hex-encoded secret for signing console JWTs; derived from the
    /// master key when empty
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_user: "admin".to_string(),
            admin_password: String::new(),
            jwt_secret: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file plus `MAXIOFS_*` environment
    /// overrides. A missing file is not an error; defaults apply.
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("MAXIOFS").separator("__"));

        let cfg: Self = builder
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.storage.encryption {
            let key = hex::decode(&self.storage.master_key)
                .map_err(|_| Error::Configuration("storage.master_key is not valid hex".into()))?;
            if key.len() != 32 {
                return Err(Error::Configuration(
                    "storage.master_key must be 32 bytes (64 hex characters)".into(),
                ));
            }
        }
        if !(1..=19).contains(&self.storage.compression_level) {
            return Err(Error::Configuration(
                "storage.compression_level must be between 1 and 19".into(),
            ));
        }
        if self.s3.listen == self.console.listen {
            return Err(Error::Configuration(
                "s3.listen and console.listen must differ".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding the ordered metadata store
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.node.data_dir.join("metadata")
    }

    /// Directory holding the blob tree
    #[must_use]
    pub fn objects_dir(&self) -> PathBuf {
        self.node.data_dir.join("objects")
    }

    /// Master key bytes, or `None` when encryption is disabled
    #[must_use]
    pub fn master_key_bytes(&self) -> Option<[u8; 32]> {
        if !self.storage.encryption {
            return None;
        }
        let decoded = hex::decode(&self.storage.master_key).ok()?;
        decoded.try_into().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.node.name, "maxiofs-node");
        assert_eq!(config.s3.listen.port(), 8080);
        assert_eq!(config.console.listen.port(), 8081);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_encryption_requires_master_key() {
        let mut config = Config::default();
        config.storage.encryption = true;
        assert!(config.validate().is_err());

        config.storage.master_key = "ab".repeat(32);
        assert!(config.validate().is_ok());
        assert!(config.master_key_bytes().is_some());
    }

    #[test]
    fn test_listen_addresses_must_differ() {
        let mut config = Config::default();
        config.console.listen = config.s3.listen;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config.s3.region, "us-east-1");
    }
}
