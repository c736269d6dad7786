//! Core domain types shared across MaxIOFS components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time as Unix epoch seconds.
#[must_use]
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Validated bucket name
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name (validates S3 naming rules)
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the bucket name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate bucket name according to S3 rules
    fn validate(name: &str) -> Result<(), BucketNameError> {
        // Length check: 3-63 characters
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        // Must start with lowercase letter or number
        let first = name.chars().next().unwrap();
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(BucketNameError::InvalidStartChar);
        }

        // Must end with lowercase letter or number
        let last = name.chars().last().unwrap();
        if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
            return Err(BucketNameError::InvalidEndChar);
        }

        // Only lowercase letters, numbers, hyphens, and periods allowed
        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
                return Err(BucketNameError::InvalidChar(c));
            }
        }

        // No consecutive periods
        if name.contains("..") {
            return Err(BucketNameError::ConsecutivePeriods);
        }

        // Cannot be formatted as IP address
        if name.parse::<std::net::Ipv4Addr>().is_ok() {
            return Err(BucketNameError::LooksLikeIpAddress);
        }

        Ok(())
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating a bucket name
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name must start with a lowercase letter or number")]
    InvalidStartChar,
    #[error("bucket name must end with a lowercase letter or number")]
    InvalidEndChar,
    #[error("bucket name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("bucket name cannot contain consecutive periods")]
    ConsecutivePeriods,
    #[error("bucket name cannot be formatted as an IP address")]
    LooksLikeIpAddress,
}

/// Object key (path within a bucket)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new object key
    pub fn new(key: impl Into<String>) -> Result<Self, ObjectKeyError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the object key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate object key
    fn validate(key: &str) -> Result<(), ObjectKeyError> {
        // Maximum length: 1024 bytes (UTF-8)
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }

        // Cannot be empty
        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }

        // The NUL byte is the version separator in the metadata keyspace
        if key.contains('\0') {
            return Err(ObjectKeyError::NulByte);
        }

        Ok(())
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating an object key
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectKeyError {
    #[error("object key cannot be empty")]
    Empty,
    #[error("object key cannot exceed 1024 bytes")]
    TooLong,
    #[error("object key cannot contain a NUL byte")]
    NulByte,
}

/// Sentinel version ID for objects written while versioning is off or
/// suspended. Matches the S3 wire value.
pub const NULL_VERSION_ID: &str = "null";

/// Generate a random version ID (32 hex characters).
#[must_use]
pub fn generate_version_id() -> String {
    let mut bytes = [0u8; 16];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

/// Per-bucket versioning state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningState {
    /// Versioning has never been enabled on this bucket
    #[default]
    Unversioned,
    /// Every PUT creates a new version
    Enabled,
    /// New PUTs overwrite the "null" version; old versions are retained
    Suspended,
}

impl VersioningState {
    /// Check whether a transition to `next` is legal. Buckets can move
    /// between Enabled and Suspended but never back to Unversioned.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Unversioned) => self == Self::Unversioned,
            (Self::Unversioned, Self::Enabled) => true,
            (Self::Unversioned, Self::Suspended) => false,
            (Self::Enabled, _) | (Self::Suspended, _) => true,
        }
    }
}

/// Object Lock retention mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectLockMode {
    /// Bypassable with s3:BypassGovernanceRetention
    Governance,
    /// Not bypassable by anyone until retain_until passes
    Compliance,
}

impl ObjectLockMode {
    /// Parse from the S3 wire value ("GOVERNANCE" / "COMPLIANCE")
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOVERNANCE" => Some(Self::Governance),
            "COMPLIANCE" => Some(Self::Compliance),
            _ => None,
        }
    }

    /// S3 wire value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Governance => "GOVERNANCE",
            Self::Compliance => "COMPLIANCE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_valid() {
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("abc").is_ok());
        assert!(BucketName::new("a.b.c").is_ok());
    }

    #[test]
    fn test_bucket_name_invalid() {
        assert!(matches!(
            BucketName::new("ab"),
            Err(BucketNameError::TooShort)
        ));
        assert!(matches!(
            BucketName::new("My-Bucket"),
            Err(BucketNameError::InvalidChar('M')) | Err(BucketNameError::InvalidStartChar)
        ));
        assert!(matches!(
            BucketName::new("a..b"),
            Err(BucketNameError::ConsecutivePeriods)
        ));
        assert!(matches!(
            BucketName::new("192.168.1.1"),
            Err(BucketNameError::LooksLikeIpAddress)
        ));
        assert!(matches!(
            BucketName::new("-abc"),
            Err(BucketNameError::InvalidStartChar)
        ));
    }

    #[test]
    fn test_object_key() {
        assert!(ObjectKey::new("path/to/file.txt").is_ok());
        assert!(matches!(ObjectKey::new(""), Err(ObjectKeyError::Empty)));
        assert!(matches!(
            ObjectKey::new("a\0b"),
            Err(ObjectKeyError::NulByte)
        ));
        assert!(matches!(
            ObjectKey::new("x".repeat(1025)),
            Err(ObjectKeyError::TooLong)
        ));
    }

    #[test]
    fn test_version_id_generation() {
        let v = generate_version_id();
        assert_eq!(v.len(), 32);
        assert!(v.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(v, generate_version_id());
    }

    #[test]
    fn test_versioning_transitions() {
        use VersioningState::*;
        assert!(Unversioned.can_transition_to(Enabled));
        assert!(Enabled.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Enabled));
        assert!(!Enabled.can_transition_to(Unversioned));
        assert!(!Suspended.can_transition_to(Unversioned));
        assert!(!Unversioned.can_transition_to(Suspended));
    }
}
