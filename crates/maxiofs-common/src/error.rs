//! Error types for MaxIOFS
//!
//! This module defines the common error type used throughout the system.
//! Every variant maps to an HTTP status and an S3 error code so handlers
//! can translate failures into the AWS error envelope without matching on
//! variants themselves.

use crate::types::{BucketNameError, ObjectKeyError};
use thiserror::Error;

/// Common result type for MaxIOFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for MaxIOFS
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    #[error("storage error: {0}")]
    Storage(String),

    // Metadata errors
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("version not found: {bucket}/{key} ({version_id})")]
    VersionNotFound {
        bucket: String,
        key: String,
        version_id: String,
    },

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(#[from] ObjectKeyError),

    // Identity errors
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    // S3 API errors
    #[error("access denied")]
    AccessDenied,

    #[error("invalid access key")]
    InvalidAccessKey,

    #[error("signature mismatch")]
    SignatureDoesNotMatch,

    #[error("request time too skewed")]
    RequestTimeTooSkewed,

    #[error("content MD5 does not match: expected {expected}, got {actual}")]
    BadDigest { expected: String, actual: String },

    #[error("object is locked: {0}")]
    ObjectLocked(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("entity too large: max {max_size} bytes")]
    EntityTooLarge { max_size: u64 },

    #[error("malformed XML body")]
    MalformedXml,

    // Multipart upload errors
    #[error("no such upload: {upload_id}")]
    NoSuchUpload { upload_id: String },

    #[error("invalid part: {part_number}")]
    InvalidPart { part_number: u32 },

    #[error("invalid part order")]
    InvalidPartOrder,

    // Versioning / lock configuration errors
    #[error("invalid versioning transition: {0}")]
    InvalidVersioningTransition(String),

    #[error("object lock configuration not found on bucket: {0}")]
    ObjectLockNotEnabled(String),

    // Network/RPC errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Check if this is a retryable (transient) error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::ServiceUnavailable(_) | Self::ConnectionFailed(_) => true,
            Self::DiskIo(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketNotFound(_)
                | Self::ObjectNotFound { .. }
                | Self::VersionNotFound { .. }
                | Self::BlobNotFound(_)
                | Self::NoSuchUpload { .. }
                | Self::TenantNotFound(_)
                | Self::UserNotFound(_)
        )
    }

    /// Get HTTP status code for S3 API compatibility
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidRequest(_)
            | Self::InvalidArgument(_)
            | Self::InvalidBucketName(_)
            | Self::InvalidObjectKey(_)
            | Self::InvalidPart { .. }
            | Self::InvalidPartOrder
            | Self::BadDigest { .. }
            | Self::MalformedXml
            | Self::InvalidVersioningTransition(_)
            | Self::ObjectLockNotEnabled(_) => 400,

            // 403 Forbidden
            Self::AccessDenied
            | Self::InvalidAccessKey
            | Self::SignatureDoesNotMatch
            | Self::RequestTimeTooSkewed
            | Self::QuotaExceeded(_)
            | Self::ObjectLocked(_) => 403,

            // 404 Not Found
            Self::BucketNotFound(_)
            | Self::ObjectNotFound { .. }
            | Self::VersionNotFound { .. }
            | Self::BlobNotFound(_)
            | Self::NoSuchUpload { .. }
            | Self::TenantNotFound(_)
            | Self::UserNotFound(_) => 404,

            // 405 Method Not Allowed
            Self::MethodNotAllowed(_) => 405,

            // 409 Conflict
            Self::BucketAlreadyExists(_) | Self::BucketNotEmpty(_) => 409,

            // 412 Precondition Failed
            Self::PreconditionFailed(_) => 412,

            // 413 Payload Too Large
            Self::EntityTooLarge { .. } => 413,

            // 416 Range Not Satisfiable
            Self::InvalidRange(_) => 416,

            // 500 Internal Server Error
            Self::Internal(_)
            | Self::DiskIo(_)
            | Self::DataCorruption(_)
            | Self::ChecksumMismatch { .. }
            | Self::Storage(_)
            | Self::Serialization(_) => 500,

            // 501 Not Implemented
            Self::NotImplemented(_) => 501,

            // 503 Service Unavailable
            Self::ServiceUnavailable(_)
            | Self::Timeout
            | Self::ConnectionFailed(_)
            | Self::Configuration(_) => 503,
        }
    }

    /// Get S3 error code for API compatibility
    #[must_use]
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::InvalidAccessKey => "InvalidAccessKeyId",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::VersionNotFound { .. } => "NoSuchVersion",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidRequest(_) | Self::InvalidArgument(_) => "InvalidArgument",
            Self::InvalidRange(_) => "InvalidRange",
            Self::EntityTooLarge { .. } => "EntityTooLarge",
            Self::BadDigest { .. } => "BadDigest",
            Self::ObjectLocked(_) => "ObjectLocked",
            Self::QuotaExceeded(_) => "QuotaExceeded",
            Self::MalformedXml => "MalformedXML",
            Self::MethodNotAllowed(_) => "MethodNotAllowed",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidVersioningTransition(_) => "InvalidBucketState",
            Self::ObjectLockNotEnabled(_) => "ObjectLockConfigurationNotFoundError",
            Self::NotImplemented(_) => "NotImplemented",
            Self::ServiceUnavailable(_) | Self::Timeout | Self::ConnectionFailed(_) => {
                "ServiceUnavailable"
            }
            _ => "InternalError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::ServiceUnavailable("test".into()).is_retryable());
        assert!(!Error::AccessDenied.is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::BucketNotFound("test".into()).is_not_found());
        assert!(Error::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into()
        }
        .is_not_found());
        assert!(!Error::AccessDenied.is_not_found());
    }

    #[test]
    fn test_error_http_status() {
        assert_eq!(Error::AccessDenied.http_status_code(), 403);
        assert_eq!(Error::BucketNotFound("test".into()).http_status_code(), 404);
        assert_eq!(Error::BucketNotEmpty("test".into()).http_status_code(), 409);
        assert_eq!(
            Error::InvalidRange("bytes=9-".into()).http_status_code(),
            416
        );
        assert_eq!(Error::Internal("test".into()).http_status_code(), 500);
    }

    #[test]
    fn test_s3_codes() {
        assert_eq!(Error::QuotaExceeded("t".into()).s3_error_code(), "QuotaExceeded");
        assert_eq!(
            Error::ObjectLocked("k".into()).s3_error_code(),
            "ObjectLocked"
        );
        assert_eq!(
            Error::BadDigest {
                expected: "a".into(),
                actual: "b".into()
            }
            .s3_error_code(),
            "BadDigest"
        );
    }
}
