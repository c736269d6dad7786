//! Authentication error types

use thiserror::Error;

/// Authentication and authorization errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("unsupported signature version")]
    InvalidSignatureVersion,

    #[error("invalid credential format")]
    InvalidCredentialFormat,

    #[error("access key not found: {0}")]
    AccessKeyNotFound(String),

    #[error("access key is inactive")]
    AccessKeyInactive,

    #[error("user is suspended")]
    UserSuspended,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("request has expired")]
    RequestExpired,

    #[error("presigned URL expiry exceeds the 7 day maximum")]
    ExpiresTooLarge,

    #[error("missing required signed header: {0}")]
    MissingSignedHeader(String),

    #[error("invalid date format")]
    InvalidDateFormat,

    #[error("missing x-amz-date or date header")]
    MissingDateHeader,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked until {0}")]
    AccountLocked(u64),

    #[error("too many login attempts")]
    TooManyAttempts,

    #[error("MFA code required")]
    MfaRequired,

    #[error("invalid MFA code")]
    InvalidMfaCode,

    #[error("invalid or expired session token")]
    InvalidSession,

    #[error("access denied")]
    AccessDenied,

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant already exists: {0}")]
    TenantAlreadyExists(String),

    #[error("tenant has active resources: {0}")]
    TenantNotEmpty(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    UserAlreadyExists(String),

    #[error("access key quota exceeded for tenant {0}")]
    AccessKeyQuota(String),

    #[error("metadata error: {0}")]
    Meta(#[from] maxiofs_meta::MetaError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AuthError> for maxiofs_common::Error {
    fn from(e: AuthError) -> Self {
        use maxiofs_common::Error;
        match e {
            AuthError::SignatureMismatch => Error::SignatureDoesNotMatch,
            AuthError::RequestExpired => Error::RequestTimeTooSkewed,
            AuthError::AccessKeyNotFound(_) | AuthError::AccessKeyInactive => {
                Error::InvalidAccessKey
            }
            AuthError::TenantNotFound(t) => Error::TenantNotFound(t),
            AuthError::UserNotFound(u) => Error::UserNotFound(u),
            AuthError::AccessKeyQuota(t) => Error::QuotaExceeded(t),
            AuthError::Internal(m) => Error::Internal(m),
            AuthError::Meta(m) => Error::Internal(m.to_string()),
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidSignatureVersion
            | AuthError::InvalidCredentialFormat
            | AuthError::ExpiresTooLarge
            | AuthError::MissingSignedHeader(_)
            | AuthError::InvalidDateFormat
            | AuthError::MissingDateHeader => Error::InvalidRequest(e.to_string()),
            _ => Error::AccessDenied,
        }
    }
}
