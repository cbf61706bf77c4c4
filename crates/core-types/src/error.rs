use thiserror::Error;

/// Result code integers understood by the transport layer.
pub type ResultCode = i32;

/// Error taxonomy surfaced to callers through their result callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppSearchError {
    /// Identity mismatch, instant app caller or missing cross-user permission.
    #[error("security error: {0}")]
    Security(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Blocked by the denylist. A policy decision, not an identity failure.
    #[error("denied: {0}")]
    Denied(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
    /// Target user is not unlocked or is being torn down.
    #[error("user locked: {0}")]
    Locked(String),
}

pub type AppSearchResult<T> = Result<T, AppSearchError>;

impl AppSearchError {
    pub const RESULT_OK: ResultCode = 0;
    pub const RESULT_INTERNAL_ERROR: ResultCode = 2;
    pub const RESULT_INVALID_ARGUMENT: ResultCode = 3;
    pub const RESULT_NOT_FOUND: ResultCode = 6;
    pub const RESULT_SECURITY_ERROR: ResultCode = 8;
    pub const RESULT_DENIED: ResultCode = 9;
    pub const RESULT_RATE_LIMITED: ResultCode = 10;

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::Locked(message.into())
    }

    /// Locked users surface as an internal error code; the platform has no
    /// dedicated result code for them.
    pub fn result_code(&self) -> ResultCode {
        match self {
            AppSearchError::Security(_) => Self::RESULT_SECURITY_ERROR,
            AppSearchError::InvalidArgument(_) => Self::RESULT_INVALID_ARGUMENT,
            AppSearchError::Denied(_) => Self::RESULT_DENIED,
            AppSearchError::RateLimited(_) => Self::RESULT_RATE_LIMITED,
            AppSearchError::NotFound(_) => Self::RESULT_NOT_FOUND,
            AppSearchError::Internal(_) | AppSearchError::Locked(_) => {
                Self::RESULT_INTERNAL_ERROR
            }
        }
    }

    /// Short label used for metrics and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            AppSearchError::Security(_) => "security",
            AppSearchError::InvalidArgument(_) => "invalid_argument",
            AppSearchError::Denied(_) => "denied",
            AppSearchError::RateLimited(_) => "rate_limited",
            AppSearchError::NotFound(_) => "not_found",
            AppSearchError::Internal(_) => "internal",
            AppSearchError::Locked(_) => "locked",
        }
    }
}
