//! Error kinds for the engine
//!
//! Provides the single error type surfaced to callers:
//! - Operational errors (validation, forbidden, not found, rate limits) expose their message
//! - Internal errors are reported with a generic message and a stable code
//! - Retry hints accompany rate limits and timeouts

use serde::{Deserialize, Serialize};

/// Main engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BazaarError {
    /// Malformed or out-of-range input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Caller must authenticate
    #[error("authentication required")]
    Unauthenticated,

    /// Caller is not allowed to perform the action
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Target does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Write conflicts with current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Throttled
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window admits another request
        retry_after_secs: u64,
    },

    /// Backing store unreachable
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// Deadline exceeded
    #[error("operation timed out after {after_ms}ms")]
    Timeout {
        /// Elapsed budget in milliseconds
        after_ms: u64,
        /// Suggested wait before retrying
        retry_after_secs: u64,
    },

    /// Request cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl BazaarError {
    /// Create validation error
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create forbidden error
    #[inline]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Create not-found error
    #[inline]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create timeout error for an elapsed budget
    #[inline]
    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
            retry_after_secs: after.as_secs().max(1),
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the error envelope
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RateLimited { .. } => 429,
            Self::Timeout { .. } => 504,
            Self::Cancelled => 499,
            Self::Upstream(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether the message is safe to show to the caller
    #[inline]
    #[must_use]
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Unauthenticated
                | Self::Forbidden(_)
                | Self::NotFound(_)
                | Self::Conflict(_)
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
        )
    }

    /// Whether a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Upstream(_) | Self::Timeout { .. }
        )
    }

    /// Retry hint in seconds
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } | Self::Timeout { retry_after_secs, .. } => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    /// Build the wire envelope
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let message = if self.is_operational() {
            self.to_string()
        } else {
            "something went wrong, please try again later".to_string()
        };
        ErrorEnvelope {
            status: "error".to_string(),
            message,
            code: Some(self.code().to_string()),
            retry_after: self.retry_after(),
        }
    }
}

/// Result type alias for engine operations
pub type BazaarResult<T> = Result<T, BazaarError>;

/// `{status:"error", message, code?, retryAfter?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Always `"error"`
    pub status: String,
    /// Caller-visible message
    pub message: String,
    /// Stable code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Retry hint in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BazaarError::forbidden("cannot upvote your own product");
        assert!(err.to_string().contains("forbidden"));
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn internal_errors_are_masked() {
        let env = BazaarError::Internal("db socket closed".to_string()).envelope();
        assert!(!env.message.contains("socket"));
        assert_eq!(env.code.as_deref(), Some("INTERNAL_ERROR"));
        assert_eq!(env.retry_after, None);
    }

    #[test]
    fn rate_limit_envelope_carries_retry_after() {
        let err = BazaarError::RateLimited {
            retry_after_secs: 42,
        };
        let env = err.envelope();
        assert_eq!(env.retry_after, Some(42));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["retryAfter"], 42);
        assert_eq!(json["status"], "error");
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn retryable_kinds() {
        assert!(BazaarError::Upstream("down".into()).is_retryable());
        assert!(BazaarError::timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(!BazaarError::validation("bad").is_retryable());
    }

    #[test]
    fn timeout_hint_is_at_least_one_second() {
        let err = BazaarError::timeout(std::time::Duration::from_millis(200));
        assert_eq!(err.retry_after(), Some(1));
    }
}
