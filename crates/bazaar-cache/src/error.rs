//! Cache error types

use bazaar_model::BazaarError;

/// Cache layer errors
///
/// None of these ever fail a read; callers demote them to warnings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Pattern failed to parse
    #[error("invalid key pattern: {0:?}")]
    InvalidPattern(String),

    /// Lookup exceeded its budget
    #[error("cache lookup timed out after {0}ms")]
    Timeout(u64),

    /// Refill loader failed
    #[error("refill failed for {key}: {reason}")]
    RefillFailed {
        /// Key being refilled
        key: String,
        /// Loader error text
        reason: String,
    },
}

impl From<CacheError> for BazaarError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidPattern(_) => BazaarError::Validation(err.to_string()),
            CacheError::Timeout(ms) => {
                BazaarError::timeout(std::time::Duration::from_millis(ms))
            }
            CacheError::RefillFailed { .. } => BazaarError::Internal(err.to_string()),
        }
    }
}
