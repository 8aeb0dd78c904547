//! Gate configuration errors

use bazaar_model::BazaarError;

/// Errors building the gate from configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// User-agent pattern did not compile
    #[error("invalid user-agent pattern: {0}")]
    InvalidPattern(String),

    /// IP range is not `addr/len`
    #[error("invalid ip range {0:?}")]
    InvalidIpRange(String),

    /// Rate-limit rule with a zero window or cap
    #[error("rate limit for {class} needs a non-zero window and cap")]
    InvalidRule {
        /// Endpoint class name
        class: &'static str,
    },
}

impl From<GateError> for BazaarError {
    fn from(err: GateError) -> Self {
        BazaarError::Validation(err.to_string())
    }
}
