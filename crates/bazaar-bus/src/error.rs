//! Bus error types

use bazaar_cache::CacheError;
use bazaar_model::{BazaarError, ConnectionId};

/// Invalidation bus errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Client side of the sink is gone; retrying is pointless
    #[error("push sink closed")]
    SinkClosed,

    /// Transient delivery failure
    #[error("push delivery failed: {0}")]
    SinkFailed(String),

    /// Connection was never registered or already disconnected
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Malformed client control message
    #[error("invalid client message: {0}")]
    InvalidMessage(String),

    /// Purge failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl BusError {
    /// Whether a retry could succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SinkFailed(_))
    }
}

impl From<BusError> for BazaarError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::InvalidMessage(_) => BazaarError::Validation(err.to_string()),
            BusError::UnknownConnection(_) => BazaarError::NotFound(err.to_string()),
            BusError::Cache(inner) => inner.into(),
            BusError::SinkClosed | BusError::SinkFailed(_) => {
                BazaarError::Internal(err.to_string())
            }
        }
    }
}
