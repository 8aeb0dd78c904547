//! Store error types

use bazaar_model::BazaarError;

/// Errors from the interaction store and candidate fetcher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Product does not exist
    #[error("product not found: {0}")]
    ProductNotFound(String),

    /// User does not exist
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Another product already uses the slug
    #[error("slug already in use: {0}")]
    DuplicateSlug(String),

    /// Another product already uses the id
    #[error("product already exists: {0}")]
    DuplicateProduct(String),

    /// Makers cannot upvote or bookmark their own products
    #[error("cannot {action} your own product")]
    SelfInteraction {
        /// Attempted action
        action: &'static str,
    },

    /// Comment does not exist on the product
    #[error("comment {comment} not found on product {product}")]
    CommentNotFound {
        /// Product id
        product: String,
        /// Comment id
        comment: u64,
    },

    /// Query rejected before execution
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Backing store unreachable
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for BazaarError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(_)
            | StoreError::UserNotFound(_)
            | StoreError::CommentNotFound { .. } => BazaarError::NotFound(err.to_string()),
            StoreError::DuplicateSlug(_) | StoreError::DuplicateProduct(_) => {
                BazaarError::Conflict(err.to_string())
            }
            StoreError::SelfInteraction { .. } => BazaarError::Forbidden(err.to_string()),
            StoreError::InvalidQuery(msg) => BazaarError::Validation(msg),
            StoreError::Unavailable(msg) => BazaarError::Upstream(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_engine_kinds() {
        let err: BazaarError = StoreError::SelfInteraction { action: "upvote" }.into();
        assert_eq!(err.http_status(), 403);
        assert!(err.to_string().contains("cannot upvote your own product"));

        let err: BazaarError = StoreError::Unavailable("primary down".into()).into();
        assert!(matches!(err, BazaarError::Upstream(_)));

        let err: BazaarError = StoreError::DuplicateSlug("notes".into()).into();
        assert_eq!(err.http_status(), 409);
    }
}
