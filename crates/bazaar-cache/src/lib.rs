//! ProductBazar Cache
//!
//! Read-path memory for the engine:
//! - [`CacheLayer`]: fresh/stale/miss entries keyed by the [`keys`] grammar,
//!   invalidated by [`KeyPattern`] or tag, refilled in the background with at
//!   most one refill per key
//! - [`Deduplicator`]: per page-render claim sets so sections of one page
//!   never repeat a product

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod dedup;
pub mod error;
pub mod keys;
pub mod layer;
pub mod pattern;

pub use dedup::Deduplicator;
pub use error::CacheError;
pub use keys::{query_hash, CacheTtlTable, KeyPrefix, TtlPair, UserPart};
pub use layer::{CacheLayer, CacheStats, Freshness, Lookup};
pub use pattern::KeyPattern;
