//! ProductBazar Store
//!
//! Durable truth for interactions and the candidate fetch path:
//! - [`InteractionStore`]: toggles, views and comments with counters derived
//!   from the active-record sets, serialized per product
//! - [`Catalog`]: products (unique slugs) and users
//! - [`CandidateSource`]: bounded, enriched candidate fetches for the
//!   scoring kernel, served in memory by [`CatalogFetcher`]

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod catalog;
pub mod clock;
pub mod error;
pub mod fetcher;
pub mod interactions;
pub mod query;

pub use catalog::Catalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use fetcher::{CandidateSource, CatalogFetcher};
pub use interactions::{InteractionStore, StoreConfig, UserInteractionState};
pub use query::{text_match, CandidateQuery, SortOrder};
