//! Candidate fetching
//!
//! [`CandidateSource`] is the seam between the feed assembler and whatever
//! backs the catalog. [`CatalogFetcher`] serves it from the in-memory
//! [`Catalog`] and [`InteractionStore`].

use crate::catalog::Catalog;
use crate::error::{StoreError, StoreResult};
use crate::interactions::InteractionStore;
use crate::query::{CandidateQuery, SortOrder};
use async_trait::async_trait;
use bazaar_model::{Candidate, CategorySummary, MakerSummary, Product, ProductId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

/// Source of enriched candidates
#[async_trait]
pub trait CandidateSource: Send + Sync + fmt::Debug {
    /// Up to `cap` candidates matching `query`, sorted by the query order
    /// with ties broken by `createdAt` descending then id ascending
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached,
    /// `InvalidQuery` for malformed queries.
    async fn fetch(&self, query: &CandidateQuery, cap: usize) -> StoreResult<Vec<Candidate>>;

    /// One enriched product by id
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    async fn fetch_one(&self, id: &ProductId) -> StoreResult<Option<Candidate>>;

    /// One enriched product by slug
    ///
    /// # Errors
    /// `Unavailable` when the backing store cannot be reached.
    async fn fetch_by_slug(&self, slug: &str) -> StoreResult<Option<Candidate>>;
}

/// In-memory candidate source
pub struct CatalogFetcher {
    catalog: Arc<Catalog>,
    interactions: Arc<InteractionStore>,
    recent_window_days: u32,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl fmt::Debug for CatalogFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogFetcher")
            .field("products", &self.catalog.len())
            .field("recent_window_days", &self.recent_window_days)
            .field("available", &self.available.load(AtomicOrdering::Relaxed))
            .finish()
    }
}

impl CatalogFetcher {
    /// Create fetcher over the store's catalog
    #[must_use]
    pub fn new(interactions: Arc<InteractionStore>) -> Self {
        Self {
            catalog: Arc::clone(interactions.catalog()),
            recent_window_days: interactions.config().recent_window_days,
            interactions,
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// With recent-window length for subcounts
    #[inline]
    #[must_use]
    pub fn with_recent_window(mut self, days: u32) -> Self {
        self.recent_window_days = days.max(1);
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Add artificial latency to every fetch
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, AtomicOrdering::SeqCst);
    }

    async fn round_trip(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(AtomicOrdering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("catalog offline".to_string()))
        }
    }

    fn enrich(&self, product: Product) -> Candidate {
        let now = self.interactions.now();
        let counters = self.interactions.product_counters(&product.id);
        let recent = self
            .interactions
            .recent_activity(&product.id, self.recent_window_days);
        let age = product.age_in_days(now);
        let maker = MakerSummary {
            name: self.catalog.user_name(&product.maker),
            id: product.maker.clone(),
        };
        let category = CategorySummary {
            id: product.category.clone(),
            name: if product.category_name.is_empty() {
                product.category.to_string()
            } else {
                product.category_name.clone()
            },
        };
        Candidate {
            product,
            counters,
            recent,
            maker,
            category,
            age_in_days: age,
        }
    }
}

/// Query order with the documented tie-breaks
fn compare(sort: SortOrder, a: &Candidate, b: &Candidate) -> Ordering {
    let primary = match sort {
        SortOrder::Newest => Ordering::Equal,
        SortOrder::Oldest => a.product.created_at.cmp(&b.product.created_at),
        SortOrder::Popular => b.counters.upvote_count.cmp(&a.counters.upvote_count),
        SortOrder::MostViewed => b.counters.view_count.cmp(&a.counters.view_count),
        SortOrder::Alphabetical => a
            .product
            .name
            .to_lowercase()
            .cmp(&b.product.name.to_lowercase()),
    };
    primary
        .then_with(|| b.product.created_at.cmp(&a.product.created_at))
        .then_with(|| a.product.id.cmp(&b.product.id))
}

#[async_trait]
impl CandidateSource for CatalogFetcher {
    async fn fetch(&self, query: &CandidateQuery, cap: usize) -> StoreResult<Vec<Candidate>> {
        query.validate().map_err(StoreError::InvalidQuery)?;
        self.round_trip().await?;

        let mut candidates: Vec<Candidate> = self
            .catalog
            .products()
            .into_iter()
            .filter(|p| query.matches(p))
            .map(|p| self.enrich(p))
            .collect();
        candidates.sort_by(|a, b| compare(query.sort, a, b));
        candidates.truncate(cap);

        tracing::trace!(
            query = %query.fingerprint(),
            cap,
            returned = candidates.len(),
            "candidates fetched"
        );
        Ok(candidates)
    }

    async fn fetch_one(&self, id: &ProductId) -> StoreResult<Option<Candidate>> {
        self.round_trip().await?;
        Ok(self.catalog.product(id).map(|p| self.enrich(p)))
    }

    async fn fetch_by_slug(&self, slug: &str) -> StoreResult<Option<Candidate>> {
        self.round_trip().await?;
        Ok(self.catalog.product_by_slug(slug).map(|p| self.enrich(p)))
    }
}
