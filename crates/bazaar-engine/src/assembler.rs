//! Feed assembly
//!
//! One [`FeedAssembler::assemble`] call serves one ranked section:
//! 1. derive the candidate query and scoring context from the strategy and
//!    the caller
//! 2. consult the cache; a stale hit is served and refilled in the
//!    background
//! 3. on a miss, over-fetch under the upstream deadline and prescore every
//!    candidate on the rayon pool
//! 4. select greedily against the page cycle's claims, the diversity caps
//!    and the strategy's soft diversity floor
//! 5. store the page unless the cycle's claims shaped it
//!
//! Upstream failures and timeouts degrade to the last known page, or an
//! empty one; they never fail the read.

use crate::api::{FeedItem, FeedPage, Served, TimeRange};
use crate::config::FetchConfig;
use crate::context::{CancelToken, RequestContext};
use bazaar_bus::product_tag;
use bazaar_cache::{keys, query_hash, CacheLayer, Deduplicator, Freshness, Lookup, UserPart};
use bazaar_model::{
    BazaarError, BazaarResult, Candidate, CategoryId, CycleId, InteractionKind,
    PersonalContext, ProductId, ProductStatus, ScoreDetail, UserId,
};
use bazaar_scoring::{PreScore, ScoringContext, ScoringKernel, Strategy};
use bazaar_store::{CandidateQuery, CandidateSource, InteractionStore, SortOrder};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Cached page
pub type CachedFeed = Arc<FeedPage>;

/// Which public surface a section is served on; decides the cache key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Surface {
    /// `recommendations/{strategy}` and filtered sections
    #[default]
    Recommendations,
    /// `products/trending`
    Trending(TimeRange),
    /// `search`, 1-based page
    Search {
        /// Page number
        page: u32,
    },
}

/// One section request
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// Requested strategy
    pub strategy: Strategy,
    /// Page size
    pub limit: u32,
    /// Items to skip
    pub offset: u32,
    /// Source product for `similar`
    pub source: Option<ProductId>,
    /// Category for `category`
    pub category: Option<CategoryId>,
    /// Tags for `tag`
    pub tags: Vec<String>,
    /// Text for `search`
    pub search: Option<String>,
    /// Surface
    pub surface: Surface,
}

impl FeedRequest {
    /// Request `limit` items of `strategy`
    #[must_use]
    pub fn new(strategy: Strategy, limit: u32) -> Self {
        Self {
            strategy,
            limit,
            offset: 0,
            source: None,
            category: None,
            tags: Vec::new(),
            search: None,
            surface: Surface::Recommendations,
        }
    }

    /// With offset
    #[inline]
    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// With source product
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<ProductId>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// With category
    #[inline]
    #[must_use]
    pub fn with_category(mut self, category: impl Into<CategoryId>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// With tags
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// With search text
    #[inline]
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// On `surface`
    #[inline]
    #[must_use]
    pub fn on(mut self, surface: Surface) -> Self {
        self.surface = surface;
        self
    }

    fn is_filtered(&self) -> bool {
        self.source.is_some() || self.category.is_some() || !self.tags.is_empty()
    }
}

/// Everything needed to compute a section, detached from the request
#[derive(Debug, Clone)]
struct FeedPlan {
    strategy: Strategy,
    query: CandidateQuery,
    scoring: ScoringContext,
    limit: u32,
    offset: u32,
    key: String,
}

struct Computed {
    page: FeedPage,
    cacheable: bool,
}

/// Orchestrates fetch, scoring, dedup and caching for one section
pub struct FeedAssembler {
    kernel: ScoringKernel,
    source: Arc<dyn CandidateSource>,
    store: Arc<InteractionStore>,
    cache: Arc<CacheLayer<CachedFeed>>,
    dedup: Deduplicator,
    fetch: FetchConfig,
    upstream: Duration,
}

impl fmt::Debug for FeedAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedAssembler")
            .field("source", &self.source)
            .field("cache", &self.cache)
            .field("fetch", &self.fetch)
            .field("upstream", &self.upstream)
            .finish()
    }
}

impl FeedAssembler {
    /// Create assembler
    #[must_use]
    pub fn new(
        kernel: ScoringKernel,
        source: Arc<dyn CandidateSource>,
        store: Arc<InteractionStore>,
        cache: Arc<CacheLayer<CachedFeed>>,
        dedup: Deduplicator,
    ) -> Self {
        Self {
            kernel,
            source,
            store,
            cache,
            dedup,
            fetch: FetchConfig::default(),
            upstream: Duration::from_secs(5),
        }
    }

    /// With fetch sizing
    #[must_use]
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// With candidate fetch sub-deadline
    #[must_use]
    pub fn with_upstream_timeout(mut self, upstream: Duration) -> Self {
        self.upstream = upstream;
        self
    }

    /// Feed cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer<CachedFeed>> {
        &self.cache
    }

    /// Page cycle registry
    #[inline]
    #[must_use]
    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Serve one section
    ///
    /// # Errors
    /// Invalid requests, a cancelled request, or a missing `similar` source.
    /// Upstream failures are absorbed.
    pub async fn assemble(
        self: &Arc<Self>,
        ctx: &RequestContext,
        request: &FeedRequest,
    ) -> BazaarResult<Served<FeedPage>> {
        self.check_bounds(request)?;
        if ctx.cancel.is_cancelled() {
            return Err(BazaarError::Cancelled);
        }
        let plan = match self.plan(ctx, request).await {
            Ok(plan) => plan,
            Err(err) if is_degradable(&err) => {
                tracing::warn!(error = %err, strategy = %request.strategy, "feed source unavailable");
                return Ok(Served::new(
                    FeedPage::empty(request.strategy, request.limit, request.offset),
                    Freshness::Miss,
                ));
            }
            Err(err) => return Err(err),
        };

        match self.cache.get(&plan.key) {
            Lookup::Fresh(page) => {
                if let Some(page) = self.claim_cached(ctx.cycle_id, &page).await {
                    tracing::debug!(key = %plan.key, "feed cache hit");
                    return Ok(Served::new(page, Freshness::Fresh));
                }
            }
            Lookup::Stale(page) => {
                self.refill(&plan, &page);
                if let Some(page) = self.claim_cached(ctx.cycle_id, &page).await {
                    tracing::debug!(key = %plan.key, "feed served stale");
                    return Ok(Served::new(page, Freshness::Stale));
                }
            }
            Lookup::Miss => {}
        }

        let epoch = self.cache.epoch();
        match self.compute(&plan, &ctx.cancel, ctx.cycle_id).await {
            Ok(Computed { page, cacheable }) => {
                if cacheable {
                    let tags = page_tags(&page);
                    self.cache
                        .put_if_current(&plan.key, Arc::new(page.clone()), &tags, epoch);
                }
                Ok(Served::new(page, Freshness::Miss))
            }
            Err(err) if is_degradable(&err) => {
                metrics::counter!("bazaar_feed_degraded_total", "strategy" => plan.strategy.as_str())
                    .increment(1);
                match self.cache.last_known(&plan.key) {
                    Some(page) => {
                        tracing::warn!(error = %err, key = %plan.key, "serving last known feed");
                        Ok(Served::new((*page).clone(), Freshness::Stale))
                    }
                    None => {
                        tracing::warn!(error = %err, key = %plan.key, "serving empty feed");
                        Ok(Served::new(
                            FeedPage::empty(plan.strategy, plan.limit, plan.offset),
                            Freshness::Miss,
                        ))
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    fn check_bounds(&self, request: &FeedRequest) -> BazaarResult<()> {
        if request.limit == 0 || request.limit > self.fetch.max_limit {
            return Err(BazaarError::validation(format!(
                "limit must be within 1..={}",
                self.fetch.max_limit
            )));
        }
        if request.offset > self.fetch.max_offset {
            return Err(BazaarError::validation(format!(
                "offset must be at most {}",
                self.fetch.max_offset
            )));
        }
        Ok(())
    }

    /// Hand a cached page to the cycle, or `None` if another section
    /// already claimed one of its products
    async fn claim_cached(&self, cycle: Option<CycleId>, page: &CachedFeed) -> Option<FeedPage> {
        let Some(cycle) = cycle else {
            return Some((**page).clone());
        };
        let ids = page.ids();
        let wanted = ids.len();
        let claimed = self
            .dedup
            .claim_with(cycle, |taken| {
                if ids.iter().any(|id| taken.contains(id)) {
                    Vec::new()
                } else {
                    ids
                }
            })
            .await;
        (claimed.len() == wanted).then(|| (**page).clone())
    }

    fn refill(self: &Arc<Self>, plan: &FeedPlan, stale: &CachedFeed) {
        let this = Arc::clone(self);
        let plan = plan.clone();
        let key = plan.key.clone();
        self.cache.spawn_refill(&key, &page_tags(stale), move || async move {
            // Refills outlive the request that triggered them.
            let cancel = CancelToken::new();
            this.compute(&plan, &cancel, None)
                .await
                .map(|computed| Arc::new(computed.page))
        });
    }

    async fn plan(&self, ctx: &RequestContext, request: &FeedRequest) -> BazaarResult<FeedPlan> {
        let now = self.store.now();
        let reader = ctx.reader().cloned();
        let mut strategy = request.strategy;
        let mut query = CandidateQuery::new().for_viewer(ctx.user_id().cloned(), ctx.is_admin());
        let mut scoring_extras: Vec<ScoringExtra> = Vec::new();

        if strategy == Strategy::Collaborative {
            let support = reader
                .as_ref()
                .map(|user| self.store.co_engagement(user))
                .unwrap_or_default();
            if support.is_empty() {
                tracing::debug!(user = ?reader, "no engagement neighbors, using interests");
                strategy = Strategy::Interests;
            } else if let Some(user) = &reader {
                query = query.excluding(self.store.engaged_products(user));
                scoring_extras.push(ScoringExtra::Neighbors(support));
            }
        }

        query = match strategy {
            Strategy::Trending => {
                let days = match request.surface {
                    Surface::Trending(range) => range.days(),
                    _ => self.fetch.trending_window_days,
                };
                query
                    .with_status(ProductStatus::Published)
                    .created_after(window_start(now, days))
                    .sorted_by(SortOrder::Popular)
            }
            Strategy::New => query
                .with_status(ProductStatus::Published)
                .sorted_by(SortOrder::Newest),
            Strategy::Similar => {
                let id = request
                    .source
                    .clone()
                    .ok_or_else(|| BazaarError::validation("similar requires a source product"))?;
                let source = self.fetch_source(&id).await?;
                let query = if source.product.tags.is_empty() {
                    query.with_category(source.product.category.clone())
                } else {
                    query.with_tags(source.product.tags.iter())
                };
                scoring_extras.push(ScoringExtra::Source(Box::new(source)));
                query.sorted_by(SortOrder::Popular)
            }
            Strategy::Category => {
                let category = request
                    .category
                    .clone()
                    .ok_or_else(|| BazaarError::validation("category requires a category id"))?;
                scoring_extras.push(ScoringExtra::Category(category.clone()));
                query.with_category(category).sorted_by(SortOrder::Popular)
            }
            Strategy::Tag => {
                if request.tags.iter().all(|t| t.trim().is_empty()) {
                    return Err(BazaarError::validation("tag requires at least one tag"));
                }
                scoring_extras.push(ScoringExtra::Tags(request.tags.clone()));
                query.with_tags(request.tags.iter()).sorted_by(SortOrder::Popular)
            }
            Strategy::Search => {
                let text = request
                    .search
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| BazaarError::validation("search requires a query"))?;
                scoring_extras.push(ScoringExtra::Search(text.to_string()));
                query.with_search(text).sorted_by(SortOrder::Popular)
            }
            Strategy::Feed => query.sorted_by(SortOrder::Newest),
            Strategy::Personalized
            | Strategy::Interests
            | Strategy::Collaborative
            | Strategy::Default => query.sorted_by(SortOrder::Popular),
        };
        query.validate().map_err(BazaarError::Validation)?;

        let mut scoring = ScoringContext::new(strategy, now);
        if let Some(user) = &reader {
            scoring = scoring.with_personal(self.personal_context(user, strategy));
        }
        for extra in scoring_extras {
            scoring = match extra {
                ScoringExtra::Neighbors(support) => scoring.with_neighbor_support(support),
                ScoringExtra::Source(source) => scoring.with_source(*source),
                ScoringExtra::Category(category) => scoring.with_query_category(category),
                ScoringExtra::Tags(tags) => scoring.with_query_tags(tags),
                ScoringExtra::Search(text) => scoring.with_search(&text),
            };
        }

        let key = cache_key(strategy, request, &UserPart::from_user(reader.as_ref()), &query);
        Ok(FeedPlan {
            strategy,
            query,
            scoring,
            limit: request.limit,
            offset: request.offset,
            key,
        })
    }

    async fn fetch_source(&self, id: &ProductId) -> BazaarResult<Candidate> {
        let fetched = tokio::time::timeout(self.upstream, self.source.fetch_one(id))
            .await
            .map_err(|_| BazaarError::timeout(self.upstream))??;
        fetched.ok_or_else(|| BazaarError::not_found(format!("product {id}")))
    }

    /// Preferences plus, for history-aware strategies, recent views and
    /// categories
    fn personal_context(&self, user: &UserId, strategy: Strategy) -> PersonalContext {
        let catalog = self.store.catalog();
        let preferences = catalog
            .user(user)
            .map(|u| u.preferences)
            .unwrap_or_default();
        let mut personal = PersonalContext::for_user(user.clone(), preferences);
        personal.last_activity = self.store.last_activity(user);
        if !strategy.uses_history() {
            return personal;
        }

        let window = ChronoDuration::days(i64::from(self.fetch.recent_window_days));
        for interaction in self.store.recent_interactions(user, window) {
            if interaction.kind == InteractionKind::View {
                personal.recent_views.insert(interaction.product.clone());
            }
            if let Some(product) = catalog.product(&interaction.product) {
                personal.recent_categories.insert(product.category);
            }
        }
        personal
    }

    async fn compute(
        &self,
        plan: &FeedPlan,
        cancel: &CancelToken,
        cycle: Option<CycleId>,
    ) -> BazaarResult<Computed> {
        let target = (plan.offset + plan.limit) as usize;
        let cap = (target * self.fetch.over_fetch_factor as usize)
            .min(self.fetch.max_candidates)
            .max(plan.limit as usize);

        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BazaarError::Cancelled),
            res = tokio::time::timeout(self.upstream, self.source.fetch(&plan.query, cap)) => res,
        };
        let candidates = match fetched {
            Ok(result) => result?,
            Err(_) => return Err(BazaarError::timeout(self.upstream)),
        };
        metrics::histogram!("bazaar_feed_candidates", "strategy" => plan.strategy.as_str())
            .record(candidates.len() as f64);

        let mut scoring = plan.scoring.clone();
        scoring.now = self.store.now();
        let (candidates, scoring, prescores) =
            prescore_all(self.kernel.clone(), candidates, scoring, cancel.clone()).await?;

        let floor = self.kernel.config().diversity_floor(plan.strategy);
        let offset = plan.offset as usize;
        let mut picked = Vec::new();
        let mut cacheable = true;
        let mut run = |blocked: &HashSet<ProductId>| {
            cacheable = blocked.is_empty();
            picked = select(&self.kernel, &scoring, &candidates, &prescores, blocked, floor, target, offset);
            picked
                .iter()
                .skip(offset)
                .map(|(i, _)| candidates[*i].product.id.clone())
                .collect::<Vec<_>>()
        };
        match cycle {
            Some(cycle) => {
                self.dedup.claim_with(cycle, run).await;
            }
            None => {
                run(&HashSet::new());
            }
        }

        let reason = plan.strategy.as_str().to_string();
        let items = picked
            .into_iter()
            .skip(offset)
            .map(|(i, detail)| FeedItem {
                product: candidates[i].clone(),
                score: detail.score,
                reason: reason.clone(),
                explanation: detail.explanation,
            })
            .collect();
        Ok(Computed {
            page: FeedPage {
                strategy: plan.strategy,
                items,
                limit: plan.limit,
                offset: plan.offset,
            },
            cacheable,
        })
    }
}

enum ScoringExtra {
    Neighbors(std::collections::HashMap<ProductId, u32>),
    Source(Box<Candidate>),
    Category(CategoryId),
    Tags(Vec<String>),
    Search(String),
}

fn is_degradable(err: &BazaarError) -> bool {
    matches!(err, BazaarError::Upstream(_) | BazaarError::Timeout { .. })
}

fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    // Whole-minute bound keeps the query fingerprint stable within a minute.
    let start = now - ChronoDuration::days(i64::from(days));
    start - ChronoDuration::seconds(start.timestamp() % 60)
}

fn cache_key(strategy: Strategy, request: &FeedRequest, user: &UserPart, query: &CandidateQuery) -> String {
    match request.surface {
        Surface::Trending(range) => keys::products_trending(range.as_str(), request.limit),
        Surface::Search { page } => {
            keys::search(user, &query_hash(&query.fingerprint()), page, request.limit)
        }
        Surface::Recommendations if request.is_filtered() || strategy == Strategy::Search => keys::rec(
            strategy.as_str(),
            &query_hash(&query.fingerprint()),
            user,
            request.limit,
            request.offset,
        ),
        Surface::Recommendations => {
            keys::recommendations(strategy.as_str(), user, request.limit, request.offset)
        }
    }
}

fn page_tags(page: &FeedPage) -> Vec<String> {
    page.items
        .iter()
        .map(|item| product_tag(&item.product.product.id))
        .collect()
}

/// Prescore every candidate on the rayon pool, stopping early on cancel
async fn prescore_all(
    kernel: ScoringKernel,
    candidates: Vec<Candidate>,
    scoring: ScoringContext,
    cancel: CancelToken,
) -> BazaarResult<(Vec<Candidate>, ScoringContext, Vec<PreScore>)> {
    let (tx, rx) = oneshot::channel();
    rayon::spawn(move || {
        let prescores: Option<Vec<PreScore>> = candidates
            .par_iter()
            .map(|c| (!cancel.is_cancelled()).then(|| kernel.prescore(c, &scoring)))
            .collect();
        let _ = tx.send((candidates, scoring, prescores));
    });
    let (candidates, scoring, prescores) = rx
        .await
        .map_err(|_| BazaarError::Internal("scoring worker dropped its result".into()))?;
    let prescores = prescores.ok_or(BazaarError::Cancelled)?;
    Ok((candidates, scoring, prescores))
}

/// Largest count one category may hold in a list of `n`
#[inline]
const fn category_cap(n: usize) -> usize {
    (3 * n).div_ceil(5)
}

/// Largest count one maker may hold in a list of `n`
#[inline]
const fn maker_cap(n: usize) -> usize {
    (2 * n).div_ceil(5)
}

/// Caps apply to lists of at least this many items
const CAP_MIN_LEN: usize = 3;

/// Greedy selection of up to `target` candidates
///
/// Each round finalizes every remaining candidate against the chosen prefix
/// and takes the best one that keeps the category and maker caps on the
/// current segment. Candidates meeting the diversity `floor` beat those that
/// do not. The first `offset` picks form one segment and the page after them
/// another, so the returned page honours the caps on its own.
#[allow(clippy::too_many_arguments)]
fn select(
    kernel: &ScoringKernel,
    scoring: &ScoringContext,
    candidates: &[Candidate],
    prescores: &[PreScore],
    blocked: &HashSet<ProductId>,
    floor: f64,
    target: usize,
    offset: usize,
) -> Vec<(usize, ScoreDetail)> {
    let mut seen = HashSet::new();
    let mut remaining: Vec<usize> = (0..candidates.len())
        .filter(|&i| {
            let id = &candidates[i].product.id;
            !blocked.contains(id) && seen.insert(id.clone())
        })
        .collect();
    let mut chosen: Vec<(usize, ScoreDetail)> = Vec::with_capacity(target);

    while chosen.len() < target && !remaining.is_empty() {
        let start = if chosen.len() < offset { 0 } else { offset };
        let segment: Vec<&Candidate> = chosen[start..].iter().map(|(i, _)| &candidates[*i]).collect();
        let prefix: Vec<&Candidate> = chosen.iter().map(|(i, _)| &candidates[*i]).collect();
        let n = segment.len() + 1;

        let mut best: Option<(usize, ScoreDetail, bool)> = None;
        for (pos, &i) in remaining.iter().enumerate() {
            let candidate = &candidates[i];
            if n >= CAP_MIN_LEN && !within_caps(candidate, &segment, n) {
                continue;
            }
            let diversity = kernel.diversity(candidate, &prefix);
            let detail = kernel.finalize(candidate, &prescores[i], diversity, scoring);
            let meets = diversity >= floor;
            let better = match &best {
                None => true,
                Some((best_pos, best_detail, best_meets)) => outranks(
                    (candidate, &detail, meets),
                    (&candidates[remaining[*best_pos]], best_detail, *best_meets),
                ),
            };
            if better {
                best = Some((pos, detail, meets));
            }
        }

        let Some((pos, detail, _)) = best else {
            tracing::debug!(chosen = chosen.len(), target, "no candidate fits the diversity caps");
            break;
        };
        let i = remaining.remove(pos);
        chosen.push((i, detail));
    }
    chosen
}

fn within_caps(candidate: &Candidate, segment: &[&Candidate], n: usize) -> bool {
    let same_category = segment
        .iter()
        .filter(|c| c.product.category == candidate.product.category)
        .count();
    let same_maker = segment
        .iter()
        .filter(|c| c.product.maker == candidate.product.maker)
        .count();
    same_category < category_cap(n) && same_maker < maker_cap(n)
}

/// Floor first, then score, then earlier `createdAt`, then id
fn outranks(a: (&Candidate, &ScoreDetail, bool), b: (&Candidate, &ScoreDetail, bool)) -> bool {
    let order = a
        .2
        .cmp(&b.2)
        .then_with(|| a.1.score.total_cmp(&b.1.score))
        .then_with(|| b.0.product.created_at.cmp(&a.0.product.created_at))
        .then_with(|| b.0.product.id.cmp(&a.0.product.id));
    order == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_model::{Component, Product, ScoreComponents, UserId};
    use bazaar_scoring::ScoringConfig;
    use proptest::{prop_assert, proptest};
    use std::collections::HashMap;

    fn candidate(id: &str, category: &str, maker: &str, age: f64, upvotes: u64) -> Candidate {
        let product = Product::new(
            ProductId::from(id),
            id,
            UserId::from(maker),
            CategoryId::from(category),
        )
        .with_status(ProductStatus::Published)
        .created_at(Utc::now() - ChronoDuration::hours((age * 24.0) as i64));
        let mut c = Candidate::bare(product, age);
        c.counters.upvote_count = upvotes;
        c.counters.view_count = upvotes * 10;
        c
    }

    fn run(candidates: &[Candidate], strategy: Strategy, target: usize, offset: usize) -> Vec<(usize, ScoreDetail)> {
        let kernel = ScoringKernel::new(ScoringConfig::default());
        let ctx = ScoringContext::new(strategy, Utc::now());
        let pre: Vec<PreScore> = candidates.iter().map(|c| kernel.prescore(c, &ctx)).collect();
        let floor = kernel.config().diversity_floor(strategy);
        select(&kernel, &ctx, candidates, &pre, &HashSet::new(), floor, target, offset)
    }

    #[test]
    fn caps_are_exact_integers() {
        assert_eq!(category_cap(3), 2);
        assert_eq!(category_cap(5), 3);
        assert_eq!(category_cap(10), 6);
        assert_eq!(maker_cap(3), 2);
        assert_eq!(maker_cap(5), 2);
        assert_eq!(maker_cap(10), 4);
    }

    #[test]
    fn one_category_cannot_dominate() {
        let mut pool: Vec<Candidate> = (0..8)
            .map(|i| candidate(&format!("hot{i}"), "ai", &format!("m{i}"), 2.0, 500))
            .collect();
        pool.extend((0..4).map(|i| candidate(&format!("cold{i}"), &format!("c{i}"), &format!("n{i}"), 20.0, 1)));
        let picked = run(&pool, Strategy::Default, 10, 0);
        assert_eq!(picked.len(), 10);
        let ai = picked.iter().filter(|(i, _)| pool[*i].product.category.as_str() == "ai").count();
        assert!(ai <= category_cap(10), "{ai} ai products in 10");
    }

    #[test]
    fn selection_stops_when_caps_cannot_hold() {
        let pool: Vec<Candidate> = (0..6)
            .map(|i| candidate(&format!("p{i}"), "ai", "solo", 2.0, 10))
            .collect();
        let picked = run(&pool, Strategy::Default, 6, 0);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn blocked_products_are_skipped() {
        let pool: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("p{i}"), &format!("c{i}"), &format!("m{i}"), 2.0, 10))
            .collect();
        let kernel = ScoringKernel::default();
        let ctx = ScoringContext::new(Strategy::New, Utc::now());
        let pre: Vec<PreScore> = pool.iter().map(|c| kernel.prescore(c, &ctx)).collect();
        let blocked: HashSet<ProductId> = [ProductId::from("p0"), ProductId::from("p3")].into();
        let picked = select(&kernel, &ctx, &pool, &pre, &blocked, 0.3, 5, 0);
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|(i, _)| !blocked.contains(&pool[*i].product.id)));
    }

    #[test]
    fn ties_prefer_earlier_creation_then_id() {
        let older = candidate("b", "x", "m1", 5.0, 0);
        let newer = candidate("a", "y", "m2", 1.0, 0);
        let detail = ScoreDetail {
            components: ScoreComponents::default(),
            raw: 0.5,
            score: 0.5,
            dominant: Component::Engagement,
            explanation: String::new(),
        };
        assert!(outranks((&older, &detail, true), (&newer, &detail, true)));
        let mut twin = older.clone();
        twin.product.id = ProductId::from("a");
        assert!(outranks((&twin, &detail, true), (&older, &detail, true)));
        assert!(outranks((&newer, &detail, true), (&older, &detail, false)));
    }

    #[test]
    fn offset_pages_honour_caps_on_their_own() {
        let mut pool: Vec<Candidate> = (0..10)
            .map(|i| candidate(&format!("hot{i}"), "ai", &format!("m{i}"), 1.0, 900))
            .collect();
        pool.extend((0..10).map(|i| candidate(&format!("x{i}"), &format!("c{i}"), &format!("n{i}"), 40.0, 2)));
        let picked = run(&pool, Strategy::Default, 10, 5);
        let page: Vec<&Candidate> = picked.iter().skip(5).map(|(i, _)| &pool[*i]).collect();
        assert_eq!(page.len(), 5);
        let ai = page.iter().filter(|c| c.product.category.as_str() == "ai").count();
        assert!(ai <= category_cap(5));
    }

    #[test]
    fn cache_keys_follow_the_surface() {
        let query = CandidateQuery::new();
        let user = UserPart::User(UserId::from("u1"));
        let plain = FeedRequest::new(Strategy::Trending, 10);
        assert_eq!(
            cache_key(Strategy::Trending, &plain, &user, &query),
            "recommendations:trending:u_u1:10:0"
        );
        let trending = plain.clone().on(Surface::Trending(TimeRange::Day));
        assert_eq!(cache_key(Strategy::Trending, &trending, &user, &query), "products:trending:1d:10");
        let similar = FeedRequest::new(Strategy::Similar, 5).with_source("p1");
        assert!(cache_key(Strategy::Similar, &similar, &UserPart::Anon, &query).starts_with("rec:similar:"));
    }

    proptest! {
        #[test]
        fn caps_hold_for_every_prefix(
            specs in proptest::collection::vec((0u8..4, 0u8..5, 0u32..60, 0u64..400), 3..40),
            target in 3usize..15,
        ) {
            let pool: Vec<Candidate> = specs
                .iter()
                .enumerate()
                .map(|(i, (cat, maker, age, up))| candidate(
                    &format!("p{i}"),
                    &format!("c{cat}"),
                    &format!("m{maker}"),
                    f64::from(*age) + 0.5,
                    *up,
                ))
                .collect();
            let picked = run(&pool, Strategy::Default, target, 0);
            let list: Vec<&Candidate> = picked.iter().map(|(i, _)| &pool[*i]).collect();
            for n in CAP_MIN_LEN..=list.len() {
                let prefix = &list[..n];
                let mut categories: HashMap<&str, usize> = HashMap::new();
                let mut makers: HashMap<&str, usize> = HashMap::new();
                for c in prefix {
                    *categories.entry(c.product.category.as_str()).or_default() += 1;
                    *makers.entry(c.product.maker.as_str()).or_default() += 1;
                }
                prop_assert!(categories.values().all(|&v| v <= category_cap(n)));
                prop_assert!(makers.values().all(|&v| v <= maker_cap(n)));
            }
            for (_, detail) in &picked {
                prop_assert!(detail.score >= 0.01 && detail.score <= 1.0);
            }
        }
    }
}
