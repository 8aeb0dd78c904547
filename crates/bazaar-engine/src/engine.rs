//! Engine façade
//!
//! [`Engine`] wires the store, fetcher, kernel, caches, bus and gate together
//! and exposes the public read and write operations. Reads degrade on
//! upstream trouble; writes fail loudly.
//!
//! Every write on a product runs inside that product's lane, so the store
//! commit and the resulting invalidation are published in commit order.

use crate::api::{
    BookmarkResponse, CommentReceipt, FeedPage, InteractionReceipt, InteractionRequest,
    InteractionType, ListQuery, ProductDetail, ProductListPage, ProductPatch, Served, TimeRange,
    UpvoteResponse,
};
use crate::assembler::{CachedFeed, FeedAssembler, FeedRequest, Surface};
use crate::config::{ConfigError, EngineConfig};
use crate::context::RequestContext;
use bazaar_bus::{product_tag, BusStats, InvalidationBus, WriteEvent};
use bazaar_cache::{keys, query_hash, CacheLayer, CacheStats, Deduplicator, Freshness, UserPart};
use bazaar_gate::{AbuseGate, Action, Admission, EndpointClass, GateRequest, RequestTiming};
use bazaar_model::{BazaarError, BazaarResult, ClientInfo, CycleId, Product, ProductId, UserId};
use bazaar_scoring::{ScoringKernel, Strategy, StrategyRegistry};
use bazaar_store::{
    Catalog, CandidateQuery, CandidateSource, CatalogFetcher, Clock, InteractionStore,
    SystemClock,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type Lane = Arc<Mutex<()>>;

/// Snapshot of the engine's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Ranked sections
    pub feeds: CacheStats,
    /// Product lists
    pub lists: CacheStats,
    /// Product details
    pub details: CacheStats,
    /// Push delivery
    pub bus: BusStats,
}

/// Recommendation and engagement engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<InteractionStore>,
    source: Arc<dyn CandidateSource>,
    feeds: Arc<FeedAssembler>,
    lists: Arc<CacheLayer<Arc<ProductListPage>>>,
    details: Arc<CacheLayer<Arc<ProductDetail>>>,
    bus: Arc<InvalidationBus>,
    gate: AbuseGate,
    registry: StrategyRegistry,
    lanes: DashMap<ProductId, Lane>,
}

impl Engine {
    /// Engine over `catalog` with the system clock and the in-memory fetcher
    ///
    /// # Errors
    /// Invalid configuration.
    pub fn new(config: EngineConfig, catalog: Arc<Catalog>) -> Result<Self, ConfigError> {
        Self::with_clock(config, catalog, Arc::new(SystemClock))
    }

    /// Engine over `catalog` with an explicit clock
    ///
    /// # Errors
    /// Invalid configuration.
    pub fn with_clock(
        config: EngineConfig,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let store = Arc::new(InteractionStore::with_clock(
            catalog,
            clock,
            config.store.clone(),
        ));
        let fetcher = CatalogFetcher::new(Arc::clone(&store))
            .with_recent_window(config.fetch.recent_window_days);
        Self::from_parts(config, store, Arc::new(fetcher))
    }

    /// Engine over an existing store and candidate source
    ///
    /// # Errors
    /// Invalid configuration.
    pub fn from_parts(
        config: EngineConfig,
        store: Arc<InteractionStore>,
        source: Arc<dyn CandidateSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let feed_cache: Arc<CacheLayer<CachedFeed>> = Arc::new(CacheLayer::new(
            config.cache.ttl.clone(),
            config.cache.capacity,
        ));
        let lists = Arc::new(CacheLayer::new(config.cache.ttl.clone(), config.cache.capacity));
        let details = Arc::new(CacheLayer::new(config.cache.ttl.clone(), config.cache.capacity));
        let dedup = Deduplicator::new(
            config.cache.max_cycles,
            Duration::from_secs(config.cache.cycle_ttl_secs),
        );

        let feeds = FeedAssembler::new(
            ScoringKernel::new(config.scoring.clone()),
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&feed_cache),
            dedup,
        )
        .with_fetch(config.fetch.clone())
        .with_upstream_timeout(config.timeouts.upstream());

        let bus = InvalidationBus::new(config.bus.clone())
            .with_purger(feed_cache)
            .with_purger(Arc::clone(&lists) as Arc<dyn bazaar_bus::CachePurger>)
            .with_purger(Arc::clone(&details) as Arc<dyn bazaar_bus::CachePurger>);
        let gate = AbuseGate::new(config.gate.clone())?;

        tracing::info!(
            products = store.catalog().len(),
            over_fetch = config.fetch.over_fetch_factor,
            "engine ready"
        );
        Ok(Self {
            config,
            store,
            source,
            feeds: Arc::new(feeds),
            lists,
            details,
            bus: Arc::new(bus),
            gate,
            registry: StrategyRegistry::recommendation_endpoints(),
            lanes: DashMap::new(),
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Interaction store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<InteractionStore> {
        &self.store
    }

    /// Product catalog
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        self.store.catalog()
    }

    /// Push fan-out
    #[inline]
    #[must_use]
    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    /// Abuse gate
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &AbuseGate {
        &self.gate
    }

    /// Feed assembler
    #[inline]
    #[must_use]
    pub fn feeds(&self) -> &Arc<FeedAssembler> {
        &self.feeds
    }

    /// Fresh request context with the configured deadline
    #[must_use]
    pub fn context(&self, client: ClientInfo) -> RequestContext {
        RequestContext::new(client, self.config.timeouts.request())
    }

    /// Start a page render whose sections must not repeat products
    #[must_use]
    pub fn begin_cycle(&self) -> CycleId {
        CycleId::new()
    }

    /// Release a page render's claims
    pub async fn end_cycle(&self, cycle: CycleId) {
        self.feeds.dedup().end_cycle(cycle).await;
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            feeds: self.feeds.cache().stats(),
            lists: self.lists.stats(),
            details: self.details.stats(),
            bus: self.bus.stats(),
        }
    }

    /// Throttle and classify a request, flagging bots on the context
    ///
    /// # Errors
    /// [`BazaarError::RateLimited`] when the class window is full.
    pub fn admit(
        &self,
        class: EndpointClass,
        ctx: &mut RequestContext,
        identifier: Option<&str>,
        timing: RequestTiming,
    ) -> BazaarResult<Admission> {
        let mut request = GateRequest::new(&ctx.client)
            .with_user(ctx.user.as_ref().map(|u| &u.id))
            .with_timing(timing);
        if let Some(identifier) = identifier {
            request = request.with_identifier(identifier);
        }
        let admission = self.gate.admit(class, &request)?;
        if admission.is_bot() {
            tracing::debug!(class = ?class, signals = ?admission.bot.signals, "automated caller");
            ctx.is_bot = true;
        }
        Ok(admission)
    }

    /// Gate an auth-like endpoint keyed by its body identifier
    ///
    /// The credential check itself lives outside the engine; this only
    /// applies the throttle and returns the window state for the response
    /// headers.
    ///
    /// # Errors
    /// [`BazaarError::RateLimited`] when the class window is full.
    pub fn guard(
        &self,
        class: EndpointClass,
        ctx: &mut RequestContext,
        identifier: Option<&str>,
    ) -> BazaarResult<Admission> {
        self.admit(class, ctx, identifier, RequestTiming::default())
    }

    // ---- reads ----

    /// `GET /products`
    ///
    /// # Errors
    /// Invalid paging, throttling, cancellation, or an unreachable store with
    /// nothing cached.
    pub async fn list_products(
        &self,
        ctx: &mut RequestContext,
        query: &ListQuery,
    ) -> BazaarResult<Served<ProductListPage>> {
        self.admit(EndpointClass::Generic, ctx, None, RequestTiming::default())?;
        if query.page == 0 || query.limit == 0 || query.limit > self.config.fetch.max_limit {
            return Err(BazaarError::validation(format!(
                "page must be at least 1 and limit within 1..={}",
                self.config.fetch.max_limit
            )));
        }
        if (query.page - 1).saturating_mul(query.limit) > self.config.fetch.max_offset {
            return Err(BazaarError::validation(format!(
                "offset beyond {}",
                self.config.fetch.max_offset
            )));
        }

        let mut candidates = CandidateQuery::new()
            .for_viewer(ctx.user_id().cloned(), ctx.is_admin())
            .sorted_by(query.sort)
            .with_tags(&query.tags);
        if let Some(status) = query.status.filter(|_| ctx.is_admin()) {
            candidates = candidates.with_status(status);
        }
        if let Some(category) = &query.category {
            candidates = candidates.with_category(category.clone());
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            candidates = candidates.with_search(search);
        }
        candidates.validate().map_err(BazaarError::Validation)?;

        let key = keys::products_list(
            &UserPart::from_user(ctx.reader()),
            query.page,
            query.limit,
            &query_hash(&candidates.fingerprint()),
        );
        let source = Arc::clone(&self.source);
        let upstream = self.config.timeouts.upstream();
        let (page, limit) = (query.page, query.limit);
        let load = move || async move {
            let seen = (page as usize).saturating_mul(limit as usize);
            let fetched = fetch_bounded(upstream, source.fetch(&candidates, seen + 1)).await?;
            let has_more = fetched.len() > seen;
            let products = fetched
                .into_iter()
                .skip(seen - limit as usize)
                .take(limit as usize)
                .collect();
            Ok::<_, BazaarError>(Arc::new(ProductListPage {
                products,
                page,
                limit,
                has_more,
            }))
        };

        let result = self
            .bounded(ctx, self.lists.get_or_load(&key, &[], load))
            .await;
        match result {
            Ok((page, freshness)) => Ok(Served::new((*page).clone(), freshness)),
            Err(err) if is_degradable(&err) => match self.lists.last_known(&key) {
                Some(page) => {
                    tracing::warn!(error = %err, key = %key, "serving last known product list");
                    Ok(Served::new((*page).clone(), Freshness::Stale))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// `GET /products/{slug}`
    ///
    /// # Errors
    /// Unknown or hidden product, throttling, cancellation, or an unreachable
    /// store with nothing cached.
    pub async fn product_detail(
        &self,
        ctx: &mut RequestContext,
        slug: &str,
    ) -> BazaarResult<Served<ProductDetail>> {
        self.admit(EndpointClass::Generic, ctx, None, RequestTiming::default())?;
        let product = self.product_by_slug(slug)?;
        self.gate.authorize(Action::Read, &product, &ctx.actor())?;

        let reader = ctx.reader().cloned();
        let key = keys::product_detail(slug, &UserPart::from_user(reader.as_ref()));
        let tags = vec![product_tag(&product.id)];
        let source = Arc::clone(&self.source);
        let store = Arc::clone(&self.store);
        let upstream = self.config.timeouts.upstream();
        let slug_owned = slug.to_string();
        let load = move || async move {
            let candidate = fetch_bounded(upstream, source.fetch_by_slug(&slug_owned))
                .await?
                .ok_or_else(|| BazaarError::not_found(format!("product {slug_owned}")))?;
            let user_interactions = reader.map(|u| store.user_state(&u, &candidate.product.id));
            Ok::<_, BazaarError>(Arc::new(ProductDetail {
                product: candidate,
                user_interactions,
            }))
        };

        let result = self
            .bounded(ctx, self.details.get_or_load(&key, &tags, load))
            .await;
        match result {
            Ok((detail, freshness)) => Ok(Served::new((*detail).clone(), freshness)),
            Err(err) if is_degradable(&err) => match self.details.last_known(&key) {
                Some(detail) => {
                    tracing::warn!(error = %err, key = %key, "serving last known detail");
                    Ok(Served::new((*detail).clone(), Freshness::Stale))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// `GET /products/trending`
    ///
    /// # Errors
    /// Invalid limit, throttling or cancellation.
    pub async fn trending(
        &self,
        ctx: &mut RequestContext,
        range: TimeRange,
        limit: u32,
    ) -> BazaarResult<Served<FeedPage>> {
        self.admit(EndpointClass::Recommendation, ctx, None, RequestTiming::default())?;
        let request = FeedRequest::new(Strategy::Trending, limit).on(Surface::Trending(range));
        self.bounded(ctx, self.feeds.assemble(ctx, &request)).await
    }

    /// `GET /recommendations/{strategy}`
    ///
    /// # Errors
    /// Unknown strategy, invalid paging, throttling or cancellation.
    pub async fn recommendations(
        &self,
        ctx: &mut RequestContext,
        strategy: &str,
        limit: u32,
        offset: u32,
    ) -> BazaarResult<Served<FeedPage>> {
        let strategy = self
            .registry
            .resolve(strategy)
            .map_err(|err| BazaarError::validation(err.to_string()))?;
        self.admit(EndpointClass::Recommendation, ctx, None, RequestTiming::default())?;
        let request = FeedRequest::new(strategy, limit).with_offset(offset);
        self.bounded(ctx, self.feeds.assemble(ctx, &request)).await
    }

    /// Landing feed: personalized, plain feed or trending depending on what
    /// is known about the caller
    ///
    /// # Errors
    /// Invalid limit, throttling or cancellation.
    pub async fn home(&self, ctx: &mut RequestContext, limit: u32) -> BazaarResult<Served<FeedPage>> {
        self.admit(EndpointClass::Recommendation, ctx, None, RequestTiming::default())?;
        let has_preferences = ctx
            .reader()
            .and_then(|id| self.catalog().user(id))
            .is_some_and(|user| !user.preferences.is_empty());
        let strategy = self
            .registry
            .select_for_home(ctx.reader().is_some(), has_preferences);
        let request = FeedRequest::new(strategy, limit);
        self.bounded(ctx, self.feeds.assemble(ctx, &request)).await
    }

    /// One arbitrary section, typically rendered as part of a page cycle
    ///
    /// # Errors
    /// Invalid request, throttling or cancellation.
    pub async fn section(
        &self,
        ctx: &mut RequestContext,
        request: &FeedRequest,
    ) -> BazaarResult<Served<FeedPage>> {
        self.admit(EndpointClass::Recommendation, ctx, None, RequestTiming::default())?;
        self.bounded(ctx, self.feeds.assemble(ctx, request)).await
    }

    /// `GET /search`
    ///
    /// # Errors
    /// Empty query, invalid paging, throttling or cancellation.
    pub async fn search(
        &self,
        ctx: &mut RequestContext,
        text: &str,
        page: u32,
        limit: u32,
    ) -> BazaarResult<Served<FeedPage>> {
        self.admit(EndpointClass::Search, ctx, None, RequestTiming::default())?;
        if page == 0 {
            return Err(BazaarError::validation("page must be at least 1"));
        }
        let request = FeedRequest::new(Strategy::Search, limit)
            .with_offset((page - 1).saturating_mul(limit))
            .with_search(text)
            .on(Surface::Search { page });
        self.bounded(ctx, self.feeds.assemble(ctx, &request)).await
    }

    // ---- writes ----

    /// `POST /products/{slug}/upvote`
    ///
    /// # Errors
    /// Anonymous caller, throttling, unknown product or a policy refusal.
    pub fn toggle_upvote(&self, ctx: &mut RequestContext, slug: &str) -> BazaarResult<UpvoteResponse> {
        let (user, product) = self.prepare_write(ctx, slug, Action::Upvote)?;
        let outcome = self.in_lane(&product.id, || {
            let outcome = self.store.toggle_upvote(&user, &product.id)?;
            self.bus.apply(&WriteEvent::UpvoteToggled {
                product: product.id.clone(),
                slug: product.slug.clone(),
                user: user.clone(),
                outcome,
            });
            Ok::<_, BazaarError>(outcome)
        })?;
        metrics::counter!("bazaar_writes_total", "kind" => "upvote").increment(1);
        tracing::info!(product = %product.id, user = %user, upvoted = outcome.now_active, count = outcome.new_count, "upvote toggled");
        Ok(UpvoteResponse {
            success: true,
            upvoted: outcome.now_active,
            upvote_count: outcome.new_count,
        })
    }

    /// `POST /products/{slug}/bookmark`
    ///
    /// # Errors
    /// Anonymous caller, throttling, unknown product or a policy refusal.
    pub fn toggle_bookmark(
        &self,
        ctx: &mut RequestContext,
        slug: &str,
    ) -> BazaarResult<BookmarkResponse> {
        let (user, product) = self.prepare_write(ctx, slug, Action::Bookmark)?;
        let outcome = self.in_lane(&product.id, || {
            let outcome = self.store.toggle_bookmark(&user, &product.id)?;
            self.bus.apply(&WriteEvent::BookmarkToggled {
                product: product.id.clone(),
                slug: product.slug.clone(),
                user: user.clone(),
                outcome,
            });
            Ok::<_, BazaarError>(outcome)
        })?;
        metrics::counter!("bazaar_writes_total", "kind" => "bookmark").increment(1);
        tracing::info!(product = %product.id, user = %user, bookmarked = outcome.now_active, count = outcome.new_count, "bookmark toggled");
        Ok(BookmarkResponse {
            success: true,
            bookmarked: outcome.now_active,
            bookmark_count: outcome.new_count,
        })
    }

    /// `POST /interactions`
    ///
    /// Bots are accepted but their views move no counter. Impressions are
    /// acknowledged without a counter change.
    ///
    /// # Errors
    /// Throttling, unknown product or a visibility refusal.
    pub fn record_interaction(
        &self,
        ctx: &mut RequestContext,
        request: &InteractionRequest,
    ) -> BazaarResult<InteractionReceipt> {
        let timing = RequestTiming {
            service_time: request
                .metadata
                .map(|signals| Duration::from_millis(signals.duration_ms)),
            signals: request.metadata,
        };
        self.admit(EndpointClass::View, ctx, None, timing)?;
        let product = self
            .catalog()
            .product(&request.product_id)
            .ok_or_else(|| BazaarError::not_found(format!("product {}", request.product_id)))?;
        self.gate.authorize(Action::View, &product, &ctx.actor())?;

        let (counters, counted) = match request.kind {
            InteractionType::Impression => (self.store.product_counters(&product.id), false),
            InteractionType::View => {
                let metadata = request.to_metadata(ctx.client.session_id.as_deref(), ctx.is_bot);
                let own_view = ctx.user_id().is_some_and(|u| product.is_made_by(u));
                let counters = self.store.record_view(ctx.user_id(), &product.id, metadata)?;
                (counters, !ctx.is_bot && !own_view)
            }
        };
        metrics::counter!(
            "bazaar_interactions_total",
            "type" => if request.kind == InteractionType::View { "view" } else { "impression" },
            "bot" => if ctx.is_bot { "true" } else { "false" }
        )
        .increment(1);
        Ok(InteractionReceipt {
            success: true,
            counted,
            is_bot: ctx.is_bot,
            view_count: counters.view_count,
            unique_viewer_count: counters.unique_viewer_count,
        })
    }

    /// Count a new comment on a product
    ///
    /// # Errors
    /// Anonymous caller, throttling, unknown product or a policy refusal.
    pub fn add_comment(&self, ctx: &mut RequestContext, slug: &str) -> BazaarResult<CommentReceipt> {
        let (user, product) = self.prepare_write(ctx, slug, Action::Comment)?;
        let (comment_id, counters) = self.in_lane(&product.id, || {
            let (id, counters) = self.store.record_comment(&user, &product.id)?;
            self.bus.apply(&WriteEvent::CommentsChanged {
                product: product.id.clone(),
                slug: product.slug.clone(),
                count: counters.comment_count,
            });
            Ok::<_, BazaarError>((id, counters))
        })?;
        Ok(CommentReceipt {
            comment_id,
            comment_count: counters.comment_count,
        })
    }

    /// Uncount a comment
    ///
    /// # Errors
    /// Anonymous caller, throttling, unknown product or comment, or a policy
    /// refusal.
    pub fn remove_comment(
        &self,
        ctx: &mut RequestContext,
        slug: &str,
        comment: u64,
    ) -> BazaarResult<CommentReceipt> {
        let (_, product) = self.prepare_write(ctx, slug, Action::Comment)?;
        let counters = self.in_lane(&product.id, || {
            let counters = self.store.remove_comment(&product.id, comment)?;
            self.bus.apply(&WriteEvent::CommentsChanged {
                product: product.id.clone(),
                slug: product.slug.clone(),
                count: counters.comment_count,
            });
            Ok::<_, BazaarError>(counters)
        })?;
        Ok(CommentReceipt {
            comment_id: comment,
            comment_count: counters.comment_count,
        })
    }

    /// Publish a new product made by the caller
    ///
    /// # Errors
    /// Anonymous caller, a product attributed to someone else by a
    /// non-admin, or a taken id or slug.
    pub fn create_product(&self, ctx: &mut RequestContext, product: Product) -> BazaarResult<Product> {
        let user = ctx.user_id().cloned().ok_or(BazaarError::Unauthenticated)?;
        self.admit(EndpointClass::Generic, ctx, None, RequestTiming::default())?;
        if !product.is_made_by(&user) && !ctx.is_admin() {
            return Err(BazaarError::forbidden("products are created by their maker"));
        }
        self.catalog().insert_product(product.clone())?;
        self.bus.apply(&WriteEvent::ProductCreated {
            product: product.id.clone(),
            slug: product.slug.clone(),
        });
        tracing::info!(product = %product.id, slug = %product.slug, "product created");
        Ok(product)
    }

    /// Change product fields
    ///
    /// # Errors
    /// Anonymous caller, empty patch, caller neither maker nor admin, a
    /// locked product, a lock change by a non-admin, or a taken slug.
    pub fn update_product(
        &self,
        ctx: &mut RequestContext,
        slug: &str,
        patch: &ProductPatch,
    ) -> BazaarResult<Product> {
        if patch.is_empty() {
            return Err(BazaarError::validation("nothing to update"));
        }
        let (_, product) = self.prepare_owner_write(ctx, slug, Action::Update)?;
        if patch.locked.is_some() && !ctx.is_admin() {
            return Err(BazaarError::forbidden("only admins can lock products"));
        }
        if patch.slug.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(BazaarError::validation("slug cannot be empty"));
        }

        let updated = self.in_lane(&product.id, || {
            let updated = self.catalog().update_product(&product.id, |p| apply_patch(p, patch))?;
            self.bus.apply(&WriteEvent::ProductUpdated {
                product: product.id.clone(),
                old_slug: product.slug.clone(),
                slug: updated.slug.clone(),
                updates: patch.updates(),
            });
            Ok::<_, BazaarError>(updated)
        })?;
        tracing::info!(product = %updated.id, slug = %updated.slug, "product updated");
        Ok(updated)
    }

    /// Announce a gallery change
    ///
    /// # Errors
    /// Anonymous caller, caller neither maker nor admin, or a locked product.
    pub fn gallery_changed(&self, ctx: &mut RequestContext, slug: &str) -> BazaarResult<()> {
        let (_, product) = self.prepare_owner_write(ctx, slug, Action::Gallery)?;
        self.in_lane(&product.id, || {
            self.bus.apply(&WriteEvent::GalleryChanged {
                product: product.id.clone(),
                slug: product.slug.clone(),
            });
        });
        Ok(())
    }

    /// Remove a product and its interaction state
    ///
    /// # Errors
    /// Anonymous caller, caller neither maker nor admin, or a locked product.
    pub fn delete_product(&self, ctx: &mut RequestContext, slug: &str) -> BazaarResult<Product> {
        let (_, product) = self.prepare_owner_write(ctx, slug, Action::Delete)?;
        let removed = self.in_lane(&product.id, || {
            let removed = self.catalog().remove_product(&product.id)?;
            self.store.forget_product(&product.id);
            self.bus.apply(&WriteEvent::ProductDeleted {
                product: product.id.clone(),
                slug: product.slug.clone(),
            });
            Ok::<_, BazaarError>(removed)
        })?;
        self.lanes.remove(&product.id);
        tracing::info!(product = %removed.id, "product deleted");
        Ok(removed)
    }

    // ---- helpers ----

    fn product_by_slug(&self, slug: &str) -> BazaarResult<Product> {
        self.catalog()
            .product_by_slug(slug)
            .ok_or_else(|| BazaarError::not_found(format!("product {slug}")))
    }

    /// Authenticated, admitted and authorized write on `slug`
    fn prepare_write(
        &self,
        ctx: &mut RequestContext,
        slug: &str,
        action: Action,
    ) -> BazaarResult<(UserId, Product)> {
        let user = ctx.user_id().cloned().ok_or(BazaarError::Unauthenticated)?;
        self.admit(EndpointClass::Generic, ctx, None, RequestTiming::default())?;
        let product = self.product_by_slug(slug)?;
        self.gate.authorize(action, &product, &ctx.actor())?;
        Ok((user, product))
    }

    fn prepare_owner_write(
        &self,
        ctx: &mut RequestContext,
        slug: &str,
        action: Action,
    ) -> BazaarResult<(UserId, Product)> {
        let (user, product) = self.prepare_write(ctx, slug, action)?;
        if !product.is_made_by(&user) && !ctx.is_admin() {
            return Err(BazaarError::forbidden(format!(
                "only the maker can {} this product",
                action.as_str()
            )));
        }
        Ok((user, product))
    }

    fn in_lane<T>(&self, product: &ProductId, write: impl FnOnce() -> T) -> T {
        let lane = Arc::clone(self.lanes.entry(product.clone()).or_default().value());
        let _held = lane.lock();
        write()
    }

    /// Run a read under the request's deadline and cancellation
    async fn bounded<T, F>(&self, ctx: &RequestContext, read: F) -> BazaarResult<T>
    where
        F: Future<Output = BazaarResult<T>>,
    {
        if ctx.is_expired() {
            return Err(BazaarError::timeout(self.config.timeouts.request()));
        }
        let budget = ctx.remaining();
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(BazaarError::Cancelled),
            result = tokio::time::timeout(budget, read) => {
                result.unwrap_or_else(|_| Err(BazaarError::timeout(budget)))
            }
        }
    }
}

fn is_degradable(err: &BazaarError) -> bool {
    matches!(err, BazaarError::Upstream(_) | BazaarError::Timeout { .. })
}

async fn fetch_bounded<T, F>(upstream: Duration, fetch: F) -> BazaarResult<T>
where
    F: Future<Output = bazaar_store::StoreResult<T>>,
{
    match tokio::time::timeout(upstream, fetch).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            tracing::warn!(after_ms = upstream.as_millis() as u64, "candidate fetch timed out");
            Err(BazaarError::timeout(upstream))
        }
    }
}

fn apply_patch(product: &mut Product, patch: &ProductPatch) {
    if let Some(name) = &patch.name {
        product.name.clone_from(name);
    }
    if let Some(tagline) = &patch.tagline {
        product.tagline.clone_from(tagline);
    }
    if let Some(slug) = &patch.slug {
        product.slug = slug.trim().to_string();
    }
    if let Some(tags) = &patch.tags {
        product.tags = tags.iter().map(|t| t.trim().to_lowercase()).collect();
    }
    if let Some(status) = patch.status {
        product.status = status;
    }
    if let Some(visibility) = patch.visibility {
        product.visibility = visibility;
    }
    if let Some(price) = patch.price {
        product.price = Some(price);
    }
    if let Some(locked) = patch.locked {
        product.locked = locked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserContext;
    use bazaar_model::{CategoryId, ProductStatus};

    fn browser() -> ClientInfo {
        ClientInfo::new()
            .with_ip("198.51.100.7".parse().unwrap())
            .with_header("User-Agent", "Mozilla/5.0 Firefox/130.0")
            .with_header("Accept", "*/*")
            .with_header("Accept-Language", "en")
            .with_header("Accept-Encoding", "gzip")
    }

    fn engine() -> Engine {
        let catalog = Arc::new(Catalog::new());
        for (id, slug, maker) in [("p1", "notes", "maker"), ("p2", "board", "other")] {
            catalog
                .insert_product(
                    Product::new(ProductId::from(id), slug, UserId::from(maker), CategoryId::from("tools"))
                        .with_status(ProductStatus::Published),
                )
                .unwrap();
        }
        Engine::new(EngineConfig::default(), catalog).unwrap()
    }

    fn as_user(engine: &Engine, user: &str) -> RequestContext {
        engine.context(browser()).with_user(UserContext::new(user))
    }

    #[tokio::test]
    async fn toggles_need_a_user() {
        let engine = engine();
        let mut ctx = engine.context(browser());
        let err = engine.toggle_upvote(&mut ctx, "notes").unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[tokio::test]
    async fn makers_cannot_upvote_their_products() {
        let engine = engine();
        let mut ctx = as_user(&engine, "maker");
        let err = engine.toggle_upvote(&mut ctx, "notes").unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert_eq!(
            engine.store().product_counters(&ProductId::from("p1")).upvote_count,
            0
        );
    }

    #[tokio::test]
    async fn double_toggle_restores_counters() {
        let engine = engine();
        let mut ctx = as_user(&engine, "ada");
        let first = engine.toggle_bookmark(&mut ctx, "notes").unwrap();
        assert!(first.bookmarked);
        assert_eq!(first.bookmark_count, 1);
        let second = engine.toggle_bookmark(&mut ctx, "notes").unwrap();
        assert!(!second.bookmarked);
        assert_eq!(second.bookmark_count, 0);
    }

    #[tokio::test]
    async fn detail_reflects_the_caller_toggles() {
        let engine = engine();
        let mut ctx = as_user(&engine, "ada");
        engine.toggle_upvote(&mut ctx, "notes").unwrap();
        let detail = engine.product_detail(&mut ctx, "notes").await.unwrap().value;
        assert_eq!(detail.product.counters.upvote_count, 1);
        assert!(detail.user_interactions.is_some_and(|s| s.upvoted));
    }

    #[tokio::test]
    async fn unknown_strategy_is_a_validation_error() {
        let engine = engine();
        let mut ctx = engine.context(browser());
        let err = engine
            .recommendations(&mut ctx, "astrology", 10, 0)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn lock_changes_are_admin_only() {
        let engine = engine();
        let patch = ProductPatch {
            locked: Some(true),
            ..ProductPatch::default()
        };
        let mut maker = as_user(&engine, "maker");
        assert_eq!(
            engine.update_product(&mut maker, "notes", &patch).unwrap_err().http_status(),
            403
        );
        let mut admin = engine.context(browser()).with_user(UserContext::new("root").admin());
        assert!(engine.update_product(&mut admin, "notes", &patch).unwrap().locked);

        let rename = ProductPatch {
            name: Some("Notes".into()),
            ..ProductPatch::default()
        };
        assert_eq!(
            engine.update_product(&mut maker, "notes", &rename).unwrap_err().http_status(),
            403
        );
    }

    #[tokio::test]
    async fn slug_changes_move_the_detail() {
        let engine = engine();
        let mut maker = as_user(&engine, "maker");
        let patch = ProductPatch {
            slug: Some("notes-pro".into()),
            ..ProductPatch::default()
        };
        engine.update_product(&mut maker, "notes", &patch).unwrap();
        assert!(engine.product_detail(&mut maker, "notes-pro").await.is_ok());
        assert_eq!(
            engine.product_detail(&mut maker, "notes").await.unwrap_err().http_status(),
            404
        );
    }

    #[tokio::test]
    async fn others_cannot_delete() {
        let engine = engine();
        let mut ctx = as_user(&engine, "ada");
        assert_eq!(engine.delete_product(&mut ctx, "notes").unwrap_err().http_status(), 403);
        let mut maker = as_user(&engine, "maker");
        engine.delete_product(&mut maker, "notes").unwrap();
        assert!(engine.catalog().product_by_slug("notes").is_none());
    }

    #[tokio::test]
    async fn comments_keep_the_counter() {
        let engine = engine();
        let mut ctx = as_user(&engine, "ada");
        let first = engine.add_comment(&mut ctx, "board").unwrap();
        engine.add_comment(&mut ctx, "board").unwrap();
        let after = engine.remove_comment(&mut ctx, "board", first.comment_id).unwrap();
        assert_eq!(after.comment_count, 1);
        assert_eq!(
            engine.remove_comment(&mut ctx, "board", 99).unwrap_err().http_status(),
            404
        );
    }

    #[tokio::test]
    async fn impressions_move_nothing() {
        let engine = engine();
        let mut ctx = as_user(&engine, "ada");
        let mut request = InteractionRequest::view("p2");
        request.kind = InteractionType::Impression;
        let receipt = engine.record_interaction(&mut ctx, &request).unwrap();
        assert!(!receipt.counted);
        assert_eq!(receipt.view_count, 0);
    }

    #[tokio::test]
    async fn cancelled_reads_stop() {
        let engine = engine();
        let mut ctx = engine.context(browser());
        ctx.cancel.cancel();
        let err = engine
            .list_products(&mut ctx, &ListQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::Cancelled));
    }
}
