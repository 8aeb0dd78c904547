//! Seeded workload simulator
//!
//! Builds a synthetic catalog, replays a random mix of reads and writes
//! against a real [`Engine`] and checks the engine's guarantees after every
//! step: counters match the toggles that succeeded, ranked pages respect the
//! diversity caps and score bounds, and sections of one page render never
//! share a product.

use crate::api::{FeedPage, InteractionRequest, TimeRange};
use crate::config::EngineConfig;
use crate::context::{RequestContext, UserContext};
use crate::engine::{Engine, EngineStats};
use bazaar_model::{
    BazaarError, ClientInfo, Preferences, Product, ProductId, ProductStatus, User, UserId,
    ViewSignals,
};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

const CATEGORIES: [&str; 6] = ["tools", "design", "ai", "finance", "health", "games"];
const TAGS: [&str; 10] = [
    "productivity", "open-source", "saas", "mobile", "privacy", "analytics", "writing",
    "automation", "social", "education",
];
const HOME_SECTIONS: [&str; 3] = ["trending", "new", "personalized"];

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Catalog size
    pub products: usize,
    /// Distinct users
    pub users: usize,
    /// Operations to replay
    pub operations: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            products: 120,
            users: 40,
            operations: 2_000,
        }
    }
}

/// Broken guarantee found during a run
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// Stored counter differs from the replayed toggles
    CounterMismatch {
        /// Product
        product: ProductId,
        /// Counter name
        counter: &'static str,
        /// Replayed value
        expected: u64,
        /// Stored value
        actual: u64,
    },
    /// A page held too many items of one category or maker
    DiversityBreach {
        /// Strategy that produced the page
        strategy: String,
        /// Page length
        len: usize,
    },
    /// Final score outside `[0.01, 1]`
    ScoreOutOfBounds {
        /// Product
        product: ProductId,
        /// Offending score
        score: f64,
    },
    /// Two sections of one page render served the same product
    DuplicateAcrossSections {
        /// Product
        product: ProductId,
    },
}

/// Operation tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// Upvote toggles accepted
    pub upvotes: u64,
    /// Bookmark toggles accepted
    pub bookmarks: u64,
    /// Views recorded
    pub views: u64,
    /// Views from automated callers
    pub bot_views: u64,
    /// Feed pages served
    pub feeds: u64,
    /// Multi-section page renders
    pub page_renders: u64,
    /// Writes refused by policy
    pub refused: u64,
    /// Requests throttled
    pub throttled: u64,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Parameters used
    pub config: SimulationConfig,
    /// Tallies
    pub stats: SimulationStats,
    /// Engine counters at the end of the run
    pub engine: EngineStats,
    /// Broken guarantees
    pub violations: Vec<Violation>,
}

impl SimulationReport {
    /// Whether every guarantee held
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let s = &self.stats;
        let _ = writeln!(out, "=== ProductBazar Simulation ===\n");
        let _ = writeln!(out, "Seed: {}", self.config.seed);
        let _ = writeln!(
            out,
            "Catalog: {} products, {} users",
            self.config.products, self.config.users
        );
        let _ = writeln!(out, "Operations: {}", self.config.operations);
        let _ = writeln!(out, "Upvotes: {}  Bookmarks: {}", s.upvotes, s.bookmarks);
        let _ = writeln!(out, "Views: {} ({} from bots)", s.views, s.bot_views);
        let _ = writeln!(out, "Feeds: {}  Page renders: {}", s.feeds, s.page_renders);
        let _ = writeln!(out, "Refused: {}  Throttled: {}", s.refused, s.throttled);

        let feeds = self.engine.feeds;
        let _ = writeln!(
            out,
            "Feed cache: {} fresh, {} stale, {} misses, {} refills",
            feeds.fresh_hits, feeds.stale_hits, feeds.misses, feeds.refills
        );
        let bus = self.engine.bus;
        let _ = writeln!(
            out,
            "Bus: {} delivered, {} retried, {} dropped",
            bus.delivered,
            bus.retried,
            bus.failed + bus.dropped_saturated
        );
        let _ = writeln!(out, "Violations: {}", self.violations.len());
        for (i, violation) in self.violations.iter().enumerate() {
            let _ = writeln!(out, "  {}. {violation:?}", i + 1);
        }
        let _ = writeln!(
            out,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        out
    }
}

/// Replay a seeded workload and collect violations
///
/// # Errors
/// Engine construction or catalog seeding failures.
pub async fn run_simulation(
    config: SimulationConfig,
    engine_config: EngineConfig,
) -> Result<SimulationReport, BazaarError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let catalog = Arc::new(bazaar_store::Catalog::new());
    let users = seed_users(&catalog, &mut rng, config.users);
    let products = seed_products(&catalog, &mut rng, config.products, &users)?;
    let engine = Arc::new(Engine::new(engine_config, catalog)?);

    let mut stats = SimulationStats::default();
    let mut violations = Vec::new();
    let mut upvoted: HashSet<(UserId, ProductId)> = HashSet::new();
    let mut bookmarked: HashSet<(UserId, ProductId)> = HashSet::new();

    for step in 0..config.operations {
        let user = users[rng.random_range(0..users.len())].clone();
        let product = &products[rng.random_range(0..products.len())];
        let mut ctx = engine
            .context(browser(step))
            .with_user(UserContext::new(user.clone()));

        match rng.random_range(0..100u32) {
            0..=24 => {
                let outcome = engine.toggle_upvote(&mut ctx, &product.slug);
                if let Some(resp) = tally(outcome, &mut stats) {
                    stats.upvotes += 1;
                    flip(&mut upvoted, &user, &product.id, resp.upvoted);
                }
            }
            25..=39 => {
                let outcome = engine.toggle_bookmark(&mut ctx, &product.slug);
                if let Some(resp) = tally(outcome, &mut stats) {
                    stats.bookmarks += 1;
                    flip(&mut bookmarked, &user, &product.id, resp.bookmarked);
                }
            }
            40..=69 => {
                let bot = rng.random_bool(0.1);
                let mut ctx = if bot {
                    engine.context(googlebot())
                } else {
                    ctx
                };
                let request = InteractionRequest::view(product.id.clone())
                    .from_source("feed", rng.random_range(0..20))
                    .with_signals(ViewSignals {
                        duration_ms: rng.random_range(500..60_000),
                        scrolls: rng.random_range(0..20),
                        mouse_moves: rng.random_range(1..200),
                        key_events: 0,
                    });
                if let Some(receipt) = tally(engine.record_interaction(&mut ctx, &request), &mut stats)
                {
                    stats.views += 1;
                    if receipt.is_bot {
                        stats.bot_views += 1;
                    }
                }
            }
            70..=89 => {
                let strategy = ["trending", "new", "personalized", "feed", "interests", "collaborative"]
                    [rng.random_range(0..6)];
                let feed = engine.recommendations(&mut ctx, strategy, 10, 0).await;
                if let Some(served) = tally(feed, &mut stats) {
                    stats.feeds += 1;
                    check_page(&served.value, &mut violations);
                }
                if rng.random_bool(0.2) {
                    let trending = engine.trending(&mut ctx, TimeRange::Week, 8).await;
                    if let Some(served) = tally(trending, &mut stats) {
                        stats.feeds += 1;
                        check_page(&served.value, &mut violations);
                    }
                }
            }
            _ => {
                render_page(&engine, &user, &mut stats, &mut violations).await;
            }
        }
    }

    for product in &products {
        let counters = engine.store().product_counters(&product.id);
        let expected_up = upvoted.iter().filter(|(_, p)| p == &product.id).count() as u64;
        let expected_bm = bookmarked.iter().filter(|(_, p)| p == &product.id).count() as u64;
        for (counter, expected, actual) in [
            ("upvoteCount", expected_up, counters.upvote_count),
            ("bookmarkCount", expected_bm, counters.bookmark_count),
        ] {
            if expected != actual {
                violations.push(Violation::CounterMismatch {
                    product: product.id.clone(),
                    counter,
                    expected,
                    actual,
                });
            }
        }
    }

    let report = SimulationReport {
        config,
        stats,
        engine: engine.stats(),
        violations,
    };
    tracing::info!(
        passed = report.passed(),
        violations = report.violations.len(),
        "simulation finished"
    );
    Ok(report)
}

/// Three sections of one page render, assembled concurrently
async fn render_page(
    engine: &Arc<Engine>,
    user: &UserId,
    stats: &mut SimulationStats,
    violations: &mut Vec<Violation>,
) {
    let cycle = engine.begin_cycle();
    let sections = HOME_SECTIONS.into_iter().enumerate().map(|(i, strategy)| {
        let engine = Arc::clone(engine);
        let mut ctx: RequestContext = engine
            .context(browser(i as u64))
            .with_user(UserContext::new(user.clone()))
            .with_cycle(cycle);
        async move { engine.recommendations(&mut ctx, strategy, 6, 0).await }
    });
    let pages = join_all(sections).await;
    engine.end_cycle(cycle).await;

    stats.page_renders += 1;
    let mut seen = HashSet::new();
    for page in pages {
        let Some(served) = tally(page, stats) else {
            continue;
        };
        check_page(&served.value, violations);
        for id in served.value.ids() {
            if !seen.insert(id.clone()) {
                violations.push(Violation::DuplicateAcrossSections { product: id });
            }
        }
    }
}

fn tally<T>(outcome: Result<T, BazaarError>, stats: &mut SimulationStats) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(BazaarError::RateLimited { .. }) => {
            stats.throttled += 1;
            None
        }
        Err(err) => {
            tracing::debug!(error = %err, "simulated request refused");
            stats.refused += 1;
            None
        }
    }
}

fn flip(set: &mut HashSet<(UserId, ProductId)>, user: &UserId, product: &ProductId, active: bool) {
    let key = (user.clone(), product.clone());
    if active {
        set.insert(key);
    } else {
        set.remove(&key);
    }
}

fn check_page(page: &FeedPage, violations: &mut Vec<Violation>) {
    for item in &page.items {
        if !(0.01..=1.0).contains(&item.score) {
            violations.push(Violation::ScoreOutOfBounds {
                product: item.product.product.id.clone(),
                score: item.score,
            });
        }
    }
    let n = page.items.len();
    if n < 3 {
        return;
    }
    let mut categories: HashMap<_, usize> = HashMap::new();
    let mut makers: HashMap<_, usize> = HashMap::new();
    for item in &page.items {
        *categories.entry(&item.product.product.category).or_default() += 1;
        *makers.entry(&item.product.product.maker).or_default() += 1;
    }
    let category_cap = (3 * n).div_ceil(5);
    let maker_cap = (2 * n).div_ceil(5);
    if categories.values().any(|&c| c > category_cap) || makers.values().any(|&c| c > maker_cap) {
        violations.push(Violation::DiversityBreach {
            strategy: page.strategy.to_string(),
            len: n,
        });
    }
}

fn seed_users(catalog: &bazaar_store::Catalog, rng: &mut StdRng, count: usize) -> Vec<UserId> {
    (0..count.max(1))
        .map(|i| {
            let id = UserId::new(format!("user-{i}"));
            let mut preferences = Preferences::new();
            if rng.random_bool(0.6) {
                preferences = preferences
                    .with_category(CATEGORIES[rng.random_range(0..CATEGORIES.len())], 1.0)
                    .with_tag(TAGS[rng.random_range(0..TAGS.len())], 0.5);
            }
            catalog.upsert_user(User::new(id.clone(), format!("User {i}")).with_preferences(preferences));
            id
        })
        .collect()
}

fn seed_products(
    catalog: &bazaar_store::Catalog,
    rng: &mut StdRng,
    count: usize,
    makers: &[UserId],
) -> Result<Vec<Product>, BazaarError> {
    let now = Utc::now();
    let mut products = Vec::with_capacity(count);
    for i in 0..count.max(1) {
        let category = CATEGORIES[rng.random_range(0..CATEGORIES.len())];
        let tags = [
            TAGS[rng.random_range(0..TAGS.len())],
            TAGS[rng.random_range(0..TAGS.len())],
        ];
        let status = if rng.random_bool(0.9) {
            ProductStatus::Published
        } else {
            ProductStatus::Draft
        };
        let product = Product::new(
            ProductId::new(format!("prod-{i}")),
            format!("product-{i}"),
            makers[rng.random_range(0..makers.len())].clone(),
            category,
        )
        .with_name(format!("Product {i}"))
        .with_category_name(category)
        .with_tags(tags)
        .with_status(status)
        .created_at(now - ChronoDuration::days(rng.random_range(0..90)));
        catalog.insert_product(product.clone())?;
        products.push(product);
    }
    Ok(products)
}

fn browser(step: u64) -> ClientInfo {
    let ip = std::net::Ipv4Addr::new(198, 51, 100, (step % 250) as u8 + 1);
    ClientInfo::new()
        .with_ip(ip.into())
        .with_header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/130.0")
        .with_header("Accept", "text/html")
        .with_header("Accept-Language", "en-US")
        .with_header("Accept-Encoding", "gzip")
}

fn googlebot() -> ClientInfo {
    ClientInfo::new()
        .with_ip(std::net::Ipv4Addr::new(203, 0, 113, 9).into())
        .with_header("User-Agent", "Mozilla/5.0 (compatible; Googlebot/2.1)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulationConfig {
        SimulationConfig {
            seed: 7,
            products: 40,
            users: 12,
            operations: 300,
        }
    }

    #[tokio::test]
    async fn seeded_run_keeps_every_guarantee() {
        let report = run_simulation(small(), EngineConfig::default()).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.upvotes + report.stats.bookmarks > 0);
        assert!(report.stats.feeds > 0);
    }

    #[tokio::test]
    async fn same_seed_same_tallies() {
        let a = run_simulation(small(), EngineConfig::default()).await.unwrap();
        let b = run_simulation(small(), EngineConfig::default()).await.unwrap();
        assert_eq!(a.stats.upvotes, b.stats.upvotes);
        assert_eq!(a.stats.views, b.stats.views);
    }

    #[test]
    fn crowded_pages_are_flagged() {
        use crate::api::FeedItem;
        use bazaar_model::{Candidate, CategoryId};
        use bazaar_scoring::Strategy;

        let items = (0..5)
            .map(|i| FeedItem {
                product: Candidate::bare(
                    Product::new(
                        ProductId::new(format!("p{i}")),
                        format!("p{i}"),
                        UserId::from("same"),
                        CategoryId::from("tools"),
                    ),
                    1.0,
                ),
                score: 0.5,
                reason: "new".into(),
                explanation: String::new(),
            })
            .collect();
        let page = FeedPage {
            strategy: Strategy::New,
            items,
            limit: 5,
            offset: 0,
        };
        let mut violations = Vec::new();
        check_page(&page, &mut violations);
        assert_eq!(violations.len(), 1);
    }
}
