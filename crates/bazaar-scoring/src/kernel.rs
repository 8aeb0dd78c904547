//! Scoring kernel
//!
//! Scoring runs in two phases so the assembler can prescore candidates in
//! parallel and then select greedily:
//!
//! 1. [`ScoringKernel::prescore`] composes the strategy base from the
//!    component signals and applies the strategy multiplier and quality
//!    factor. Independent of other candidates.
//! 2. [`ScoringKernel::finalize`] multiplies in the diversity score against
//!    the already-chosen prefix, normalizes, adds tie-break jitter, applies the
//!    post-normalization penalty and clamps to `[0.01, 1]`.

use crate::config::ScoringConfig;
use crate::explain::explain;
use crate::psychology;
use crate::signals;
use crate::strategy::{Composition, Strategy};
use bazaar_model::{
    Candidate, CategoryId, Component, PersonalContext, ProductId, ScoreComponents, ScoreDetail,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Lower bound of every final score
pub const MIN_SCORE: f64 = 0.01;

/// Per-request inputs to the kernel
#[derive(Debug, Clone)]
pub struct ScoringContext {
    /// Strategy being scored
    pub strategy: Strategy,
    /// Wall clock for the psychological multiplier and inactivity checks
    pub now: DateTime<Utc>,
    /// Source product for `similar`
    pub source: Option<Candidate>,
    /// Caller's preferences and history
    pub personal: Option<PersonalContext>,
    /// Requested tags for `tag`
    pub query_tags: BTreeSet<String>,
    /// Requested category for `category`
    pub query_category: Option<CategoryId>,
    /// Lowercased search terms for `search`
    pub search_terms: Vec<String>,
    /// How many engagement neighbors engaged with each product (`collaborative`)
    pub neighbor_support: HashMap<ProductId, u32>,
}

impl ScoringContext {
    /// Create context for `strategy` at `now`
    #[must_use]
    pub fn new(strategy: Strategy, now: DateTime<Utc>) -> Self {
        Self {
            strategy,
            now,
            source: None,
            personal: None,
            query_tags: BTreeSet::new(),
            query_category: None,
            search_terms: Vec::new(),
            neighbor_support: HashMap::new(),
        }
    }

    /// With source product
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: Candidate) -> Self {
        self.source = Some(source);
        self
    }

    /// With personal context
    #[inline]
    #[must_use]
    pub fn with_personal(mut self, personal: PersonalContext) -> Self {
        self.personal = Some(personal);
        self
    }

    /// With query tags (lowercased)
    #[must_use]
    pub fn with_query_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query_tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// With query category
    #[inline]
    #[must_use]
    pub fn with_query_category(mut self, category: CategoryId) -> Self {
        self.query_category = Some(category);
        self
    }

    /// With free-text search; split on whitespace and lowercased
    #[must_use]
    pub fn with_search(mut self, query: &str) -> Self {
        self.search_terms = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        self
    }

    /// With collaborative neighbor support counts
    #[inline]
    #[must_use]
    pub fn with_neighbor_support(mut self, support: HashMap<ProductId, u32>) -> Self {
        self.neighbor_support = support;
        self
    }
}

/// Result of the independent scoring phase
#[derive(Debug, Clone, PartialEq)]
pub struct PreScore {
    /// Component breakdown (diversity still 1)
    pub components: ScoreComponents,
    /// Strategy base after multiplier and quality factor
    pub base: f64,
    /// Dominant component
    pub dominant: Component,
    /// Deterministic value in `[0, 1)` used as tie-break jitter
    pub jitter: f64,
}

/// Stateless scoring kernel
#[derive(Debug, Clone)]
pub struct ScoringKernel {
    config: Arc<ScoringConfig>,
}

impl Default for ScoringKernel {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ScoringKernel {
    /// Create kernel with configuration
    #[must_use]
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one candidate independently of the others
    #[must_use]
    pub fn prescore(&self, candidate: &Candidate, ctx: &ScoringContext) -> PreScore {
        let cfg = &*self.config;
        let w = &cfg.weights;

        let engagement = signals::engagement(&candidate.counters, w);
        let recency = signals::recency(candidate.age_in_days, cfg);
        let trending = signals::trending(candidate, cfg);
        let quality = signals::quality(&candidate.counters);
        let psychological = psychology::multiplier(&candidate.category.name, ctx.now, w);

        let mut components = ScoreComponents {
            engagement,
            recency,
            trending,
            quality,
            psychological,
            ..ScoreComponents::default()
        };

        let (base, contributions): (f64, Vec<(Component, f64)>) =
            match ctx.strategy.composition() {
                Composition::Trending => (
                    trending * psychological,
                    vec![(Component::Trending, trending)],
                ),
                Composition::New => (
                    recency * 2.0 + engagement * 0.3,
                    vec![
                        (Component::Recency, recency * 2.0),
                        (Component::Engagement, engagement * 0.3),
                    ],
                ),
                Composition::Similar => match &ctx.source {
                    Some(source) => {
                        let sim = signals::similarity(candidate, source, engagement, recency, w);
                        components.similarity = sim.score;
                        if sim.identical {
                            components.penalty = 0.01;
                        }
                        (
                            sim.score,
                            vec![
                                (Component::Similarity, sim.overlap),
                                (Component::Engagement, engagement * 0.3),
                                (Component::Recency, recency * 0.2),
                            ],
                        )
                    }
                    None => (
                        engagement * 0.3 + recency * 0.2,
                        vec![
                            (Component::Engagement, engagement * 0.3),
                            (Component::Recency, recency * 0.2),
                        ],
                    ),
                },
                Composition::Category => {
                    let matches = ctx
                        .query_category
                        .as_ref()
                        .is_some_and(|c| *c == candidate.product.category);
                    (
                        engagement * 1.2 + if matches { w.category_match } else { 0.0 },
                        vec![(Component::Engagement, engagement * 1.2)],
                    )
                }
                Composition::Tag => {
                    let matched = candidate
                        .product
                        .tags
                        .intersection(&ctx.query_tags)
                        .count() as f64;
                    (
                        matched * w.tag_match + engagement * 0.5,
                        vec![
                            (Component::TagMatch, matched * w.tag_match),
                            (Component::Engagement, engagement * 0.5),
                        ],
                    )
                }
                Composition::Personalized => {
                    let anonymous = PersonalContext::default();
                    let personal = ctx.personal.as_ref().unwrap_or(&anonymous);
                    let p = signals::personalization(
                        candidate, personal, engagement, recency, cfg, ctx.now,
                    );
                    let support = ctx
                        .neighbor_support
                        .get(&candidate.product.id)
                        .copied()
                        .unwrap_or(0)
                        .min(5);
                    let score = p.score * (1.0 + 0.1 * f64::from(support));
                    components.personalization = score;
                    components.penalty = p.penalty;
                    (
                        score,
                        vec![
                            (Component::Personalization, p.preference),
                            (Component::Engagement, engagement * 0.3),
                            (Component::Recency, recency * 0.2),
                        ],
                    )
                }
                Composition::Search => {
                    let matched = text_matches(candidate, &ctx.search_terms) as f64;
                    (
                        (engagement + recency * 0.8) * psychological + matched * w.tag_match,
                        vec![
                            (Component::TagMatch, matched * w.tag_match),
                            (Component::Engagement, engagement),
                            (Component::Recency, recency * 0.8),
                        ],
                    )
                }
                Composition::Default => (
                    (engagement + recency * 0.8) * psychological,
                    vec![
                        (Component::Engagement, engagement),
                        (Component::Recency, recency * 0.8),
                    ],
                ),
            };

        let base = base.max(0.0)
            * cfg.type_multiplier(ctx.strategy)
            * signals::quality_factor(quality);

        PreScore {
            components,
            base,
            dominant: dominant(&contributions),
            jitter: signals::jitter(candidate.product.id.as_str(), ctx.strategy.as_str()),
        }
    }

    /// Diversity of `candidate` against the chosen prefix
    #[inline]
    #[must_use]
    pub fn diversity(&self, candidate: &Candidate, chosen: &[&Candidate]) -> f64 {
        signals::diversity(candidate, chosen, &self.config.weights)
    }

    /// Complete a prescore with a diversity score
    #[must_use]
    pub fn finalize(
        &self,
        candidate: &Candidate,
        pre: &PreScore,
        diversity: f64,
        ctx: &ScoringContext,
    ) -> ScoreDetail {
        let mut components = pre.components;
        components.diversity = diversity;

        let raw = pre.base * diversity;
        let normalized = signals::normalize(raw);
        let jittered = normalized + normalized * 0.01 * pre.jitter;
        let score = (jittered * components.penalty).clamp(MIN_SCORE, 1.0);

        ScoreDetail {
            components,
            raw,
            score,
            dominant: pre.dominant,
            explanation: explain(pre.dominant, candidate, ctx),
        }
    }

    /// Score one candidate against a chosen prefix in one call
    #[must_use]
    pub fn score(
        &self,
        candidate: &Candidate,
        ctx: &ScoringContext,
        chosen: &[&Candidate],
    ) -> ScoreDetail {
        let pre = self.prescore(candidate, ctx);
        let diversity = self.diversity(candidate, chosen);
        self.finalize(candidate, &pre, diversity, ctx)
    }
}

/// Number of search terms found in the name, tagline or tags
fn text_matches(candidate: &Candidate, terms: &[String]) -> usize {
    if terms.is_empty() {
        return 0;
    }
    let name = candidate.product.name.to_lowercase();
    let tagline = candidate.product.tagline.to_lowercase();
    terms
        .iter()
        .filter(|term| {
            name.contains(term.as_str())
                || tagline.contains(term.as_str())
                || candidate.product.tags.contains(*term)
        })
        .count()
}

/// Largest positive contribution; `Quality` when nothing contributed
fn dominant(contributions: &[(Component, f64)]) -> Component {
    contributions
        .iter()
        .fold(None::<(Component, f64)>, |best, &(component, value)| match best {
            Some((_, top)) if top >= value => best,
            _ if value > 0.0 => Some((component, value)),
            _ => best,
        })
        .map_or(Component::Quality, |(component, _)| component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_model::{Counters, Preferences, Product, RecentActivity};
    use chrono::TimeZone;
    use proptest::{prop_assert, proptest};

    fn now() -> DateTime<Utc> {
        // Tuesday 03:00 UTC, outside peak hours
        Utc.with_ymd_and_hms(2025, 4, 1, 3, 0, 0).unwrap()
    }

    fn candidate(id: &str, category: &str, maker: &str, tags: &[&str], age: f64) -> Candidate {
        let product = Product::new(id, id, maker, category)
            .with_name(id)
            .with_tags(tags.iter().copied());
        Candidate::bare(product, age)
    }

    fn counters(views: u64, upvotes: u64) -> Counters {
        Counters {
            upvote_count: upvotes,
            view_count: views,
            unique_viewer_count: views,
            ..Counters::default()
        }
    }

    #[test]
    fn empty_engagement_scores_at_least_the_floor() {
        let kernel = ScoringKernel::default();
        let ctx = ScoringContext::new(Strategy::Trending, now());
        let detail = kernel.score(&candidate("p", "c", "m", &[], 400.0), &ctx, &[]);
        assert!(detail.score >= MIN_SCORE);
        assert_eq!(detail.dominant, Component::Quality);
    }

    #[test]
    fn trending_momentum_beats_stale_popularity() {
        let kernel = ScoringKernel::default();
        let ctx = ScoringContext::new(Strategy::Trending, now());

        let a = candidate("a", "c1", "m1", &[], 2.0)
            .with_counters(counters(300, 40))
            .with_recent(RecentActivity {
                recent_views: 300,
                recent_upvotes: 40,
                window_days: 7,
                ..RecentActivity::default()
            });
        let b = candidate("b", "c2", "m2", &[], 200.0)
            .with_counters(counters(50_000, 2_000))
            .with_recent(RecentActivity {
                recent_views: 10,
                recent_upvotes: 1,
                window_days: 7,
                ..RecentActivity::default()
            });

        let sa = kernel.score(&a, &ctx, &[]);
        let sb = kernel.score(&b, &ctx, &[]);
        assert!(sa.score > sb.score);
        assert_eq!(sa.dominant, Component::Trending);
        assert!(sa.explanation.starts_with("Trending"));
    }

    #[test]
    fn similar_excludes_the_source_by_penalty() {
        let kernel = ScoringKernel::default();
        let source = candidate("s", "dev", "m1", &["ai", "cli"], 5.0).with_counters(counters(500, 80));
        let ctx = ScoringContext::new(Strategy::Similar, now()).with_source(source.clone());
        let other = candidate("o", "dev", "m2", &["ai"], 30.0);

        let own = kernel.score(&source, &ctx, &[]);
        let theirs = kernel.score(&other, &ctx, &[]);
        assert!(own.score <= 0.0101);
        assert!(theirs.score > own.score);
        assert_eq!(theirs.dominant, Component::Similarity);
    }

    #[test]
    fn personalized_prefers_matching_category() {
        let kernel = ScoringKernel::default();
        let personal =
            PersonalContext::for_user("u", Preferences::new().with_category("dev", 1.0));
        let ctx = ScoringContext::new(Strategy::Personalized, now()).with_personal(personal);
        let liked = candidate("a", "dev", "m1", &[], 20.0);
        let other = candidate("b", "design", "m2", &[], 20.0);
        let sl = kernel.score(&liked, &ctx, &[]);
        let so = kernel.score(&other, &ctx, &[]);
        assert!(sl.score > so.score);
        assert_eq!(sl.dominant, Component::Personalization);
    }

    #[test]
    fn recent_views_are_demoted_after_normalization() {
        let kernel = ScoringKernel::default();
        let item = candidate("a", "dev", "m1", &[], 1.0).with_counters(counters(1000, 200));
        let mut personal = PersonalContext::for_user("u", Preferences::new());
        let fresh = kernel.score(
            &item,
            &ScoringContext::new(Strategy::Personalized, now()).with_personal(personal.clone()),
            &[],
        );
        personal.recent_views.insert(item.product.id.clone());
        let seen = kernel.score(
            &item,
            &ScoringContext::new(Strategy::Personalized, now()).with_personal(personal),
            &[],
        );
        assert!((seen.score - fresh.score * 0.2).abs() < 1e-9);
    }

    #[test]
    fn tag_strategy_rewards_matches() {
        let kernel = ScoringKernel::default();
        let ctx = ScoringContext::new(Strategy::Tag, now()).with_query_tags(["ai", "cli"]);
        let both = candidate("a", "c", "m", &["ai", "cli"], 20.0);
        let one = candidate("b", "c", "m", &["ai"], 20.0);
        assert!(kernel.score(&both, &ctx, &[]).score > kernel.score(&one, &ctx, &[]).score);
    }

    #[test]
    fn search_boosts_text_matches() {
        let kernel = ScoringKernel::default();
        let ctx = ScoringContext::new(Strategy::Search, now()).with_search("Notes");
        let hit = candidate("notes-app", "c", "m", &[], 20.0);
        let miss = candidate("calendar", "c", "m", &[], 20.0);
        let hit_detail = kernel.score(&hit, &ctx, &[]);
        assert!(hit_detail.score > kernel.score(&miss, &ctx, &[]).score);
        assert_eq!(hit_detail.dominant, Component::TagMatch);
    }

    #[test]
    fn scoring_is_deterministic() {
        let kernel = ScoringKernel::default();
        let ctx = ScoringContext::new(Strategy::Default, now());
        let c = candidate("a", "c", "m", &["x"], 3.0).with_counters(counters(40, 4));
        assert_eq!(kernel.score(&c, &ctx, &[]), kernel.score(&c, &ctx, &[]));
    }

    proptest! {
        #[test]
        fn score_is_bounded(
            views in 0u64..1_000_000,
            upvotes in 0u64..100_000,
            bookmarks in 0u64..10_000,
            comments in 0u64..10_000,
            recent_views in 0u64..10_000,
            recent_upvotes in 0u64..1_000,
            age in -5.0f64..1_000.0,
            diversity in 0.0f64..1.0,
            strategy_idx in 0usize..Strategy::ALL.len(),
        ) {
            let kernel = ScoringKernel::default();
            let strategy = Strategy::ALL[strategy_idx];
            let ctx = ScoringContext::new(strategy, now())
                .with_query_tags(["ai"])
                .with_search("ai tool");
            let c = candidate("p", "dev", "m", &["ai"], age)
                .with_counters(Counters {
                    upvote_count: upvotes,
                    bookmark_count: bookmarks,
                    view_count: views,
                    unique_viewer_count: views / 2,
                    comment_count: comments,
                })
                .with_recent(RecentActivity {
                    recent_views,
                    recent_upvotes,
                    window_days: 7,
                    ..RecentActivity::default()
                });
            let pre = kernel.prescore(&c, &ctx);
            let detail = kernel.finalize(&c, &pre, diversity, &ctx);
            prop_assert!(detail.score >= MIN_SCORE);
            prop_assert!(detail.score <= 1.0);
            prop_assert!(detail.components.trending >= 0.0 && detail.components.trending <= 1.0);
            prop_assert!(detail.components.quality >= 0.0 && detail.components.quality <= 10.0);
        }

        #[test]
        fn more_diverse_never_scores_lower(
            views in 0u64..100_000,
            upvotes in 0u64..10_000,
            low in 0.0f64..0.5,
            delta in 0.0f64..0.5,
        ) {
            let kernel = ScoringKernel::default();
            let ctx = ScoringContext::new(Strategy::Default, now());
            let c = candidate("p", "dev", "m", &[], 10.0).with_counters(counters(views, upvotes));
            let pre = kernel.prescore(&c, &ctx);
            let a = kernel.finalize(&c, &pre, low, &ctx).score;
            let b = kernel.finalize(&c, &pre, low + delta, &ctx).score;
            prop_assert!(b >= a);
        }
    }
}
