//! Component signals
//!
//! Each function computes one scoring component from a candidate snapshot.
//! All functions are pure: same inputs, same output, no clock reads.

use crate::config::{ScoringConfig, ScoringWeights};
use bazaar_model::{Candidate, Counters, PersonalContext};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// `log10(n)` for views; zero when there are none
#[inline]
fn log_views(n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        (n as f64).log10()
    }
}

/// `log10(1 + n)`; zero when `n` is zero
#[inline]
fn log1p10(n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        (1.0 + n as f64).log10()
    }
}

/// Log-scaled engagement
///
/// `w_v·log10(max(views,1)) + w_u·log10(1+upvotes) + w_b·log10(1+bookmarks) + w_c·log10(1+comments)`
#[must_use]
pub fn engagement(counters: &Counters, w: &ScoringWeights) -> f64 {
    w.views_weight * log_views(counters.view_count)
        + w.upvotes_weight * log1p10(counters.upvote_count)
        + w.bookmark_weight * log1p10(counters.bookmark_count)
        + w.comment_weight * log1p10(counters.comment_count)
}

/// Freshness
///
/// Linear from `recencyWeight` at launch down to zero at `recentDaysBoost`,
/// then half weight decaying linearly to zero at `maxAgeDays`.
#[must_use]
pub fn recency(age_in_days: f64, cfg: &ScoringConfig) -> f64 {
    let age = age_in_days.max(0.0);
    let w = cfg.weights.recency_weight;
    if age <= cfg.recent_days_boost {
        w * (1.0 - age / cfg.recent_days_boost)
    } else {
        w * 0.5 * (1.0 - age / cfg.max_age_days).max(0.0)
    }
}

/// Age boost on trending velocity
#[inline]
fn trending_age_boost(age_in_days: f64) -> f64 {
    match age_in_days {
        a if a <= 3.0 => 1.5,
        a if a <= 7.0 => 1.3,
        a if a <= 14.0 => 1.1,
        _ => 1.0,
    }
}

/// Trending score ∈ [0, 1]
///
/// Per-day velocity of recent engagement, boosted for young products and for
/// activity concentrated in the window, divided by the normalization factor
/// and clamped. Weak signals on thin engagement are halved after the clamp.
#[must_use]
pub fn trending(candidate: &Candidate, cfg: &ScoringConfig) -> f64 {
    let w = &cfg.weights;
    let recent = &candidate.recent;
    let counters = &candidate.counters;

    let window = if recent.window_days == 0 {
        f64::from(cfg.trending_window_days)
    } else {
        f64::from(recent.window_days)
    };
    let age = candidate.age_in_days.max(0.0);
    let days = age.min(window).max(1.0);

    let velocity = (recent.recent_views as f64 * w.views_trending_weight
        + recent.recent_upvotes as f64 * w.upvotes_trending_weight
        + recent.recent_comments as f64 * w.comments_trending_weight
        + recent.recent_bookmarks as f64 * w.bookmarks_trending_weight)
        / days;

    let pairs = [
        (recent.recent_views, counters.view_count),
        (recent.recent_upvotes, counters.upvote_count),
        (recent.recent_comments, counters.comment_count),
        (recent.recent_bookmarks, counters.bookmark_count),
    ];
    let ratios: Vec<f64> = pairs
        .iter()
        .filter(|(_, total)| *total > 0)
        .map(|(recent, total)| *recent as f64 / *total as f64 * window)
        .collect();
    let acceleration = if ratios.is_empty() {
        1.0
    } else {
        (1.0 + ratios.iter().sum::<f64>() / ratios.len() as f64).min(2.0)
    };

    let raw = velocity * trending_age_boost(age) * acceleration;
    let mut score = (raw / w.trending_normalization_factor).clamp(0.0, 1.0);
    if score < 0.05 && (counters.view_count < 5 || counters.upvote_count < 2) {
        score *= 0.5;
    }
    score
}

/// Jaccard overlap of two tag sets (0 when both are empty)
#[must_use]
pub fn tag_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Similarity of a candidate to the source product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// Overlap part (tags, category, maker)
    pub overlap: f64,
    /// Full similarity score including the engagement and recency terms
    pub score: f64,
    /// Candidate is the source itself
    pub identical: bool,
}

/// Similarity to `source`
#[must_use]
pub fn similarity(
    candidate: &Candidate,
    source: &Candidate,
    engagement: f64,
    recency: f64,
    w: &ScoringWeights,
) -> Similarity {
    let same_category = candidate.product.category == source.product.category;
    let same_maker = candidate.product.maker == source.product.maker;
    let overlap = tag_jaccard(&candidate.product.tags, &source.product.tags)
        * w.tag_similarity_weight
        + if same_category { w.category_similarity_weight } else { 0.0 }
        + if same_maker { w.maker_similarity_weight } else { 0.0 };
    Similarity {
        overlap,
        score: overlap + engagement * 0.3 + recency * 0.2,
        identical: candidate.product.id == source.product.id,
    }
}

/// Personalization composite plus its post-normalization penalty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Personalization {
    /// Preference match part
    pub preference: f64,
    /// Composite score
    pub score: f64,
    /// Multiplier applied after normalization
    pub penalty: f64,
}

/// Personalization against the caller's context
#[must_use]
pub fn personalization(
    candidate: &Candidate,
    personal: &PersonalContext,
    engagement: f64,
    recency: f64,
    cfg: &ScoringConfig,
    now: DateTime<Utc>,
) -> Personalization {
    let w = &cfg.weights;
    let product = &candidate.product;

    let mut preference = personal
        .preferences
        .category_weight(&product.category)
        .map_or(0.0, |weight| weight * w.category_preference_weight);
    if !product.tags.is_empty() {
        let matched = product
            .tags
            .iter()
            .filter(|tag| personal.preferences.tags.contains_key(*tag))
            .count();
        preference += matched as f64 / product.tags.len() as f64 * w.tag_preference_weight;
    }

    let mut score = engagement * 0.3 + recency * 0.2 + preference;
    let recently_viewed = personal.recent_views.contains(&product.id);
    if !recently_viewed && personal.recent_categories.contains(&product.category) {
        score *= 1.5;
    }
    if personal.inactive_for(cfg.inactivity_days, now) {
        score *= 0.8;
    }

    Personalization {
        preference,
        score,
        penalty: if recently_viewed { 0.2 } else { 1.0 },
    }
}

/// Diversity of `candidate` against the already-chosen prefix
///
/// Returns 1 for an empty prefix when the factor triple sums to 1.
#[must_use]
pub fn diversity(candidate: &Candidate, chosen: &[&Candidate], w: &ScoringWeights) -> f64 {
    let tag_factor = w.tag_diversity_factor();
    if chosen.is_empty() {
        return w.category_diversity_factor + w.maker_diversity_factor + tag_factor;
    }

    let same_category = chosen
        .iter()
        .filter(|c| c.product.category == candidate.product.category)
        .count() as f64;
    let same_maker = chosen
        .iter()
        .filter(|c| c.product.maker == candidate.product.maker)
        .count() as f64;
    let mean_overlap = chosen
        .iter()
        .map(|c| tag_jaccard(&c.product.tags, &candidate.product.tags))
        .sum::<f64>()
        / chosen.len() as f64;

    w.category_diversity_factor * (1.0 - 0.2 * same_category).max(0.2)
        + w.maker_diversity_factor * (1.0 - 0.3 * same_maker).max(0.1)
        + tag_factor * (1.0 - mean_overlap).max(0.3)
}

/// Quality estimate ∈ [0, 10]
///
/// Starts at 5, adds the upvote, bookmark and comment ratios over views,
/// then the popularity bonuses and the no-upvote penalty.
#[must_use]
pub fn quality(counters: &Counters) -> f64 {
    let mut q: f64 = 5.0;
    let views = counters.view_count;
    if views > 0 {
        let views = views as f64;
        q += counters.upvote_count as f64 / views * 20.0
            + counters.bookmark_count as f64 / views * 15.0
            + counters.comment_count as f64 / views * 10.0;
    }

    if counters.upvote_count > 10 {
        q += 1.0;
    }
    if counters.upvote_count > 50 {
        q += 1.0;
    }
    if views > 1000 {
        q += 0.5;
    }
    if views > 20 && counters.upvote_count == 0 {
        q -= 2.0;
    }
    q.clamp(0.0, 10.0)
}

/// Multiplier derived from quality (0.8 at q=0, 1.0 at q=10)
#[inline]
#[must_use]
pub fn quality_factor(quality: f64) -> f64 {
    0.8 + quality.clamp(0.0, 10.0) / 50.0
}

/// Sigmoid-like squash of a non-negative raw score into (0.1, 1)
#[inline]
#[must_use]
pub fn normalize(raw: f64) -> f64 {
    let x = (raw.max(0.0) / 3.0).powf(0.8);
    0.1 + 0.9 * (1.0 - 1.0 / (1.0 + x))
}

/// Deterministic per-product value in [0, 1)
///
/// Used as tie-break jitter; stable for a given product and strategy.
#[must_use]
pub fn jitter(product_id: &str, strategy: &str) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(strategy.as_bytes());
    hasher.update(b":");
    hasher.update(product_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_model::{Preferences, Product, RecentActivity};

    fn candidate(id: &str, category: &str, maker: &str, tags: &[&str]) -> Candidate {
        let product = Product::new(id, id, maker, category).with_tags(tags.iter().copied());
        Candidate::bare(product, 10.0)
    }

    fn counters(views: u64, upvotes: u64, bookmarks: u64, comments: u64) -> Counters {
        Counters {
            upvote_count: upvotes,
            bookmark_count: bookmarks,
            view_count: views,
            unique_viewer_count: views,
            comment_count: comments,
        }
    }

    #[test]
    fn engagement_is_zero_without_activity() {
        assert_eq!(engagement(&Counters::default(), &ScoringWeights::default()), 0.0);
    }

    #[test]
    fn engagement_single_view_contributes_nothing() {
        let w = ScoringWeights::default();
        assert_eq!(engagement(&counters(1, 0, 0, 0), &w), 0.0);
        let e = engagement(&counters(100, 9, 0, 0), &w);
        assert!((e - (0.5 * 2.0 + 2.0 * 1.0)).abs() < 1e-9);
    }

    #[test]
    fn recency_curve() {
        let cfg = ScoringConfig::default();
        assert!((recency(0.0, &cfg) - 1.0).abs() < 1e-9);
        assert!((recency(3.5, &cfg) - 0.5).abs() < 1e-9);
        assert!(recency(7.0, &cfg).abs() < 1e-9);
        let past_boost = recency(7.5, &cfg);
        assert!((past_boost - 0.5 * (1.0 - 7.5 / 90.0)).abs() < 1e-9);
        assert!((recency(45.0, &cfg) - 0.25).abs() < 1e-9);
        assert_eq!(recency(90.0, &cfg), 0.0);
        assert_eq!(recency(365.0, &cfg), 0.0);
    }

    #[test]
    fn recency_scales_with_weight() {
        let mut cfg = ScoringConfig::default();
        cfg.weights.recency_weight = 2.0;
        assert!((recency(0.0, &cfg) - 2.0).abs() < 1e-9);
        assert!((recency(45.0, &cfg) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn recency_clamps_future_timestamps() {
        let cfg = ScoringConfig::default();
        assert_eq!(recency(-3.0, &cfg), recency(0.0, &cfg));
    }

    #[test]
    fn trending_zero_without_recent_engagement() {
        let cfg = ScoringConfig::default();
        let c = candidate("p", "c", "m", &[]).with_counters(counters(1000, 100, 10, 10));
        assert_eq!(trending(&c, &cfg), 0.0);
    }

    #[test]
    fn trending_prefers_fresh_momentum() {
        let cfg = ScoringConfig::default();
        let recent = RecentActivity {
            recent_views: 300,
            recent_upvotes: 40,
            recent_comments: 0,
            recent_bookmarks: 0,
            window_days: 7,
        };
        let mut young = candidate("a", "c", "m", &[]).with_counters(counters(300, 40, 0, 0));
        young.recent = recent;
        young.age_in_days = 2.0;

        let mut old = candidate("b", "c", "m", &[])
            .with_counters(counters(50_000, 2_000, 0, 0))
            .with_recent(RecentActivity {
                recent_views: 10,
                recent_upvotes: 1,
                window_days: 7,
                ..RecentActivity::default()
            });
        old.age_in_days = 200.0;

        let t_young = trending(&young, &cfg);
        let t_old = trending(&old, &cfg);
        assert!(t_young > t_old);
        assert!((0.0..=1.0).contains(&t_young));
    }

    #[test]
    fn thin_engagement_is_halved() {
        let cfg = ScoringConfig::default();
        let mut c = candidate("a", "c", "m", &[])
            .with_counters(counters(2, 1, 0, 0))
            .with_recent(RecentActivity {
                recent_views: 2,
                window_days: 7,
                ..RecentActivity::default()
            });
        c.age_in_days = 30.0;
        // 2 views · 0.3 / 7 days, accel 2 (all activity recent)
        let expected = (2.0 * 0.3 / 7.0) * 2.0 / 10.0 * 0.5;
        assert!((trending(&c, &cfg) - expected).abs() < 1e-9);
    }

    #[test]
    fn jaccard() {
        let a: BTreeSet<String> = ["ai", "dev"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["ai", "design"].iter().map(|s| s.to_string()).collect();
        assert!((tag_jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(tag_jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn similarity_flags_identical_source() {
        let w = ScoringWeights::default();
        let src = candidate("s", "dev", "m1", &["ai"]);
        let sim = similarity(&src, &src, 0.0, 0.0, &w);
        assert!(sim.identical);
        let other = candidate("o", "dev", "m2", &["ai"]);
        let sim = similarity(&other, &src, 0.0, 0.0, &w);
        assert!(!sim.identical);
        assert!((sim.overlap - (2.0 + 1.5)).abs() < 1e-9);
    }

    #[test]
    fn recently_viewed_is_penalized_without_category_boost() {
        let cfg = ScoringConfig::default();
        let c = candidate("p", "dev", "m", &[]);
        let mut personal = PersonalContext::for_user("u", Preferences::new());
        personal.recent_categories.insert(c.product.category.clone());

        let boosted = personalization(&c, &personal, 1.0, 1.0, &cfg, Utc::now());
        assert!((boosted.score - 0.5 * 1.5).abs() < 1e-9);
        assert_eq!(boosted.penalty, 1.0);

        personal.recent_views.insert(c.product.id.clone());
        let viewed = personalization(&c, &personal, 1.0, 1.0, &cfg, Utc::now());
        assert!((viewed.score - 0.5).abs() < 1e-9);
        assert_eq!(viewed.penalty, 0.2);
    }

    #[test]
    fn inactivity_damps_personalization() {
        let cfg = ScoringConfig::default();
        let c = candidate("p", "dev", "m", &[]);
        let now = Utc::now();
        let mut personal = PersonalContext::for_user(
            "u",
            Preferences::new().with_category("dev", 1.0),
        );
        let active = personalization(&c, &personal, 0.0, 0.0, &cfg, now).score;
        personal.last_activity = Some(now - chrono::Duration::days(45));
        let inactive = personalization(&c, &personal, 0.0, 0.0, &cfg, now).score;
        assert!((inactive - active * 0.8).abs() < 1e-9);
    }

    #[test]
    fn diversity_decreases_with_repetition() {
        let w = ScoringWeights::default();
        let a = candidate("a", "dev", "m1", &["ai"]);
        let b = candidate("b", "dev", "m1", &["ai"]);
        let c = candidate("c", "design", "m2", &["figma"]);
        assert!((diversity(&a, &[], &w) - 1.0).abs() < 1e-12);
        let same = diversity(&b, &[&a], &w);
        let different = diversity(&c, &[&a], &w);
        assert!(same < different);
        assert!((different - 1.0).abs() < 1e-12);
    }

    #[test]
    fn diversity_has_floors() {
        let w = ScoringWeights::default();
        let a = candidate("a", "dev", "m1", &["ai"]);
        let chosen: Vec<Candidate> = (0..20).map(|_| a.clone()).collect();
        let refs: Vec<&Candidate> = chosen.iter().collect();
        let d = diversity(&a, &refs, &w);
        assert!((d - (0.4 * 0.2 + 0.3 * 0.1 + 0.3 * 0.3)).abs() < 1e-9);
    }

    #[test]
    fn quality_adjustments() {
        assert_eq!(quality(&Counters::default()), 5.0);
        // 5 + 0.1·20 + 0.05·15 + 0.02·10 + 1 (over 10 upvotes)
        assert!((quality(&counters(200, 20, 10, 4)) - 8.95).abs() < 1e-9);
        let c = counters(1000, 20, 0, 0);
        assert!((quality(&c) - (5.0 + 0.4 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn quality_without_upvotes_drops_to_three() {
        assert!(quality(&counters(1000, 0, 0, 0)) <= 3.0);
        assert_eq!(quality(&counters(1000, 0, 0, 0)), 3.0);
        assert_eq!(quality(&counters(21, 0, 0, 0)), 3.0);
        assert_eq!(quality(&counters(20, 0, 0, 0)), 5.0);
        // the view bonus does not offset the penalty
        assert_eq!(quality(&counters(1001, 0, 0, 0)), 3.5);
    }

    #[test]
    fn quality_popularity_bonuses() {
        let base = |upvotes: u64| 5.0 + upvotes as f64 / 100_000.0 * 20.0;
        let q10 = quality(&counters(100_000, 10, 0, 0));
        let q11 = quality(&counters(100_000, 11, 0, 0));
        let q51 = quality(&counters(100_000, 51, 0, 0));
        assert!((q10 - (base(10) + 0.5)).abs() < 1e-9);
        assert!((q11 - (base(11) + 1.0 + 0.5)).abs() < 1e-9);
        assert!((q51 - (base(51) + 2.0 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(quality(&counters(10, 200, 0, 0)), 10.0);
    }

    #[test]
    fn normalize_range() {
        assert!((normalize(0.0) - 0.1).abs() < 1e-12);
        assert!(normalize(1e9) < 1.0);
        assert!(normalize(2.0) < normalize(3.0));
    }

    #[test]
    fn jitter_is_stable() {
        assert_eq!(jitter("p1", "trending"), jitter("p1", "trending"));
        assert_ne!(jitter("p1", "trending"), jitter("p2", "trending"));
        let j = jitter("anything", "new");
        assert!((0.0..1.0).contains(&j));
    }
}
