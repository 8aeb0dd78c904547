//! Tunable scoring configuration
//!
//! Weight names follow the engine's configuration vocabulary
//! (`viewsWeight`, `upvotesWeight`, …) so TOML files read the same as the
//! documented table.

use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scoring weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringWeights {
    /// Engagement weight on `log10(views)`
    pub views_weight: f64,
    /// Engagement weight on upvotes
    pub upvotes_weight: f64,
    /// Engagement weight on bookmarks
    pub bookmark_weight: f64,
    /// Engagement weight on comments
    pub comment_weight: f64,
    /// Bonus per matched query tag
    pub tag_match: f64,
    /// Bonus when the query category matches
    pub category_match: f64,
    /// Scale of the recency curve
    pub recency_weight: f64,
    /// Personalization weight of a preferred category
    pub category_preference_weight: f64,
    /// Personalization weight of preferred-tag overlap
    pub tag_preference_weight: f64,
    /// Similarity weight of tag Jaccard
    pub tag_similarity_weight: f64,
    /// Similarity bonus for the same category
    pub category_similarity_weight: f64,
    /// Similarity bonus for the same maker
    pub maker_similarity_weight: f64,
    /// Trending velocity weight of recent views
    pub views_trending_weight: f64,
    /// Trending velocity weight of recent upvotes
    pub upvotes_trending_weight: f64,
    /// Trending velocity weight of recent comments
    pub comments_trending_weight: f64,
    /// Trending velocity weight of recent bookmarks
    pub bookmarks_trending_weight: f64,
    /// Divisor applied to trending velocity before clamping
    pub trending_normalization_factor: f64,
    /// Category share of the diversity triple
    pub category_diversity_factor: f64,
    /// Maker share of the diversity triple; tags take the rest
    pub maker_diversity_factor: f64,
    /// Multiplier between 08:00 and 22:00
    pub peak_hours_boost: f64,
    /// Multiplier on Saturdays and Sundays
    pub weekend_boost: f64,
    /// Multiplier for in-season categories
    pub seasonal_boost: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            views_weight: 0.5,
            upvotes_weight: 2.0,
            bookmark_weight: 1.5,
            comment_weight: 1.0,
            tag_match: 1.0,
            category_match: 1.5,
            recency_weight: 1.0,
            category_preference_weight: 1.5,
            tag_preference_weight: 1.0,
            tag_similarity_weight: 2.0,
            category_similarity_weight: 1.5,
            maker_similarity_weight: 0.5,
            views_trending_weight: 0.3,
            upvotes_trending_weight: 2.0,
            comments_trending_weight: 1.5,
            bookmarks_trending_weight: 1.0,
            trending_normalization_factor: 10.0,
            category_diversity_factor: 0.4,
            maker_diversity_factor: 0.3,
            peak_hours_boost: 1.1,
            weekend_boost: 1.1,
            seasonal_boost: 1.2,
        }
    }
}

impl ScoringWeights {
    /// Tag component of the diversity triple (the remainder to 1)
    #[inline]
    #[must_use]
    pub fn tag_diversity_factor(&self) -> f64 {
        (1.0 - self.category_diversity_factor - self.maker_diversity_factor).max(0.0)
    }

    fn named(&self) -> [(&'static str, f64); 22] {
        [
            ("viewsWeight", self.views_weight),
            ("upvotesWeight", self.upvotes_weight),
            ("bookmarkWeight", self.bookmark_weight),
            ("commentWeight", self.comment_weight),
            ("tagMatch", self.tag_match),
            ("categoryMatch", self.category_match),
            ("recencyWeight", self.recency_weight),
            ("categoryPreferenceWeight", self.category_preference_weight),
            ("tagPreferenceWeight", self.tag_preference_weight),
            ("tagSimilarityWeight", self.tag_similarity_weight),
            ("categorySimilarityWeight", self.category_similarity_weight),
            ("makerSimilarityWeight", self.maker_similarity_weight),
            ("viewsTrendingWeight", self.views_trending_weight),
            ("upvotesTrendingWeight", self.upvotes_trending_weight),
            ("commentsTrendingWeight", self.comments_trending_weight),
            ("bookmarksTrendingWeight", self.bookmarks_trending_weight),
            ("trendingNormalizationFactor", self.trending_normalization_factor),
            ("categoryDiversityFactor", self.category_diversity_factor),
            ("makerDiversityFactor", self.maker_diversity_factor),
            ("peakHoursBoost", self.peak_hours_boost),
            ("weekendBoost", self.weekend_boost),
            ("seasonalBoost", self.seasonal_boost),
        ]
    }
}

/// Complete kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    /// Component weights
    pub weights: ScoringWeights,
    /// Per-strategy multiplier applied after base composition
    pub type_multipliers: BTreeMap<String, f64>,
    /// Per-strategy soft floor on the diversity score during selection
    pub diversity_floors: BTreeMap<String, f64>,
    /// Recency falls from full weight to zero over this many days
    pub recent_days_boost: f64,
    /// Past the boost, half-weight recency reaches zero at this age
    pub max_age_days: f64,
    /// Trending velocity window
    pub trending_window_days: u32,
    /// Inactivity threshold for the personalization damping
    pub inactivity_days: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let type_multipliers = [
            (Strategy::Trending, 1.2),
            (Strategy::New, 1.0),
            (Strategy::Similar, 1.1),
            (Strategy::Category, 1.0),
            (Strategy::Tag, 1.0),
            (Strategy::Personalized, 1.3),
            (Strategy::Interests, 1.2),
            (Strategy::Collaborative, 1.2),
            (Strategy::Feed, 1.0),
            (Strategy::Search, 1.0),
            (Strategy::Default, 1.0),
        ]
        .into_iter()
        .map(|(s, m)| (s.as_str().to_string(), m))
        .collect();

        let diversity_floors = [
            (Strategy::Trending, 0.5),
            (Strategy::New, 0.4),
            (Strategy::Similar, 0.3),
            (Strategy::Personalized, 0.45),
            (Strategy::Interests, 0.4),
            (Strategy::Collaborative, 0.4),
            (Strategy::Feed, 0.45),
        ]
        .into_iter()
        .map(|(s, m)| (s.as_str().to_string(), m))
        .collect();

        Self {
            weights: ScoringWeights::default(),
            type_multipliers,
            diversity_floors,
            recent_days_boost: 7.0,
            max_age_days: 90.0,
            trending_window_days: 7,
            inactivity_days: 30,
        }
    }
}

impl ScoringConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With weights
    #[inline]
    #[must_use]
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// With a strategy multiplier
    #[inline]
    #[must_use]
    pub fn with_type_multiplier(mut self, strategy: Strategy, multiplier: f64) -> Self {
        self.type_multipliers
            .insert(strategy.as_str().to_string(), multiplier);
        self
    }

    /// Multiplier for `strategy` (1.0 when unset)
    #[inline]
    #[must_use]
    pub fn type_multiplier(&self, strategy: Strategy) -> f64 {
        self.type_multipliers
            .get(strategy.as_str())
            .copied()
            .unwrap_or(1.0)
    }

    /// Diversity floor for `strategy` (0.3 when unset)
    #[inline]
    #[must_use]
    pub fn diversity_floor(&self, strategy: Strategy) -> f64 {
        self.diversity_floors
            .get(strategy.as_str())
            .copied()
            .unwrap_or(0.3)
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ScoringConfigError> {
        for (name, value) in self.weights.named() {
            if !value.is_finite() || value < 0.0 {
                return Err(ScoringConfigError::InvalidWeight {
                    name: name.to_string(),
                    value,
                });
            }
        }

        let w = &self.weights;
        if w.category_diversity_factor + w.maker_diversity_factor > 1.0 {
            return Err(ScoringConfigError::DiversityTriple {
                category: w.category_diversity_factor,
                maker: w.maker_diversity_factor,
            });
        }
        if w.trending_normalization_factor <= 0.0 {
            return Err(ScoringConfigError::InvalidWeight {
                name: "trendingNormalizationFactor".to_string(),
                value: w.trending_normalization_factor,
            });
        }
        if self.recent_days_boost <= 0.0 || self.max_age_days <= self.recent_days_boost {
            return Err(ScoringConfigError::RecencyWindow {
                recent_days_boost: self.recent_days_boost,
                max_age_days: self.max_age_days,
            });
        }
        if self.trending_window_days == 0 {
            return Err(ScoringConfigError::ZeroWindow);
        }
        for (strategy, multiplier) in &self.type_multipliers {
            if strategy.parse::<Strategy>().is_err() {
                return Err(ScoringConfigError::UnknownStrategy(strategy.clone()));
            }
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(ScoringConfigError::InvalidWeight {
                    name: format!("typeMultipliers.{strategy}"),
                    value: *multiplier,
                });
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringConfigError {
    /// Negative, NaN or infinite weight
    #[error("invalid weight {name} = {value}")]
    InvalidWeight { name: String, value: f64 },

    /// Category and maker diversity factors leave no room for the tag factor
    #[error("diversity factors exceed 1 (category {category}, maker {maker})")]
    DiversityTriple { category: f64, maker: f64 },

    /// Recency windows out of order
    #[error("recentDaysBoost {recent_days_boost} must be positive and below maxAgeDays {max_age_days}")]
    RecencyWindow {
        recent_days_boost: f64,
        max_age_days: f64,
    },

    /// Trending window of zero days
    #[error("trending window must be at least one day")]
    ZeroWindow,

    /// Multiplier for a strategy that does not exist
    #[error("unknown strategy in typeMultipliers: {0}")]
    UnknownStrategy(String),
}
