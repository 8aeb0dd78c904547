//! Ephemeral per-request score details

use serde::{Deserialize, Serialize};

/// Named scoring components, used to pick the dominant explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Log-scaled engagement
    Engagement,
    /// Freshness
    Recency,
    /// Velocity inside the recent window
    Trending,
    /// Match against a source product
    Similarity,
    /// Match against the user's preferences
    Personalization,
    /// Tag or text match against the query
    TagMatch,
    /// Context (time of day, season) affinity
    Psychological,
    /// Quality estimate
    Quality,
}

/// Component scores of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponents {
    /// Engagement score
    pub engagement: f64,
    /// Recency score
    pub recency: f64,
    /// Trending score ∈ [0, 1]
    pub trending: f64,
    /// Similarity to the source product
    pub similarity: f64,
    /// Personalization composite
    pub personalization: f64,
    /// Psychological multiplier
    pub psychological: f64,
    /// Diversity against already-chosen items
    pub diversity: f64,
    /// Quality ∈ [0, 10]
    pub quality: f64,
    /// Post-normalization penalty multiplier
    pub penalty: f64,
}

impl Default for ScoreComponents {
    fn default() -> Self {
        Self {
            engagement: 0.0,
            recency: 0.0,
            trending: 0.0,
            similarity: 0.0,
            personalization: 0.0,
            psychological: 1.0,
            diversity: 1.0,
            quality: 5.0,
            penalty: 1.0,
        }
    }
}

/// Final score of one candidate for one request
///
/// Constructed per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDetail {
    /// Component breakdown
    pub components: ScoreComponents,
    /// Composed score before normalization
    pub raw: f64,
    /// Final normalized score ∈ [0.01, 1]
    pub score: f64,
    /// Component that dominated the composition
    pub dominant: Component,
    /// Deterministic human-readable explanation
    pub explanation: String,
}
