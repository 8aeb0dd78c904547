//! Context multiplier from time of day, weekday and season
//!
//! Categories are bucketed into coarse families by keywords in their display
//! name; each family has a season and a time-of-day affinity. Evaluated in
//! UTC.

use crate::config::ScoringWeights;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

/// Coarse category family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFamily {
    /// Developer tools, AI, productivity
    Tech,
    /// Games, music, video
    Entertainment,
    /// Design, art, photography
    Creative,
    /// Finance, marketing, sales
    Business,
    /// Health, fitness, travel, education
    Lifestyle,
    /// Everything else
    Other,
}

const FAMILY_KEYWORDS: &[(CategoryFamily, &[&str])] = &[
    (
        CategoryFamily::Tech,
        &["tech", "developer", "dev", "ai", "software", "productivity", "code", "saas"],
    ),
    (
        CategoryFamily::Entertainment,
        &["entertainment", "game", "gaming", "music", "video", "media", "fun"],
    ),
    (
        CategoryFamily::Creative,
        &["design", "art", "creative", "photo", "writing"],
    ),
    (
        CategoryFamily::Business,
        &["business", "finance", "marketing", "sales", "startup"],
    ),
    (
        CategoryFamily::Lifestyle,
        &["health", "fitness", "travel", "outdoors", "education", "lifestyle"],
    ),
];

impl CategoryFamily {
    /// Classify a category by keywords in its name
    #[must_use]
    pub fn classify(category_name: &str) -> Self {
        let name = category_name.to_lowercase();
        let words: Vec<&str> = name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        FAMILY_KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                keywords
                    .iter()
                    .any(|k| words.iter().any(|w| w == k || (k.len() > 3 && w.starts_with(k))))
            })
            .map_or(Self::Other, |(family, _)| *family)
    }

    /// Whether `month` (1-12) is this family's season
    #[must_use]
    pub fn in_season(self, month: u32) -> bool {
        match self {
            Self::Tech => matches!(month, 9..=11),
            Self::Entertainment => matches!(month, 6..=8 | 12),
            Self::Creative => matches!(month, 3..=5),
            Self::Business => matches!(month, 1 | 9),
            Self::Lifestyle => matches!(month, 1 | 2 | 12),
            Self::Other => false,
        }
    }

    /// Time-of-day and weekday affinity
    #[must_use]
    pub fn time_affinity(self, hour: u32, weekend: bool) -> f64 {
        match self {
            Self::Tech if (6..12).contains(&hour) => 1.2,
            Self::Entertainment if (18..=23).contains(&hour) => 1.3,
            Self::Creative if weekend => 1.25,
            Self::Business if !weekend && (9..17).contains(&hour) => 1.2,
            _ => 1.0,
        }
    }
}

/// Multiplier for a product in `category_name` at `now`
#[must_use]
pub fn multiplier(category_name: &str, now: DateTime<Utc>, w: &ScoringWeights) -> f64 {
    let hour = now.hour();
    let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    let family = CategoryFamily::classify(category_name);

    let mut m = 1.0;
    if (8..=22).contains(&hour) {
        m *= w.peak_hours_boost;
    }
    if weekend {
        m *= w.weekend_boost;
    }
    if family.in_season(now.month()) {
        m *= w.seasonal_boost;
    }
    m * family.time_affinity(hour, weekend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classification() {
        assert_eq!(CategoryFamily::classify("Developer Tools"), CategoryFamily::Tech);
        assert_eq!(CategoryFamily::classify("Games"), CategoryFamily::Entertainment);
        assert_eq!(CategoryFamily::classify("Design"), CategoryFamily::Creative);
        assert_eq!(CategoryFamily::classify("Fintech & Finance"), CategoryFamily::Business);
        assert_eq!(CategoryFamily::classify("Pets"), CategoryFamily::Other);
        assert_eq!(CategoryFamily::classify(""), CategoryFamily::Other);
    }

    #[test]
    fn quiet_hours_are_neutral_for_unknown_categories() {
        // Tuesday 03:00 UTC in April
        let now = Utc.with_ymd_and_hms(2025, 4, 1, 3, 0, 0).unwrap();
        assert_eq!(multiplier("Pets", now, &ScoringWeights::default()), 1.0);
    }

    #[test]
    fn evening_entertainment_on_a_summer_weekend() {
        // Saturday 20:00 UTC in July
        let now = Utc.with_ymd_and_hms(2025, 7, 5, 20, 0, 0).unwrap();
        let w = ScoringWeights::default();
        let expected = 1.1 * 1.1 * 1.2 * 1.3;
        assert!((multiplier("Games", now, &w) - expected).abs() < 1e-9);
    }

    #[test]
    fn business_hours_on_weekdays_only() {
        assert_eq!(CategoryFamily::Business.time_affinity(10, false), 1.2);
        assert_eq!(CategoryFamily::Business.time_affinity(10, true), 1.0);
    }
}
