//! Recommendation strategies and their base compositions
//!
//! A [`Strategy`] names what the caller asked for; a [`Composition`] names the
//! scoring formula the kernel runs for it. Several strategies share a
//! composition (`interests` and `collaborative` are personalized variants,
//! `feed` is the default composition with its own cache prefix).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Recommendation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Momentum inside the recent window
    Trending,
    /// Freshly launched
    New,
    /// Similar to a source product
    Similar,
    /// Popular in a category
    Category,
    /// Matching a tag set
    Tag,
    /// Tuned to the caller's preferences and history
    Personalized,
    /// Preferences only, no history
    Interests,
    /// What people with overlapping engagement also engaged with
    Collaborative,
    /// Home feed
    Feed,
    /// Free-text search ranking
    Search,
    /// Balanced engagement and freshness
    Default,
}

impl Strategy {
    /// All strategies
    pub const ALL: [Strategy; 11] = [
        Strategy::Trending,
        Strategy::New,
        Strategy::Similar,
        Strategy::Category,
        Strategy::Tag,
        Strategy::Personalized,
        Strategy::Interests,
        Strategy::Collaborative,
        Strategy::Feed,
        Strategy::Search,
        Strategy::Default,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trending => "trending",
            Self::New => "new",
            Self::Similar => "similar",
            Self::Category => "category",
            Self::Tag => "tag",
            Self::Personalized => "personalized",
            Self::Interests => "interests",
            Self::Collaborative => "collaborative",
            Self::Feed => "feed",
            Self::Search => "search",
            Self::Default => "default",
        }
    }

    /// Base formula used by the kernel
    #[must_use]
    pub const fn composition(self) -> Composition {
        match self {
            Self::Trending => Composition::Trending,
            Self::New => Composition::New,
            Self::Similar => Composition::Similar,
            Self::Category => Composition::Category,
            Self::Tag => Composition::Tag,
            Self::Personalized | Self::Interests | Self::Collaborative => {
                Composition::Personalized
            }
            Self::Search => Composition::Search,
            Self::Feed | Self::Default => Composition::Default,
        }
    }

    /// Whether the strategy reads the caller's recent history
    #[inline]
    #[must_use]
    pub const fn uses_history(self) -> bool {
        matches!(self, Self::Personalized | Self::Collaborative | Self::Feed)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Unrecognized strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy: {0}")]
pub struct UnknownStrategy(pub String);

/// Base composition formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Composition {
    /// `trending · psychological`
    Trending,
    /// `recency · 2 + engagement · 0.3`
    New,
    /// Tag, category and maker overlap with a source product
    Similar,
    /// `engagement · 1.2 + categoryMatch`
    Category,
    /// `tagMatchCount · tagMatch + engagement · 0.5`
    Tag,
    /// Preference and history composite
    Personalized,
    /// Default plus a text-match boost
    Search,
    /// `(engagement + recency · 0.8) · psychological`
    Default,
}

/// Strategies exposed on a given surface
///
/// The public recommendations endpoint accepts only a subset of the
/// strategies the kernel understands; the registry is the single place that
/// subset is declared.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeSet<Strategy>,
}

impl StrategyRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: BTreeSet::new(),
        }
    }

    /// Strategies reachable through `recommendations/{strategy}`
    #[must_use]
    pub fn recommendation_endpoints() -> Self {
        let mut registry = Self::new();
        for strategy in [
            Strategy::Trending,
            Strategy::New,
            Strategy::Personalized,
            Strategy::Interests,
            Strategy::Collaborative,
            Strategy::Feed,
        ] {
            registry.register(strategy);
        }
        registry
    }

    /// Register a strategy
    pub fn register(&mut self, strategy: Strategy) {
        self.strategies.insert(strategy);
    }

    /// Check if strategy is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, strategy: Strategy) -> bool {
        self.strategies.contains(&strategy)
    }

    /// Resolve a name to a registered strategy
    ///
    /// # Errors
    /// Unknown or unregistered names.
    pub fn resolve(&self, name: &str) -> Result<Strategy, UnknownStrategy> {
        let strategy = name.parse::<Strategy>()?;
        if self.contains(strategy) {
            Ok(strategy)
        } else {
            Err(UnknownStrategy(name.to_string()))
        }
    }

    /// Registered names in stable order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.as_str()).collect()
    }

    /// Number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Pick a strategy for a home surface
    ///
    /// - authenticated with preferences → `personalized`
    /// - authenticated without preferences → `feed`
    /// - anonymous → `trending`
    #[must_use]
    pub fn select_for_home(&self, authenticated: bool, has_preferences: bool) -> Strategy {
        let preferred = match (authenticated, has_preferences) {
            (true, true) => Strategy::Personalized,
            (true, false) => Strategy::Feed,
            (false, _) => Strategy::Trending,
        };
        if self.contains(preferred) {
            preferred
        } else {
            Strategy::Default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>(), Ok(strategy));
        }
        assert!("viral".parse::<Strategy>().is_err());
    }

    #[test]
    fn variants_share_compositions() {
        assert_eq!(Strategy::Interests.composition(), Composition::Personalized);
        assert_eq!(Strategy::Collaborative.composition(), Composition::Personalized);
        assert_eq!(Strategy::Feed.composition(), Composition::Default);
    }

    #[test]
    fn endpoint_registry_rejects_internal_strategies() {
        let registry = StrategyRegistry::recommendation_endpoints();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.resolve("trending"), Ok(Strategy::Trending));
        assert!(registry.resolve("similar").is_err());
        assert!(registry.resolve("nonsense").is_err());
    }

    #[test]
    fn home_selection() {
        let registry = StrategyRegistry::recommendation_endpoints();
        assert_eq!(registry.select_for_home(false, false), Strategy::Trending);
        assert_eq!(registry.select_for_home(true, true), Strategy::Personalized);
        assert_eq!(registry.select_for_home(true, false), Strategy::Feed);
        assert_eq!(StrategyRegistry::new().select_for_home(true, true), Strategy::Default);
    }
}
