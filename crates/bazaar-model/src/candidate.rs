//! Enriched candidate records handed to the scoring kernel

use crate::ids::{CategoryId, UserId};
use crate::product::{Counters, Product};
use serde::{Deserialize, Serialize};

/// Maker summary embedded in a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerSummary {
    /// Maker identity
    pub id: UserId,
    /// Display name
    pub name: String,
}

/// Category summary embedded in a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    /// Category identity
    pub id: CategoryId,
    /// Display name
    pub name: String,
}

/// Engagement inside the recent window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    /// Views in window
    pub recent_views: u64,
    /// Upvotes activated in window
    pub recent_upvotes: u64,
    /// Comments in window
    pub recent_comments: u64,
    /// Bookmarks activated in window
    pub recent_bookmarks: u64,
    /// Window length in days
    pub window_days: u32,
}

/// Product enriched with everything the kernel needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Catalog record
    pub product: Product,
    /// Counter snapshot
    pub counters: Counters,
    /// Recent-window subcounts
    pub recent: RecentActivity,
    /// Maker summary
    pub maker: MakerSummary,
    /// Category summary
    pub category: CategorySummary,
    /// Age in fractional days at fetch time
    pub age_in_days: f64,
}

impl Candidate {
    /// Build a candidate from a product with zero engagement
    #[must_use]
    pub fn bare(product: Product, age_in_days: f64) -> Self {
        Self {
            maker: MakerSummary {
                id: product.maker.clone(),
                name: product.maker.to_string(),
            },
            category: CategorySummary {
                id: product.category.clone(),
                name: product.category_name.clone(),
            },
            product,
            counters: Counters::default(),
            recent: RecentActivity::default(),
            age_in_days,
        }
    }

    /// With counters
    #[inline]
    #[must_use]
    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.counters = counters;
        self
    }

    /// With recent-window subcounts
    #[inline]
    #[must_use]
    pub fn with_recent(mut self, recent: RecentActivity) -> Self {
        self.recent = recent;
        self
    }
}
