//! Product records and derived counters

use crate::ids::{CategoryId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Publication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    /// Not yet published
    #[default]
    Draft,
    /// Listed publicly
    Published,
    /// Withdrawn from listings
    Archived,
}

/// Who can see a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone
    #[default]
    Public,
    /// Maker and admins only
    Private,
}

/// A catalog product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Opaque identity
    pub id: ProductId,
    /// URL-safe unique handle
    pub slug: String,
    /// Display name
    pub name: String,
    /// One-line pitch
    pub tagline: String,
    /// Creator
    pub maker: UserId,
    /// Category
    pub category: CategoryId,
    /// Category display name
    pub category_name: String,
    /// Lowercased tag set
    pub tags: BTreeSet<String>,
    /// Publication status
    pub status: ProductStatus,
    /// Visibility
    pub visibility: Visibility,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Read-only to non-admins when set
    pub locked: bool,
    /// Optional list price
    pub price: Option<f64>,
}

impl Product {
    /// Create a published, public product created now
    #[must_use]
    pub fn new(
        id: impl Into<ProductId>,
        slug: impl Into<String>,
        maker: impl Into<UserId>,
        category: impl Into<CategoryId>,
    ) -> Self {
        let slug = slug.into();
        Self {
            id: id.into(),
            name: slug.clone(),
            slug,
            tagline: String::new(),
            maker: maker.into(),
            category: category.into(),
            category_name: String::new(),
            tags: BTreeSet::new(),
            status: ProductStatus::Published,
            visibility: Visibility::Public,
            created_at: Utc::now(),
            locked: false,
            price: None,
        }
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With tagline
    #[inline]
    #[must_use]
    pub fn with_tagline(mut self, tagline: impl Into<String>) -> Self {
        self.tagline = tagline.into();
        self
    }

    /// With category display name
    #[inline]
    #[must_use]
    pub fn with_category_name(mut self, name: impl Into<String>) -> Self {
        self.category_name = name.into();
        self
    }

    /// With tags (lowercased, trimmed, empty tags dropped)
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    /// With visibility
    #[inline]
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// With creation time
    #[inline]
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// With lock flag
    #[inline]
    #[must_use]
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// With price
    #[inline]
    #[must_use]
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Whether `user` created this product
    #[inline]
    #[must_use]
    pub fn is_made_by(&self, user: &UserId) -> bool {
        &self.maker == user
    }

    /// Age in fractional days relative to `now` (never negative)
    #[must_use]
    pub fn age_in_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_seconds().max(0) as f64;
        secs / 86_400.0
    }
}

/// Derived engagement counters
///
/// Owned by the interaction store; every other component reads snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    /// Active upvotes
    pub upvote_count: u64,
    /// Active bookmarks
    pub bookmark_count: u64,
    /// Non-bot views
    pub view_count: u64,
    /// Distinct authenticated viewers in the recent window
    pub unique_viewer_count: u64,
    /// Live comments
    pub comment_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn tags_are_normalized() {
        let p = Product::new("p1", "p-1", "u1", "c1").with_tags(["  AI ", "Dev", ""]);
        assert_eq!(
            p.tags.iter().cloned().collect::<Vec<_>>(),
            vec!["ai".to_string(), "dev".to_string()]
        );
    }

    #[test]
    fn age_is_never_negative() {
        let now = Utc::now();
        let p = Product::new("p1", "p-1", "u1", "c1").created_at(now + Duration::days(2));
        assert_eq!(p.age_in_days(now), 0.0);

        let p = p.created_at(now - Duration::days(3));
        assert!((p.age_in_days(now) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProductStatus::Published).unwrap(),
            "\"published\""
        );
    }
}
