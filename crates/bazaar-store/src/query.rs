//! Candidate query shape

use bazaar_model::{CategoryId, Product, ProductId, ProductStatus, UserId, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

/// Sort criterion before tie-breaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// `createdAt` descending
    #[default]
    Newest,
    /// `createdAt` ascending
    Oldest,
    /// `upvoteCount` descending
    Popular,
    /// `viewCount` descending
    MostViewed,
    /// Name ascending
    Alphabetical,
}

impl SortOrder {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::Popular => "popular",
            Self::MostViewed => "most_viewed",
            Self::Alphabetical => "alphabetical",
        }
    }
}

/// Filter and ordering for a candidate fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateQuery {
    /// Required status; `None` means Published for non-admin callers
    pub status: Option<ProductStatus>,
    /// Single category filter
    pub category: Option<CategoryId>,
    /// Any-of category filter
    pub categories: BTreeSet<CategoryId>,
    /// Any-of tag filter (lowercased)
    pub tags: BTreeSet<String>,
    /// Case-insensitive match on name, tagline or tags
    pub search: Option<String>,
    /// Inclusive price range
    pub price_range: Option<(f64, f64)>,
    /// Created at or after
    pub created_after: Option<DateTime<Utc>>,
    /// Created at or before
    pub created_before: Option<DateTime<Utc>>,
    /// Products to leave out
    pub exclude_ids: HashSet<ProductId>,
    /// Restrict to one maker
    pub maker: Option<UserId>,
    /// Caller identity, for private-product visibility
    pub viewer: Option<UserId>,
    /// Caller is an admin
    pub viewer_is_admin: bool,
    /// Primary sort
    pub sort: SortOrder,
}

impl CandidateQuery {
    /// Create an unfiltered query
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With single category
    #[inline]
    #[must_use]
    pub fn with_category(mut self, category: impl Into<CategoryId>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// With any-of categories
    #[must_use]
    pub fn with_categories<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = CategoryId>,
    {
        self.categories = categories.into_iter().collect();
        self
    }

    /// With any-of tags (lowercased)
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

    /// With free-text search
    #[inline]
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        let trimmed = search.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// With inclusive price range
    #[inline]
    #[must_use]
    pub fn with_price_range(mut self, min: f64, max: f64) -> Self {
        self.price_range = Some((min, max));
        self
    }

    /// Created no earlier than `after`
    #[inline]
    #[must_use]
    pub fn created_after(mut self, after: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self
    }

    /// Created no later than `before`
    #[inline]
    #[must_use]
    pub fn created_before(mut self, before: DateTime<Utc>) -> Self {
        self.created_before = Some(before);
        self
    }

    /// Excluding `ids`
    #[must_use]
    pub fn excluding<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = ProductId>,
    {
        self.exclude_ids.extend(ids);
        self
    }

    /// Restricted to a maker
    #[inline]
    #[must_use]
    pub fn with_maker(mut self, maker: impl Into<UserId>) -> Self {
        self.maker = Some(maker.into());
        self
    }

    /// As seen by `viewer`
    #[inline]
    #[must_use]
    pub fn for_viewer(mut self, viewer: Option<UserId>, is_admin: bool) -> Self {
        self.viewer = viewer;
        self.viewer_is_admin = is_admin;
        self
    }

    /// With sort order
    #[inline]
    #[must_use]
    pub fn sorted_by(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Status filter after defaults: Published for non-admins, any for admins
    #[inline]
    #[must_use]
    pub fn effective_status(&self) -> Option<ProductStatus> {
        match self.status {
            Some(status) => Some(status),
            None if self.viewer_is_admin => None,
            None => Some(ProductStatus::Published),
        }
    }

    /// Check the query is well-formed
    ///
    /// # Errors
    /// Inverted price or date ranges.
    pub fn validate(&self) -> Result<(), String> {
        if let Some((min, max)) = self.price_range {
            if !(min.is_finite() && max.is_finite()) || min > max {
                return Err(format!("invalid price range {min}..{max}"));
            }
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err("createdAfter is later than createdBefore".to_string());
            }
        }
        Ok(())
    }

    /// Whether `product` passes every filter
    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(status) = self.effective_status() {
            if product.status != status {
                return false;
            }
        }
        if product.visibility == Visibility::Private && !self.viewer_is_admin {
            let is_maker = self.viewer.as_ref().is_some_and(|v| product.is_made_by(v));
            if !is_maker {
                return false;
            }
        }
        if self.exclude_ids.contains(&product.id) {
            return false;
        }
        if self.category.as_ref().is_some_and(|c| *c != product.category) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&product.category) {
            return false;
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&product.tags) {
            return false;
        }
        if self.maker.as_ref().is_some_and(|m| *m != product.maker) {
            return false;
        }
        if let Some((min, max)) = self.price_range {
            match product.price {
                Some(price) if price >= min && price <= max => {}
                _ => return false,
            }
        }
        if self.created_after.is_some_and(|after| product.created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| product.created_at > before) {
            return false;
        }
        if let Some(search) = &self.search {
            if !text_match(product, search) {
                return false;
            }
        }
        true
    }

    /// Canonical text form; equal queries produce equal fingerprints
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        let status = self
            .effective_status()
            .map_or("any", |s| match s {
                ProductStatus::Draft => "draft",
                ProductStatus::Published => "published",
                ProductStatus::Archived => "archived",
            });
        let _ = write!(out, "status={status}");
        if let Some(category) = &self.category {
            let _ = write!(out, ";category={category}");
        }
        if !self.categories.is_empty() {
            let joined: Vec<&str> = self.categories.iter().map(CategoryId::as_str).collect();
            let _ = write!(out, ";categories={}", joined.join(","));
        }
        if !self.tags.is_empty() {
            let joined: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            let _ = write!(out, ";tags={}", joined.join(","));
        }
        if let Some(search) = &self.search {
            let _ = write!(out, ";search={}", search.to_lowercase());
        }
        if let Some((min, max)) = self.price_range {
            let _ = write!(out, ";price={min}..{max}");
        }
        if let Some(after) = self.created_after {
            let _ = write!(out, ";after={}", after.timestamp());
        }
        if let Some(before) = self.created_before {
            let _ = write!(out, ";before={}", before.timestamp());
        }
        if !self.exclude_ids.is_empty() {
            let mut ids: Vec<&str> = self.exclude_ids.iter().map(ProductId::as_str).collect();
            ids.sort_unstable();
            let _ = write!(out, ";exclude={}", ids.join(","));
        }
        if let Some(maker) = &self.maker {
            let _ = write!(out, ";maker={maker}");
        }
        let _ = write!(out, ";sort={}", self.sort.as_str());
        out
    }
}

/// Case-insensitive match of `search` against name, tagline and tags
#[must_use]
pub fn text_match(product: &Product, search: &str) -> bool {
    let needle = search.to_lowercase();
    product.name.to_lowercase().contains(&needle)
        || product.tagline.to_lowercase().contains(&needle)
        || product.tags.iter().any(|t| t.contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_model::Product;
    use chrono::Duration;

    fn product() -> Product {
        Product::new("p1", "notes", "maker", "tools")
            .with_name("Quick Notes")
            .with_tags(["writing", "ai"])
            .with_price(9.0)
    }

    #[test]
    fn non_admins_only_see_published() {
        let draft = product().with_status(ProductStatus::Draft);
        assert!(!CandidateQuery::new().matches(&draft));
        assert!(CandidateQuery::new().for_viewer(None, true).matches(&draft));
        assert!(CandidateQuery::new().matches(&product()));
    }

    #[test]
    fn private_products_need_maker_or_admin() {
        let private = product().with_visibility(Visibility::Private);
        assert!(!CandidateQuery::new().matches(&private));
        assert!(CandidateQuery::new()
            .for_viewer(Some(UserId::from("maker")), false)
            .matches(&private));
        assert!(!CandidateQuery::new()
            .for_viewer(Some(UserId::from("someone")), false)
            .matches(&private));
    }

    #[test]
    fn filters() {
        let p = product();
        assert!(CandidateQuery::new().with_tags(["AI"]).matches(&p));
        assert!(!CandidateQuery::new().with_tags(["games"]).matches(&p));
        assert!(CandidateQuery::new().with_search("notes").matches(&p));
        assert!(CandidateQuery::new().with_search("WRIT").matches(&p));
        assert!(!CandidateQuery::new().with_search("calendar").matches(&p));
        assert!(CandidateQuery::new().with_price_range(5.0, 10.0).matches(&p));
        assert!(!CandidateQuery::new().with_price_range(10.0, 20.0).matches(&p));
        assert!(!CandidateQuery::new().excluding([p.id.clone()]).matches(&p));
        assert!(!CandidateQuery::new().with_category("games").matches(&p));
        assert!(!CandidateQuery::new()
            .created_after(Utc::now() + Duration::days(1))
            .matches(&p));
    }

    #[test]
    fn validation_rejects_inverted_ranges() {
        assert!(CandidateQuery::new().with_price_range(10.0, 1.0).validate().is_err());
        let now = Utc::now();
        assert!(CandidateQuery::new()
            .created_after(now)
            .created_before(now - Duration::days(1))
            .validate()
            .is_err());
        assert!(CandidateQuery::new().validate().is_ok());
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = CandidateQuery::new()
            .with_tags(["b", "a"])
            .excluding([ProductId::from("x"), ProductId::from("y")]);
        let b = CandidateQuery::new()
            .with_tags(["a", "b"])
            .excluding([ProductId::from("y"), ProductId::from("x")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), CandidateQuery::new().fingerprint());
    }
}
