//! Write to invalidation plan mapping
//!
//! Each committed write becomes a set of cache patterns to purge, tags to
//! purge and push events to fan out. Patterns come from the shared key
//! grammar so purges always line up with lookups.

use crate::event::{EventKind, PushEvent};
use bazaar_cache::keys::{self, KeyPrefix};
use bazaar_model::{ProductId, ToggleOutcome, UserId};

/// A committed write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEvent {
    /// Upvote toggled
    UpvoteToggled {
        /// Product
        product: ProductId,
        /// Product slug
        slug: String,
        /// Acting user
        user: UserId,
        /// Store outcome
        outcome: ToggleOutcome,
    },
    /// Bookmark toggled
    BookmarkToggled {
        /// Product
        product: ProductId,
        /// Product slug
        slug: String,
        /// Acting user
        user: UserId,
        /// Store outcome
        outcome: ToggleOutcome,
    },
    /// Product created
    ProductCreated {
        /// Product
        product: ProductId,
        /// Product slug
        slug: String,
    },
    /// Product fields changed
    ProductUpdated {
        /// Product
        product: ProductId,
        /// Slug before the change
        old_slug: String,
        /// Slug after the change
        slug: String,
        /// Changed fields
        updates: serde_json::Value,
    },
    /// Product removed
    ProductDeleted {
        /// Product
        product: ProductId,
        /// Product slug
        slug: String,
    },
    /// Gallery images changed
    GalleryChanged {
        /// Product
        product: ProductId,
        /// Product slug
        slug: String,
    },
    /// Comment added or removed
    CommentsChanged {
        /// Product
        product: ProductId,
        /// Product slug
        slug: String,
        /// Comment count after the write
        count: u64,
    },
}

impl WriteEvent {
    /// Product concerned
    #[must_use]
    pub fn product(&self) -> &ProductId {
        match self {
            Self::UpvoteToggled { product, .. }
            | Self::BookmarkToggled { product, .. }
            | Self::ProductCreated { product, .. }
            | Self::ProductUpdated { product, .. }
            | Self::ProductDeleted { product, .. }
            | Self::GalleryChanged { product, .. }
            | Self::CommentsChanged { product, .. } => product,
        }
    }
}

/// What a write purges and announces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationPlan {
    /// Key patterns to purge
    pub patterns: Vec<String>,
    /// Tags to purge
    pub tags: Vec<String>,
    /// Events to deliver
    pub events: Vec<PushEvent>,
}

impl InvalidationPlan {
    fn purge(mut self, pattern: String) -> Self {
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }

    fn tag(mut self, tag: String) -> Self {
        self.tags.push(tag);
        self
    }

    fn announce(mut self, event: PushEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Purge every ranked surface a counter change can reorder
    fn ranked_surfaces(self) -> Self {
        self.purge(KeyPrefix::ProductsList.all_pattern())
            .purge(KeyPrefix::ProductsTrending.all_pattern())
            .purge(KeyPrefix::Recommendations.all_pattern())
            .purge(KeyPrefix::Rec.all_pattern())
    }
}

/// Cache tag of everything derived from one product
#[must_use]
pub fn product_tag(product: &ProductId) -> String {
    format!("product:{product}")
}

/// Plan for `write`
#[must_use]
pub fn plan(write: &WriteEvent) -> InvalidationPlan {
    let base = InvalidationPlan::default().tag(product_tag(write.product()));
    match write {
        WriteEvent::UpvoteToggled {
            product,
            slug,
            user,
            outcome,
        } => base
            .purge(keys::product_detail_pattern(slug))
            .ranked_surfaces()
            .announce(toggle_event(EventKind::Upvote, product, slug, user, outcome)),
        WriteEvent::BookmarkToggled {
            product,
            slug,
            user,
            outcome,
        } => base
            .purge(keys::product_detail_pattern(slug))
            .ranked_surfaces()
            .announce(toggle_event(EventKind::Bookmark, product, slug, user, outcome)),
        WriteEvent::ProductCreated { .. } => base
            .ranked_surfaces()
            .purge(KeyPrefix::Search.all_pattern()),
        WriteEvent::ProductUpdated {
            product,
            old_slug,
            slug,
            updates,
        } => base
            .purge(keys::product_detail_pattern(old_slug))
            .purge(keys::product_detail_pattern(slug))
            .ranked_surfaces()
            .purge(KeyPrefix::Search.all_pattern())
            .announce(PushEvent::update(product.clone(), slug.clone(), updates.clone())),
        WriteEvent::ProductDeleted { product, slug } => base
            .purge(keys::product_detail_pattern(slug))
            .ranked_surfaces()
            .purge(KeyPrefix::Search.all_pattern())
            .announce(PushEvent::update(
                product.clone(),
                slug.clone(),
                serde_json::json!({ "deleted": true }),
            )),
        WriteEvent::GalleryChanged { product, slug } => base
            .purge(keys::product_detail_pattern(slug))
            .purge(KeyPrefix::ProductsList.all_pattern())
            .announce(PushEvent::update(
                product.clone(),
                slug.clone(),
                serde_json::json!({ "gallery": true }),
            )),
        WriteEvent::CommentsChanged {
            product,
            slug,
            count,
        } => base
            .purge(keys::product_detail_pattern(slug))
            .purge(KeyPrefix::ProductsList.all_pattern())
            .announce(PushEvent::update(
                product.clone(),
                slug.clone(),
                serde_json::json!({ "commentCount": count }),
            )),
    }
}

fn toggle_event(
    kind: EventKind,
    product: &ProductId,
    slug: &str,
    user: &UserId,
    outcome: &ToggleOutcome,
) -> PushEvent {
    PushEvent::toggle(
        kind,
        product.clone(),
        slug,
        outcome.now_active,
        outcome.new_count,
        user.clone(),
    )
    .with_seq(outcome.seq)
}
