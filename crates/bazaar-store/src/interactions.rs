//! Interaction store
//!
//! Holds the per-product interaction ledger and derives counters from it.
//! Counters are never stored independently of the active-record sets, so a
//! counter read can never disagree with the ledger it was read from.
//!
//! # Serialization
//!
//! Every write to a product goes through that product's ledger entry, which
//! is held exclusively for the duration of the write. Toggles for the same
//! (user, product) are therefore totally ordered and each commit receives a
//! per-product sequence number.

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use bazaar_model::{
    Counters, Interaction, InteractionKind, InteractionMetadata, ProductId, RecentActivity,
    ToggleOutcome, UserId,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Store tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Window for distinct-viewer counting
    pub unique_viewer_window_days: i64,
    /// Window for recent subcounts handed to the kernel
    pub recent_window_days: u32,
    /// Per-user interaction log capacity
    pub user_log_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            unique_viewer_window_days: 30,
            recent_window_days: 7,
            user_log_capacity: 500,
        }
    }
}

/// Caller's active toggles on one product
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInteractionState {
    /// Caller has an active upvote
    pub upvoted: bool,
    /// Caller has an active bookmark
    pub bookmarked: bool,
}

#[derive(Debug, Clone)]
struct ViewRecord {
    user: Option<UserId>,
    at: DateTime<Utc>,
    counted: bool,
}

#[derive(Debug, Clone)]
struct CommentRecord {
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProductLedger {
    upvoters: HashMap<UserId, DateTime<Utc>>,
    bookmarkers: HashMap<UserId, DateTime<Utc>>,
    comments: BTreeMap<u64, CommentRecord>,
    views: VecDeque<ViewRecord>,
    view_count: u64,
    seq: u64,
    next_comment: u64,
}

impl ProductLedger {
    fn counters(&self, unique_since: DateTime<Utc>) -> Counters {
        let unique: HashSet<&UserId> = self
            .views
            .iter()
            .filter(|v| v.counted && v.at >= unique_since)
            .filter_map(|v| v.user.as_ref())
            .collect();
        Counters {
            upvote_count: self.upvoters.len() as u64,
            bookmark_count: self.bookmarkers.len() as u64,
            view_count: self.view_count,
            unique_viewer_count: unique.len() as u64,
            comment_count: self.comments.len() as u64,
        }
    }

    fn recent(&self, since: DateTime<Utc>, window_days: u32) -> RecentActivity {
        RecentActivity {
            recent_views: self
                .views
                .iter()
                .filter(|v| v.counted && v.at >= since)
                .count() as u64,
            recent_upvotes: self.upvoters.values().filter(|at| **at >= since).count() as u64,
            recent_comments: self.comments.values().filter(|c| c.at >= since).count() as u64,
            recent_bookmarks: self.bookmarkers.values().filter(|at| **at >= since).count() as u64,
            window_days,
        }
    }

    fn prune_views(&mut self, retain_since: DateTime<Utc>) {
        while self.views.front().is_some_and(|v| v.at < retain_since) {
            self.views.pop_front();
        }
    }

    fn commit(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToggleFamily {
    Upvote,
    Bookmark,
}

impl ToggleFamily {
    fn action(self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Bookmark => "bookmark",
        }
    }

    fn kind(self, active: bool) -> InteractionKind {
        match (self, active) {
            (Self::Upvote, true) => InteractionKind::Upvote,
            (Self::Upvote, false) => InteractionKind::RemoveUpvote,
            (Self::Bookmark, true) => InteractionKind::Bookmark,
            (Self::Bookmark, false) => InteractionKind::RemoveBookmark,
        }
    }
}

/// Authoritative interaction ledger and counter owner
#[derive(Debug)]
pub struct InteractionStore {
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    ledgers: DashMap<ProductId, ProductLedger>,
    engaged: DashMap<UserId, HashMap<ProductId, UserInteractionState>>,
    user_log: DashMap<UserId, VecDeque<Interaction>>,
}

impl InteractionStore {
    /// Create store over `catalog` with the system clock
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::with_clock(catalog, Arc::new(SystemClock), StoreConfig::default())
    }

    /// Create store with an explicit clock and configuration
    #[must_use]
    pub fn with_clock(catalog: Arc<Catalog>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        Self {
            catalog,
            clock,
            config,
            ledgers: DashMap::new(),
            engaged: DashMap::new(),
            user_log: DashMap::new(),
        }
    }

    /// Catalog this store writes against
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Store configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current time according to the store clock
    #[inline]
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Flip the caller's upvote on `product`
    ///
    /// # Errors
    /// `ProductNotFound`, or `SelfInteraction` when the caller made the product.
    pub fn toggle_upvote(&self, user: &UserId, product: &ProductId) -> StoreResult<ToggleOutcome> {
        self.toggle(ToggleFamily::Upvote, user, product)
    }

    /// Flip the caller's bookmark on `product`
    ///
    /// # Errors
    /// `ProductNotFound`, or `SelfInteraction` when the caller made the product.
    pub fn toggle_bookmark(
        &self,
        user: &UserId,
        product: &ProductId,
    ) -> StoreResult<ToggleOutcome> {
        self.toggle(ToggleFamily::Bookmark, user, product)
    }

    fn toggle(
        &self,
        family: ToggleFamily,
        user: &UserId,
        product: &ProductId,
    ) -> StoreResult<ToggleOutcome> {
        let record = self
            .catalog
            .product(product)
            .ok_or_else(|| StoreError::ProductNotFound(product.to_string()))?;
        if record.is_made_by(user) {
            return Err(StoreError::SelfInteraction {
                action: family.action(),
            });
        }

        let now = self.clock.now();
        let mut ledger = self.ledgers.entry(product.clone()).or_default();
        let set = match family {
            ToggleFamily::Upvote => &mut ledger.upvoters,
            ToggleFamily::Bookmark => &mut ledger.bookmarkers,
        };
        let now_active = if set.remove(user).is_some() {
            false
        } else {
            set.insert(user.clone(), now);
            true
        };
        let new_count = set.len() as u64;
        let seq = ledger.commit();

        // Engagement index is updated under the ledger entry so it follows
        // the same per-product order as the active sets.
        {
            let mut index = self.engaged.entry(user.clone()).or_default();
            let state = index.entry(product.clone()).or_default();
            match family {
                ToggleFamily::Upvote => state.upvoted = now_active,
                ToggleFamily::Bookmark => state.bookmarked = now_active,
            }
            if !state.upvoted && !state.bookmarked {
                index.remove(product);
            }
        }
        drop(ledger);

        self.log(Interaction::new(
            Some(user.clone()),
            product.clone(),
            family.kind(now_active),
            now,
        ));
        tracing::debug!(
            user = %user,
            product = %product,
            action = family.action(),
            now_active,
            new_count,
            seq,
            "toggle committed"
        );

        Ok(ToggleOutcome {
            now_active,
            new_count,
            seq,
        })
    }

    /// Append a view
    ///
    /// Bot views and the maker's own views are kept in the log but excluded
    /// from `viewCount` and `uniqueViewerCount`.
    ///
    /// # Errors
    /// `ProductNotFound`.
    pub fn record_view(
        &self,
        user: Option<&UserId>,
        product: &ProductId,
        metadata: InteractionMetadata,
    ) -> StoreResult<Counters> {
        let record = self
            .catalog
            .product(product)
            .ok_or_else(|| StoreError::ProductNotFound(product.to_string()))?;
        let own_view = user.is_some_and(|u| record.is_made_by(u));
        let counted = !metadata.is_bot && !own_view;

        let now = self.clock.now();
        let counters = {
            let mut ledger = self.ledgers.entry(product.clone()).or_default();
            ledger.views.push_back(ViewRecord {
                user: user.cloned(),
                at: now,
                counted,
            });
            if counted {
                ledger.view_count += 1;
            }
            ledger.commit();
            ledger.prune_views(now - self.retention());
            ledger.counters(self.unique_since(now))
        };

        if let Some(user) = user {
            self.log(
                Interaction::new(Some(user.clone()), product.clone(), InteractionKind::View, now)
                    .with_metadata(metadata.clone()),
            );
        }
        if metadata.is_bot {
            tracing::debug!(product = %product, "bot view recorded without counting");
        }
        Ok(counters)
    }

    /// Record a comment and return its id with the updated counters
    ///
    /// # Errors
    /// `ProductNotFound`.
    pub fn record_comment(&self, user: &UserId, product: &ProductId) -> StoreResult<(u64, Counters)> {
        if self.catalog.product(product).is_none() {
            return Err(StoreError::ProductNotFound(product.to_string()));
        }
        let now = self.clock.now();
        let (id, counters) = {
            let mut ledger = self.ledgers.entry(product.clone()).or_default();
            ledger.next_comment += 1;
            let id = ledger.next_comment;
            ledger.comments.insert(id, CommentRecord { at: now });
            ledger.commit();
            (id, ledger.counters(self.unique_since(now)))
        };
        self.log(Interaction::new(
            Some(user.clone()),
            product.clone(),
            InteractionKind::Comment,
            now,
        ));
        Ok((id, counters))
    }

    /// Remove a comment
    ///
    /// # Errors
    /// `CommentNotFound` when the product has no such comment.
    pub fn remove_comment(&self, product: &ProductId, comment: u64) -> StoreResult<Counters> {
        let now = self.clock.now();
        let mut ledger = self
            .ledgers
            .get_mut(product)
            .ok_or_else(|| StoreError::CommentNotFound {
                product: product.to_string(),
                comment,
            })?;
        if ledger.comments.remove(&comment).is_none() {
            return Err(StoreError::CommentNotFound {
                product: product.to_string(),
                comment,
            });
        }
        ledger.commit();
        Ok(ledger.counters(self.unique_since(now)))
    }

    /// Caller's interactions newer than `window`, oldest first
    #[must_use]
    pub fn recent_interactions(&self, user: &UserId, window: Duration) -> Vec<Interaction> {
        let since = self.clock.now() - window;
        self.user_log
            .get(user)
            .map(|log| log.iter().filter(|i| i.at >= since).cloned().collect())
            .unwrap_or_default()
    }

    /// Timestamp of the caller's latest interaction
    #[must_use]
    pub fn last_activity(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.user_log
            .get(user)
            .and_then(|log| log.iter().map(|i| i.at).max())
    }

    /// Counter snapshot (zero for products without interactions)
    #[must_use]
    pub fn product_counters(&self, product: &ProductId) -> Counters {
        let since = self.unique_since(self.clock.now());
        self.ledgers
            .get(product)
            .map(|l| l.counters(since))
            .unwrap_or_default()
    }

    /// Counter snapshots for several products
    #[must_use]
    pub fn bulk_counters<'a, I>(&self, products: I) -> HashMap<ProductId, Counters>
    where
        I: IntoIterator<Item = &'a ProductId>,
    {
        products
            .into_iter()
            .map(|id| (id.clone(), self.product_counters(id)))
            .collect()
    }

    /// Engagement inside the last `window_days`
    #[must_use]
    pub fn recent_activity(&self, product: &ProductId, window_days: u32) -> RecentActivity {
        let since = self.clock.now() - Duration::days(i64::from(window_days));
        self.ledgers
            .get(product)
            .map(|l| l.recent(since, window_days))
            .unwrap_or(RecentActivity {
                window_days,
                ..RecentActivity::default()
            })
    }

    /// Per-product commit sequence
    #[must_use]
    pub fn sequence(&self, product: &ProductId) -> u64 {
        self.ledgers.get(product).map_or(0, |l| l.seq)
    }

    /// Caller's active toggles on `product`
    #[must_use]
    pub fn user_state(&self, user: &UserId, product: &ProductId) -> UserInteractionState {
        self.engaged
            .get(user)
            .and_then(|index| index.get(product).copied())
            .unwrap_or_default()
    }

    /// Products the caller has upvoted or bookmarked
    #[must_use]
    pub fn engaged_products(&self, user: &UserId) -> HashSet<ProductId> {
        self.engaged
            .get(user)
            .map(|index| index.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Users with an active upvote or bookmark on `product`
    #[must_use]
    pub fn engagers(&self, product: &ProductId) -> HashSet<UserId> {
        self.ledgers
            .get(product)
            .map(|l| {
                l.upvoters
                    .keys()
                    .chain(l.bookmarkers.keys())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Products engaged by the caller's neighbors, with neighbor counts
    ///
    /// Neighbors are users holding an active upvote or bookmark on at least
    /// one product the caller also engaged with. Products the caller already
    /// engaged with are left out.
    #[must_use]
    pub fn co_engagement(&self, user: &UserId) -> HashMap<ProductId, u32> {
        let mine = self.engaged_products(user);
        let neighbors: HashSet<UserId> = mine
            .iter()
            .flat_map(|p| self.engagers(p))
            .filter(|other| other != user)
            .collect();

        let mut support: HashMap<ProductId, u32> = HashMap::new();
        for neighbor in &neighbors {
            for product in self.engaged_products(neighbor) {
                if !mine.contains(&product) {
                    *support.entry(product).or_insert(0) += 1;
                }
            }
        }
        support
    }

    /// Drop every record for a deleted product
    pub fn forget_product(&self, product: &ProductId) {
        if let Some((_, ledger)) = self.ledgers.remove(product) {
            for user in ledger.upvoters.keys().chain(ledger.bookmarkers.keys()) {
                if let Some(mut index) = self.engaged.get_mut(user) {
                    index.remove(product);
                }
            }
        }
    }

    fn log(&self, interaction: Interaction) {
        let Some(user) = interaction.user.clone() else {
            return;
        };
        let mut log = self.user_log.entry(user).or_default();
        log.push_back(interaction);
        while log.len() > self.config.user_log_capacity {
            log.pop_front();
        }
    }

    fn unique_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.config.unique_viewer_window_days)
    }

    fn retention(&self) -> Duration {
        Duration::days(
            self.config
                .unique_viewer_window_days
                .max(i64::from(self.config.recent_window_days)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use bazaar_model::Product;
    use proptest::prelude::*;

    fn store() -> InteractionStore {
        let catalog = Arc::new(Catalog::new());
        catalog
            .insert_product(Product::new("p1", "notes", "maker", "tools"))
            .unwrap();
        catalog
            .insert_product(Product::new("p2", "tasks", "maker", "tools"))
            .unwrap();
        InteractionStore::new(catalog)
    }

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    fn pid(s: &str) -> ProductId {
        ProductId::from(s)
    }

    #[test]
    fn toggle_twice_restores_state() {
        let store = store();
        let first = store.toggle_upvote(&uid("u1"), &pid("p1")).unwrap();
        assert!(first.now_active);
        assert_eq!(first.new_count, 1);
        assert!(store.user_state(&uid("u1"), &pid("p1")).upvoted);

        let second = store.toggle_upvote(&uid("u1"), &pid("p1")).unwrap();
        assert!(!second.now_active);
        assert_eq!(second.new_count, 0);
        assert!(second.seq > first.seq);
        assert_eq!(store.product_counters(&pid("p1")), Counters::default());
        assert!(store.engaged_products(&uid("u1")).is_empty());
    }

    #[test]
    fn maker_cannot_toggle_own_product() {
        let store = store();
        assert_eq!(
            store.toggle_upvote(&uid("maker"), &pid("p1")),
            Err(StoreError::SelfInteraction { action: "upvote" })
        );
        assert_eq!(
            store.toggle_bookmark(&uid("maker"), &pid("p1")),
            Err(StoreError::SelfInteraction { action: "bookmark" })
        );
        assert_eq!(store.product_counters(&pid("p1")), Counters::default());
    }

    #[test]
    fn missing_product() {
        let store = store();
        assert!(matches!(
            store.toggle_bookmark(&uid("u1"), &pid("nope")),
            Err(StoreError::ProductNotFound(_))
        ));
    }

    #[test]
    fn bookmark_removal_decrements_the_same_counter() {
        let store = store();
        store.toggle_bookmark(&uid("u1"), &pid("p1")).unwrap();
        store.toggle_bookmark(&uid("u2"), &pid("p1")).unwrap();
        let out = store.toggle_bookmark(&uid("u1"), &pid("p1")).unwrap();
        assert_eq!(out.new_count, 1);
        assert_eq!(store.product_counters(&pid("p1")).bookmark_count, 1);
    }

    #[test]
    fn concurrent_toggles_serialize() {
        let store = Arc::new(store());
        for i in 0..10 {
            store.toggle_upvote(&uid(&format!("base{i}")), &pid("p1")).unwrap();
        }

        std::thread::scope(|s| {
            for _ in 0..2 {
                let store = Arc::clone(&store);
                s.spawn(move || store.toggle_upvote(&uid("u"), &pid("p1")).unwrap());
            }
        });

        let counters = store.product_counters(&pid("p1"));
        assert_eq!(counters.upvote_count, 10);
        assert!(!store.user_state(&uid("u"), &pid("p1")).upvoted);
    }

    #[test]
    fn bot_and_own_views_are_not_counted() {
        let store = store();
        let bot = InteractionMetadata {
            is_bot: true,
            ..InteractionMetadata::default()
        };
        store.record_view(None, &pid("p1"), bot).unwrap();
        store
            .record_view(Some(&uid("maker")), &pid("p1"), InteractionMetadata::default())
            .unwrap();
        let counters = store
            .record_view(Some(&uid("u1")), &pid("p1"), InteractionMetadata::default())
            .unwrap();
        assert_eq!(counters.view_count, 1);
        assert_eq!(counters.unique_viewer_count, 1);
    }

    #[test]
    fn unique_viewers_are_distinct_users() {
        let store = store();
        for _ in 0..3 {
            store
                .record_view(Some(&uid("u1")), &pid("p1"), InteractionMetadata::default())
                .unwrap();
        }
        store
            .record_view(None, &pid("p1"), InteractionMetadata::default())
            .unwrap();
        let counters = store
            .record_view(Some(&uid("u2")), &pid("p1"), InteractionMetadata::default())
            .unwrap();
        assert_eq!(counters.view_count, 5);
        assert_eq!(counters.unique_viewer_count, 2);
    }

    #[test]
    fn comments_keep_the_counter_consistent() {
        let store = store();
        let (first, _) = store.record_comment(&uid("u1"), &pid("p1")).unwrap();
        let (_, counters) = store.record_comment(&uid("u2"), &pid("p1")).unwrap();
        assert_eq!(counters.comment_count, 2);
        let counters = store.remove_comment(&pid("p1"), first).unwrap();
        assert_eq!(counters.comment_count, 1);
        assert!(matches!(
            store.remove_comment(&pid("p1"), first),
            Err(StoreError::CommentNotFound { .. })
        ));
    }

    #[test]
    fn recent_windows_follow_the_clock() {
        let catalog = Arc::new(Catalog::new());
        catalog
            .insert_product(Product::new("p1", "notes", "maker", "tools"))
            .unwrap();
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start - Duration::days(20)));
        let store = InteractionStore::with_clock(
            catalog,
            clock.clone() as Arc<dyn Clock>,
            StoreConfig::default(),
        );

        store.toggle_upvote(&uid("old"), &pid("p1")).unwrap();
        store
            .record_view(Some(&uid("old")), &pid("p1"), InteractionMetadata::default())
            .unwrap();
        clock.set(start);
        store.toggle_upvote(&uid("new"), &pid("p1")).unwrap();

        let recent = store.recent_activity(&pid("p1"), 7);
        assert_eq!(recent.recent_upvotes, 1);
        assert_eq!(recent.recent_views, 0);
        assert_eq!(recent.window_days, 7);
        assert_eq!(store.product_counters(&pid("p1")).upvote_count, 2);

        assert_eq!(store.recent_interactions(&uid("old"), Duration::days(7)).len(), 0);
        assert_eq!(store.recent_interactions(&uid("old"), Duration::days(30)).len(), 2);
        assert_eq!(store.last_activity(&uid("new")), Some(start));
    }

    #[test]
    fn co_engagement_finds_neighbors() {
        let store = store();
        store.toggle_upvote(&uid("me"), &pid("p1")).unwrap();
        store.toggle_upvote(&uid("peer"), &pid("p1")).unwrap();
        store.toggle_bookmark(&uid("peer"), &pid("p2")).unwrap();

        let support = store.co_engagement(&uid("me"));
        assert_eq!(support.get(&pid("p2")), Some(&1));
        assert!(!support.contains_key(&pid("p1")));
        assert!(store.co_engagement(&uid("stranger")).is_empty());
    }

    #[test]
    fn forgetting_a_product_clears_the_index() {
        let store = store();
        store.toggle_upvote(&uid("u1"), &pid("p1")).unwrap();
        store.forget_product(&pid("p1"));
        assert!(store.engaged_products(&uid("u1")).is_empty());
        assert_eq!(store.sequence(&pid("p1")), 0);
    }

    proptest! {
        #[test]
        fn counters_match_active_sets(ops in prop::collection::vec((0usize..4, any::<bool>()), 0..64)) {
            let store = store();
            let mut upvoted = HashSet::new();
            let mut bookmarked = HashSet::new();
            for (user, upvote) in ops {
                let user = uid(&format!("u{user}"));
                if upvote {
                    let out = store.toggle_upvote(&user, &pid("p1")).unwrap();
                    if !upvoted.remove(&user) { upvoted.insert(user.clone()); }
                    prop_assert_eq!(out.new_count, upvoted.len() as u64);
                    prop_assert_eq!(out.now_active, upvoted.contains(&user));
                } else {
                    let out = store.toggle_bookmark(&user, &pid("p1")).unwrap();
                    if !bookmarked.remove(&user) { bookmarked.insert(user.clone()); }
                    prop_assert_eq!(out.new_count, bookmarked.len() as u64);
                }
            }
            let counters = store.product_counters(&pid("p1"));
            prop_assert_eq!(counters.upvote_count, upvoted.len() as u64);
            prop_assert_eq!(counters.bookmark_count, bookmarked.len() as u64);
            prop_assert_eq!(store.engagers(&pid("p1")).len(), upvoted.union(&bookmarked).count());
        }
    }
}
