//! Users, preference vectors and the per-request personal context

use crate::ids::{CategoryId, ProductId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// User roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular member
    #[default]
    User,
    /// Publishes products
    Maker,
    /// Moderates content
    Moderator,
    /// Full access
    Admin,
}

/// Weighted preference vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Category id → weight
    pub categories: BTreeMap<CategoryId, f64>,
    /// Lowercased tag → weight
    pub tags: BTreeMap<String, f64>,
}

impl Preferences {
    /// Create empty preferences
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add weighted category
    #[inline]
    #[must_use]
    pub fn with_category(mut self, category: impl Into<CategoryId>, weight: f64) -> Self {
        self.categories.insert(category.into(), weight);
        self
    }

    /// Add weighted tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, tag: impl AsRef<str>, weight: f64) -> Self {
        self.tags.insert(tag.as_ref().to_lowercase(), weight);
        self
    }

    /// Preference weight of a category, if any
    #[inline]
    #[must_use]
    pub fn category_weight(&self, category: &CategoryId) -> Option<f64> {
        self.categories.get(category).copied()
    }

    /// Whether there is nothing to personalize on
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.tags.is_empty()
    }
}

/// Verification flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFlags {
    /// E-mail verified
    pub is_email_verified: bool,
    /// Phone verified
    pub is_phone_verified: bool,
    /// Last successful password re-check
    pub last_password_verified_at: Option<DateTime<Utc>>,
}

/// A marketplace user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Primary role
    pub role: Role,
    /// Secondary roles
    pub secondary_roles: BTreeSet<Role>,
    /// Preference vector
    pub preferences: Preferences,
    /// Verification flags
    pub flags: UserFlags,
}

impl User {
    /// Create regular user
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::User,
            secondary_roles: BTreeSet::new(),
            preferences: Preferences::default(),
            flags: UserFlags::default(),
        }
    }

    /// With primary role
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// With an additional secondary role
    #[inline]
    #[must_use]
    pub fn with_secondary_role(mut self, role: Role) -> Self {
        self.secondary_roles.insert(role);
        self
    }

    /// With preferences
    #[inline]
    #[must_use]
    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Whether the user holds `role` as primary or secondary
    #[inline]
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role || self.secondary_roles.contains(&role)
    }

    /// Admin check (primary or secondary)
    #[inline]
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

/// Request-time personalization input
///
/// Built from the user's preference vector and recent interaction window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonalContext {
    /// Who the feed is for
    pub user_id: Option<UserId>,
    /// Preference vector
    pub preferences: Preferences,
    /// Products viewed in the recent window
    pub recent_views: HashSet<ProductId>,
    /// Categories engaged with in the recent window
    pub recent_categories: HashSet<CategoryId>,
    /// Most recent interaction of any kind
    pub last_activity: Option<DateTime<Utc>>,
}

impl PersonalContext {
    /// Context for a user with no history
    #[inline]
    #[must_use]
    pub fn for_user(user_id: impl Into<UserId>, preferences: Preferences) -> Self {
        Self {
            user_id: Some(user_id.into()),
            preferences,
            ..Self::default()
        }
    }

    /// Whether the user has been inactive for more than `days`
    #[must_use]
    pub fn inactive_for(&self, days: i64, now: DateTime<Utc>) -> bool {
        self.last_activity
            .is_some_and(|last| now - last > Duration::days(days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secondary_admin_is_admin() {
        let user = User::new("u1", "Ada").with_secondary_role(Role::Admin);
        assert!(user.is_admin());
        assert!(!User::new("u2", "Bob").is_admin());
    }

    #[test]
    fn inactivity_needs_a_last_activity() {
        let now = Utc::now();
        let mut ctx = PersonalContext::for_user("u1", Preferences::new());
        assert!(!ctx.inactive_for(30, now));

        ctx.last_activity = Some(now - Duration::days(31));
        assert!(ctx.inactive_for(30, now));
    }
}
