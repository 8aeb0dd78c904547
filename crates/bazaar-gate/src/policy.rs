//! Write and read policies
//!
//! Each rule is a [`Policy`]; a [`PolicySet`] evaluates them in order and
//! stops at the first refusal.

use bazaar_model::{BazaarError, Product, ProductStatus, UserId, Visibility};
use std::fmt::Debug;

/// What the caller is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read the product
    Read,
    /// Toggle upvote
    Upvote,
    /// Toggle bookmark
    Bookmark,
    /// Record a view
    View,
    /// Post a comment
    Comment,
    /// Edit product fields
    Update,
    /// Change gallery images
    Gallery,
    /// Remove the product
    Delete,
}

impl Action {
    /// Whether the action changes product content
    #[inline]
    #[must_use]
    pub const fn is_content_write(self) -> bool {
        matches!(self, Self::Comment | Self::Update | Self::Gallery | Self::Delete)
    }

    /// Label for messages
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Upvote => "upvote",
            Self::Bookmark => "bookmark",
            Self::View => "view",
            Self::Comment => "comment",
            Self::Update => "update",
            Self::Gallery => "gallery",
            Self::Delete => "delete",
        }
    }
}

/// Who is acting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// Authenticated user
    pub user: Option<UserId>,
    /// Admin rights
    pub is_admin: bool,
}

impl Actor {
    /// Anonymous caller
    #[inline]
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticated caller
    #[inline]
    #[must_use]
    pub fn user(id: UserId) -> Self {
        Self {
            user: Some(id),
            is_admin: false,
        }
    }

    /// Grant admin rights
    #[inline]
    #[must_use]
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Whether the caller made `product`
    #[must_use]
    pub fn is_maker_of(&self, product: &Product) -> bool {
        self.user.as_ref().is_some_and(|u| product.is_made_by(u))
    }
}

/// One rule
pub trait Policy: Send + Sync + Debug {
    /// Rule name for logs
    fn name(&self) -> &'static str;

    /// Refuse or allow
    ///
    /// # Errors
    /// The refusal to return to the caller.
    fn check(&self, action: Action, product: &Product, actor: &Actor) -> Result<(), BazaarError>;
}

/// Makers may not upvote or bookmark their own products
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfInteraction;

impl Policy for SelfInteraction {
    fn name(&self) -> &'static str {
        "self_interaction"
    }

    fn check(&self, action: Action, product: &Product, actor: &Actor) -> Result<(), BazaarError> {
        if matches!(action, Action::Upvote | Action::Bookmark) && actor.is_maker_of(product) {
            return Err(BazaarError::forbidden(format!(
                "you cannot {} your own product",
                action.as_str()
            )));
        }
        Ok(())
    }
}

/// Locked products are read-only to non-admins
#[derive(Debug, Clone, Copy, Default)]
pub struct Locked;

impl Policy for Locked {
    fn name(&self) -> &'static str {
        "locked"
    }

    fn check(&self, action: Action, product: &Product, actor: &Actor) -> Result<(), BazaarError> {
        if product.locked && action.is_content_write() && !actor.is_admin {
            return Err(BazaarError::forbidden("product is locked"));
        }
        Ok(())
    }
}

/// Private products are visible to their maker and admins only
#[derive(Debug, Clone, Copy, Default)]
pub struct VisibilityRule;

impl Policy for VisibilityRule {
    fn name(&self) -> &'static str {
        "visibility"
    }

    fn check(&self, _action: Action, product: &Product, actor: &Actor) -> Result<(), BazaarError> {
        if product.visibility == Visibility::Private && !actor.is_admin && !actor.is_maker_of(product)
        {
            return Err(BazaarError::forbidden("product is private"));
        }
        Ok(())
    }
}

/// Unpublished products do not exist for other readers
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusRule;

impl Policy for StatusRule {
    fn name(&self) -> &'static str {
        "status"
    }

    fn check(&self, _action: Action, product: &Product, actor: &Actor) -> Result<(), BazaarError> {
        if product.status != ProductStatus::Published
            && !actor.is_admin
            && !actor.is_maker_of(product)
        {
            return Err(BazaarError::not_found(format!("product {}", product.slug)));
        }
        Ok(())
    }
}

/// Ordered policy pipeline
#[derive(Debug)]
pub struct PolicySet {
    policies: Vec<Box<dyn Policy>>,
}

impl Default for PolicySet {
    /// Status, visibility, lock, then self-interaction
    fn default() -> Self {
        Self::empty()
            .with(StatusRule)
            .with(VisibilityRule)
            .with(Locked)
            .with(SelfInteraction)
    }
}

impl PolicySet {
    /// Set with no rules
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Append a rule
    #[must_use]
    pub fn with(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// Rule names in evaluation order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Evaluate every rule
    ///
    /// # Errors
    /// The first refusal.
    pub fn check(&self, action: Action, product: &Product, actor: &Actor) -> Result<(), BazaarError> {
        for policy in &self.policies {
            if let Err(err) = policy.check(action, product, actor) {
                tracing::debug!(
                    policy = policy.name(),
                    action = action.as_str(),
                    product = %product.id,
                    "policy refused"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_model::{CategoryId, ProductId};

    fn product() -> Product {
        Product::new(
            ProductId::from("p1"),
            "notes",
            UserId::from("maker"),
            CategoryId::from("tools"),
        )
        .with_status(ProductStatus::Published)
    }

    fn visitor() -> Actor {
        Actor::user(UserId::from("visitor"))
    }

    fn maker() -> Actor {
        Actor::user(UserId::from("maker"))
    }

    #[test]
    fn makers_cannot_upvote_or_bookmark_their_own() {
        let set = PolicySet::default();
        for action in [Action::Upvote, Action::Bookmark] {
            let err = set.check(action, &product(), &maker()).unwrap_err();
            assert_eq!(err.http_status(), 403);
        }
        assert!(set.check(Action::View, &product(), &maker()).is_ok());
        assert!(set.check(Action::Upvote, &product(), &visitor()).is_ok());
    }

    #[test]
    fn locked_products_refuse_content_writes() {
        let set = PolicySet::default();
        let locked = product().locked(true);
        assert!(set.check(Action::Update, &locked, &maker()).is_err());
        assert!(set.check(Action::Comment, &locked, &visitor()).is_err());
        assert!(set.check(Action::Update, &locked, &maker().admin()).is_ok());
        assert!(set.check(Action::Read, &locked, &visitor()).is_ok());
    }

    #[test]
    fn private_products_hidden_from_others() {
        let set = PolicySet::default();
        let private = product().with_visibility(Visibility::Private);
        assert_eq!(
            set.check(Action::Read, &private, &visitor()).unwrap_err().http_status(),
            403
        );
        assert!(set.check(Action::Read, &private, &maker()).is_ok());
        assert!(set
            .check(Action::Read, &private, &Actor::anonymous().admin())
            .is_ok());
    }

    #[test]
    fn drafts_do_not_exist_for_readers() {
        let set = PolicySet::default();
        let draft = product().with_status(ProductStatus::Draft);
        assert_eq!(
            set.check(Action::Read, &draft, &Actor::anonymous())
                .unwrap_err()
                .http_status(),
            404
        );
        assert!(set.check(Action::Read, &draft, &maker()).is_ok());
    }

    #[test]
    fn rules_run_in_order() {
        assert_eq!(
            PolicySet::default().names(),
            vec!["status", "visibility", "locked", "self_interaction"]
        );
        assert!(PolicySet::empty()
            .check(Action::Upvote, &product(), &maker())
            .is_ok());
    }
}
