//! In-memory product and user catalog
//!
//! Products are indexed by id and by slug. Slug uniqueness is enforced at
//! insert and on slug changes through the slug index entry.

use crate::error::{StoreError, StoreResult};
use bazaar_model::{Product, ProductId, User, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Product and user records
#[derive(Debug, Default)]
pub struct Catalog {
    products: DashMap<ProductId, Product>,
    slugs: DashMap<String, ProductId>,
    users: DashMap<UserId, User>,
}

impl Catalog {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new product
    ///
    /// # Errors
    /// Duplicate id or slug.
    pub fn insert_product(&self, product: Product) -> StoreResult<()> {
        if self.products.contains_key(&product.id) {
            return Err(StoreError::DuplicateProduct(product.id.to_string()));
        }
        match self.slugs.entry(product.slug.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateSlug(product.slug)),
            Entry::Vacant(slot) => {
                slot.insert(product.id.clone());
            }
        }
        tracing::debug!(product = %product.id, slug = %product.slug, "product inserted");
        self.products.insert(product.id.clone(), product);
        Ok(())
    }

    /// Apply `edit` to a product and return the updated record
    ///
    /// # Errors
    /// Missing product, or an edit that moves the product onto a taken slug.
    pub fn update_product<F>(&self, id: &ProductId, edit: F) -> StoreResult<Product>
    where
        F: FnOnce(&mut Product),
    {
        let mut entry = self
            .products
            .get_mut(id)
            .ok_or_else(|| StoreError::ProductNotFound(id.to_string()))?;

        let mut updated = entry.clone();
        edit(&mut updated);
        updated.id = id.clone();

        if updated.slug != entry.slug {
            match self.slugs.entry(updated.slug.clone()) {
                Entry::Occupied(_) => return Err(StoreError::DuplicateSlug(updated.slug)),
                Entry::Vacant(slot) => {
                    slot.insert(id.clone());
                }
            }
            self.slugs.remove(&entry.slug);
        }

        *entry = updated.clone();
        Ok(updated)
    }

    /// Remove a product
    ///
    /// # Errors
    /// Missing product.
    pub fn remove_product(&self, id: &ProductId) -> StoreResult<Product> {
        let (_, product) = self
            .products
            .remove(id)
            .ok_or_else(|| StoreError::ProductNotFound(id.to_string()))?;
        self.slugs.remove(&product.slug);
        Ok(product)
    }

    /// Product by id
    #[must_use]
    pub fn product(&self, id: &ProductId) -> Option<Product> {
        self.products.get(id).map(|p| p.clone())
    }

    /// Product by slug
    #[must_use]
    pub fn product_by_slug(&self, slug: &str) -> Option<Product> {
        let id = self.slugs.get(slug)?.clone();
        self.product(&id)
    }

    /// Snapshot of every product
    #[must_use]
    pub fn products(&self) -> Vec<Product> {
        self.products.iter().map(|p| p.value().clone()).collect()
    }

    /// Number of products
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the catalog has no products
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Insert or replace a user
    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// User by id
    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }

    /// Display name of a user, falling back to the raw id
    #[must_use]
    pub fn user_name(&self, id: &UserId) -> String {
        self.users
            .get(id)
            .map_or_else(|| id.to_string(), |u| u.name.clone())
    }
}
