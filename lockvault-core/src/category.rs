//! User-defined categories for organizing entries.
//!
//! Categories are named buckets referenced by the `category_id` on each
//! entry. Names are caller-supplied opaque bytes; clients encrypt them
//! before handing them over, so the registry never holds plaintext names.
//! Id 0 is the implicit "uncategorized" bucket and is never registered.

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Maximum number of categories per vault.
pub const MAX_CATEGORIES: usize = 255;

/// Maximum stored size of a category name, in bytes.
pub const MAX_CATEGORY_NAME_SIZE: usize = 64;

/// One organizational bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Registry-assigned id; strictly increasing, never reused.
    pub category_id: u32,
    /// Opaque (client-encrypted) category name.
    pub name: Vec<u8>,
    /// Number of entries currently filed under this category.
    pub entry_count: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Unix timestamp of the last rename.
    pub last_modified: u64,
}

/// The per-vault category table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRegistry {
    /// Categories in creation order.
    pub categories: Vec<Category>,
    next_category_id: u32,
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            categories: Vec::new(),
            next_category_id: 1,
        }
    }

    /// Looks up a category by id.
    #[must_use]
    pub fn category(&self, category_id: u32) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| c.category_id == category_id)
    }

    /// True when `category_id` may be filed under: zero (uncategorized) or
    /// a registered id.
    #[must_use]
    pub fn is_known(&self, category_id: u32) -> bool {
        category_id == 0 || self.category(category_id).is_some()
    }

    /// Registers a new category and returns its id.
    ///
    /// # Errors
    ///
    /// [`VaultError::StorageLimitReached`] at the category cap,
    /// [`VaultError::CategoryNameTooLong`] for an oversized name.
    pub fn create(&mut self, name: Vec<u8>, now: u64) -> VaultResult<u32> {
        if self.categories.len() >= MAX_CATEGORIES {
            return Err(VaultError::limit(format!(
                "category cap of {MAX_CATEGORIES} reached"
            )));
        }
        check_name(&name)?;

        let category_id = self.next_category_id;
        self.next_category_id += 1;
        self.categories.push(Category {
            category_id,
            name,
            entry_count: 0,
            created_at: now,
            last_modified: now,
        });
        Ok(category_id)
    }

    /// Replaces a category's name.
    ///
    /// # Errors
    ///
    /// [`VaultError::CategoryNotFound`] for an unknown id,
    /// [`VaultError::CategoryNameTooLong`] for an oversized name.
    pub fn rename(&mut self, category_id: u32, name: Vec<u8>, now: u64) -> VaultResult<()> {
        check_name(&name)?;
        let category = self
            .categories
            .iter_mut()
            .find(|c| c.category_id == category_id)
            .ok_or(VaultError::CategoryNotFound(category_id))?;
        category.name = name;
        category.last_modified = now;
        Ok(())
    }

    /// Deletes an empty category.
    ///
    /// # Errors
    ///
    /// [`VaultError::CategoryNotFound`] for an unknown id,
    /// [`VaultError::CategoryNotEmpty`] while entries are filed under it.
    pub fn delete(&mut self, category_id: u32) -> VaultResult<()> {
        let position = self
            .categories
            .iter()
            .position(|c| c.category_id == category_id)
            .ok_or(VaultError::CategoryNotFound(category_id))?;
        if self.categories[position].entry_count > 0 {
            return Err(VaultError::CategoryNotEmpty(category_id));
        }
        self.categories.remove(position);
        Ok(())
    }

    /// Records that an entry was filed under `category_id`.
    ///
    /// Filing under id 0 is a no-op.
    ///
    /// # Errors
    ///
    /// [`VaultError::CategoryNotFound`] for an unregistered nonzero id.
    pub fn record_filed(&mut self, category_id: u32) -> VaultResult<()> {
        if category_id == 0 {
            return Ok(());
        }
        let category = self
            .categories
            .iter_mut()
            .find(|c| c.category_id == category_id)
            .ok_or(VaultError::CategoryNotFound(category_id))?;
        category.entry_count = category.entry_count.saturating_add(1);
        Ok(())
    }

    /// Records that an entry left `category_id`.
    ///
    /// Unfiling from id 0 is a no-op.
    ///
    /// # Errors
    ///
    /// [`VaultError::CategoryNotFound`] for an unregistered nonzero id.
    pub fn record_unfiled(&mut self, category_id: u32) -> VaultResult<()> {
        if category_id == 0 {
            return Ok(());
        }
        let category = self
            .categories
            .iter_mut()
            .find(|c| c.category_id == category_id)
            .ok_or(VaultError::CategoryNotFound(category_id))?;
        category.entry_count = category.entry_count.saturating_sub(1);
        Ok(())
    }
}

fn check_name(name: &[u8]) -> VaultResult<()> {
    if name.len() > MAX_CATEGORY_NAME_SIZE {
        return Err(VaultError::CategoryNameTooLong {
            got: name.len(),
            max: MAX_CATEGORY_NAME_SIZE,
        });
    }
    Ok(())
}
