//! Mailbox item store
//!
//! The coordinator only needs to enumerate items and load their indexable
//! form; item blobs live elsewhere.

use anyhow::{Result, anyhow};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::models::{IndexableItem, ItemId, ItemType};

/// Trait for reading mailbox items during indexing and reindexing
pub trait ItemStore: Send + Sync {
    /// List item ids, optionally restricted to some item types, ascending
    fn list_item_ids(&self, types: Option<&BTreeSet<ItemType>>) -> Result<Vec<ItemId>>;

    /// Load an item with its index documents
    fn load_item(&self, id: ItemId) -> Result<Option<IndexableItem>>;

    /// Insert or replace an item
    fn put_item(&self, item: IndexableItem) -> Result<()>;

    /// Remove an item, returning whether it existed
    fn remove_item(&self, id: ItemId) -> Result<bool>;

    /// Count stored items
    fn count_items(&self) -> Result<usize>;
}

/// In-memory implementation of ItemStore
///
/// Used by tests and the admin tool, which loads items from a JSON file.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<HashMap<ItemId, IndexableItem>>,
}

impl InMemoryItemStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given items
    pub fn with_items(items: impl IntoIterator<Item = IndexableItem>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().map(|i| (i.id(), i)).collect()),
        }
    }
}

impl ItemStore for InMemoryItemStore {
    fn list_item_ids(&self, types: Option<&BTreeSet<ItemType>>) -> Result<Vec<ItemId>> {
        let items = self.items.read().map_err(|_| anyhow!("item store lock poisoned"))?;
        let mut ids: Vec<ItemId> = items
            .values()
            .filter(|i| types.is_none_or(|t| t.contains(&i.item.item_type)))
            .map(IndexableItem::id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_item(&self, id: ItemId) -> Result<Option<IndexableItem>> {
        let items = self.items.read().map_err(|_| anyhow!("item store lock poisoned"))?;
        Ok(items.get(&id).cloned())
    }

    fn put_item(&self, item: IndexableItem) -> Result<()> {
        let mut items = self.items.write().map_err(|_| anyhow!("item store lock poisoned"))?;
        items.insert(item.id(), item);
        Ok(())
    }

    fn remove_item(&self, id: ItemId) -> Result<bool> {
        let mut items = self.items.write().map_err(|_| anyhow!("item store lock poisoned"))?;
        Ok(items.remove(&id).is_some())
    }

    fn count_items(&self) -> Result<usize> {
        let items = self.items.read().map_err(|_| anyhow!("item store lock poisoned"))?;
        Ok(items.len())
    }
}
