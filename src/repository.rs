use crate::engine::StorageEngine;
use crate::errors::{StoreError, StoreResult};
use crate::models::{timestamp, Catalog, Item, ItemDraft};
use std::sync::Arc;
use uuid::Uuid;

/// Domain adapter over `StorageEngine<Catalog>`: translates item CRUD into
/// snapshot-to-snapshot update functions and owns id generation and the
/// created/updated timestamp discipline.
pub struct ItemRepository {
    engine: Arc<StorageEngine<Catalog>>,
}

impl ItemRepository {
    pub fn new(engine: Arc<StorageEngine<Catalog>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<StorageEngine<Catalog>> {
        &self.engine
    }

    /// Insert or replace an item. A draft without an id gets a fresh v4 id
    /// and `created_at == updated_at`; saving over an existing id preserves
    /// the original `created_at` and advances `updated_at`. A caller-supplied
    /// id with no existing entry is inserted with fresh timestamps.
    ///
    /// The id is resolved before the update function runs, so the committed
    /// record is recovered by direct lookup rather than any timestamp
    /// heuristic.
    pub fn save(&self, draft: ItemDraft) -> StoreResult<Item> {
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let key = id.to_string();
        let now = timestamp::now();

        let committed = self.engine.update(|catalog| {
            let (created_at, updated_at) = match catalog.items.get(&key) {
                Some(existing) => (existing.created_at, now.max(existing.updated_at)),
                None => (now, now),
            };
            let mut next = catalog.clone();
            next.items.insert(
                key.clone(),
                Item {
                    id,
                    name: draft.name.clone(),
                    image_url: draft.image_url.clone(),
                    description: draft.description.clone(),
                    price: draft.price,
                    rating: draft.rating,
                    specifications: draft.specifications.clone(),
                    created_at,
                    updated_at,
                },
            );
            next
        })?;

        committed.items.get(&key).cloned().ok_or_else(|| {
            StoreError::NotFound(format!(
                "item {} missing from the snapshot it was committed to",
                key
            ))
        })
    }

    pub fn find_by_id(&self, id: &Uuid) -> Option<Item> {
        self.engine.snapshot().get(id).cloned()
    }

    /// Independent copies of every item; never a live alias into the store.
    pub fn find_all(&self) -> Vec<Item> {
        self.engine.snapshot().items.values().cloned().collect()
    }

    /// Remove an item, reporting the pre-removal value if it existed. The
    /// existence read happens just before the atomic removal and can be
    /// stale under extreme races; the removal itself always runs against the
    /// latest snapshot.
    pub fn delete_by_id(&self, id: &Uuid) -> StoreResult<Option<Item>> {
        let key = id.to_string();
        let removed = self.engine.snapshot().items.get(&key).cloned();

        self.engine.update(|catalog| {
            if !catalog.items.contains_key(&key) {
                return catalog.clone();
            }
            let mut next = catalog.clone();
            next.items.remove(&key);
            next
        })?;

        Ok(removed)
    }

    pub async fn flush(&self) -> StoreResult<()> {
        self.engine.flush().await
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.engine.close().await
    }
}
