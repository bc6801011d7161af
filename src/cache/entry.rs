use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::items::PlayerItems;
use crate::player::ItemOwner;

pub(crate) struct EntryData {
    pub(crate) items: PlayerItems,
    /// Set once the entry has been flushed and dropped from the cache, or cleared.
    /// A writer holding a stale handle must look the entry up again.
    pub(crate) evicted: bool,
}

/// One cached player's items behind their own lock.
pub struct PlayerCacheEntry {
    data: Mutex<EntryData>,
}

impl PlayerCacheEntry {
    pub fn new(items: PlayerItems) -> Self {
        Self {
            data: Mutex::new(EntryData {
                items,
                evicted: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new snapshot. Hands the snapshot back if the entry was evicted.
    pub(crate) fn replace(&self, items: PlayerItems) -> Result<(), PlayerItems> {
        let mut data = self.lock();
        if data.evicted {
            return Err(items);
        }
        data.items = items;
        Ok(())
    }

    pub(crate) fn mark_evicted(&self) {
        self.lock().evicted = true;
    }

    /// Deep-copy the owner's items into this entry. Returns `false` if the entry is
    /// no longer part of a cache.
    pub fn copy_data_from_player(&self, owner: &impl ItemOwner) -> bool {
        let mut data = self.lock();
        if data.evicted {
            return false;
        }
        data.items = owner.items().clone();
        true
    }

    /// Deep-copy this entry's items into the owner. The owner is left untouched when
    /// the entry is no longer part of a cache.
    pub fn copy_data_to_player(&self, owner: &mut impl ItemOwner) -> bool {
        let data = self.lock();
        if data.evicted {
            return false;
        }
        owner.set_items(data.items.clone());
        true
    }

    pub fn is_evicted(&self) -> bool {
        self.lock().evicted
    }
}

impl Clone for PlayerCacheEntry {
    /// Independent deep copy with its own lock.
    fn clone(&self) -> Self {
        let data = self.lock();
        Self {
            data: Mutex::new(EntryData {
                items: data.items.clone(),
                evicted: data.evicted,
            }),
        }
    }
}

impl std::fmt::Debug for PlayerCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.lock();
        f.debug_struct("PlayerCacheEntry")
            .field("items", &data.items.item_count())
            .field("evicted", &data.evicted)
            .finish()
    }
}
