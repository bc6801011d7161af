//! Loaded player snapshot and the seam the cache copies items through.

use crate::items::PlayerItems;
use crate::records::{PlayerRecord, VipEntry};

/// Anything that owns a live set of player items.
///
/// The cache manager only ever touches a live object through this trait: it copies
/// items in with [`ItemOwner::items`] and hands a fresh copy back with
/// [`ItemOwner::set_items`].
pub trait ItemOwner {
    fn items(&self) -> &PlayerItems;
    fn set_items(&mut self, items: PlayerItems);
}

/// Everything loaded for one character.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub profile: PlayerRecord,
    pub items: PlayerItems,
    pub vip_entries: Vec<VipEntry>,
}

impl Player {
    pub fn new(profile: PlayerRecord) -> Self {
        let mut items = PlayerItems::new();
        items.last_depot_id = profile.last_depot_id;
        Self {
            profile,
            items,
            vip_entries: Vec::new(),
        }
    }

    pub fn guid(&self) -> u32 {
        self.profile.guid
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }
}

impl ItemOwner for Player {
    fn items(&self) -> &PlayerItems {
        &self.items
    }

    fn set_items(&mut self, items: PlayerItems) {
        self.profile.last_depot_id = items.last_depot_id;
        self.items = items;
    }
}

impl ItemOwner for PlayerItems {
    fn items(&self) -> &PlayerItems {
        self
    }

    fn set_items(&mut self, items: PlayerItems) {
        *self = items;
    }
}
