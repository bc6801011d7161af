//! Plain stored records: player profiles, accounts, VIP entries and house bids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::items::NO_DEPOT;

pub const PLAYER_SCHEMA_VERSION: u8 = 1;
pub const ACCOUNT_SCHEMA_VERSION: u8 = 1;

/// Premium days at or above this value never run out.
pub const UNLIMITED_PREMIUM_DAYS: u16 = u16::MAX;

/// Groups at or above this id are staff and always show up as special VIPs.
pub const GROUP_GAMEMASTER: u16 = 4;

/// How a player's items are laid out in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStorage {
    /// One row per item node.
    #[default]
    Relational,
    /// One encoded blob per player.
    Binary,
}

impl ItemStorage {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relational" | "rows" => Some(ItemStorage::Relational),
            "binary" | "blob" => Some(ItemStorage::Binary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStorage::Relational => "relational",
            ItemStorage::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Sex {
    #[default]
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

/// Profile row of one character.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub guid: u32,
    pub name: String,
    pub account_id: u32,
    pub group_id: u16,
    pub sex: Sex,
    pub vocation: u16,
    pub level: u32,
    pub experience: u64,
    pub health: i32,
    pub health_max: i32,
    pub mana: u32,
    pub mana_max: u32,
    pub soul: u8,
    pub capacity: u32,
    pub stamina: u16,
    pub town_id: u32,
    pub position: Position,
    pub balance: u64,
    pub online: bool,
    /// Characters pending deletion cannot log in.
    #[serde(default)]
    pub deleted: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub last_logout: Option<DateTime<Utc>>,
    pub last_depot_id: i16,
    /// Number of item rows currently stored; row ids run contiguously from the
    /// first row id.
    pub item_rows: u32,
    #[serde(default)]
    pub item_storage: ItemStorage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PlayerRecord {
    pub fn new(name: &str, account_id: u32) -> Self {
        let now = Utc::now();
        Self {
            guid: 0,
            name: name.to_string(),
            account_id,
            group_id: 1,
            sex: Sex::default(),
            vocation: 0,
            level: 1,
            experience: 0,
            health: 150,
            health_max: 150,
            mana: 0,
            mana_max: 0,
            soul: 100,
            capacity: 400,
            stamina: 2520,
            town_id: 1,
            position: Position::default(),
            balance: 0,
            online: false,
            deleted: false,
            last_login: None,
            last_logout: None,
            last_depot_id: NO_DEPOT,
            item_rows: 0,
            item_storage: ItemStorage::default(),
            created_at: now,
            updated_at: now,
            schema_version: PLAYER_SCHEMA_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_special_vip(&self) -> bool {
        self.group_id >= GROUP_GAMEMASTER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum AccountType {
    #[default]
    Normal,
    Tutor,
    SeniorTutor,
    GameMaster,
    God,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: u32,
    pub name: String,
    pub password_hash: String,
    pub account_type: AccountType,
    pub premium_days: u16,
    pub last_premium_update: Option<DateTime<Utc>>,
    /// Character names, filled in on load and never stored.
    #[serde(skip)]
    pub characters: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl Account {
    pub fn new(name: &str, password_hash: String) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            password_hash,
            account_type: AccountType::default(),
            premium_days: 0,
            last_premium_update: None,
            characters: Vec::new(),
            created_at: Utc::now(),
            schema_version: ACCOUNT_SCHEMA_VERSION,
        }
    }

    pub fn is_premium(&self) -> bool {
        self.premium_days > 0
    }
}

/// Stored VIP row, keyed by (account id, guid).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VipRecord {
    pub guid: u32,
    pub description: String,
    pub icon: u32,
    pub notify: bool,
}

/// VIP row joined with the listed character's current name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VipEntry {
    pub guid: u32,
    pub name: String,
    pub description: String,
    pub icon: u32,
    pub notify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HouseBid {
    pub house_id: u32,
    pub bidder: u32,
    pub amount: u64,
}
