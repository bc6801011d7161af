//! # Storage Module
//!
//! Sled-backed persistence for player profiles, item rows, item blobs, accounts,
//! VIP lists and house bids. This is the database collaborator the repository
//! functions drive; it knows how records are keyed and how to replace a player's
//! items atomically, but nothing about item trees.
//!
//! ## Layout
//!
//! | Tree | Key | Value |
//! | --- | --- | --- |
//! | `players` | guid (u32 BE) | bincode [`PlayerRecord`] |
//! | `player_names` | lowercase name | guid |
//! | `player_items` | guid BE + row id BE | bincode [`ItemRow`] |
//! | `player_item_blobs` | guid BE | binary item stream |
//! | `accounts` | account id BE | bincode [`Account`] |
//! | `account_names` | lowercase name | account id |
//! | `account_vips` | account id BE + guid BE | bincode [`VipRecord`] |
//! | `house_bids` | house id BE | bincode [`HouseBid`] |
//! | `meta` | counter name | u32 BE |
//!
//! Handles are cheap to clone; every clone shares the same underlying database.

pub mod errors;

use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use log::debug;
use sled::transaction::{abort, ConflictableTransactionError, TransactionalTree};
use sled::Transactional;

use crate::codec::{ItemRow, FIRST_ROW_ID};
use crate::records::{
    Account, HouseBid, ItemStorage, PlayerRecord, VipRecord, ACCOUNT_SCHEMA_VERSION,
    PLAYER_SCHEMA_VERSION,
};

pub use errors::StoreError;

const TREE_PLAYERS: &str = "players";
const TREE_PLAYER_NAMES: &str = "player_names";
const TREE_PLAYER_ITEMS: &str = "player_items";
const TREE_ITEM_BLOBS: &str = "player_item_blobs";
const TREE_ACCOUNTS: &str = "accounts";
const TREE_ACCOUNT_NAMES: &str = "account_names";
const TREE_VIPS: &str = "account_vips";
const TREE_HOUSE_BIDS: &str = "house_bids";
const TREE_META: &str = "meta";

const COUNTER_PLAYER: &str = "next_player_id";
const COUNTER_ACCOUNT: &str = "next_account_id";

/// Encoded item state ready to be written for one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredItems {
    Rows(Vec<ItemRow>),
    Blob(Vec<u8>),
}

impl StoredItems {
    pub fn storage(&self) -> ItemStorage {
        match self {
            StoredItems::Rows(_) => ItemStorage::Relational,
            StoredItems::Blob(_) => ItemStorage::Binary,
        }
    }
}

/// Helper builder so tests can easily create throwaway databases with custom paths.
pub struct DatabaseBuilder {
    path: PathBuf,
    argon2: Option<Params>,
    temporary: bool,
}

impl DatabaseBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            argon2: None,
            temporary: false,
        }
    }

    /// Use explicit Argon2id parameters for account password hashing.
    pub fn argon2_params(mut self, params: Params) -> Self {
        self.argon2 = Some(params);
        self
    }

    /// Delete the database files when the last handle is dropped.
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn open(self) -> Result<Database, StoreError> {
        std::fs::create_dir_all(&self.path)?;
        let db = sled::Config::new()
            .path(&self.path)
            .temporary(self.temporary)
            .open()?;
        Database::from_db(db, self.argon2)
    }
}

/// Handle to the player store.
#[derive(Clone)]
pub struct Database {
    db: sled::Db,
    players: sled::Tree,
    player_names: sled::Tree,
    player_items: sled::Tree,
    item_blobs: sled::Tree,
    accounts: sled::Tree,
    account_names: sled::Tree,
    vips: sled::Tree,
    house_bids: sled::Tree,
    meta: sled::Tree,
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("players", &self.players.len())
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

fn guid_key(guid: u32) -> Vec<u8> {
    guid.to_be_bytes().to_vec()
}

fn pair_key(high: u32, low: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(8);
    key.extend_from_slice(&high.to_be_bytes());
    key.extend_from_slice(&low.to_be_bytes());
    key
}

fn name_key(name: &str) -> Vec<u8> {
    name.trim().to_lowercase().into_bytes()
}

fn decode_u32(bytes: &[u8]) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

/// Row ids must be exactly `FIRST_ROW_ID..FIRST_ROW_ID + len`, in any order.
fn check_row_ids(rows: &[ItemRow]) -> Result<(), StoreError> {
    let mut ids: Vec<u32> = rows.iter().map(|row| row.row_id).collect();
    ids.sort_unstable();
    for (offset, &id) in ids.iter().enumerate() {
        let expected = u32::try_from(offset)
            .ok()
            .and_then(|offset| FIRST_ROW_ID.checked_add(offset));
        if Some(id) != expected {
            return Err(StoreError::InvalidItemRows(format!(
                "row id {id} breaks the sequence starting at {FIRST_ROW_ID} ({} rows)",
                ids.len()
            )));
        }
    }
    Ok(())
}

fn tx_abort<T>(err: StoreError) -> Result<T, ConflictableTransactionError<StoreError>> {
    abort(err)
}

impl Database {
    /// Open (or create) the database rooted at `path` with default Argon2 parameters.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        DatabaseBuilder::new(path.as_ref()).open()
    }

    fn from_db(db: sled::Db, params: Option<Params>) -> Result<Self, StoreError> {
        let argon2 = match params {
            Some(p) => Argon2::new(Algorithm::Argon2id, Version::V0x13, p),
            None => Argon2::default(),
        };
        Ok(Self {
            players: db.open_tree(TREE_PLAYERS)?,
            player_names: db.open_tree(TREE_PLAYER_NAMES)?,
            player_items: db.open_tree(TREE_PLAYER_ITEMS)?,
            item_blobs: db.open_tree(TREE_ITEM_BLOBS)?,
            accounts: db.open_tree(TREE_ACCOUNTS)?,
            account_names: db.open_tree(TREE_ACCOUNT_NAMES)?,
            vips: db.open_tree(TREE_VIPS)?,
            house_bids: db.open_tree(TREE_HOUSE_BIDS)?,
            meta: db.open_tree(TREE_META)?,
            db,
            argon2,
        })
    }

    /// A second handle onto the same database, for a consumer that must not share
    /// this one (such as a background flush thread).
    pub fn handle(&self) -> Database {
        self.clone()
    }

    pub fn argon2(&self) -> &Argon2<'static> {
        &self.argon2
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(bincode::deserialize::<T>(bytes)?)
    }

    fn next_id(&self, counter: &str) -> Result<u32, StoreError> {
        let updated = self.meta.update_and_fetch(counter, |old| {
            let current = old.and_then(decode_u32).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        updated
            .as_deref()
            .and_then(decode_u32)
            .ok_or_else(|| StoreError::NotFound(format!("id counter {counter}")))
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    fn check_player(record: PlayerRecord) -> Result<PlayerRecord, StoreError> {
        if record.schema_version != PLAYER_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "player",
                expected: PLAYER_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    /// Fetch a profile by guid.
    pub fn get_player(&self, guid: u32) -> Result<PlayerRecord, StoreError> {
        let Some(bytes) = self.players.get(guid_key(guid))? else {
            return Err(StoreError::NotFound(format!("player: {guid}")));
        };
        Self::check_player(Self::deserialize(&bytes)?)
    }

    /// Resolve a name (case-insensitive) to a guid.
    pub fn find_player_guid(&self, name: &str) -> Result<Option<u32>, StoreError> {
        Ok(self
            .player_names
            .get(name_key(name))?
            .as_deref()
            .and_then(decode_u32))
    }

    /// All stored guids in ascending order.
    pub fn list_player_guids(&self) -> Result<Vec<u32>, StoreError> {
        let mut guids = Vec::new();
        for entry in self.players.iter() {
            let (key, _) = entry?;
            if let Some(guid) = decode_u32(&key) {
                guids.push(guid);
            }
        }
        Ok(guids)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Insert a new profile, assigning its guid. Fails if the name is taken.
    pub fn insert_player(&self, mut record: PlayerRecord) -> Result<PlayerRecord, StoreError> {
        record.guid = self.next_id(COUNTER_PLAYER)?;
        record.schema_version = PLAYER_SCHEMA_VERSION;
        record.item_rows = 0;
        let bytes = Self::serialize(&record)?;
        let name = name_key(&record.name);
        let guid = record.guid;
        (&self.players, &self.player_names).transaction(|(players, names)| {
            if names.get(name.as_slice())?.is_some() {
                return tx_abort(StoreError::Conflict(format!(
                    "player name already taken: {}",
                    String::from_utf8_lossy(&name)
                )));
            }
            names.insert(name.as_slice(), guid_key(guid))?;
            players.insert(guid_key(guid), bytes.as_slice())?;
            Ok(())
        })?;
        self.players.flush()?;
        debug!("inserted player {} ({})", record.name, guid);
        Ok(record)
    }

    /// Read-modify-write a profile atomically.
    pub fn update_player<F>(&self, guid: u32, mutate: F) -> Result<PlayerRecord, StoreError>
    where
        F: Fn(&mut PlayerRecord),
    {
        let record = self.players.transaction(|players| {
            let mut record = read_profile(players, guid)?;
            mutate(&mut record);
            record.touch();
            write_profile(players, &record)?;
            Ok(record)
        })?;
        self.players.flush()?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    /// Item rows of one player, in row id order.
    pub fn item_rows(&self, guid: u32) -> Result<Vec<ItemRow>, StoreError> {
        let mut rows = Vec::new();
        for entry in self.player_items.scan_prefix(guid_key(guid)) {
            let (_, value) = entry?;
            rows.push(Self::deserialize(&value)?);
        }
        Ok(rows)
    }

    pub fn item_blob(&self, guid: u32) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.item_blobs.get(guid_key(guid))?.map(|v| v.to_vec()))
    }

    /// Replace a player's stored items and update the profile row in one transaction.
    ///
    /// Previous rows are located through the profile's row count, so row ids must be
    /// unique and run contiguously from [`FIRST_ROW_ID`]; any other row set is rejected
    /// with [`StoreError::InvalidItemRows`] before anything is written. The whole
    /// replacement (row deletes, inserts, blob write and profile update) commits or
    /// none of it does. When `profile` is given its fields overwrite the stored profile;
    /// otherwise only the item bookkeeping fields change.
    pub fn replace_items(
        &self,
        guid: u32,
        items: &StoredItems,
        last_depot_id: i16,
        profile: Option<&PlayerRecord>,
    ) -> Result<PlayerRecord, StoreError> {
        if let StoredItems::Rows(rows) = items {
            check_row_ids(rows)?;
        }
        let encoded_rows: Vec<(Vec<u8>, Vec<u8>)> = match items {
            StoredItems::Rows(rows) => rows
                .iter()
                .map(|row| Ok((pair_key(guid, row.row_id), Self::serialize(row)?)))
                .collect::<Result<_, StoreError>>()?,
            StoredItems::Blob(_) => Vec::new(),
        };
        let row_count = encoded_rows.len() as u32;

        let record = (&self.players, &self.player_items, &self.item_blobs).transaction(
            |(players, rows, blobs)| {
                let stored = read_profile(players, guid)?;
                for offset in 0..stored.item_rows {
                    rows.remove(pair_key(guid, FIRST_ROW_ID + offset))?;
                }
                blobs.remove(guid_key(guid))?;

                for (key, value) in &encoded_rows {
                    rows.insert(key.as_slice(), value.as_slice())?;
                }
                if let StoredItems::Blob(blob) = items {
                    blobs.insert(guid_key(guid), blob.as_slice())?;
                }

                let mut record = match profile {
                    Some(p) => {
                        let mut p = p.clone();
                        p.guid = guid;
                        p.name = stored.name.clone();
                        p.created_at = stored.created_at;
                        p
                    }
                    None => stored,
                };
                record.item_rows = row_count;
                record.item_storage = items.storage();
                record.last_depot_id = last_depot_id;
                record.schema_version = PLAYER_SCHEMA_VERSION;
                record.touch();
                write_profile(players, &record)?;
                Ok(record)
            },
        )?;
        self.db.flush()?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    pub fn get_account(&self, id: u32) -> Result<Account, StoreError> {
        let Some(bytes) = self.accounts.get(guid_key(id))? else {
            return Err(StoreError::NotFound(format!("account: {id}")));
        };
        let account: Account = Self::deserialize(&bytes)?;
        if account.schema_version != ACCOUNT_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "account",
                expected: ACCOUNT_SCHEMA_VERSION,
                found: account.schema_version,
            });
        }
        Ok(account)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn find_account_id(&self, name: &str) -> Result<Option<u32>, StoreError> {
        Ok(self
            .account_names
            .get(name_key(name))?
            .as_deref()
            .and_then(decode_u32))
    }

    pub fn insert_account(&self, mut account: Account) -> Result<Account, StoreError> {
        account.id = self.next_id(COUNTER_ACCOUNT)?;
        account.schema_version = ACCOUNT_SCHEMA_VERSION;
        let bytes = Self::serialize(&account)?;
        let name = name_key(&account.name);
        let id = account.id;
        (&self.accounts, &self.account_names).transaction(|(accounts, names)| {
            if names.get(name.as_slice())?.is_some() {
                return tx_abort(StoreError::Conflict(format!(
                    "account name already taken: {}",
                    String::from_utf8_lossy(&name)
                )));
            }
            names.insert(name.as_slice(), guid_key(id))?;
            accounts.insert(guid_key(id), bytes.as_slice())?;
            Ok(())
        })?;
        self.accounts.flush()?;
        Ok(account)
    }

    /// Overwrite an existing account row. The account name index is left untouched.
    pub fn put_account(&self, account: &Account) -> Result<(), StoreError> {
        let key = guid_key(account.id);
        if !self.accounts.contains_key(&key)? {
            return Err(StoreError::NotFound(format!("account: {}", account.id)));
        }
        self.accounts.insert(key, Self::serialize(account)?)?;
        self.accounts.flush()?;
        Ok(())
    }

    /// Read-modify-write an account atomically.
    pub fn update_account<F>(&self, id: u32, mutate: F) -> Result<Account, StoreError>
    where
        F: Fn(&mut Account),
    {
        let account = self.accounts.transaction(|accounts| {
            let Some(bytes) = accounts.get(guid_key(id))? else {
                return tx_abort(StoreError::NotFound(format!("account: {id}")));
            };
            let mut account: Account = match Self::deserialize(&bytes) {
                Ok(account) => account,
                Err(e) => return tx_abort(e),
            };
            mutate(&mut account);
            let bytes = match Self::serialize(&account) {
                Ok(bytes) => bytes,
                Err(e) => return tx_abort(e),
            };
            accounts.insert(guid_key(id), bytes)?;
            Ok(account)
        })?;
        self.accounts.flush()?;
        Ok(account)
    }

    /// Names of every character on an account, in guid order.
    pub fn account_characters(&self, account_id: u32) -> Result<Vec<PlayerRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.players.iter() {
            let (_, value) = entry?;
            let record: PlayerRecord = Self::deserialize(&value)?;
            if record.account_id == account_id {
                out.push(record);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // VIP lists
    // ------------------------------------------------------------------

    pub fn vip_records(&self, account_id: u32) -> Result<Vec<VipRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.vips.scan_prefix(guid_key(account_id)) {
            let (_, value) = entry?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn has_vip(&self, account_id: u32, guid: u32) -> Result<bool, StoreError> {
        Ok(self.vips.contains_key(pair_key(account_id, guid))?)
    }

    pub fn put_vip(&self, account_id: u32, record: &VipRecord) -> Result<(), StoreError> {
        self.vips
            .insert(pair_key(account_id, record.guid), Self::serialize(record)?)?;
        self.vips.flush()?;
        Ok(())
    }

    pub fn remove_vip(&self, account_id: u32, guid: u32) -> Result<bool, StoreError> {
        let removed = self.vips.remove(pair_key(account_id, guid))?.is_some();
        self.vips.flush()?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Houses
    // ------------------------------------------------------------------

    pub fn put_house_bid(&self, bid: &HouseBid) -> Result<(), StoreError> {
        self.house_bids
            .insert(guid_key(bid.house_id), Self::serialize(bid)?)?;
        self.house_bids.flush()?;
        Ok(())
    }

    pub fn house_bids(&self) -> Result<Vec<HouseBid>, StoreError> {
        let mut out = Vec::new();
        for entry in self.house_bids.iter() {
            let (_, value) = entry?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }
}

fn read_profile(
    players: &TransactionalTree,
    guid: u32,
) -> Result<PlayerRecord, ConflictableTransactionError<StoreError>> {
    let Some(bytes) = players.get(guid_key(guid))? else {
        return tx_abort(StoreError::NotFound(format!("player: {guid}")));
    };
    match Database::deserialize::<PlayerRecord>(&bytes).and_then(Database::check_player) {
        Ok(record) => Ok(record),
        Err(e) => tx_abort(e),
    }
}

fn write_profile(
    players: &TransactionalTree,
    record: &PlayerRecord,
) -> Result<(), ConflictableTransactionError<StoreError>> {
    let bytes = match Database::serialize(record) {
        Ok(bytes) => bytes,
        Err(e) => return tx_abort(e),
    };
    players.insert(guid_key(record.guid), bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RowParent;
    use crate::items::ItemKind;
    use tempfile::TempDir;

    fn row(row_id: u32) -> ItemRow {
        ItemRow {
            row_id,
            parent: RowParent::Inbox,
            type_id: 3031,
            count: 10,
            kind: ItemKind::Simple,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn player_names_are_unique_and_case_insensitive() {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path()).expect("db");
        let first = db.insert_player(PlayerRecord::new("Eremo", 1)).expect("insert");
        assert_eq!(first.guid, 1);
        assert_eq!(db.find_player_guid("EREMO").expect("lookup"), Some(1));

        let err = db
            .insert_player(PlayerRecord::new("eremo", 1))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(db.player_count(), 1);
    }

    #[test]
    fn replace_items_swaps_rows_and_blob() {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path()).expect("db");
        let guid = db.insert_player(PlayerRecord::new("Rook", 1)).expect("insert").guid;

        let rows = StoredItems::Rows(vec![row(100), row(101), row(102)]);
        let record = db.replace_items(guid, &rows, 3, None).expect("rows");
        assert_eq!(record.item_rows, 3);
        assert_eq!(record.last_depot_id, 3);
        assert_eq!(db.item_rows(guid).expect("read").len(), 3);

        let record = db
            .replace_items(guid, &StoredItems::Blob(vec![1, 2, 3]), 3, None)
            .expect("blob");
        assert_eq!(record.item_rows, 0);
        assert_eq!(record.item_storage, ItemStorage::Binary);
        assert!(db.item_rows(guid).expect("read").is_empty());
        assert_eq!(db.item_blob(guid).expect("blob"), Some(vec![1, 2, 3]));

        db.replace_items(guid, &StoredItems::Rows(vec![row(100)]), 3, None)
            .expect("rows again");
        assert_eq!(db.item_blob(guid).expect("blob"), None);
        assert_eq!(db.item_rows(guid).expect("read").len(), 1);
    }

    #[test]
    fn replace_items_rejects_gapped_or_duplicate_ids() {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path()).expect("db");
        let guid = db.insert_player(PlayerRecord::new("Rook", 1)).expect("insert").guid;
        db.replace_items(guid, &StoredItems::Rows(vec![row(100), row(101)]), -1, None)
            .expect("rows");

        for bad in [
            vec![row(100), row(500)],
            vec![row(101)],
            vec![row(100), row(100)],
        ] {
            let err = db
                .replace_items(guid, &StoredItems::Rows(bad), -1, None)
                .expect_err("bad row ids");
            assert!(matches!(err, StoreError::InvalidItemRows(_)), "{err}");
        }
        assert_eq!(db.item_rows(guid).expect("read").len(), 2);

        db.replace_items(guid, &StoredItems::Rows(vec![row(101), row(100)]), -1, None)
            .expect("any order");
        db.replace_items(guid, &StoredItems::Rows(Vec::new()), -1, None)
            .expect("cleared");
        assert!(db.item_rows(guid).expect("read").is_empty());
    }

    #[test]
    fn replace_items_for_missing_player_changes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path()).expect("db");
        let err = db
            .replace_items(77, &StoredItems::Rows(vec![row(100)]), -1, None)
            .expect_err("missing profile");
        assert!(err.is_not_found());
        assert!(db.item_rows(77).expect("read").is_empty());
    }

    #[test]
    fn rows_of_other_players_are_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path()).expect("db");
        let a = db.insert_player(PlayerRecord::new("Alpha", 1)).expect("a").guid;
        let b = db.insert_player(PlayerRecord::new("Beta", 1)).expect("b").guid;
        db.replace_items(a, &StoredItems::Rows(vec![row(100), row(101)]), -1, None)
            .expect("a rows");
        db.replace_items(b, &StoredItems::Rows(vec![row(100)]), -1, None)
            .expect("b rows");
        db.replace_items(a, &StoredItems::Rows(Vec::new()), -1, None)
            .expect("a cleared");
        assert!(db.item_rows(a).expect("a").is_empty());
        assert_eq!(db.item_rows(b).expect("b").len(), 1);
    }
}
