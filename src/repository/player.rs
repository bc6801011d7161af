//! Player profile and item persistence.

use chrono::Utc;
use log::{debug, info, warn};

use crate::codec::{
    decode_player_blob, decode_relational, encode_player_blob, encode_relational, DecodeAnomaly,
    Decoded,
};
use crate::items::PlayerItems;
use crate::player::Player;
use crate::records::{HouseBid, ItemStorage, PlayerRecord};
use crate::repository::account::get_vip_entries;
use crate::storage::{Database, StoreError, StoredItems};
use crate::validation::validate_character_name;

/// Login-time summary of a character, read before the full load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadedPlayer {
    pub guid: u32,
    pub name: String,
    pub account_id: u32,
    pub group_id: u16,
}

/// Result of [`get_guid_by_name_ex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidLookup {
    pub guid: u32,
    /// Staff characters are shown to everyone as special VIPs.
    pub special_vip: bool,
    /// Name with its stored casing.
    pub name: String,
}

fn report_anomalies(guid: u32, anomalies: &[DecodeAnomaly]) {
    for anomaly in anomalies {
        warn!("player {}: {}", guid, anomaly);
    }
}

/// Read and decode the stored items of `profile` in whichever mode they were saved.
pub fn load_player_items(
    db: &Database,
    profile: &PlayerRecord,
) -> Result<Decoded<PlayerItems>, StoreError> {
    let mut decoded = match profile.item_storage {
        ItemStorage::Relational => decode_relational(db.item_rows(profile.guid)?),
        ItemStorage::Binary => match db.item_blob(profile.guid)? {
            Some(blob) => decode_player_blob(&blob),
            None => Decoded::clean(PlayerItems::new()),
        },
    };
    decoded.value.last_depot_id = profile.last_depot_id;
    report_anomalies(profile.guid, &decoded.anomalies);
    Ok(decoded)
}

fn load_player(db: &Database, profile: PlayerRecord) -> Result<Decoded<Player>, StoreError> {
    let items = load_player_items(db, &profile)?;
    let vip_entries = get_vip_entries(db, profile.account_id)?;
    debug!(
        "loaded player {} ({}) with {} items",
        profile.name,
        profile.guid,
        items.value.item_count()
    );
    Ok(items.map(|items| Player {
        profile,
        items,
        vip_entries,
    }))
}

/// Load a full player snapshot. Anomalies found while decoding items are logged
/// and returned alongside the snapshot.
pub fn load_player_by_id(db: &Database, guid: u32) -> Result<Decoded<Player>, StoreError> {
    let profile = db.get_player(guid)?;
    load_player(db, profile)
}

pub fn load_player_by_name(db: &Database, name: &str) -> Result<Decoded<Player>, StoreError> {
    let guid = db
        .find_player_guid(name)?
        .ok_or_else(|| StoreError::NotFound(format!("player: {name}")))?;
    load_player_by_id(db, guid)
}

/// Resolve a character for login. Characters pending deletion are treated as absent.
pub fn preload_player(db: &Database, name: &str) -> Result<Option<PreloadedPlayer>, StoreError> {
    let Some(guid) = db.find_player_guid(name)? else {
        return Ok(None);
    };
    let profile = db.get_player(guid)?;
    if profile.deleted {
        debug!("preload refused for deleted player {}", profile.name);
        return Ok(None);
    }
    Ok(Some(PreloadedPlayer {
        guid,
        name: profile.name,
        account_id: profile.account_id,
        group_id: profile.group_id,
    }))
}

fn encode_items(items: &PlayerItems, mode: ItemStorage) -> StoredItems {
    match mode {
        ItemStorage::Relational => StoredItems::Rows(encode_relational(items)),
        ItemStorage::Binary => StoredItems::Blob(encode_player_blob(items)),
    }
}

/// Persist profile and items together. The previous items are replaced in the same
/// transaction, whichever mode they were stored in.
pub fn save_player(
    db: &Database,
    player: &Player,
    mode: ItemStorage,
) -> Result<PlayerRecord, StoreError> {
    let stored = encode_items(&player.items, mode);
    let record = db.replace_items(
        player.guid(),
        &stored,
        player.items.last_depot_id,
        Some(&player.profile),
    )?;
    debug!(
        "saved player {} ({}) in {} mode",
        record.name,
        record.guid,
        mode.as_str()
    );
    Ok(record)
}

/// Replace only the items of `guid`, one row per node.
pub fn save_player_items(db: &Database, guid: u32, items: &PlayerItems) -> Result<(), StoreError> {
    save_player_items_as(db, guid, items, ItemStorage::Relational)
}

/// Replace only the items of `guid` with a single encoded blob.
pub fn save_player_binary_items(
    db: &Database,
    guid: u32,
    items: &PlayerItems,
) -> Result<(), StoreError> {
    save_player_items_as(db, guid, items, ItemStorage::Binary)
}

pub fn save_player_items_as(
    db: &Database,
    guid: u32,
    items: &PlayerItems,
    mode: ItemStorage,
) -> Result<(), StoreError> {
    db.replace_items(guid, &encode_items(items, mode), items.last_depot_id, None)?;
    Ok(())
}

pub fn get_guid_by_name(db: &Database, name: &str) -> Result<Option<u32>, StoreError> {
    db.find_player_guid(name)
}

pub fn get_guid_by_name_ex(db: &Database, name: &str) -> Result<Option<GuidLookup>, StoreError> {
    let Some(guid) = db.find_player_guid(name)? else {
        return Ok(None);
    };
    let profile = db.get_player(guid)?;
    Ok(Some(GuidLookup {
        guid,
        special_vip: profile.is_special_vip(),
        name: profile.name,
    }))
}

pub fn get_name_by_guid(db: &Database, guid: u32) -> Result<Option<String>, StoreError> {
    match db.get_player(guid) {
        Ok(profile) => Ok(Some(profile.name)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Stored casing of a character name, e.g. "eREMO" -> "Eremo".
pub fn format_player_name(db: &Database, name: &str) -> Result<Option<String>, StoreError> {
    match db.find_player_guid(name)? {
        Some(guid) => get_name_by_guid(db, guid),
        None => Ok(None),
    }
}

/// Add `amount` to the bank balance, saturating. Returns the new balance.
pub fn increase_bank_balance(db: &Database, guid: u32, amount: u64) -> Result<u64, StoreError> {
    let record = db.update_player(guid, |p| p.balance = p.balance.saturating_add(amount))?;
    Ok(record.balance)
}

pub fn has_bidded_on_house(db: &Database, guid: u32) -> Result<bool, StoreError> {
    Ok(db.house_bids()?.iter().any(|bid| bid.bidder == guid))
}

/// Record `guid` as the highest bidder on `house_id`.
pub fn place_house_bid(
    db: &Database,
    house_id: u32,
    guid: u32,
    amount: u64,
) -> Result<(), StoreError> {
    db.get_player(guid)?;
    db.put_house_bid(&HouseBid {
        house_id,
        bidder: guid,
        amount,
    })
}

pub fn update_online_status(db: &Database, guid: u32, login: bool) -> Result<(), StoreError> {
    let now = Utc::now();
    db.update_player(guid, |p| {
        p.online = login;
        if login {
            p.last_login = Some(now);
        } else {
            p.last_logout = Some(now);
        }
    })?;
    Ok(())
}

/// Create a character on an existing account.
pub fn create_player(
    db: &Database,
    account_id: u32,
    name: &str,
) -> Result<PlayerRecord, StoreError> {
    let name = validate_character_name(name)?;
    db.get_account(account_id)?;
    let record = db.insert_player(PlayerRecord::new(&name, account_id))?;
    info!(
        "created player {} ({}) on account {}",
        record.name, record.guid, account_id
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{Item, ItemTree, Slot};
    use crate::repository::account::create_account;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Database, PlayerRecord) {
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open(dir.path()).expect("db");
        let account = create_account(&db, "tester", "hunter22").expect("account");
        let record = create_player(&db, account.id, "Eremo").expect("player");
        (dir, db, record)
    }

    #[test]
    fn lookups_use_stored_casing() {
        let (_dir, db, record) = setup();
        assert_eq!(
            format_player_name(&db, "eREMO").expect("format"),
            Some("Eremo".to_string())
        );
        assert_eq!(get_guid_by_name(&db, "eremo").expect("guid"), Some(record.guid));
        assert_eq!(get_name_by_guid(&db, 999).expect("name"), None);
        let ex = get_guid_by_name_ex(&db, "EREMO").expect("ex").expect("present");
        assert!(!ex.special_vip);
        assert_eq!(ex.name, "Eremo");
    }

    #[test]
    fn preload_skips_deleted_characters() {
        let (_dir, db, record) = setup();
        assert!(preload_player(&db, "Eremo").expect("preload").is_some());
        db.update_player(record.guid, |p| p.deleted = true)
            .expect("mark deleted");
        assert!(preload_player(&db, "Eremo").expect("preload").is_none());
        assert!(preload_player(&db, "Nobody").expect("preload").is_none());
    }

    #[test]
    fn bank_balance_and_online_status() {
        let (_dir, db, record) = setup();
        assert_eq!(increase_bank_balance(&db, record.guid, 500).expect("bank"), 500);
        assert_eq!(
            increase_bank_balance(&db, record.guid, u64::MAX).expect("bank"),
            u64::MAX
        );
        update_online_status(&db, record.guid, true).expect("login");
        let profile = db.get_player(record.guid).expect("profile");
        assert!(profile.online);
        assert!(profile.last_login.is_some());
        update_online_status(&db, record.guid, false).expect("logout");
        assert!(!db.get_player(record.guid).expect("profile").online);
    }

    #[test]
    fn house_bids_are_tracked_per_bidder() {
        let (_dir, db, record) = setup();
        assert!(!has_bidded_on_house(&db, record.guid).expect("bids"));
        place_house_bid(&db, 17, record.guid, 10_000).expect("bid");
        assert!(has_bidded_on_house(&db, record.guid).expect("bids"));
        assert!(place_house_bid(&db, 18, 4242, 1).is_err());
    }

    #[test]
    fn items_only_save_keeps_profile_fields() {
        let (_dir, db, record) = setup();
        increase_bank_balance(&db, record.guid, 42).expect("bank");
        let mut items = PlayerItems::new();
        items.set_slot(Slot::Head, Some(ItemTree::new(Item::new(3351, 1))));
        items.last_depot_id = 2;
        save_player_items(&db, record.guid, &items).expect("save");

        let loaded = load_player_by_id(&db, record.guid).expect("load");
        assert!(loaded.is_clean());
        assert_eq!(loaded.value.items, items);
        assert_eq!(loaded.value.profile.balance, 42);
        assert_eq!(loaded.value.profile.last_depot_id, 2);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_dir, db, record) = setup();
        let err = create_player(&db, record.account_id, "x").expect_err("too short");
        assert!(matches!(err, StoreError::InvalidName(_)));
        let err = create_player(&db, 9999, "Valid Name").expect_err("no account");
        assert!(err.is_not_found());
    }
}
