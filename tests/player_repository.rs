//! Integration tests for player load/save through the sled-backed database.

mod common;

use playervault::codec::encode_relational;
use playervault::items::{Item, ItemTree, PlayerItems, Slot};
use playervault::records::ItemStorage;
use playervault::repository::{
    load_player_by_id, load_player_by_name, save_player, save_player_binary_items,
    save_player_items,
};
use playervault::storage::{StoreError, StoredItems};

#[test]
fn test_save_and_load_relational() {
    let (_dir, db, record) = common::db_with_player("Eremo");
    let mut player = load_player_by_id(&db, record.guid).unwrap().value;
    assert!(player.items.is_empty());

    player.items = common::sample_items();
    player.profile.level = 8;
    let saved = save_player(&db, &player, ItemStorage::Relational).unwrap();
    assert_eq!(saved.item_storage, ItemStorage::Relational);
    assert_eq!(saved.item_rows as usize, player.items.item_count());
    assert_eq!(saved.last_depot_id, 1);

    let loaded = load_player_by_name(&db, "eremo").unwrap();
    assert!(loaded.is_clean(), "{:?}", loaded.anomalies);
    assert_eq!(loaded.value.items, player.items);
    assert_eq!(loaded.value.profile.level, 8);
}

#[test]
fn test_resave_is_idempotent() {
    let (_dir, db, record) = common::db_with_player("Eremo");
    let items = common::sample_items();
    save_player_items(&db, record.guid, &items).unwrap();
    let first_rows = db.item_rows(record.guid).unwrap();

    let loaded = load_player_by_id(&db, record.guid).unwrap().value;
    save_player(&db, &loaded, ItemStorage::Relational).unwrap();
    let second_rows = db.item_rows(record.guid).unwrap();

    assert_eq!(first_rows, second_rows);
    assert_eq!(first_rows, encode_relational(&items));
}

#[test]
fn test_shrinking_save_removes_old_rows() {
    let (_dir, db, record) = common::db_with_player("Eremo");
    save_player_items(&db, record.guid, &common::sample_items()).unwrap();

    let mut fewer = PlayerItems::new();
    fewer.set_slot(Slot::Ring, Some(ItemTree::new(Item::new(3007, 1))));
    save_player_items(&db, record.guid, &fewer).unwrap();

    assert_eq!(db.item_rows(record.guid).unwrap().len(), 1);
    let loaded = load_player_by_id(&db, record.guid).unwrap();
    assert!(loaded.is_clean());
    assert_eq!(loaded.value.items.item_count(), 1);
    assert!(loaded.value.items.slot(Slot::Ring).is_some());
}

#[test]
fn test_binary_mode_roundtrip_and_switch_back() {
    let (_dir, db, record) = common::db_with_player("Eremo");
    let items = common::sample_items();
    save_player_items(&db, record.guid, &items).unwrap();

    save_player_binary_items(&db, record.guid, &items).unwrap();
    assert!(db.item_rows(record.guid).unwrap().is_empty());
    assert!(db.item_blob(record.guid).unwrap().is_some());
    let loaded = load_player_by_id(&db, record.guid).unwrap();
    assert_eq!(loaded.value.profile.item_storage, ItemStorage::Binary);
    assert!(loaded.is_clean());
    assert_eq!(loaded.value.items, items);

    save_player(&db, &loaded.value, ItemStorage::Relational).unwrap();
    assert!(db.item_blob(record.guid).unwrap().is_none());
    let reloaded = load_player_by_id(&db, record.guid).unwrap();
    assert_eq!(reloaded.value.items, items);
}

#[test]
fn test_missing_player_is_not_found() {
    let (_dir, db) = common::temp_db();
    assert!(load_player_by_id(&db, 404).unwrap_err().is_not_found());
    assert!(load_player_by_name(&db, "Nobody").unwrap_err().is_not_found());
    let err = save_player_items(&db, 404, &PlayerItems::new()).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_corrupt_blob_loads_partially() {
    let (_dir, db, record) = common::db_with_player("Eremo");
    let items = common::sample_items();
    save_player_binary_items(&db, record.guid, &items).unwrap();
    let mut blob = db.item_blob(record.guid).unwrap().unwrap();
    blob.truncate(blob.len() - 3);
    db.replace_items(record.guid, &StoredItems::Blob(blob), 1, None)
        .unwrap();

    let loaded = load_player_by_id(&db, record.guid).unwrap();
    assert_eq!(loaded.anomalies.len(), 1);
    assert!(loaded.value.items.slot(Slot::Backpack).is_some());
    assert!(loaded.value.items.inbox.is_empty());
}
