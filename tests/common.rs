//! Test utilities & fixtures.
//! Throwaway databases and a small, deterministic item layout shared by the
//! integration tests.

use playervault::items::{Item, ItemTree, PlayerItems, Slot};
use playervault::records::PlayerRecord;
use playervault::repository::{create_account, create_player};
use playervault::storage::{Database, DatabaseBuilder};
use tempfile::TempDir;

/// Fresh database in a temp dir. Keep the `TempDir` alive for the test's duration.
#[allow(dead_code)]
pub fn temp_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("tempdir");
    let params = argon2::Params::new(8 * 1024, 1, 1, None).expect("argon2 params");
    let db = DatabaseBuilder::new(dir.path().join("vault"))
        .argon2_params(params)
        .open()
        .expect("open database");
    (dir, db)
}

/// Database holding one account ("tester") with one character.
#[allow(dead_code)]
pub fn db_with_player(name: &str) -> (TempDir, Database, PlayerRecord) {
    let (dir, db) = temp_db();
    let account = create_account(&db, "tester", "secret-pass").expect("account");
    let record = create_player(&db, account.id, name).expect("player");
    (dir, db, record)
}

/// Backpack in slot 3 holding a bag with a rune, depot 1 with a chest of coins,
/// and one parcel in the inbox.
#[allow(dead_code)]
pub fn sample_items() -> PlayerItems {
    let mut items = PlayerItems::new();
    items.set_slot(Slot::Head, Some(ItemTree::new(Item::new(3351, 1))));
    items.set_slot(
        Slot::Backpack,
        Some(ItemTree::with_children(
            Item::container(2854),
            vec![
                ItemTree::with_children(
                    Item::container(2853),
                    vec![ItemTree::new(
                        Item::new(3155, 5).with_attribute("charges", 5i64),
                    )],
                ),
                ItemTree::new(Item::new(3031, 100)),
                ItemTree::new(Item::new(3035, 0)),
            ],
        )),
    );
    items.depot_chest_mut(1).push(ItemTree::with_children(
        Item::container(3502),
        vec![ItemTree::new(
            Item::new(3043, 7).with_attribute("text", "savings"),
        )],
    ));
    items.inbox.push(ItemTree::new(
        Item::new(3504, 1).with_attribute("sealed", true),
    ));
    items.last_depot_id = 1;
    items
}
