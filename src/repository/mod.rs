//! Stateless persistence operations over a [`Database`](crate::storage::Database).
//!
//! Every function takes the database handle explicitly so the cache manager's
//! background thread can run the same code with a handle of its own.

pub mod account;
pub mod player;

pub use account::{
    add_premium_days, add_vip_entry, create_account, edit_vip_entry, gameworld_authentication,
    get_account_type, get_vip_entries, load_account, load_account_by_name,
    loginserver_authentication, remove_premium_days, remove_vip_entry, save_account,
    set_account_type, MAX_VIP_ENTRIES,
};
pub use player::{
    create_player, format_player_name, get_guid_by_name, get_guid_by_name_ex, get_name_by_guid,
    has_bidded_on_house, increase_bank_balance, load_player_by_id, load_player_by_name,
    load_player_items, place_house_bid, preload_player, save_player, save_player_binary_items,
    save_player_items, save_player_items_as, update_online_status, GuidLookup, PreloadedPlayer,
};
