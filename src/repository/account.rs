//! Accounts, authentication, VIP lists and premium time.

use chrono::Utc;
use log::{debug, info, warn};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use crate::records::{Account, AccountType, VipEntry, VipRecord, UNLIMITED_PREMIUM_DAYS};
use crate::storage::{Database, StoreError};
use crate::validation::validate_account_name;

/// Maximum number of VIP entries per account.
pub const MAX_VIP_ENTRIES: usize = 100;

fn hash_password(db: &Database, password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = db
        .argon2()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::Password(format!("password hash failure: {e}")))?;
    Ok(hash.to_string())
}

fn verify_password(db: &Database, stored: &str, password: &str) -> Result<bool, StoreError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| StoreError::Password(format!("corrupt password hash: {e}")))?;
    Ok(db
        .argon2()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn create_account(db: &Database, name: &str, password: &str) -> Result<Account, StoreError> {
    let name = validate_account_name(name)?;
    let hash = hash_password(db, password)?;
    let account = db.insert_account(Account::new(&name, hash))?;
    info!("created account {} ({})", account.name, account.id);
    Ok(account)
}

/// Load an account with its character names filled in.
pub fn load_account(db: &Database, id: u32) -> Result<Account, StoreError> {
    let mut account = db.get_account(id)?;
    account.characters = db
        .account_characters(id)?
        .into_iter()
        .filter(|p| !p.deleted)
        .map(|p| p.name)
        .collect();
    Ok(account)
}

pub fn load_account_by_name(db: &Database, name: &str) -> Result<Option<Account>, StoreError> {
    match db.find_account_id(name)? {
        Some(id) => load_account(db, id).map(Some),
        None => Ok(None),
    }
}

/// Store the account type and premium fields. Password hash and name are unchanged.
pub fn save_account(db: &Database, account: &Account) -> Result<(), StoreError> {
    let stored = db.get_account(account.id)?;
    let mut updated = account.clone();
    updated.name = stored.name;
    updated.password_hash = stored.password_hash;
    updated.created_at = stored.created_at;
    db.put_account(&updated)
}

pub fn get_account_type(db: &Database, id: u32) -> Result<AccountType, StoreError> {
    Ok(db.get_account(id)?.account_type)
}

pub fn set_account_type(
    db: &Database,
    id: u32,
    account_type: AccountType,
) -> Result<(), StoreError> {
    db.update_account(id, |a| a.account_type = account_type)?;
    Ok(())
}

/// Check credentials for the character list. Returns `None` on unknown name or
/// wrong password.
pub fn loginserver_authentication(
    db: &Database,
    name: &str,
    password: &str,
) -> Result<Option<Account>, StoreError> {
    let Some(account) = load_account_by_name(db, name)? else {
        debug!("login refused: unknown account {}", name);
        return Ok(None);
    };
    if !verify_password(db, &account.password_hash, password)? {
        warn!("login refused: wrong password for account {}", account.name);
        return Ok(None);
    }
    Ok(Some(account))
}

/// Check credentials and that `character` belongs to the account and is not
/// pending deletion. Returns the account id on success.
pub fn gameworld_authentication(
    db: &Database,
    account_name: &str,
    password: &str,
    character: &str,
) -> Result<Option<u32>, StoreError> {
    let Some(account) = loginserver_authentication(db, account_name, password)? else {
        return Ok(None);
    };
    let Some(guid) = db.find_player_guid(character)? else {
        return Ok(None);
    };
    let profile = db.get_player(guid)?;
    if profile.account_id != account.id || profile.deleted {
        warn!(
            "game world login refused: {} is not a live character of account {}",
            profile.name, account.name
        );
        return Ok(None);
    }
    Ok(Some(account.id))
}

/// VIP list of an account joined with current character names. Entries whose
/// character no longer exists are skipped.
pub fn get_vip_entries(db: &Database, account_id: u32) -> Result<Vec<VipEntry>, StoreError> {
    let mut entries = Vec::new();
    for record in db.vip_records(account_id)? {
        let name = match db.get_player(record.guid) {
            Ok(profile) => profile.name,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        entries.push(VipEntry {
            guid: record.guid,
            name,
            description: record.description,
            icon: record.icon,
            notify: record.notify,
        });
    }
    Ok(entries)
}

/// Add `guid` to an account's VIP list. Returns `false` if it is already listed
/// or the list is full.
pub fn add_vip_entry(
    db: &Database,
    account_id: u32,
    guid: u32,
    description: &str,
    icon: u32,
    notify: bool,
) -> Result<bool, StoreError> {
    db.get_player(guid)?;
    if db.has_vip(account_id, guid)? {
        return Ok(false);
    }
    if db.vip_records(account_id)?.len() >= MAX_VIP_ENTRIES {
        warn!("vip list of account {} is full", account_id);
        return Ok(false);
    }
    db.put_vip(
        account_id,
        &VipRecord {
            guid,
            description: description.to_string(),
            icon,
            notify,
        },
    )?;
    Ok(true)
}

/// Returns `false` if `guid` is not on the list.
pub fn edit_vip_entry(
    db: &Database,
    account_id: u32,
    guid: u32,
    description: &str,
    icon: u32,
    notify: bool,
) -> Result<bool, StoreError> {
    if !db.has_vip(account_id, guid)? {
        return Ok(false);
    }
    db.put_vip(
        account_id,
        &VipRecord {
            guid,
            description: description.to_string(),
            icon,
            notify,
        },
    )?;
    Ok(true)
}

pub fn remove_vip_entry(db: &Database, account_id: u32, guid: u32) -> Result<bool, StoreError> {
    db.remove_vip(account_id, guid)
}

/// Add premium days. Reaching the unlimited marker keeps the account unlimited.
/// Returns the new day count.
pub fn add_premium_days(db: &Database, id: u32, days: u16) -> Result<u16, StoreError> {
    let now = Utc::now();
    let account = db.update_account(id, |a| {
        if a.premium_days != UNLIMITED_PREMIUM_DAYS {
            a.premium_days = a.premium_days.saturating_add(days);
        }
        a.last_premium_update = Some(now);
    })?;
    Ok(account.premium_days)
}

/// Remove premium days, never going below zero. Unlimited accounts are untouched.
pub fn remove_premium_days(db: &Database, id: u32, days: u16) -> Result<u16, StoreError> {
    let now = Utc::now();
    let account = db.update_account(id, |a| {
        if a.premium_days != UNLIMITED_PREMIUM_DAYS {
            a.premium_days = a.premium_days.saturating_sub(days);
        }
        a.last_premium_update = Some(now);
    })?;
    Ok(account.premium_days)
}
