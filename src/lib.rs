//! # Playervault - player persistence for game servers
//!
//! Playervault stores characters, their accounts and, above all, their items. Every
//! item a player owns hangs in a tree under one of the top-level containers
//! (equipment slots, depot chests, the inbox), and those trees are persisted either
//! as one row per node or as a single binary blob per player.
//!
//! ## Features
//!
//! - **Item Trees**: arena-backed trees with explicit parent links and ordered children.
//! - **Two Codecs**: a relational rowset with reserved top-level markers and a compact
//!   little-endian binary stream. Both decoders keep what they can and report the rest.
//! - **Atomic Saves**: item rows, blobs and the profile row are replaced in one sled
//!   transaction.
//! - **Write-back Cache**: logged-out players are cached in memory and flushed by a
//!   background thread; shutdown persists everything still queued.
//! - **Accounts**: Argon2id password hashing, login checks, VIP lists, premium days.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use playervault::config::Config;
//! use playervault::repository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let db = config.open_database()?;
//!     let player = repository::load_player_by_name(&db, "Eremo")?;
//!     println!("{} carries {} items", player.value.name(), player.value.items.item_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`items`] - item payloads, attribute bags, item trees and player containers
//! - [`codec`] - relational and binary encodings plus decode anomalies
//! - [`storage`] - sled-backed database collaborator
//! - [`repository`] - stateless load/save operations for players and accounts
//! - [`cache`] - write-back player cache and its flush thread
//! - [`player`] - loaded player snapshot and the item-owner seam
//! - [`config`] - TOML configuration

pub mod cache;
pub mod codec;
pub mod config;
pub mod items;
pub mod metrics;
pub mod player;
pub mod records;
pub mod repository;
pub mod storage;
pub mod validation;
