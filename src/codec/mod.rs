//! # Item tree codecs
//!
//! Two storage encodings for [`PlayerItems`](crate::items::PlayerItems):
//!
//! - [`relational`]: one [`ItemRow`] per node, linked by parent row id, with reserved
//!   [`RowParent`] markers for inventory slots, depot chests and the inbox.
//! - [`binary`]: a single positional pre-order stream with no row ids.
//!
//! Decoders never fail outright. They return a [`Decoded`] value holding whatever
//! could be rebuilt together with the [`DecodeAnomaly`] list describing what could not.

pub mod binary;
pub mod relational;
pub mod stream;

use thiserror::Error;

pub use binary::{decode_binary, decode_player_blob, encode_binary, encode_player_blob};
pub use relational::{decode_relational, encode_relational, ItemRow, RowParent, FIRST_ROW_ID};
pub use stream::StreamError;

/// Something a decoder had to skip or truncate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeAnomaly {
    /// A binary node header or body could not be read. `path` is the chain of child
    /// indices from the tree root to the offending node.
    #[error("malformed stream in {scope} at node {path:?} (offset {offset}): {reason}")]
    MalformedStream {
        scope: String,
        path: Vec<usize>,
        offset: usize,
        reason: StreamError,
    },

    #[error("item row {row_id} references missing parent row {parent_id}")]
    DanglingReference { row_id: u32, parent_id: u32 },

    /// The parent row exists but was never attached (it is itself orphaned, is not a
    /// container, or the rows form a loop).
    #[error("item row {row_id} is unreachable through parent row {parent_id}")]
    UnreachableRow { row_id: u32, parent_id: u32 },

    #[error("item row {row_id} names unknown inventory slot {slot}")]
    InvalidSlot { row_id: u32, slot: u8 },

    #[error("item row {row_id} targets inventory slot {slot}, which is already occupied")]
    SlotOccupied { row_id: u32, slot: u8 },

    #[error("item row {row_id} has a malformed attribute blob: {reason}")]
    MalformedAttributes { row_id: u32, reason: StreamError },

    #[error("item row id {row_id} appears more than once")]
    DuplicateRow { row_id: u32 },
}

/// Best-effort decode result.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub anomalies: Vec<DecodeAnomaly>,
}

impl<T> Decoded<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            anomalies: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        Decoded {
            value: f(self.value),
            anomalies: self.anomalies,
        }
    }
}
