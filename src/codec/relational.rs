//! Row-per-node encoding.
//!
//! Rows are numbered in pre-order starting at [`FIRST_ROW_ID`], so within one
//! player's row set a parent always has a lower id than its children and siblings
//! appear in ascending id order. The decoder does not rely on the first property:
//! it builds an item map in one pass and resolves parent links in a second.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::codec::stream::{decode_attributes, encode_attributes};
use crate::codec::{DecodeAnomaly, Decoded};
use crate::items::{Item, ItemKind, ItemTree, NodeId, PlayerItems, Slot};

/// Row ids below this value are never assigned.
pub const FIRST_ROW_ID: u32 = 100;

/// Where a row hangs: a reserved top-level container or another row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowParent {
    Slot(u8),
    Depot(u32),
    Inbox,
    Item(u32),
}

impl RowParent {
    pub fn is_top_level(self) -> bool {
        !matches!(self, RowParent::Item(_))
    }
}

/// One stored item node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRow {
    pub row_id: u32,
    pub parent: RowParent,
    pub type_id: u16,
    pub count: u16,
    pub kind: ItemKind,
    /// Attribute bag in the stream encoding of [`encode_attributes`].
    pub attributes: Vec<u8>,
}

/// Append rows for `tree`, numbering from `*next_id` and advancing it.
pub fn encode_tree_rows(
    tree: &ItemTree,
    parent: RowParent,
    next_id: &mut u32,
    rows: &mut Vec<ItemRow>,
) {
    let mut stack: Vec<(NodeId, RowParent)> = vec![(tree.root(), parent)];
    while let Some((node, parent)) = stack.pop() {
        let Some(item) = tree.get(node) else {
            continue;
        };
        let row_id = *next_id;
        *next_id += 1;
        rows.push(ItemRow {
            row_id,
            parent,
            type_id: item.type_id,
            count: item.count,
            kind: item.kind,
            attributes: encode_attributes(&item.attributes),
        });
        for &child in tree.children(node).iter().rev() {
            stack.push((child, RowParent::Item(row_id)));
        }
    }
}

/// Flatten every container of a player into rows.
pub fn encode_relational(items: &PlayerItems) -> Vec<ItemRow> {
    let mut rows = Vec::new();
    let mut next_id = FIRST_ROW_ID;
    for (slot, tree) in items.equipped() {
        encode_tree_rows(tree, RowParent::Slot(slot.id()), &mut next_id, &mut rows);
    }
    for (&depot_id, chest) in &items.depot_chests {
        for tree in chest {
            encode_tree_rows(tree, RowParent::Depot(depot_id), &mut next_id, &mut rows);
        }
    }
    for tree in &items.inbox {
        encode_tree_rows(tree, RowParent::Inbox, &mut next_id, &mut rows);
    }
    rows
}

/// Transient load-time index: row id to decoded item and its parent link.
type ItemMap = BTreeMap<u32, (Item, RowParent)>;

/// Rebuild player containers from rows in any order.
pub fn decode_relational(rows: impl IntoIterator<Item = ItemRow>) -> Decoded<PlayerItems> {
    let mut anomalies = Vec::new();
    let mut item_map = ItemMap::new();

    for row in rows {
        if item_map.contains_key(&row.row_id) {
            anomalies.push(DecodeAnomaly::DuplicateRow { row_id: row.row_id });
            continue;
        }
        let attributes = match decode_attributes(&row.attributes) {
            Ok(attrs) => attrs,
            Err((partial, reason)) => {
                anomalies.push(DecodeAnomaly::MalformedAttributes {
                    row_id: row.row_id,
                    reason,
                });
                partial
            }
        };
        let item = Item {
            type_id: row.type_id,
            count: row.count,
            kind: row.kind,
            attributes,
        };
        item_map.insert(row.row_id, (item, row.parent));
    }

    let known: HashSet<u32> = item_map.keys().copied().collect();
    let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut top_level = Vec::new();
    for (&row_id, (_, parent)) in &item_map {
        match *parent {
            RowParent::Item(parent_id) => children.entry(parent_id).or_default().push(row_id),
            _ => top_level.push(row_id),
        }
    }

    let mut items = PlayerItems::new();
    for row_id in top_level {
        let Some((item, parent)) = item_map.remove(&row_id) else {
            continue;
        };
        let tree = attach_descendants(ItemTree::new(item), row_id, &children, &mut item_map);
        match parent {
            RowParent::Slot(slot_id) => match Slot::from_id(slot_id) {
                Some(slot) if items.slot(slot).is_none() => {
                    items.set_slot(slot, Some(tree));
                }
                Some(_) => anomalies.push(DecodeAnomaly::SlotOccupied {
                    row_id,
                    slot: slot_id,
                }),
                None => anomalies.push(DecodeAnomaly::InvalidSlot {
                    row_id,
                    slot: slot_id,
                }),
            },
            RowParent::Depot(depot_id) => items.depot_chest_mut(depot_id).push(tree),
            RowParent::Inbox => items.inbox.push(tree),
            RowParent::Item(_) => {}
        }
    }

    // Whatever is left never connected to a top-level container.
    for (row_id, (_, parent)) in item_map {
        if let RowParent::Item(parent_id) = parent {
            if known.contains(&parent_id) {
                anomalies.push(DecodeAnomaly::UnreachableRow { row_id, parent_id });
            } else {
                anomalies.push(DecodeAnomaly::DanglingReference { row_id, parent_id });
            }
        }
    }

    Decoded {
        value: items,
        anomalies,
    }
}

/// Pull every descendant of `root_row` out of `item_map` into `tree`, in row order.
fn attach_descendants(
    mut tree: ItemTree,
    root_row: u32,
    children: &BTreeMap<u32, Vec<u32>>,
    item_map: &mut ItemMap,
) -> ItemTree {
    let mut pending: Vec<(u32, NodeId)> = vec![(root_row, tree.root())];
    while let Some((row_id, node)) = pending.pop() {
        let Some(child_rows) = children.get(&row_id) else {
            continue;
        };
        if !tree.get(node).map(Item::is_container).unwrap_or(false) {
            // Left in the map and reported as unreachable.
            continue;
        }
        for &child_row in child_rows {
            let Some((item, _)) = item_map.remove(&child_row) else {
                continue;
            };
            if let Some(child) = tree.push_child(node, item) {
                pending.push((child_row, child));
            }
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_id: u32, parent: RowParent, type_id: u16, kind: ItemKind) -> ItemRow {
        ItemRow {
            row_id,
            parent,
            type_id,
            count: 1,
            kind,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn rows_are_preorder_with_ascending_siblings() {
        let tree = ItemTree::with_children(
            Item::container(2854),
            vec![
                ItemTree::with_children(Item::container(2853), vec![ItemTree::new(Item::new(1, 1))]),
                ItemTree::new(Item::new(2, 1)),
            ],
        );
        let mut items = PlayerItems::new();
        items.set_slot(Slot::Backpack, Some(tree));
        let rows = encode_relational(&items);

        let shape: Vec<(u32, RowParent, u16)> =
            rows.iter().map(|r| (r.row_id, r.parent, r.type_id)).collect();
        assert_eq!(
            shape,
            vec![
                (100, RowParent::Slot(3), 2854),
                (101, RowParent::Item(100), 2853),
                (102, RowParent::Item(101), 1),
                (103, RowParent::Item(100), 2),
            ]
        );
    }

    #[test]
    fn out_of_order_rows_still_resolve() {
        let rows = vec![
            row(205, RowParent::Item(200), 12, ItemKind::Simple),
            row(201, RowParent::Item(200), 11, ItemKind::Simple),
            row(200, RowParent::Depot(1), 1987, ItemKind::Container),
        ];
        let decoded = decode_relational(rows);
        assert!(decoded.is_clean());
        let chest = decoded.value.depot_chest(1).expect("depot 1");
        let bag = &chest[0];
        let order: Vec<u16> = bag
            .children(bag.root())
            .iter()
            .filter_map(|&c| bag.get(c).map(|i| i.type_id))
            .collect();
        assert_eq!(order, vec![11, 12]);
    }

    #[test]
    fn dangling_and_unreachable_rows_are_reported() {
        let rows = vec![
            row(100, RowParent::Inbox, 3000, ItemKind::Simple),
            row(101, RowParent::Item(100), 3001, ItemKind::Simple),
            row(102, RowParent::Item(999), 3002, ItemKind::Container),
            row(103, RowParent::Item(102), 3003, ItemKind::Simple),
        ];
        let decoded = decode_relational(rows);
        assert_eq!(decoded.value.inbox.len(), 1);
        assert_eq!(decoded.value.item_count(), 1);
        assert_eq!(
            decoded.anomalies,
            vec![
                DecodeAnomaly::UnreachableRow {
                    row_id: 101,
                    parent_id: 100
                },
                DecodeAnomaly::DanglingReference {
                    row_id: 102,
                    parent_id: 999
                },
                DecodeAnomaly::UnreachableRow {
                    row_id: 103,
                    parent_id: 102
                },
            ]
        );
    }

    #[test]
    fn slot_conflicts_and_duplicates() {
        let rows = vec![
            row(100, RowParent::Slot(1), 3351, ItemKind::Simple),
            row(101, RowParent::Slot(1), 3352, ItemKind::Simple),
            row(102, RowParent::Slot(42), 3353, ItemKind::Simple),
            row(100, RowParent::Inbox, 3354, ItemKind::Simple),
        ];
        let decoded = decode_relational(rows);
        assert_eq!(
            decoded.value.slot(Slot::Head).map(|t| t.root_item().type_id),
            Some(3351)
        );
        assert_eq!(
            decoded.anomalies,
            vec![
                DecodeAnomaly::DuplicateRow { row_id: 100 },
                DecodeAnomaly::SlotOccupied { row_id: 101, slot: 1 },
                DecodeAnomaly::InvalidSlot { row_id: 102, slot: 42 },
            ]
        );
    }
}
