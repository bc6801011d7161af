//! # Item model
//!
//! Items are stored as arenas: an [`ItemTree`] owns every node of one rooted item
//! (a sword, or a backpack and everything nested inside it). Nodes refer to each
//! other by [`NodeId`] only. Children are kept as ordered index lists and the
//! parent link is an explicit id, so a tree can never contain a reference cycle.
//!
//! A player's durable item state is a [`PlayerItems`] value: one optional tree per
//! equipment [`Slot`], an ordered list of trees per depot chest, the inbox list and
//! the last depot the player used.

pub mod attributes;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use attributes::{AttributeMap, AttributeValue};

/// Whether an item may hold other items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Simple,
    Container,
}

impl ItemKind {
    pub fn is_container(self) -> bool {
        matches!(self, ItemKind::Container)
    }
}

/// Payload of one item node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub type_id: u16,
    /// Stack size or charges. Zero is legal for items that store a normalized default.
    pub count: u16,
    pub kind: ItemKind,
    pub attributes: AttributeMap,
}

impl Item {
    pub fn new(type_id: u16, count: u16) -> Self {
        Self {
            type_id,
            count,
            kind: ItemKind::Simple,
            attributes: AttributeMap::new(),
        }
    }

    pub fn container(type_id: u16) -> Self {
        Self {
            type_id,
            count: 1,
            kind: ItemKind::Container,
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }
}

/// Index of a node inside its owning [`ItemTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node {
    item: Item,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena holding one rooted item and all of its nested contents.
#[derive(Debug, Clone)]
pub struct ItemTree {
    nodes: Vec<Node>,
}

impl ItemTree {
    /// Create a tree consisting of a single root item.
    pub fn new(root: Item) -> Self {
        Self {
            nodes: vec![Node {
                item: root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Build a container whose direct contents are `children`, in order.
    ///
    /// Children are grafted regardless of nesting depth; a non-container root
    /// silently drops them, matching [`ItemTree::graft`].
    pub fn with_children(root: Item, children: impl IntoIterator<Item = ItemTree>) -> Self {
        let mut tree = ItemTree::new(root);
        let root_id = tree.root();
        for child in children {
            tree.graft(root_id, child);
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_item(&self) -> &Item {
        &self.nodes[0].item
    }

    pub fn get(&self, id: NodeId) -> Option<&Item> {
        self.nodes.get(id.index()).map(|n| &n.item)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Item> {
        self.nodes.get_mut(id.index()).map(|n| &mut n.item)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.index())
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    /// Append `item` as the last child of `parent`.
    ///
    /// Returns `None` when `parent` does not exist or is not a container.
    pub fn push_child(&mut self, parent: NodeId, item: Item) -> Option<NodeId> {
        if !self.nodes.get(parent.index())?.item.is_container() {
            return None;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            item,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.index()].children.push(id);
        Some(id)
    }

    /// Move every node of `subtree` under `parent`, keeping its internal order.
    /// Returns the id the subtree root received in this arena.
    pub fn graft(&mut self, parent: NodeId, subtree: ItemTree) -> Option<NodeId> {
        if !self.nodes.get(parent.index())?.item.is_container() {
            return None;
        }
        let offset = self.nodes.len() as u32;
        for (index, node) in subtree.nodes.into_iter().enumerate() {
            let parent_link = match node.parent {
                Some(p) => NodeId(p.0 + offset),
                None => parent,
            };
            debug_assert_eq!(self.nodes.len() as u32, offset + index as u32);
            self.nodes.push(Node {
                item: node.item,
                parent: Some(parent_link),
                children: node.children.iter().map(|c| NodeId(c.0 + offset)).collect(),
            });
        }
        let grafted_root = NodeId(offset);
        self.nodes[parent.index()].children.push(grafted_root);
        Some(grafted_root)
    }

    /// Copy the subtree rooted at `id` into a fresh, compact arena.
    pub fn subtree(&self, id: NodeId) -> Option<ItemTree> {
        let root = self.get(id)?.clone();
        let mut out = ItemTree::new(root);
        let mut stack = vec![(id, out.root())];
        while let Some((source, target)) = stack.pop() {
            for &child in self.children(source) {
                let copied = out.push_child(target, self.nodes[child.index()].item.clone())?;
                stack.push((child, copied));
            }
        }
        Some(out)
    }

    /// Total number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // A tree always has a root.
        false
    }

    /// Number of levels, a lone item being depth 1.
    pub fn depth(&self) -> usize {
        self.preorder().map(|(_, depth)| depth + 1).max().unwrap_or(1)
    }

    /// Pre-order walk yielding each node with its depth below the root.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: vec![(self.root(), 0)],
        }
    }
}

/// Structural equality: same items, same child order, same nesting. Arena layout is
/// irrelevant, so a tree built by grafting compares equal to one decoded from storage.
impl PartialEq for ItemTree {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self.root(), other.root())];
        while let Some((a, b)) = pending.pop() {
            let left = &self.nodes[a.index()];
            let right = &other.nodes[b.index()];
            if left.item != right.item || left.children.len() != right.children.len() {
                return false;
            }
            pending.extend(left.children.iter().copied().zip(right.children.iter().copied()));
        }
        true
    }
}

impl Eq for ItemTree {}

pub struct Preorder<'a> {
    tree: &'a ItemTree,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for Preorder<'_> {
    type Item = (NodeId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        for &child in self.tree.children(id).iter().rev() {
            self.stack.push((child, depth + 1));
        }
        Some((id, depth))
    }
}

pub const SLOT_COUNT: usize = 10;

/// Equipment slots. Discriminants are the stored slot ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    Head = 1,
    Necklace = 2,
    Backpack = 3,
    Armor = 4,
    Right = 5,
    Left = 6,
    Legs = 7,
    Feet = 8,
    Ring = 9,
    Ammo = 10,
}

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::Head,
        Slot::Necklace,
        Slot::Backpack,
        Slot::Armor,
        Slot::Right,
        Slot::Left,
        Slot::Legs,
        Slot::Feet,
        Slot::Ring,
        Slot::Ammo,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Slot> {
        Slot::ALL.iter().copied().find(|s| s.id() == id)
    }

    fn index(self) -> usize {
        self as usize - 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::Head => "head",
            Slot::Necklace => "necklace",
            Slot::Backpack => "backpack",
            Slot::Armor => "armor",
            Slot::Right => "right",
            Slot::Left => "left",
            Slot::Legs => "legs",
            Slot::Feet => "feet",
            Slot::Ring => "ring",
            Slot::Ammo => "ammo",
        }
    }
}

/// Marker stored when the player never opened a depot.
pub const NO_DEPOT: i16 = -1;

/// Every item a player owns, grouped by top-level container.
///
/// An empty depot chest holds no state: neither encoding stores it, and equality
/// treats it as absent.
#[derive(Debug, Clone)]
pub struct PlayerItems {
    inventory: [Option<ItemTree>; SLOT_COUNT],
    pub depot_chests: BTreeMap<u32, Vec<ItemTree>>,
    pub inbox: Vec<ItemTree>,
    pub last_depot_id: i16,
}

impl Default for PlayerItems {
    fn default() -> Self {
        Self {
            inventory: Default::default(),
            depot_chests: BTreeMap::new(),
            inbox: Vec::new(),
            last_depot_id: NO_DEPOT,
        }
    }
}

impl PartialEq for PlayerItems {
    fn eq(&self, other: &Self) -> bool {
        self.inventory == other.inventory
            && self.inbox == other.inbox
            && self.last_depot_id == other.last_depot_id
            && self.stocked_chests().eq(other.stocked_chests())
    }
}

impl Eq for PlayerItems {}

impl PlayerItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, slot: Slot) -> Option<&ItemTree> {
        self.inventory[slot.index()].as_ref()
    }

    pub fn slot_mut(&mut self, slot: Slot) -> Option<&mut ItemTree> {
        self.inventory[slot.index()].as_mut()
    }

    /// Place `tree` into `slot`, returning whatever was there before.
    pub fn set_slot(&mut self, slot: Slot, tree: Option<ItemTree>) -> Option<ItemTree> {
        std::mem::replace(&mut self.inventory[slot.index()], tree)
    }

    /// Occupied equipment slots in slot order.
    pub fn equipped(&self) -> impl Iterator<Item = (Slot, &ItemTree)> {
        Slot::ALL
            .iter()
            .filter_map(move |&slot| self.slot(slot).map(|tree| (slot, tree)))
    }

    pub fn depot_chest(&self, depot_id: u32) -> Option<&Vec<ItemTree>> {
        self.depot_chests.get(&depot_id)
    }

    /// Depot chests holding at least one item, by depot id.
    pub fn stocked_chests(&self) -> impl Iterator<Item = (&u32, &Vec<ItemTree>)> {
        self.depot_chests.iter().filter(|(_, chest)| !chest.is_empty())
    }

    /// Depot chest contents, created empty on first access.
    pub fn depot_chest_mut(&mut self, depot_id: u32) -> &mut Vec<ItemTree> {
        self.depot_chests.entry(depot_id).or_default()
    }

    /// Total number of item nodes across every container.
    pub fn item_count(&self) -> usize {
        let equipped: usize = self.equipped().map(|(_, t)| t.len()).sum();
        let depot: usize = self
            .depot_chests
            .values()
            .flat_map(|chest| chest.iter())
            .map(ItemTree::len)
            .sum();
        let inbox: usize = self.inbox.iter().map(ItemTree::len).sum();
        equipped + depot + inbox
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backpack_with(items: &[u16]) -> ItemTree {
        ItemTree::with_children(
            Item::container(2854),
            items.iter().map(|&id| ItemTree::new(Item::new(id, 1))),
        )
    }

    #[test]
    fn push_child_rejects_simple_parent() {
        let mut tree = ItemTree::new(Item::new(3031, 100));
        assert!(tree.push_child(tree.root(), Item::new(3035, 1)).is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn graft_keeps_nested_order() {
        let inner = backpack_with(&[1, 2]);
        let mut outer = backpack_with(&[10]);
        let root = outer.root();
        let grafted = outer.graft(root, inner).expect("container root");
        outer.push_child(root, Item::new(11, 1));

        let top: Vec<u16> = outer
            .children(root)
            .iter()
            .map(|&c| outer.get(c).map(|i| i.type_id).unwrap_or(0))
            .collect();
        assert_eq!(top, vec![10, 2854, 11]);

        let nested: Vec<u16> = outer
            .children(grafted)
            .iter()
            .map(|&c| outer.get(c).map(|i| i.type_id).unwrap_or(0))
            .collect();
        assert_eq!(nested, vec![1, 2]);
        assert_eq!(outer.parent(grafted), Some(root));
        assert_eq!(outer.depth(), 3);
    }

    #[test]
    fn structural_equality_ignores_arena_layout() {
        let built = ItemTree::with_children(
            Item::container(1987),
            vec![backpack_with(&[5, 6]), ItemTree::new(Item::new(7, 3))],
        );

        // Same shape, assembled node by node in a different allocation order.
        let mut manual = ItemTree::new(Item::container(1987));
        let root = manual.root();
        let bag = manual.push_child(root, Item::container(2854)).expect("bag");
        manual.push_child(root, Item::new(7, 3));
        manual.push_child(bag, Item::new(5, 1));
        manual.push_child(bag, Item::new(6, 1));

        assert_eq!(built, manual);

        let mut altered = manual.clone();
        let first = altered.children(root)[1];
        if let Some(item) = altered.get_mut(first) {
            item.count = 4;
        }
        assert_ne!(built, altered);
    }

    #[test]
    fn subtree_extracts_compact_copy() {
        let tree = ItemTree::with_children(Item::container(1987), vec![backpack_with(&[5, 6])]);
        let bag = tree.children(tree.root())[0];
        let copy = tree.subtree(bag).expect("subtree");
        assert_eq!(copy, backpack_with(&[5, 6]));
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn player_items_counts_everything() {
        let mut items = PlayerItems::new();
        assert!(items.is_empty());
        assert_eq!(items.last_depot_id, NO_DEPOT);

        items.set_slot(Slot::Backpack, Some(backpack_with(&[1, 2, 3])));
        items.depot_chest_mut(1).push(ItemTree::new(Item::new(9, 1)));
        items.inbox.push(ItemTree::new(Item::new(8, 1)));

        assert_eq!(items.item_count(), 6);
        let equipped: Vec<Slot> = items.equipped().map(|(s, _)| s).collect();
        assert_eq!(equipped, vec![Slot::Backpack]);
        assert_eq!(Slot::from_id(3), Some(Slot::Backpack));
        assert_eq!(Slot::from_id(11), None);
    }

    #[test]
    fn empty_depot_chest_equals_missing_chest() {
        let mut opened = PlayerItems::new();
        opened.depot_chest_mut(5);
        assert_eq!(opened, PlayerItems::new());

        opened.depot_chest_mut(5).push(ItemTree::new(Item::new(9, 1)));
        assert_ne!(opened, PlayerItems::new());
    }

    #[test]
    fn deep_trees_compare_without_recursion() {
        let build = |leaf: u16| {
            let mut tree = ItemTree::new(Item::container(1987));
            let mut tip = tree.root();
            for _ in 0..50_000 {
                tip = tree.push_child(tip, Item::container(1987)).expect("container");
            }
            tree.push_child(tip, Item::new(leaf, 1));
            tree
        };
        assert_eq!(build(1), build(1));
        assert_ne!(build(1), build(2));
    }
}
