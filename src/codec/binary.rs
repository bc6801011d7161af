//! Positional binary encoding.
//!
//! Node layout, written in pre-order:
//!
//! ```text
//! 0xFE | type u16 | count u16 | kind u8 | attr_count u32 | attrs...
//!      | (containers only) child_count u32 | children...
//! 0xFF
//! ```
//!
//! A player blob wraps several trees: magic, version, equipped slots, last depot id,
//! depot chests and the inbox. There are no row ids; structure is purely positional, so
//! once a header is unreadable nothing after it can be trusted and decoding stops.
//!
//! Reading and writing walk the tree with explicit stacks, so nesting depth is bounded
//! only by memory.

use crate::codec::stream::{read_attribute_entries, write_attribute_entries, PropReader, PropWriter};
use crate::codec::{DecodeAnomaly, Decoded, StreamError};
use crate::items::{AttributeMap, Item, ItemKind, ItemTree, NodeId, PlayerItems, Slot};

pub const NODE_START: u8 = 0xFE;
pub const NODE_END: u8 = 0xFF;

const KIND_SIMPLE: u8 = 0;
const KIND_CONTAINER: u8 = 1;

const BLOB_MAGIC: &[u8; 4] = b"PVIT";
const BLOB_VERSION: u8 = 1;

struct Failure {
    path: Vec<usize>,
    offset: usize,
    reason: StreamError,
}

impl Failure {
    fn into_anomaly(self, scope: &str) -> DecodeAnomaly {
        DecodeAnomaly::MalformedStream {
            scope: scope.to_string(),
            path: self.path,
            offset: self.offset,
            reason: self.reason,
        }
    }
}

/// Encode one rooted tree.
pub fn encode_binary(tree: &ItemTree) -> Vec<u8> {
    let mut out = PropWriter::new();
    write_tree(&mut out, tree);
    out.into_vec()
}

pub fn write_tree(out: &mut PropWriter, tree: &ItemTree) {
    write_node(out, tree, tree.root());
}

enum WriteStep {
    Open(NodeId),
    Close,
}

fn write_node(out: &mut PropWriter, tree: &ItemTree, id: NodeId) {
    let mut steps = vec![WriteStep::Open(id)];
    while let Some(step) = steps.pop() {
        let id = match step {
            WriteStep::Open(id) => id,
            WriteStep::Close => {
                out.write_u8(NODE_END);
                continue;
            }
        };
        let Some(item) = tree.get(id) else {
            continue;
        };
        write_header(out, item);
        steps.push(WriteStep::Close);
        if item.is_container() {
            let children = tree.children(id);
            out.write_len(children.len());
            steps.extend(children.iter().rev().map(|&child| WriteStep::Open(child)));
        }
    }
}

fn write_header(out: &mut PropWriter, item: &Item) {
    out.write_u8(NODE_START);
    out.write_u16(item.type_id);
    out.write_u16(item.count);
    out.write_u8(match item.kind {
        ItemKind::Simple => KIND_SIMPLE,
        ItemKind::Container => KIND_CONTAINER,
    });
    out.write_len(item.attributes.len());
    write_attribute_entries(out, &item.attributes);
}

fn read_header(input: &mut PropReader<'_>) -> Result<Item, StreamError> {
    input.expect_marker(NODE_START)?;
    let type_id = input.read_u16()?;
    if type_id == 0 {
        return Err(StreamError::InvalidType);
    }
    let count = input.read_u16()?;
    let kind = match input.read_u8()? {
        KIND_SIMPLE => ItemKind::Simple,
        KIND_CONTAINER => ItemKind::Container,
        other => return Err(StreamError::UnknownKind(other)),
    };
    let attr_count = input.read_u32()? as usize;
    let mut attributes = AttributeMap::new();
    read_attribute_entries(input, attr_count, &mut attributes)?;
    Ok(Item {
        type_id,
        count,
        kind,
        attributes,
    })
}

/// A container whose children are still being read.
struct OpenContainer {
    node: NodeId,
    remaining: u32,
    next_index: usize,
}

fn failure(path: &[usize], offset: usize, reason: StreamError) -> Failure {
    Failure {
        path: path.to_vec(),
        offset,
        reason,
    }
}

/// Read the bodies (child lists and end markers) of the tree whose root header has
/// already been read. `path` tracks the child indices of the node being read.
fn read_body(input: &mut PropReader<'_>, tree: &mut ItemTree) -> Result<(), Failure> {
    let mut path: Vec<usize> = Vec::new();
    let mut open: Vec<OpenContainer> = Vec::new();
    let mut entered = Some(tree.root());

    loop {
        if let Some(node) = entered.take() {
            let offset = input.offset();
            if tree.get(node).map(Item::is_container).unwrap_or(false) {
                let remaining = input
                    .read_u32()
                    .map_err(|reason| failure(&path, offset, reason))?;
                open.push(OpenContainer {
                    node,
                    remaining,
                    next_index: 0,
                });
            } else {
                input
                    .expect_marker(NODE_END)
                    .map_err(|reason| failure(&path, offset, reason))?;
                if open.is_empty() {
                    return Ok(());
                }
                path.pop();
            }
            continue;
        }

        let Some(container) = open.last_mut() else {
            return Ok(());
        };
        if container.remaining == 0 {
            let offset = input.offset();
            input
                .expect_marker(NODE_END)
                .map_err(|reason| failure(&path, offset, reason))?;
            open.pop();
            if open.is_empty() {
                return Ok(());
            }
            path.pop();
            continue;
        }

        container.remaining -= 1;
        let parent = container.node;
        path.push(container.next_index);
        container.next_index += 1;

        let offset = input.offset();
        let item = read_header(input).map_err(|reason| failure(&path, offset, reason))?;
        let child = tree.push_child(parent, item).ok_or_else(|| {
            failure(
                &path,
                offset,
                StreamError::Invalid("child attached to non-container".into()),
            )
        })?;
        entered = Some(child);
    }
}

/// Read one tree. The tree is returned even when a nested node failed, holding every
/// node decoded before the failure.
pub fn read_tree(input: &mut PropReader<'_>, scope: &str) -> (Option<ItemTree>, Option<DecodeAnomaly>) {
    let offset = input.offset();
    let root = match read_header(input) {
        Ok(item) => item,
        Err(reason) => {
            let failure = Failure {
                path: Vec::new(),
                offset,
                reason,
            };
            return (None, Some(failure.into_anomaly(scope)));
        }
    };
    let mut tree = ItemTree::new(root);
    let anomaly = read_body(input, &mut tree)
        .err()
        .map(|f| f.into_anomaly(scope));
    (Some(tree), anomaly)
}

/// Decode a stream produced by [`encode_binary`].
pub fn decode_binary(bytes: &[u8]) -> Decoded<Option<ItemTree>> {
    let mut input = PropReader::new(bytes);
    let (tree, anomaly) = read_tree(&mut input, "item");
    let mut anomalies: Vec<DecodeAnomaly> = anomaly.into_iter().collect();
    if anomalies.is_empty() && !input.is_exhausted() {
        anomalies.push(DecodeAnomaly::MalformedStream {
            scope: "item".into(),
            path: Vec::new(),
            offset: input.offset(),
            reason: StreamError::Invalid(format!("{} trailing bytes", input.remaining())),
        });
    }
    Decoded {
        value: tree,
        anomalies,
    }
}

/// Encode every container of a player into one blob.
pub fn encode_player_blob(items: &PlayerItems) -> Vec<u8> {
    let mut out = PropWriter::new();
    out.write_bytes(BLOB_MAGIC);
    out.write_u8(BLOB_VERSION);

    let equipped: Vec<(Slot, &ItemTree)> = items.equipped().collect();
    out.write_u8(equipped.len() as u8);
    for (slot, tree) in equipped {
        out.write_u8(slot.id());
        write_tree(&mut out, tree);
    }

    out.write_i16(items.last_depot_id);

    let chests: Vec<(&u32, &Vec<ItemTree>)> = items.stocked_chests().collect();
    out.write_len(chests.len());
    for (depot_id, chest) in chests {
        out.write_u32(*depot_id);
        out.write_len(chest.len());
        for tree in chest {
            write_tree(&mut out, tree);
        }
    }

    out.write_len(items.inbox.len());
    for tree in &items.inbox {
        write_tree(&mut out, tree);
    }
    out.into_vec()
}

/// Decode a blob produced by [`encode_player_blob`]. Decoding stops at the first
/// malformed node; everything read up to that point is kept.
pub fn decode_player_blob(bytes: &[u8]) -> Decoded<PlayerItems> {
    let mut items = PlayerItems::new();
    let mut anomalies = Vec::new();
    let mut input = PropReader::new(bytes);
    if let Err(failure) = read_blob(&mut input, &mut items, &mut anomalies) {
        anomalies.push(failure);
    }
    Decoded {
        value: items,
        anomalies,
    }
}

fn blob_failure(input: &PropReader<'_>, scope: &str, reason: StreamError) -> DecodeAnomaly {
    DecodeAnomaly::MalformedStream {
        scope: scope.to_string(),
        path: Vec::new(),
        offset: input.offset(),
        reason,
    }
}

/// Read one tree for a container; a failed tree is kept partially and ends the blob.
fn read_into(
    input: &mut PropReader<'_>,
    scope: &str,
    sink: impl FnOnce(ItemTree),
) -> Result<(), DecodeAnomaly> {
    let (tree, anomaly) = read_tree(input, scope);
    if let Some(tree) = tree {
        sink(tree);
    }
    match anomaly {
        Some(anomaly) => Err(anomaly),
        None => Ok(()),
    }
}

fn read_blob(
    input: &mut PropReader<'_>,
    items: &mut PlayerItems,
    anomalies: &mut Vec<DecodeAnomaly>,
) -> Result<(), DecodeAnomaly> {
    match input.read_bytes(BLOB_MAGIC.len()) {
        Ok(magic) if magic == BLOB_MAGIC => {}
        _ => {
            return Err(blob_failure(
                input,
                "header",
                StreamError::Invalid("bad blob magic".into()),
            ))
        }
    }
    let version = input
        .read_u8()
        .map_err(|e| blob_failure(input, "header", e))?;
    if version != BLOB_VERSION {
        return Err(blob_failure(
            input,
            "header",
            StreamError::Invalid(format!("unsupported blob version {version}")),
        ));
    }

    let equipped = input
        .read_u8()
        .map_err(|e| blob_failure(input, "inventory", e))?;
    for _ in 0..equipped {
        let slot_id = input
            .read_u8()
            .map_err(|e| blob_failure(input, "inventory", e))?;
        let scope = format!("inventory slot {slot_id}");
        match Slot::from_id(slot_id) {
            Some(slot) => read_into(input, &scope, |tree| {
                items.set_slot(slot, Some(tree));
            })?,
            None => {
                // The tree is still well formed; skip it and keep going.
                read_into(input, &scope, |_| {})?;
                anomalies.push(blob_failure(
                    input,
                    &scope,
                    StreamError::Invalid(format!("unknown slot {slot_id}")),
                ));
            }
        }
    }

    items.last_depot_id = input
        .read_i16()
        .map_err(|e| blob_failure(input, "last depot", e))?;

    let depots = input
        .read_u32()
        .map_err(|e| blob_failure(input, "depot", e))?;
    for _ in 0..depots {
        let depot_id = input
            .read_u32()
            .map_err(|e| blob_failure(input, "depot", e))?;
        let scope = format!("depot {depot_id}");
        let count = input
            .read_u32()
            .map_err(|e| blob_failure(input, &scope, e))?;
        for _ in 0..count {
            read_into(input, &scope, |tree| items.depot_chest_mut(depot_id).push(tree))?;
        }
    }

    let inbox = input
        .read_u32()
        .map_err(|e| blob_failure(input, "inbox", e))?;
    for _ in 0..inbox {
        read_into(input, "inbox", |tree| items.inbox.push(tree))?;
    }

    if !input.is_exhausted() {
        return Err(blob_failure(
            input,
            "trailer",
            StreamError::Invalid(format!("{} trailing bytes", input.remaining())),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> ItemTree {
        let inner = ItemTree::with_children(
            Item::container(2853),
            vec![ItemTree::new(Item::new(3031, 0).with_attribute("unique", true))],
        );
        ItemTree::with_children(
            Item::container(2854).with_attribute("description", "worn"),
            vec![ItemTree::new(Item::new(3003, 1)), inner],
        )
    }

    #[test]
    fn single_tree_round_trip() {
        let tree = nested();
        let decoded = decode_binary(&encode_binary(&tree));
        assert!(decoded.is_clean(), "{:?}", decoded.anomalies);
        assert_eq!(decoded.value, Some(tree));
    }

    #[test]
    fn truncated_stream_keeps_prefix() {
        let tree = nested();
        let bytes = encode_binary(&tree);
        let decoded = decode_binary(&bytes[..bytes.len() - 4]);
        assert_eq!(decoded.anomalies.len(), 1);
        let partial = decoded.value.expect("root decoded");
        assert_eq!(partial.root_item().type_id, 2854);
        assert!(partial.len() >= 2);
    }

    #[test]
    fn unknown_kind_is_scoped_to_node() {
        let tree = ItemTree::with_children(
            Item::container(1987),
            vec![
                ItemTree::new(Item::new(10, 1)),
                ItemTree::new(Item::new(11, 1)),
            ],
        );
        let mut bytes = encode_binary(&tree);
        // Root header is 10 bytes + child count 4; first child spans 11 bytes.
        let second_child_kind = 10 + 4 + 11 + 5;
        assert_eq!(bytes[second_child_kind - 5], NODE_START);
        bytes[second_child_kind] = 7;

        let decoded = decode_binary(&bytes);
        match decoded.anomalies.as_slice() {
            [DecodeAnomaly::MalformedStream { path, reason, .. }] => {
                assert_eq!(path, &vec![1]);
                assert_eq!(reason, &StreamError::UnknownKind(7));
            }
            other => panic!("unexpected anomalies {other:?}"),
        }
        let partial = decoded.value.expect("root kept");
        assert_eq!(partial.children(partial.root()).len(), 1);
    }

    #[test]
    fn player_blob_round_trip() {
        let mut items = PlayerItems::new();
        items.set_slot(Slot::Backpack, Some(nested()));
        items.set_slot(Slot::Head, Some(ItemTree::new(Item::new(3351, 1))));
        items.depot_chest_mut(2).push(ItemTree::new(Item::new(3035, 50)));
        items.depot_chest_mut(5);
        items.inbox.push(nested());
        items.last_depot_id = 2;

        let decoded = decode_player_blob(&encode_player_blob(&items));
        assert!(decoded.is_clean(), "{:?}", decoded.anomalies);
        assert_eq!(decoded.value, items);
    }

    fn chain(depth: usize) -> ItemTree {
        let mut tree = ItemTree::new(Item::container(1987));
        let mut tip = tree.root();
        for level in 1..depth {
            let item = if level + 1 == depth {
                Item::new(3031, 1).with_attribute("level", level as i64)
            } else {
                Item::container(1987)
            };
            tip = tree.push_child(tip, item).expect("container tip");
        }
        tree
    }

    #[test]
    fn deep_nesting_round_trip() {
        for depth in [300, 20_000] {
            let tree = chain(depth);
            assert_eq!(tree.depth(), depth);
            let decoded = decode_binary(&encode_binary(&tree));
            assert!(decoded.is_clean(), "{:?}", decoded.anomalies);
            assert_eq!(decoded.value, Some(tree));
        }
    }

    #[test]
    fn deep_truncation_reports_full_path() {
        let bytes = encode_binary(&chain(50));
        let decoded = decode_binary(&bytes[..bytes.len() - 1]);
        match decoded.anomalies.as_slice() {
            [DecodeAnomaly::MalformedStream { path, .. }] => assert!(path.is_empty()),
            other => panic!("unexpected anomalies {other:?}"),
        }
        let cut = decode_binary(&bytes[..bytes.len() - 60]);
        let [DecodeAnomaly::MalformedStream { path, .. }] = cut.anomalies.as_slice() else {
            panic!("unexpected anomalies {:?}", cut.anomalies);
        };
        assert!(!path.is_empty() && path.iter().all(|&i| i == 0));
        assert!(cut.value.expect("root kept").len() >= 2);
    }

    #[test]
    fn long_text_attribute_round_trip() {
        let text = "x".repeat(70_000);
        let tree = ItemTree::new(Item::new(2819, 1).with_attribute("text", text.as_str()));
        let decoded = decode_binary(&encode_binary(&tree));
        assert!(decoded.is_clean(), "{:?}", decoded.anomalies);
        let root = decoded.value.expect("tree").root_item().clone();
        assert_eq!(
            root.attributes.get("text"),
            Some(&crate::items::AttributeValue::from(text.as_str()))
        );
    }

    #[test]
    fn player_blob_rejects_foreign_data() {
        let decoded = decode_player_blob(b"not a blob");
        assert_eq!(decoded.anomalies.len(), 1);
        assert!(decoded.value.is_empty());
    }
}
