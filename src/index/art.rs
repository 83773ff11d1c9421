//! In-memory adaptive radix tree index.
//!
//! Nodes live in an arena and refer to each other by slot number. Inner
//! nodes carry a compressed path prefix and switch between 4, 16, 48 and
//! 256-way child tables as they fill up and drain. A key that ends exactly
//! at an inner node is stored in that node's terminal slot, which keeps keys
//! that are prefixes of other keys addressable.

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::LogRecordPos;
use crate::error::Result;
use parking_lot::RwLock;

type NodeId = usize;

/// Index backed by an adaptive radix tree behind a reader-writer lock.
#[derive(Default)]
pub struct AdaptiveRadixTree {
    tree: RwLock<ArtTree>,
}

impl AdaptiveRadixTree {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for AdaptiveRadixTree {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(&key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().remove(key))
    }

    fn size(&self) -> usize {
        self.tree.read().len
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut items = self.tree.read().entries();
        if reverse {
            items.reverse();
        }
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

enum Node {
    Leaf { key: Vec<u8>, pos: LogRecordPos },
    Inner(Inner),
}

struct Inner {
    prefix: Vec<u8>,
    terminal: Option<NodeId>,
    children: Children,
}

impl Inner {
    fn new(prefix: Vec<u8>) -> Self {
        Self { prefix, terminal: None, children: Children::Node4 { keys: Vec::new(), ids: Vec::new() } }
    }

    /// Hang `leaf` (whose full key is `key`) below this node, which ends at `depth`.
    fn attach(&mut self, key: &[u8], depth: usize, leaf: NodeId) {
        if key.len() == depth {
            self.terminal = Some(leaf);
        } else {
            self.children.add(key[depth], leaf);
        }
    }
}

enum Children {
    Node4 { keys: Vec<u8>, ids: Vec<NodeId> },
    Node16 { keys: Vec<u8>, ids: Vec<NodeId> },
    Node48 { index: Box<[u8; 256]>, slots: Vec<Option<NodeId>> },
    Node256 { ids: Box<[Option<NodeId>; 256]> },
}

impl Children {
    /// Smallest table that holds `entries`, which must be sorted by byte.
    fn from_entries(entries: Vec<(u8, NodeId)>) -> Self {
        match entries.len() {
            0..=4 => {
                let (keys, ids) = entries.into_iter().unzip();
                Children::Node4 { keys, ids }
            }
            5..=16 => {
                let (keys, ids) = entries.into_iter().unzip();
                Children::Node16 { keys, ids }
            }
            17..=48 => {
                let mut index = Box::new([0u8; 256]);
                let mut slots = Vec::with_capacity(48);
                for (i, (byte, id)) in entries.into_iter().enumerate() {
                    index[byte as usize] = (i + 1) as u8;
                    slots.push(Some(id));
                }
                Children::Node48 { index, slots }
            }
            _ => {
                let mut ids = Box::new([None; 256]);
                for (byte, id) in entries {
                    ids[byte as usize] = Some(id);
                }
                Children::Node256 { ids }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Children::Node4 { keys, .. } | Children::Node16 { keys, .. } => keys.len(),
            Children::Node48 { slots, .. } => slots.iter().filter(|s| s.is_some()).count(),
            Children::Node256 { ids } => ids.iter().filter(|s| s.is_some()).count(),
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Children::Node4 { keys, .. } => keys.len() >= 4,
            Children::Node16 { keys, .. } => keys.len() >= 16,
            Children::Node48 { .. } => self.len() >= 48,
            Children::Node256 { .. } => false,
        }
    }

    fn find(&self, byte: u8) -> Option<NodeId> {
        match self {
            Children::Node4 { keys, ids } | Children::Node16 { keys, ids } => {
                keys.binary_search(&byte).ok().map(|i| ids[i])
            }
            Children::Node48 { index, slots } => match index[byte as usize] {
                0 => None,
                slot => slots[slot as usize - 1],
            },
            Children::Node256 { ids } => ids[byte as usize],
        }
    }

    fn replace(&mut self, byte: u8, id: NodeId) {
        match self {
            Children::Node4 { keys, ids } | Children::Node16 { keys, ids } => {
                if let Ok(i) = keys.binary_search(&byte) {
                    ids[i] = id;
                }
            }
            Children::Node48 { index, slots } => {
                let slot = index[byte as usize];
                if slot != 0 {
                    slots[slot as usize - 1] = Some(id);
                }
            }
            Children::Node256 { ids } => ids[byte as usize] = Some(id),
        }
    }

    /// Add a child for a byte that has none yet, growing the table when full.
    fn add(&mut self, byte: u8, id: NodeId) {
        if self.is_full() {
            let mut entries = self.entries();
            let at = entries.partition_point(|(b, _)| *b < byte);
            entries.insert(at, (byte, id));
            *self = Self::from_entries(entries);
            return;
        }
        match self {
            Children::Node4 { keys, ids } | Children::Node16 { keys, ids } => {
                let at = keys.partition_point(|b| *b < byte);
                keys.insert(at, byte);
                ids.insert(at, id);
            }
            Children::Node48 { index, slots } => {
                let slot = match slots.iter().position(Option::is_none) {
                    Some(free) => {
                        slots[free] = Some(id);
                        free
                    }
                    None => {
                        slots.push(Some(id));
                        slots.len() - 1
                    }
                };
                index[byte as usize] = (slot + 1) as u8;
            }
            Children::Node256 { ids } => ids[byte as usize] = Some(id),
        }
    }

    /// Drop the child for `byte`, shrinking the table once it is sparse.
    fn remove(&mut self, byte: u8) {
        match self {
            Children::Node4 { keys, ids } | Children::Node16 { keys, ids } => {
                if let Ok(i) = keys.binary_search(&byte) {
                    keys.remove(i);
                    ids.remove(i);
                }
            }
            Children::Node48 { index, slots } => {
                let slot = index[byte as usize];
                if slot != 0 {
                    slots[slot as usize - 1] = None;
                    index[byte as usize] = 0;
                }
            }
            Children::Node256 { ids } => ids[byte as usize] = None,
        }

        let len = self.len();
        let shrink = match self {
            Children::Node4 { .. } => false,
            Children::Node16 { .. } => len <= 3,
            Children::Node48 { .. } => len <= 12,
            Children::Node256 { .. } => len <= 36,
        };
        if shrink {
            *self = Self::from_entries(self.entries());
        }
    }

    /// Children in ascending byte order.
    fn entries(&self) -> Vec<(u8, NodeId)> {
        match self {
            Children::Node4 { keys, ids } | Children::Node16 { keys, ids } => {
                keys.iter().copied().zip(ids.iter().copied()).collect()
            }
            Children::Node48 { index, slots } => (0..256usize)
                .filter_map(|b| match index[b] {
                    0 => None,
                    slot => slots[slot as usize - 1].map(|id| (b as u8, id)),
                })
                .collect(),
            Children::Node256 { ids } => ids
                .iter()
                .enumerate()
                .filter_map(|(b, id)| id.map(|id| (b as u8, id)))
                .collect(),
        }
    }

    #[cfg(test)]
    fn kind(&self) -> &'static str {
        match self {
            Children::Node4 { .. } => "Node4",
            Children::Node16 { .. } => "Node16",
            Children::Node48 { .. } => "Node48",
            Children::Node256 { .. } => "Node256",
        }
    }
}

#[derive(Default)]
struct ArtTree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
}

impl ArtTree {
    fn insert(&mut self, key: &[u8], pos: LogRecordPos) -> Option<LogRecordPos> {
        let (root, old) = self.insert_at(self.root, key, 0, pos);
        self.root = Some(root);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        let mut current = self.root?;
        let mut depth = 0;
        loop {
            match self.node(current) {
                Node::Leaf { key: leaf_key, pos } => {
                    return (leaf_key.as_slice() == key).then_some(*pos);
                }
                Node::Inner(inner) => {
                    if !key[depth..].starts_with(&inner.prefix) {
                        return None;
                    }
                    depth += inner.prefix.len();
                    if depth == key.len() {
                        return inner.terminal.map(|t| self.leaf_pos(t));
                    }
                    current = inner.children.find(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<LogRecordPos> {
        let root = self.root?;
        let (replacement, removed) = self.remove_at(root, key, 0);
        self.root = replacement;
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn entries(&self) -> Vec<(Vec<u8>, LogRecordPos)> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = self.root {
            self.collect(root, &mut out);
        }
        out
    }

    fn collect(&self, id: NodeId, out: &mut Vec<(Vec<u8>, LogRecordPos)>) {
        match self.node(id) {
            Node::Leaf { key, pos } => out.push((key.clone(), *pos)),
            Node::Inner(inner) => {
                if let Some(terminal) = inner.terminal {
                    self.collect(terminal, out);
                }
                for (_, child) in inner.children.entries() {
                    self.collect(child, out);
                }
            }
        }
    }

    /// Insert below `id`, whose subtree covers `key[..depth]`. Returns the
    /// node that now takes `id`'s place and the replaced position.
    fn insert_at(
        &mut self,
        id: Option<NodeId>,
        key: &[u8],
        depth: usize,
        pos: LogRecordPos,
    ) -> (NodeId, Option<LogRecordPos>) {
        let Some(id) = id else {
            return (self.alloc(Node::Leaf { key: key.to_vec(), pos }), None);
        };

        let leaf_key = match self.node(id) {
            Node::Leaf { key: leaf_key, .. } => Some(leaf_key.clone()),
            Node::Inner(_) => None,
        };
        if let Some(leaf_key) = leaf_key {
            if leaf_key == key {
                return (id, Some(self.replace_leaf_pos(id, pos)));
            }
            let split = depth + common_prefix_len(&leaf_key[depth..], &key[depth..]);
            let new_leaf = self.alloc(Node::Leaf { key: key.to_vec(), pos });
            let mut inner = Inner::new(key[depth..split].to_vec());
            inner.attach(&leaf_key, split, id);
            inner.attach(key, split, new_leaf);
            return (self.alloc(Node::Inner(inner)), None);
        }

        let (matched, prefix_len) = {
            let inner = self.inner(id);
            (common_prefix_len(&inner.prefix, &key[depth..]), inner.prefix.len())
        };
        if matched < prefix_len {
            // Split the compressed path where the new key diverges.
            let (head, edge) = {
                let inner = self.inner_mut(id);
                let old = std::mem::take(&mut inner.prefix);
                inner.prefix = old[matched + 1..].to_vec();
                (old[..matched].to_vec(), old[matched])
            };
            let mut parent = Inner::new(head);
            parent.children.add(edge, id);
            let new_leaf = self.alloc(Node::Leaf { key: key.to_vec(), pos });
            parent.attach(key, depth + matched, new_leaf);
            return (self.alloc(Node::Inner(parent)), None);
        }

        let depth = depth + prefix_len;
        if key.len() == depth {
            return match self.inner(id).terminal {
                Some(terminal) => (id, Some(self.replace_leaf_pos(terminal, pos))),
                None => {
                    let leaf = self.alloc(Node::Leaf { key: key.to_vec(), pos });
                    self.inner_mut(id).terminal = Some(leaf);
                    (id, None)
                }
            };
        }

        let byte = key[depth];
        match self.inner(id).children.find(byte) {
            Some(child) => {
                let (new_child, old) = self.insert_at(Some(child), key, depth + 1, pos);
                if new_child != child {
                    self.inner_mut(id).children.replace(byte, new_child);
                }
                (id, old)
            }
            None => {
                let leaf = self.alloc(Node::Leaf { key: key.to_vec(), pos });
                self.inner_mut(id).children.add(byte, leaf);
                (id, None)
            }
        }
    }

    /// Remove `key` below `id`. Returns the node that now takes `id`'s place
    /// (`None` when the subtree became empty) and the removed position.
    fn remove_at(
        &mut self,
        id: NodeId,
        key: &[u8],
        depth: usize,
    ) -> (Option<NodeId>, Option<LogRecordPos>) {
        let leaf_match = match self.node(id) {
            Node::Leaf { key: leaf_key, .. } => Some(leaf_key.as_slice() == key),
            Node::Inner(_) => None,
        };
        match leaf_match {
            Some(true) => return (None, Some(self.release_leaf(id))),
            Some(false) => return (Some(id), None),
            None => {}
        }

        let (prefix_ok, prefix_len) = {
            let inner = self.inner(id);
            (key[depth..].starts_with(&inner.prefix), inner.prefix.len())
        };
        if !prefix_ok {
            return (Some(id), None);
        }
        let depth = depth + prefix_len;

        let removed = if key.len() == depth {
            match self.inner_mut(id).terminal.take() {
                Some(terminal) => self.release_leaf(terminal),
                None => return (Some(id), None),
            }
        } else {
            let byte = key[depth];
            let Some(child) = self.inner(id).children.find(byte) else {
                return (Some(id), None);
            };
            let (replacement, removed) = self.remove_at(child, key, depth + 1);
            let Some(removed) = removed else {
                return (Some(id), None);
            };
            match replacement {
                None => self.inner_mut(id).children.remove(byte),
                Some(r) if r != child => self.inner_mut(id).children.replace(byte, r),
                Some(_) => {}
            }
            removed
        };

        (self.collapse(id), Some(removed))
    }

    /// Replace an inner node that lost its reason to exist.
    fn collapse(&mut self, id: NodeId) -> Option<NodeId> {
        let (count, terminal) = {
            let inner = self.inner(id);
            (inner.children.len(), inner.terminal)
        };
        match (count, terminal) {
            (0, None) => {
                self.release(id);
                None
            }
            (0, Some(terminal)) => {
                self.release(id);
                Some(terminal)
            }
            (1, None) => {
                let (byte, child) = self.inner(id).children.entries()[0];
                let prefix = match self.release(id) {
                    Node::Inner(inner) => inner.prefix,
                    Node::Leaf { .. } => unreachable!("collapse on a leaf"),
                };
                if let Node::Inner(child_inner) = self.node_mut(child) {
                    let mut merged = prefix;
                    merged.push(byte);
                    merged.extend_from_slice(&child_inner.prefix);
                    child_inner.prefix = merged;
                }
                Some(child)
            }
            _ => Some(id),
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Node {
        let node = self.nodes[id].take().expect("released node must be live");
        self.free.push(id);
        node
    }

    fn release_leaf(&mut self, id: NodeId) -> LogRecordPos {
        match self.release(id) {
            Node::Leaf { pos, .. } => pos,
            Node::Inner(_) => unreachable!("terminal slot holds an inner node"),
        }
    }

    fn replace_leaf_pos(&mut self, id: NodeId, pos: LogRecordPos) -> LogRecordPos {
        match self.node_mut(id) {
            Node::Leaf { pos: old, .. } => std::mem::replace(old, pos),
            Node::Inner(_) => unreachable!("expected a leaf"),
        }
    }

    fn leaf_pos(&self, id: NodeId) -> LogRecordPos {
        match self.node(id) {
            Node::Leaf { pos, .. } => *pos,
            Node::Inner(_) => unreachable!("expected a leaf"),
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id].as_ref().expect("node id must be live")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id].as_mut().expect("node id must be live")
    }

    fn inner(&self, id: NodeId) -> &Inner {
        match self.node(id) {
            Node::Inner(inner) => inner,
            Node::Leaf { .. } => unreachable!("expected an inner node"),
        }
    }

    fn inner_mut(&mut self, id: NodeId) -> &mut Inner {
        match self.node_mut(id) {
            Node::Inner(inner) => inner,
            Node::Leaf { .. } => unreachable!("expected an inner node"),
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
