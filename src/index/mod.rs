//! Key to record position index.
//!
//! The engine only talks to [`Indexer`]; the concrete backing is picked once
//! from [`IndexType`] when the database is opened:
//!
//! - **BTree**: in-memory ordered tree
//! - **Art**: in-memory adaptive radix tree
//! - **BPlusTree**: disk-resident B+ tree that survives restarts on its own

mod art;
mod bptree;
mod btree;

pub use art::AdaptiveRadixTree;
pub use bptree::{BPlusTree, BPTREE_INDEX_DIR_NAME};
pub use btree::BTree;

use crate::config::IndexType;
use crate::data::LogRecordPos;
use crate::error::Result;
use std::path::Path;

/// Ordered mapping from user key to the position of its latest record.
///
/// Every backing synchronizes internally, so the trait takes `&self`.
pub trait Indexer: Send + Sync {
    /// Insert or replace `key`, returning the previous position if any.
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;

    /// Look up `key`.
    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Remove `key`, returning its position if it existed.
    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Number of live keys.
    fn size(&self) -> usize;

    /// Ordered iterator over the index, descending when `reverse` is set.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;

    /// Release resources held by the backing.
    fn close(&self) -> Result<()>;
}

/// Cursor over an [`Indexer`].
pub trait IndexIterator: Send {
    /// Move back to the first entry in iteration order.
    fn rewind(&mut self);

    /// Move to the first key `>= key` (`<= key` when reversed).
    fn seek(&mut self, key: &[u8]);

    /// Advance to the next entry.
    fn next(&mut self);

    /// Whether the cursor points at an entry.
    fn valid(&self) -> bool;

    /// Key at the cursor. Must only be called while `valid()`.
    fn key(&self) -> &[u8];

    /// Position at the cursor. Must only be called while `valid()`.
    fn value(&self) -> LogRecordPos;

    /// Release the iterator's resources; the iterator becomes invalid.
    fn close(&mut self);
}

/// Create the index backing selected by `index_type`.
pub fn new_indexer(index_type: IndexType, dir: &Path, sync_writes: bool) -> Result<Box<dyn Indexer>> {
    Ok(match index_type {
        IndexType::BTree => Box::new(BTree::new()),
        IndexType::Art => Box::new(AdaptiveRadixTree::new()),
        IndexType::BPlusTree => Box::new(BPlusTree::open(dir, sync_writes)?),
    })
}

/// Iterator over a sorted copy of the index taken when it was created.
pub(crate) struct SnapshotIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    reverse: bool,
    current: usize,
}

impl SnapshotIterator {
    /// `items` must already be in iteration order.
    pub(crate) fn new(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self { items, reverse, current: 0 }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.current].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.current].1
    }

    fn close(&mut self) {
        self.items.clear();
        self.current = 0;
    }
}
