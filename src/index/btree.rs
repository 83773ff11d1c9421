//! In-memory ordered tree index.

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::LogRecordPos;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Index backed by a `BTreeMap` behind a reader-writer lock.
#[derive(Default)]
pub struct BTree {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTree {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTree {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().remove(key))
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tree = self.tree.read();
        let items: Vec<_> = if reverse {
            tree.iter().rev().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            tree.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
