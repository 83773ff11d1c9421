//! Disk-resident B+ tree index.
//!
//! Wraps a `sled` tree stored in a sub-directory of the data directory. The
//! tree is concurrency-safe on its own and keeps its contents across restarts,
//! so the engine does not rebuild it from the data files on open.

use super::{IndexIterator, Indexer};
use crate::data::LogRecordPos;
use crate::error::Result;
use std::ops::Bound;
use std::path::Path;

/// Name of the directory holding the persisted index.
pub const BPTREE_INDEX_DIR_NAME: &str = "bptree-index";

/// Index persisted in a B+ tree on disk.
pub struct BPlusTree {
    tree: sled::Db,
    sync_writes: bool,
}

impl BPlusTree {
    /// Open (or create) the index stored under `dir`.
    ///
    /// With `sync_writes` every mutation is flushed before returning;
    /// otherwise the tree flushes in the background on its own schedule.
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        let tree = sled::Config::new().path(dir.join(BPTREE_INDEX_DIR_NAME)).open()?;
        Ok(Self { tree, sync_writes })
    }

    fn maybe_flush(&self) -> Result<()> {
        if self.sync_writes {
            self.tree.flush()?;
        }
        Ok(())
    }
}

fn decode_value(value: Option<sled::IVec>) -> Result<Option<LogRecordPos>> {
    value.map(|v| LogRecordPos::decode(&v)).transpose()
}

impl Indexer for BPlusTree {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let old = self.tree.insert(key, pos.encode())?;
        self.maybe_flush()?;
        decode_value(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        decode_value(self.tree.get(key)?)
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let old = self.tree.remove(key)?;
        if old.is_some() {
            self.maybe_flush()?;
        }
        decode_value(old)
    }

    fn size(&self) -> usize {
        self.tree.len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let mut iter = BPlusTreeIterator { tree: Some((*self.tree).clone()), reverse, current: None };
        iter.rewind();
        Box::new(iter)
    }

    fn close(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Cursor over the persisted tree. Each step re-seeks from the current key,
/// so concurrent writers are never blocked by an open iterator.
struct BPlusTreeIterator {
    tree: Option<sled::Tree>,
    reverse: bool,
    current: Option<(Vec<u8>, LogRecordPos)>,
}

impl BPlusTreeIterator {
    fn load(&mut self, item: Option<sled::Result<(sled::IVec, sled::IVec)>>) {
        self.current = match item {
            Some(Ok((key, value))) => match LogRecordPos::decode(&value) {
                Ok(pos) => Some((key.to_vec(), pos)),
                Err(e) => {
                    log::error!("Undecodable position in bptree index: {}", e);
                    None
                }
            },
            Some(Err(e)) => {
                log::error!("Bptree index iteration failed: {}", e);
                None
            }
            None => None,
        };
    }
}

impl IndexIterator for BPlusTreeIterator {
    fn rewind(&mut self) {
        let Some(tree) = &self.tree else { return };
        let item = if self.reverse { tree.iter().next_back() } else { tree.iter().next() };
        self.load(item);
    }

    fn seek(&mut self, key: &[u8]) {
        let Some(tree) = &self.tree else { return };
        let item = if self.reverse {
            tree.range(..=key).next_back()
        } else {
            tree.range(key..).next()
        };
        self.load(item);
    }

    fn next(&mut self) {
        let (Some(tree), Some((current, _))) = (&self.tree, &self.current) else {
            return;
        };
        let item = if self.reverse {
            tree.range(..current.as_slice()).next_back()
        } else {
            tree.range::<&[u8], _>((Bound::Excluded(current.as_slice()), Bound::Unbounded)).next()
        };
        self.load(item);
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("Iterator not valid").0
    }

    fn value(&self) -> LogRecordPos {
        self.current.as_ref().expect("Iterator not valid").1
    }

    fn close(&mut self) {
        self.current = None;
        self.tree = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pos(offset: u64) -> LogRecordPos {
        LogRecordPos { file_id: 3, offset, size: 21 }
    }

    #[test]
    fn test_bptree_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let index = BPlusTree::open(dir.path(), false).unwrap();

        assert_eq!(index.put(b"a".to_vec(), pos(1)).unwrap(), None);
        assert_eq!(index.put(b"a".to_vec(), pos(2)).unwrap(), Some(pos(1)));
        assert_eq!(index.get(b"a").unwrap(), Some(pos(2)));
        assert_eq!(index.size(), 1);

        assert_eq!(index.delete(b"a").unwrap(), Some(pos(2)));
        assert_eq!(index.delete(b"a").unwrap(), None);
        assert_eq!(index.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_bptree_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let index = BPlusTree::open(dir.path(), true).unwrap();
            index.put(b"durable".to_vec(), pos(9)).unwrap();
            index.close().unwrap();
        }
        let index = BPlusTree::open(dir.path(), true).unwrap();
        assert_eq!(index.get(b"durable").unwrap(), Some(pos(9)));
    }

    #[test]
    fn test_bptree_iterator() {
        let dir = TempDir::new().unwrap();
        let index = BPlusTree::open(dir.path(), false).unwrap();
        for (i, key) in [b"c", b"a", b"e"].iter().enumerate() {
            index.put(key.to_vec(), pos(i as u64)).unwrap();
        }

        let mut iter = index.iterator(false);
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec()]);

        iter.seek(b"b");
        assert_eq!(iter.key(), b"c");

        let mut iter = index.iterator(true);
        assert_eq!(iter.key(), b"e");
        iter.seek(b"d");
        assert_eq!(iter.key(), b"c");
        iter.next();
        assert_eq!(iter.key(), b"a");
        iter.next();
        assert!(!iter.valid());

        iter.close();
        iter.rewind();
        assert!(!iter.valid());
    }
}
