//! WriteBatch provides atomic batch write operations.
//!
//! A WriteBatch buffers puts and deletes in memory and commits them together.
//! All records of a commit share one sequence number and are followed by a
//! finish marker; recovery applies a batch only when its marker is on disk,
//! so a crash mid-commit leaves none of its writes visible.
//!
//! # Example
//!
//! ```rust,no_run
//! use caskdb::{Options, WriteBatchOptions, DB};
//!
//! # fn main() -> Result<(), caskdb::Error> {
//! let db = DB::open(Options::default().dir_path("./data"))?;
//! let batch = db.new_write_batch(WriteBatchOptions::default())?;
//!
//! // Add multiple operations to the batch
//! batch.put(b"key1", b"value1")?;
//! batch.put(b"key2", b"value2")?;
//! batch.delete(b"key3")?;
//!
//! // Apply all operations atomically
//! batch.commit()?;
//! # Ok(())
//! # }
//! ```

use crate::config::{IndexType, WriteBatchOptions};
use crate::data::log_record::key_with_seq;
use crate::data::{LogRecord, LogRecordType};
use crate::error::{Error, Result};
use crate::{update_index, DB};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Key of the marker record sealing a committed batch.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// WriteBatch accumulates write operations to be applied atomically.
///
/// Only the latest operation per key is kept. Nothing is visible to readers
/// until [`WriteBatch::commit`] returns.
pub struct WriteBatch<'a> {
    options: WriteBatchOptions,
    db: &'a DB,
    /// Pending records keyed by user key
    pending_writes: Mutex<BTreeMap<Vec<u8>, LogRecord>>,
}

impl DB {
    /// Creates an empty write batch bound to this database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the disk-resident index is used on
    /// an existing directory whose sequence number could not be recovered;
    /// batch sequence numbers would otherwise be reused.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        self.ensure_open()?;
        if self.options.index_type == IndexType::BPlusTree && !self.seq_no_file_exists && !self.is_initial {
            return Err(Error::invalid_state("cannot use write batch, seq no file not exists"));
        }
        Ok(WriteBatch { options, db: self, pending_writes: Mutex::new(BTreeMap::new()) })
    }
}

impl WriteBatch<'_> {
    /// Buffers a put, replacing any pending operation on the same key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord::normal(key.to_vec(), value.to_vec());
        self.pending_writes.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Buffers a delete.
    ///
    /// If the key is not stored in the database, only a pending put on it is
    /// dropped and nothing will be written.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let mut pending_writes = self.pending_writes.lock();
        if self.db.index.get(key)?.is_none() {
            pending_writes.remove(key);
            return Ok(());
        }

        pending_writes.insert(key.to_vec(), LogRecord::deleted(key.to_vec()));
        Ok(())
    }

    /// Returns the number of pending operations.
    pub fn len(&self) -> usize {
        self.pending_writes.lock().len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.pending_writes.lock().is_empty()
    }

    /// Drops every pending operation.
    pub fn clear(&self) {
        self.pending_writes.lock().clear();
    }

    /// Writes all pending operations atomically and empties the batch.
    ///
    /// On failure the pending operations are kept and none of them is
    /// visible, now or after a restart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExceedMaxBatchNum`] if more operations are pending
    /// than `max_batch_num`, or an error if appending fails.
    pub fn commit(&self) -> Result<()> {
        let mut pending_writes = self.pending_writes.lock();
        if pending_writes.is_empty() {
            return Ok(());
        }
        if pending_writes.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        let db = self.db;
        let mut inner = db.inner.write();
        db.ensure_open()?;

        // Step 1: Take a fresh sequence number; a failed commit never reuses it
        inner.seq_no += 1;
        let seq_no = inner.seq_no;

        // Step 2: Append every record, then the finish marker
        let mut positions = Vec::with_capacity(pending_writes.len());
        for record in pending_writes.values() {
            let stored = LogRecord::new(key_with_seq(&record.key, seq_no), record.value.clone(), record.rec_type);
            positions.push(inner.append_log_record(&db.options, &stored)?);
        }
        let fin_record = LogRecord::new(key_with_seq(TXN_FIN_KEY, seq_no), Vec::new(), LogRecordType::TxFinished);
        let fin_pos = inner.append_log_record(&db.options, &fin_record)?;

        if self.options.sync_writes {
            inner.sync_active()?;
        }

        // Step 3: Publish to the index
        for (record, pos) in pending_writes.values().zip(positions) {
            inner.reclaim_size += update_index(db.index.as_ref(), record.key.clone(), record.rec_type, pos)?;
        }
        inner.reclaim_size += u64::from(fin_pos.size);

        log::debug!("Committed write batch {} with {} records", seq_no, pending_writes.len());
        pending_writes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> DB {
        DB::open(Options::default().dir_path(dir.path())).unwrap()
    }

    #[test]
    fn test_write_batch_put() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();

        batch.put(b"key1", b"value1").unwrap();
        batch.put(b"key2", b"value2").unwrap();
        batch.put(b"key1", b"value3").unwrap();
        assert_eq!(batch.len(), 2);

        // Not visible before commit
        assert_eq!(db.get(b"key1").unwrap(), None);

        batch.commit().unwrap();
        assert!(batch.is_empty());
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value3".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value2".to_vec()));
    }

    #[test]
    fn test_write_batch_empty_key() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();

        assert!(matches!(batch.put(b"", b"v"), Err(Error::KeyIsEmpty)));
        assert!(matches!(batch.delete(b""), Err(Error::KeyIsEmpty)));
    }

    #[test]
    fn test_write_batch_delete_absent_key_cancels_put() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();

        batch.put(b"fresh", b"value").unwrap();
        batch.delete(b"fresh").unwrap();
        assert!(batch.is_empty());

        batch.commit().unwrap();
        assert_eq!(db.stat().unwrap().data_file_num, 0);
    }

    #[test]
    fn test_write_batch_delete_existing_key() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        db.put(b"key", b"value").unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.delete(b"key").unwrap();
        batch.put(b"other", b"value").unwrap();
        batch.commit().unwrap();

        assert_eq!(db.get(b"key").unwrap(), None);
        assert_eq!(db.get(b"other").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_write_batch_exceeds_max_batch_num() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let options = WriteBatchOptions { max_batch_num: 2, sync_writes: false };
        let batch = db.new_write_batch(options).unwrap();

        for key in [b"a", b"b", b"c"] {
            batch.put(key, b"v").unwrap();
        }
        assert!(matches!(batch.commit(), Err(Error::ExceedMaxBatchNum)));

        // The buffer is left untouched
        assert_eq!(batch.len(), 3);
        batch.clear();
        assert!(batch.commit().is_ok());
    }

    #[test]
    fn test_write_batch_advances_seq_no() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        for i in 0..3u8 {
            let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
            batch.put(&[b'k', i], b"v").unwrap();
            batch.commit().unwrap();
        }
        assert_eq!(db.inner.read().seq_no, 3);
    }
}
