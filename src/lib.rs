//! # CaskDb - A Log-Structured Hash Table Storage Engine
//!
//! CaskDb is an embedded, persistent key-value store following the Bitcask
//! design. Every write is appended to a log on disk, and an in-memory (or
//! disk-resident) index maps each live key to the position of its latest
//! record, so a read costs a single positional read.
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **Data Files**: append-only segments; the newest one is the active file
//! - **Index**: ordered key to position map behind the [`index::Indexer`] trait
//! - **Write Batch**: atomic multi-key commits sealed by a finish marker
//! - **Merge**: offline compaction of superseded records with a hint file
//! - **Iterator**: ordered, prefix-filtered traversal over live keys
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use caskdb::{Options, DB};
//!
//! # fn main() -> Result<(), caskdb::Error> {
//! // Open or create a database
//! let db = DB::open(Options::default().dir_path("./data"))?;
//!
//! // Write operations
//! db.put(b"key1", b"value1")?;
//! db.put(b"key2", b"value2")?;
//!
//! // Read operations
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Delete operations
//! db.delete(b"key1")?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod data;
pub mod error;
pub mod fio;
pub mod index;
pub mod iterator;
mod merge;
mod util;
pub mod write_batch;

// Re-exports
pub use config::{IndexType, IteratorOptions, Options, WriteBatchOptions};
pub use error::{Error, Result};
pub use iterator::DBIterator;
pub use write_batch::WriteBatch;

use data::log_record::{key_with_seq, parse_key_with_seq, TransactionRecord};
use data::{
    parse_data_file_name, DataFile, LogRecord, LogRecordPos, LogRecordType, SEQ_NO_FILE_NAME,
};
use fio::IoType;
use fs2::FileExt;
use index::Indexer;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Name of the lock file guarding a data directory.
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// Sequence number of records written outside a batch.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// Key of the record persisting the sequence number on close.
const SEQ_NO_KEY: &[u8] = b"seq.no";

const INITIAL_FILE_ID: u32 = 0;

/// Summary of the engine state returned by [`DB::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Number of live keys.
    pub key_num: usize,
    /// Number of data files, active one included.
    pub data_file_num: usize,
    /// Bytes held by superseded or deleted records.
    pub reclaimable_size: u64,
    /// Total size of the data directory.
    pub disk_size: u64,
}

/// Mutable engine state guarded by the database lock.
pub(crate) struct DbInner {
    /// The only writable data file, absent until the first write.
    pub(crate) active_file: Option<DataFile>,
    /// Read-only data files keyed by id.
    pub(crate) older_files: HashMap<u32, Arc<DataFile>>,
    /// Highest batch sequence number handed out.
    pub(crate) seq_no: u64,
    /// Bytes of superseded records.
    pub(crate) reclaim_size: u64,
    /// Bytes appended since the last sync.
    bytes_write: usize,
    pub(crate) is_merging: bool,
}

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
///
/// # Thread Safety
///
/// `DB` is thread-safe and can be shared across threads using `Arc<DB>`.
/// Writes are serialized by an internal reader-writer lock; reads run
/// concurrently with each other.
pub struct DB {
    /// Configuration options
    options: Options,

    /// Data files, counters and the merge flag
    inner: RwLock<DbInner>,

    /// Key to record position index, synchronized on its own
    index: Box<dyn Indexer>,

    /// Held open with an exclusive lock for the lifetime of the handle
    lock_file: File,

    /// Whether the sequence number file was found on open
    seq_no_file_exists: bool,

    /// Whether the data directory was empty on open
    is_initial: bool,

    closed: AtomicBool,
}

impl DB {
    /// Opens the database stored in `options.dir_path`.
    ///
    /// If the directory does not exist, it will be created. Otherwise a
    /// pending merge is absorbed first, then the index is rebuilt from the
    /// hint file and the data files.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - Another handle holds the directory ([`Error::DatabaseInUse`])
    /// - A data file is corrupted or misnamed
    /// - The disk-resident index is used and the sequence number file is missing
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use caskdb::{IndexType, Options, DB};
    ///
    /// # fn main() -> Result<(), caskdb::Error> {
    /// let options = Options::default()
    ///     .dir_path("./my_database")
    ///     .index_type(IndexType::Art);
    /// let db = DB::open(options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        let dir = options.dir_path.clone();

        // Step 1: Create the directory and take the lock
        let is_initial = !dir.exists() || fs::read_dir(&dir)?.next().is_none();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.join(FILE_LOCK_NAME))?;
        if let Err(e) = lock_file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(Error::DatabaseInUse);
            }
            return Err(e.into());
        }

        // Step 2: Absorb the output of a merge that completed before the last shutdown
        merge::load_merge_files(&dir)?;

        // Step 3: Open the data files and the index
        let io_type = if options.mmap_at_startup && options.index_type != IndexType::BPlusTree {
            IoType::MemoryMap
        } else {
            IoType::StandardFile
        };
        let mut files = Self::load_data_files(&dir, io_type)?;
        let persisted_seq_no = match options.index_type {
            IndexType::BPlusTree => Self::load_seq_no(&dir)?,
            _ => None,
        };
        if options.index_type == IndexType::BPlusTree && persisted_seq_no.is_none() && !files.is_empty() {
            return Err(Error::SeqNoFileNotFound);
        }
        let index = index::new_indexer(options.index_type, &dir, options.sync_writes)?;

        // Step 4: Rebuild the index
        let mut seq_no = NON_TXN_SEQ_NO;
        let mut reclaim_size = 0;
        let mut seq_no_file_exists = false;
        if options.index_type == IndexType::BPlusTree {
            if let Some(persisted) = persisted_seq_no {
                seq_no = persisted;
                seq_no_file_exists = true;
            }
            if let Some(cutoff) = merge::non_merge_file_id(&dir)? {
                merge::load_index_from_hint_file(&dir, index.as_ref(), Some(cutoff))?;
            }
            if let Some(active) = files.last_mut() {
                let size = active.size()?;
                active.set_write_off(size);
            }
        } else {
            merge::load_index_from_hint_file(&dir, index.as_ref(), None)?;
            let replay = Self::load_index_from_data_files(&dir, &files, index.as_ref())?;
            seq_no = replay.seq_no;
            reclaim_size = replay.reclaim_size;

            // Step 5: Switch back to standard I/O for the rest of the session
            if io_type == IoType::MemoryMap {
                Self::reset_io_type(&dir, &mut files)?;
            }
            if let Some(active) = files.last_mut() {
                let size = active.size()?;
                if replay.active_end < size {
                    log::warn!(
                        "Truncating torn tail of data file {}: {} -> {} bytes",
                        active.file_id(),
                        size,
                        replay.active_end
                    );
                    active.truncate(&dir, replay.active_end)?;
                } else {
                    active.set_write_off(replay.active_end);
                }
            }
        }

        // The sequence number is only trusted once per clean shutdown
        if seq_no_file_exists {
            fs::remove_file(dir.join(SEQ_NO_FILE_NAME))?;
        }

        let active_file = files.pop();
        let older_files = files.into_iter().map(|f| (f.file_id(), Arc::new(f))).collect::<HashMap<_, _>>();
        log::info!(
            "Opened database at {:?}: {} data files, {} keys, seq_no {}",
            dir,
            older_files.len() + usize::from(active_file.is_some()),
            index.size(),
            seq_no
        );

        Ok(Self {
            options,
            inner: RwLock::new(DbInner {
                active_file,
                older_files,
                seq_no,
                reclaim_size,
                bytes_write: 0,
                is_merging: false,
            }),
            index,
            lock_file,
            seq_no_file_exists,
            is_initial,
            closed: AtomicBool::new(false),
        })
    }

    /// Inserts or overwrites a key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyIsEmpty`] for an empty key, or an error if the
    /// append fails.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord::normal(key_with_seq(key, NON_TXN_SEQ_NO), value.to_vec());
        let mut inner = self.inner.write();
        self.ensure_open()?;
        let pos = inner.append_log_record(&self.options, &record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos)? {
            inner.reclaim_size += u64::from(old.size);
        }
        Ok(())
    }

    /// Gets the value for a key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let inner = self.inner.read();
        self.ensure_open()?;
        match self.index.get(key)? {
            Some(pos) => inner.value_at(&pos),
            None => Ok(None),
        }
    }

    /// Deletes a key. Deleting an absent key is a no-op and writes nothing.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let mut inner = self.inner.write();
        self.ensure_open()?;
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord::deleted(key_with_seq(key, NON_TXN_SEQ_NO));
        let pos = inner.append_log_record(&self.options, &record)?;
        // The tombstone itself is garbage as soon as it is written
        inner.reclaim_size += u64::from(pos.size);

        let old = self.index.delete(key)?.ok_or(Error::IndexUpdateFailed)?;
        inner.reclaim_size += u64::from(old.size);
        Ok(())
    }

    /// Calls `f` for every live key-value pair in ascending key order until it
    /// returns `false`. Writers are blocked for the whole traversal.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let inner = self.inner.write();
        self.ensure_open()?;
        let mut iter = self.index.iterator(false);
        let mut result = Ok(());
        while iter.valid() {
            match inner.value_at(&iter.value()) {
                Ok(Some(value)) => {
                    if !f(iter.key(), &value) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            iter.next();
        }
        iter.close();
        result
    }

    /// Returns every live key in ascending order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let _guard = self.inner.write();
        self.ensure_open()?;
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        iter.close();
        Ok(keys)
    }

    /// Reports key count, data file count, reclaimable bytes and disk usage.
    pub fn stat(&self) -> Result<Stat> {
        let inner = self.inner.read();
        self.ensure_open()?;
        Ok(Stat {
            key_num: self.index.size(),
            data_file_num: inner.older_files.len() + usize::from(inner.active_file.is_some()),
            reclaimable_size: inner.reclaim_size,
            disk_size: util::dir_size(&self.options.dir_path)?,
        })
    }

    /// Copies the data directory to `dir`, lock file excluded. The copy can be
    /// opened as a database of its own.
    pub fn backup<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let _guard = self.inner.read();
        self.ensure_open()?;
        util::copy_dir(&self.options.dir_path, dir.as_ref(), &[FILE_LOCK_NAME])?;
        log::info!("Backed up {:?} to {:?}", self.options.dir_path, dir.as_ref());
        Ok(())
    }

    /// Forces the active data file to stable storage.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.ensure_open()?;
        inner.sync_active()
    }

    /// Closes the database.
    ///
    /// Persists the sequence number, syncs the active file and releases the
    /// directory lock. Closing twice is a no-op. Every other operation on a
    /// closed handle returns [`Error::DatabaseClosed`].
    ///
    /// # Errors
    ///
    /// Returns an error if syncing fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut inner = self.inner.write();

        // Step 1: Release the index
        self.index.close()?;

        // Step 2: Persist the sequence number
        let dir = &self.options.dir_path;
        let seq_no_path = dir.join(SEQ_NO_FILE_NAME);
        if seq_no_path.exists() {
            fs::remove_file(&seq_no_path)?;
        }
        let mut seq_no_file = DataFile::open_seq_no_file(dir)?;
        let record = LogRecord::normal(SEQ_NO_KEY.to_vec(), inner.seq_no.to_string().into_bytes());
        seq_no_file.write(&record.encode())?;
        seq_no_file.sync()?;

        // Step 3: Sync and release the data files
        inner.sync_active()?;
        inner.active_file = None;
        inner.older_files.clear();

        FileExt::unlock(&self.lock_file)?;
        log::info!("Database closed successfully");

        Ok(())
    }

    /// Append a record under the write lock, returning where it landed.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let mut inner = self.inner.write();
        self.ensure_open()?;
        inner.append_log_record(&self.options, record)
    }

    /// Fails with [`Error::DatabaseClosed`] once `close` has run. Callers check
    /// while holding the engine lock, so nothing slips in behind `close`.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::DatabaseClosed);
        }
        Ok(())
    }

    /// Open every data file in `dir`, ascending by id.
    fn load_data_files(dir: &Path, io_type: IoType) -> Result<Vec<DataFile>> {
        let mut file_ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(file_id) = parse_data_file_name(name)? {
                file_ids.push(file_id);
            }
        }
        file_ids.sort_unstable();

        file_ids.into_iter().map(|file_id| DataFile::open(dir, file_id, io_type)).collect()
    }

    /// Replay every data file not covered by the hint file into `index`.
    fn load_index_from_data_files(
        dir: &Path,
        files: &[DataFile],
        index: &dyn Indexer,
    ) -> Result<Replay> {
        let non_merge_file_id = merge::non_merge_file_id(dir)?;
        let mut replay = Replay::default();
        let mut txn_records: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();

        for (i, file) in files.iter().enumerate() {
            let file_id = file.file_id();
            if non_merge_file_id.is_some_and(|cutoff| file_id < cutoff) {
                continue;
            }

            let mut offset = 0;
            while let Some((mut record, size)) = file.read_log_record(offset)? {
                let pos = LogRecordPos { file_id, offset, size: size as u32 };
                let (real_key, seq_no) = parse_key_with_seq(&record.key)?;
                let real_key = real_key.to_vec();

                if seq_no == NON_TXN_SEQ_NO {
                    replay.reclaim_size += update_index(index, real_key, record.rec_type, pos)?;
                } else if record.rec_type == LogRecordType::TxFinished {
                    for txn in txn_records.remove(&seq_no).unwrap_or_default() {
                        replay.reclaim_size +=
                            update_index(index, txn.record.key, txn.record.rec_type, txn.pos)?;
                    }
                    replay.reclaim_size += size;
                } else {
                    record.key = real_key;
                    txn_records.entry(seq_no).or_default().push(TransactionRecord { record, pos });
                }

                replay.seq_no = replay.seq_no.max(seq_no);
                offset += size;
            }

            if i == files.len() - 1 {
                replay.active_end = offset;
            }
        }

        if !txn_records.is_empty() {
            log::warn!("Discarded {} uncommitted write batches during recovery", txn_records.len());
            let discarded: u64 =
                txn_records.values().flatten().map(|txn| u64::from(txn.pos.size)).sum();
            replay.reclaim_size += discarded;
        }

        Ok(replay)
    }

    /// Read the sequence number persisted by the last close.
    fn load_seq_no(dir: &Path) -> Result<Option<u64>> {
        let path = dir.join(SEQ_NO_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let seq_no_file = DataFile::open_seq_no_file(dir)?;
        let (record, _) = seq_no_file
            .read_log_record(0)?
            .ok_or_else(|| Error::corruption("sequence number file is empty"))?;
        let seq_no = std::str::from_utf8(&record.value)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::corruption("sequence number file holds no number"))?;
        Ok(Some(seq_no))
    }

    /// Reopen every data file with standard I/O after the startup scan.
    fn reset_io_type(dir: &Path, files: &mut [DataFile]) -> Result<()> {
        for file in files.iter_mut() {
            file.set_io_manager(dir, IoType::StandardFile)?;
        }
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        // Ignore errors during drop as we can't propagate them
        if let Err(e) = self.close() {
            log::error!("Error closing database during drop: {}", e);
        }
    }
}

/// Outcome of replaying the data files.
#[derive(Debug, Default)]
struct Replay {
    seq_no: u64,
    reclaim_size: u64,
    /// Offset right after the last valid record of the newest file.
    active_end: u64,
}

/// Apply one committed record to `index`, returning the bytes it made reclaimable.
pub(crate) fn update_index(
    index: &dyn Indexer,
    key: Vec<u8>,
    rec_type: LogRecordType,
    pos: LogRecordPos,
) -> Result<u64> {
    let (mut reclaimed, old) = match rec_type {
        LogRecordType::Deleted => (u64::from(pos.size), index.delete(&key)?),
        _ => (0, index.put(key, pos)?),
    };
    if let Some(old) = old {
        reclaimed += u64::from(old.size);
    }
    Ok(reclaimed)
}

impl DbInner {
    /// Append an encoded record to the active file, rotating it first when
    /// the record would push it past `data_file_size`.
    pub(crate) fn append_log_record(
        &mut self,
        options: &Options,
        record: &LogRecord,
    ) -> Result<LogRecordPos> {
        let dir = &options.dir_path;
        if self.active_file.is_none() {
            self.active_file = Some(DataFile::open(dir, INITIAL_FILE_ID, IoType::StandardFile)?);
        }

        let encoded = record.encode();
        let size = encoded.len() as u64;
        let needs_rotation = self
            .active_file
            .as_ref()
            .is_some_and(|f| f.write_off() > 0 && f.write_off() + size > options.data_file_size);
        if needs_rotation {
            self.rotate_active_file(dir)?;
        }

        let active = self
            .active_file
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no active data file"))?;
        let offset = active.write_off();
        active.write(&encoded)?;
        let pos = LogRecordPos { file_id: active.file_id(), offset, size: size as u32 };

        self.bytes_write += encoded.len();
        let needs_sync = options.sync_writes
            || (options.bytes_per_sync > 0 && self.bytes_write >= options.bytes_per_sync);
        if needs_sync {
            self.sync_active()?;
        }

        Ok(pos)
    }

    /// Seal the active file and open the next one. Returns the new file id.
    pub(crate) fn rotate_active_file(&mut self, dir: &Path) -> Result<u32> {
        let current = self
            .active_file
            .as_ref()
            .ok_or_else(|| Error::invalid_state("no active data file to rotate"))?;
        current.sync()?;
        self.bytes_write = 0;

        let next_id = current.file_id() + 1;
        let next = DataFile::open(dir, next_id, IoType::StandardFile)?;
        if let Some(sealed) = self.active_file.replace(next) {
            self.older_files.insert(sealed.file_id(), Arc::new(sealed));
        }
        log::debug!("Rotated active data file to {}", next_id);
        Ok(next_id)
    }

    pub(crate) fn sync_active(&mut self) -> Result<()> {
        if let Some(active) = &self.active_file {
            active.sync()?;
        }
        self.bytes_write = 0;
        Ok(())
    }

    /// Read the value stored at `pos`. A tombstone reads as `None`.
    pub(crate) fn value_at(&self, pos: &LogRecordPos) -> Result<Option<Vec<u8>>> {
        let record = match &self.active_file {
            Some(active) if active.file_id() == pos.file_id => active.read_log_record(pos.offset)?,
            _ => self
                .older_files
                .get(&pos.file_id)
                .ok_or(Error::DataFileNotFound(pos.file_id))?
                .read_log_record(pos.offset)?,
        };

        let (record, _) = record.ok_or_else(|| {
            Error::corruption(format!(
                "index points past the end of data file {} at offset {}",
                pos.file_id, pos.offset
            ))
        })?;
        match record.rec_type {
            LogRecordType::Deleted => Ok(None),
            _ => Ok(Some(record.value)),
        }
    }
}
