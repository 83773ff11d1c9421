//! Merge: rewrite the live records of sealed data files into a compact set.
//!
//! ## Protocol
//!
//! - Seal the active file; its successor id becomes the cutoff. Files below
//!   the cutoff are merged, files at or above it keep receiving writes.
//! - Rewrite every record the index still points at into a scratch database
//!   in the sibling `<dir>-merge` directory, and record each new position in
//!   a hint file.
//! - Write the merge-finished marker holding the cutoff. Its presence is the
//!   only signal that the scratch output is complete.
//! - On the next open, a finished merge replaces the files below the cutoff;
//!   an unfinished one is discarded.

use crate::config::IndexType;
use crate::data::log_record::{key_with_seq, parse_key_with_seq};
use crate::data::{
    data_file_path, DataFile, LogRecord, LogRecordPos, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::error::{Error, Result};
use crate::index::Indexer;
use crate::{util, DB, FILE_LOCK_NAME, NON_TXN_SEQ_NO};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

impl DB {
    /// Compacts the sealed data files, dropping superseded and deleted records.
    ///
    /// The new files only take effect on the next [`DB::open`]. Reads and
    /// writes proceed while the merge runs.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The handle was closed ([`Error::DatabaseClosed`])
    /// - A merge is already running ([`Error::MergeInProgress`])
    /// - Reclaimable bytes are below the configured ratio ([`Error::MergeRatioUnreached`])
    /// - The live data would not fit on disk ([`Error::NotEnoughSpaceForMerge`])
    pub fn merge(&self) -> Result<()> {
        let dir = &self.options.dir_path;

        // Step 1: Check preconditions and seal the active file
        let (merge_files, non_merge_file_id) = {
            let mut inner = self.inner.write();
            self.ensure_open()?;
            if inner.active_file.is_none() {
                return Ok(());
            }
            if inner.is_merging {
                return Err(Error::MergeInProgress);
            }

            let total_size = util::dir_size(dir)?;
            let ratio = f64::from(self.options.data_file_merge_ratio);
            if total_size == 0 || (inner.reclaim_size as f64 / total_size as f64) < ratio {
                return Err(Error::MergeRatioUnreached);
            }
            let available = util::available_disk_size(dir)?;
            if total_size.saturating_sub(inner.reclaim_size) >= available {
                return Err(Error::NotEnoughSpaceForMerge);
            }

            let non_merge_file_id = inner.rotate_active_file(dir)?;
            inner.is_merging = true;

            let mut files: Vec<Arc<DataFile>> = inner.older_files.values().cloned().collect();
            files.sort_by_key(|f| f.file_id());
            (files, non_merge_file_id)
        };

        log::info!(
            "Merging {} data files below {} in {:?}",
            merge_files.len(),
            non_merge_file_id,
            dir
        );

        // Step 2: Rewrite live records without holding the lock
        let result = self.rewrite_live_records(&merge_files, non_merge_file_id);
        self.inner.write().is_merging = false;

        match &result {
            Ok(()) => log::info!("Merge finished, cutoff file id {}", non_merge_file_id),
            Err(e) => log::warn!("Merge failed: {}", e),
        }
        result
    }

    fn rewrite_live_records(&self, merge_files: &[Arc<DataFile>], non_merge_file_id: u32) -> Result<()> {
        let merge_path = merge_dir_path(&self.options.dir_path);
        if merge_path.exists() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        let mut merge_options = self.options.clone();
        merge_options.dir_path = merge_path.clone();
        merge_options.sync_writes = false;
        merge_options.bytes_per_sync = 0;
        merge_options.index_type = IndexType::BTree;
        merge_options.mmap_at_startup = false;
        let merge_db = DB::open(merge_options)?;
        let mut hint_file = DataFile::open_hint_file(&merge_path)?;

        let mut rewritten = 0usize;
        for data_file in merge_files {
            let mut offset = 0;
            while let Some((record, size)) = data_file.read_log_record(offset)? {
                let (real_key, _) = parse_key_with_seq(&record.key)?;
                let is_live = self
                    .index
                    .get(real_key)?
                    .is_some_and(|pos| pos.file_id == data_file.file_id() && pos.offset == offset);
                if is_live {
                    // Drop the batch sequence number; the record is committed
                    let rewritten_record = LogRecord::new(
                        key_with_seq(real_key, NON_TXN_SEQ_NO),
                        record.value,
                        record.rec_type,
                    );
                    let pos = merge_db.append_log_record(&rewritten_record)?;
                    hint_file.write_hint_record(real_key.to_vec(), &pos)?;
                    rewritten += 1;
                }
                offset += size;
            }
        }

        // Step 3: Persist everything, then mark the merge as finished
        hint_file.sync()?;
        merge_db.sync()?;
        merge_db.close()?;

        let mut merge_finished_file = DataFile::open_merge_finished_file(&merge_path)?;
        let record = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            non_merge_file_id.to_string().into_bytes(),
        );
        merge_finished_file.write(&record.encode())?;
        merge_finished_file.sync()?;

        log::debug!("Rewrote {} live records into {:?}", rewritten, merge_path);
        Ok(())
    }
}

/// Sibling directory holding the output of a merge of `dir`.
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dir.with_file_name(format!("{}{}", name, MERGE_DIR_SUFFIX))
}

/// Move the output of a finished merge into `dir`, replacing the files it
/// compacted. An unfinished merge directory is discarded.
pub(crate) fn load_merge_files(dir: &Path) -> Result<()> {
    let merge_path = merge_dir_path(dir);
    if !merge_path.exists() {
        return Ok(());
    }

    let mut merge_finished = false;
    let mut merge_file_names = Vec::new();
    for entry in fs::read_dir(&merge_path)? {
        let file_name = entry?.file_name();
        if file_name == MERGE_FINISHED_FILE_NAME {
            merge_finished = true;
        }
        // The scratch database's own bookkeeping stays behind
        if file_name == SEQ_NO_FILE_NAME || file_name == FILE_LOCK_NAME {
            continue;
        }
        merge_file_names.push(file_name);
    }

    if !merge_finished {
        log::warn!("Discarding unfinished merge in {:?}", merge_path);
        fs::remove_dir_all(&merge_path)?;
        return Ok(());
    }

    let non_merge_file_id = non_merge_file_id(&merge_path)?
        .ok_or_else(|| Error::corruption("merge-finished marker disappeared"))?;

    // Remove the files the merge compacted
    for file_id in 0..non_merge_file_id {
        let path = data_file_path(dir, file_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }

    // Move the marker last so it only lands once the data files are in place
    merge_file_names.sort_by_key(|name| name == MERGE_FINISHED_FILE_NAME);
    for file_name in &merge_file_names {
        fs::rename(merge_path.join(file_name), dir.join(file_name))?;
    }

    fs::remove_dir_all(&merge_path)?;
    log::info!(
        "Loaded merged files from {:?}, data files below {} replaced",
        merge_path,
        non_merge_file_id
    );
    Ok(())
}

/// Cutoff id recorded by the merge-finished marker in `dir`, if any.
pub(crate) fn non_merge_file_id(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }

    let merge_finished_file = DataFile::open_merge_finished_file(dir)?;
    let (record, _) = merge_finished_file
        .read_log_record(0)?
        .ok_or_else(|| Error::corruption("merge-finished marker is empty"))?;
    let file_id = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| Error::corruption("merge-finished marker holds no file id"))?;
    Ok(Some(file_id))
}

/// Load the positions recorded by a merge into `index`.
///
/// With `stale_below` set, only entries the index currently resolves to a
/// file below that id are replaced. A persistent index already reflects
/// every write made after the merge started.
pub(crate) fn load_index_from_hint_file(
    dir: &Path,
    index: &dyn Indexer,
    stale_below: Option<u32>,
) -> Result<()> {
    if !dir.join(crate::data::HINT_FILE_NAME).exists() {
        return Ok(());
    }

    let hint_file = DataFile::open_hint_file(dir)?;
    let mut offset = 0;
    let mut loaded = 0usize;
    while let Some((record, size)) = hint_file.read_log_record(offset)? {
        let pos = LogRecordPos::decode(&record.value)?;
        let apply = match stale_below {
            None => true,
            Some(cutoff) => index.get(&record.key)?.is_some_and(|current| current.file_id < cutoff),
        };
        if apply {
            index.put(record.key, pos)?;
            loaded += 1;
        }
        offset += size;
    }

    log::debug!("Loaded {} index entries from hint file", loaded);
    Ok(())
}
