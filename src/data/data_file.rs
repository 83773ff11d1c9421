//! Append-only data files and the auxiliary files sharing their record format.

use super::log_record::{
    decode_header, LogRecord, LogRecordPos, LogRecordType, CRC_SIZE, MAX_HEADER_SIZE,
};
use crate::error::{Error, Result};
use crate::fio::{new_io_manager, IoManager, IoType};
use std::path::{Path, PathBuf};

/// Suffix of every data file, e.g. `000000001.data`.
pub const DATA_FILE_NAME_SUFFIX: &str = ".data";

/// Hint file written by merge: one `key -> encoded position` record per live key.
pub const HINT_FILE_NAME: &str = "hint-index";

/// Marker written when a merge completed; holds the first non-merged file id.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Marker holding the sequence number at the last clean close.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// One append-only segment of the log.
pub struct DataFile {
    file_id: u32,
    write_off: u64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open the data file with `file_id` inside `dir`.
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(data_file_path(dir, file_id), file_id, io_type)
    }

    /// Open the hint file inside `dir`.
    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0, IoType::StandardFile)
    }

    /// Open the merge-finished marker inside `dir`.
    pub fn open_merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::StandardFile)
    }

    /// Open the sequence number marker inside `dir`.
    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(SEQ_NO_FILE_NAME), 0, IoType::StandardFile)
    }

    fn open_path(path: PathBuf, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = new_io_manager(&path, io_type)?;
        Ok(Self { file_id, write_off: 0, io })
    }

    /// Id of this file.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Offset the next append lands at.
    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    pub(crate) fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    /// Physical size of the underlying file.
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Read the record stored at `offset`.
    ///
    /// Returns the record with its encoded size, or `None` at the logical end
    /// of the file (zeroed or truncated tail).
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // The last record may be shorter than the maximum header size
        let header_len = (MAX_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        self.read_exact_at(&mut header_buf, offset)?;

        let (header, header_size) = match decode_header(&header_buf) {
            Some(h) => h,
            None => return Ok(None),
        };
        if header.is_eof_marker() {
            return Ok(None);
        }

        let body_size = header.key_size as u64 + header.value_size as u64;
        let record_size = header_size as u64 + body_size;
        if offset + record_size > file_size {
            return Ok(None);
        }

        let mut body = vec![0u8; body_size as usize];
        if body_size > 0 {
            self.read_exact_at(&mut body, offset + header_size as u64)?;
        }

        let record = LogRecord::from_parts(&header, &header_buf[CRC_SIZE..header_size], &body)?;
        Ok(Some((record, record_size)))
    }

    /// Append raw encoded bytes and advance the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(())
    }

    /// Append a hint record mapping `key` to `pos`.
    pub fn write_hint_record(&mut self, key: Vec<u8>, pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord::new(key, pos.encode(), LogRecordType::Normal);
        self.write(&record.encode())
    }

    /// Force all appended bytes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Reopen the underlying file with a different I/O implementation.
    pub fn set_io_manager(&mut self, dir: &Path, io_type: IoType) -> Result<()> {
        self.io = new_io_manager(&data_file_path(dir, self.file_id), io_type)?;
        Ok(())
    }

    /// Cut the file back to `len` bytes, dropping a torn tail left by a crash.
    pub(crate) fn truncate(&mut self, dir: &Path, len: u64) -> Result<()> {
        let file = std::fs::OpenOptions::new().write(true).open(data_file_path(dir, self.file_id))?;
        file.set_len(len)?;
        file.sync_all()?;
        self.write_off = len;
        Ok(())
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let n = self.io.read(buf, offset)?;
        if n < buf.len() {
            return Err(Error::corruption(format!(
                "short read in data file {} at offset {}: expected {} bytes, got {}",
                self.file_id,
                offset,
                buf.len(),
                n
            )));
        }
        Ok(())
    }
}

/// Path of the data file with `file_id` inside `dir`.
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_NAME_SUFFIX))
}

/// Parse a data file name to extract its file id.
///
/// Returns `Ok(None)` for names without the data suffix and an error for a
/// data file whose stem is not a number.
pub fn parse_data_file_name(file_name: &str) -> Result<Option<u32>> {
    let Some(stem) = file_name.strip_suffix(DATA_FILE_NAME_SUFFIX) else {
        return Ok(None);
    };
    stem.parse::<u32>()
        .map(Some)
        .map_err(|_| Error::DataDirectoryCorrupted(format!("unexpected data file name {}", file_name)))
}
