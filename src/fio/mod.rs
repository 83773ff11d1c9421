//! I/O primitives backing data files.
//!
//! A data file only needs positional reads, appends, syncs and its size.
//! Two implementations exist: unbuffered standard file I/O used for all
//! normal operation, and a read-only memory map used to speed up the replay
//! scan at startup.

mod file_io;
mod mmap;

pub use file_io::FileIo;
pub use mmap::MmapIo;

use crate::error::Result;
use std::path::Path;

/// Permissions used when creating data files.
#[cfg(unix)]
pub const DATA_FILE_PERM: u32 = 0o644;

/// Byte-addressable storage behind one data file.
pub trait IoManager: Send + Sync {
    /// Read into `buf` starting at `offset`; returns the number of bytes read.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` at the end of the file.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flush written data to stable storage.
    fn sync(&self) -> Result<()>;

    /// Current size of the file in bytes.
    fn size(&self) -> Result<u64>;
}

/// Which [`IoManager`] implementation to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Standard file I/O, supports every operation.
    StandardFile,
    /// Read-only memory map.
    MemoryMap,
}

/// Open `path` with the requested I/O implementation, creating the file if absent.
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    Ok(match io_type {
        IoType::StandardFile => Box::new(FileIo::open(path)?),
        IoType::MemoryMap => Box::new(MmapIo::open(path)?),
    })
}
