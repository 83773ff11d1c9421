//! Read-only memory-mapped I/O, used while replaying data files at startup.

use super::IoManager;
use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::OpenOptions;
use std::path::Path;

/// Data file mapped into memory. Writes and syncs are rejected.
///
/// Empty files are not mapped at all.
pub struct MmapIo {
    map: Option<Mmap>,
}

impl MmapIo {
    /// Map `path`, creating an empty file first if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        // SAFETY: data files are only appended to by the engine holding the
        // directory lock, and the map is dropped before any append happens.
        let map = if file.metadata()?.len() == 0 { None } else { Some(unsafe { Mmap::map(&file)? }) };
        Ok(Self { map })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let bytes = self.bytes();
        if offset >= bytes.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::invalid_state("memory-mapped data files are read-only"))
    }

    fn sync(&self) -> Result<()> {
        Err(Error::invalid_state("memory-mapped data files cannot be synced"))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.bytes().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fio::FileIo;
    use tempfile::TempDir;

    #[test]
    fn test_mmap_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.data");
        FileIo::open(&path).unwrap().write(b"hello mmap").unwrap();

        let io = MmapIo::open(&path).unwrap();
        assert_eq!(io.size().unwrap(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(io.read(&mut buf, 6).unwrap(), 4);
        assert_eq!(&buf, b"mmap");
        assert_eq!(io.read(&mut buf, 8).unwrap(), 2);
    }

    #[test]
    fn test_mmap_empty_file() {
        let dir = TempDir::new().unwrap();
        let io = MmapIo::open(&dir.path().join("empty.data")).unwrap();
        assert_eq!(io.size().unwrap(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(io.read(&mut buf, 0).unwrap(), 0);
    }

    #[test]
    fn test_mmap_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let io = MmapIo::open(&dir.path().join("a.data")).unwrap();
        assert!(io.write(b"x").is_err());
        assert!(io.sync().is_err());
    }
}
