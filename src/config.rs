//! Configuration options for the CaskDb storage engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration options for opening a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory holding the data files.
    /// Default: a `caskdb` directory under the system temp dir
    pub dir_path: PathBuf,

    /// Size threshold of a single data file (in bytes). A write that would
    /// push the active file past it rotates to a new file first.
    /// Default: 256MB
    pub data_file_size: u64,

    /// Sync the active file after every append.
    /// Default: false
    pub sync_writes: bool,

    /// Sync once this many bytes have been appended since the last sync.
    /// Set to 0 to disable.
    /// Default: 0
    pub bytes_per_sync: usize,

    /// Index backing used to map keys to record positions.
    /// Default: IndexType::BTree
    pub index_type: IndexType,

    /// Read data files through a memory map while replaying them at startup.
    /// Default: true
    pub mmap_at_startup: bool,

    /// Ratio of reclaimable bytes to directory bytes required before a
    /// merge is allowed to run.
    /// Default: 0.5
    pub data_file_merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("caskdb"),
            data_file_size: 256 * 1024 * 1024, // 256MB
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: true,
            data_file_merge_ratio: 0.5,
        }
    }
}

/// Index backings supported by CaskDb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexType {
    /// In-memory ordered tree.
    #[default]
    BTree,

    /// In-memory adaptive radix tree.
    Art,

    /// Disk-resident B+ tree, persisted next to the data files.
    BPlusTree,
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data directory.
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dir_path = path.into();
        self
    }

    /// Sets the data file size threshold.
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.data_file_size = size;
        self
    }

    /// Enables or disables syncing after every write.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the number of unsynced bytes that forces a sync.
    pub fn bytes_per_sync(mut self, bytes: usize) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Sets the index backing.
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Enables or disables memory-mapped reads during startup.
    pub fn mmap_at_startup(mut self, value: bool) -> Self {
        self.mmap_at_startup = value;
        self
    }

    /// Sets the merge trigger ratio.
    pub fn data_file_merge_ratio(mut self, ratio: f32) -> Self {
        self.data_file_merge_ratio = ratio;
        self
    }

    /// Loads options from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: Options = serde_json::from_str(&contents)?;
        options.validate()?;
        Ok(options)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("database dir path is empty"));
        }
        if self.data_file_size == 0 {
            return Err(Error::invalid_argument("data_file_size must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(Error::invalid_argument(
                "data_file_merge_ratio must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// Options for [`crate::DB::iter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix. Empty means no filter.
    pub prefix: Vec<u8>,

    /// Walk keys in descending order.
    pub reverse: bool,
}

impl IteratorOptions {
    /// Sets the key prefix filter.
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    /// Sets the iteration direction.
    pub fn reverse(mut self, value: bool) -> Self {
        self.reverse = value;
        self
    }
}

/// Options for [`crate::DB::new_write_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBatchOptions {
    /// Maximum number of buffered operations a single commit accepts.
    /// Default: 10000
    pub max_batch_num: usize,

    /// Sync the active file once the batch is committed.
    /// Default: true
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_num: 10_000, sync_writes: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.data_file_size, 256 * 1024 * 1024);
        assert!(!opts.sync_writes);
        assert_eq!(opts.index_type, IndexType::BTree);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .dir_path("/tmp/caskdb-builder")
            .data_file_size(64 * 1024)
            .sync_writes(true)
            .index_type(IndexType::Art);

        assert_eq!(opts.dir_path, PathBuf::from("/tmp/caskdb-builder"));
        assert_eq!(opts.data_file_size, 64 * 1024);
        assert!(opts.sync_writes);
        assert_eq!(opts.index_type, IndexType::Art);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.dir_path = PathBuf::new();
        assert!(opts.validate().is_err());

        opts.dir_path = PathBuf::from("/tmp/caskdb-validate");
        opts.data_file_size = 0;
        assert!(opts.validate().is_err());

        opts.data_file_size = 1024;
        opts.data_file_merge_ratio = 1.5;
        assert!(opts.validate().is_err());

        opts.data_file_merge_ratio = 0.0;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_from_json_file() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("caskdb.json");
        std::fs::write(
            &config,
            r#"{ "dir_path": "/var/lib/caskdb", "index_type": "BPlusTree", "sync_writes": true }"#,
        )
        .unwrap();

        let opts = Options::from_json_file(&config).unwrap();
        assert_eq!(opts.dir_path, PathBuf::from("/var/lib/caskdb"));
        assert_eq!(opts.index_type, IndexType::BPlusTree);
        assert!(opts.sync_writes);
        assert_eq!(opts.data_file_size, Options::default().data_file_size);
    }

    #[test]
    fn test_options_from_invalid_json_file() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("caskdb.json");
        std::fs::write(&config, r#"{ "data_file_size": 0 }"#).unwrap();
        assert!(matches!(Options::from_json_file(&config), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_write_batch_options_default() {
        let opts = WriteBatchOptions::default();
        assert_eq!(opts.max_batch_num, 10_000);
        assert!(opts.sync_writes);
    }
}
