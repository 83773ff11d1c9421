//! Filesystem helpers shared by merge, stat and backup.

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Total size in bytes of every file below `dir`.
pub(crate) fn dir_size(dir: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += metadata.len();
        }
    }
    Ok(size)
}

/// Free space available to this process on the volume holding `dir`.
pub(crate) fn available_disk_size(dir: &Path) -> Result<u64> {
    Ok(fs2::available_space(dir)?)
}

/// Recursively copy `src` into `dest`, skipping entries named in `exclude`.
pub(crate) fn copy_dir(src: &Path, dest: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| exclude.contains(&n)) {
            continue;
        }

        let target = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), [0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b"), [0u8; 28]).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 128);
    }

    #[test]
    fn test_available_disk_size() {
        let dir = TempDir::new().unwrap();
        assert!(available_disk_size(dir.path()).unwrap() > 0);
    }

    #[test]
    fn test_copy_dir_with_exclude() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(src.path().join("000000000.data"), b"data").unwrap();
        fs::write(src.path().join("flock"), b"").unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested").join("inner"), b"x").unwrap();

        let target = dest.path().join("backup");
        copy_dir(src.path(), &target, &["flock"]).unwrap();

        assert_eq!(fs::read(target.join("000000000.data")).unwrap(), b"data");
        assert_eq!(fs::read(target.join("nested").join("inner")).unwrap(), b"x");
        assert!(!target.join("flock").exists());
    }
}
