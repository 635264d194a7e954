use crate::StoreError;

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

const BLOCK_SIZE: u64 = 512;

/// Disk space allocated under `path`, in bytes, as `du -s -x` reports it.
///
/// Counts allocated blocks rather than apparent length, stays on the
/// filesystem of `path`, does not follow symlinks, and counts each hard
/// linked inode once.
pub fn disk_usage(path: &Path) -> Result<u64, StoreError> {
    let mut seen = HashSet::new();
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false).same_file_system(true) {
        let meta = entry?.metadata()?;
        if !meta.is_dir() && meta.nlink() > 1 && !seen.insert((meta.dev(), meta.ino())) {
            continue;
        }
        total += meta.blocks() * BLOCK_SIZE;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn counts_allocated_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let empty = disk_usage(dir.path()).unwrap();
        fs::write(dir.path().join("data"), vec![7u8; 64 * 1024]).unwrap();
        let full = disk_usage(dir.path()).unwrap();
        assert!(full >= empty + 64 * 1024, "{full} vs {empty}");
        assert_eq!(full % BLOCK_SIZE, 0);
    }

    #[test]
    fn hard_links_counted_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![1u8; 32 * 1024]).unwrap();
        let before = disk_usage(dir.path()).unwrap();
        fs::hard_link(dir.path().join("a"), dir.path().join("b")).unwrap();
        assert_eq!(disk_usage(dir.path()).unwrap(), before);
    }

    #[test]
    fn symlinks_not_followed() {
        let target = tempfile::tempdir().unwrap();
        fs::write(target.path().join("big"), vec![0u8; 128 * 1024]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let before = disk_usage(dir.path()).unwrap();
        std::os::unix::fs::symlink(target.path(), dir.path().join("link")).unwrap();
        assert!(disk_usage(dir.path()).unwrap() < before + 128 * 1024);
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(disk_usage(Path::new("/nonexistent/slugc/cache")).is_err());
    }
}
