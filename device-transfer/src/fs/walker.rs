//! Local tree scanning for progress estimation.
//!
//! The pull tool reports nothing while it runs, so progress is inferred by
//! measuring the destination tree. Scans run concurrently with the writer:
//! entries that vanish or cannot be read mid-walk are skipped instead of
//! failing the scan.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Result of a single pass over a local tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeScan {
    /// Sum of regular file sizes in bytes
    pub total_bytes: u64,

    /// Number of regular files seen
    pub file_count: usize,

    /// Most recently modified file and its modification time
    pub latest: Option<(PathBuf, SystemTime)>,
}

impl TreeScan {
    /// Path of the most recently modified file relative to `root`.
    ///
    /// When the scanned tree is a single file equal to `root`, its file name
    /// is returned instead of an empty path.
    pub fn latest_relative_to(&self, root: &Path) -> Option<PathBuf> {
        let (path, _) = self.latest.as_ref()?;
        match path.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => Some(rel.to_path_buf()),
            _ => path.file_name().map(PathBuf::from).or_else(|| Some(path.clone())),
        }
    }
}

/// Walk `root` once, collecting size and the latest-modified file.
///
/// A missing root yields an empty scan. Symbolic links are not followed.
/// Ties on modification time keep the first file seen.
pub fn scan_tree(root: &Path) -> TreeScan {
    let mut scan = TreeScan::default();

    for entry in WalkDir::new(root).follow_links(false) {
        // Vanished or unreadable entries are expected while a pull is writing
        let Ok(entry) = entry else { continue };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(metadata) = entry.metadata() else { continue };

        scan.total_bytes += metadata.len();
        scan.file_count += 1;

        if let Ok(modified) = metadata.modified() {
            let newer = match &scan.latest {
                Some((_, best)) => modified > *best,
                None => true,
            };
            if newer {
                scan.latest = Some((entry.path().to_path_buf(), modified));
            }
        }
    }

    scan
}

/// Calculate total size of all files under `root`; 0 when it does not exist.
pub fn calculate_total_size(root: &Path) -> u64 {
    scan_tree(root).total_bytes
}

/// Most recently modified file under `tree`, relative to `relative_to`.
///
/// Returns `None` for an empty or nonexistent tree.
pub fn latest_modified(tree: &Path, relative_to: &Path) -> Option<PathBuf> {
    scan_tree(tree).latest_relative_to(relative_to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, secs_after_epoch: u64) -> std::io::Result<()> {
        let file = File::options().write(true).open(path)?;
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
    }

    #[test]
    fn test_missing_root_is_zero() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert_eq!(calculate_total_size(&missing), 0);
        assert_eq!(latest_modified(&missing, temp_dir.path()), None);
    }

    #[test]
    fn test_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let scan = scan_tree(temp_dir.path());
        assert_eq!(scan, TreeScan::default());
        Ok(())
    }

    #[test]
    fn test_calculate_total_size_recurses() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("a/b"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?; // 5 bytes
        fs::write(temp_dir.path().join("a/file2.txt"), b"1234567")?; // 7 bytes
        fs::write(temp_dir.path().join("a/b/file3.bin"), vec![0u8; 100])?;

        assert_eq!(calculate_total_size(temp_dir.path()), 112);
        assert_eq!(scan_tree(temp_dir.path()).file_count, 3);

        Ok(())
    }

    #[test]
    fn test_single_file_root() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("video.mp4");
        fs::write(&file, vec![1u8; 42])?;

        assert_eq!(calculate_total_size(&file), 42);
        assert_eq!(latest_modified(&file, &file), Some(PathBuf::from("video.mp4")));
        assert_eq!(
            latest_modified(&file, temp_dir.path()),
            Some(PathBuf::from("video.mp4"))
        );
        Ok(())
    }

    #[test]
    fn test_latest_modified_relative_path() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let tree = temp_dir.path().join("DCIM");
        fs::create_dir_all(tree.join("Camera"))?;

        let old = tree.join("old.jpg");
        let new = tree.join("Camera/new.jpg");
        fs::write(&old, b"old")?;
        fs::write(&new, b"new")?;
        set_mtime(&old, 1_000)?;
        set_mtime(&new, 2_000)?;

        assert_eq!(
            latest_modified(&tree, temp_dir.path()),
            Some(PathBuf::from("DCIM/Camera/new.jpg"))
        );
        assert_eq!(
            latest_modified(&tree, &tree),
            Some(PathBuf::from("Camera/new.jpg"))
        );
        Ok(())
    }

    #[test]
    fn test_latest_modified_tie_keeps_first_seen() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("b.txt");
        fs::write(&a, b"a")?;
        fs::write(&b, b"b")?;
        set_mtime(&a, 5_000)?;
        set_mtime(&b, 5_000)?;

        // Whichever the walk visits first must win; a later equal mtime never replaces it
        let order: Vec<PathBuf> = WalkDir::new(temp_dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect();
        let scan = scan_tree(temp_dir.path());
        assert_eq!(scan.latest.map(|(p, _)| p), order.first().cloned());
        Ok(())
    }
}
