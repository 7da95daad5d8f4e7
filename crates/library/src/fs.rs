//! Filesystem gateway used by every scanning component.
//!
//! Listings are returned in the order the OS yields them; callers that need
//! a display order sort on their own.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use common::millis_since_epoch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub created_ms: u64,
    pub modified_ms: u64,
}

pub trait FileSystem: Send + Sync {
    fn path_exists(&self, path: &Path) -> bool;

    fn directories_in_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn files_in_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn file_info(&self, path: &Path) -> io::Result<FileInfo>;

    fn file_extension(&self, path: &Path) -> String {
        common::file_extension(path)
    }

    fn parent_directory(&self, path: &Path) -> Option<PathBuf> {
        path.parent().map(Path::to_path_buf)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    fn entries(path: &Path, want_dirs: bool) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // Follow symlinks so linked album folders behave like real ones.
            let file_type = match fs::metadata(entry.path()) {
                Ok(meta) => meta.file_type(),
                Err(_) => continue,
            };
            if (want_dirs && file_type.is_dir()) || (!want_dirs && file_type.is_file()) {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}

impl FileSystem for LocalFileSystem {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn directories_in_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        Self::entries(path, true)
    }

    fn files_in_directory(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        Self::entries(path, false)
    }

    fn file_info(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::metadata(path)?;
        let modified_ms = meta.modified().map(millis_since_epoch).unwrap_or(0);
        // Not every filesystem records a birth time.
        let created_ms = meta
            .created()
            .map(millis_since_epoch)
            .unwrap_or(modified_ms);
        Ok(FileInfo {
            size: meta.len(),
            created_ms,
            modified_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_files_from_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("rock")).unwrap();
        fs::create_dir(dir.path().join("jazz")).unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();

        let fs = LocalFileSystem;
        let mut dirs = fs.directories_in_directory(dir.path()).unwrap();
        dirs.sort();
        assert_eq!(dirs, vec![dir.path().join("jazz"), dir.path().join("rock")]);
        assert_eq!(
            fs.files_in_directory(dir.path()).unwrap(),
            vec![dir.path().join("a.mp3")]
        );
    }

    #[test]
    fn listing_a_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem;
        assert!(fs.directories_in_directory(&dir.path().join("gone")).is_err());
        assert!(!fs.path_exists(&dir.path().join("gone")));
    }

    #[test]
    fn reports_size_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Song.FLAC");
        fs::write(&path, b"12345").unwrap();
        let fs = LocalFileSystem;
        assert_eq!(fs.file_info(&path).unwrap().size, 5);
        assert_eq!(fs.file_extension(&path), ".FLAC");
        assert_eq!(fs.parent_directory(&path), Some(dir.path().to_path_buf()));
    }
}
