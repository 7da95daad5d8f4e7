use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::LibraryError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png", "webp", "gif", "bin"];

/// Physical storage for artwork blobs, keyed by artwork id.
pub trait ArtworkStore: Send + Sync {
    fn write_artwork(&self, artwork_id: &str, bytes: &[u8]) -> Result<(), LibraryError>;

    /// Returns whether a file was removed; an id with no stored file is
    /// not an error.
    fn delete_artwork(&self, artwork_id: &str) -> Result<bool, LibraryError>;

    fn list_physical_files(&self) -> Result<HashSet<String>, LibraryError>;
}

/// One image file per artwork id below `root`; the extension follows the
/// sniffed image type.
#[derive(Clone, Debug)]
pub struct DiskArtworkCache {
    root: PathBuf,
}

impl DiskArtworkCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artwork_path(&self, artwork_id: &str) -> Option<PathBuf> {
        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", artwork_id, ext)))
            .find(|path| path.is_file())
    }

    /// Bytes and mime type of a stored image.
    pub fn read_artwork(&self, artwork_id: &str) -> Result<Option<(Vec<u8>, String)>, LibraryError> {
        let path = match self.artwork_path(artwork_id) {
            Some(path) => path,
            None => return Ok(None),
        };
        let data = fs::read(&path)?;
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        Ok(Some((data, mime)))
    }
}

impl ArtworkStore for DiskArtworkCache {
    fn write_artwork(&self, artwork_id: &str, bytes: &[u8]) -> Result<(), LibraryError> {
        fs::create_dir_all(&self.root).map_err(|err| {
            LibraryError::StoreUnavailable(format!("{}: {}", self.root.display(), err))
        })?;
        let ext = metadata::guess_mime(bytes)
            .as_deref()
            .and_then(image_ext_from_mime)
            .unwrap_or("bin");
        let path = self.root.join(format!("{}.{}", artwork_id, ext));
        if path.is_file() {
            return Ok(());
        }

        // Readers never see a partially written image.
        let tmp = self.root.join(format!(".{}.{}.tmp", artwork_id, ext));
        fs::write(&tmp, bytes)?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn delete_artwork(&self, artwork_id: &str) -> Result<bool, LibraryError> {
        let mut removed = false;
        for ext in IMAGE_EXTENSIONS {
            let path = self.root.join(format!("{}.{}", artwork_id, ext));
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Deleted artwork file {:?}", path);
                    removed = true;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }

    fn list_physical_files(&self) -> Result<HashSet<String>, LibraryError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(err) => {
                return Err(LibraryError::StoreUnavailable(format!(
                    "{}: {}",
                    self.root.display(),
                    err
                )))
            }
        };

        let mut ids = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Leftover temp files from an interrupted write.
            if name.starts_with('.') {
                let _ = fs::remove_file(&path);
                continue;
            }
            // Only files this cache could have written are artwork.
            let ext = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_default();
            if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                ids.insert(stem.to_string_lossy().to_string());
            }
        }
        Ok(ids)
    }
}

pub fn image_ext_from_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn writes_are_named_by_image_type() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskArtworkCache::new(dir.path().join("artwork"));
        cache.write_artwork("album-1", PNG).unwrap();
        cache.write_artwork("album-2", b"no magic").unwrap();

        assert!(dir.path().join("artwork/album-1.png").is_file());
        assert!(dir.path().join("artwork/album-2.bin").is_file());
        let (data, mime) = cache.read_artwork("album-1").unwrap().unwrap();
        assert_eq!(data, PNG);
        assert_eq!(mime, "image/png");
        assert_eq!(
            cache.list_physical_files().unwrap(),
            HashSet::from(["album-1".to_string(), "album-2".to_string()])
        );
    }

    #[test]
    fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskArtworkCache::new(dir.path().join("never-created"));
        assert!(cache.list_physical_files().unwrap().is_empty());
        assert!(!cache.delete_artwork("album-1").unwrap());
        assert!(cache.read_artwork("album-1").unwrap().is_none());
    }

    #[test]
    fn delete_removes_the_file_and_tolerates_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskArtworkCache::new(dir.path());
        cache.write_artwork("album-1", PNG).unwrap();
        assert!(cache.delete_artwork("album-1").unwrap());
        assert!(!cache.delete_artwork("album-1").unwrap());
        assert!(cache.artwork_path("album-1").is_none());
    }

    #[test]
    fn foreign_files_are_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskArtworkCache::new(dir.path());
        cache.write_artwork("album-1", PNG).unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        fs::write(dir.path().join("scan.jpeg"), b"not ours").unwrap();
        fs::write(dir.path().join("README"), b"no extension").unwrap();

        assert_eq!(
            cache.list_physical_files().unwrap(),
            HashSet::from(["album-1".to_string()])
        );
        assert!(dir.path().join("notes.txt").is_file());
    }

    #[test]
    fn unusable_root_is_a_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("artwork");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let cache = DiskArtworkCache::new(&blocker);
        assert!(matches!(
            cache.write_artwork("album-1", PNG),
            Err(LibraryError::StoreUnavailable(_))
        ));
    }
}
