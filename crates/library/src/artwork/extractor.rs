use std::fs;
use std::path::{Path, PathBuf};

use common::Track;
use tracing::debug;

use crate::LibraryError;

const FOLDER_COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "front.jpg",
    "front.jpeg",
    "front.png",
    "album.jpg",
    "album.jpeg",
    "album.png",
];

/// Locates artwork for one track. `Ok(None)` means the track has none;
/// `Err` means the lookup itself failed and may succeed later.
pub trait ArtworkExtractor: Send + Sync {
    fn extract_artwork(&self, track: &Track) -> Result<Option<Vec<u8>>, LibraryError>;
}

/// Embedded picture first, then a well-known image file next to the track.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrackArtworkExtractor;

impl ArtworkExtractor for TrackArtworkExtractor {
    fn extract_artwork(&self, track: &Track) -> Result<Option<Vec<u8>>, LibraryError> {
        let path = Path::new(&track.path);
        if let Some(cover) = metadata::read_cover(path)? {
            return Ok(Some(cover.data));
        }

        let directory = match path.parent() {
            Some(directory) => directory,
            None => return Ok(None),
        };
        match find_folder_cover(directory) {
            Some(cover) => {
                debug!("Using folder cover {:?} for {:?}", cover, track.path);
                Ok(Some(fs::read(cover)?))
            }
            None => Ok(None),
        }
    }
}

pub fn find_folder_cover(directory: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(directory).ok()?;
    let mut found: Option<(usize, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        let rank = match FOLDER_COVERS.iter().position(|cover| *cover == name) {
            Some(rank) => rank,
            None => continue,
        };
        if found.as_ref().map_or(true, |(best, _)| rank < *best) {
            found = Some((rank, path));
        }
    }
    found.map(|(_, path)| path)
}
