use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use common::{has_extension_in, path_string, Folder, Track, SUPPORTED_AUDIO_EXTENSIONS};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::events::{CollectionEvent, CollectionEvents};
use crate::fs::FileSystem;
use crate::repository::{FolderRepository, TrackRepository};
use crate::scanner::MetadataFiller;
use crate::LibraryError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub offline_folders: usize,
}

impl IndexingStats {
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.removed > 0
    }
}

/// Brings the track catalog in line with the audio files below every
/// catalog folder.
pub struct CollectionIndexer {
    folders: Arc<dyn FolderRepository>,
    tracks: Arc<dyn TrackRepository>,
    fs: Arc<dyn FileSystem>,
    filler: Arc<dyn MetadataFiller>,
    events: CollectionEvents,
}

impl CollectionIndexer {
    pub fn new(
        folders: Arc<dyn FolderRepository>,
        tracks: Arc<dyn TrackRepository>,
        fs: Arc<dyn FileSystem>,
        filler: Arc<dyn MetadataFiller>,
        events: CollectionEvents,
    ) -> Self {
        Self {
            folders,
            tracks,
            fs,
            filler,
            events,
        }
    }

    /// New and modified files are (re)filled and flagged for artwork
    /// indexing. Tracks are removed when their file is gone from a reachable
    /// folder or when no folder contains them anymore; tracks below an
    /// unreachable folder are kept until it comes back.
    pub fn index_collection(&self) -> Result<IndexingStats, LibraryError> {
        let started = Instant::now();
        let folders = self.folders.get_folders()?;
        let existing: HashMap<String, Track> = self
            .tracks
            .get_tracks()?
            .into_iter()
            .map(|track| (track.path.clone(), track))
            .collect();

        let mut stats = IndexingStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut reachable: Vec<PathBuf> = Vec::new();
        let mut upserts: Vec<Track> = Vec::new();

        for folder in &folders {
            let root = PathBuf::from(&folder.path);
            if !self.fs.path_exists(&root) {
                info!("Folder {:?} is not reachable; keeping its tracks", folder.path);
                stats.offline_folders += 1;
                continue;
            }
            reachable.push(root.clone());

            for file in audio_files_below(&root) {
                let path = path_string(&file);
                if !seen.insert(path.clone()) {
                    continue;
                }
                let info = match self.fs.file_info(&file) {
                    Ok(info) => info,
                    Err(err) => {
                        debug!("Could not stat {:?}: {}", file, err);
                        continue;
                    }
                };

                let previous = existing.get(&path);
                if let Some(track) = previous {
                    if track.date_file_modified == info.modified_ms && track.file_size == info.size
                    {
                        stats.unchanged += 1;
                        continue;
                    }
                }

                match self.filler.fill_metadata(&file) {
                    Ok(mut track) => {
                        match previous {
                            Some(prev) => {
                                track.date_added = prev.date_added;
                                stats.updated += 1;
                            }
                            None => stats.added += 1,
                        }
                        track.has_artwork = false;
                        track.needs_album_artwork_indexing = true;
                        upserts.push(track);
                    }
                    Err(err) => {
                        error!(
                            component = "CollectionIndexer",
                            operation = "index_collection",
                            "Could not read metadata for {:?}: {}",
                            file,
                            err
                        );
                        stats.failed += 1;
                    }
                }
            }
        }

        let removals: Vec<String> = existing
            .keys()
            .filter(|path| !seen.contains(*path))
            .filter(|path| should_remove(Path::new(path), &folders, &reachable))
            .cloned()
            .collect();
        stats.removed = removals.len();

        self.tracks.apply_track_changes(&upserts, &removals)?;

        info!(
            "Indexing finished in {} ms: {} added, {} updated, {} removed, {} failed",
            started.elapsed().as_millis(),
            stats.added,
            stats.updated,
            stats.removed,
            stats.failed
        );
        self.events
            .emit(CollectionEvent::IndexingFinished(stats.clone()));
        Ok(stats)
    }
}

fn should_remove(path: &Path, folders: &[Folder], reachable: &[PathBuf]) -> bool {
    let mut owned = false;
    for folder in folders {
        if path.starts_with(&folder.path) {
            owned = true;
            if reachable.iter().any(|root| root.as_path() == Path::new(&folder.path)) {
                return true;
            }
        }
    }
    !owned
}

fn audio_files_below(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if has_extension_in(entry.path(), SUPPORTED_AUDIO_EXTENSIONS) {
            files.push(entry.path().to_path_buf());
        }
    }
    files
}
