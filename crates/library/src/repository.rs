//! Capability interfaces over the catalog store.
//!
//! `Catalog` implements all of them on top of redb. Services hold them as
//! trait objects so tests and alternative stores can be swapped in.

use std::collections::HashSet;

use common::{AlbumArtwork, Folder, Track};

use crate::LibraryError;

pub trait FolderRepository: Send + Sync {
    fn get_folders(&self) -> Result<Vec<Folder>, LibraryError>;

    fn get_folder_by_path(&self, path: &str) -> Result<Option<Folder>, LibraryError>;

    /// `false` when a folder with the same path already exists.
    fn add_folder(&self, folder: &Folder) -> Result<bool, LibraryError>;

    fn delete_folder(&self, folder_id: &str) -> Result<(), LibraryError>;

    fn set_folder_show_in_collection(&self, folder_id: &str, show: bool)
        -> Result<(), LibraryError>;

    fn set_all_folders_show_in_collection(&self, show: bool) -> Result<(), LibraryError>;
}

pub trait TrackRepository: Send + Sync {
    fn get_tracks(&self) -> Result<Vec<Track>, LibraryError>;

    fn get_track(&self, path: &str) -> Result<Option<Track>, LibraryError>;

    /// Upserts and removals are committed together.
    fn apply_track_changes(&self, upserts: &[Track], removals: &[String])
        -> Result<(), LibraryError>;
}

pub trait AlbumArtworkRepository: Send + Sync {
    fn get_album_artwork(&self) -> Result<Vec<AlbumArtwork>, LibraryError>;

    /// Artwork ids referenced by the index.
    fn get_all_artwork_keys(&self) -> Result<HashSet<String>, LibraryError> {
        Ok(self
            .get_album_artwork()?
            .into_iter()
            .map(|row| row.artwork_id)
            .collect())
    }

    /// Applies one phase worth of index mutations atomically. Track updates
    /// for rows that no longer exist are dropped rather than re-inserted.
    fn commit_artwork_changes(&self, changes: &ArtworkChangeSet) -> Result<(), LibraryError>;
}

/// Narrow get/set access to persisted settings.
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Result<Option<String>, LibraryError>;

    fn set_setting(&self, key: &str, value: Option<&str>) -> Result<(), LibraryError>;
}

#[derive(Clone, Debug, Default)]
pub struct ArtworkChangeSet {
    pub removed_album_keys: Vec<String>,
    pub upserted_artwork: Vec<AlbumArtwork>,
    pub updated_tracks: Vec<Track>,
}

impl ArtworkChangeSet {
    pub fn is_empty(&self) -> bool {
        self.removed_album_keys.is_empty()
            && self.upserted_artwork.is_empty()
            && self.updated_tracks.is_empty()
    }
}
