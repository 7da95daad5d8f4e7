use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{AlbumArtwork, Folder, Track};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::repository::{
    AlbumArtworkRepository, ArtworkChangeSet, FolderRepository, SettingsStore, TrackRepository,
};
use crate::LibraryError;

const CATALOG_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const FOLDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("folders");
const FOLDERS_BY_PATH_TABLE: TableDefinition<&str, &str> = TableDefinition::new("folders_by_path");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const ALBUM_ARTWORK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_artwork");
const SETTINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("settings");

const META_VERSION_KEY: &str = "version";

/// redb-backed store for folders, tracks, the artwork index and settings.
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub folders: usize,
    pub tracks: usize,
    pub album_artwork: usize,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        Self::with_db(Arc::new(db))
    }

    pub fn with_db(db: Arc<Database>) -> Result<Self, LibraryError> {
        let catalog = Self { db };
        catalog.init_tables()?;
        Ok(catalog)
    }

    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn stats(&self) -> Result<CatalogStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let folders = read_txn.open_table(FOLDERS_TABLE)?.len()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?.len()?;
        let album_artwork = read_txn.open_table(ALBUM_ARTWORK_TABLE)?.len()?;
        Ok(CatalogStats {
            folders: folders as usize,
            tracks: tracks as usize,
            album_artwork: album_artwork as usize,
        })
    }

    // Tracks and artwork rows are derived from disk and can be rebuilt, so a
    // version change only drops those. Folders and settings are kept.
    fn init_tables(&self) -> Result<(), LibraryError> {
        let version = read_version(&self.db)?;
        let write_txn = self.db.begin_write()?;
        match version {
            Some(version) if version == CATALOG_VERSION => {}
            Some(version) => {
                warn!("Catalog version mismatch ({}); dropping tracks and artwork index", version);
                clear_table(&write_txn, TRACKS_TABLE)?;
                clear_table(&write_txn, ALBUM_ARTWORK_TABLE)?;
            }
            None => info!("Creating catalog tables"),
        }
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&CATALOG_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
            write_txn.open_table(FOLDERS_TABLE)?;
            write_txn.open_table(FOLDERS_BY_PATH_TABLE)?;
            write_txn.open_table(TRACKS_TABLE)?;
            write_txn.open_table(ALBUM_ARTWORK_TABLE)?;
            write_txn.open_table(SETTINGS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl FolderRepository for Catalog {
    fn get_folders(&self) -> Result<Vec<Folder>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FOLDERS_TABLE)?;
        let mut folders = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let folder: Folder = decode_value(entry.1.value())?;
            folders.push(folder);
        }
        folders.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(folders)
    }

    fn get_folder_by_path(&self, path: &str) -> Result<Option<Folder>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let by_path = read_txn.open_table(FOLDERS_BY_PATH_TABLE)?;
        let folder_id = match by_path.get(path)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(FOLDERS_TABLE)?;
        let folder = match table.get(folder_id.as_str())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(folder)
    }

    fn add_folder(&self, folder: &Folder) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut by_path = write_txn.open_table(FOLDERS_BY_PATH_TABLE)?;
            if by_path.get(folder.path.as_str())?.is_some() {
                return Ok(false);
            }
            by_path.insert(folder.path.as_str(), folder.id.as_str())?;
            let mut table = write_txn.open_table(FOLDERS_TABLE)?;
            let bytes = encode_value(folder)?;
            table.insert(folder.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    fn delete_folder(&self, folder_id: &str) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FOLDERS_TABLE)?;
            let removed: Option<Folder> = match table.remove(folder_id)? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            if let Some(folder) = removed {
                let mut by_path = write_txn.open_table(FOLDERS_BY_PATH_TABLE)?;
                by_path.remove(folder.path.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn set_folder_show_in_collection(
        &self,
        folder_id: &str,
        show: bool,
    ) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FOLDERS_TABLE)?;
            let mut folder: Folder = match table.get(folder_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(()),
            };
            if folder.show_in_collection == show {
                return Ok(());
            }
            folder.show_in_collection = show;
            let bytes = encode_value(&folder)?;
            table.insert(folder_id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn set_all_folders_show_in_collection(&self, show: bool) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FOLDERS_TABLE)?;
            let mut changed = Vec::new();
            for entry in table.iter()? {
                let entry = entry?;
                let mut folder: Folder = decode_value(entry.1.value())?;
                if folder.show_in_collection != show {
                    folder.show_in_collection = show;
                    changed.push(folder);
                }
            }
            for folder in changed {
                let bytes = encode_value(&folder)?;
                table.insert(folder.id.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl TrackRepository for Catalog {
    fn get_tracks(&self) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_TABLE)?;
        let mut tracks = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let track: Track = decode_value(entry.1.value())?;
            tracks.push(track);
        }
        Ok(tracks)
    }

    fn get_track(&self, path: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_TABLE)?;
        let track = match table.get(path)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    fn apply_track_changes(
        &self,
        upserts: &[Track],
        removals: &[String],
    ) -> Result<(), LibraryError> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TRACKS_TABLE)?;
            for path in removals {
                table.remove(path.as_str())?;
            }
            for track in upserts {
                let bytes = encode_value(track)?;
                table.insert(track.path.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl AlbumArtworkRepository for Catalog {
    fn get_album_artwork(&self) -> Result<Vec<AlbumArtwork>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUM_ARTWORK_TABLE)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let artwork: AlbumArtwork = decode_value(entry.1.value())?;
            rows.push(artwork);
        }
        Ok(rows)
    }

    fn commit_artwork_changes(&self, changes: &ArtworkChangeSet) -> Result<(), LibraryError> {
        if changes.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut artwork_table = write_txn.open_table(ALBUM_ARTWORK_TABLE)?;
            for album_key in &changes.removed_album_keys {
                artwork_table.remove(album_key.as_str())?;
            }
            for artwork in &changes.upserted_artwork {
                let bytes = encode_value(artwork)?;
                artwork_table.insert(artwork.album_key.as_str(), bytes.as_slice())?;
            }

            let mut tracks_table = write_txn.open_table(TRACKS_TABLE)?;
            for track in &changes.updated_tracks {
                // The indexer may have removed or re-read the track since the
                // phase loaded it.
                let stored: Option<Track> = match tracks_table.get(track.path.as_str())? {
                    Some(value) => Some(decode_value(value.value())?),
                    None => None,
                };
                match stored {
                    Some(stored) if stored.date_file_modified == track.date_file_modified => {}
                    _ => continue,
                }
                let bytes = encode_value(track)?;
                tracks_table.insert(track.path.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl SettingsStore for Catalog {
    fn get_setting(&self, key: &str) -> Result<Option<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SETTINGS_TABLE)?;
        let value = table.get(key)?.map(|value| value.value().to_string());
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: Option<&str>) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS_TABLE)?;
            match value {
                Some(value) => {
                    table.insert(key, value)?;
                }
                None => {
                    table.remove(key)?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

pub fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::album_key;

    pub(crate) fn temp_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("collection.redb")).unwrap();
        (dir, catalog)
    }

    pub(crate) fn sample_track(path: &str, album: &str) -> Track {
        let artists = vec!["Artist".to_string()];
        Track {
            path: path.to_string(),
            file_name: common::file_stem(Path::new(path)),
            title: common::file_stem(Path::new(path)),
            album_key: album_key(Some(album), &[], &artists),
            artists,
            album_artists: Vec::new(),
            album: Some(album.to_string()),
            genres: Vec::new(),
            duration_ms: 1000,
            track_number: None,
            disc_number: None,
            year: None,
            file_size: 10,
            date_added: 1,
            date_file_created: 1,
            date_file_modified: 1,
            date_last_synced: 0,
            has_artwork: false,
            needs_album_artwork_indexing: true,
        }
    }

    #[test]
    fn folders_are_unique_by_path() {
        let (_dir, catalog) = temp_catalog();
        assert!(catalog
            .add_folder(&Folder::new("a".into(), "/music".into()))
            .unwrap());
        assert!(!catalog
            .add_folder(&Folder::new("b".into(), "/music".into()))
            .unwrap());

        let folders = catalog.get_folders().unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].id, "a");
        assert_eq!(catalog.get_folder_by_path("/music").unwrap().unwrap().id, "a");
    }

    #[test]
    fn deleting_a_folder_frees_its_path() {
        let (_dir, catalog) = temp_catalog();
        catalog
            .add_folder(&Folder::new("a".into(), "/music".into()))
            .unwrap();
        catalog.delete_folder("a").unwrap();
        assert!(catalog.get_folder_by_path("/music").unwrap().is_none());
        assert!(catalog.get_folders().unwrap().is_empty());
    }

    #[test]
    fn folder_visibility_round_trips() {
        let (_dir, catalog) = temp_catalog();
        catalog
            .add_folder(&Folder::new("a".into(), "/music".into()))
            .unwrap();
        catalog
            .add_folder(&Folder::new("b".into(), "/podcasts".into()))
            .unwrap();
        catalog.set_folder_show_in_collection("a", false).unwrap();
        assert!(!catalog.get_folder_by_path("/music").unwrap().unwrap().show_in_collection);

        catalog.set_all_folders_show_in_collection(true).unwrap();
        assert!(catalog
            .get_folders()
            .unwrap()
            .iter()
            .all(|folder| folder.show_in_collection));
    }

    #[test]
    fn artwork_changes_do_not_resurrect_removed_tracks() {
        let (_dir, catalog) = temp_catalog();
        let kept = sample_track("/music/a.mp3", "Album");
        let gone = sample_track("/music/b.mp3", "Album");
        catalog
            .apply_track_changes(&[kept.clone(), gone.clone()], &[])
            .unwrap();
        catalog
            .apply_track_changes(&[], &[gone.path.clone()])
            .unwrap();

        let mut synced_kept = kept.clone();
        synced_kept.has_artwork = true;
        let mut synced_gone = gone.clone();
        synced_gone.has_artwork = true;
        let changes = ArtworkChangeSet {
            removed_album_keys: Vec::new(),
            upserted_artwork: vec![AlbumArtwork {
                album_key: kept.album_key.clone().unwrap(),
                artwork_id: "album-1".into(),
                indexed_at: 5,
            }],
            updated_tracks: vec![synced_kept, synced_gone],
        };
        catalog.commit_artwork_changes(&changes).unwrap();

        assert!(catalog.get_track(&gone.path).unwrap().is_none());
        assert!(catalog.get_track(&kept.path).unwrap().unwrap().has_artwork);
        assert_eq!(catalog.stats().unwrap().album_artwork, 1);
    }

    #[test]
    fn artwork_changes_skip_tracks_modified_since_read() {
        let (_dir, catalog) = temp_catalog();
        let track = sample_track("/music/a.mp3", "Album");
        catalog.apply_track_changes(&[track.clone()], &[]).unwrap();

        let mut refilled = track.clone();
        refilled.date_file_modified = 50;
        catalog.apply_track_changes(&[refilled], &[]).unwrap();

        let mut stale = track.clone();
        stale.needs_album_artwork_indexing = false;
        catalog
            .commit_artwork_changes(&ArtworkChangeSet {
                updated_tracks: vec![stale],
                ..ArtworkChangeSet::default()
            })
            .unwrap();

        let stored = catalog.get_track(&track.path).unwrap().unwrap();
        assert!(stored.needs_album_artwork_indexing);
        assert_eq!(stored.date_file_modified, 50);
    }

    #[test]
    fn settings_can_be_cleared() {
        let (_dir, catalog) = temp_catalog();
        catalog.set_setting("opened_folder", Some("/music")).unwrap();
        assert_eq!(
            catalog.get_setting("opened_folder").unwrap().as_deref(),
            Some("/music")
        );
        catalog.set_setting("opened_folder", None).unwrap();
        assert!(catalog.get_setting("opened_folder").unwrap().is_none());
    }

    #[test]
    fn reopening_keeps_folders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.redb");
        {
            let catalog = Catalog::open(&path).unwrap();
            catalog
                .add_folder(&Folder::new("a".into(), "/music".into()))
                .unwrap();
        }
        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.stats().unwrap().folders, 1);
    }
}
