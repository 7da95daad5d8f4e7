use std::path::Path;
use std::sync::Arc;

use common::{album_key, file_stem, now_millis, path_string, Track};
use metadata::read_tags;
use tracing::{debug, error};

use crate::fs::FileSystem;
use crate::LibraryError;

/// Produces a filled track record for one file. Must be safe to call
/// repeatedly for the same path.
pub trait MetadataFiller: Send + Sync {
    fn fill_metadata(&self, path: &Path) -> Result<Track, LibraryError>;
}

/// Reads embedded tags with lofty plus size and dates from the filesystem.
#[derive(Clone)]
pub struct TagFiller {
    fs: Arc<dyn FileSystem>,
}

impl TagFiller {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl MetadataFiller for TagFiller {
    fn fill_metadata(&self, path: &Path) -> Result<Track, LibraryError> {
        let info = self.fs.file_info(path)?;
        let tag = read_tags(path)?;

        let key = album_key(tag.album.as_deref(), &tag.album_artists, &tag.artists);
        Ok(Track {
            path: path_string(path),
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            title: tag.title.unwrap_or_else(|| file_stem(path)),
            artists: tag.artists,
            album_artists: tag.album_artists,
            album: tag.album,
            genres: tag.genres,
            duration_ms: tag.duration_ms.unwrap_or(0),
            track_number: tag.track_no,
            disc_number: tag.disc_no,
            year: tag.year,
            file_size: info.size,
            date_added: now_millis(),
            date_file_created: info.created_ms,
            date_file_modified: info.modified_ms,
            date_last_synced: 0,
            album_key: key,
            has_artwork: false,
            needs_album_artwork_indexing: true,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanFailure {
    pub path: String,
    pub error: String,
}

#[derive(Clone, Debug, Default)]
pub struct TrackScan {
    pub tracks: Vec<Track>,
    pub failures: Vec<ScanFailure>,
}

/// Non-recursive scan of one directory for supported audio files.
#[derive(Clone)]
pub struct TrackScanner {
    fs: Arc<dyn FileSystem>,
    filler: Arc<dyn MetadataFiller>,
    audio_extensions: Vec<String>,
    playlist_extensions: Vec<String>,
}

impl TrackScanner {
    pub fn new(fs: Arc<dyn FileSystem>, filler: Arc<dyn MetadataFiller>) -> Self {
        Self {
            fs,
            filler,
            audio_extensions: common::SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            playlist_extensions: common::DEFAULT_PLAYLIST_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    pub fn with_playlist_extensions(mut self, extensions: Vec<String>) -> Self {
        self.playlist_extensions = extensions;
        self
    }

    /// Playlist files directly inside `directory`, in listing order.
    pub fn scan_playlists(&self, directory: &str) -> Vec<String> {
        let directory = Path::new(directory);
        if directory.as_os_str().is_empty() || !self.fs.path_exists(directory) {
            return Vec::new();
        }
        match self.fs.files_in_directory(directory) {
            Ok(files) => files
                .iter()
                .filter(|file| {
                    matches_extension(&self.fs.file_extension(file), &self.playlist_extensions)
                })
                .map(|file| path_string(file))
                .collect(),
            Err(err) => {
                debug!("Could not list files in {:?}: {}", directory, err);
                Vec::new()
            }
        }
    }

    pub fn scan_tracks(&self, directory: &str) -> Vec<Track> {
        self.scan_tracks_with_report(directory).tracks
    }

    /// Best effort: a file whose metadata cannot be read is reported in
    /// `failures` and contributes no track; its siblings are still scanned.
    pub fn scan_tracks_with_report(&self, directory: &str) -> TrackScan {
        let mut scan = TrackScan::default();
        if directory.trim().is_empty() {
            return scan;
        }
        let directory = Path::new(directory);
        if !self.fs.path_exists(directory) {
            return scan;
        }

        let files = match self.fs.files_in_directory(directory) {
            Ok(files) => files,
            Err(err) => {
                // Vanished between the existence check and the listing.
                debug!("Could not list files in {:?}: {}", directory, err);
                return scan;
            }
        };

        for file in files {
            if !self.is_supported(&file) {
                continue;
            }
            match self.filler.fill_metadata(&file) {
                Ok(track) => scan.tracks.push(track),
                Err(err) => {
                    error!(
                        component = "TrackScanner",
                        operation = "scan_tracks",
                        "Could not read metadata for {:?}: {}",
                        file,
                        err
                    );
                    scan.failures.push(ScanFailure {
                        path: path_string(&file),
                        error: err.to_string(),
                    });
                }
            }
        }

        scan
    }

    fn is_supported(&self, file: &Path) -> bool {
        matches_extension(&self.fs.file_extension(file), &self.audio_extensions)
    }
}

fn matches_extension(ext: &str, extensions: &[String]) -> bool {
    !ext.is_empty()
        && extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Counts error-level events.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Fills tracks from the file name; files whose stem starts with
    /// "corrupt" fail.
    pub(crate) struct NameFiller;

    impl MetadataFiller for NameFiller {
        fn fill_metadata(&self, path: &Path) -> Result<Track, LibraryError> {
            let stem = file_stem(path);
            if stem.starts_with("corrupt") {
                return Err(LibraryError::InvalidPath(path_string(path)));
            }
            let info = LocalFileSystem.file_info(path)?;
            let artists = vec!["Artist".to_string()];
            let album = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string());
            Ok(Track {
                path: path_string(path),
                file_name: stem.clone(),
                title: stem,
                album_key: album_key(album.as_deref(), &[], &artists),
                artists,
                album_artists: Vec::new(),
                album,
                genres: Vec::new(),
                duration_ms: 0,
                track_number: None,
                disc_number: None,
                year: None,
                file_size: info.size,
                date_added: now_millis(),
                date_file_created: info.created_ms,
                date_file_modified: info.modified_ms,
                date_last_synced: 0,
                has_artwork: false,
                needs_album_artwork_indexing: true,
            })
        }
    }

    fn scanner() -> TrackScanner {
        TrackScanner::new(Arc::new(LocalFileSystem), Arc::new(NameFiller))
    }

    #[test]
    fn one_corrupt_file_does_not_abort_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1.mp3", "2.flac", "3.ogg", "4.m4a", "5.wav", "corrupt.mp3"] {
            fs::write(dir.path().join(name), b"data").unwrap();
        }

        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
        let scan = tracing::subscriber::with_default(subscriber, || {
            scanner().scan_tracks_with_report(&path_string(dir.path()))
        });
        assert_eq!(scan.tracks.len(), 5);
        assert_eq!(scan.failures.len(), 1);
        assert!(scan.failures[0].path.ends_with("corrupt.mp3"));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_files_and_subfolders_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("song.MP3"), b"data").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"data").unwrap();
        fs::write(dir.path().join("list.m3u"), b"data").unwrap();
        fs::write(dir.path().join("noext"), b"data").unwrap();
        fs::create_dir(dir.path().join("disc2")).unwrap();
        fs::write(dir.path().join("disc2/nested.mp3"), b"data").unwrap();

        let tracks = scanner().scan_tracks(&path_string(dir.path()));
        let names: HashSet<String> = tracks.into_iter().map(|t| t.file_name).collect();
        assert_eq!(names, HashSet::from(["song".to_string()]));
    }

    #[test]
    fn blank_or_missing_directories_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scanner().scan_tracks("").is_empty());
        assert!(scanner().scan_tracks("   ").is_empty());
        assert!(scanner()
            .scan_tracks(&path_string(&dir.path().join("offline")))
            .is_empty());
    }

    #[test]
    fn playlists_follow_the_configured_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mix.M3U"), b"#EXTM3U").unwrap();
        fs::write(dir.path().join("road.m3u8"), b"#EXTM3U").unwrap();
        fs::write(dir.path().join("song.flac"), b"data").unwrap();
        let root = path_string(dir.path());

        let mut found = scanner().scan_playlists(&root);
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("mix.M3U"));

        let only_m3u = scanner().with_playlist_extensions(vec![".m3u".into()]);
        assert_eq!(only_m3u.scan_playlists(&root).len(), 1);
        assert!(scanner().scan_playlists("").is_empty());
    }

    #[test]
    fn tag_filler_fails_on_garbage_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.flac");
        fs::write(&path, b"not a flac stream").unwrap();
        let filler = TagFiller::new(Arc::new(LocalFileSystem));
        assert!(filler.fill_metadata(&path).is_err());

        let scanner = TrackScanner::new(Arc::new(LocalFileSystem), Arc::new(filler));
        let scan = scanner.scan_tracks_with_report(&path_string(dir.path()));
        assert!(scan.tracks.is_empty());
        assert_eq!(scan.failures.len(), 1);
    }
}
