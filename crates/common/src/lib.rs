use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".flac", ".ogg", ".m4a", ".opus", ".wav"];
pub const DEFAULT_PLAYLIST_EXTENSIONS: &[&str] = &[".m3u", ".m3u8"];

const MULTI_VALUE_SEP: char = ';';
const KEY_SEP: char = '\x1f';

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub path: String,
    pub show_in_collection: bool,
}

impl Folder {
    pub fn new(id: String, path: String) -> Self {
        Self {
            id,
            path,
            show_in_collection: true,
        }
    }
}

/// One entry of a subfolder listing. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subfolder {
    pub path: String,
    pub is_go_to_parent: bool,
}

impl Subfolder {
    pub fn new(path: impl Into<String>, is_go_to_parent: bool) -> Self {
        Self {
            path: path.into(),
            is_go_to_parent,
        }
    }

    pub fn go_to_parent(path: impl Into<String>) -> Self {
        Self::new(path, true)
    }

    pub fn child(path: impl Into<String>) -> Self {
        Self::new(path, false)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub path: String,
    pub file_name: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album_artists: Vec<String>,
    pub album: Option<String>,
    pub genres: Vec<String>,
    pub duration_ms: u32,
    pub track_number: Option<u16>,
    pub disc_number: Option<u16>,
    pub year: Option<i32>,
    pub file_size: u64,
    pub date_added: u64,
    pub date_file_created: u64,
    pub date_file_modified: u64,
    pub date_last_synced: u64,
    pub album_key: Option<String>,
    pub has_artwork: bool,
    pub needs_album_artwork_indexing: bool,
}

impl Track {
    /// Artists in their stored, semicolon-joined form.
    pub fn raw_artists(&self) -> String {
        join_multi_value(&self.artists)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumArtwork {
    pub album_key: String,
    pub artwork_id: String,
    pub indexed_at: u64,
}

/// Content-addressed id for an artwork image.
pub fn artwork_id(bytes: &[u8]) -> String {
    format!("album-{}", blake3::hash(bytes).to_hex())
}

/// Groups tracks that share artwork. `None` when the album title is blank.
pub fn album_key(album: Option<&str>, album_artists: &[String], artists: &[String]) -> Option<String> {
    let title = album.map(str::trim).filter(|value| !value.is_empty())?;
    let source = if album_artists.is_empty() {
        artists
    } else {
        album_artists
    };
    let mut names: Vec<String> = source
        .iter()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    names.dedup();

    let mut key = title.to_lowercase();
    key.push(KEY_SEP);
    key.push_str(&names.join(";"));
    Some(key)
}

pub fn split_multi_value(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(MULTI_VALUE_SEP) {
        let trimmed = part.trim();
        if trimmed.is_empty() || out.iter().any(|v| v == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

pub fn join_multi_value(values: &[String]) -> String {
    values.join(";")
}

/// Extension including the leading dot, as found on disk. Empty when absent.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

pub fn has_extension_in<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    let ext = file_extension(path);
    if ext.is_empty() {
        return false;
    }
    extensions
        .iter()
        .any(|supported| supported.as_ref().eq_ignore_ascii_case(&ext))
}

pub fn is_supported_audio_file(path: &Path) -> bool {
    has_extension_in(path, SUPPORTED_AUDIO_EXTENSIONS)
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}

pub fn millis_since_epoch(time: SystemTime) -> u64 {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis();
    millis.min(u128::from(u64::MAX)) as u64
}

pub fn now_millis() -> u64 {
    millis_since_epoch(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extensions_match_case_insensitively() {
        assert!(is_supported_audio_file(Path::new("/music/a.MP3")));
        assert!(is_supported_audio_file(Path::new("/music/b.Flac")));
        assert!(is_supported_audio_file(Path::new("/music/c.opus")));
        assert!(!is_supported_audio_file(Path::new("/music/cover.jpg")));
        assert!(!is_supported_audio_file(Path::new("/music/README")));
    }

    #[test]
    fn playlist_defaults_do_not_contain_audio_containers() {
        assert!(has_extension_in(Path::new("list.M3U"), DEFAULT_PLAYLIST_EXTENSIONS));
        assert!(has_extension_in(Path::new("list.m3u8"), DEFAULT_PLAYLIST_EXTENSIONS));
        assert!(!has_extension_in(Path::new("song.flac"), DEFAULT_PLAYLIST_EXTENSIONS));
    }

    #[test]
    fn album_key_prefers_album_artists_and_normalizes_case() {
        let album_artists = vec!["The Band".to_string()];
        let artists = vec!["Singer".to_string(), "The Band".to_string()];
        let first = album_key(Some(" Debut "), &album_artists, &artists);
        let second = album_key(Some("DEBUT"), &["the band".to_string()], &[]);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn album_key_is_none_without_title() {
        assert_eq!(album_key(None, &[], &["x".to_string()]), None);
        assert_eq!(album_key(Some("   "), &[], &["x".to_string()]), None);
    }

    #[test]
    fn multi_values_split_and_join() {
        let values = split_multi_value("Alice; Bob ;;Alice");
        assert_eq!(values, vec!["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(join_multi_value(&values), "Alice;Bob");
    }

    #[test]
    fn artwork_ids_are_content_addressed() {
        assert_eq!(artwork_id(b"abc"), artwork_id(b"abc"));
        assert_ne!(artwork_id(b"abc"), artwork_id(b"abd"));
        assert!(artwork_id(b"abc").starts_with("album-"));
    }
}
