use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use common::{DEFAULT_PLAYLIST_EXTENSIONS, SUPPORTED_AUDIO_EXTENSIONS};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub version: u32,
    pub index_path: String,
    pub artwork_path: String,
    pub folders: Vec<String>,
    pub index_on_startup: bool,
    pub reindex_interval_secs: u64,
    pub playlist_extensions: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            index_path: "collection.redb".to_string(),
            artwork_path: "artwork".to_string(),
            folders: Vec::new(),
            index_on_startup: true,
            reindex_interval_secs: 60 * 60,
            playlist_extensions: DEFAULT_PLAYLIST_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("COLLECTION_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Returns the config and whether a default one was just written.
pub fn load_or_create_config(path: &Path) -> Result<(IndexerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: IndexerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = "collection.redb".to_string();
        }
        if config.artwork_path.trim().is_empty() {
            config.artwork_path = "artwork".to_string();
        }
        config.folders = config
            .folders
            .iter()
            .map(|folder| folder.trim().to_string())
            .filter(|folder| !folder.is_empty())
            .collect();
        config.playlist_extensions = normalize_playlist_extensions(&config.playlist_extensions);
        return Ok((config, false));
    }

    let config = IndexerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &IndexerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

/// Lowercases, adds the leading dot and drops audio formats, which are
/// never playlists.
fn normalize_playlist_extensions(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let trimmed = value.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            continue;
        }
        let ext = if trimmed.starts_with('.') {
            trimmed
        } else {
            format!(".{}", trimmed)
        };
        if SUPPORTED_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            warn!("Ignoring audio extension {} in playlist_extensions", ext);
            continue;
        }
        if !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert_eq!(config, IndexerConfig::default());
        assert!(path.exists());

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again, config);
    }

    #[test]
    fn partial_files_are_completed_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 0\nindex_path: ''\nfolders: ['/music', '  ', ' /podcasts ']\nplaylist_extensions: [m3u, .flac, .M3U8, .m3u]\n",
        )
        .unwrap();

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.index_path, "collection.redb");
        assert_eq!(config.artwork_path, "artwork");
        assert_eq!(config.folders, vec!["/music", "/podcasts"]);
        assert_eq!(config.playlist_extensions, vec![".m3u", ".m3u8"]);
        assert_eq!(config.reindex_interval_secs, 3600);
    }

    #[test]
    fn relative_paths_resolve_next_to_the_config() {
        let config_path = Path::new("/etc/collection/config.yaml");
        assert_eq!(
            resolve_path(config_path, "collection.redb"),
            PathBuf::from("/etc/collection/collection.redb")
        );
        assert_eq!(resolve_path(config_path, "/data/art"), PathBuf::from("/data/art"));
        assert_eq!(
            resolve_path(Path::new("config.yaml"), "artwork"),
            PathBuf::from("./artwork")
        );
    }
}
