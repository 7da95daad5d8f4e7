use std::path::Path;
use std::sync::Arc;

use common::{Folder, Subfolder, Track};
use tracing::warn;

use crate::navigator::SubfolderNavigator;
use crate::repository::{FolderRepository, SettingsStore};
use crate::scanner::TrackScanner;
use crate::LibraryError;

pub const OPENED_FOLDER_KEY: &str = "opened_folder";
pub const OPENED_SUBFOLDER_KEY: &str = "opened_subfolder";

/// Everything needed to render one folder browsing step.
#[derive(Clone, Debug, PartialEq)]
pub struct BrowseView {
    pub folder: Folder,
    pub subfolders: Vec<Subfolder>,
    pub opened_subfolder_path: String,
    pub breadcrumbs: Vec<Subfolder>,
    pub tracks: Vec<Track>,
    pub playlists: Vec<String>,
}

/// Folder browsing session. The last opened folder and subfolder are kept
/// in the settings store so a later session can resume there.
pub struct FolderBrowser {
    folders: Arc<dyn FolderRepository>,
    settings: Arc<dyn SettingsStore>,
    navigator: SubfolderNavigator,
    scanner: TrackScanner,
}

impl FolderBrowser {
    pub fn new(
        folders: Arc<dyn FolderRepository>,
        settings: Arc<dyn SettingsStore>,
        navigator: SubfolderNavigator,
        scanner: TrackScanner,
    ) -> Self {
        Self {
            folders,
            settings,
            navigator,
            scanner,
        }
    }

    pub fn open_folder(&self, folder: &Folder) -> BrowseView {
        let subfolders = self.navigator.get_subfolders(Some(folder), None);
        self.view(folder, subfolders, folder.path.clone())
    }

    /// Opens `subfolder` below `folder`; a "go up" entry opens its parent.
    pub fn open_subfolder(&self, folder: &Folder, subfolder: &Subfolder) -> BrowseView {
        let subfolders = self.navigator.get_subfolders(Some(folder), Some(subfolder));
        let opened = subfolders
            .iter()
            .find(|entry| entry.is_go_to_parent)
            .map(|entry| entry.path.clone())
            .unwrap_or_else(|| folder.path.clone());
        self.view(folder, subfolders, opened)
    }

    /// Reopens the persisted folder and subfolder. Falls back to the first
    /// catalog folder when the persisted one was removed; `None` when the
    /// catalog has no folders.
    pub fn restore(&self) -> Result<Option<BrowseView>, LibraryError> {
        let folder = match self.setting(OPENED_FOLDER_KEY) {
            Some(path) => self.folders.get_folder_by_path(&path)?,
            None => None,
        };
        let folder = match folder {
            Some(folder) => folder,
            None => match self.folders.get_folders()?.into_iter().next() {
                Some(folder) => folder,
                None => return Ok(None),
            },
        };

        let view = match self.setting(OPENED_SUBFOLDER_KEY) {
            Some(path) if path != folder.path && Path::new(&path).starts_with(&folder.path) => {
                self.open_subfolder(&folder, &Subfolder::child(path))
            }
            _ => self.open_folder(&folder),
        };
        Ok(Some(view))
    }

    fn view(&self, folder: &Folder, subfolders: Vec<Subfolder>, opened: String) -> BrowseView {
        let breadcrumbs = self.navigator.get_subfolder_breadcrumbs(folder, &opened);
        let tracks = self.scanner.scan_tracks(&opened);
        let playlists = self.scanner.scan_playlists(&opened);
        self.remember(folder, &opened);
        BrowseView {
            folder: folder.clone(),
            subfolders,
            opened_subfolder_path: opened,
            breadcrumbs,
            tracks,
            playlists,
        }
    }

    fn setting(&self, key: &str) -> Option<String> {
        match self.settings.get_setting(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    component = "FolderBrowser",
                    operation = "restore",
                    "Could not read setting {}: {}",
                    key,
                    err
                );
                None
            }
        }
    }

    fn remember(&self, folder: &Folder, opened: &str) {
        let result = self
            .settings
            .set_setting(OPENED_FOLDER_KEY, Some(&folder.path))
            .and_then(|_| self.settings.set_setting(OPENED_SUBFOLDER_KEY, Some(opened)));
        if let Err(err) = result {
            warn!(
                component = "FolderBrowser",
                operation = "remember",
                "Could not persist opened folder: {}",
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::temp_catalog;
    use crate::catalog::Catalog;
    use crate::fs::LocalFileSystem;
    use crate::scanner::tests::NameFiller;
    use common::path_string;
    use std::fs;

    fn browser(catalog: &Catalog) -> FolderBrowser {
        let fs = Arc::new(LocalFileSystem);
        FolderBrowser::new(
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
            SubfolderNavigator::new(fs.clone()),
            TrackScanner::new(fs, Arc::new(NameFiller)),
        )
    }

    fn music(dir: &Path) -> Folder {
        let root = dir.join("music");
        fs::create_dir_all(root.join("rock/70s")).unwrap();
        fs::write(root.join("top.mp3"), b"x").unwrap();
        fs::write(root.join("rock/a.mp3"), b"x").unwrap();
        fs::write(root.join("rock/b.flac"), b"x").unwrap();
        fs::write(root.join("rock/best.m3u"), b"#EXTM3U").unwrap();
        Folder::new("music".into(), path_string(&root))
    }

    #[test]
    fn opening_a_folder_lists_root_tracks() {
        let (dir, catalog) = temp_catalog();
        let folder = music(dir.path());
        let view = browser(&catalog).open_folder(&folder);

        assert_eq!(view.opened_subfolder_path, folder.path);
        assert_eq!(view.breadcrumbs, vec![Subfolder::child(folder.path.clone())]);
        assert_eq!(view.subfolders.len(), 1);
        assert_eq!(view.tracks.len(), 1);
        assert_eq!(
            catalog.get_setting(OPENED_FOLDER_KEY).unwrap(),
            Some(folder.path.clone())
        );
    }

    #[test]
    fn opening_a_subfolder_follows_the_go_up_entry() {
        let (dir, catalog) = temp_catalog();
        let folder = music(dir.path());
        let rock = format!("{}/rock", folder.path);
        let view = browser(&catalog).open_subfolder(&folder, &Subfolder::child(rock.clone()));

        assert_eq!(view.opened_subfolder_path, rock);
        assert_eq!(view.breadcrumbs.len(), 2);
        assert_eq!(view.tracks.len(), 2);
        assert_eq!(view.playlists.len(), 1);
        assert_eq!(view.subfolders[0], Subfolder::go_to_parent(rock.clone()));
        assert_eq!(
            catalog.get_setting(OPENED_SUBFOLDER_KEY).unwrap(),
            Some(rock)
        );
    }

    #[test]
    fn restore_resumes_the_last_subfolder() {
        let (dir, catalog) = temp_catalog();
        let folder = music(dir.path());
        catalog.add_folder(&folder).unwrap();
        let rock = format!("{}/rock", folder.path);
        browser(&catalog).open_subfolder(&folder, &Subfolder::child(rock.clone()));

        let view = browser(&catalog).restore().unwrap().unwrap();
        assert_eq!(view.folder, folder);
        assert_eq!(view.opened_subfolder_path, rock);
    }

    #[test]
    fn restore_ignores_removed_folders_and_foreign_paths() {
        let (dir, catalog) = temp_catalog();
        let folder = music(dir.path());
        catalog.add_folder(&folder).unwrap();
        catalog.set_setting(OPENED_FOLDER_KEY, Some("/gone")).unwrap();
        catalog
            .set_setting(OPENED_SUBFOLDER_KEY, Some("/gone/rock"))
            .unwrap();

        let view = browser(&catalog).restore().unwrap().unwrap();
        assert_eq!(view.folder, folder);
        assert_eq!(view.opened_subfolder_path, folder.path);
    }

    #[test]
    fn restore_without_folders_is_none() {
        let (_dir, catalog) = temp_catalog();
        assert!(browser(&catalog).restore().unwrap().is_none());
    }
}
