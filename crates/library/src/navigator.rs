use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{path_string, Folder, Subfolder};
use tracing::{debug, error};

use crate::fs::FileSystem;

/// Builds subfolder listings and breadcrumb trails below a root folder.
#[derive(Clone)]
pub struct SubfolderNavigator {
    fs: Arc<dyn FileSystem>,
}

impl SubfolderNavigator {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Lists the children of `root_folder`, or of the directory selected by
    /// `current`. A "go up" entry carrying the browsed directory comes first
    /// whenever that directory is not the root itself. Listing failures
    /// degrade to fewer entries and never propagate.
    pub fn get_subfolders(
        &self,
        root_folder: Option<&Folder>,
        current: Option<&Subfolder>,
    ) -> Vec<Subfolder> {
        let root_folder = match root_folder {
            Some(folder) => folder,
            None => return Vec::new(),
        };
        let root_path = Path::new(&root_folder.path);

        let mut subfolders = Vec::new();
        let directory_to_browse = match current {
            None => root_path.to_path_buf(),
            Some(subfolder) => {
                let current_path = Path::new(&subfolder.path);
                if !self.fs.path_exists(current_path) {
                    debug!("Subfolder {:?} no longer exists", subfolder.path);
                    return subfolders;
                }
                let directory = if subfolder.is_go_to_parent {
                    self.fs
                        .parent_directory(current_path)
                        .unwrap_or_else(|| current_path.to_path_buf())
                } else {
                    current_path.to_path_buf()
                };
                // Never climb above the root folder.
                if !directory.starts_with(root_path) {
                    root_path.to_path_buf()
                } else {
                    directory
                }
            }
        };

        if current.is_some() && directory_to_browse != root_path {
            subfolders.push(Subfolder::go_to_parent(path_string(&directory_to_browse)));
        }

        for directory in self.child_directories(&directory_to_browse) {
            subfolders.push(Subfolder::child(path_string(&directory)));
        }

        subfolders
    }

    /// Trail from the root folder down to `path`, root first. Falls back to
    /// the root alone when `path` lies outside of it.
    pub fn get_subfolder_breadcrumbs(&self, root_folder: &Folder, path: &str) -> Vec<Subfolder> {
        let root_path = Path::new(&root_folder.path);
        let target = Path::new(path);
        if !target.starts_with(root_path) {
            return vec![Subfolder::child(root_folder.path.clone())];
        }

        let mut crumbs = Vec::new();
        let mut current = Some(target);
        while let Some(directory) = current {
            if directory == root_path {
                break;
            }
            crumbs.push(Subfolder::child(path_string(directory)));
            current = directory.parent();
        }
        crumbs.push(Subfolder::child(root_folder.path.clone()));
        crumbs.reverse();
        crumbs
    }

    fn child_directories(&self, directory: &Path) -> Vec<PathBuf> {
        if !self.fs.path_exists(directory) {
            return Vec::new();
        }
        match self.fs.directories_in_directory(directory) {
            Ok(directories) => directories,
            Err(err) => {
                error!(
                    component = "SubfolderNavigator",
                    operation = "get_subfolders",
                    "Could not get directories for {:?}: {}",
                    directory,
                    err
                );
                Vec::new()
            }
        }
    }
}
