use std::path::{Path, MAIN_SEPARATOR};
use std::sync::Arc;

use common::Folder;
use tracing::info;
use uuid::Uuid;

use crate::events::{CollectionEvent, CollectionEvents};
use crate::repository::FolderRepository;
use crate::LibraryError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddFolderOutcome {
    Added(Folder),
    AlreadyAdded(Folder),
}

/// Watched top-level folders. Owns no scanning logic.
#[derive(Clone)]
pub struct FolderService {
    repository: Arc<dyn FolderRepository>,
    events: CollectionEvents,
}

impl FolderService {
    pub fn new(repository: Arc<dyn FolderRepository>, events: CollectionEvents) -> Self {
        Self { repository, events }
    }

    pub fn add_folder(&self, path: &str) -> Result<AddFolderOutcome, LibraryError> {
        let path = normalize_folder_path(path)?;
        if let Some(existing) = self.repository.get_folder_by_path(&path)? {
            return Ok(self.already_added(existing));
        }

        let folder = Folder::new(Uuid::new_v4().to_string(), path);
        if !self.repository.add_folder(&folder)? {
            // Another writer stored the path after our lookup.
            let existing = self
                .repository
                .get_folder_by_path(&folder.path)?
                .unwrap_or(folder);
            return Ok(self.already_added(existing));
        }
        info!(
            component = "FolderService",
            operation = "add_folder",
            "Added folder with path {:?}",
            folder.path
        );
        self.events.emit(CollectionEvent::FoldersChanged);
        Ok(AddFolderOutcome::Added(folder))
    }

    fn already_added(&self, existing: Folder) -> AddFolderOutcome {
        info!(
            component = "FolderService",
            operation = "add_folder",
            "Folder with path {:?} was already added",
            existing.path
        );
        self.events.emit(CollectionEvent::FolderAlreadyAdded {
            path: existing.path.clone(),
        });
        AddFolderOutcome::AlreadyAdded(existing)
    }

    pub fn get_folders(&self) -> Result<Vec<Folder>, LibraryError> {
        self.repository.get_folders()
    }

    pub fn get_folder_by_path(&self, path: &str) -> Result<Option<Folder>, LibraryError> {
        let path = normalize_folder_path(path)?;
        self.repository.get_folder_by_path(&path)
    }

    /// Removes the folder from the catalog only; nothing on disk is touched.
    pub fn delete_folder(&self, folder: &Folder) -> Result<(), LibraryError> {
        self.repository.delete_folder(&folder.id)?;
        info!(
            component = "FolderService",
            operation = "delete_folder",
            "Deleted folder with path {:?}",
            folder.path
        );
        self.events.emit(CollectionEvent::FoldersChanged);
        Ok(())
    }

    pub fn set_folder_visibility(&self, folder: &Folder, show: bool) -> Result<(), LibraryError> {
        self.repository
            .set_folder_show_in_collection(&folder.id, show)?;
        info!(
            component = "FolderService",
            operation = "set_folder_visibility",
            "Set folder visibility: id={}, path={:?}, show_in_collection={}",
            folder.id,
            folder.path,
            show
        );
        Ok(())
    }

    pub fn set_all_folders_visible(&self) -> Result<(), LibraryError> {
        self.repository.set_all_folders_show_in_collection(true)?;
        info!(
            component = "FolderService",
            operation = "set_all_folders_visible",
            "Set all folders visible"
        );
        Ok(())
    }
}

/// Trims whitespace and trailing separators so `/music/` and `/music`
/// dedupe to the same folder.
pub fn normalize_folder_path(path: &str) -> Result<String, LibraryError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::InvalidPath(path.to_string()));
    }
    let mut normalized = trimmed.to_string();
    while normalized.len() > 1
        && (normalized.ends_with(MAIN_SEPARATOR) || normalized.ends_with('/'))
        && Path::new(&normalized).parent().is_some()
    {
        normalized.pop();
    }
    Ok(normalized)
}
