use std::path::{Path, PathBuf};
use std::sync::Arc;

mod artwork;
mod browser;
mod catalog;
mod error;
mod events;
mod folders;
mod fs;
mod indexer;
mod navigator;
mod repository;
mod scanner;

pub use artwork::{
    find_folder_cover, image_ext_from_mime, ArtworkExtractor, ArtworkReconciler, ArtworkStore,
    Cancellation, DiskArtworkCache, Phase, ReconcileOutcome, ReconcilerState,
    ReconciliationReport, TrackArtworkExtractor,
};
pub use browser::{BrowseView, FolderBrowser, OPENED_FOLDER_KEY, OPENED_SUBFOLDER_KEY};
pub use catalog::{open_or_create_db, Catalog, CatalogStats};
pub use error::LibraryError;
pub use events::{CollectionEvent, CollectionEvents};
pub use folders::{normalize_folder_path, AddFolderOutcome, FolderService};
pub use fs::{FileInfo, FileSystem, LocalFileSystem};
pub use indexer::{CollectionIndexer, IndexingStats};
pub use navigator::SubfolderNavigator;
pub use repository::{
    AlbumArtworkRepository, ArtworkChangeSet, FolderRepository, SettingsStore, TrackRepository,
};
pub use scanner::{MetadataFiller, ScanFailure, TagFiller, TrackScan, TrackScanner};

/// The whole pipeline wired against one catalog file and one artwork
/// directory, with the real filesystem and tag reader.
#[derive(Clone)]
pub struct Collection {
    catalog: Catalog,
    artwork_root: PathBuf,
    events: CollectionEvents,
    folders: FolderService,
    navigator: SubfolderNavigator,
    scanner: TrackScanner,
    indexer: Arc<CollectionIndexer>,
    reconciler: Arc<ArtworkReconciler>,
}

impl Collection {
    pub fn open(index_path: &Path, artwork_root: &Path) -> Result<Self, LibraryError> {
        let catalog = Catalog::open(index_path)?;
        Ok(Self::with_catalog(catalog, artwork_root))
    }

    pub fn with_catalog(catalog: Catalog, artwork_root: &Path) -> Self {
        let events = CollectionEvents::new();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem);
        let filler: Arc<dyn MetadataFiller> = Arc::new(TagFiller::new(Arc::clone(&fs)));
        let folders = FolderService::new(Arc::new(catalog.clone()), events.clone());
        let navigator = SubfolderNavigator::new(Arc::clone(&fs));
        let scanner = TrackScanner::new(Arc::clone(&fs), Arc::clone(&filler));
        let indexer = CollectionIndexer::new(
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
            fs,
            filler,
            events.clone(),
        );
        let reconciler = ArtworkReconciler::new(
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
            Arc::new(DiskArtworkCache::new(artwork_root)),
            Arc::new(TrackArtworkExtractor),
            events.clone(),
        );
        Self {
            catalog,
            artwork_root: artwork_root.to_path_buf(),
            events,
            folders,
            navigator,
            scanner,
            indexer: Arc::new(indexer),
            reconciler: Arc::new(reconciler),
        }
    }

    pub fn with_playlist_extensions(mut self, extensions: Vec<String>) -> Self {
        self.scanner = self.scanner.with_playlist_extensions(extensions);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn artwork_cache(&self) -> DiskArtworkCache {
        DiskArtworkCache::new(&self.artwork_root)
    }

    pub fn events(&self) -> &CollectionEvents {
        &self.events
    }

    pub fn folders(&self) -> &FolderService {
        &self.folders
    }

    pub fn navigator(&self) -> &SubfolderNavigator {
        &self.navigator
    }

    pub fn scanner(&self) -> &TrackScanner {
        &self.scanner
    }

    pub fn browser(&self) -> FolderBrowser {
        FolderBrowser::new(
            Arc::new(self.catalog.clone()),
            Arc::new(self.catalog.clone()),
            self.navigator.clone(),
            self.scanner.clone(),
        )
    }

    pub fn indexer(&self) -> Arc<CollectionIndexer> {
        Arc::clone(&self.indexer)
    }

    pub fn reconciler(&self) -> Arc<ArtworkReconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn stats(&self) -> Result<CatalogStats, LibraryError> {
        self.catalog.stats()
    }
}
