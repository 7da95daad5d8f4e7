//! Album artwork: the on-disk image store, extraction from tracks, and the
//! reconciler that keeps both consistent with the track catalog.

mod cache;
mod extractor;
mod reconciler;

pub use cache::{image_ext_from_mime, ArtworkStore, DiskArtworkCache};
pub use extractor::{find_folder_cover, ArtworkExtractor, TrackArtworkExtractor};
pub use reconciler::{
    ArtworkReconciler, Cancellation, Phase, ReconcileOutcome, ReconcilerState,
    ReconciliationReport,
};
