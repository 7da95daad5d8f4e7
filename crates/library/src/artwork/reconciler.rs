use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::{artwork_id, now_millis, AlbumArtwork, Track};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::artwork::{ArtworkExtractor, ArtworkStore};
use crate::events::{CollectionEvent, CollectionEvents};
use crate::repository::{AlbumArtworkRepository, ArtworkChangeSet, TrackRepository};
use crate::LibraryError;

const COMPONENT: &str = "AlbumArtworkReconciler";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    RemoveOrphanedArtwork,
    ClearStaleArtwork,
    AddMissingArtwork,
    RemoveOrphanedFiles,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::RemoveOrphanedArtwork,
        Phase::ClearStaleArtwork,
        Phase::AddMissingArtwork,
        Phase::RemoveOrphanedFiles,
    ];

    pub fn number(self) -> usize {
        match self {
            Phase::RemoveOrphanedArtwork => 1,
            Phase::ClearStaleArtwork => 2,
            Phase::AddMissingArtwork => 3,
            Phase::RemoveOrphanedFiles => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::RemoveOrphanedArtwork => "remove_orphaned_artwork",
            Phase::ClearStaleArtwork => "clear_stale_artwork",
            Phase::AddMissingArtwork => "add_missing_artwork",
            Phase::RemoveOrphanedFiles => "remove_orphaned_files",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} ({})", self.number(), self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Running(Phase),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub orphaned_rows_removed: usize,
    pub tracks_flagged: usize,
    pub rows_cleared: usize,
    pub artwork_added: usize,
    pub tracks_synced: usize,
    pub tracks_failed: usize,
    pub files_deleted: usize,
    pub duration_ms: u64,
}

impl ReconciliationReport {
    /// Whether the pass mutated the index, the tracks or the files.
    pub fn has_changes(&self) -> bool {
        self.orphaned_rows_removed > 0
            || self.tracks_flagged > 0
            || self.rows_cleared > 0
            || self.artwork_added > 0
            || self.tracks_synced > 0
            || self.files_deleted > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed(ReconciliationReport),
    /// Stopped at a phase boundary after `completed_phases` phases.
    Cancelled { completed_phases: usize },
    AlreadyRunning,
}

/// Shared stop flag, observed between phases only.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Brings the artwork index and the image files back into agreement with
/// the track catalog.
///
/// A pass runs four phases in order and commits each phase's index changes
/// in one transaction. Per-track extraction failures leave the track flagged
/// for the next pass; any other error aborts the pass without emitting
/// [`CollectionEvent::ReconciliationCompleted`]. Only one pass runs at a
/// time.
pub struct ArtworkReconciler {
    tracks: Arc<dyn TrackRepository>,
    artwork: Arc<dyn AlbumArtworkRepository>,
    store: Arc<dyn ArtworkStore>,
    extractor: Arc<dyn ArtworkExtractor>,
    events: CollectionEvents,
    state: RwLock<ReconcilerState>,
    pass: Mutex<()>,
}

impl ArtworkReconciler {
    pub fn new(
        tracks: Arc<dyn TrackRepository>,
        artwork: Arc<dyn AlbumArtworkRepository>,
        store: Arc<dyn ArtworkStore>,
        extractor: Arc<dyn ArtworkExtractor>,
        events: CollectionEvents,
    ) -> Self {
        Self {
            tracks,
            artwork,
            store,
            extractor,
            events,
            state: RwLock::new(ReconcilerState::Idle),
            pass: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ReconcilerState {
        *self.state.read()
    }

    pub fn reconcile(&self, cancel: &Cancellation) -> Result<ReconcileOutcome, LibraryError> {
        let _pass = match self.pass.try_lock() {
            Some(guard) => guard,
            None => {
                debug!("Reconciliation already running; skipping");
                return Ok(ReconcileOutcome::AlreadyRunning);
            }
        };

        let started = Instant::now();
        info!(component = COMPONENT, operation = "reconcile", "Reconciliation started");
        let mut report = ReconciliationReport::default();
        let result = self.run_phases(cancel, &mut report);
        *self.state.write() = ReconcilerState::Idle;

        match result {
            Ok(None) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    component = COMPONENT,
                    operation = "reconcile",
                    "Reconciliation completed in {} ms",
                    report.duration_ms
                );
                self.events.emit(CollectionEvent::ReconciliationCompleted {
                    duration_ms: report.duration_ms,
                });
                Ok(ReconcileOutcome::Completed(report))
            }
            Ok(Some(completed_phases)) => {
                info!(
                    component = COMPONENT,
                    operation = "reconcile",
                    "Reconciliation cancelled after {} of 4 phases",
                    completed_phases
                );
                Ok(ReconcileOutcome::Cancelled { completed_phases })
            }
            Err(err) => {
                error!(
                    component = COMPONENT,
                    operation = "reconcile",
                    "Reconciliation aborted after {} ms: {}",
                    started.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// `Some(n)` when cancelled after `n` phases.
    fn run_phases(
        &self,
        cancel: &Cancellation,
        report: &mut ReconciliationReport,
    ) -> Result<Option<usize>, LibraryError> {
        for (done, phase) in Phase::ALL.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(Some(done));
            }
            *self.state.write() = ReconcilerState::Running(phase);
            let phase_started = Instant::now();
            match phase {
                Phase::RemoveOrphanedArtwork => self.remove_orphaned_artwork(report)?,
                Phase::ClearStaleArtwork => self.clear_stale_artwork(report)?,
                Phase::AddMissingArtwork => self.add_missing_artwork(report)?,
                Phase::RemoveOrphanedFiles => self.remove_orphaned_files(report)?,
            }
            debug!(
                "Reconciliation {} finished in {} ms",
                phase,
                phase_started.elapsed().as_millis()
            );
        }
        Ok(None)
    }

    /// Phase 1: drop index rows whose album key no track carries anymore,
    /// and their image unless another row still points at it.
    fn remove_orphaned_artwork(&self, report: &mut ReconciliationReport) -> Result<(), LibraryError> {
        let tracks = self.tracks.get_tracks()?;
        let referenced: HashSet<&str> = tracks
            .iter()
            .filter_map(|track| track.album_key.as_deref())
            .collect();
        let (orphaned, live): (Vec<AlbumArtwork>, Vec<AlbumArtwork>) = self
            .artwork
            .get_album_artwork()?
            .into_iter()
            .partition(|row| !referenced.contains(row.album_key.as_str()));
        if orphaned.is_empty() {
            return Ok(());
        }

        let changes = ArtworkChangeSet {
            removed_album_keys: orphaned.iter().map(|row| row.album_key.clone()).collect(),
            ..ArtworkChangeSet::default()
        };
        self.artwork.commit_artwork_changes(&changes)?;
        report.orphaned_rows_removed = orphaned.len();

        let live_ids: HashSet<&str> = live.iter().map(|row| row.artwork_id.as_str()).collect();
        let dead_ids: HashSet<&str> = orphaned
            .iter()
            .map(|row| row.artwork_id.as_str())
            .filter(|id| !live_ids.contains(id))
            .collect();
        for id in dead_ids {
            match self.store.delete_artwork(id) {
                Ok(true) => report.files_deleted += 1,
                Ok(false) => {}
                // Phase 4 retries unreferenced files.
                Err(err) => warn!(
                    component = COMPONENT,
                    operation = Phase::RemoveOrphanedArtwork.name(),
                    "Could not delete artwork {}: {}",
                    id,
                    err
                ),
            }
        }
        info!(
            component = COMPONENT,
            operation = Phase::RemoveOrphanedArtwork.name(),
            "Removed {} artwork rows without tracks",
            report.orphaned_rows_removed
        );
        Ok(())
    }

    /// Phase 2: flag tracks whose artwork state cannot be trusted and detach
    /// them from it. A row is only cleared once no trusted track uses it.
    fn clear_stale_artwork(&self, report: &mut ReconciliationReport) -> Result<(), LibraryError> {
        let tracks = self.tracks.get_tracks()?;
        let rows: HashMap<String, AlbumArtwork> = self
            .artwork
            .get_album_artwork()?
            .into_iter()
            .map(|row| (row.album_key.clone(), row))
            .collect();

        let mut changes = ArtworkChangeSet::default();
        let mut still_used: HashSet<&str> = HashSet::new();
        let mut detached: HashSet<&str> = HashSet::new();
        for track in &tracks {
            if !needs_artwork_indexing(track, &rows) {
                if track.has_artwork {
                    if let Some(key) = track.album_key.as_deref() {
                        still_used.insert(key);
                    }
                }
                continue;
            }
            if let Some(key) = track.album_key.as_deref() {
                detached.insert(key);
            }
            if track.needs_album_artwork_indexing && !track.has_artwork {
                continue;
            }
            let mut flagged = track.clone();
            flagged.needs_album_artwork_indexing = true;
            flagged.has_artwork = false;
            changes.updated_tracks.push(flagged);
        }
        changes.removed_album_keys = detached
            .into_iter()
            .filter(|key| rows.contains_key(*key) && !still_used.contains(key))
            .map(str::to_string)
            .collect();
        if changes.is_empty() {
            return Ok(());
        }

        self.artwork.commit_artwork_changes(&changes)?;
        report.tracks_flagged = changes.updated_tracks.len();
        report.rows_cleared = changes.removed_album_keys.len();
        info!(
            component = COMPONENT,
            operation = Phase::ClearStaleArtwork.name(),
            "Flagged {} tracks for artwork indexing, cleared {} rows",
            report.tracks_flagged,
            report.rows_cleared
        );
        Ok(())
    }

    /// Phase 3: extract artwork for every flagged track, one album key at a
    /// time. Images are written before the index rows that point at them.
    fn add_missing_artwork(&self, report: &mut ReconciliationReport) -> Result<(), LibraryError> {
        let rows: HashMap<String, AlbumArtwork> = self
            .artwork
            .get_album_artwork()?
            .into_iter()
            .map(|row| (row.album_key.clone(), row))
            .collect();
        let mut groups: HashMap<Option<String>, Vec<Track>> = HashMap::new();
        for track in self.tracks.get_tracks()? {
            if track.needs_album_artwork_indexing {
                groups.entry(track.album_key.clone()).or_default().push(track);
            }
        }
        if groups.is_empty() {
            return Ok(());
        }

        let mut changes = ArtworkChangeSet::default();
        for (album_key, group) in groups {
            let album_key = match album_key {
                Some(key) => key,
                None => {
                    for track in group {
                        changes.updated_tracks.push(synced(track, false));
                    }
                    continue;
                }
            };

            let mut image: Option<Vec<u8>> = None;
            let mut without_art: Vec<Track> = Vec::new();
            let mut failed: Vec<Track> = Vec::new();
            let mut pending = group.into_iter();
            for track in pending.by_ref() {
                match self.extractor.extract_artwork(&track) {
                    Ok(Some(bytes)) => {
                        image = Some(bytes);
                        without_art.push(track);
                        break;
                    }
                    Ok(None) => without_art.push(track),
                    Err(err) => {
                        warn!(
                            component = COMPONENT,
                            operation = Phase::AddMissingArtwork.name(),
                            "Could not extract artwork for {:?}: {}",
                            track.path,
                            err
                        );
                        failed.push(track);
                    }
                }
            }
            // Tracks after the first hit share the album's image.
            without_art.extend(pending);

            let attached = match image {
                Some(bytes) => {
                    let id = artwork_id(&bytes);
                    match self.store.write_artwork(&id, &bytes) {
                        Ok(()) => {}
                        Err(err @ LibraryError::StoreUnavailable(_)) => return Err(err),
                        Err(err) => {
                            warn!(
                                component = COMPONENT,
                                operation = Phase::AddMissingArtwork.name(),
                                "Could not store artwork {} for album {:?}: {}",
                                id,
                                album_key,
                                err
                            );
                            report.tracks_failed += without_art.len() + failed.len();
                            continue;
                        }
                    }
                    let unchanged = rows
                        .get(&album_key)
                        .map_or(false, |row| row.artwork_id == id);
                    if !unchanged {
                        changes.upserted_artwork.push(AlbumArtwork {
                            album_key: album_key.clone(),
                            artwork_id: id,
                            indexed_at: now_millis(),
                        });
                    }
                    // Failed tracks stay flagged even when a sibling found the image.
                    without_art
                }
                None if rows.contains_key(&album_key) => without_art,
                None => {
                    for track in without_art {
                        changes.updated_tracks.push(synced(track, false));
                    }
                    Vec::new()
                }
            };
            report.tracks_failed += failed.len();
            for track in attached {
                changes.updated_tracks.push(synced(track, true));
            }
        }

        report.artwork_added = changes.upserted_artwork.len();
        report.tracks_synced = changes.updated_tracks.len();
        self.artwork.commit_artwork_changes(&changes)?;
        info!(
            component = COMPONENT,
            operation = Phase::AddMissingArtwork.name(),
            "Added {} artwork rows, synced {} tracks, {} failed",
            report.artwork_added,
            report.tracks_synced,
            report.tracks_failed
        );
        Ok(())
    }

    /// Phase 4: delete image files the index does not reference.
    fn remove_orphaned_files(&self, report: &mut ReconciliationReport) -> Result<(), LibraryError> {
        let indexed = self.artwork.get_all_artwork_keys()?;
        let physical = self.store.list_physical_files()?;
        let mut deleted = 0;
        for id in physical.difference(&indexed) {
            match self.store.delete_artwork(id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    component = COMPONENT,
                    operation = Phase::RemoveOrphanedFiles.name(),
                    "Could not delete artwork file {}: {}",
                    id,
                    err
                ),
            }
        }
        if deleted > 0 {
            info!(
                component = COMPONENT,
                operation = Phase::RemoveOrphanedFiles.name(),
                "Deleted {} artwork files without index rows",
                deleted
            );
        }
        report.files_deleted += deleted;
        Ok(())
    }
}

fn needs_artwork_indexing(track: &Track, rows: &HashMap<String, AlbumArtwork>) -> bool {
    if track.needs_album_artwork_indexing || track.date_last_synced < track.date_file_modified {
        return true;
    }
    if !track.has_artwork {
        return false;
    }
    match track.album_key.as_deref() {
        Some(key) => !rows.contains_key(key),
        None => true,
    }
}

fn synced(mut track: Track, has_artwork: bool) -> Track {
    track.has_artwork = has_artwork;
    track.needs_album_artwork_indexing = false;
    track.date_last_synced = now_millis().max(track.date_file_modified);
    track
}
