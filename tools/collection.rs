use std::env;
use std::fs;
use std::path::PathBuf;

use common::Subfolder;
use library::{
    AddFolderOutcome, AlbumArtworkRepository, Cancellation, Collection, ReconcileOutcome,
    TrackRepository,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: collection [--index PATH] [--artwork PATH] <command>

commands:
  add <path>                      add a top-level folder
  remove <path>                   remove a folder from the collection
  folders                         list folders
  browse <folder> [subfolder] [--up]
                                  list subfolders, breadcrumbs and tracks
  scan <directory>                read tracks in one directory
  index                           index all folders and reconcile artwork
  artwork <track> [output]        show or save the album artwork of a track
  stats                           catalog counts";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut index_path = env::var("COLLECTION_INDEX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/collection.redb"));
    let mut artwork_path = env::var("COLLECTION_ARTWORK")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/artwork"));

    let mut args: Vec<String> = Vec::new();
    let mut raw = env::args().skip(1);
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--index" => index_path = PathBuf::from(raw.next().ok_or("--index needs a path")?),
            "--artwork" => artwork_path = PathBuf::from(raw.next().ok_or("--artwork needs a path")?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            _ => args.push(arg),
        }
    }

    let command = match args.first() {
        Some(command) => command.as_str(),
        None => {
            eprintln!("{}", USAGE);
            return Err("missing command".into());
        }
    };
    let collection = Collection::open(&index_path, &artwork_path)?;

    match command {
        "add" => {
            let path = args.get(1).ok_or("add needs a path")?;
            match collection.folders().add_folder(path)? {
                AddFolderOutcome::Added(folder) => println!("Added {}", folder.path),
                AddFolderOutcome::AlreadyAdded(folder) => {
                    println!("Folder {} was already added", folder.path)
                }
            }
        }
        "remove" => {
            let path = args.get(1).ok_or("remove needs a path")?;
            match collection.folders().get_folder_by_path(path)? {
                Some(folder) => {
                    collection.folders().delete_folder(&folder)?;
                    println!("Removed {}", folder.path);
                }
                None => println!("No folder with path {}", path),
            }
        }
        "folders" => {
            let folders = collection.folders().get_folders()?;
            println!("{}", serde_json::to_string_pretty(&folders)?);
        }
        "browse" => {
            let path = args.get(1).ok_or("browse needs a folder path")?;
            let folder = collection
                .folders()
                .get_folder_by_path(path)?
                .ok_or("folder is not in the collection")?;
            let go_up = args.iter().any(|arg| arg == "--up");
            let browser = collection.browser();
            let view = match args.get(2).filter(|arg| arg.as_str() != "--up") {
                Some(subfolder) => {
                    browser.open_subfolder(&folder, &Subfolder::new(subfolder.clone(), go_up))
                }
                None => browser.open_folder(&folder),
            };
            let output = serde_json::json!({
                "folder": view.folder,
                "opened": view.opened_subfolder_path,
                "breadcrumbs": view.breadcrumbs,
                "subfolders": view.subfolders,
                "tracks": view.tracks,
                "playlists": view.playlists,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "scan" => {
            let directory = args.get(1).ok_or("scan needs a directory")?;
            let scan = collection.scanner().scan_tracks_with_report(directory);
            for track in &scan.tracks {
                println!("{}\t{}\t{}", track.path, track.raw_artists(), track.title);
            }
            for failure in &scan.failures {
                eprintln!("failed: {}: {}", failure.path, failure.error);
            }
            println!("{} tracks, {} unreadable", scan.tracks.len(), scan.failures.len());
        }
        "index" => {
            let stats = collection.indexer().index_collection()?;
            println!(
                "Indexed: {} added, {} updated, {} removed, {} unchanged, {} unreadable",
                stats.added, stats.updated, stats.removed, stats.unchanged, stats.failed
            );
            match collection.reconciler().reconcile(&Cancellation::new())? {
                ReconcileOutcome::Completed(report) => println!(
                    "Artwork: {} added, {} synced, {} failed, {} rows removed, {} files deleted ({} ms)",
                    report.artwork_added,
                    report.tracks_synced,
                    report.tracks_failed,
                    report.orphaned_rows_removed + report.rows_cleared,
                    report.files_deleted,
                    report.duration_ms
                ),
                other => println!("Artwork reconciliation did not complete: {:?}", other),
            }
        }
        "artwork" => {
            let path = args.get(1).ok_or("artwork needs a track path")?;
            let track = collection
                .catalog()
                .get_track(path)?
                .ok_or("track is not in the collection")?;
            let album_key = track.album_key.ok_or("track has no album")?;
            let row = collection
                .catalog()
                .get_album_artwork()?
                .into_iter()
                .find(|row| row.album_key == album_key)
                .ok_or("album has no artwork")?;
            let (data, mime) = collection
                .artwork_cache()
                .read_artwork(&row.artwork_id)?
                .ok_or("artwork file is missing; run index")?;
            match args.get(2) {
                Some(output) => {
                    fs::write(output, &data)?;
                    println!("Wrote {} ({}, {} bytes) to {}", row.artwork_id, mime, data.len(), output);
                }
                None => println!("{}\t{}\t{} bytes", row.artwork_id, mime, data.len()),
            }
        }
        "stats" => {
            let stats = collection.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        other => {
            eprintln!("{}", USAGE);
            return Err(format!("unknown command {:?}", other).into());
        }
    }

    Ok(())
}
