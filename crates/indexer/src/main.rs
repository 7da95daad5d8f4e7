mod activity_store;
mod config;
mod worker;

use std::time::Duration;

use activity_store::ActivityStore;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::{AddFolderOutcome, Collection};
use tracing::{info, warn};
use worker::{spawn_event_listener, spawn_periodic_trigger, IndexWorker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let index_path = resolve_path(&config_path, config.index_path.trim());
    let artwork_path = resolve_path(&config_path, config.artwork_path.trim());
    let collection = Collection::open(&index_path, &artwork_path)?
        .with_playlist_extensions(config.playlist_extensions.clone());

    let activity = ActivityStore::new(collection.catalog().db());
    if let Err(err) = activity.init_tables() {
        warn!("Failed to create activity table: {}", err);
    }

    for folder in &config.folders {
        let path = resolve_path(&config_path, folder);
        match collection.folders().add_folder(&path.to_string_lossy()) {
            Ok(AddFolderOutcome::Added(folder)) => info!("Added folder {:?} from config", folder.path),
            Ok(AddFolderOutcome::AlreadyAdded(_)) => {}
            Err(err) => warn!("Failed to add folder {:?}: {}", path, err),
        }
    }

    let stats = collection.stats()?;
    info!(
        "Collection opened: {} folders, {} tracks, {} artwork entries",
        stats.folders, stats.tracks, stats.album_artwork
    );
    if stats.folders == 0 {
        info!("No folders configured yet; add some to {:?}.", config_path);
    }

    let (worker, worker_handle) = IndexWorker::spawn(collection.clone(), activity);
    let listener = spawn_event_listener(&collection, worker.clone());
    let periodic = if config.reindex_interval_secs > 0 {
        let interval = Duration::from_secs(config.reindex_interval_secs);
        Some(spawn_periodic_trigger(worker.clone(), interval))
    } else {
        None
    };
    if config.index_on_startup {
        worker.trigger();
    }

    shutdown_signal().await;
    info!("Shutting down; waiting for the current phase to finish");
    worker.shutdown();
    listener.abort();
    if let Some(periodic) = periodic {
        periodic.abort();
    }
    if let Err(err) = worker_handle.await {
        warn!("Index worker ended abnormally: {}", err);
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for ctrl-c: {}", err);
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }
}
