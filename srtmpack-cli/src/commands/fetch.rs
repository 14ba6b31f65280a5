use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use srtmpack_core::cache::DiskCacheStore;
use srtmpack_core::manager::{DownloadManager, ManagerOptions};
use srtmpack_core::{sanitize_archive_name, TileId, DEFAULT_BASE_URL};

use crate::progress::ProgressManager;

/// Resolve the tile selection, run the download pipeline, and write the
/// archive to disk. Ctrl-C cancels the session.
pub async fn fetch_tiles(
    tiles: Vec<String>,
    bbox: Option<Vec<f64>>,
    output: Option<String>,
    name: Option<String>,
    concurrency: usize,
    no_cache: bool,
    cache_dir: Option<PathBuf>,
    base_url: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ids: Vec<TileId> = Vec::new();
    for tile in &tiles {
        ids.push(TileId::parse(tile)?);
    }
    if let Some(bbox) = bbox {
        // clap enforces exactly four values
        ids.extend(TileId::cover_bbox(bbox[0], bbox[1], bbox[2], bbox[3]));
    }

    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(*id));

    if ids.is_empty() {
        return Err("no tiles selected; pass --tile and/or --bbox".into());
    }

    let store = match cache_dir {
        Some(dir) => DiskCacheStore::new(dir),
        None => DiskCacheStore::at_default_location()?,
    };

    let progress = ProgressManager::new(true, ids.len() as u64);
    let progress_for_updates = progress.clone();

    let manager = Arc::new(DownloadManager::new(
        Arc::new(store),
        ManagerOptions {
            concurrent_downloads: concurrency,
            use_cache: !no_cache,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            on_progress: Some(Box::new(move |p| {
                progress_for_updates.update(&p);
            })),
            ..ManagerOptions::default()
        },
    )?);

    {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling download...");
                manager.cancel_download();
            }
        });
    }

    let blob = manager.start_download(&ids).await?;
    progress.finish();

    let path = output.unwrap_or_else(|| {
        let description = name.unwrap_or_else(|| ids.len().to_string());
        format!("{}.zip", sanitize_archive_name(&description))
    });
    tokio::fs::write(&path, &blob).await?;

    let stats = manager.statistics().await;
    if let Some(session) = stats.session {
        println!(
            "Tiles: {} completed, {} skipped (ocean), {} failed",
            session.completed, session.skipped, session.failed
        );
        println!(
            "Downloaded {} bytes ({} cache hits)",
            session.bytes_downloaded, stats.cache.hits
        );
    }
    println!("Archive created: {}", path);

    Ok(())
}
