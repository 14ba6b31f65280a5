use std::path::PathBuf;

use srtmpack_core::cache::{CacheStore, DiskCacheStore};

fn open_store(cache_dir: Option<PathBuf>) -> Result<DiskCacheStore, Box<dyn std::error::Error>> {
    Ok(match cache_dir {
        Some(dir) => DiskCacheStore::new(dir),
        None => DiskCacheStore::at_default_location()?,
    })
}

pub async fn info(cache_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(cache_dir)?;
    let info = store.storage_info().await?;

    println!("Cache location: {}", store.root().display());
    println!("Cached tiles: {}", info.tile_count);
    println!(
        "Total size: {:.1} MB",
        info.total_size as f64 / 1_000_000.0
    );
    if let Some(oldest) = info.oldest {
        println!("Oldest entry: {}", oldest.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(newest) = info.newest {
        println!("Newest entry: {}", newest.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

pub async fn clear(cache_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(cache_dir)?;
    let info = store.storage_info().await?;
    store.clear().await?;
    println!("Removed {} cached tiles", info.tile_count);
    Ok(())
}

pub async fn prune(
    cache_dir: Option<PathBuf>,
    max_age_days: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(cache_dir)?;
    let removed = store.prune_older_than(max_age_days).await?;
    println!(
        "Removed {} tiles not accessed in the last {} days",
        removed, max_age_days
    );
    Ok(())
}
