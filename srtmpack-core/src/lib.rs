//! srtmpack-core: bulk SRTM elevation tile downloads packaged as ZIP
//!
//! The pipeline pulls 1° × 1° HGT tiles (gzip-compressed on a public S3
//! bucket), unifies a durable local cache with the network fetcher,
//! inflates each payload, and streams completed tiles into a single ZIP
//! archive under one bounded-concurrency scheduler with a single
//! authoritative progress stream.

pub mod archive;
pub mod cache;
pub mod error;
pub mod fetch;
pub mod geojson;
pub mod gzip;
pub mod manager;
pub mod manifest;
pub mod pool;
pub mod tile;

pub use archive::{build_zip, sanitize_archive_name, ZipEntry, ZIP_MIME};
pub use cache::{CacheEntry, CacheStore, DiskCacheStore, MemoryCacheStore, StorageInfo};
pub use error::DownloadError;
pub use fetch::{FetcherOptions, TileFetcher, DEFAULT_BASE_URL};
pub use geojson::{cached_tiles_geojson, Viewport};
pub use manager::{CacheStats, DownloadManager, DownloadProgress, ManagerOptions};
pub use manifest::{DownloadSession, SessionStatus};
pub use tile::TileId;
