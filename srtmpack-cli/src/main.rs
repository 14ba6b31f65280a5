use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod progress;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache location and contents
    Info,
    /// Delete every cached tile
    Clear,
    /// Remove tiles not accessed recently
    Prune {
        /// Age threshold in days
        #[arg(long, default_value_t = 30)]
        max_age_days: u32,
    },
}

#[derive(Subcommand)]
enum Commands {
    /// Download SRTM tiles and package them into a ZIP archive
    Fetch {
        /// Tile id like N36W112; repeat for several tiles
        #[arg(short, long = "tile")]
        tiles: Vec<String>,

        /// Bounding box as south,west,north,east degrees
        #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
        bbox: Option<Vec<f64>>,

        /// Output path for the archive; derived from the selection if omitted
        #[arg(short, long)]
        output: Option<String>,

        /// Description used to derive the archive filename
        #[arg(long)]
        name: Option<String>,

        /// Concurrent tile downloads
        #[arg(long, default_value_t = 3)]
        concurrency: usize,

        /// Skip the local tile cache entirely
        #[arg(long)]
        no_cache: bool,

        /// Tile cache directory (defaults to the platform cache dir)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Origin base URL
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Inspect or maintain the local tile cache
    Cache {
        #[command(subcommand)]
        cache_command: CacheCommands,

        /// Tile cache directory (defaults to the platform cache dir)
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.debug {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Commands::Fetch {
            tiles,
            bbox,
            output,
            name,
            concurrency,
            no_cache,
            cache_dir,
            base_url,
        } => {
            commands::fetch::fetch_tiles(
                tiles,
                bbox,
                output,
                name,
                concurrency,
                no_cache,
                cache_dir,
                base_url,
            )
            .await?
        }
        Commands::Cache {
            cache_command,
            cache_dir,
        } => match cache_command {
            CacheCommands::Info => commands::cache::info(cache_dir).await?,
            CacheCommands::Clear => commands::cache::clear(cache_dir).await?,
            CacheCommands::Prune { max_age_days } => {
                commands::cache::prune(cache_dir, max_age_days).await?
            }
        },
    }
    Ok(())
}
