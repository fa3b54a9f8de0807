use std::path::{Path, PathBuf};
use std::sync::Arc;

use amap_geocoder::{init_tracing, AppConfig, BatchProgress, BatchStats, GeocodingService};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(name = "amap-geocoder")]
#[command(about = "Resolve fuzzy Chinese addresses to coordinates through AMap")]
#[command(version)]
struct Cli {
    /// Access token checked by the session verifier (defaults to GEOCODER_ACCESS_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one address through the full strategy chain
    Resolve {
        address: String,
        /// City hint passed to the provider
        #[arg(long)]
        city: Option<String>,
    },
    /// Resolve every address in a CSV file, window by window
    Batch {
        csv: PathBuf,
        /// Header of the column holding the addresses
        #[arg(long, default_value = "address")]
        column: String,
    },
    /// Store a new location awaiting geocoding
    Add {
        name: String,
        address: String,
        /// Geocode the new location right away
        #[arg(long)]
        geocode: bool,
    },
    /// Geocode a stored location and write the outcome back
    Locate {
        id: String,
        /// Resolve this address instead of the stored one
        #[arg(long)]
        address: Option<String>,
    },
    /// Geocode several stored locations, window by window
    LocateMany {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Re-queue failed locations and resolve them again
    RetryFailed {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// List locations still awaiting geocoding
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Count locations per geocoding status
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::from_env();
    let token = cli
        .token
        .or_else(|| std::env::var("GEOCODER_ACCESS_TOKEN").ok());
    let service = GeocodingService::from_config(config)?;
    let session = service.authorize(token.as_deref())?;

    match cli.command {
        Commands::Resolve { address, city } => {
            let resolution = session.resolve(&address, city.as_deref()).await?;
            print_json(&resolution)?;
        }
        Commands::Batch { csv, column } => {
            let addresses = read_addresses(&csv, &column)?;
            let observer: Arc<dyn Fn(BatchProgress) + Send + Sync> = Arc::new(|progress: BatchProgress| {
                info!(
                    window = progress.window,
                    windows = progress.windows,
                    processed = progress.processed,
                    total = progress.total,
                    "batch progress"
                );
            });
            let entries = session
                .resolve_batch_with_progress(&addresses, Some(observer))
                .await;
            let stats = BatchStats::from_entries(&entries);
            print_json(&json!({ "stats": stats, "entries": entries }))?;
        }
        Commands::Add {
            name,
            address,
            geocode: true,
        } => {
            let outcome = session.create_and_geocode(&name, &address).await?;
            print_json(&outcome)?;
        }
        Commands::Add { name, address, .. } => {
            let record = session.create_pending(&name, &address)?;
            print_json(&record)?;
        }
        Commands::Locate { id, address } => {
            let outcome = session.geocode_location(&id, address.as_deref()).await?;
            print_json(&outcome)?;
        }
        Commands::LocateMany { ids } => {
            let summary = session.geocode_locations(&ids).await;
            print_json(&summary)?;
        }
        Commands::RetryFailed { limit } => {
            let summary = session.retry_failed(limit).await?;
            print_json(&summary)?;
        }
        Commands::Pending { limit } => {
            let records = session.pending(limit)?;
            print_json(&records)?;
        }
        Commands::Stats => {
            let stats = session.stats()?;
            print_json(&stats)?;
        }
    }

    Ok(())
}

fn read_addresses(path: &Path, column: &str) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let index = reader
        .headers()?
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| anyhow!("column {column:?} not found in {}", path.display()))?;

    let mut addresses = Vec::new();
    for record in reader.records() {
        let record = record?;
        addresses.push(record.get(index).unwrap_or_default().to_string());
    }
    Ok(addresses)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
