#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the rental map core.
//!
//! Resolves addresses through the tiered geocoder (with its persisted
//! cache), and renders clusters and heatmaps for a JSON export of property
//! records as `GeoJSON` on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use rental_map_geocoder::clock::SystemClock;
use rental_map_geocoder::service_registry::{
    ProviderSettings, ResolverConfig, enabled_services, resolver_config,
};
use rental_map_geocoder::store::FileCacheStore;
use rental_map_geocoder::{GeocodeError, GeocodingProvider, GeocodingResolver};
use rental_map_models::{BoundingBox, ListingType};

mod commands;

/// Environment variable pointing at an alternate resolver config file.
const CONFIG_ENV: &str = "RENTAL_MAP_GEOCODER_CONFIG";

// ---------------------------------------------------------------------------
// CLI definitions
// ---------------------------------------------------------------------------

/// Geocode addresses and render rental listings for the map.
#[derive(Parser)]
#[command(name = "rental_map")]
#[command(about = "Geocode addresses and render rental listings for the map")]
struct Cli {
    /// Directory holding the persisted geocode cache (default: `data/`).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Don't call any geocoding service; use the cache and known cities.
    #[arg(long, global = true)]
    offline: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Resolve one address.
    Geocode {
        /// Free-form address.
        address: String,
    },

    /// Resolve every line of a file, in order.
    BatchGeocode {
        /// File with one address per line.
        file: PathBuf,
    },

    /// Type-ahead suggestions for a partial query.
    Autocomplete {
        /// Partial place name.
        query: String,

        /// Maximum number of suggestions.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Display name for a coordinate.
    Reverse {
        /// Latitude.
        #[arg(allow_negative_numbers = true)]
        lat: f64,

        /// Longitude.
        #[arg(allow_negative_numbers = true)]
        lng: f64,
    },

    /// Marker clusters as a `GeoJSON` feature collection.
    Clusters {
        #[command(flatten)]
        view: ViewArgs,
    },

    /// Heatmap cells as a `GeoJSON` feature collection.
    Heatmap {
        #[command(flatten)]
        view: ViewArgs,
    },

    /// Poll a records file and print changes as they happen.
    Watch {
        /// JSON array of property records.
        #[arg(long)]
        records: PathBuf,

        /// Seconds between polls.
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },

    /// Show or maintain the geocode cache.
    Cache {
        /// Remove every entry instead of only expired ones.
        #[arg(long)]
        clear: bool,
    },
}

/// Records, camera and filters for the render subcommands.
#[derive(Args)]
struct ViewArgs {
    /// JSON array of property records.
    #[arg(long)]
    records: PathBuf,

    /// Map zoom (default: derived from `--bbox`, else fitted to the filtered records).
    #[arg(long)]
    zoom: Option<f64>,

    /// Visible bounds as `west,south,east,north`.
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    bbox: Option<BoundingBox>,

    /// Property types to keep (e.g., "apartment,duplex").
    #[arg(long = "type", value_delimiter = ',')]
    property_types: Vec<String>,

    /// Minimum price.
    #[arg(long)]
    min_price: Option<f64>,

    /// Maximum price.
    #[arg(long)]
    max_price: Option<f64>,

    /// Bedroom counts to keep; 5 means "5 or more".
    #[arg(long, value_delimiter = ',')]
    bedrooms: Vec<u32>,

    /// Listing types to keep ("rent", "sale", "shortlet").
    #[arg(long, value_delimiter = ',')]
    listing: Vec<ListingType>,
}

fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid coordinate in bbox: {e}"))?;

    let &[west, south, east, north] = parts.as_slice() else {
        return Err(format!(
            "bbox needs 4 values (west,south,east,north), got {}",
            parts.len()
        ));
    };
    if west > east || south > north {
        return Err("bbox corners are out of order (expected west,south,east,north)".to_string());
    }
    Ok(BoundingBox::new(west, south, east, north))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let resolver = Arc::new(build_resolver(cli.cache_dir, cli.offline)?);

    match cli.command {
        Commands::Geocode { address } => commands::geocode(&resolver, &address).await,
        Commands::BatchGeocode { file } => commands::batch_geocode(&resolver, &file).await,
        Commands::Autocomplete { query, limit } => {
            commands::autocomplete(&resolver, &query, limit).await
        }
        Commands::Reverse { lat, lng } => {
            println!("{}", resolver.reverse_resolve(lat, lng).await);
            Ok(())
        }
        Commands::Clusters { view } => commands::clusters(resolver, &view).await,
        Commands::Heatmap { view } => commands::heatmap(resolver, &view).await,
        Commands::Watch {
            records,
            interval_secs,
        } => commands::watch_records(resolver, records, interval_secs).await,
        Commands::Cache { clear } => {
            commands::cache(&resolver, clear);
            Ok(())
        }
    }
}

/// Loads the resolver config, preferring the file named by
/// [`CONFIG_ENV`] over the embedded one.
fn load_config() -> Result<ResolverConfig, GeocodeError> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => {
            log::info!("Loading resolver config from {path}");
            ResolverConfig::from_file(Path::new(&path))
        }
        _ => Ok(resolver_config()),
    }
}

/// First enabled service (by priority) whose client can be built.
fn select_provider(settings: &ProviderSettings) -> Option<Arc<dyn GeocodingProvider>> {
    for service in enabled_services() {
        match service.build_provider(settings) {
            Ok(provider) => {
                log::info!("Using geocoding service {} ({})", service.name, service.base_url());
                return Some(provider);
            }
            Err(e) => log::warn!("Skipping geocoding service {}: {e}", service.id),
        }
    }
    log::warn!("No geocoding service available, resolving from cache and known cities only");
    None
}

fn build_resolver(
    cache_dir: Option<PathBuf>,
    offline: bool,
) -> Result<GeocodingResolver, GeocodeError> {
    let config = load_config()?;
    let provider = if offline {
        None
    } else {
        select_provider(&config.provider)
    };
    let store = FileCacheStore::new(cache_dir.unwrap_or_else(FileCacheStore::default_dir));

    Ok(GeocodingResolver::new(
        provider,
        Arc::new(store),
        Arc::new(SystemClock),
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bbox() {
        assert_eq!(
            parse_bbox("3.0, 6.2,3.8,6.8").unwrap(),
            BoundingBox::new(3.0, 6.2, 3.8, 6.8)
        );
        assert_eq!(
            parse_bbox("-1.5,-2,1,2").unwrap(),
            BoundingBox::new(-1.5, -2.0, 1.0, 2.0)
        );
    }

    #[test]
    fn rejects_malformed_bbox() {
        assert!(parse_bbox("3.0,6.2,3.8").is_err());
        assert!(parse_bbox("3.0,6.2,abc,6.8").is_err());
        assert!(parse_bbox("3.8,6.2,3.0,6.8").is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_filters() {
        let cli = Cli::try_parse_from([
            "rental_map",
            "clusters",
            "--records",
            "records.json",
            "--type",
            "apartment,duplex",
            "--listing",
            "rent,Shortlet",
            "--bedrooms",
            "2,5",
        ])
        .unwrap();

        let Commands::Clusters { view } = cli.command else {
            panic!("expected clusters command");
        };
        assert_eq!(view.property_types, ["apartment", "duplex"]);
        assert_eq!(view.listing, [ListingType::Rent, ListingType::Shortlet]);
        assert_eq!(view.bedrooms, [2, 5]);
        assert!(view.zoom.is_none());
    }
}
