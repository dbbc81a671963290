//! Yieldcast CLI — run the pipeline and inspect its outputs.
//!
//! Commands:
//! - `run` — ingest all sources and merge into the store
//! - `forecast` — build features, fit the ensemble, print per-field predictions
//! - `benchmarks` — print the NDVI and county-yield benchmarks
//! - `station` — show the cached weather station, optionally rediscover

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use yieldcast_core::data::sentinel::DisabledBackend;
use yieldcast_core::data::NdviIngestor;
use yieldcast_core::geometry;
use yieldcast_core::{FarmConfig, StationCache, StationDiscovery, StationLocator};
use yieldcast_runner::benchmarks::get_benchmarks;
use yieldcast_runner::model::train_and_predict;
use yieldcast_runner::pipeline::{self, PipelinePaths};
use yieldcast_runner::store::Store;

#[derive(Parser)]
#[command(name = "yieldcast", about = "Yieldcast CLI — per-field yield pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PathArgs {
    /// Farm configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// SQLite store path.
    #[arg(long, default_value = "data/weekly_pipeline.db")]
    db: PathBuf,

    /// Schema definition executed at merge start.
    #[arg(long, default_value = "sql/schema.sql")]
    schema: PathBuf,

    /// Vegetation intermediate CSV path.
    #[arg(long, default_value = "data/processed/ndvi_zonal.csv")]
    ndvi_csv: PathBuf,

    /// Station cache file.
    #[arg(long, default_value = "data/.noaa_station_cache.json")]
    station_cache: PathBuf,
}

impl PathArgs {
    fn pipeline_paths(&self) -> PipelinePaths {
        PipelinePaths {
            database: self.db.clone(),
            schema: self.schema.clone(),
            ndvi_csv: self.ndvi_csv.clone(),
            station_cache: self.station_cache.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest all sources and merge into the store.
    Run {
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Fit the ensemble and print per-field yield predictions.
    Forecast {
        /// SQLite store path.
        #[arg(long, default_value = "data/weekly_pipeline.db")]
        db: PathBuf,
    },
    /// Print the NDVI and county-yield benchmarks.
    Benchmarks {
        /// SQLite store path.
        #[arg(long, default_value = "data/weekly_pipeline.db")]
        db: PathBuf,
    },
    /// Show the cached weather station.
    Station {
        #[command(flatten)]
        paths: PathArgs,

        /// Resolve a station (cache first, then directory discovery).
        #[arg(long, default_value_t = false)]
        discover: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Run { paths } => run_pipeline(&paths),
        Commands::Forecast { db } => print_forecast(&db),
        Commands::Benchmarks { db } => print_benchmarks(&db),
        Commands::Station { paths, discover } => show_station(&paths, discover),
    }
}

fn run_pipeline(args: &PathArgs) -> Result<()> {
    let config = FarmConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    // No imagery service is wired into the CLI deployment; the ingestor
    // serves its synthetic series.
    let mut imagery = NdviIngestor::new(DisabledBackend);
    let report = pipeline::run(&args.pipeline_paths(), &config, &mut imagery, None)?;

    println!(
        "merged: {} yield rows, {} weather rows, {} fields, {} NDVI rows appended",
        report.yield_rows, report.weather_rows, report.field_rows, report.ndvi_appended
    );
    if !report.ndvi_missing_columns.is_empty() {
        println!(
            "NDVI intermediate skipped; missing columns: {}",
            report.ndvi_missing_columns.join(", ")
        );
    }
    Ok(())
}

fn print_forecast(db: &PathBuf) -> Result<()> {
    let store = Store::open(db).with_context(|| format!("opening {}", db.display()))?;
    let forecast =
        train_and_predict(&store).context("building the forecast — has `run` completed?")?;

    if forecast.predictions.is_empty() {
        println!("no fields with vegetation data — nothing to forecast");
        return Ok(());
    }
    println!("historical mean yield: {:.1} bu/acre", forecast.historical_mean_yield);
    for p in &forecast.predictions {
        println!("{}: {} bu/acre", p.field_id, p.yield_pred);
    }
    Ok(())
}

fn print_benchmarks(db: &PathBuf) -> Result<()> {
    let store = Store::open(db).with_context(|| format!("opening {}", db.display()))?;
    let b = get_benchmarks(&store);
    println!("2024 NDVI benchmark: {:.2}", b.ndvi_benchmark);
    println!("county yield benchmark: {:.1} bu/acre", b.county_yield);
    Ok(())
}

fn show_station(args: &PathArgs, discover: bool) -> Result<()> {
    let cache = StationCache::new(&args.station_cache);
    if !discover {
        match cache.load() {
            Some(id) => println!("cached station: {id}"),
            None => println!("no live cached station — rerun with --discover"),
        }
        return Ok(());
    }

    let config = FarmConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let locator = StationLocator::new();
    let centroid = geometry::discovery_centroid(&config.farm.fields_path);
    let discovery = StationDiscovery::new(
        &locator,
        &cache,
        centroid,
        &config.data_sources.noaa.token,
    );
    match discovery.discover() {
        Some(id) => println!("station: {id}"),
        None => println!("no qualifying station found"),
    }
    Ok(())
}
