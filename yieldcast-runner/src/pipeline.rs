//! Top-level pipeline run: ingest everything, then merge.
//!
//! Recoverable source failures degrade inline and never propagate; only
//! schema initialization and store errors abort. The run logs and
//! re-raises fatal errors — the invoking caller owns retry and alerting.
//! Nothing is locked across the run: overlapping invocations can
//! interleave partial writes, a known limitation of the store layout.

use crate::merge::{merge, MergeError, MergeInputs, MergeReport};
use crate::store::Store;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};
use yieldcast_core::config::FarmConfig;
use yieldcast_core::data::sentinel::ImageryBackend;
use yieldcast_core::data::source::NdviRecord;
use yieldcast_core::data::{NdviIngestor, Region, UsdaIngestor, WeatherIngestor};
use yieldcast_core::geometry::{self, SampleGeometryWriter};
use yieldcast_core::station::{StationCache, StationDiscovery, StationLocator};

/// Earliest season requested from the yield-statistics service.
const YIELD_YEAR_FLOOR: i32 = 2020;

/// Trailing NDVI window, days.
const NDVI_DAYS_BACK: u32 = 30;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("intermediate write failed: {0}")]
    IntermediateWrite(String),
}

/// Filesystem layout for one pipeline deployment.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub database: PathBuf,
    pub schema: PathBuf,
    pub ndvi_csv: PathBuf,
    pub station_cache: PathBuf,
}

impl Default for PipelinePaths {
    fn default() -> Self {
        Self {
            database: PathBuf::from("data/weekly_pipeline.db"),
            schema: PathBuf::from("sql/schema.sql"),
            ndvi_csv: PathBuf::from("data/processed/ndvi_zonal.csv"),
            station_cache: PathBuf::from("data/.noaa_station_cache.json"),
        }
    }
}

/// Run the full ingest-and-merge pipeline once.
pub fn run(
    paths: &PipelinePaths,
    config: &FarmConfig,
    imagery: &mut NdviIngestor<impl ImageryBackend>,
    sample_writer: Option<&dyn SampleGeometryWriter>,
) -> Result<MergeReport, PipelineError> {
    info!(farm = %config.farm.name, "pipeline started");
    let result = run_inner(paths, config, imagery, sample_writer);
    match &result {
        Ok(report) => info!(
            yield_rows = report.yield_rows,
            weather_rows = report.weather_rows,
            field_rows = report.field_rows,
            ndvi_appended = report.ndvi_appended,
            "pipeline succeeded"
        ),
        Err(e) => error!("pipeline failed: {e}"),
    }
    result
}

fn run_inner(
    paths: &PipelinePaths,
    config: &FarmConfig,
    imagery: &mut NdviIngestor<impl ImageryBackend>,
    sample_writer: Option<&dyn SampleGeometryWriter>,
) -> Result<MergeReport, PipelineError> {
    let sources = &config.data_sources;

    // Yield statistics
    let usda = UsdaIngestor::new(&sources.usda.api_key);
    let region = Region {
        state: config.farm.state.clone(),
        county: config.farm.county.clone(),
    };
    let yield_result = usda.fetch("CORN", &region, YIELD_YEAR_FLOOR);

    // Weather, with cache-first station discovery around the farm centroid
    let locator = StationLocator::new();
    let cache = StationCache::new(&paths.station_cache);
    let centroid = geometry::discovery_centroid(&config.farm.fields_path);
    let discovery = StationDiscovery::new(&locator, &cache, centroid, &sources.noaa.token);
    let weather_ingestor =
        WeatherIngestor::new(&sources.noaa.token, sources.noaa.station_id.clone());
    let weather_result = weather_ingestor.fetch(&discovery);

    // Vegetation index. Initialization failure is observable but
    // recovered: the ingestor serves its synthetic series.
    if let Err(e) = imagery.initialize() {
        warn!("imagery backend initialization failed: {e}");
    }
    let fields = geometry::load_fields(&config.farm.fields_path).unwrap_or_default();
    let ndvi_result = imagery.fetch(&fields, NDVI_DAYS_BACK);
    if !ndvi_result.rows.is_empty() {
        write_intermediate(&paths.ndvi_csv, &ndvi_result.rows)?;
    }

    let mut store = Store::open(&paths.database).map_err(MergeError::Store)?;
    let report = merge(
        &mut store,
        &paths.schema,
        MergeInputs {
            yield_rows: &yield_result.rows,
            weather_rows: &weather_result.rows,
            fields_path: &config.farm.fields_path,
            sample_writer,
            ndvi_csv_path: &paths.ndvi_csv,
        },
    )?;
    Ok(report)
}

/// Land the fetched NDVI rows at the intermediate path the merge reads
/// from, mirroring the export-to-file flow of remote backends.
fn write_intermediate(path: &Path, rows: &[NdviRecord]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::IntermediateWrite(e.to_string()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| PipelineError::IntermediateWrite(e.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| PipelineError::IntermediateWrite(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::IntermediateWrite(e.to_string()))?;
    Ok(())
}
