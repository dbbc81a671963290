//! Schema merge: one run's writes into the store, in fixed order.
//!
//! Order matters and is observable: schema init (fatal on a missing
//! definition), then yield, weather, field attributes (each full
//! replace), then the vegetation intermediate file (append). A failure
//! partway through leaves earlier tables updated and later ones stale —
//! the caller re-raises and owns retry.

use crate::store::{Store, StoreError};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use yieldcast_core::data::source::{NdviRecord, WeatherDay, YieldRecord};
use yieldcast_core::geometry::{self, GeometryError, SampleGeometryWriter};

/// Canonical names for the vegetation intermediate columns, keyed by the
/// aliases upstream exporters are known to emit.
const NDVI_COLUMN_ALIASES: &[(&str, &str)] = &[
    ("mean", "ndvi_mean"),
    ("NDVI_mean", "ndvi_mean"),
    ("stdDev", "ndvi_std"),
    ("NDVI_stdDev", "ndvi_std"),
    ("cloud_cover", "cloud_cover"),
    ("CLOUDY_PIXEL_PERCENTAGE", "cloud_cover"),
];

const NDVI_REQUIRED: &[&str] = &["field_id", "date", "ndvi_mean", "ndvi_std"];

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("vegetation intermediate file: {0}")]
    Intermediate(String),
}

/// What one merge run wrote.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MergeReport {
    pub yield_rows: usize,
    pub weather_rows: usize,
    pub field_rows: usize,
    pub ndvi_appended: usize,
    /// Required intermediate columns that were still missing after alias
    /// mapping; non-empty means the NDVI load was skipped.
    pub ndvi_missing_columns: Vec<String>,
}

/// Inputs to one merge run.
pub struct MergeInputs<'a> {
    pub yield_rows: &'a [YieldRecord],
    pub weather_rows: &'a [WeatherDay],
    /// Field-boundary GeoJSON; generated via `sample_writer` when absent.
    pub fields_path: &'a Path,
    pub sample_writer: Option<&'a dyn SampleGeometryWriter>,
    /// Vegetation intermediate CSV; skipped when absent.
    pub ndvi_csv_path: &'a Path,
}

/// Run the merge. See the module docs for ordering and failure behavior.
pub fn merge(
    store: &mut Store,
    schema_path: &Path,
    inputs: MergeInputs<'_>,
) -> Result<MergeReport, MergeError> {
    store.init_schema(schema_path)?;
    info!("store schema initialized");

    let mut report = MergeReport::default();

    report.yield_rows = store.replace_yield(inputs.yield_rows)?;
    report.weather_rows = store.replace_weather(inputs.weather_rows)?;

    let fields = geometry::ensure_fields(inputs.fields_path, inputs.sample_writer)?;
    let attributes: Vec<(String, String)> = fields
        .iter()
        .map(|f| (f.field_id.clone(), f.crop_2025.clone()))
        .collect();
    report.field_rows = store.replace_fields(&attributes)?;

    if inputs.ndvi_csv_path.exists() {
        match load_intermediate(inputs.ndvi_csv_path)? {
            IntermediateLoad::Rows(rows) => {
                report.ndvi_appended = store.append_ndvi(&rows)?;
                info!(rows = report.ndvi_appended, "NDVI intermediate appended");
            }
            IntermediateLoad::MissingColumns(missing) => {
                warn!(?missing, "NDVI intermediate missing required columns, skipped");
                report.ndvi_missing_columns = missing;
            }
        }
    } else {
        info!(path = %inputs.ndvi_csv_path.display(), "no NDVI intermediate file");
    }

    Ok(report)
}

enum IntermediateLoad {
    Rows(Vec<NdviRecord>),
    MissingColumns(Vec<String>),
}

/// Read the vegetation intermediate CSV, mapping known header aliases
/// onto canonical names. Dates are coerced; a missing cloud-cover column
/// defaults to 0.0.
fn load_intermediate(path: &Path) -> Result<IntermediateLoad, MergeError> {
    let mut reader =
        csv::Reader::from_path(path).map_err(|e| MergeError::Intermediate(e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| MergeError::Intermediate(e.to_string()))?
        .clone();

    let mut columns: HashMap<&str, usize> = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        let canonical = NDVI_COLUMN_ALIASES
            .iter()
            .find(|(alias, _)| *alias == header)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(header);
        columns.entry(canonical).or_insert(idx);
    }

    let missing: Vec<String> = NDVI_REQUIRED
        .iter()
        .filter(|name| !columns.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Ok(IntermediateLoad::MissingColumns(missing));
    }

    let field_idx = columns["field_id"];
    let date_idx = columns["date"];
    let mean_idx = columns["ndvi_mean"];
    let std_idx = columns["ndvi_std"];
    let cloud_idx = columns.get("cloud_cover").copied();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| MergeError::Intermediate(e.to_string()))?;
        let get = |idx: usize| record.get(idx).unwrap_or("");

        let date = parse_date(get(date_idx))
            .ok_or_else(|| MergeError::Intermediate(format!("bad date: {:?}", get(date_idx))))?;
        let ndvi_mean: f64 = get(mean_idx)
            .parse()
            .map_err(|_| MergeError::Intermediate(format!("bad ndvi_mean: {:?}", get(mean_idx))))?;
        let ndvi_std: f64 = get(std_idx)
            .parse()
            .map_err(|_| MergeError::Intermediate(format!("bad ndvi_std: {:?}", get(std_idx))))?;
        let cloud_cover = cloud_idx
            .and_then(|idx| get(idx).parse().ok())
            .unwrap_or(0.0);

        rows.push(NdviRecord {
            field_id: get(field_idx).to_string(),
            date,
            ndvi_mean,
            ndvi_std,
            cloud_cover,
        });
    }
    Ok(IntermediateLoad::Rows(rows))
}

/// Accept bare dates and datetime strings with a date prefix.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}
