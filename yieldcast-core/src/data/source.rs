//! Shared ingestor types: row structs, the failure taxonomy, and the
//! degradation-aware fetch result.
//!
//! Every public fetch returns a `FetchResult` instead of bare rows so
//! callers and tests can assert on *why* a fallback happened, not just on
//! the fallback values themselves.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of the government yield-statistics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldRecord {
    pub year: i32,
    pub yield_bu_acre: f64,
    pub commodity: String,
}

/// One pivoted day of weather. Missing measurements stay `None` and land
/// in the store as NULL; they are never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDay {
    pub date: NaiveDate,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub prcp: Option<f64>,
    pub gdd: f64,
}

/// One long-format zonal NDVI observation for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviRecord {
    pub field_id: String,
    pub date: NaiveDate,
    pub ndvi_mean: f64,
    pub ndvi_std: f64,
    pub cloud_cover: f64,
}

/// Structured failure causes for ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("network unreachable: {0}")]
    Transport(String),

    #[error("HTTP {status} from {service}")]
    HttpStatus { service: &'static str, status: u16 },

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("credentials missing or placeholder: {0}")]
    MissingCredentials(String),

    #[error("response parse failed: {0}")]
    Parse(String),

    #[error("no usable rows in response")]
    EmptyResult,

    #[error("imagery backend not initialized")]
    BackendUnavailable,

    #[error("export did not complete after {attempts} polls")]
    ExportTimeout { attempts: u32 },

    #[error("export task {0}")]
    ExportFailed(String),
}

/// Where a fetch's rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Rows parsed from the remote service.
    Remote,
    /// Deterministic synthetic fallback.
    Synthetic,
    /// Intentionally empty (runtime failure against a live backend).
    Empty,
}

/// Rows plus provenance. `degraded` carries the error that pushed the
/// fetch off the remote path, if any.
#[derive(Debug)]
pub struct FetchResult<T> {
    pub rows: Vec<T>,
    pub source: DataSource,
    pub degraded: Option<IngestError>,
}

impl<T> FetchResult<T> {
    pub fn remote(rows: Vec<T>) -> Self {
        Self {
            rows,
            source: DataSource::Remote,
            degraded: None,
        }
    }

    pub fn synthetic(rows: Vec<T>, cause: IngestError) -> Self {
        Self {
            rows,
            source: DataSource::Synthetic,
            degraded: Some(cause),
        }
    }

    pub fn empty(cause: IngestError) -> Self {
        Self {
            rows: Vec::new(),
            source: DataSource::Empty,
            degraded: Some(cause),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}
