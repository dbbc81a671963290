//! Yieldcast Core — ingestion side of the yield pipeline.
//!
//! This crate contains everything upstream of the merged store:
//! - Farm configuration with environment-override credential resolution
//! - Field boundary geometry (GeoJSON) and centroid math
//! - Weather-station discovery with a TTL'd cache and injected clock
//! - The three source ingestors (USDA yield statistics, NOAA daily
//!   weather, Sentinel-2 zonal NDVI), each degrading to deterministic
//!   synthetic data on failure
//! - Deterministic seed derivation for the downstream model

pub mod config;
pub mod data;
pub mod geometry;
pub mod seed;
pub mod station;

pub use config::{ConfigError, FarmConfig};
pub use data::source::{DataSource, FetchResult, IngestError};
pub use geometry::{FieldGeometry, GeometryError, SampleGeometryWriter};
pub use seed::SeedHierarchy;
pub use station::{Clock, StationCache, StationDiscovery, StationLocator, SystemClock};
