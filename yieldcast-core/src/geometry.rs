//! Field boundary geometry.
//!
//! Fields arrive as a GeoJSON FeatureCollection of polygons. The geometry
//! itself never reaches the merged store — only `field_id` and the crop
//! label do — but the boundaries feed two upstream consumers: the station
//! locator (farm centroid) and the imagery backend (one region per field).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Centroid used for station discovery when the geometry file is missing
/// or unreadable (McLean County, IL).
pub const FALLBACK_CENTROID: (f64, f64) = (40.49, -88.99);

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("geometry file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read geometry: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse GeoJSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    #[error("sample geometry generation failed: {0}")]
    Generator(String),
}

/// A single field boundary: immutable reference data.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGeometry {
    pub field_id: String,
    /// Crop planted for the forecast season.
    pub crop_2025: String,
    /// Polygon rings, exterior first, as (lon, lat) pairs.
    pub rings: Vec<Vec<[f64; 2]>>,
    pub crs: String,
}

impl FieldGeometry {
    /// Approximate centroid as the average of the exterior ring's vertices,
    /// returned as (lat, lon). A closing vertex that repeats the first one
    /// is not double-counted.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let ring = self.rings.first()?;
        let mut pts: &[[f64; 2]] = ring;
        if pts.len() > 1 && pts.first() == pts.last() {
            pts = &pts[..pts.len() - 1];
        }
        if pts.is_empty() {
            return None;
        }
        let n = pts.len() as f64;
        let (sum_lon, sum_lat) = pts
            .iter()
            .fold((0.0, 0.0), |(lon, lat), p| (lon + p[0], lat + p[1]));
        Some((sum_lat / n, sum_lon / n))
    }
}

/// External collaborator that produces placeholder field boundaries when
/// no real geometry file exists yet. The pipeline only defines the
/// interface; implementations live outside this crate.
pub trait SampleGeometryWriter {
    fn write_sample(&self, path: &Path) -> Result<(), GeometryError>;
}

// GeoJSON wire structs. Only what the pipeline reads.

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
    #[serde(default)]
    crs: Option<Crs>,
}

#[derive(Debug, Deserialize)]
struct Crs {
    properties: CrsProperties,
}

#[derive(Debug, Deserialize)]
struct CrsProperties {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: FeatureProperties,
    geometry: GeoJsonGeometry,
}

#[derive(Debug, Deserialize)]
struct FeatureProperties {
    field_id: String,
    crop_2025: String,
}

#[derive(Debug, Deserialize)]
struct GeoJsonGeometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: serde_json::Value,
}

/// Load field boundaries from a GeoJSON FeatureCollection.
pub fn load_fields(path: &Path) -> Result<Vec<FieldGeometry>, GeometryError> {
    if !path.exists() {
        return Err(GeometryError::Missing(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    parse_fields(&raw)
}

/// Load field boundaries, invoking the sample-geometry writer first when
/// the file is absent and a writer was supplied.
pub fn ensure_fields(
    path: &Path,
    writer: Option<&dyn SampleGeometryWriter>,
) -> Result<Vec<FieldGeometry>, GeometryError> {
    if !path.exists() {
        match writer {
            Some(w) => w.write_sample(path)?,
            None => return Err(GeometryError::Missing(path.to_path_buf())),
        }
    }
    load_fields(path)
}

fn parse_fields(raw: &str) -> Result<Vec<FieldGeometry>, GeometryError> {
    let collection: FeatureCollection = serde_json::from_str(raw)?;
    let crs = collection
        .crs
        .map(|c| c.properties.name)
        .unwrap_or_else(|| "EPSG:4326".to_string());

    let mut fields = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        if feature.geometry.kind != "Polygon" {
            return Err(GeometryError::UnsupportedGeometry(feature.geometry.kind));
        }
        let rings: Vec<Vec<[f64; 2]>> = serde_json::from_value(feature.geometry.coordinates)?;
        fields.push(FieldGeometry {
            field_id: feature.properties.field_id,
            crop_2025: feature.properties.crop_2025,
            rings,
            crs: crs.clone(),
        });
    }
    Ok(fields)
}

/// Farm-level centroid: the average of per-field centroids, (lat, lon).
pub fn farm_centroid(fields: &[FieldGeometry]) -> Option<(f64, f64)> {
    let centroids: Vec<(f64, f64)> = fields.iter().filter_map(|f| f.centroid()).collect();
    if centroids.is_empty() {
        return None;
    }
    let n = centroids.len() as f64;
    let (lat, lon) = centroids
        .iter()
        .fold((0.0, 0.0), |(a, b), c| (a + c.0, b + c.1));
    Some((lat / n, lon / n))
}

/// Centroid for station discovery: farm centroid from the geometry file,
/// or the fixed fallback when the file is missing or unreadable.
pub fn discovery_centroid(path: &Path) -> (f64, f64) {
    match load_fields(path) {
        Ok(fields) => farm_centroid(&fields).unwrap_or(FALLBACK_CENTROID),
        Err(_) => FALLBACK_CENTROID,
    }
}
