//! Weather-station discovery and the station cache.
//!
//! Discovery queries the NOAA CDO station directory around the farm
//! centroid and picks the nearest station that still reports recent data.
//! The winner is cached in a single global JSON record with a 30-day TTL;
//! the clock is injected so expiry is testable without wall-clock sleeps.
//!
//! The cache file carries no lock. Two overlapping pipeline runs can race
//! on it; last writer wins.

use crate::data::source::IngestError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Stations must have reported at least once on or after this date to be
/// considered live. Lexicographic comparison is safe on ISO dates.
const RECENCY_CUTOFF: &str = "2025-01-01";

/// Minimum data-coverage fraction for a candidate station.
const MIN_DATA_COVERAGE: f64 = 0.9;

/// Flat-earth degrees-to-kilometres factor. Good enough at the ±1° extent
/// the directory query uses.
const DEG_TO_KM: f64 = 111.0;

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 60.0;

/// Cache entries live this long before forcing rediscovery.
pub const STATION_TTL_SECS: i64 = 30 * 86_400;

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(20);

// ─── Clock ───────────────────────────────────────────────────────────

/// Injected time source for the cache TTL.
pub trait Clock {
    /// Seconds since the Unix epoch.
    fn now_epoch(&self) -> i64;
}

/// Wall-clock implementation used outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        Utc::now().timestamp()
    }
}

// ─── Cache ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    station_id: String,
    /// Epoch seconds after which the entry is stale.
    expires: i64,
}

/// Single-record station cache backed by a JSON file.
#[derive(Debug)]
pub struct StationCache<C = SystemClock> {
    path: PathBuf,
    clock: C,
}

impl StationCache<SystemClock> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, SystemClock)
    }
}

impl<C: Clock> StationCache<C> {
    pub fn with_clock(path: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    /// Return the cached station id while the entry is still live.
    /// Missing, unreadable, or expired entries all read as `None`.
    pub fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        if self.clock.now_epoch() < entry.expires {
            Some(entry.station_id)
        } else {
            None
        }
    }

    /// Persist a station id with a fresh 30-day expiry.
    pub fn store(&self, station_id: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry = CacheEntry {
            station_id: station_id.to_string(),
            expires: self.clock.now_epoch() + STATION_TTL_SECS,
        };
        std::fs::write(&self.path, serde_json::to_string(&entry)?)
    }
}

// ─── Locator ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    results: Vec<StationMeta>,
}

#[derive(Debug, Deserialize)]
struct StationMeta {
    id: String,
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    maxdate: String,
    #[serde(default)]
    datacoverage: f64,
}

/// Geospatial nearest-station search against the CDO station directory.
pub struct StationLocator {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl StationLocator {
    pub fn new() -> Self {
        Self::with_base_url("https://www.ncdc.noaa.gov/cdo-web/api/v2")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Find the nearest live station within `max_distance_km` of the
    /// centroid. Any directory failure is recovered to `None`; the weather
    /// ingestor falls through to its synthetic series.
    pub fn locate(
        &self,
        lat: f64,
        lon: f64,
        token: &str,
        max_distance_km: f64,
    ) -> Option<String> {
        match self.query_directory(lat, lon, token) {
            Ok(stations) => {
                let best = select_nearest(&stations, lat, lon, max_distance_km)?;
                info!(
                    station = %best.id,
                    name = %best.name,
                    distance_km = best.distance_km,
                    "selected weather station"
                );
                Some(best.id)
            }
            Err(e) => {
                warn!("station search failed: {e}");
                None
            }
        }
    }

    fn query_directory(
        &self,
        lat: f64,
        lon: f64,
        token: &str,
    ) -> Result<Vec<StationMeta>, IngestError> {
        let url = format!("{}/stations", self.base_url);
        let extent = format!("{},{},{},{}", lat - 1.0, lon - 1.0, lat + 1.0, lon + 1.0);
        let resp = self
            .client
            .get(&url)
            .header("token", token)
            .query(&[
                ("datasetid", "GHCND"),
                ("datatypeid", "TMAX"),
                ("limit", "1000"),
                ("extent", extent.as_str()),
                ("units", "standard"),
            ])
            .send()
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                service: "noaa station directory",
                status: status.as_u16(),
            });
        }

        let body: DirectoryResponse = resp
            .json()
            .map_err(|e| IngestError::Parse(e.to_string()))?;
        Ok(body.results)
    }
}

impl Default for StationLocator {
    fn default() -> Self {
        Self::new()
    }
}

struct Nearest {
    id: String,
    name: String,
    distance_km: f64,
}

fn select_nearest(
    stations: &[StationMeta],
    lat: f64,
    lon: f64,
    max_distance_km: f64,
) -> Option<Nearest> {
    stations
        .iter()
        .filter(|s| s.maxdate.as_str() >= RECENCY_CUTOFF && s.datacoverage > MIN_DATA_COVERAGE)
        .map(|s| {
            let d_lat = s.latitude - lat;
            let d_lon = s.longitude - lon;
            let distance_km = (d_lat * d_lat + d_lon * d_lon).sqrt() * DEG_TO_KM;
            Nearest {
                id: s.id.clone(),
                name: s.name.clone(),
                distance_km,
            }
        })
        .filter(|n| n.distance_km <= max_distance_km)
        .min_by(|a, b| a.distance_km.total_cmp(&b.distance_km))
}

// ─── Discovery ───────────────────────────────────────────────────────

/// Cache-first station resolution: a live cache entry short-circuits the
/// directory query; a fresh discovery is persisted for the next run.
pub struct StationDiscovery<'a, C: Clock = SystemClock> {
    locator: &'a StationLocator,
    cache: &'a StationCache<C>,
    centroid: (f64, f64),
    token: &'a str,
    max_distance_km: f64,
}

impl<'a, C: Clock> StationDiscovery<'a, C> {
    pub fn new(
        locator: &'a StationLocator,
        cache: &'a StationCache<C>,
        centroid: (f64, f64),
        token: &'a str,
    ) -> Self {
        Self {
            locator,
            cache,
            centroid,
            token,
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
        }
    }

    pub fn discover(&self) -> Option<String> {
        if let Some(id) = self.cache.load() {
            return Some(id);
        }
        let (lat, lon) = self.centroid;
        let id = self
            .locator
            .locate(lat, lon, self.token, self.max_distance_km)?;
        if let Err(e) = self.cache.store(&id) {
            warn!("failed to persist station cache: {e}");
        }
        Some(id)
    }
}
