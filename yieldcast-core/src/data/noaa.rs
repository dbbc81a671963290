//! NOAA CDO daily-weather ingestor.
//!
//! Fetches the most recent 30 days of GHCND observations (TMAX, TMIN,
//! PRCP) for one station, pivots them into one row per date, and derives
//! growing-degree-days. Station resolution prefers the configured id,
//! then the cached/discovered nearest station. Every failure mode lands
//! on the synthetic 5-day series; nothing propagates.

use super::source::{FetchResult, IngestError, WeatherDay};
use crate::config::PLACEHOLDER_NOAA_TOKEN;
use crate::station::{Clock, StationDiscovery};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

const OBSERVATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Observation window, in days back from today.
const WINDOW_DAYS: i64 = 30;

/// GDD temperature defaults when a bound is missing. A lossy stand-in,
/// not null propagation: a day with only one temperature still gets a
/// heat-accumulation estimate.
const DEFAULT_TMAX: f64 = 70.0;
const DEFAULT_TMIN: f64 = 50.0;

/// Growing-degree-days: clamped average temperature above the 50 °F base.
pub fn growing_degree_days(tmax: Option<f64>, tmin: Option<f64>) -> f64 {
    let tmax = tmax.unwrap_or(DEFAULT_TMAX);
    let tmin = tmin.unwrap_or(DEFAULT_TMIN);
    ((tmax + tmin) / 2.0).clamp(50.0, 86.0) - 50.0
}

#[derive(Debug, Deserialize)]
struct ObservationResponse {
    #[serde(default)]
    results: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    datatype: String,
    value: Option<f64>,
}

/// Daily-weather ingestor.
pub struct WeatherIngestor {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
    station_id: Option<String>,
}

impl WeatherIngestor {
    pub fn new(token: impl Into<String>, station_id: Option<String>) -> Self {
        Self::with_base_url("https://www.ncdc.noaa.gov/cdo-web/api/v2", token, station_id)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: impl Into<String>,
        station_id: Option<String>,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(OBSERVATION_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            station_id,
        }
    }

    /// Fetch the daily series. The discovery handle is only consulted when
    /// no station is configured or the configured one returns nothing.
    pub fn fetch<C: Clock>(&self, discovery: &StationDiscovery<'_, C>) -> FetchResult<WeatherDay> {
        if self.token == PLACEHOLDER_NOAA_TOKEN {
            warn!("NOAA token is the placeholder, using synthetic weather");
            return FetchResult::synthetic(
                mock_weather(),
                IngestError::MissingCredentials("NOAA token not configured".into()),
            );
        }

        let observations = self.resolve_observations(discovery);
        if observations.is_empty() {
            warn!("no usable weather observations, using synthetic weather");
            return FetchResult::synthetic(mock_weather(), IngestError::EmptyResult);
        }

        let rows = pivot_daily(&observations);
        if rows.is_empty() {
            return FetchResult::synthetic(mock_weather(), IngestError::EmptyResult);
        }
        info!(days = rows.len(), "weather series ingested");
        FetchResult::remote(rows)
    }

    /// Configured station first; if it probes empty, fall through to
    /// cache/discovery.
    fn resolve_observations<C: Clock>(&self, discovery: &StationDiscovery<'_, C>) -> Vec<Observation> {
        if let Some(id) = &self.station_id {
            match self.fetch_observations(id) {
                Ok(obs) if !obs.is_empty() => {
                    info!(station = %id, records = obs.len(), "configured station used");
                    return obs;
                }
                Ok(_) => warn!(station = %id, "configured station returned no records"),
                Err(e) => warn!(station = %id, "configured station probe failed: {e}"),
            }
        }
        let Some(id) = discovery.discover() else {
            return Vec::new();
        };
        match self.fetch_observations(&id) {
            Ok(obs) => obs,
            Err(e) => {
                warn!(station = %id, "observation fetch failed: {e}");
                Vec::new()
            }
        }
    }

    fn fetch_observations(&self, station_id: &str) -> Result<Vec<Observation>, IngestError> {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(WINDOW_DAYS);
        let url = format!("{}/data", self.base_url);

        let resp = self
            .client
            .get(&url)
            .header("token", &self.token)
            .query(&[
                ("datasetid", "GHCND"),
                ("stationid", station_id),
                ("startdate", start.format("%Y-%m-%d").to_string().as_str()),
                ("enddate", end.format("%Y-%m-%d").to_string().as_str()),
                ("datatypeid", "TMAX,TMIN,PRCP"),
                ("limit", "1000"),
                ("units", "standard"),
            ])
            .send()
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IngestError::AuthRejected("NOAA token rejected".into()));
        }
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                service: "noaa observations",
                status: status.as_u16(),
            });
        }

        let body: ObservationResponse = resp
            .json()
            .map_err(|e| IngestError::Parse(e.to_string()))?;
        Ok(body.results)
    }
}

/// Pivot long-format observations into one row per date. Only the three
/// expected datatypes survive; unparseable dates are dropped. The map
/// keys guarantee date uniqueness and ascending order.
fn pivot_daily(observations: &[Observation]) -> Vec<WeatherDay> {
    #[derive(Default)]
    struct Partial {
        tmax: Option<f64>,
        tmin: Option<f64>,
        prcp: Option<f64>,
    }

    let mut by_date: BTreeMap<NaiveDate, Partial> = BTreeMap::new();
    for obs in observations {
        let prefix = obs.date.get(..10).unwrap_or(&obs.date);
        let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") else {
            continue;
        };
        let slot = by_date.entry(date).or_default();
        match obs.datatype.as_str() {
            "TMAX" => slot.tmax = obs.value,
            "TMIN" => slot.tmin = obs.value,
            "PRCP" => slot.prcp = obs.value,
            _ => {}
        }
    }

    by_date
        .into_iter()
        .map(|(date, p)| WeatherDay {
            date,
            tmax: p.tmax,
            tmin: p.tmin,
            prcp: p.prcp,
            gdd: growing_degree_days(p.tmax, p.tmin),
        })
        .collect()
}

/// The synthetic 5-day series: most recent five days, ascending, ending
/// today.
pub fn mock_weather() -> Vec<WeatherDay> {
    let today = Utc::now().date_naive();
    const TMAX: [f64; 5] = [55.0, 58.0, 60.0, 57.0, 54.0];
    const TMIN: [f64; 5] = [38.0, 40.0, 42.0, 39.0, 37.0];
    const PRCP: [f64; 5] = [0.0, 0.1, 0.0, 0.3, 0.0];
    const GDD: [f64; 5] = [1.5, 4.0, 6.0, 3.0, 0.5];

    (0..5)
        .map(|i| WeatherDay {
            date: today - Duration::days(4 - i as i64),
            tmax: Some(TMAX[i]),
            tmin: Some(TMIN[i]),
            prcp: Some(PRCP[i]),
            gdd: GDD[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::DataSource;
    use crate::station::{StationCache, StationDiscovery, StationLocator, SystemClock};
    use proptest::prelude::*;

    fn obs(date: &str, datatype: &str, value: f64) -> Observation {
        Observation {
            date: date.to_string(),
            datatype: datatype.to_string(),
            value: Some(value),
        }
    }

    fn offline_discovery_parts() -> (StationLocator, tempfile::TempDir) {
        (
            StationLocator::with_base_url("http://127.0.0.1:9"),
            tempfile::tempdir().unwrap(),
        )
    }

    #[test]
    fn gdd_clamps_average_above_base() {
        assert_eq!(growing_degree_days(Some(70.0), Some(50.0)), 10.0);
        assert_eq!(growing_degree_days(Some(90.0), Some(80.0)), 35.0);
        // Clamp ceiling
        assert_eq!(growing_degree_days(Some(100.0), Some(90.0)), 36.0);
        // Cold day bottoms out at zero
        assert_eq!(growing_degree_days(Some(40.0), Some(20.0)), 0.0);
    }

    #[test]
    fn gdd_defaults_missing_temperatures() {
        // 70/50 defaults average to 60 → 10 GDD
        assert_eq!(growing_degree_days(None, None), 10.0);
        assert_eq!(growing_degree_days(Some(70.0), None), 10.0);
        assert_eq!(growing_degree_days(None, Some(50.0)), 10.0);
    }

    proptest! {
        #[test]
        fn gdd_is_bounded(tmax in -50.0..150.0f64, tmin in -50.0..150.0f64) {
            let gdd = growing_degree_days(Some(tmax), Some(tmin));
            prop_assert!((0.0..=36.0).contains(&gdd));
        }
    }

    #[test]
    fn mock_series_matches_contract() {
        let rows = mock_weather();
        assert_eq!(rows.len(), 5);
        let tmax: Vec<f64> = rows.iter().map(|r| r.tmax.unwrap()).collect();
        let tmin: Vec<f64> = rows.iter().map(|r| r.tmin.unwrap()).collect();
        let prcp: Vec<f64> = rows.iter().map(|r| r.prcp.unwrap()).collect();
        let gdd: Vec<f64> = rows.iter().map(|r| r.gdd).collect();
        assert_eq!(tmax, [55.0, 58.0, 60.0, 57.0, 54.0]);
        assert_eq!(tmin, [38.0, 40.0, 42.0, 39.0, 37.0]);
        assert_eq!(prcp, [0.0, 0.1, 0.0, 0.3, 0.0]);
        assert_eq!(gdd, [1.5, 4.0, 6.0, 3.0, 0.5]);
        // Ascending, ending today
        assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(rows[4].date, Utc::now().date_naive());
    }

    #[test]
    fn pivot_produces_one_row_per_date() {
        let observations = vec![
            obs("2025-07-01T00:00:00", "TMAX", 70.0),
            obs("2025-07-01T00:00:00", "TMIN", 50.0),
            obs("2025-07-01T00:00:00", "PRCP", 0.2),
            obs("2025-07-02T00:00:00", "TMAX", 90.0),
            obs("2025-07-02T00:00:00", "TMIN", 80.0),
            // Unknown datatype is filtered out
            obs("2025-07-02T00:00:00", "SNOW", 1.0),
        ];
        let rows = pivot_daily(&observations);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].gdd, 10.0);
        assert_eq!(rows[0].prcp, Some(0.2));
        assert_eq!(rows[1].gdd, 35.0);
        // PRCP absent on the second day stays None, not dropped
        assert_eq!(rows[1].prcp, None);
    }

    #[test]
    fn pivot_drops_unparseable_dates() {
        let observations = vec![
            obs("not-a-date", "TMAX", 70.0),
            obs("2025-07-01T00:00:00", "TMAX", 70.0),
        ];
        assert_eq!(pivot_daily(&observations).len(), 1);
    }

    #[test]
    fn placeholder_token_short_circuits_to_mock() {
        let (locator, dir) = offline_discovery_parts();
        let cache = StationCache::new(dir.path().join("cache.json"));
        let discovery =
            StationDiscovery::new(&locator, &cache, (40.49, -88.99), "t");

        let ingestor = WeatherIngestor::new(PLACEHOLDER_NOAA_TOKEN, None);
        let result = ingestor.fetch(&discovery);
        assert_eq!(result.source, DataSource::Synthetic);
        assert_eq!(result.rows, mock_weather());
        assert!(matches!(
            result.degraded,
            Some(IngestError::MissingCredentials(_))
        ));
    }

    #[test]
    fn unreachable_service_degrades_to_mock() {
        let (locator, dir) = offline_discovery_parts();
        let cache = StationCache::new(dir.path().join("cache.json"));
        let discovery =
            StationDiscovery::new(&locator, &cache, (40.49, -88.99), "real-token");

        let ingestor = WeatherIngestor::with_base_url("http://127.0.0.1:9", "real-token", None);
        let result = ingestor.fetch(&discovery);
        assert_eq!(result.source, DataSource::Synthetic);
        assert_eq!(result.rows, mock_weather());
        assert!(matches!(result.degraded, Some(IngestError::EmptyResult)));
    }
}
