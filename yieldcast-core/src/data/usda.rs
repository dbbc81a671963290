//! USDA Quick Stats yield ingestor.
//!
//! One bounded-timeout request against the Quick Stats query endpoint,
//! CSV response. Fail-open: any transport, status, or parse failure
//! degrades to a fixed two-row synthetic table. No retries.

use super::source::{FetchResult, IngestError, YieldRecord};
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Query region: state plus county, sent upper-cased.
#[derive(Debug, Clone)]
pub struct Region {
    pub state: String,
    pub county: String,
}

/// Yield-statistics ingestor.
pub struct UsdaIngestor {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl UsdaIngestor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url("https://quickstats.nass.usda.gov/api", api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetch county yield statistics for `commodity` from `year_floor`
    /// onward. Degrades to the synthetic table on any failure.
    pub fn fetch(
        &self,
        commodity: &str,
        region: &Region,
        year_floor: i32,
    ) -> FetchResult<YieldRecord> {
        match self.request_csv(commodity, region, year_floor) {
            Ok(rows) if !rows.is_empty() => FetchResult::remote(rows),
            Ok(_) => {
                warn!("USDA returned no rows, using synthetic yield table");
                FetchResult::synthetic(synthetic_yield(), IngestError::EmptyResult)
            }
            Err(e) => {
                warn!("USDA fetch failed ({e}), using synthetic yield table");
                FetchResult::synthetic(synthetic_yield(), e)
            }
        }
    }

    fn request_csv(
        &self,
        commodity: &str,
        region: &Region,
        year_floor: i32,
    ) -> Result<Vec<YieldRecord>, IngestError> {
        let url = format!("{}/api_GET", self.base_url);
        let year_floor = year_floor.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("commodity_desc", commodity.to_uppercase().as_str()),
                ("year__GE", year_floor.as_str()),
                ("state_name", region.state.to_uppercase().as_str()),
                ("county_name", region.county.to_uppercase().as_str()),
                ("statisticcat_desc", "YIELD"),
                ("format", "CSV"),
            ])
            .send()
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                service: "usda quick stats",
                status: status.as_u16(),
            });
        }

        let body = resp
            .text()
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        parse_csv(&body, commodity)
    }
}

/// Parse the Quick Stats CSV body into yield rows. Only the `year` and
/// `Value` columns are kept; the commodity label is title-cased from the
/// query parameter.
fn parse_csv(body: &str, commodity: &str) -> Result<Vec<YieldRecord>, IngestError> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| IngestError::Parse(e.to_string()))?
        .clone();

    let year_idx = column_index(&headers, "year")?;
    let value_idx = column_index(&headers, "Value")?;
    let label = title_case(commodity);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::Parse(e.to_string()))?;
        let year: i32 = field(&record, year_idx)?
            .parse()
            .map_err(|e| IngestError::Parse(format!("bad year: {e}")))?;
        // Quick Stats formats values with thousands separators.
        let value: f64 = field(&record, value_idx)?
            .replace(',', "")
            .trim()
            .parse()
            .map_err(|e| IngestError::Parse(format!("bad Value: {e}")))?;
        rows.push(YieldRecord {
            year,
            yield_bu_acre: value,
            commodity: label.clone(),
        });
    }
    Ok(rows)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, IngestError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| IngestError::Parse(format!("missing column: {name}")))
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize) -> Result<&'a str, IngestError> {
    record
        .get(idx)
        .ok_or_else(|| IngestError::Parse(format!("short record at column {idx}")))
}

fn title_case(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => lower,
    }
}

/// Fixed fallback table: two corn seasons.
pub fn synthetic_yield() -> Vec<YieldRecord> {
    vec![
        YieldRecord {
            year: 2023,
            yield_bu_acre: 198.0,
            commodity: "Corn".to_string(),
        },
        YieldRecord {
            year: 2024,
            yield_bu_acre: 202.0,
            commodity: "Corn".to_string(),
        },
    ]
}
