//! Per-field feature rows joined out of the merged store.
//!
//! A field only gets a row when it appears in both `farm_fields` and
//! `sentinel_ndvi` (inner join). `gdd_total` is the sum over the whole
//! weather table — one global scalar shared by every field, not a
//! per-field accumulation.

use crate::store::{Store, StoreError};
use std::collections::{BTreeMap, HashMap};

/// Fields with this many NDVI points or fewer get a zero trend; the OLS
/// slope only kicks in from the fourth point.
pub const TREND_MIN_POINTS: usize = 4;

/// One field's model inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub field_id: String,
    /// NDVI at the most recent observation date.
    pub ndvi_latest: f64,
    /// OLS slope of NDVI against ordinal position.
    pub ndvi_trend: f64,
    /// Global growing-degree-day sum.
    pub gdd_total: f64,
    pub crop: String,
}

/// Build feature rows for every field with vegetation data, ordered by
/// field id.
pub fn build_features(store: &Store) -> Result<Vec<FeatureRow>, StoreError> {
    let samples = store.ndvi_series()?;
    let crops: HashMap<String, String> = store.field_crops()?.into_iter().collect();
    let gdd_total = store.gdd_total()?;

    // Samples arrive ordered by (field_id, date); group preserving order.
    let mut by_field: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        by_field
            .entry(sample.field_id)
            .or_default()
            .push(sample.ndvi_mean);
    }

    let mut rows = Vec::new();
    for (field_id, means) in by_field {
        let Some(crop) = crops.get(&field_id) else {
            continue;
        };
        let ndvi_latest = *means.last().expect("grouped fields are non-empty");
        let ndvi_trend = if means.len() < TREND_MIN_POINTS {
            0.0
        } else {
            ols_slope(&means)
        };
        rows.push(FeatureRow {
            field_id,
            ndvi_latest,
            ndvi_trend,
            gdd_total,
            crop: crop.clone(),
        });
    }
    Ok(rows)
}

/// Ordinary-least-squares slope of `values` against 0..n.
pub fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
