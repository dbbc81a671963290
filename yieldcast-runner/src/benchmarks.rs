//! Benchmark lookup for the dashboard's comparison widgets.

use crate::store::Store;
use tracing::warn;

/// Season the NDVI benchmark is computed over.
pub const BENCHMARK_YEAR: i32 = 2024;

/// Fallback NDVI benchmark when the store has no qualifying rows.
pub const NDVI_BENCHMARK_FALLBACK: f64 = 0.72;

/// County average yield, bu/acre. Static reference value.
pub const COUNTY_YIELD_BENCHMARK: f64 = 198.5;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Benchmarks {
    /// Mean NDVI across the benchmark season, or the fallback constant.
    pub ndvi_benchmark: f64,
    pub county_yield: f64,
}

/// Benchmark pair for the comparison widgets. Never fails: an unreadable
/// store or an empty season reads as the fallback constant.
pub fn get_benchmarks(store: &Store) -> Benchmarks {
    let ndvi_benchmark = match store.mean_ndvi_for_year(BENCHMARK_YEAR) {
        Ok(Some(mean)) => mean,
        Ok(None) => NDVI_BENCHMARK_FALLBACK,
        Err(e) => {
            warn!("benchmark query failed ({e}), using fallback");
            NDVI_BENCHMARK_FALLBACK
        }
    };
    Benchmarks {
        ndvi_benchmark,
        county_yield: COUNTY_YIELD_BENCHMARK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_store_returns_the_fallback_pair() {
        // No schema at all: the query errors and both fallbacks apply.
        let store = Store::open_in_memory().unwrap();
        let b = get_benchmarks(&store);
        assert_eq!(b.ndvi_benchmark, 0.72);
        assert_eq!(b.county_yield, 198.5);
    }
}
