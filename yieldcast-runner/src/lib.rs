//! Yieldcast Runner — everything downstream of ingestion.
//!
//! This crate builds on `yieldcast-core` to provide:
//! - The SQLite store with per-table refresh policies
//! - The schema merge (full-replace tables, append-only NDVI)
//! - Per-field feature building (latest NDVI, trend, global GDD)
//! - The ensemble yield model and benchmark lookup
//! - Top-level pipeline orchestration

pub mod benchmarks;
pub mod features;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod store;

pub use benchmarks::{get_benchmarks, Benchmarks};
pub use features::{build_features, FeatureRow};
pub use merge::{merge, MergeError, MergeInputs, MergeReport};
pub use model::{train_and_predict, Forecast, YieldForecast};
pub use pipeline::{run, PipelineError, PipelinePaths};
pub use store::{Store, StoreError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn result_types_are_send_sync() {
        assert_send::<FeatureRow>();
        assert_sync::<FeatureRow>();
        assert_send::<Forecast>();
        assert_sync::<Forecast>();
        assert_send::<Benchmarks>();
        assert_sync::<Benchmarks>();
        assert_send::<MergeReport>();
        assert_sync::<MergeReport>();
        assert_send::<PipelinePaths>();
        assert_sync::<PipelinePaths>();
    }
}
