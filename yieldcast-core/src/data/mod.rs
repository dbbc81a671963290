//! Source ingestors and their shared result types.

pub mod noaa;
pub mod sentinel;
pub mod source;
pub mod usda;

pub use noaa::{growing_degree_days, WeatherIngestor};
pub use sentinel::{DisabledBackend, ImageryBackend, NdviIngestor};
pub use source::{
    DataSource, FetchResult, IngestError, NdviRecord, WeatherDay, YieldRecord,
};
pub use usda::{Region, UsdaIngestor};
