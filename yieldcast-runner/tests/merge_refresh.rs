//! Refresh-policy integration tests: full-replace tables stay stable
//! across identical runs, the NDVI table only grows, and a missing
//! schema definition aborts before anything is written.

use std::path::{Path, PathBuf};
use yieldcast_core::data::noaa::mock_weather;
use yieldcast_core::data::usda::synthetic_yield;
use yieldcast_core::geometry::{GeometryError, SampleGeometryWriter};
use yieldcast_runner::merge::{merge, MergeError, MergeInputs};
use yieldcast_runner::store::{Store, StoreError};

fn repo_schema() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("sql/schema.sql")
}

const FIELDS_GEOJSON: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "properties": {"field_id": "F1", "crop_2025": "Corn"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-88.995, 40.515], [-88.985, 40.515],
                    [-88.985, 40.505], [-88.995, 40.505], [-88.995, 40.515]
                ]]
            }
        },
        {
            "type": "Feature",
            "properties": {"field_id": "F2", "crop_2025": "Soybeans"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [-88.975, 40.515], [-88.965, 40.515],
                    [-88.965, 40.505], [-88.975, 40.505], [-88.975, 40.515]
                ]]
            }
        }
    ]
}"#;

const NDVI_CSV: &str = "\
field_id,date,NDVI_mean,NDVI_stdDev\n\
F1,2025-07-01,0.71,0.04\n\
F1,2025-07-06,0.73,0.03\n\
F2,2025-07-01,0.65,0.05\n";

struct Workspace {
    _dir: tempfile::TempDir,
    fields: PathBuf,
    ndvi_csv: PathBuf,
    db: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let fields = dir.path().join("fields.geojson");
    let ndvi_csv = dir.path().join("ndvi_zonal.csv");
    let db = dir.path().join("pipeline.db");
    std::fs::write(&fields, FIELDS_GEOJSON).unwrap();
    std::fs::write(&ndvi_csv, NDVI_CSV).unwrap();
    Workspace {
        _dir: dir,
        fields,
        ndvi_csv,
        db,
    }
}

fn run_merge(ws: &Workspace, store: &mut Store) -> yieldcast_runner::MergeReport {
    let yield_rows = synthetic_yield();
    let weather_rows = mock_weather();
    merge(
        store,
        &repo_schema(),
        MergeInputs {
            yield_rows: &yield_rows,
            weather_rows: &weather_rows,
            fields_path: &ws.fields,
            sample_writer: None,
            ndvi_csv_path: &ws.ndvi_csv,
        },
    )
    .unwrap()
}

#[test]
fn double_merge_replaces_three_tables_and_grows_ndvi() {
    let ws = workspace();
    let mut store = Store::open(&ws.db).unwrap();

    let first = run_merge(&ws, &mut store);
    assert_eq!(first.yield_rows, 2);
    assert_eq!(first.weather_rows, 5);
    assert_eq!(first.field_rows, 2);
    assert_eq!(first.ndvi_appended, 3);

    let second = run_merge(&ws, &mut store);
    assert_eq!(second.ndvi_appended, 3);

    assert_eq!(store.count("usda_yield").unwrap(), 2);
    assert_eq!(store.count("weather_daily").unwrap(), 5);
    assert_eq!(store.count("farm_fields").unwrap(), 2);
    // Append-only: two runs, twice the rows.
    assert_eq!(store.count("sentinel_ndvi").unwrap(), 6);
}

#[test]
fn missing_schema_definition_aborts_before_any_write() {
    let ws = workspace();
    let mut store = Store::open(&ws.db).unwrap();

    let yield_rows = synthetic_yield();
    let weather_rows = mock_weather();
    let err = merge(
        &mut store,
        Path::new("no/such/schema.sql"),
        MergeInputs {
            yield_rows: &yield_rows,
            weather_rows: &weather_rows,
            fields_path: &ws.fields,
            sample_writer: None,
            ndvi_csv_path: &ws.ndvi_csv,
        },
    )
    .unwrap_err();

    assert!(matches!(
        err,
        MergeError::Store(StoreError::SchemaMissing(_))
    ));
    // No tables were created, so even counting fails.
    assert!(store.count("usda_yield").is_err());
}

#[test]
fn mid_merge_failure_leaves_earlier_tables_updated() {
    let ws = workspace();
    // Geometry missing and no writer supplied: step 4 fails after the
    // yield and weather tables have already been replaced.
    std::fs::remove_file(&ws.fields).unwrap();
    let mut store = Store::open(&ws.db).unwrap();

    let yield_rows = synthetic_yield();
    let weather_rows = mock_weather();
    let err = merge(
        &mut store,
        &repo_schema(),
        MergeInputs {
            yield_rows: &yield_rows,
            weather_rows: &weather_rows,
            fields_path: &ws.fields,
            sample_writer: None,
            ndvi_csv_path: &ws.ndvi_csv,
        },
    )
    .unwrap_err();

    assert!(matches!(err, MergeError::Geometry(_)));
    // Not transactional across tables: the first two writes stand.
    assert_eq!(store.count("usda_yield").unwrap(), 2);
    assert_eq!(store.count("weather_daily").unwrap(), 5);
    assert_eq!(store.count("farm_fields").unwrap(), 0);
    assert_eq!(store.count("sentinel_ndvi").unwrap(), 0);
}

#[test]
fn absent_geometry_invokes_the_sample_writer() {
    struct CannedFields;

    impl SampleGeometryWriter for CannedFields {
        fn write_sample(&self, path: &Path) -> Result<(), GeometryError> {
            std::fs::write(path, FIELDS_GEOJSON)?;
            Ok(())
        }
    }

    let ws = workspace();
    std::fs::remove_file(&ws.fields).unwrap();
    let mut store = Store::open(&ws.db).unwrap();

    let yield_rows = synthetic_yield();
    let weather_rows = mock_weather();
    let report = merge(
        &mut store,
        &repo_schema(),
        MergeInputs {
            yield_rows: &yield_rows,
            weather_rows: &weather_rows,
            fields_path: &ws.fields,
            sample_writer: Some(&CannedFields),
            ndvi_csv_path: &ws.ndvi_csv,
        },
    )
    .unwrap();

    assert_eq!(report.field_rows, 2);
    assert!(ws.fields.exists());
}

#[test]
fn unmappable_ndvi_columns_skip_the_load_and_report() {
    let ws = workspace();
    std::fs::write(&ws.ndvi_csv, "field_id,date,mean\nF1,2025-07-01,0.7\n").unwrap();
    let mut store = Store::open(&ws.db).unwrap();

    let report = run_merge(&ws, &mut store);
    assert_eq!(report.ndvi_appended, 0);
    assert_eq!(report.ndvi_missing_columns, vec!["ndvi_std".to_string()]);
    assert_eq!(store.count("sentinel_ndvi").unwrap(), 0);
}

#[test]
fn absent_ndvi_intermediate_appends_nothing() {
    let ws = workspace();
    std::fs::remove_file(&ws.ndvi_csv).unwrap();
    let mut store = Store::open(&ws.db).unwrap();

    let report = run_merge(&ws, &mut store);
    assert_eq!(report.ndvi_appended, 0);
    assert!(report.ndvi_missing_columns.is_empty());
}
