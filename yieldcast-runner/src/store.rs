//! SQLite store with per-table refresh policies.
//!
//! The schema comes from an external SQL file; a missing definition is
//! fatal because there is no safe default schema. Three tables are
//! full-replace (the replace itself runs in one transaction, so readers
//! never see a half-written table), `sentinel_ndvi` is append-only with
//! no uniqueness constraint. No transaction spans multiple tables: a
//! failure partway through a run leaves the store partially updated, and
//! the caller owns retry policy.
//!
//! The database file is unlocked shared state; overlapping runs can
//! interleave writes.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;
use yieldcast_core::data::source::{NdviRecord, WeatherDay, YieldRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schema definition not found: {0}")]
    SchemaMissing(PathBuf),

    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// One NDVI observation as read back for feature building.
#[derive(Debug, Clone, PartialEq)]
pub struct NdviSample {
    pub field_id: String,
    pub date: NaiveDate,
    pub ndvi_mean: f64,
}

/// Handle to the merged relational store.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create tables from the external schema definition. Fatal when the
    /// definition is missing — the run must abort.
    pub fn init_schema(&self, schema_path: &Path) -> Result<(), StoreError> {
        if !schema_path.exists() {
            return Err(StoreError::SchemaMissing(schema_path.to_path_buf()));
        }
        let sql = std::fs::read_to_string(schema_path)?;
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    // ─── Full-replace writes ─────────────────────────────────────────

    pub fn replace_yield(&mut self, rows: &[YieldRecord]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM usda_yield", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO usda_yield (year, yield_bu_acre, commodity) VALUES (?1, ?2, ?3)",
            )?;
            for r in rows {
                stmt.execute(params![r.year, r.yield_bu_acre, r.commodity])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn replace_weather(&mut self, rows: &[WeatherDay]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM weather_daily", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO weather_daily (date, tmax, tmin, prcp, gdd)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in rows {
                stmt.execute(params![r.date, r.tmax, r.tmin, r.prcp, r.gdd])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Field attribute table: id and crop label only, geometry dropped.
    pub fn replace_fields(&mut self, fields: &[(String, String)]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM farm_fields", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO farm_fields (field_id, crop_2025) VALUES (?1, ?2)")?;
            for (field_id, crop) in fields {
                stmt.execute(params![field_id, crop])?;
            }
        }
        tx.commit()?;
        Ok(fields.len())
    }

    // ─── Append-only write ───────────────────────────────────────────

    /// Append NDVI rows. No deduplication against prior runs.
    pub fn append_ndvi(&mut self, rows: &[NdviRecord]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sentinel_ndvi (field_id, date, ndvi_mean, ndvi_std, cloud_cover)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in rows {
                stmt.execute(params![
                    r.field_id,
                    r.date,
                    r.ndvi_mean,
                    r.ndvi_std,
                    r.cloud_cover
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    // ─── Reads ───────────────────────────────────────────────────────

    /// All NDVI observations ordered by field then date.
    pub fn ndvi_series(&self) -> Result<Vec<NdviSample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT field_id, date, ndvi_mean FROM sentinel_ndvi ORDER BY field_id, date",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NdviSample {
                    field_id: row.get(0)?,
                    date: row.get(1)?,
                    ndvi_mean: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn field_crops(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT field_id, crop_2025 FROM farm_fields")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn yield_values(&self) -> Result<Vec<f64>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT yield_bu_acre FROM usda_yield")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sum of growing-degree-days across the whole weather table.
    pub fn gdd_total(&self) -> Result<f64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COALESCE(SUM(gdd), 0.0) FROM weather_daily", [], |r| {
                r.get(0)
            })?)
    }

    /// Mean NDVI restricted to one calendar year, `None` when no rows
    /// qualify.
    pub fn mean_ndvi_for_year(&self, year: i32) -> Result<Option<f64>, StoreError> {
        Ok(self.conn.query_row(
            "SELECT AVG(ndvi_mean) FROM sentinel_ndvi
             WHERE CAST(strftime('%Y', date) AS INTEGER) = ?1",
            params![year],
            |r| r.get(0),
        )?)
    }

    /// Row count for one of the four pipeline tables.
    pub fn count(&self, table: &str) -> Result<i64, StoreError> {
        // Table names cannot be bound as parameters; restrict to the
        // known schema instead of interpolating caller input.
        let sql = match table {
            "farm_fields" => "SELECT COUNT(*) FROM farm_fields",
            "usda_yield" => "SELECT COUNT(*) FROM usda_yield",
            "weather_daily" => "SELECT COUNT(*) FROM weather_daily",
            "sentinel_ndvi" => "SELECT COUNT(*) FROM sentinel_ndvi",
            other => {
                return Err(StoreError::Sqlite(rusqlite::Error::InvalidParameterName(
                    other.to_string(),
                )))
            }
        };
        Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn schema_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(include_bytes!("../../sql/schema.sql")).unwrap();
        f
    }

    fn day(d: &str) -> NaiveDate {
        d.parse().unwrap()
    }

    #[test]
    fn missing_schema_definition_is_fatal() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .init_schema(Path::new("no/such/schema.sql"))
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMissing(_)));
    }

    #[test]
    fn weather_nulls_survive_the_round_trip() {
        let schema = schema_file();
        let mut store = Store::open_in_memory().unwrap();
        store.init_schema(schema.path()).unwrap();

        store
            .replace_weather(&[WeatherDay {
                date: day("2025-07-01"),
                tmax: None,
                tmin: Some(50.0),
                prcp: None,
                gdd: 10.0,
            }])
            .unwrap();

        let (tmax, prcp): (Option<f64>, Option<f64>) = store
            .conn
            .query_row("SELECT tmax, prcp FROM weather_daily", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(tmax, None);
        assert_eq!(prcp, None);
        assert_eq!(store.gdd_total().unwrap(), 10.0);
    }

    #[test]
    fn replace_is_wholesale_append_accumulates() {
        let schema = schema_file();
        let mut store = Store::open_in_memory().unwrap();
        store.init_schema(schema.path()).unwrap();

        let yield_rows = vec![
            YieldRecord {
                year: 2023,
                yield_bu_acre: 198.0,
                commodity: "Corn".into(),
            },
            YieldRecord {
                year: 2024,
                yield_bu_acre: 202.0,
                commodity: "Corn".into(),
            },
        ];
        store.replace_yield(&yield_rows).unwrap();
        store.replace_yield(&yield_rows).unwrap();
        assert_eq!(store.count("usda_yield").unwrap(), 2);

        let ndvi = vec![NdviRecord {
            field_id: "F1".into(),
            date: day("2025-07-01"),
            ndvi_mean: 0.7,
            ndvi_std: 0.05,
            cloud_cover: 0.0,
        }];
        store.append_ndvi(&ndvi).unwrap();
        store.append_ndvi(&ndvi).unwrap();
        assert_eq!(store.count("sentinel_ndvi").unwrap(), 2);
    }

    #[test]
    fn mean_ndvi_filters_by_calendar_year() {
        let schema = schema_file();
        let mut store = Store::open_in_memory().unwrap();
        store.init_schema(schema.path()).unwrap();

        let row = |date: &str, mean: f64| NdviRecord {
            field_id: "F1".into(),
            date: day(date),
            ndvi_mean: mean,
            ndvi_std: 0.05,
            cloud_cover: 0.0,
        };
        store
            .append_ndvi(&[
                row("2024-06-01", 0.6),
                row("2024-08-01", 0.8),
                row("2025-06-01", 0.2),
            ])
            .unwrap();

        let mean = store.mean_ndvi_for_year(2024).unwrap().unwrap();
        assert!((mean - 0.7).abs() < 1e-12);
        assert_eq!(store.mean_ndvi_for_year(2023).unwrap(), None);
    }
}
