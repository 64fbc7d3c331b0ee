//! Feature table persistence: SQLite store and CSV export.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::events::SupplierId;
use crate::features::{
    assert_schema_compatible, FeatureColumn, FeatureError, FeatureRow, FeatureSchema,
    FeatureTable, FEATURE_TABLE_COLUMNS,
};
use crate::kpis::{MonthlySupplierKpi, YearMonth};

const FEATURE_TABLE: &str = "supplier_daily_features";
const KPI_TABLE: &str = "supplier_monthly_kpis";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("store at {path} has no feature table")]
    MissingTable { path: PathBuf },
    #[error("invalid stored value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
    #[error(transparent)]
    Schema(#[from] FeatureError),
}

pub struct FeatureStore {
    path: PathBuf,
    conn: Connection,
}

impl FeatureStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            CREATE TABLE IF NOT EXISTS feature_meta (
                k TEXT PRIMARY KEY,
                v TEXT NOT NULL
            ) WITHOUT ROWID;
            ",
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Replaces the stored feature table and KPI series in one transaction.
    pub fn write_table(
        &mut self,
        table: &FeatureTable,
        kpis: &[MonthlySupplierKpi],
    ) -> Result<(), StoreError> {
        self.write_table_then(table, kpis, || Ok(()))
    }

    /// Like [`FeatureStore::write_table`], running `before_commit` once every
    /// row is written. The transaction rolls back if it fails.
    pub fn write_table_then<F>(
        &mut self,
        table: &FeatureTable,
        kpis: &[MonthlySupplierKpi],
        before_commit: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce() -> Result<(), StoreError>,
    {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "
            DROP TABLE IF EXISTS {FEATURE_TABLE};
            CREATE TABLE {FEATURE_TABLE} (
                supplier_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                qty_ordered INTEGER NOT NULL,
                order_value REAL NOT NULL,
                qty_delivered INTEGER NOT NULL,
                defect_units INTEGER NOT NULL,
                on_time REAL NOT NULL,
                defect_rate REAL NOT NULL,
                fill_rate REAL NOT NULL,
                roll_on_time_7 REAL NOT NULL,
                roll_defect_7 REAL NOT NULL,
                roll_fill_7 REAL NOT NULL,
                target_late INTEGER NOT NULL,
                PRIMARY KEY (supplier_id, date)
            ) WITHOUT ROWID;
            "
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "
                INSERT INTO {FEATURE_TABLE} (
                    supplier_id,
                    date,
                    qty_ordered,
                    order_value,
                    qty_delivered,
                    defect_units,
                    on_time,
                    defect_rate,
                    fill_rate,
                    roll_on_time_7,
                    roll_defect_7,
                    roll_fill_7,
                    target_late
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "
            ))?;

            for row in &table.rows {
                stmt.execute(params![
                    row.supplier_id.0,
                    row.date.format("%Y-%m-%d").to_string(),
                    to_sql_int(row.qty_ordered, "qty_ordered")?,
                    row.order_value,
                    to_sql_int(row.qty_delivered, "qty_delivered")?,
                    to_sql_int(row.defect_units, "defect_units")?,
                    row.on_time,
                    row.defect_rate,
                    row.fill_rate,
                    row.roll_on_time_7,
                    row.roll_defect_7,
                    row.roll_fill_7,
                    row.target_late,
                ])?;
            }

            let mut meta = tx.prepare(
                "INSERT INTO feature_meta (k, v) VALUES (?1, ?2)
                 ON CONFLICT(k) DO UPDATE SET v = excluded.v",
            )?;
            meta.execute(params!["schema_version", table.schema.version.to_string()])?;
            meta.execute(params!["schema_fingerprint", table.schema.fingerprint])?;
            meta.execute(params!["row_count", table.rows.len().to_string()])?;
        }
        write_kpis(&tx, kpis)?;
        before_commit()?;
        tx.commit()?;

        info!(
            component = "store",
            event = "store.write.finish",
            store_path = %self.path.display(),
            rows = table.rows.len(),
            kpi_rows = kpis.len(),
            fingerprint = %table.schema.fingerprint
        );
        Ok(())
    }

    /// Reads the stored table back after checking it was written under the
    /// expected schema.
    pub fn load_table(
        &self,
        expected_version: u32,
        expected_fingerprint: &str,
    ) -> Result<FeatureTable, StoreError> {
        let version = self.meta("schema_version")?;
        let fingerprint = self.meta("schema_fingerprint")?;
        let (Some(version), Some(fingerprint)) = (version, fingerprint) else {
            return Err(StoreError::MissingTable {
                path: self.path.clone(),
            });
        };
        let version = version
            .parse::<u32>()
            .map_err(|_| StoreError::InvalidValue {
                column: "schema_version",
                value: version.clone(),
            })?;

        let schema = FeatureSchema {
            version,
            fingerprint,
            columns: FEATURE_TABLE_COLUMNS
                .iter()
                .map(|(name, dtype)| FeatureColumn {
                    name: (*name).to_string(),
                    dtype: *dtype,
                })
                .collect(),
        };
        assert_schema_compatible(expected_version, expected_fingerprint, &schema)?;

        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT
                supplier_id, date, qty_ordered, order_value, qty_delivered,
                defect_units, on_time, defect_rate, fill_rate,
                roll_on_time_7, roll_defect_7, roll_fill_7, target_late
            FROM {FEATURE_TABLE}
            ORDER BY supplier_id ASC, date ASC
            "
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_date: String = row.get(1)?;
            let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|_| {
                StoreError::InvalidValue {
                    column: "date",
                    value: raw_date.clone(),
                }
            })?;
            out.push(FeatureRow {
                supplier_id: SupplierId(row.get(0)?),
                date,
                qty_ordered: from_sql_int(row.get(2)?, "qty_ordered")?,
                order_value: row.get(3)?,
                qty_delivered: from_sql_int(row.get(4)?, "qty_delivered")?,
                defect_units: from_sql_int(row.get(5)?, "defect_units")?,
                on_time: row.get(6)?,
                defect_rate: row.get(7)?,
                fill_rate: row.get(8)?,
                roll_on_time_7: row.get(9)?,
                roll_defect_7: row.get(10)?,
                roll_fill_7: row.get(11)?,
                target_late: row.get(12)?,
            });
        }

        Ok(FeatureTable { schema, rows: out })
    }

    pub fn load_kpis(&self) -> Result<Vec<MonthlySupplierKpi>, StoreError> {
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [KPI_TABLE],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::MissingTable {
                path: self.path.clone(),
            });
        }

        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT
                year_month, supplier_id, shipments, on_time_shipments,
                qty_ordered, qty_delivered, on_time_rate, fill_rate
            FROM {KPI_TABLE}
            ORDER BY year_month ASC, supplier_id ASC
            "
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_month: String = row.get(0)?;
            let year_month = YearMonth::try_from(raw_month.clone()).map_err(|_| {
                StoreError::InvalidValue {
                    column: "year_month",
                    value: raw_month,
                }
            })?;
            out.push(MonthlySupplierKpi {
                supplier_id: SupplierId(row.get(1)?),
                year_month,
                shipments: from_sql_int(row.get(2)?, "shipments")?,
                on_time_shipments: from_sql_int(row.get(3)?, "on_time_shipments")?,
                qty_ordered: from_sql_int(row.get(4)?, "qty_ordered")?,
                qty_delivered: from_sql_int(row.get(5)?, "qty_delivered")?,
                on_time_rate: row.get(6)?,
                fill_rate: row.get(7)?,
            });
        }
        Ok(out)
    }

    fn meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT v FROM feature_meta WHERE k = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

fn write_kpis(
    tx: &rusqlite::Transaction<'_>,
    kpis: &[MonthlySupplierKpi],
) -> Result<(), StoreError> {
    tx.execute_batch(&format!(
        "
        DROP TABLE IF EXISTS {KPI_TABLE};
        CREATE TABLE {KPI_TABLE} (
            year_month TEXT NOT NULL,
            supplier_id INTEGER NOT NULL,
            shipments INTEGER NOT NULL,
            on_time_shipments INTEGER NOT NULL,
            qty_ordered INTEGER NOT NULL,
            qty_delivered INTEGER NOT NULL,
            on_time_rate REAL,
            fill_rate REAL,
            PRIMARY KEY (year_month, supplier_id)
        ) WITHOUT ROWID;
        "
    ))?;
    let mut stmt = tx.prepare(&format!(
        "
        INSERT INTO {KPI_TABLE} (
            year_month, supplier_id, shipments, on_time_shipments,
            qty_ordered, qty_delivered, on_time_rate, fill_rate
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "
    ))?;
    for kpi in kpis {
        stmt.execute(params![
            kpi.year_month.label(),
            kpi.supplier_id.0,
            to_sql_int(kpi.shipments, "shipments")?,
            to_sql_int(kpi.on_time_shipments, "on_time_shipments")?,
            to_sql_int(kpi.qty_ordered, "qty_ordered")?,
            to_sql_int(kpi.qty_delivered, "qty_delivered")?,
            kpi.on_time_rate,
            kpi.fill_rate,
        ])?;
    }
    Ok(())
}

/// A CSV export written to a sibling `.tmp` file. [`StagedCsv::commit`]
/// renames it into place; dropping it uncommitted removes the temp file.
#[derive(Debug)]
pub struct StagedCsv {
    path: PathBuf,
    tmp_path: PathBuf,
    rows: usize,
    committed: bool,
}

impl StagedCsv {
    pub fn write(path: &Path, rows: &[FeatureRow]) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let staged = Self {
            path: path.to_path_buf(),
            tmp_path: path.with_extension("csv.tmp"),
            rows: rows.len(),
            committed: false,
        };

        let mut writer = csv::Writer::from_path(&staged.tmp_path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(staged)
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        fs::rename(&self.tmp_path, &self.path)?;
        self.committed = true;

        info!(
            component = "store",
            event = "store.csv.finish",
            path = %self.path.display(),
            rows = self.rows
        );
        Ok(())
    }
}

impl Drop for StagedCsv {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Writes the table as CSV next to `path` and renames it into place.
pub fn write_features_csv(path: &Path, rows: &[FeatureRow]) -> Result<(), StoreError> {
    StagedCsv::write(path, rows)?.commit()
}

fn to_sql_int(value: u64, column: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

fn from_sql_int(value: i64, column: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidValue {
        column,
        value: value.to_string(),
    })
}
