//! Daily supplier feature table: ratios, trailing rolling means and the
//! forward late-risk label.

use std::collections::VecDeque;
use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::align::DailySupplierObservation;
use crate::events::SupplierId;
use crate::labels::forward_labels;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const ROLLING_WINDOW: usize = 7;

/// Persisted column order of the feature table.
pub const FEATURE_TABLE_COLUMNS: [(&str, FeatureDType); 13] = [
    ("supplier_id", FeatureDType::Int),
    ("date", FeatureDType::Date),
    ("qty_ordered", FeatureDType::Int),
    ("order_value", FeatureDType::F64),
    ("qty_delivered", FeatureDType::Int),
    ("defect_units", FeatureDType::Int),
    ("on_time", FeatureDType::F64),
    ("defect_rate", FeatureDType::F64),
    ("fill_rate", FeatureDType::F64),
    ("roll_on_time_7", FeatureDType::F64),
    ("roll_defect_7", FeatureDType::F64),
    ("roll_fill_7", FeatureDType::F64),
    ("target_late", FeatureDType::Int),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    Int,
    F64,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lookahead_rows: usize,
    pub min_lookahead_rows: usize,
    pub late_threshold: f64,
    pub split_quantile: f64,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookahead_rows: 7,
            min_lookahead_rows: 3,
            late_threshold: 0.8,
            split_quantile: 0.8,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("duplicate key in {table}: supplier {supplier_id} on {date}")]
    DuplicateKey {
        table: &'static str,
        supplier_id: SupplierId,
        date: NaiveDate,
    },
    #[error("observations not sorted by (supplier_id, date) at row {index}")]
    UnsortedObservations { index: usize },
    #[error("cannot split an empty feature table")]
    EmptyFeatureTable,
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Per-row ratios derived from the aligned counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedRates {
    pub defect_rate: f64,
    pub fill_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingFeatures {
    pub roll_on_time_7: f64,
    pub roll_defect_7: f64,
    pub roll_fill_7: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub supplier_id: SupplierId,
    pub date: NaiveDate,
    pub qty_ordered: u64,
    pub order_value: f64,
    pub qty_delivered: u64,
    pub defect_units: u64,
    pub on_time: f64,
    pub defect_rate: f64,
    pub fill_rate: f64,
    pub roll_on_time_7: f64,
    pub roll_defect_7: f64,
    pub roll_fill_7: f64,
    pub target_late: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn supplier_count(&self) -> usize {
        supplier_partitions(&self.rows, |row| row.supplier_id).len()
    }

    pub fn positive_labels(&self) -> usize {
        self.rows.iter().filter(|row| row.target_late == 1).count()
    }
}

pub fn build_feature_schema(cfg: &FeatureConfig) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = FEATURE_TABLE_COLUMNS
        .iter()
        .map(|(name, dtype)| FeatureColumn {
            name: (*name).to_string(),
            dtype: *dtype,
        })
        .collect();
    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        lookahead_rows = cfg.lookahead_rows,
        min_lookahead_rows = cfg.min_lookahead_rows,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

pub fn validate_config(cfg: &FeatureConfig) -> Result<(), FeatureError> {
    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }
    if cfg.lookahead_rows == 0 {
        return Err(FeatureError::InvalidConfig(
            "lookahead_rows must be > 0".to_string(),
        ));
    }
    if cfg.min_lookahead_rows == 0 || cfg.min_lookahead_rows > cfg.lookahead_rows {
        return Err(FeatureError::InvalidConfig(
            "min_lookahead_rows must be in 1..=lookahead_rows".to_string(),
        ));
    }
    if !(cfg.late_threshold > 0.0 && cfg.late_threshold <= 1.0) {
        return Err(FeatureError::InvalidConfig(
            "late_threshold must be in (0, 1]".to_string(),
        ));
    }
    if !(cfg.split_quantile > 0.0 && cfg.split_quantile < 1.0) {
        return Err(FeatureError::InvalidConfig(
            "split_quantile must be in (0, 1)".to_string(),
        ));
    }
    Ok(())
}

/// Ratio with a zero denominator defined as 0.0.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

pub fn derive_rates(obs: &DailySupplierObservation) -> DerivedRates {
    DerivedRates {
        defect_rate: safe_ratio(obs.defect_units as f64, obs.qty_delivered as f64),
        fill_rate: safe_ratio(obs.qty_delivered as f64, obs.qty_ordered as f64),
    }
}

/// Trailing mean over the last `window` pushed values; shorter at the start.
#[derive(Debug, Clone)]
pub struct RollingMean {
    values: VecDeque<f64>,
    window: usize,
}

impl RollingMean {
    pub fn new(window: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    pub fn push(&mut self, value: f64) -> f64 {
        self.values.push_back(value);
        while self.values.len() > self.window {
            self.values.pop_front();
        }
        self.mean()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}

#[derive(Debug, Clone)]
struct SupplierRolling {
    on_time: RollingMean,
    defect_rate: RollingMean,
    fill_rate: RollingMean,
}

impl SupplierRolling {
    fn new() -> Self {
        Self {
            on_time: RollingMean::new(ROLLING_WINDOW),
            defect_rate: RollingMean::new(ROLLING_WINDOW),
            fill_rate: RollingMean::new(ROLLING_WINDOW),
        }
    }

    fn push(&mut self, on_time: f64, rates: DerivedRates) -> RollingFeatures {
        RollingFeatures {
            roll_on_time_7: self.on_time.push(on_time),
            roll_defect_7: self.defect_rate.push(rates.defect_rate),
            roll_fill_7: self.fill_rate.push(rates.fill_rate),
        }
    }
}

/// Rolling means for one supplier's date-ordered series.
pub fn rolling_partition(
    observations: &[DailySupplierObservation],
    rates: &[DerivedRates],
) -> Vec<RollingFeatures> {
    let mut state = SupplierRolling::new();
    observations
        .iter()
        .zip(rates)
        .map(|(obs, rates)| state.push(obs.on_time, *rates))
        .collect()
}

/// Contiguous index ranges of equal supplier ids in a supplier-sorted slice.
pub fn supplier_partitions<T>(rows: &[T], key: impl Fn(&T) -> SupplierId) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    for idx in 1..=rows.len() {
        if idx == rows.len() || key(&rows[idx]) != key(&rows[start]) {
            if idx > start {
                out.push(start..idx);
            }
            start = idx;
        }
    }
    out
}

/// Builds the full feature table from aligned daily observations, which must
/// be strictly increasing in (supplier_id, date).
pub fn build_feature_table(
    observations: &[DailySupplierObservation],
    cfg: &FeatureConfig,
) -> Result<FeatureTable, FeatureError> {
    validate_config(cfg)?;
    check_sorted(observations)?;

    info!(
        component = "features",
        event = "features.build.start",
        input_rows = observations.len()
    );

    let schema = build_feature_schema(cfg);
    let rates: Vec<DerivedRates> = observations.iter().map(derive_rates).collect();
    let partitions = supplier_partitions(observations, |obs| obs.supplier_id);

    let mut rows = Vec::with_capacity(observations.len());
    for range in &partitions {
        let series = &observations[range.clone()];
        let rolling = rolling_partition(series, &rates[range.clone()]);
        let on_time: Vec<f64> = series.iter().map(|obs| obs.on_time).collect();
        let labels = forward_labels(&on_time, cfg);

        for (offset, obs) in series.iter().enumerate() {
            let derived = rates[range.start + offset];
            let roll = rolling[offset];
            rows.push(FeatureRow {
                supplier_id: obs.supplier_id,
                date: obs.date,
                qty_ordered: obs.qty_ordered,
                order_value: obs.order_value,
                qty_delivered: obs.qty_delivered,
                defect_units: obs.defect_units,
                on_time: obs.on_time,
                defect_rate: derived.defect_rate,
                fill_rate: derived.fill_rate,
                roll_on_time_7: roll.roll_on_time_7,
                roll_defect_7: roll.roll_defect_7,
                roll_fill_7: roll.roll_fill_7,
                target_late: labels[offset],
            });
        }
    }

    let table = FeatureTable { schema, rows };
    info!(
        component = "features",
        event = "features.build.finish",
        output_rows = table.rows.len(),
        suppliers = partitions.len(),
        positive_labels = table.positive_labels()
    );
    Ok(table)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn check_sorted(observations: &[DailySupplierObservation]) -> Result<(), FeatureError> {
    for (index, pair) in observations.windows(2).enumerate() {
        let prev = (pair[0].supplier_id, pair[0].date);
        let next = (pair[1].supplier_id, pair[1].date);
        if next == prev {
            return Err(FeatureError::DuplicateKey {
                table: "observations",
                supplier_id: pair[1].supplier_id,
                date: pair[1].date,
            });
        }
        if next < prev {
            return Err(FeatureError::UnsortedObservations { index: index + 1 });
        }
    }
    Ok(())
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("rolling_window:{ROLLING_WINDOW};"));
    hasher.update(format!(
        "lookahead:{},{},{};",
        cfg.lookahead_rows, cfg.min_lookahead_rows, cfg.late_threshold
    ));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?};", column.dtype));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: i64, day: u32, ordered: u64, delivered: u64, defects: u64, on_time: f64) -> DailySupplierObservation {
        DailySupplierObservation {
            supplier_id: SupplierId(id),
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            qty_ordered: ordered,
            order_value: ordered as f64 * 3.0,
            qty_delivered: delivered,
            defect_units: defects,
            on_time,
        }
    }

    #[test]
    fn zero_denominators_yield_zero_ratios() {
        let rates = derive_rates(&obs(1, 1, 0, 0, 0, 0.0));
        assert_eq!(rates.defect_rate, 0.0);
        assert_eq!(rates.fill_rate, 0.0);

        let rates = derive_rates(&obs(1, 1, 0, 8, 2, 1.0));
        assert_eq!(rates.fill_rate, 0.0);
        assert_eq!(rates.defect_rate, 0.25);

        let rates = derive_rates(&obs(1, 1, 10, 0, 0, 0.0));
        assert_eq!(rates.defect_rate, 0.0);
        assert_eq!(rates.fill_rate, 0.0);

        let rates = derive_rates(&obs(1, 1, 40, 10, 1, 1.0));
        assert_eq!(rates.fill_rate, 10.0 / 40.0);
        assert_eq!(rates.defect_rate, 1.0 / 10.0);
    }

    #[test]
    fn rolling_mean_grows_to_window_then_slides() {
        let mut rolling = RollingMean::new(ROLLING_WINDOW);
        let mut means = Vec::new();
        for value in 1..=9 {
            means.push(rolling.push(value as f64));
            assert_eq!(rolling.len(), value.min(ROLLING_WINDOW));
        }
        assert_eq!(means[0], 1.0);
        assert_eq!(means[1], 1.5);
        assert_eq!(means[6], 4.0);
        assert_eq!(means[7], 5.0);
        assert_eq!(means[8], 6.0);
    }

    #[test]
    fn partitions_split_on_supplier_change() {
        let rows = vec![obs(1, 1, 1, 1, 0, 1.0), obs(1, 2, 1, 1, 0, 1.0), obs(4, 1, 1, 1, 0, 1.0)];
        let parts = supplier_partitions(&rows, |r| r.supplier_id);
        assert_eq!(parts, vec![0..2, 2..3]);
        assert!(supplier_partitions::<DailySupplierObservation>(&[], |r| r.supplier_id).is_empty());
    }

    #[test]
    fn rolling_windows_never_cross_suppliers() {
        let rows = vec![
            obs(1, 1, 10, 10, 0, 0.0),
            obs(1, 2, 10, 10, 0, 0.0),
            obs(2, 1, 10, 10, 0, 1.0),
            obs(2, 2, 10, 10, 0, 1.0),
        ];
        let table = build_feature_table(&rows, &FeatureConfig::default()).unwrap();
        assert_eq!(table.rows[2].roll_on_time_7, 1.0);
        assert_eq!(table.rows[3].roll_on_time_7, 1.0);
        assert_eq!(table.rows[1].roll_on_time_7, 0.0);
        assert_eq!(table.supplier_count(), 2);
    }

    #[test]
    fn unsorted_or_duplicated_input_is_rejected() {
        let rows = vec![obs(1, 2, 1, 1, 0, 1.0), obs(1, 1, 1, 1, 0, 1.0)];
        assert!(matches!(
            build_feature_table(&rows, &FeatureConfig::default()).unwrap_err(),
            FeatureError::UnsortedObservations { index: 1 }
        ));

        let rows = vec![obs(1, 1, 1, 1, 0, 1.0), obs(1, 1, 2, 1, 0, 1.0)];
        assert!(matches!(
            build_feature_table(&rows, &FeatureConfig::default()).unwrap_err(),
            FeatureError::DuplicateKey { .. }
        ));
    }

    #[test]
    fn config_validation_rejects_inconsistent_lookahead() {
        let cfg = FeatureConfig {
            lookahead_rows: 2,
            min_lookahead_rows: 3,
            ..FeatureConfig::default()
        };
        assert!(matches!(
            validate_config(&cfg).unwrap_err(),
            FeatureError::InvalidConfig(_)
        ));

        let cfg = FeatureConfig {
            split_quantile: 1.0,
            ..FeatureConfig::default()
        };
        assert!(validate_config(&cfg).is_err());
        assert!(validate_config(&FeatureConfig::default()).is_ok());
    }
}
