//! One-shot batch run: events to persisted feature table and split.

use std::env;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::align::{align_daily, alignment_report, AlignmentReport, DailySupplierObservation};
use crate::events::{aggregate_deliveries, aggregate_orders, load_event_tables, EventStoreError};
use crate::features::{
    build_feature_table, validate_config, FeatureConfig, FeatureError, FeatureTable,
};
use crate::kpis::{monthly_kpis, portfolio_monthly, MonthlySupplierKpi, PortfolioMonth};
use crate::split::{split_dataset, DatasetSplit, LabelSource};
use crate::store::{FeatureStore, StagedCsv, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub store_path: PathBuf,
    pub csv_export: Option<PathBuf>,
    pub features: FeatureConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_root = PathBuf::from("data");
        Self {
            store_path: data_root.join("feature_store").join("supplier_features.sqlite"),
            csv_export: None,
            data_root,
            features: FeatureConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Events(#[from] EventStoreError),
    #[error(transparent)]
    Features(#[from] FeatureError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetSummary {
    pub rows: usize,
    pub positives: usize,
    pub label_source: LabelSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub order_events: usize,
    pub shipment_events: usize,
    pub alignment: AlignmentReport,
    pub feature_rows: usize,
    pub suppliers: usize,
    pub positive_labels: usize,
    pub schema_fingerprint: String,
    pub cutoff: NaiveDate,
    pub train: SubsetSummary,
    pub eval: SubsetSummary,
    pub kpi_rows: usize,
    pub portfolio: Vec<PortfolioMonth>,
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub table: FeatureTable,
    pub split: DatasetSplit,
    pub kpis: Vec<MonthlySupplierKpi>,
    pub report: PipelineReport,
}

/// Reads `SRISK_DATA_ROOT`, `SRISK_STORE_PATH` and `SRISK_FEATURES_CSV`.
pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(data_root) = non_empty_var("SRISK_DATA_ROOT") {
        config.data_root = PathBuf::from(data_root);
        config.store_path = config
            .data_root
            .join("feature_store")
            .join("supplier_features.sqlite");
    }
    if let Some(store_path) = non_empty_var("SRISK_STORE_PATH") {
        config.store_path = PathBuf::from(store_path);
    }
    if let Some(csv_export) = non_empty_var("SRISK_FEATURES_CSV") {
        config.csv_export = Some(PathBuf::from(csv_export));
    }

    config
}

/// Features from already-aligned observations; the persisted table and the
/// split are both derived from this.
pub fn build_features(
    observations: &[DailySupplierObservation],
    cfg: &FeatureConfig,
) -> Result<(FeatureTable, DatasetSplit), FeatureError> {
    let table = build_feature_table(observations, cfg)?;
    let split = split_dataset(&table.rows, cfg.split_quantile)?;
    Ok((table, split))
}

pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineRun, PipelineError> {
    validate_config(&config.features)?;
    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        data_root = %config.data_root.display(),
        store_path = %config.store_path.display()
    );

    let events = load_event_tables(&config.data_root)?;
    let orders = aggregate_orders(&events.orders)?;
    let deliveries = aggregate_deliveries(&events.shipments, &events.suppliers)?;
    let aligned = align_daily(&orders, &deliveries)?;
    let alignment = alignment_report(&aligned);
    let observations: Vec<DailySupplierObservation> =
        aligned.into_iter().map(|a| a.observation).collect();

    let (table, split) = build_features(&observations, &config.features)?;
    let kpis = monthly_kpis(&events)?;

    // CSV is staged before the store opens and renamed in just before the
    // SQLite commit; any earlier failure leaves the previous outputs intact.
    let staged = config
        .csv_export
        .as_deref()
        .map(|path| StagedCsv::write(path, &table.rows))
        .transpose()?;
    let mut store = FeatureStore::open(&config.store_path)?;
    store.write_table_then(&table, &kpis, move || match staged {
        Some(staged) => staged.commit(),
        None => Ok(()),
    })?;

    let report = PipelineReport {
        order_events: events.orders.len(),
        shipment_events: events.shipments.len(),
        alignment,
        feature_rows: table.rows.len(),
        suppliers: table.supplier_count(),
        positive_labels: table.positive_labels(),
        schema_fingerprint: table.schema.fingerprint.clone(),
        cutoff: split.cutoff,
        train: SubsetSummary {
            rows: split.train.len(),
            positives: split.train.positives(),
            label_source: split.train.label_source,
        },
        eval: SubsetSummary {
            rows: split.eval.len(),
            positives: split.eval.positives(),
            label_source: split.eval.label_source,
        },
        kpi_rows: kpis.len(),
        portfolio: portfolio_monthly(&kpis),
    };

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        feature_rows = report.feature_rows,
        suppliers = report.suppliers,
        cutoff = %report.cutoff,
        train_rows = report.train.rows,
        eval_rows = report.eval.rows,
        kpi_rows = report.kpi_rows
    );

    Ok(PipelineRun {
        table,
        split,
        kpis,
        report,
    })
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
