//! Supplier late-shipment risk: daily feature table and forward labels.
//!
//! Stages, leaves first:
//! - events: raw order/shipment exports to per-(supplier, day) aggregates
//! - align: full outer join of both aggregates with zero fill
//! - features: ratios and trailing 7-row rolling means per supplier
//! - labels: forward look-ahead late-risk label
//! - split: date-quantile train/eval split with per-subset label fallback
//! - kpis: monthly on-time and fill rate series per supplier
//! - store: SQLite persistence and CSV export

mod align;
mod classifier;
mod events;
mod features;
mod kpis;
mod labels;
mod observability;
mod pipeline;
mod split;
mod store;

pub use align::{
    align_daily, alignment_report, AlignedObservation, AlignmentReport, DailySupplierObservation,
    KeyPresence,
};
pub use classifier::{
    classification_summary, roc_auc, ClassMetrics, ClassificationSummary, OnTimeBaseline,
    RiskClassifier,
};
pub use events::{
    aggregate_deliveries, aggregate_orders, load_event_tables, read_orders, read_shipments,
    read_suppliers, DeliveryDayAggregate, EventStoreError, EventTables, OrderDayAggregate,
    OrderEvent, ShipmentEvent, SupplierId, SupplierRecord, ORDERS_FILE, SHIPMENTS_FILE,
    SUPPLIERS_FILE,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, build_feature_table, derive_rates,
    rolling_partition, safe_ratio, supplier_partitions, validate_config, DerivedRates,
    FeatureColumn, FeatureConfig, FeatureDType, FeatureError, FeatureRow, FeatureSchema,
    FeatureTable, RollingFeatures, RollingMean, FEATURE_SCHEMA_VERSION, FEATURE_TABLE_COLUMNS,
    ROLLING_WINDOW,
};
pub use kpis::{monthly_kpis, portfolio_monthly, MonthlySupplierKpi, PortfolioMonth, YearMonth};
pub use labels::{forward_labels, late_label, lookahead_window};
pub use observability::{
    init_logging, log_app_start, log_inputs_selected, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    build_features, pipeline_config_from_env, run_pipeline, PipelineConfig, PipelineError,
    PipelineReport, PipelineRun, SubsetSummary,
};
pub use split::{
    build_subset, date_quantile, is_degenerate, median, median_fallback_labels, model_features,
    split_dataset, DatasetSplit, FeatureVector, LabelSource, SplitSubset, MODEL_FEATURE_COLUMNS,
};
pub use store::{write_features_csv, FeatureStore, StagedCsv, StoreError};
