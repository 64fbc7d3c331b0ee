mod common;

use common::{assert_close, day, series};
use supplier_risk::{
    align_daily, assert_schema_compatible, build_feature_schema, build_feature_table,
    build_subset, split_dataset, DailySupplierObservation, DeliveryDayAggregate, FeatureConfig,
    FeatureError, FeatureRow, KeyPresence, LabelSource, OrderDayAggregate, SupplierId,
    FEATURE_SCHEMA_VERSION,
};

fn build(rows: &[DailySupplierObservation]) -> Vec<FeatureRow> {
    build_feature_table(rows, &FeatureConfig::default())
        .expect("feature table builds")
        .rows
}

#[test]
fn late_label_matches_worked_example() {
    let on_time = [1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    let rows = build(&series(1, &on_time));

    let row_day3 = rows.iter().find(|r| r.date == day(3)).expect("day 3");
    assert_eq!(row_day3.target_late, 1);

    let row_day9 = rows.iter().find(|r| r.date == day(9)).expect("day 9");
    assert_eq!(row_day9.target_late, 0);

    let labels: Vec<u8> = rows.iter().map(|r| r.target_late).collect();
    assert_eq!(labels, vec![1, 1, 1, 1, 1, 1, 1, 0, 0, 0]);
}

#[test]
fn labels_never_depend_on_present_or_past_rows() {
    let on_time = [1.0, 0.0, 1.0, 1.0, 0.5, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0];
    let mut input = series(7, &on_time);
    input.extend(series(8, &on_time));
    let baseline = build(&input);

    for mutated_idx in 0..on_time.len() {
        let mut changed = input.clone();
        let target = &mut changed[mutated_idx];
        target.on_time = 1.0 - target.on_time;
        target.qty_ordered += 1_000;
        target.qty_delivered = 0;
        target.order_value = 0.0;
        let rebuilt = build(&changed);

        for idx in 0..on_time.len() {
            let in_window = idx < mutated_idx && mutated_idx - idx <= 7;
            if !in_window {
                assert_eq!(
                    rebuilt[idx].target_late, baseline[idx].target_late,
                    "mutating row {mutated_idx} changed label of row {idx}"
                );
            }
        }
        // the other supplier's series is untouched
        let offset = on_time.len();
        for idx in 0..on_time.len() {
            assert_eq!(rebuilt[offset + idx], baseline[offset + idx]);
        }
    }
}

#[test]
fn rolling_uses_k_samples_then_seven() {
    let on_time: Vec<f64> = (0..10).map(|i| f64::from(i) / 10.0).collect();
    let rows = build(&series(3, &on_time));

    for (k, row) in rows.iter().enumerate() {
        let start = k.saturating_sub(6);
        let window = &on_time[start..=k];
        let expected = window.iter().sum::<f64>() / window.len() as f64;
        assert_close(row.roll_on_time_7, expected);
        assert_eq!(window.len(), (k + 1).min(7));
    }
    assert_eq!(rows[0].roll_on_time_7, rows[0].on_time);
    assert_eq!(rows[0].roll_defect_7, rows[0].defect_rate);
    assert_eq!(rows[0].roll_fill_7, rows[0].fill_rate);
}

#[test]
fn ratios_are_zero_on_empty_denominators() {
    let mut rows = series(2, &[1.0, 0.0, 1.0]);
    rows[0].qty_ordered = 0;
    rows[1].qty_delivered = 0;
    let out = build(&rows);

    assert_eq!(out[0].fill_rate, 0.0);
    assert_eq!(out[1].defect_rate, 0.0);
    assert_close(out[2].fill_rate, 8.0 / 12.0);
    assert_close(out[2].defect_rate, 2.0 / 8.0);
    assert!(out.iter().all(|r| r.fill_rate.is_finite() && r.defect_rate.is_finite()));
}

#[test]
fn aligned_keys_are_complete_and_feed_the_table() {
    let orders = vec![
        OrderDayAggregate {
            supplier_id: SupplierId(1),
            date: day(1),
            qty_ordered: 10,
            order_value: 100.0,
        },
        OrderDayAggregate {
            supplier_id: SupplierId(2),
            date: day(2),
            qty_ordered: 4,
            order_value: 8.0,
        },
    ];
    let deliveries = vec![
        DeliveryDayAggregate {
            supplier_id: SupplierId(1),
            date: day(1),
            qty_delivered: 5,
            defect_units: 1,
            on_time: 1.0,
        },
        DeliveryDayAggregate {
            supplier_id: SupplierId(1),
            date: day(4),
            qty_delivered: 5,
            defect_units: 0,
            on_time: 0.0,
        },
    ];

    let aligned = align_daily(&orders, &deliveries).expect("aligns");
    let presence: Vec<KeyPresence> = aligned.iter().map(|a| a.presence).collect();
    assert_eq!(
        presence,
        vec![
            KeyPresence::Both,
            KeyPresence::DeliveriesOnly,
            KeyPresence::OrdersOnly
        ]
    );

    let observations: Vec<DailySupplierObservation> =
        aligned.into_iter().map(|a| a.observation).collect();
    let rows = build(&observations);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].fill_rate, 0.5);
    assert_eq!(rows[0].defect_rate, 0.2);
    assert_eq!(rows[2].supplier_id, SupplierId(2));
    assert_eq!(rows[2].qty_delivered, 0);
    assert_eq!(rows[2].roll_on_time_7, 0.0);
}

#[test]
fn schema_fingerprint_is_deterministic_and_config_sensitive() {
    let cfg = FeatureConfig::default();
    let schema_a = build_feature_schema(&cfg);
    let schema_b = build_feature_schema(&cfg);
    assert_eq!(schema_a, schema_b);
    assert_eq!(schema_a.columns.len(), 13);
    assert_eq!(schema_a.columns[9].name, "roll_on_time_7");
    assert_eq!(schema_a.columns[12].name, "target_late");

    let other = build_feature_schema(&FeatureConfig {
        late_threshold: 0.7,
        ..FeatureConfig::default()
    });
    assert_ne!(schema_a.fingerprint, other.fingerprint);

    assert_schema_compatible(FEATURE_SCHEMA_VERSION, &schema_a.fingerprint, &schema_a)
        .expect("compatibility should pass");
    let err = assert_schema_compatible(FEATURE_SCHEMA_VERSION, &other.fingerprint, &schema_a)
        .expect_err("fingerprint mismatch expected");
    assert!(matches!(err, FeatureError::SchemaFingerprintMismatch { .. }));
}

#[test]
fn train_fallback_ignores_evaluation_rows() {
    // healthy series: forward labels are all 0, so both subsets fall back
    let on_time = [1.0, 0.9, 1.0, 0.8, 1.0, 0.95, 1.0, 0.85, 1.0, 0.9];
    let table = build(&series(5, &on_time));
    assert!(table.iter().all(|r| r.target_late == 0));

    let split = split_dataset(&table, 0.8).expect("split");
    assert_eq!(split.train.label_source, LabelSource::MedianFallback);
    assert_eq!(split.eval.label_source, LabelSource::MedianFallback);

    let mut skewed = table.clone();
    for row in skewed.iter_mut().filter(|r| r.date > split.cutoff) {
        row.roll_on_time_7 = -50.0;
    }
    let skewed_split = split_dataset(&skewed, 0.8).expect("split");
    assert_eq!(skewed_split.cutoff, split.cutoff);
    assert_eq!(skewed_split.train, split.train);

    let train_only: Vec<&FeatureRow> = table.iter().filter(|r| r.date <= split.cutoff).collect();
    assert_eq!(build_subset("train", &train_only), split.train);
}

#[test]
fn rebuilding_is_idempotent() {
    let mut input = series(1, &[1.0, 0.0, 0.5, 1.0, 1.0, 0.0, 0.0, 1.0]);
    input.extend(series(2, &[0.0, 0.0, 1.0]));
    let cfg = FeatureConfig::default();

    let first = build_feature_table(&input, &cfg).expect("first build");
    let second = build_feature_table(&input, &cfg).expect("second build");
    assert_eq!(first, second);
}
