#![allow(dead_code)]

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use supplier_risk::{DailySupplierObservation, SupplierId};

pub const SUPPLIERS_CSV: &str = "\
supplier_id,supplier_name,country,lead_time_days,quality_score
1,Supplier 001,US,2,0.9
2,Supplier 002,MX,5,0.85
";

pub const ORDERS_CSV: &str = "\
order_id,supplier_id,order_date,qty_ordered,unit_price,contract_id
1,1,2024-01-01,100,2.0,
2,1,2024-01-01,50,4.0,3.0
3,1,2024-01-05,80,1.5,
4,2,2024-01-02,40,10.0,
5,2,2024-01-08,60,10.0,
";

pub const SHIPMENTS_CSV: &str = "\
shipment_id,order_id,supplier_id,shipped_date,delivered_date,qty_delivered,defect_units
1-1,1,1,2024-01-02,2024-01-03,100,2
2-1,2,1,2024-01-02,2024-01-06,50,0
3-1,3,1,2024-01-06,2024-01-07,80,4
4-1,4,2,2024-01-03,2024-01-09,20,1
4-2,4,2,2024-01-04,2024-01-08,20,0
5-1,5,2,2024-01-09,2024-01-10,60,3
";

/// Writes the three event exports into `dir`.
pub fn seed_event_store(dir: &Path) {
    fs::write(dir.join("suppliers.csv"), SUPPLIERS_CSV).expect("write suppliers");
    fs::write(dir.join("orders.csv"), ORDERS_CSV).expect("write orders");
    fs::write(dir.join("shipments.csv"), SHIPMENTS_CSV).expect("write shipments");
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid base date") + chrono::Days::new(u64::from(d) - 1)
}

/// One observation per on-time value, on consecutive days starting at day 1.
pub fn series(supplier: i64, on_time: &[f64]) -> Vec<DailySupplierObservation> {
    on_time
        .iter()
        .enumerate()
        .map(|(idx, value)| DailySupplierObservation {
            supplier_id: SupplierId(supplier),
            date: day(idx as u32 + 1),
            qty_ordered: 10 + idx as u64,
            order_value: 25.0 * (idx as f64 + 1.0),
            qty_delivered: 8,
            defect_units: (idx % 3) as u64,
            on_time: *value,
        })
        .collect()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "actual={actual} expected={expected}"
    );
}
