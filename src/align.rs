//! Full outer join of the order and delivery aggregates on
//! (supplier, date).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::events::{DeliveryDayAggregate, OrderDayAggregate, SupplierId};
use crate::features::FeatureError;

/// Which source tables contributed to an aligned key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPresence {
    OrdersOnly,
    DeliveriesOnly,
    Both,
}

/// One row per (supplier, date) with at least one order or delivery event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySupplierObservation {
    pub supplier_id: SupplierId,
    pub date: NaiveDate,
    pub qty_ordered: u64,
    pub order_value: f64,
    pub qty_delivered: u64,
    pub defect_units: u64,
    pub on_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedObservation {
    pub presence: KeyPresence,
    pub observation: DailySupplierObservation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub orders_only: u64,
    pub deliveries_only: u64,
    pub both: u64,
}

impl AlignmentReport {
    pub fn total(&self) -> u64 {
        self.orders_only + self.deliveries_only + self.both
    }
}

/// Joins both aggregate tables; the absent side of a key is zero-filled.
/// Output is sorted by (supplier_id, date). A key repeated within one input
/// table is rejected.
pub fn align_daily(
    orders: &[OrderDayAggregate],
    deliveries: &[DeliveryDayAggregate],
) -> Result<Vec<AlignedObservation>, FeatureError> {
    let mut keys: BTreeMap<
        (SupplierId, NaiveDate),
        (Option<&OrderDayAggregate>, Option<&DeliveryDayAggregate>),
    > = BTreeMap::new();

    for order in orders {
        let slot = keys.entry((order.supplier_id, order.date)).or_default();
        if slot.0.replace(order).is_some() {
            return Err(FeatureError::DuplicateKey {
                table: "orders",
                supplier_id: order.supplier_id,
                date: order.date,
            });
        }
    }
    for delivery in deliveries {
        let slot = keys.entry((delivery.supplier_id, delivery.date)).or_default();
        if slot.1.replace(delivery).is_some() {
            return Err(FeatureError::DuplicateKey {
                table: "deliveries",
                supplier_id: delivery.supplier_id,
                date: delivery.date,
            });
        }
    }

    let aligned: Vec<AlignedObservation> = keys
        .into_iter()
        .filter_map(|((supplier_id, date), sides)| {
            let presence = match sides {
                (Some(_), Some(_)) => KeyPresence::Both,
                (Some(_), None) => KeyPresence::OrdersOnly,
                (None, Some(_)) => KeyPresence::DeliveriesOnly,
                (None, None) => return None,
            };
            let (order, delivery) = sides;
            Some(AlignedObservation {
                presence,
                observation: DailySupplierObservation {
                    supplier_id,
                    date,
                    qty_ordered: order.map_or(0, |o| o.qty_ordered),
                    order_value: order.map_or(0.0, |o| o.order_value),
                    qty_delivered: delivery.map_or(0, |d| d.qty_delivered),
                    defect_units: delivery.map_or(0, |d| d.defect_units),
                    on_time: delivery.map_or(0.0, |d| d.on_time),
                },
            })
        })
        .collect();

    let report = alignment_report(&aligned);
    info!(
        component = "align",
        event = "align.finish",
        order_keys = orders.len(),
        delivery_keys = deliveries.len(),
        aligned_rows = aligned.len(),
        orders_only = report.orders_only,
        deliveries_only = report.deliveries_only,
        both = report.both
    );

    Ok(aligned)
}

pub fn alignment_report(aligned: &[AlignedObservation]) -> AlignmentReport {
    aligned
        .iter()
        .fold(AlignmentReport::default(), |mut report, row| {
            match row.presence {
                KeyPresence::OrdersOnly => report.orders_only += 1,
                KeyPresence::DeliveriesOnly => report.deliveries_only += 1,
                KeyPresence::Both => report.both += 1,
            }
            report
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn order(id: i64, d: u32, qty: u64) -> OrderDayAggregate {
        OrderDayAggregate {
            supplier_id: SupplierId(id),
            date: day(d),
            qty_ordered: qty,
            order_value: qty as f64 * 2.0,
        }
    }

    fn delivery(id: i64, d: u32, qty: u64, on_time: f64) -> DeliveryDayAggregate {
        DeliveryDayAggregate {
            supplier_id: SupplierId(id),
            date: day(d),
            qty_delivered: qty,
            defect_units: 1,
            on_time,
        }
    }

    #[test]
    fn every_key_from_either_side_appears_once_with_zero_fill() {
        let orders = vec![order(1, 1, 10), order(1, 3, 5), order(2, 2, 7)];
        let deliveries = vec![delivery(1, 3, 5, 1.0), delivery(1, 4, 2, 0.5), delivery(3, 1, 1, 0.0)];

        let aligned = align_daily(&orders, &deliveries).unwrap();
        let keys: Vec<(i64, u32)> = aligned
            .iter()
            .map(|a| (a.observation.supplier_id.0, chrono::Datelike::day(&a.observation.date)))
            .collect();
        assert_eq!(keys, vec![(1, 1), (1, 3), (1, 4), (2, 2), (3, 1)]);

        let only_orders = &aligned[0];
        assert_eq!(only_orders.presence, KeyPresence::OrdersOnly);
        assert_eq!(only_orders.observation.qty_delivered, 0);
        assert_eq!(only_orders.observation.defect_units, 0);
        assert_eq!(only_orders.observation.on_time, 0.0);

        let both = &aligned[1];
        assert_eq!(both.presence, KeyPresence::Both);
        assert_eq!(both.observation.qty_ordered, 5);
        assert_eq!(both.observation.qty_delivered, 5);

        let only_deliveries = &aligned[2];
        assert_eq!(only_deliveries.presence, KeyPresence::DeliveriesOnly);
        assert_eq!(only_deliveries.observation.qty_ordered, 0);
        assert_eq!(only_deliveries.observation.order_value, 0.0);
        assert_eq!(only_deliveries.observation.on_time, 0.5);

        let report = alignment_report(&aligned);
        assert_eq!(report.total(), 5);
        assert_eq!(report.both, 1);
        assert_eq!(report.orders_only, 2);
        assert_eq!(report.deliveries_only, 2);
    }

    #[test]
    fn duplicate_key_within_one_table_is_rejected() {
        let orders = vec![order(1, 1, 10), order(1, 1, 3)];
        let err = align_daily(&orders, &[]).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::DuplicateKey { table: "orders", .. }
        ));
    }

    #[test]
    fn empty_inputs_align_to_empty_output() {
        assert!(align_daily(&[], &[]).unwrap().is_empty());
    }
}
