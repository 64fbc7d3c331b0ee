//! Monthly supplier KPI series: on-time rate by delivery month and fill rate
//! by calendar month, plus the cross-supplier portfolio mean.
//!
//! A rate is `None` for a month with no denominator; it is not reported as 0.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{
    checked_total, is_on_time, EventStoreError, EventTables, SupplierId, SHIPMENTS_FILE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// `YYYY-MM`
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.label()
    }
}

impl TryFrom<String> for YearMonth {
    type Error = chrono::ParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").map(Self::of)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySupplierKpi {
    pub supplier_id: SupplierId,
    pub year_month: YearMonth,
    pub shipments: u64,
    pub on_time_shipments: u64,
    pub qty_ordered: u64,
    pub qty_delivered: u64,
    pub on_time_rate: Option<f64>,
    pub fill_rate: Option<f64>,
}

/// Unweighted mean of the supplier rates that exist for a month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMonth {
    pub year_month: YearMonth,
    pub suppliers: usize,
    pub on_time_rate: Option<f64>,
    pub fill_rate: Option<f64>,
}

#[derive(Default)]
struct MonthTotals {
    shipments: u64,
    on_time_shipments: u64,
    qty_ordered: u64,
    qty_delivered: u64,
}

/// Rows come out ordered by (month, supplier). Orders land in their order
/// month; shipments land in their delivery month.
pub fn monthly_kpis(events: &EventTables) -> Result<Vec<MonthlySupplierKpi>, EventStoreError> {
    let lead_times: HashMap<SupplierId, u64> = events
        .suppliers
        .iter()
        .map(|s| (s.supplier_id, s.lead_time_days))
        .collect();

    let mut by_key: BTreeMap<(YearMonth, SupplierId), MonthTotals> = BTreeMap::new();
    for order in &events.orders {
        let totals = by_key
            .entry((YearMonth::of(order.order_date), order.supplier_id))
            .or_default();
        totals.qty_ordered = checked_total(
            totals.qty_ordered,
            order.qty_ordered,
            (order.supplier_id, order.order_date),
            "qty_ordered",
        )?;
    }

    let mut unknown = BTreeSet::new();
    for shipment in &events.shipments {
        let Some(lead_time_days) = lead_times.get(&shipment.supplier_id).copied() else {
            unknown.insert(shipment.supplier_id);
            continue;
        };
        let on_time = is_on_time(shipment, lead_time_days)?;
        let totals = by_key
            .entry((YearMonth::of(shipment.delivered_date), shipment.supplier_id))
            .or_default();
        totals.qty_delivered = checked_total(
            totals.qty_delivered,
            shipment.qty_delivered,
            (shipment.supplier_id, shipment.delivered_date),
            "qty_delivered",
        )?;
        totals.shipments += 1;
        if on_time {
            totals.on_time_shipments += 1;
        }
    }
    if !unknown.is_empty() {
        return Err(EventStoreError::UnknownSuppliers {
            file: SHIPMENTS_FILE,
            supplier_ids: unknown.into_iter().collect(),
        });
    }

    let out: Vec<MonthlySupplierKpi> = by_key
        .into_iter()
        .map(|((year_month, supplier_id), t)| MonthlySupplierKpi {
            supplier_id,
            year_month,
            shipments: t.shipments,
            on_time_shipments: t.on_time_shipments,
            qty_ordered: t.qty_ordered,
            qty_delivered: t.qty_delivered,
            on_time_rate: rate(t.on_time_shipments, t.shipments),
            fill_rate: rate(t.qty_delivered, t.qty_ordered),
        })
        .collect();

    debug!(
        component = "kpis",
        event = "kpis.monthly.finish",
        rows = out.len()
    );
    Ok(out)
}

pub fn portfolio_monthly(kpis: &[MonthlySupplierKpi]) -> Vec<PortfolioMonth> {
    #[derive(Default)]
    struct Sums {
        suppliers: usize,
        on_time: (f64, usize),
        fill: (f64, usize),
    }

    let mut by_month: BTreeMap<YearMonth, Sums> = BTreeMap::new();
    for kpi in kpis {
        let sums = by_month.entry(kpi.year_month).or_default();
        sums.suppliers += 1;
        if let Some(r) = kpi.on_time_rate {
            sums.on_time.0 += r;
            sums.on_time.1 += 1;
        }
        if let Some(r) = kpi.fill_rate {
            sums.fill.0 += r;
            sums.fill.1 += 1;
        }
    }

    by_month
        .into_iter()
        .map(|(year_month, sums)| PortfolioMonth {
            year_month,
            suppliers: sums.suppliers,
            on_time_rate: mean(sums.on_time),
            fill_rate: mean(sums.fill),
        })
        .collect()
}

fn rate(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn mean((sum, count): (f64, usize)) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}
