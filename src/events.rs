//! Event store adapter: raw supplier, order and shipment exports to
//! per-(supplier, day) aggregate tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const SUPPLIERS_FILE: &str = "suppliers.csv";
pub const ORDERS_FILE: &str = "orders.csv";
pub const SHIPMENTS_FILE: &str = "shipments.csv";

const SUPPLIER_COLUMNS: [&str; 4] = [
    "supplier_id",
    "supplier_name",
    "lead_time_days",
    "quality_score",
];
const ORDER_COLUMNS: [&str; 4] = ["supplier_id", "order_date", "qty_ordered", "unit_price"];
const SHIPMENT_COLUMNS: [&str; 5] = [
    "supplier_id",
    "shipped_date",
    "delivered_date",
    "qty_delivered",
    "defect_units",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(pub i64);

impl fmt::Display for SupplierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierRecord {
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    pub lead_time_days: u64,
    pub quality_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub supplier_id: SupplierId,
    pub order_date: NaiveDate,
    pub qty_ordered: u64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentEvent {
    pub supplier_id: SupplierId,
    pub shipped_date: NaiveDate,
    pub delivered_date: NaiveDate,
    pub qty_delivered: u64,
    pub defect_units: u64,
}

/// Order events summed per supplier and order date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDayAggregate {
    pub supplier_id: SupplierId,
    pub date: NaiveDate,
    pub qty_ordered: u64,
    pub order_value: f64,
}

/// Shipment events summed per supplier and delivery date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDayAggregate {
    pub supplier_id: SupplierId,
    pub date: NaiveDate,
    pub qty_delivered: u64,
    pub defect_units: u64,
    pub on_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventTables {
    pub suppliers: Vec<SupplierRecord>,
    pub orders: Vec<OrderEvent>,
    pub shipments: Vec<ShipmentEvent>,
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("failed to read {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("CSV error in {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("{file} is missing required column '{column}'")]
    MissingColumn {
        file: &'static str,
        column: &'static str,
    },
    #[error("{file} line {line}: required field {column} is empty")]
    EmptyField {
        file: &'static str,
        line: u64,
        column: &'static str,
    },
    #[error("{file} line {line}: failed to parse {column} value '{value}'")]
    ParseField {
        file: &'static str,
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("{file} line {line}: negative value '{value}' in {column}")]
    NegativeValue {
        file: &'static str,
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("duplicate supplier {0} in supplier dimension")]
    DuplicateSupplier(SupplierId),
    #[error("{file} references suppliers missing from the supplier dimension: {supplier_ids:?}")]
    UnknownSuppliers {
        file: &'static str,
        supplier_ids: Vec<SupplierId>,
    },
    #[error("supplier {supplier_id}: shipped date {shipped_date} plus lead time overflows the calendar")]
    DateOverflow {
        supplier_id: SupplierId,
        shipped_date: NaiveDate,
    },
    #[error("supplier {supplier_id} on {date}: {column} total overflows")]
    TotalOverflow {
        supplier_id: SupplierId,
        date: NaiveDate,
        column: &'static str,
    },
}

pub fn load_event_tables(data_root: &Path) -> Result<EventTables, EventStoreError> {
    info!(
        component = "events",
        event = "events.load.start",
        data_root = %data_root.display()
    );

    let suppliers = read_suppliers(&data_root.join(SUPPLIERS_FILE))?;
    let orders = read_orders(&data_root.join(ORDERS_FILE))?;
    let shipments = read_shipments(&data_root.join(SHIPMENTS_FILE))?;

    let known = supplier_index(&suppliers)?;
    check_known_suppliers(ORDERS_FILE, orders.iter().map(|o| o.supplier_id), &known)?;
    check_known_suppliers(SHIPMENTS_FILE, shipments.iter().map(|s| s.supplier_id), &known)?;

    info!(
        component = "events",
        event = "events.load.finish",
        suppliers = suppliers.len(),
        orders = orders.len(),
        shipments = shipments.len()
    );

    Ok(EventTables {
        suppliers,
        orders,
        shipments,
    })
}

pub fn read_suppliers(path: &Path) -> Result<Vec<SupplierRecord>, EventStoreError> {
    read_table(path, SUPPLIERS_FILE, &SUPPLIER_COLUMNS, |row| {
        Ok(SupplierRecord {
            supplier_id: row.supplier_id("supplier_id")?,
            supplier_name: row.text("supplier_name")?.to_string(),
            lead_time_days: row.non_negative_u64("lead_time_days")?,
            quality_score: row.non_negative_f64("quality_score")?,
        })
    })
}

pub fn read_orders(path: &Path) -> Result<Vec<OrderEvent>, EventStoreError> {
    read_table(path, ORDERS_FILE, &ORDER_COLUMNS, |row| {
        Ok(OrderEvent {
            supplier_id: row.supplier_id("supplier_id")?,
            order_date: row.date("order_date")?,
            qty_ordered: row.non_negative_u64("qty_ordered")?,
            unit_price: row.non_negative_f64("unit_price")?,
        })
    })
}

pub fn read_shipments(path: &Path) -> Result<Vec<ShipmentEvent>, EventStoreError> {
    read_table(path, SHIPMENTS_FILE, &SHIPMENT_COLUMNS, |row| {
        Ok(ShipmentEvent {
            supplier_id: row.supplier_id("supplier_id")?,
            shipped_date: row.date("shipped_date")?,
            delivered_date: row.date("delivered_date")?,
            qty_delivered: row.non_negative_u64("qty_delivered")?,
            defect_units: row.non_negative_u64("defect_units")?,
        })
    })
}

pub fn aggregate_orders(
    orders: &[OrderEvent],
) -> Result<Vec<OrderDayAggregate>, EventStoreError> {
    let mut by_key: BTreeMap<(SupplierId, NaiveDate), (u64, f64)> = BTreeMap::new();
    for order in orders {
        let key = (order.supplier_id, order.order_date);
        let entry = by_key.entry(key).or_insert((0, 0.0));
        entry.0 = checked_total(entry.0, order.qty_ordered, key, "qty_ordered")?;
        entry.1 += order.qty_ordered as f64 * order.unit_price;
        if !entry.1.is_finite() {
            return Err(overflow(key, "order_value"));
        }
    }

    let out: Vec<OrderDayAggregate> = by_key
        .into_iter()
        .map(
            |((supplier_id, date), (qty_ordered, order_value))| OrderDayAggregate {
                supplier_id,
                date,
                qty_ordered,
                order_value,
            },
        )
        .collect();

    debug!(
        component = "events",
        event = "events.aggregate.orders",
        input_events = orders.len(),
        output_keys = out.len()
    );
    Ok(out)
}

/// A shipment counts as on time when it was delivered no later than its
/// shipped date plus the supplier's lead time.
pub fn aggregate_deliveries(
    shipments: &[ShipmentEvent],
    suppliers: &[SupplierRecord],
) -> Result<Vec<DeliveryDayAggregate>, EventStoreError> {
    let lead_times: HashMap<SupplierId, u64> = suppliers
        .iter()
        .map(|s| (s.supplier_id, s.lead_time_days))
        .collect();

    #[derive(Default)]
    struct DayTotals {
        qty_delivered: u64,
        defect_units: u64,
        on_time_count: u64,
        shipment_count: u64,
    }

    let mut by_key: BTreeMap<(SupplierId, NaiveDate), DayTotals> = BTreeMap::new();
    let mut unknown = BTreeSet::new();
    for shipment in shipments {
        let Some(lead_time_days) = lead_times.get(&shipment.supplier_id).copied() else {
            unknown.insert(shipment.supplier_id);
            continue;
        };
        let on_time = is_on_time(shipment, lead_time_days)?;
        let key = (shipment.supplier_id, shipment.delivered_date);
        let totals = by_key.entry(key).or_default();
        totals.qty_delivered =
            checked_total(totals.qty_delivered, shipment.qty_delivered, key, "qty_delivered")?;
        totals.defect_units =
            checked_total(totals.defect_units, shipment.defect_units, key, "defect_units")?;
        totals.shipment_count += 1;
        if on_time {
            totals.on_time_count += 1;
        }
    }

    if !unknown.is_empty() {
        return Err(EventStoreError::UnknownSuppliers {
            file: SHIPMENTS_FILE,
            supplier_ids: unknown.into_iter().collect(),
        });
    }

    let out: Vec<DeliveryDayAggregate> = by_key
        .into_iter()
        .map(|((supplier_id, date), totals)| DeliveryDayAggregate {
            supplier_id,
            date,
            qty_delivered: totals.qty_delivered,
            defect_units: totals.defect_units,
            on_time: totals.on_time_count as f64 / totals.shipment_count as f64,
        })
        .collect();

    debug!(
        component = "events",
        event = "events.aggregate.deliveries",
        input_events = shipments.len(),
        output_keys = out.len()
    );
    Ok(out)
}

/// Delivered no later than the shipped date plus the supplier's lead time.
pub(crate) fn is_on_time(
    shipment: &ShipmentEvent,
    lead_time_days: u64,
) -> Result<bool, EventStoreError> {
    let due = shipment
        .shipped_date
        .checked_add_days(Days::new(lead_time_days))
        .ok_or(EventStoreError::DateOverflow {
            supplier_id: shipment.supplier_id,
            shipped_date: shipment.shipped_date,
        })?;
    Ok(shipment.delivered_date <= due)
}

pub(crate) fn checked_total(
    total: u64,
    value: u64,
    key: (SupplierId, NaiveDate),
    column: &'static str,
) -> Result<u64, EventStoreError> {
    total.checked_add(value).ok_or_else(|| overflow(key, column))
}

pub(crate) fn overflow(key: (SupplierId, NaiveDate), column: &'static str) -> EventStoreError {
    EventStoreError::TotalOverflow {
        supplier_id: key.0,
        date: key.1,
        column,
    }
}

fn supplier_index(suppliers: &[SupplierRecord]) -> Result<BTreeSet<SupplierId>, EventStoreError> {
    let mut known = BTreeSet::new();
    for supplier in suppliers {
        if !known.insert(supplier.supplier_id) {
            return Err(EventStoreError::DuplicateSupplier(supplier.supplier_id));
        }
    }
    Ok(known)
}

fn check_known_suppliers(
    file: &'static str,
    ids: impl Iterator<Item = SupplierId>,
    known: &BTreeSet<SupplierId>,
) -> Result<(), EventStoreError> {
    let missing: BTreeSet<SupplierId> = ids.filter(|id| !known.contains(id)).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EventStoreError::UnknownSuppliers {
            file,
            supplier_ids: missing.into_iter().collect(),
        })
    }
}

fn read_table<T>(
    path: &Path,
    file: &'static str,
    required: &[&'static str],
    mut parse: impl FnMut(&Row<'_>) -> Result<T, EventStoreError>,
) -> Result<Vec<T>, EventStoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| EventStoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let headers = reader
        .headers()
        .map_err(|source| EventStoreError::Csv { file, source })?
        .clone();
    let columns = resolve_columns(&headers, file, required)?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| EventStoreError::Csv { file, source })?;
        let row = Row {
            file,
            line: record.position().map(|p| p.line()).unwrap_or_default(),
            record: &record,
            columns: &columns,
        };
        out.push(parse(&row)?);
    }
    Ok(out)
}

fn resolve_columns(
    headers: &StringRecord,
    file: &'static str,
    required: &[&'static str],
) -> Result<HashMap<&'static str, usize>, EventStoreError> {
    let mut columns = HashMap::new();
    for column in required {
        let idx = headers
            .iter()
            .position(|h| h == *column)
            .ok_or(EventStoreError::MissingColumn { file, column })?;
        columns.insert(*column, idx);
    }
    Ok(columns)
}

struct Row<'a> {
    file: &'static str,
    line: u64,
    record: &'a StringRecord,
    columns: &'a HashMap<&'static str, usize>,
}

impl Row<'_> {
    fn text(&self, column: &'static str) -> Result<&str, EventStoreError> {
        let raw = self
            .columns
            .get(column)
            .and_then(|idx| self.record.get(*idx))
            .unwrap_or_default();
        if raw.is_empty() {
            return Err(EventStoreError::EmptyField {
                file: self.file,
                line: self.line,
                column,
            });
        }
        Ok(raw)
    }

    fn parse_error(&self, column: &'static str, value: &str) -> EventStoreError {
        EventStoreError::ParseField {
            file: self.file,
            line: self.line,
            column,
            value: value.to_string(),
        }
    }

    fn supplier_id(&self, column: &'static str) -> Result<SupplierId, EventStoreError> {
        let raw = self.text(column)?;
        raw.parse::<i64>()
            .map(SupplierId)
            .map_err(|_| self.parse_error(column, raw))
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, EventStoreError> {
        let raw = self.text(column)?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
            })
            .map_err(|_| self.parse_error(column, raw))
    }

    /// Integer quantities; pandas float formatting ("12.0") is accepted.
    fn non_negative_u64(&self, column: &'static str) -> Result<u64, EventStoreError> {
        let raw = self.text(column)?;
        let value = match raw.parse::<i64>() {
            Ok(v) => v,
            Err(_) => match raw.parse::<f64>() {
                Ok(v) if v.fract() == 0.0 && v.is_finite() => v as i64,
                _ => return Err(self.parse_error(column, raw)),
            },
        };
        if value < 0 {
            return Err(self.negative_error(column, raw));
        }
        Ok(value as u64)
    }

    fn non_negative_f64(&self, column: &'static str) -> Result<f64, EventStoreError> {
        let raw = self.text(column)?;
        let value = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.parse_error(column, raw))?;
        if value < 0.0 {
            return Err(self.negative_error(column, raw));
        }
        Ok(value)
    }

    fn negative_error(&self, column: &'static str, value: &str) -> EventStoreError {
        EventStoreError::NegativeValue {
            file: self.file,
            line: self.line,
            column,
            value: value.to_string(),
        }
    }
}
