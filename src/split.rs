//! Date-cutoff train/evaluation split with a per-subset label fallback.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::features::{FeatureError, FeatureRow};

/// Column order of [`FeatureVector`].
pub const MODEL_FEATURE_COLUMNS: [&str; 6] = [
    "roll_on_time_7",
    "roll_defect_7",
    "roll_fill_7",
    "qty_ordered",
    "qty_delivered",
    "order_value",
];

pub type FeatureVector = [f64; 6];

pub fn model_features(row: &FeatureRow) -> FeatureVector {
    [
        row.roll_on_time_7,
        row.roll_defect_7,
        row.roll_fill_7,
        row.qty_ordered as f64,
        row.qty_delivered as f64,
        row.order_value,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelSource {
    /// `target_late` as built by the forward label constructor.
    Forward,
    /// `roll_on_time_7` below the subset median.
    MedianFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSubset {
    pub dates: Vec<NaiveDate>,
    pub features: Vec<FeatureVector>,
    pub labels: Vec<u8>,
    pub label_source: LabelSource,
}

impl SplitSubset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|label| **label == 1).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub cutoff: NaiveDate,
    pub train: SplitSubset,
    pub eval: SplitSubset,
}

/// Splits at the `quantile` of all row dates: `date <= cutoff` trains,
/// `date > cutoff` evaluates. Each subset resolves its own labels.
pub fn split_dataset(rows: &[FeatureRow], quantile: f64) -> Result<DatasetSplit, FeatureError> {
    let cutoff = date_quantile(rows, quantile).ok_or(FeatureError::EmptyFeatureTable)?;
    let (train_rows, eval_rows): (Vec<&FeatureRow>, Vec<&FeatureRow>) =
        rows.iter().partition(|row| row.date <= cutoff);

    let train = build_subset("train", &train_rows);
    let eval = build_subset("eval", &eval_rows);

    info!(
        component = "split",
        event = "split.finish",
        cutoff = %cutoff,
        train_rows = train.len(),
        train_positives = train.positives(),
        train_label_source = ?train.label_source,
        eval_rows = eval.len(),
        eval_positives = eval.positives(),
        eval_label_source = ?eval.label_source
    );

    Ok(DatasetSplit { cutoff, train, eval })
}

/// Builds one subset from its rows only; nothing outside `rows` can reach
/// the fallback median.
pub fn build_subset(name: &str, rows: &[&FeatureRow]) -> SplitSubset {
    let features = rows.iter().map(|row| model_features(row)).collect();
    let dates = rows.iter().map(|row| row.date).collect();
    let forward: Vec<u8> = rows.iter().map(|row| row.target_late).collect();

    let (labels, label_source) = if !rows.is_empty() && is_degenerate(&forward) {
        let roll: Vec<f64> = rows.iter().map(|row| row.roll_on_time_7).collect();
        let labels = median_fallback_labels(&roll);
        warn!(
            component = "split",
            event = "split.fallback.applied",
            subset = name,
            rows = rows.len(),
            forward_class = forward[0]
        );
        (labels, LabelSource::MedianFallback)
    } else {
        (forward, LabelSource::Forward)
    };

    SplitSubset {
        dates,
        features,
        labels,
        label_source,
    }
}

pub fn is_degenerate(labels: &[u8]) -> bool {
    labels.windows(2).all(|pair| pair[0] == pair[1])
}

/// 1 where the value is strictly below the median of `values`.
pub fn median_fallback_labels(values: &[f64]) -> Vec<u8> {
    let Some(median) = median(values) else {
        return Vec::new();
    };
    values.iter().map(|v| u8::from(*v < median)).collect()
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, 0.5)
}

/// Linear-interpolated quantile of the row dates, floored to a whole day.
pub fn date_quantile(rows: &[FeatureRow], quantile: f64) -> Option<NaiveDate> {
    let mut days: Vec<f64> = rows
        .iter()
        .map(|row| f64::from(row.date.num_days_from_ce()))
        .collect();
    days.sort_by(f64::total_cmp);
    let cutoff = percentile_sorted(&days, quantile)?;
    NaiveDate::from_num_days_from_ce_opt(cutoff.floor() as i32)
}

/// Linear interpolation between closest ranks, as pandas `quantile` and
/// `median` compute it. `values` must be sorted ascending.
fn percentile_sorted(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !pct.is_finite() {
        return None;
    }
    let p = pct.clamp(0.0, 1.0);
    if values.len() == 1 {
        return Some(values[0]);
    }
    let pos = p * ((values.len() - 1) as f64);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let lo_v = values.get(lo).copied()?;
    let hi_v = values.get(hi).copied()?;
    let frac = pos - (lo as f64);
    Some(lo_v + (hi_v - lo_v) * frac)
}
