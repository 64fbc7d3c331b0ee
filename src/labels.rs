//! Forward-looking late-risk label.
//!
//! The label of row `i` depends only on rows `i + 1 ..= i + lookahead_rows`
//! of the same supplier series. Rows with fewer than `min_lookahead_rows`
//! future observations are labelled 0: "not enough evidence" and "evidence
//! present and on time" are the same class.

use crate::features::FeatureConfig;

/// Look-ahead slice for row `index`: the next `lookahead` rows, truncated at
/// the end of the series.
pub fn lookahead_window(series: &[f64], index: usize, lookahead: usize) -> &[f64] {
    let start = (index + 1).min(series.len());
    let end = index.saturating_add(1).saturating_add(lookahead).min(series.len());
    &series[start..end]
}

pub fn late_label(window: &[f64], cfg: &FeatureConfig) -> u8 {
    if window.len() < cfg.min_lookahead_rows {
        return 0;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    u8::from(mean < cfg.late_threshold)
}

/// Labels for one supplier's date-ordered on-time series.
pub fn forward_labels(on_time: &[f64], cfg: &FeatureConfig) -> Vec<u8> {
    (0..on_time.len())
        .map(|idx| late_label(lookahead_window(on_time, idx, cfg.lookahead_rows), cfg))
        .collect()
}
