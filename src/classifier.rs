//! Classifier boundary and evaluation metrics for the late-risk model.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::split::FeatureVector;

/// A binary classifier trained on the model feature columns.
pub trait RiskClassifier {
    type Error: std::error::Error;

    fn fit(&mut self, features: &[FeatureVector], labels: &[u8]) -> Result<(), Self::Error>;

    /// Probability of the positive ("late") class per row.
    fn predict_proba(&self, features: &[FeatureVector]) -> Result<Vec<f64>, Self::Error>;
}

/// Unfitted reference scorer: risk is `1 - roll_on_time_7`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnTimeBaseline;

impl RiskClassifier for OnTimeBaseline {
    type Error = Infallible;

    fn fit(&mut self, _features: &[FeatureVector], _labels: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn predict_proba(&self, features: &[FeatureVector]) -> Result<Vec<f64>, Self::Error> {
        Ok(features
            .iter()
            .map(|row| (1.0 - row[0]).clamp(0.0, 1.0))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub threshold: f64,
    pub accuracy: f64,
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
/// `None` when only one class is present.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    if labels.len() != scores.len() {
        return None;
    }
    let positives = labels.iter().filter(|l| **l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based average rank of the tie group
        let rank = (start + end + 1) as f64 / 2.0;
        for idx in &order[start..end] {
            ranks[*idx] = rank;
        }
        start = end;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(label, _)| **label == 1)
        .map(|(_, rank)| *rank)
        .sum();
    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

pub fn classification_summary(
    labels: &[u8],
    scores: &[f64],
    threshold: f64,
) -> ClassificationSummary {
    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (label, score) in labels.iter().zip(scores) {
        match (*label == 1, *score >= threshold) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }

    let total = tp + fp + tn + fn_;
    ClassificationSummary {
        threshold,
        accuracy: ratio(tp + tn, total),
        negative: class_metrics(tn, fn_, fp),
        positive: class_metrics(tp, fp, fn_),
    }
}

fn class_metrics(true_hits: usize, false_hits: usize, misses: usize) -> ClassMetrics {
    let precision = ratio(true_hits, true_hits + false_hits);
    let recall = ratio(true_hits, true_hits + misses);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support: true_hits + misses,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
