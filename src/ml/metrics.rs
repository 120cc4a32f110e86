//! Binary classification metrics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metrics stored with every trained model and evaluation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Undefined when the evaluated labels contain a single class
    pub roc_auc: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    /// Positive prediction means probability strictly above `cutoff`
    pub fn from_probabilities(y_true: &[f64], proba: &[f64], cutoff: f64) -> Self {
        let mut m = ConfusionMatrix::default();
        for (y, p) in y_true.iter().zip(proba) {
            match (*y == 1.0, *p > cutoff) {
                (true, true) => m.true_positive += 1,
                (true, false) => m.false_negative += 1,
                (false, true) => m.false_positive += 1,
                (false, false) => m.true_negative += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[[{} {}] [{} {}]]",
            self.true_negative, self.false_positive, self.false_negative, self.true_positive
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Score probabilities against 0/1 labels with a 0.5 cutoff
pub fn evaluate(y_true: &[f64], proba: &[f64]) -> (ClassificationMetrics, ConfusionMatrix) {
    let m = ConfusionMatrix::from_probabilities(y_true, proba, 0.5);
    let precision = ratio(m.true_positive, m.true_positive + m.false_positive);
    let recall = ratio(m.true_positive, m.true_positive + m.false_negative);
    let f1_score = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    let metrics = ClassificationMetrics {
        accuracy: ratio(m.true_positive + m.true_negative, m.total()),
        precision,
        recall,
        f1_score,
        roc_auc: roc_auc(y_true, proba),
    };
    (metrics, m)
}

/// Area under the ROC curve via average ranks (ties share their rank)
pub fn roc_auc(y_true: &[f64], scores: &[f64]) -> Option<f64> {
    let n_pos = y_true.iter().filter(|y| **y == 1.0).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 || y_true.len() != scores.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie group
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = ranks
        .iter()
        .zip(y_true)
        .filter(|(_, y)| **y == 1.0)
        .map(|(r, _)| r)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_ranking() {
        let y = [0.0, 0.0, 1.0, 1.0];
        let p = [0.1, 0.2, 0.8, 0.9];
        assert_eq!(roc_auc(&y, &p), Some(1.0));
        let (m, cm) = evaluate(&y, &p);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.f1_score, 1.0);
        assert_eq!(cm.true_positive, 2);
    }

    #[test]
    fn test_ties_give_half() {
        let y = [0.0, 1.0];
        assert_eq!(roc_auc(&y, &[0.5, 0.5]), Some(0.5));
    }

    #[test]
    fn test_single_class_auc_undefined() {
        assert_eq!(roc_auc(&[1.0, 1.0], &[0.2, 0.9]), None);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let y = [0.0, 1.0, 0.0];
        let p = [0.1, 0.2, 0.3];
        let (m, _) = evaluate(&y, &p);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1_score, 0.0);
        assert!((m.accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_cutoff_is_strict() {
        let cm = ConfusionMatrix::from_probabilities(&[1.0], &[0.5], 0.5);
        assert_eq!(cm.false_negative, 1);
    }
}
