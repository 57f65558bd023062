//! Score arithmetic shared by the scorers, the convergence loop, and the
//! optimizer's fitness functions.

use crate::types::{QualityKind, QualityReport};
use std::collections::BTreeMap;

/// Upper bound of every quality sub-metric.
pub const MAX_SCORE: f64 = 10.0;

/// Clamp a raw score into `[0, 10]`. NaN counts as 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

/// Unweighted arithmetic mean; 0.0 for an empty input.
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Map a `[0, 10]` score onto `[0, 1]`.
pub fn normalize_to_unit(score: f64) -> f64 {
    clamp_score(score) / MAX_SCORE
}

/// Build a report from per-item score rows.
///
/// Each sub-metric is the mean over the rows that carry it. A metric no row
/// carries is left out of the report rather than counted as zero.
pub fn aggregate_rows<'a, I>(kind: QualityKind, rows: I, feedback: impl Into<String>) -> QualityReport
where
    I: IntoIterator<Item = &'a BTreeMap<String, f64>>,
{
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in rows {
        for (name, score) in row {
            columns
                .entry(name.clone())
                .or_default()
                .push(clamp_score(*score));
        }
    }
    let metrics = columns
        .into_iter()
        .map(|(name, scores)| (name, mean(scores)));
    QualityReport::from_sub_metrics(kind, metrics, feedback)
}
