//! Quantified sub-statistics behind correlation insights.
//!
//! These are plain numbers; turning them into prose is somebody else's job.

use crate::stats;
use serde::{Deserialize, Serialize};

/// Share of rows, ranked by target value, that define the "optimal range".
pub const TOP_TARGET_SHARE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalRange {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    /// Lowest target value inside the top share.
    pub target_threshold: f64,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantifiedInsight {
    pub column: String,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub optimal_range: OptimalRange,
}

/// Candidate statistics over the valid (target, candidate) pairs.
pub fn quantify(column: &str, target: &[Option<f64>], candidate: &[Option<f64>]) -> Option<QuantifiedInsight> {
    let mut pairs: Vec<(f64, f64)> = target
        .iter()
        .zip(candidate.iter())
        .filter_map(|(t, c)| Some(((*t)?, (*c)?)))
        .collect();
    if pairs.is_empty() {
        return None;
    }

    let values: Vec<f64> = pairs.iter().map(|(_, c)| *c).collect();
    let overall = stats::min_avg_max(&values)?;
    let sorted = stats::sorted(&values);

    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    let top_n = ((pairs.len() as f64 * TOP_TARGET_SHARE).ceil() as usize).max(1);
    let top = &pairs[..top_n];
    let top_values: Vec<f64> = top.iter().map(|(_, c)| *c).collect();
    let optimal = stats::min_avg_max(&top_values)?;

    Some(QuantifiedInsight {
        column: column.to_string(),
        min: overall.min,
        avg: overall.avg,
        max: overall.max,
        p25: stats::percentile_sorted(&sorted, 0.25)?,
        p75: stats::percentile_sorted(&sorted, 0.75)?,
        p90: stats::percentile_sorted(&sorted, 0.90)?,
        optimal_range: OptimalRange {
            avg: optimal.avg,
            min: optimal.min,
            max: optimal.max,
            target_threshold: top[top_n - 1].0,
            rows: top_n,
        },
    })
}
