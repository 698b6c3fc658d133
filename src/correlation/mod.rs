//! Correlation Engine
//!
//! Pearson correlation between a target column and candidate columns using
//! pairwise deletion: a row only counts for a candidate when both the target
//! and that candidate parse as numbers. Nothing is imputed, and the sign of a
//! coefficient is never altered.

pub mod insights;

pub use insights::{quantify, OptimalRange, QuantifiedInsight};

use crate::ingestion::RowBatch;
use crate::value::Record;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Column-wise numeric access over whatever holds the rows.
pub trait NumericColumns {
    /// Numeric reading of `name`, one entry per row; `None` where the cell does
    /// not coerce. Returns `None` if the column does not exist.
    fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>>;
}

impl NumericColumns for [Record] {
    fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        if !self.iter().any(|r| r.contains_key(name)) {
            return None;
        }
        Some(
            self.iter()
                .map(|r| r.get(name).and_then(|v| v.as_f64()))
                .collect(),
        )
    }
}

impl NumericColumns for Vec<Record> {
    fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.as_slice().numeric_column(name)
    }
}

impl NumericColumns for RowBatch {
    fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).and_then(|v| v.as_f64()))
                .collect(),
        )
    }
}

impl NumericColumns for polars::prelude::DataFrame {
    fn numeric_column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        crate::store::convert::column_numbers(self, name).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub column: String,
    pub coefficient: f64,
    pub n_pairs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignFilter {
    #[default]
    All,
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Most negative first.
    Ascending,
    /// Most positive first.
    Descending,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationOptions {
    #[serde(default)]
    pub sign: SignFilter,
    /// Explicit signed ordering; absent means descending |r|.
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
    #[serde(default)]
    pub top_n: Option<usize>,
    /// Compute quantified sub-statistics for retained candidates.
    #[serde(default)]
    pub with_insights: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub target: String,
    pub results: Vec<CorrelationResult>,
    pub insights: Vec<QuantifiedInsight>,
}

pub fn correlate<D: NumericColumns + ?Sized>(
    data: &D,
    target: &str,
    candidates: &[String],
    options: &CorrelationOptions,
) -> CorrelationReport {
    let ranked = compute_correlations(data, target, candidates);
    finalize(data, target, ranked, options)
}

/// Turn an unfiltered ranked list (fresh or cached) into a report for `options`.
pub fn finalize<D: NumericColumns + ?Sized>(
    data: &D,
    target: &str,
    ranked: Vec<CorrelationResult>,
    options: &CorrelationOptions,
) -> CorrelationReport {
    let results = apply_options(ranked, options);
    let insights = if options.with_insights {
        match data.numeric_column(target) {
            Some(target_values) => results
                .iter()
                .filter_map(|r| {
                    let candidate = data.numeric_column(&r.column)?;
                    quantify(&r.column, &target_values, &candidate)
                })
                .collect(),
            None => Vec::new(),
        }
    } else {
        Vec::new()
    };

    CorrelationReport {
        target: target.to_string(),
        results,
        insights,
    }
}

/// Every computable correlation, ranked by descending |r|, unfiltered.
pub fn compute_correlations<D: NumericColumns + ?Sized>(
    data: &D,
    target: &str,
    candidates: &[String],
) -> Vec<CorrelationResult> {
    let Some(target_values) = data.numeric_column(target) else {
        debug!(target, "Target column not present; no correlations");
        return Vec::new();
    };

    let mut results: Vec<CorrelationResult> = candidates
        .iter()
        .filter(|c| c.as_str() != target)
        .filter_map(|candidate| {
            let values = data.numeric_column(candidate)?;
            let (coefficient, n_pairs) = pearson_pairwise(&target_values, &values)?;
            Some(CorrelationResult {
                column: candidate.clone(),
                coefficient,
                n_pairs,
            })
        })
        .collect();

    rank_by_magnitude(&mut results);
    results
}

/// Pearson's r over rows where both sides are present.
/// `None` when there are no valid pairs or either side is constant.
pub fn pearson_pairwise(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<(f64, usize)> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys.iter())
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.is_empty() || is_constant(pairs.iter().map(|p| p.0)) || is_constant(pairs.iter().map(|p| p.1)) {
        return None;
    }

    // Centred sums; the raw-sum formula cancels badly on near-constant data.
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    r.is_finite().then_some((r, pairs.len()))
}

fn is_constant(mut values: impl Iterator<Item = f64>) -> bool {
    match values.next() {
        Some(first) => values.all(|v| v == first),
        None => true,
    }
}

/// Sign filter first, then ordering, then the `top_n` cap.
pub fn apply_options(mut results: Vec<CorrelationResult>, options: &CorrelationOptions) -> Vec<CorrelationResult> {
    results.retain(|r| match options.sign {
        SignFilter::All => true,
        SignFilter::Positive => r.coefficient > 0.0,
        SignFilter::Negative => r.coefficient < 0.0,
    });

    match options.sort_order {
        None => rank_by_magnitude(&mut results),
        Some(SortOrder::Descending) => {
            results.sort_by(|a, b| b.coefficient.total_cmp(&a.coefficient).then_with(|| a.column.cmp(&b.column)))
        }
        Some(SortOrder::Ascending) => {
            results.sort_by(|a, b| a.coefficient.total_cmp(&b.coefficient).then_with(|| a.column.cmp(&b.column)))
        }
    }

    if let Some(n) = options.top_n {
        results.truncate(n);
    }
    results
}

fn rank_by_magnitude(results: &mut [CorrelationResult]) {
    results.sort_by(|a, b| {
        b.coefficient
            .abs()
            .partial_cmp(&a.coefficient.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.column.cmp(&b.column))
    });
}
