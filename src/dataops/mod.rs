//! Data operations on a session's dataset: preview, column summaries, null
//! handling, type conversion and derived columns.
//!
//! Summaries are read-only. `remove_nulls`, `convert_type` and
//! `create_derived_column` replace the session dataset and drop its cached results.

pub mod derived;

pub use derived::{derive_column, DerivedColumnInfo};

use crate::error::{Result, TabulaError};
use crate::service::AnalysisService;
use crate::stats;
use crate::store::convert::{column_numbers, column_scalars, dataframe_to_records, series_from_scalars};
use crate::value::{coerce_number, Record, Scalar};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::info;

pub const MAX_PREVIEW_ROWS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preview {
    pub rows: Vec<Record>,
    pub total_rows: usize,
    pub returned_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub variable: String,
    pub datatype: String,
    pub total_values: usize,
    pub null_values: usize,
    pub non_null_values: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mode: Option<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "lowercase")]
pub enum NullMethod {
    /// Drop rows holding a null.
    Delete,
    Mean,
    Median,
    Mode,
    Custom(Scalar),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullReport {
    pub rows_before: usize,
    pub rows_after: usize,
    pub nulls_handled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionTarget {
    Numeric,
    Text,
    Date,
    /// Numeric in the 0–1 range; values are divided by 100 when any exceeds 1.
    Percentage,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionInfo {
    pub column: String,
    pub original_type: String,
    pub target_type: ConversionTarget,
    pub converted_type: String,
    /// Non-null cells that could not be converted and became null.
    pub failed_conversions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-column summaries. Unknown `column` yields an empty list.
pub fn summarize_frame(df: &DataFrame, column: Option<&str>) -> Result<Vec<ColumnSummary>> {
    let names: Vec<String> = match column {
        Some(name) if df.column(name).is_ok() => vec![name.to_string()],
        Some(_) => return Ok(Vec::new()),
        None => df.get_column_names().iter().map(|s| s.to_string()).collect(),
    };
    names.iter().map(|name| summarize_column(df, name)).collect()
}

fn summarize_column(df: &DataFrame, name: &str) -> Result<ColumnSummary> {
    let series = df.column(name)?;
    let total_values = series.len();
    let null_values = series.null_count();
    let mut summary = ColumnSummary {
        variable: name.to_string(),
        datatype: series.dtype().to_string(),
        total_values,
        null_values,
        non_null_values: total_values - null_values,
        mean: None,
        median: None,
        std_dev: None,
        min: None,
        max: None,
        mode: most_frequent(&column_scalars(df, name)?),
    };

    if series.dtype().is_numeric() {
        let values: Vec<f64> = column_numbers(df, name)?.into_iter().flatten().collect();
        let sorted = stats::sorted(&values);
        if let Some(mam) = stats::min_avg_max(&values) {
            summary.mean = Some(mam.avg);
            summary.min = Some(mam.min);
            summary.max = Some(mam.max);
            summary.median = stats::median_sorted(&sorted);
            summary.std_dev = stats::sample_std_dev(&values);
        }
    }
    Ok(summary)
}

/// Most frequent non-null value; ties go to the smallest.
pub fn most_frequent(values: &[Scalar]) -> Option<Scalar> {
    let mut counts: HashMap<String, (usize, &Scalar)> = HashMap::new();
    for value in values.iter().filter(|v| !v.is_null()) {
        counts.entry(value.to_string()).or_insert((0, value)).0 += 1;
    }
    counts
        .into_values()
        .max_by(|(ca, a), (cb, b)| ca.cmp(cb).then_with(|| scalar_cmp(b, a)))
        .map(|(_, v)| v.clone())
}

fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    match (a, b) {
        (Scalar::Number(x), Scalar::Number(y)) => x.total_cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Handle nulls in `column`, or in every column when `None`.
pub fn fill_nulls(df: &DataFrame, column: Option<&str>, method: &NullMethod) -> Result<(DataFrame, NullReport)> {
    if let Some(name) = column {
        if df.column(name).is_err() {
            return Err(TabulaError::Validation(format!("unknown column '{}'", name)));
        }
    }
    let rows_before = df.height();
    let targets: Vec<String> = match column {
        Some(name) => vec![name.to_string()],
        None => df.get_column_names().iter().map(|s| s.to_string()).collect(),
    };

    if *method == NullMethod::Delete {
        let out = df.drop_nulls(Some(targets.as_slice()))?;
        let rows_after = out.height();
        return Ok((
            out,
            NullReport {
                rows_before,
                rows_after,
                nulls_handled: rows_before - rows_after,
            },
        ));
    }

    let mut out = df.clone();
    let mut nulls_handled = 0;
    for name in &targets {
        let nulls = out.column(name)?.null_count();
        if nulls == 0 {
            continue;
        }
        let Some(fill) = fill_value(&out, name, method)? else {
            continue;
        };
        let cells: Vec<Scalar> = column_scalars(&out, name)?
            .into_iter()
            .map(|c| if c.is_null() { fill.clone() } else { c })
            .collect();
        out.with_column(series_from_scalars(name, cells.iter()))?;
        nulls_handled += nulls;
    }

    Ok((
        out,
        NullReport {
            rows_before,
            rows_after: rows_before,
            nulls_handled,
        },
    ))
}

fn fill_value(df: &DataFrame, name: &str, method: &NullMethod) -> Result<Option<Scalar>> {
    let numeric = df.column(name)?.dtype().is_numeric();
    let mode = || -> Result<Option<Scalar>> { Ok(most_frequent(&column_scalars(df, name)?)) };
    match method {
        NullMethod::Delete => Ok(None),
        NullMethod::Custom(value) => Ok(Some(value.clone())),
        NullMethod::Mode => mode(),
        NullMethod::Mean | NullMethod::Median if !numeric => mode(),
        NullMethod::Mean => {
            let values: Vec<f64> = column_numbers(df, name)?.into_iter().flatten().collect();
            Ok(stats::mean(&values).map(Scalar::Number))
        }
        NullMethod::Median => {
            let values: Vec<f64> = column_numbers(df, name)?.into_iter().flatten().collect();
            Ok(stats::median_sorted(&stats::sorted(&values)).map(Scalar::Number))
        }
    }
}

pub fn convert_column(df: &DataFrame, column: &str, target: ConversionTarget) -> Result<(DataFrame, ConversionInfo)> {
    let series = df
        .column(column)
        .map_err(|_| TabulaError::Validation(format!("unknown column '{}'", column)))?;
    let original_type = series.dtype().to_string();
    let nulls_before = series.null_count();
    let mut note = None;

    let converted: Series = match target {
        ConversionTarget::Numeric => Series::new(column, column_numbers(df, column)?),
        ConversionTarget::Percentage => {
            let mut values = column_numbers(df, column)?;
            let max = values.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
            if max > 1.0 {
                values.iter_mut().flatten().for_each(|v| *v /= 100.0);
            }
            note = Some("Values converted to 0-1 range (divided by 100 when above 1)".to_string());
            Series::new(column, values)
        }
        ConversionTarget::Text => series.cast(&DataType::String)?,
        ConversionTarget::Date => {
            let values: Vec<Option<String>> = column_scalars(df, column)?
                .iter()
                .map(|cell| match cell {
                    Scalar::Number(_) => None,
                    other => other.as_datetime().map(|d| Scalar::Date(d).to_string()),
                })
                .collect();
            Series::new(column, values)
        }
        ConversionTarget::Boolean => {
            let values: Vec<Option<bool>> = column_scalars(df, column)?.iter().map(parse_bool).collect();
            Series::new(column, values)
        }
    };

    let failed_conversions = converted.null_count().saturating_sub(nulls_before);
    let info = ConversionInfo {
        column: column.to_string(),
        original_type,
        target_type: target,
        converted_type: converted.dtype().to_string(),
        failed_conversions,
        note,
    };

    let mut out = df.clone();
    out.with_column(converted)?;
    Ok((out, info))
}

fn parse_bool(cell: &Scalar) -> Option<bool> {
    match cell {
        Scalar::Null => None,
        Scalar::Number(n) => Some(*n != 0.0),
        Scalar::Date(_) => Some(true),
        Scalar::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" => Some(true),
            "false" | "f" | "no" | "n" => Some(false),
            other => coerce_number(other).map(|n| n != 0.0),
        },
    }
}

impl AnalysisService {
    pub fn preview(&self, session_id: &str, limit: usize) -> Result<Preview> {
        let limit = limit.min(MAX_PREVIEW_ROWS);
        self.registry().with_store(session_id, |store| {
            let rows = dataframe_to_records(store.frame()?, limit)?;
            Ok(Preview {
                total_rows: store.row_count(),
                returned_rows: rows.len(),
                rows,
            })
        })
    }

    pub fn summarize(&self, session_id: &str, column: Option<&str>) -> Result<Vec<ColumnSummary>> {
        self.registry()
            .with_store(session_id, |store| summarize_frame(store.frame()?, column))
    }

    pub fn remove_nulls(&self, session_id: &str, column: Option<&str>, method: &NullMethod) -> Result<NullReport> {
        let (frame, report) = self
            .registry()
            .with_store(session_id, |store| fill_nulls(store.frame()?, column, method))?;
        self.replace_dataset(session_id, frame);
        info!(
            session_id,
            ?method,
            rows_before = report.rows_before,
            rows_after = report.rows_after,
            nulls_handled = report.nulls_handled,
            "Handled nulls"
        );
        Ok(report)
    }

    pub fn convert_type(&self, session_id: &str, column: &str, target: ConversionTarget) -> Result<ConversionInfo> {
        let (frame, info) = self
            .registry()
            .with_store(session_id, |store| convert_column(store.frame()?, column, target))?;
        self.replace_dataset(session_id, frame);
        info!(
            session_id,
            column,
            ?target,
            failed = info.failed_conversions,
            "Converted column type"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("score", &[Some(10.0), None, Some(30.0), Some(30.0)]),
            Series::new("grade", &[Some("b"), Some("a"), None, Some("a")]),
            Series::new("pct", &[Some("50"), Some("25%"), Some("n/a"), None]),
        ])
        .unwrap()
    }

    #[test]
    fn test_summary_numeric_and_text() {
        let summary = summarize_frame(&frame(), None).unwrap();
        assert_eq!(summary.len(), 3);

        let score = &summary[0];
        assert_eq!(score.total_values, 4);
        assert_eq!(score.null_values, 1);
        assert_eq!(score.non_null_values, 3);
        assert_eq!(score.mean, Some(70.0 / 3.0));
        assert_eq!(score.median, Some(30.0));
        assert_eq!(score.min, Some(10.0));
        assert_eq!(score.mode, Some(Scalar::Number(30.0)));

        let grade = &summary[1];
        assert_eq!(grade.mean, None);
        assert_eq!(grade.mode, Some(Scalar::Text("a".to_string())));

        assert!(summarize_frame(&frame(), Some("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_mode_ties_pick_smallest() {
        let values = vec![Scalar::Number(3.0), Scalar::Number(1.0), Scalar::Null];
        assert_eq!(most_frequent(&values), Some(Scalar::Number(1.0)));
    }

    #[test]
    fn test_delete_and_impute() {
        let (out, report) = fill_nulls(&frame(), Some("score"), &NullMethod::Delete).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(report.nulls_handled, 1);

        let (out, report) = fill_nulls(&frame(), Some("score"), &NullMethod::Median).unwrap();
        assert_eq!(report.rows_after, 4);
        assert_eq!(column_numbers(&out, "score").unwrap()[1], Some(30.0));

        // Non-numeric mean falls back to the mode.
        let (out, _) = fill_nulls(&frame(), Some("grade"), &NullMethod::Mean).unwrap();
        assert_eq!(column_scalars(&out, "grade").unwrap()[2], Scalar::Text("a".to_string()));

        assert!(matches!(
            fill_nulls(&frame(), Some("nope"), &NullMethod::Mode),
            Err(TabulaError::Validation(_))
        ));
    }

    #[test]
    fn test_convert_percentage_counts_failures() {
        let (out, info) = convert_column(&frame(), "pct", ConversionTarget::Percentage).unwrap();
        assert_eq!(info.failed_conversions, 1);
        assert!(info.note.is_some());
        let values = column_numbers(&out, "pct").unwrap();
        assert_eq!(values, vec![Some(0.5), Some(0.25), None, None]);
    }

    #[test]
    fn test_convert_boolean_and_date() {
        let df = DataFrame::new(vec![Series::new("flag", &["yes", "0", "maybe"])]).unwrap();
        let (out, info) = convert_column(&df, "flag", ConversionTarget::Boolean).unwrap();
        assert_eq!(info.failed_conversions, 1);
        assert_eq!(out.column("flag").unwrap().dtype(), &DataType::Boolean);

        let df = DataFrame::new(vec![Series::new("when", &["2024/03/01", "soon"])]).unwrap();
        let (out, info) = convert_column(&df, "when", ConversionTarget::Date).unwrap();
        assert_eq!(info.failed_conversions, 1);
        assert_eq!(column_scalars(&out, "when").unwrap()[0], Scalar::Text("2024-03-01".to_string()));
    }

    #[tokio::test]
    async fn test_mutations_replace_session_dataset() {
        let service = AnalysisService::default();
        service.registry().replace("s1", frame());
        assert_eq!(service.get_metadata("s1").unwrap().row_count, 4);

        let report = service.remove_nulls("s1", None, &NullMethod::Delete).unwrap();
        assert_eq!(report.rows_after, 1);
        assert_eq!(service.get_metadata("s1").unwrap().row_count, 1);
        assert_eq!(service.preview("s1", 50).unwrap().total_rows, 1);
    }
}
