//! Chart specs built from a loaded dataset.
//!
//! Every chart's points have already been through [`downsample`], so callers can
//! hand them to a renderer as-is.

use crate::charts::downsample::{aggregate_by_category, downsample, DownsampleOptions};
use crate::charts::domain::{smart_domain, DomainOptions};
use crate::charts::{Aggregation, ChartKind, ChartPoint};
use crate::correlation::CorrelationReport;
use crate::error::Result;
use crate::store::convert::{column_numbers, column_scalars};
use crate::store::{ColumnKind, DatasetMetadata};
use crate::value::Scalar;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Text columns with more distinct values than this are not charted as categories.
pub const MAX_CATEGORIES: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRequest {
    pub title: String,
    pub kind: ChartKind,
    /// `None` plots against the row index.
    pub x_field: Option<String>,
    pub y_field: String,
    pub y2_field: Option<String>,
    pub aggregate: Option<Aggregation>,
}

impl ChartRequest {
    pub fn new(kind: ChartKind, x_field: Option<&str>, y_field: &str) -> Self {
        let title = match x_field {
            Some(x) => format!("{} by {}", y_field, x),
            None => format!("{} by row", y_field),
        };
        Self {
            title,
            kind,
            x_field: x_field.map(str::to_string),
            y_field: y_field.to_string(),
            y2_field: None,
            aggregate: None,
        }
    }

    pub fn with_aggregate(mut self, aggregate: Aggregation) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn with_y2(mut self, y2_field: &str) -> Self {
        self.y2_field = Some(y2_field.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub title: String,
    pub kind: ChartKind,
    pub x_field: String,
    pub y_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y2_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<Aggregation>,
    pub points: Vec<ChartPoint>,
    /// Plottable rows before downsampling.
    pub source_points: usize,
    pub y_domain: Option<(f64, f64)>,
}

pub fn build_chart(frame: &DataFrame, request: &ChartRequest, options: &DownsampleOptions) -> Result<ChartSpec> {
    let raw = raw_points(frame, request)?;
    let source_points = raw.len();

    let mut options = options.clone();
    if request.aggregate.is_some() {
        options.aggregate = request.aggregate;
    }

    // Categorical bars are always one bar per category, whatever the row count.
    let raw = match (request.kind, request.aggregate) {
        (ChartKind::Bar | ChartKind::Pie, Some(agg)) if !raw.iter().all(|p| p.x.as_f64().is_some()) => {
            aggregate_by_category(&raw, agg)
        }
        _ => raw,
    };

    let points = downsample(&raw, request.kind, &options);
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    let y_domain = smart_domain(&ys, &DomainOptions::default());

    debug!(
        title = %request.title,
        kind = ?request.kind,
        source_points,
        points = points.len(),
        "Built chart"
    );

    Ok(ChartSpec {
        title: request.title.clone(),
        kind: request.kind,
        x_field: request.x_field.clone().unwrap_or_else(|| "row".to_string()),
        y_field: request.y_field.clone(),
        y2_field: request.y2_field.clone(),
        aggregate: request.aggregate,
        points,
        source_points,
        y_domain,
    })
}

/// Rows where y (and x, when given) are usable; dates become `Scalar::Date` and
/// line charts over dates are put in time order.
fn raw_points(frame: &DataFrame, request: &ChartRequest) -> Result<Vec<ChartPoint>> {
    let ys = column_numbers(frame, &request.y_field)?;
    let y2s = match &request.y2_field {
        Some(name) => Some(column_numbers(frame, name)?),
        None => None,
    };
    let xs: Vec<Scalar> = match &request.x_field {
        Some(name) => column_scalars(frame, name)?
            .into_iter()
            .map(|x| match x {
                Scalar::Text(ref s) => match crate::value::parse_date(s) {
                    Some(d) => Scalar::Date(d),
                    None => x,
                },
                other => other,
            })
            .collect(),
        None => (0..ys.len()).map(|i| Scalar::Number(i as f64)).collect(),
    };

    let mut points: Vec<ChartPoint> = xs
        .into_iter()
        .zip(ys)
        .enumerate()
        .filter_map(|(idx, (x, y))| {
            let y = y?;
            if x.is_null() {
                return None;
            }
            Some(ChartPoint {
                x,
                y,
                y2: y2s.as_ref().and_then(|v| v[idx]),
            })
        })
        .collect();

    if request.kind.is_line_like() && points.iter().all(|p| matches!(p.x, Scalar::Date(_))) {
        points.sort_by_key(|p| p.x.as_datetime());
    }
    Ok(points)
}

/// The charts produced for a freshly ingested dataset: a time series, the
/// strongest correlated pair, a categorical breakdown and the first numeric
/// column over row order. Charts whose columns are missing are skipped.
pub fn default_charts(
    frame: &DataFrame,
    metadata: &DatasetMetadata,
    correlations: &[CorrelationReport],
    options: &DownsampleOptions,
) -> Result<Vec<ChartSpec>> {
    let mut requests = Vec::new();
    let first_numeric = metadata.numeric_columns.first();

    if let (Some(date), Some(y)) = (metadata.date_columns.first(), first_numeric) {
        requests.push(ChartRequest::new(ChartKind::Line, Some(date), y));
    }

    if let Some((report, top)) = correlations
        .iter()
        .find_map(|r| r.results.first().map(|top| (r, top)))
    {
        let mut request = ChartRequest::new(ChartKind::Scatter, Some(&top.column), &report.target);
        request.title = format!("{} vs {} (r = {:.2})", report.target, top.column, top.coefficient);
        requests.push(request);
    }

    if let Some(y) = first_numeric {
        if let Some(category) = metadata
            .columns
            .iter()
            .filter(|c| c.kind == ColumnKind::String)
            .find(|c| distinct_within(frame, &c.name, MAX_CATEGORIES))
        {
            requests.push(ChartRequest::new(ChartKind::Bar, Some(&category.name), y).with_aggregate(Aggregation::Mean));
        }
        requests.push(ChartRequest::new(ChartKind::Line, None, y));
    }

    requests.iter().map(|r| build_chart(frame, r, options)).collect()
}

fn distinct_within(frame: &DataFrame, column: &str, limit: usize) -> bool {
    let Ok(values) = column_scalars(frame, column) else {
        return false;
    };
    let mut seen = HashSet::new();
    for value in values.iter().filter(|v| !v.is_null()) {
        seen.insert(value.to_string());
        if seen.len() > limit {
            return false;
        }
    }
    !seen.is_empty()
}
