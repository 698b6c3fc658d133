//! Point-budget enforcement for chart series.
//!
//! Strategy is picked from the chart kind and the shape of the x values:
//!
//! | Series | Strategy |
//! |--------|----------|
//! | line/area over dates | resample per period, LTTB if still too long |
//! | explicit aggregation, numeric x | evenly spaced x ranges |
//! | explicit aggregation, categorical x | per category, strided if too many |
//! | line/area over numbers | LTTB |
//! | scatter over numbers | mean per x range |
//! | anything else | stride decimation |

use crate::charts::lttb::lttb;
use crate::charts::{Aggregation, ChartKind, ChartPoint};
use crate::value::Scalar;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownsampleOptions {
    pub max_points: usize,
    /// Explicit aggregation requested by the caller.
    pub aggregate: Option<Aggregation>,
    /// How values are combined when a time series is resampled.
    pub time_aggregate: Aggregation,
}

impl Default for DownsampleOptions {
    fn default() -> Self {
        Self {
            max_points: crate::config::DEFAULT_MAX_CHART_POINTS,
            aggregate: None,
            time_aggregate: Aggregation::Mean,
        }
    }
}

impl DownsampleOptions {
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn with_aggregate(mut self, aggregate: Aggregation) -> Self {
        self.aggregate = Some(aggregate);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    TimeResample,
    NumericBuckets(Aggregation),
    CategoryBuckets(Aggregation),
    Lttb,
    ScatterBuckets,
    Stride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePeriod {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimePeriod {
    pub fn for_span(span: Duration) -> Self {
        let days = span.num_days();
        if days > 730 {
            TimePeriod::Year
        } else if days > 90 {
            TimePeriod::Month
        } else if days > 14 {
            TimePeriod::Week
        } else {
            TimePeriod::Day
        }
    }

    /// First day of the period containing `date`.
    pub fn start_of(self, date: NaiveDate) -> NaiveDate {
        let first_of = |year: i32, month: u32| NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date);
        match self {
            TimePeriod::Day => date,
            TimePeriod::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            TimePeriod::Month => first_of(date.year(), date.month()),
            TimePeriod::Quarter => first_of(date.year(), (date.month() - 1) / 3 * 3 + 1),
            TimePeriod::Year => first_of(date.year(), 1),
        }
    }
}

/// Reduce `points` to at most `options.max_points`. Series already within
/// budget are returned unchanged.
pub fn downsample(points: &[ChartPoint], kind: ChartKind, options: &DownsampleOptions) -> Vec<ChartPoint> {
    let max = options.max_points;
    if points.len() <= max {
        return points.to_vec();
    }

    let strategy = select_strategy(points, kind, options);
    let reduced = match strategy {
        Strategy::TimeResample => resample_time(points, options.time_aggregate, max),
        Strategy::NumericBuckets(agg) => numeric_buckets(points, agg, max),
        Strategy::CategoryBuckets(agg) => stride(&aggregate_by_category(points, agg), max),
        Strategy::Lttb => lttb_numeric(points, max),
        Strategy::ScatterBuckets => numeric_buckets(points, Aggregation::Mean, max),
        Strategy::Stride => stride(points, max),
    };

    debug!(
        ?kind,
        ?strategy,
        input = points.len(),
        output = reduced.len(),
        max,
        "Downsampled chart series"
    );

    if reduced.len() > max {
        stride(&reduced, max)
    } else {
        reduced
    }
}

pub fn select_strategy(points: &[ChartPoint], kind: ChartKind, options: &DownsampleOptions) -> Strategy {
    if kind.is_line_like() && x_is_temporal(points) {
        return Strategy::TimeResample;
    }
    let numeric_x = x_is_numeric(points);
    if let Some(agg) = options.aggregate {
        return if numeric_x {
            Strategy::NumericBuckets(agg)
        } else {
            Strategy::CategoryBuckets(agg)
        };
    }
    match kind {
        ChartKind::Line | ChartKind::Area if numeric_x => Strategy::Lttb,
        ChartKind::Scatter if numeric_x => Strategy::ScatterBuckets,
        _ => Strategy::Stride,
    }
}

fn x_is_numeric(points: &[ChartPoint]) -> bool {
    !points.is_empty() && points.iter().all(|p| p.x.as_f64().is_some())
}

fn x_is_temporal(points: &[ChartPoint]) -> bool {
    !points.is_empty()
        && points
            .iter()
            .all(|p| !matches!(p.x, Scalar::Number(_)) && p.x.as_datetime().is_some())
}

/// Uniform decimation: every `max(1, n / max)`-th point, capped at `max`.
pub fn stride(points: &[ChartPoint], max: usize) -> Vec<ChartPoint> {
    if points.len() <= max {
        return points.to_vec();
    }
    let step = (points.len() / max.max(1)).max(1);
    points.iter().step_by(step).take(max).cloned().collect()
}

fn lttb_numeric(points: &[ChartPoint], max: usize) -> Vec<ChartPoint> {
    lttb(points, max, |p| (p.x.as_f64().unwrap_or(0.0), p.y))
}

#[derive(Default)]
struct Bucket {
    x_sum: f64,
    y_sum: f64,
    count: usize,
    y2_sum: f64,
    y2_count: usize,
}

impl Bucket {
    fn push(&mut self, x: f64, point: &ChartPoint) {
        self.x_sum += x;
        self.y_sum += point.y;
        self.count += 1;
        if let Some(y2) = point.y2 {
            self.y2_sum += y2;
            self.y2_count += 1;
        }
    }

    fn y(&self, agg: Aggregation) -> f64 {
        combine(agg, self.y_sum, self.count)
    }

    fn y2(&self, agg: Aggregation) -> Option<f64> {
        (self.y2_count > 0).then(|| combine(agg, self.y2_sum, self.y2_count))
    }
}

fn combine(agg: Aggregation, sum: f64, count: usize) -> f64 {
    match agg {
        Aggregation::Sum => sum,
        Aggregation::Mean => sum / count.max(1) as f64,
        Aggregation::Count => count as f64,
    }
}

/// Aggregate per calendar period chosen from the series' span, then apply LTTB
/// if there are still too many periods.
pub fn resample_time(points: &[ChartPoint], agg: Aggregation, max: usize) -> Vec<ChartPoint> {
    let stamped: Vec<(NaiveDateTime, &ChartPoint)> = points
        .iter()
        .filter_map(|p| Some((p.x.as_datetime()?, p)))
        .collect();
    let (Some(first), Some(last)) = (
        stamped.iter().map(|(t, _)| *t).min(),
        stamped.iter().map(|(t, _)| *t).max(),
    ) else {
        return Vec::new();
    };

    let period = TimePeriod::for_span(last - first);
    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
    for (ts, point) in &stamped {
        buckets
            .entry(period.start_of(ts.date()))
            .or_default()
            .push(0.0, point);
    }

    let resampled: Vec<ChartPoint> = buckets
        .into_iter()
        .filter_map(|(start, bucket)| {
            Some(ChartPoint {
                x: Scalar::Date(start.and_hms_opt(0, 0, 0)?),
                y: bucket.y(agg),
                y2: bucket.y2(agg),
            })
        })
        .collect();

    debug!(?period, periods = resampled.len(), "Resampled time series");

    if resampled.len() > max {
        lttb(&resampled, max, |p| {
            let ts = p.x.as_datetime().map(|t| t.and_utc().timestamp() as f64).unwrap_or(0.0);
            (ts, p.y)
        })
    } else {
        resampled
    }
}

/// Bucket into `buckets` evenly spaced x ranges; each non-empty bucket becomes
/// one point at its mean x.
pub fn numeric_buckets(points: &[ChartPoint], agg: Aggregation, buckets: usize) -> Vec<ChartPoint> {
    let xs: Vec<(f64, &ChartPoint)> = points
        .iter()
        .filter_map(|p| Some((p.x.as_f64()?, p)))
        .collect();
    if xs.is_empty() || buckets == 0 {
        return Vec::new();
    }
    let min = xs.iter().map(|(x, _)| *x).fold(f64::INFINITY, f64::min);
    let max = xs.iter().map(|(x, _)| *x).fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / buckets as f64;

    let mut slots: Vec<Bucket> = (0..buckets).map(|_| Bucket::default()).collect();
    for (x, point) in &xs {
        let idx = if width > 0.0 {
            (((x - min) / width) as usize).min(buckets - 1)
        } else {
            0
        };
        slots[idx].push(*x, point);
    }

    slots
        .into_iter()
        .filter(|b| b.count > 0)
        .map(|b| ChartPoint {
            x: Scalar::Number(b.x_sum / b.count as f64),
            y: b.y(agg),
            y2: b.y2(agg),
        })
        .collect()
}

/// One point per distinct x value, in order of first appearance.
pub fn aggregate_by_category(points: &[ChartPoint], agg: Aggregation) -> Vec<ChartPoint> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<(Scalar, Bucket)> = Vec::new();
    for point in points {
        let key = point.x.to_string();
        let slot = *index.entry(key).or_insert_with(|| {
            order.push((point.x.clone(), Bucket::default()));
            order.len() - 1
        });
        order[slot].1.push(0.0, point);
    }
    order
        .into_iter()
        .map(|(x, b)| ChartPoint {
            x,
            y: b.y(agg),
            y2: b.y2(agg),
        })
        .collect()
}
