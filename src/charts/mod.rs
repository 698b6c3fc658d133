//! Downsampling & Axis-Scaling Engine
//!
//! Every chart series handed to a caller passes through [`downsample`], which
//! guarantees the point budget regardless of how large the source is.
//! [`smart_domain`] picks a readable y-axis range that resists outliers.

pub mod builder;
pub mod domain;
pub mod downsample;
pub mod lttb;

pub use builder::{build_chart, default_charts, ChartRequest, ChartSpec};
pub use domain::{domain_stats, smart_domain, DomainOptions, DomainStats, DomainStrategy};
pub use downsample::{downsample, DownsampleOptions, Strategy, TimePeriod};
pub use lttb::lttb;

use crate::value::Scalar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: Scalar,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<f64>,
}

impl ChartPoint {
    pub fn new(x: impl Into<Scalar>, y: f64) -> Self {
        Self {
            x: x.into(),
            y,
            y2: None,
        }
    }

    pub fn with_y2(mut self, y2: f64) -> Self {
        self.y2 = Some(y2);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Area,
    Bar,
    Scatter,
    Pie,
}

impl ChartKind {
    pub fn is_line_like(self) -> bool {
        matches!(self, ChartKind::Line | ChartKind::Area)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Mean,
    Count,
}
