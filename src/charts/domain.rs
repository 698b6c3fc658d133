//! Y-axis domain selection resistant to outliers.

use crate::stats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStrategy {
    /// Weighted mix of the IQR-bounded range and the full range.
    #[default]
    Blend,
    Full,
    Iqr,
    StdDev,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainOptions {
    pub strategy: DomainStrategy,
    /// Weight of the IQR-bounded range under `Blend`; the full range gets the rest.
    pub blend_weight: f64,
    pub padding_ratio: f64,
    pub min_padding: f64,
    pub include_zero: bool,
    pub iqr_multiplier: f64,
    pub std_devs: f64,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self {
            strategy: DomainStrategy::Blend,
            blend_weight: 0.7,
            padding_ratio: 0.05,
            min_padding: 0.0,
            include_zero: false,
            iqr_multiplier: 1.5,
            std_devs: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub mode: f64,
    pub std_dev: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

/// Descriptive statistics over the finite values; `None` if there are none.
pub fn domain_stats(values: &[f64]) -> Option<DomainStats> {
    let sorted = stats::sorted(values);
    let (min, max) = (*sorted.first()?, *sorted.last()?);
    let q1 = stats::percentile_sorted(&sorted, 0.25)?;
    let q3 = stats::percentile_sorted(&sorted, 0.75)?;
    Some(DomainStats {
        count: sorted.len(),
        min,
        max,
        mean: stats::mean(&sorted)?,
        median: stats::median_sorted(&sorted)?,
        mode: stats::binned_mode(&sorted)?,
        std_dev: stats::std_dev(&sorted)?,
        q1,
        q3,
        iqr: q3 - q1,
    })
}

pub fn smart_domain(values: &[f64], options: &DomainOptions) -> Option<(f64, f64)> {
    let s = domain_stats(values)?;

    let (lo, hi) = match options.strategy {
        DomainStrategy::Full => (s.min, s.max),
        DomainStrategy::Iqr => iqr_bounds(&s, options.iqr_multiplier),
        DomainStrategy::StdDev => (
            (s.mean - options.std_devs * s.std_dev).max(s.min),
            (s.mean + options.std_devs * s.std_dev).min(s.max),
        ),
        DomainStrategy::Blend => {
            let (ilo, ihi) = iqr_bounds(&s, options.iqr_multiplier);
            let w = options.blend_weight.clamp(0.0, 1.0);
            (w * ilo + (1.0 - w) * s.min, w * ihi + (1.0 - w) * s.max)
        }
    };

    let (mut lo, mut hi) = if lo.is_finite() && hi.is_finite() && lo <= hi {
        (lo, hi)
    } else {
        return Some(fallback(s.min, s.max));
    };

    if options.include_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }

    let range = hi - lo;
    let mut padding = (range * options.padding_ratio).max(options.min_padding);
    if range == 0.0 {
        padding = padding.max(1.0);
    }
    lo -= padding;
    hi += padding;
    if options.include_zero {
        // Padding must not push an all-positive or all-negative axis across zero.
        if s.min >= 0.0 {
            lo = lo.max(0.0);
        }
        if s.max <= 0.0 {
            hi = hi.min(0.0);
        }
    }

    if lo.is_finite() && hi.is_finite() && lo < hi {
        Some((lo, hi))
    } else {
        Some(fallback(s.min, s.max))
    }
}

/// IQR fences clipped to the observed range.
fn iqr_bounds(s: &DomainStats, k: f64) -> (f64, f64) {
    ((s.q1 - k * s.iqr).max(s.min), (s.q3 + k * s.iqr).min(s.max))
}

fn fallback(min: f64, max: f64) -> (f64, f64) {
    if min == max {
        return (min - 1.0, max + 1.0);
    }
    let margin = (max - min).abs() * 0.1;
    (min - margin, max + margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_finite_values() {
        assert!(smart_domain(&[], &DomainOptions::default()).is_none());
        assert!(smart_domain(&[f64::NAN, f64::INFINITY], &DomainOptions::default()).is_none());
    }

    #[test]
    fn test_constant_series_gets_unit_padding() {
        let (lo, hi) = smart_domain(&[5.0, 5.0, 5.0], &DomainOptions::default()).unwrap();
        assert_eq!((lo, hi), (4.0, 6.0));
    }

    #[test]
    fn test_blend_pulls_in_outlier() {
        let mut values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        values.push(10_000.0);
        let full = smart_domain(
            &values,
            &DomainOptions {
                strategy: DomainStrategy::Full,
                ..Default::default()
            },
        )
        .unwrap();
        let blend = smart_domain(&values, &DomainOptions::default()).unwrap();
        assert!(blend.1 < full.1);
        assert!(blend.1 > 100.0);
        assert!(blend.0 < 1.0);
    }

    #[test]
    fn test_full_strategy_padding() {
        let options = DomainOptions {
            strategy: DomainStrategy::Full,
            ..Default::default()
        };
        let (lo, hi) = smart_domain(&[0.0, 100.0], &options).unwrap();
        assert_eq!((lo, hi), (-5.0, 105.0));
    }

    #[test]
    fn test_include_zero() {
        let options = DomainOptions {
            strategy: DomainStrategy::Full,
            include_zero: true,
            ..Default::default()
        };
        let (lo, hi) = smart_domain(&[50.0, 100.0], &options).unwrap();
        assert_eq!(lo, 0.0);
        assert_eq!(hi, 105.0);
    }

    #[test]
    fn test_stats() {
        let s = domain_stats(&[1.0, 2.0, 3.0, 4.0, f64::NAN]).unwrap();
        assert_eq!(s.count, 4);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.q1, 1.75);
        assert_eq!(s.q3, 3.25);
        assert_eq!(s.iqr, 1.5);
    }
}
