//! Small descriptive-statistics helpers shared by correlation insights,
//! axis-domain calculation and column summaries.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1). A single value has zero spread.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Linear-interpolated percentile over an already sorted slice; `p` in [0, 1].
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let weight = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

pub fn median_sorted(sorted: &[f64]) -> Option<f64> {
    percentile_sorted(sorted, 0.5)
}

/// Mode estimated from a histogram binned with Sturges' rule; returns the centre
/// of the fullest bin.
pub fn binned_mode(sorted: &[f64]) -> Option<f64> {
    let (first, last) = (*sorted.first()?, *sorted.last()?);
    if first == last {
        return Some(first);
    }
    let bins = ((sorted.len() as f64).log2().ceil() as usize + 1).max(1);
    let width = (last - first) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in sorted {
        let idx = (((v - first) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let (best, _) = counts
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))?;
    Some(first + width * (best as f64 + 0.5))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinAvgMax {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

pub fn min_avg_max(values: &[f64]) -> Option<MinAvgMax> {
    let avg = mean(values)?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(MinAvgMax { min, avg, max })
}
