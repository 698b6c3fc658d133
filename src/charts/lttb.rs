//! Largest-Triangle-Three-Buckets reduction.

/// Reduce `data` to `threshold` points, keeping the first and last point and,
/// per bucket, the point spanning the largest triangle with the previously kept
/// point and the average of the next bucket.
///
/// `threshold >= data.len()` returns the input. Below three points there is no
/// interior to choose from, so the result is the first `threshold` of
/// `[first, last]`.
pub fn lttb<T: Clone>(data: &[T], threshold: usize, xy: impl Fn(&T) -> (f64, f64)) -> Vec<T> {
    let n = data.len();
    if threshold >= n {
        return data.to_vec();
    }
    if threshold < 3 {
        let ends = [&data[0], &data[n - 1]];
        return ends.into_iter().take(threshold).cloned().collect();
    }

    let every = (n - 2) as f64 / (threshold - 2) as f64;
    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(data[0].clone());
    let mut a = 0usize;

    for i in 0..threshold - 2 {
        let avg_start = ((i + 1) as f64 * every).floor() as usize + 1;
        let avg_end = (((i + 2) as f64 * every).floor() as usize + 1).min(n);
        let (avg_x, avg_y) = if avg_start < avg_end {
            let len = (avg_end - avg_start) as f64;
            let (sx, sy) = data[avg_start..avg_end]
                .iter()
                .map(&xy)
                .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
            (sx / len, sy / len)
        } else {
            xy(&data[n - 1])
        };

        let range_start = (i as f64 * every).floor() as usize + 1;
        let range_end = (((i + 1) as f64 * every).floor() as usize + 1).min(n - 1);
        let (ax, ay) = xy(&data[a]);

        let mut max_area = -1.0;
        let mut next_a = range_start;
        for (j, point) in data.iter().enumerate().take(range_end).skip(range_start) {
            let (px, py) = xy(point);
            let area = ((ax - avg_x) * (py - ay) - (ax - px) * (avg_y - ay)).abs() * 0.5;
            if area > max_area {
                max_area = area;
                next_a = j;
            }
        }

        sampled.push(data[next_a].clone());
        a = next_a;
    }

    sampled.push(data[n - 1].clone());
    sampled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(n: usize) -> Vec<(f64, f64)> {
        (0..n).map(|i| (i as f64, (i as f64 / 50.0).sin() * 100.0)).collect()
    }

    #[test]
    fn test_keeps_endpoints_and_exact_length() {
        let data = wave(20_000);
        let out = lttb(&data, 500, |p| *p);
        assert_eq!(out.len(), 500);
        assert_eq!(out.first(), data.first());
        assert_eq!(out.last(), data.last());
        assert!(out.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_keeps_spike() {
        let mut data: Vec<(f64, f64)> = (0..1_000).map(|i| (i as f64, 0.0)).collect();
        data[500].1 = 1_000.0;
        let out = lttb(&data, 20, |p| *p);
        assert!(out.iter().any(|p| p.1 == 1_000.0));
    }

    #[test]
    fn test_small_thresholds() {
        let data = wave(10);
        assert!(lttb(&data, 0, |p| *p).is_empty());
        assert_eq!(lttb(&data, 1, |p| *p), vec![data[0]]);
        assert_eq!(lttb(&data, 2, |p| *p), vec![data[0], data[9]]);
        assert_eq!(lttb(&data, 10, |p| *p), data);
        assert_eq!(lttb(&data, 3, |p| *p).len(), 3);
        let empty: Vec<(f64, f64)> = Vec::new();
        assert!(lttb(&empty, 2, |p| *p).is_empty());
    }
}
