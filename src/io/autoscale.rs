//! Percentile autoscaling of float bands to 8-bit quicklooks.
use ndarray::Array2;
use tracing::debug;

/// Basic statistics and percentile estimates from a streaming histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStats {
    pub valid_count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub p02: f64,
    pub p98: f64,
}

const NUM_BINS: usize = 4096;

/// Samples that take part in the statistics: finite and not the no-data value.
fn is_valid(v: f32, no_data: Option<f32>) -> bool {
    v.is_finite() && no_data.is_none_or(|nd| v != nd)
}

/// Two passes over the valid samples: min/max plus Welford mean/std, then a
/// fixed-bin histogram over `[min, max]` inverted for the percentiles.
pub fn band_stats(data: &Array2<f32>, no_data: Option<f32>) -> BandStats {
    let mut count: u64 = 0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut mean = 0.0_f64;
    let mut m2 = 0.0_f64;

    for &v in data.iter().filter(|&&v| is_valid(v, no_data)) {
        let v = v as f64;
        count += 1;
        min = min.min(v);
        max = max.max(v);
        let delta = v - mean;
        mean += delta / count as f64;
        m2 += delta * (v - mean);
    }

    if count == 0 {
        return BandStats {
            valid_count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std: 0.0,
            p02: 0.0,
            p98: 0.0,
        };
    }
    let std = if count > 1 { (m2 / count as f64).sqrt() } else { 0.0 };

    if (max - min).abs() < f64::EPSILON {
        return BandStats {
            valid_count: count as usize,
            min,
            max,
            mean,
            std,
            p02: min,
            p98: max,
        };
    }

    let span = max - min;
    let mut hist = vec![0u64; NUM_BINS];
    for &v in data.iter().filter(|&&v| is_valid(v, no_data)) {
        let t = ((v as f64 - min) / span).clamp(0.0, 1.0);
        let idx = ((t * NUM_BINS as f64) as usize).min(NUM_BINS - 1);
        hist[idx] += 1;
    }

    let percentile = |p: f64| -> f64 {
        let target = ((p * count as f64).floor() as u64).min(count - 1);
        let bin_width = span / NUM_BINS as f64;
        let mut cumsum = 0u64;
        for (b, &h) in hist.iter().enumerate() {
            let next = cumsum + h;
            if target < next {
                let frac = (target - cumsum) as f64 / h as f64;
                return min + (b as f64 + frac) * bin_width;
            }
            cumsum = next;
        }
        max
    };

    BandStats {
        valid_count: count as usize,
        min,
        max,
        mean,
        std,
        p02: percentile(0.02),
        p98: percentile(0.98),
    }
}

/// Linear stretch of the 2nd..98th percentile window to 0..=255.
/// Invalid samples map to 0.
pub fn autoscale_to_u8(data: &Array2<f32>, no_data: Option<f32>) -> Vec<u8> {
    let stats = band_stats(data, no_data);
    if stats.valid_count == 0 {
        return vec![0u8; data.len()];
    }
    let low = stats.p02;
    let high = stats.p98;
    let range = (high - low).max(f64::MIN_POSITIVE);
    debug!(
        low,
        high,
        mean = stats.mean,
        std = stats.std,
        "Autoscale window"
    );

    data.iter()
        .map(|&v| {
            if !is_valid(v, no_data) {
                return 0u8;
            }
            let n = ((v as f64).clamp(low, high) - low) / range;
            (n * 255.0).round().clamp(0.0, 255.0) as u8
        })
        .collect()
}
