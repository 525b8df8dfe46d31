use crate::utils::percentile_sorted;

pub const NUM_HISTOGRAM_BINS: usize = 8;
pub const NUM_COLOR_FEATURES_PER_CHANNEL: usize = 18;

const BIN_WIDTH: usize = 256 / NUM_HISTOGRAM_BINS;

pub fn color_feature_names(channel: &str) -> Vec<String> {
    let mut names: Vec<String> = (0..NUM_HISTOGRAM_BINS)
        .map(|b| format!("{channel}_hist_{b}"))
        .collect();
    for stat in [
        "mean", "std", "median", "skewness", "energy", "min", "max", "q25", "q75", "iqr",
    ] {
        names.push(format!("{channel}_{stat}"));
    }
    names
}

/// Statistics of one channel over the pixels of a single instance.
///
/// Layout: 8 equal-width histogram fractions over [0, 256), then mean, std,
/// median, skewness, energy (mean of the squared channel), min, max, the
/// 25th/75th percentiles and the interquartile range.
pub fn channel_features(values: &[u8]) -> [f64; NUM_COLOR_FEATURES_PER_CHANNEL] {
    let mut features = [0.0f64; NUM_COLOR_FEATURES_PER_CHANNEL];
    if values.is_empty() {
        return features;
    }
    let n = values.len() as f64;

    for &v in values {
        features[v as usize / BIN_WIDTH] += 1.0;
    }
    for bin in features.iter_mut().take(NUM_HISTOGRAM_BINS) {
        *bin /= n;
    }

    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let m2 = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let m3 = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(3))
        .sum::<f64>()
        / n;
    // Third standardized moment; defined as 0 for constant input.
    let skewness = if m2 > 0.0 { m3 / m2.powf(1.5) } else { 0.0 };
    let energy = values.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / n;

    let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = percentile_sorted(&sorted, 50.0);
    let q25 = percentile_sorted(&sorted, 25.0);
    let q75 = percentile_sorted(&sorted, 75.0);

    features[NUM_HISTOGRAM_BINS] = mean;
    features[NUM_HISTOGRAM_BINS + 1] = m2.sqrt();
    features[NUM_HISTOGRAM_BINS + 2] = median;
    features[NUM_HISTOGRAM_BINS + 3] = skewness;
    features[NUM_HISTOGRAM_BINS + 4] = energy;
    features[NUM_HISTOGRAM_BINS + 5] = sorted[0];
    features[NUM_HISTOGRAM_BINS + 6] = sorted[sorted.len() - 1];
    features[NUM_HISTOGRAM_BINS + 7] = q25;
    features[NUM_HISTOGRAM_BINS + 8] = q75;
    features[NUM_HISTOGRAM_BINS + 9] = q75 - q25;
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_channel() {
        let f = channel_features(&[100; 10]);
        // All pixels in bin 3 ([96, 128)).
        assert_eq!(f[3], 1.0);
        assert_eq!(f[..8].iter().sum::<f64>(), 1.0);
        assert_eq!(f[8], 100.0); // mean
        assert_eq!(f[9], 0.0); // std
        assert_eq!(f[10], 100.0); // median
        assert_eq!(f[11], 0.0); // skewness of constant input
        assert_eq!(f[12], 10000.0); // energy
        assert_eq!(f[13], 100.0); // min
        assert_eq!(f[14], 100.0); // max
        assert_eq!(f[17], 0.0); // iqr
    }

    #[test]
    fn histogram_fractions_sum_to_one() {
        let values: Vec<u8> = (0..=255).collect();
        let f = channel_features(&values);
        let total: f64 = f[..NUM_HISTOGRAM_BINS].iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        for bin in &f[..NUM_HISTOGRAM_BINS] {
            assert!((bin - 0.125).abs() < 1e-12);
        }
    }

    #[test]
    fn skewness_sign() {
        // Mostly small values with one large outlier: right-skewed.
        let mut values = vec![10u8; 20];
        values.push(250);
        let f = channel_features(&values);
        assert!(f[11] > 0.0);
    }

    #[test]
    fn quartiles_of_uniform_ramp() {
        let values: Vec<u8> = (0..=100).collect();
        let f = channel_features(&values);
        assert_eq!(f[10], 50.0);
        assert_eq!(f[15], 25.0);
        assert_eq!(f[16], 75.0);
        assert_eq!(f[17], 50.0);
    }
}
