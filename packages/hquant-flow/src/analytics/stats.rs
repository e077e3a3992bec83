use serde::{Deserialize, Serialize};

/// Periods per year at minute granularity, used to annualize return volatility.
pub const PERIODS_PER_YEAR: f64 = 252.0 * 24.0 * 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    pub return_mean: f64,
    pub return_std: f64,
    /// `return_std * sqrt(PERIODS_PER_YEAR)`.
    pub volatility: f64,
    pub skewness: f64,
    /// Excess kurtosis.
    pub kurtosis: f64,
}

impl PriceStats {
    /// Named fields, suitable for a metrics context.
    pub fn fields(&self) -> [(&'static str, f64); 10] {
        [
            ("mean", self.mean),
            ("std", self.std),
            ("min", self.min),
            ("max", self.max),
            ("last", self.last),
            ("return_mean", self.return_mean),
            ("return_std", self.return_std),
            ("volatility", self.volatility),
            ("skewness", self.skewness),
            ("kurtosis", self.kurtosis),
        ]
    }
}

/// Summary statistics over a price sequence. `None` below two observations.
///
/// Moments of the simple returns follow the bias-corrected sample estimators;
/// with too few returns for a moment it is `NaN`.
pub fn price_stats(prices: &[f64]) -> Option<PriceStats> {
    if prices.len() < 2 {
        return None;
    }
    let returns: Vec<f64> = prices
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .filter(|r| r.is_finite())
        .collect();

    let (return_mean, return_std, skewness, kurtosis) = if returns.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        (
            mean(&returns),
            sample_std(&returns),
            skewness(&returns),
            excess_kurtosis(&returns),
        )
    };

    Some(PriceStats {
        mean: mean(prices),
        std: sample_std(prices),
        min: prices.iter().copied().fold(f64::INFINITY, f64::min),
        max: prices.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        last: prices[prices.len() - 1],
        return_mean,
        return_std,
        volatility: return_std * PERIODS_PER_YEAR.sqrt(),
        skewness,
        kurtosis,
    })
}

#[inline]
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample variance (ddof = 1).
pub fn sample_variance(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (n - 1) as f64
}

#[inline]
pub fn sample_std(xs: &[f64]) -> f64 {
    sample_variance(xs).sqrt()
}

/// Adjusted Fisher–Pearson skewness. Zero for a constant sample.
pub fn skewness(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if xs.len() < 3 {
        return f64::NAN;
    }
    let m = mean(xs);
    let m2 = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
    let m3 = xs.iter().map(|x| (x - m).powi(3)).sum::<f64>() / n;
    if m2 == 0.0 {
        return 0.0;
    }
    (n * (n - 1.0)).sqrt() / (n - 2.0) * m3 / m2.powf(1.5)
}

/// Bias-corrected excess kurtosis. Zero for a constant sample.
pub fn excess_kurtosis(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if xs.len() < 4 {
        return f64::NAN;
    }
    let m = mean(xs);
    let s2 = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    let s4 = xs.iter().map(|x| (x - m).powi(4)).sum::<f64>();
    if s2 == 0.0 {
        return 0.0;
    }
    let a = n * (n + 1.0) * (n - 1.0) * s4 / ((n - 2.0) * (n - 3.0) * s2 * s2);
    let b = 3.0 * (n - 1.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0));
    a - b
}

/// Pearson correlation; `NaN` when either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.len() < 2 {
        return f64::NAN;
    }
    let ma = mean(a);
    let mb = mean(b);
    let mut sab = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    let denom = (saa * sbb).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    sab / denom
}

/// Median of a non-empty slice (average of the middle pair for even length).
pub fn median(xs: &mut [f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.sort_by(|a, b| a.total_cmp(b));
    let mid = xs.len() / 2;
    if xs.len() % 2 == 0 {
        (xs[mid - 1] + xs[mid]) / 2.0
    } else {
        xs[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn needs_two_prices() {
        assert!(price_stats(&[]).is_none());
        assert!(price_stats(&[100.0]).is_none());
        assert!(price_stats(&[100.0, 101.0]).is_some());
    }

    #[test]
    fn basic_moments() {
        let prices = [100.0, 102.0, 101.0, 103.0, 104.0];
        let s = price_stats(&prices).unwrap();
        assert!(close(s.mean, 102.0));
        assert!(close(s.std, 2.5f64.sqrt()));
        assert_eq!(s.min, 100.0);
        assert_eq!(s.max, 104.0);
        assert_eq!(s.last, 104.0);

        let returns = [0.02, -1.0 / 102.0, 2.0 / 101.0, 1.0 / 103.0];
        assert!(close(s.return_mean, mean(&returns)));
        assert!(close(s.return_std, sample_std(&returns)));
        assert!(close(s.volatility, s.return_std * PERIODS_PER_YEAR.sqrt()));
    }

    #[test]
    fn skew_and_kurtosis_reference_values() {
        // Deviations -3, -2, -1, 0, 6: G1 = 1.2 * sqrt(2), G2 = 11.152 - 8.
        let xs = [1.0, 2.0, 3.0, 4.0, 10.0];
        assert!((skewness(&xs) - 1.2 * std::f64::consts::SQRT_2).abs() < 1e-9);
        assert!((excess_kurtosis(&xs) - 3.152).abs() < 1e-9);
        assert_eq!(skewness(&[2.0, 2.0, 2.0]), 0.0);
        assert_eq!(excess_kurtosis(&[2.0, 2.0, 2.0, 2.0]), 0.0);
        assert!(skewness(&[1.0, 2.0]).is_nan());
    }

    #[test]
    fn pearson_and_median() {
        assert!(close(pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0));
        assert!(close(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0));
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
