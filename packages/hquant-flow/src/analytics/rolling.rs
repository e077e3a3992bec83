use serde::{Deserialize, Serialize};

use super::series::{align, align_many, Series};
use super::stats::{mean, pearson, sample_std};

/// Rolling z-score `(x - mean_w) / std_w` with a sample standard deviation.
///
/// Empty when `values` is shorter than `window`. Indices below `window - 1`
/// are `NaN`, as is any window with zero dispersion.
pub fn rolling_zscore(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    let mut out = vec![f64::NAN; values.len()];
    for end in (window - 1)..values.len() {
        let w = &values[end + 1 - window..=end];
        let sd = sample_std(w);
        out[end] = if sd > 0.0 {
            (values[end] - mean(w)) / sd
        } else {
            f64::NAN
        };
    }
    out
}

/// [`rolling_zscore`] keeping the series index.
pub fn zscore(series: &Series, window: usize) -> Series {
    let z = rolling_zscore(&series.values, window);
    if z.is_empty() {
        return Series::empty();
    }
    Series::new(series.timestamps.clone(), z)
}

/// Trailing Pearson correlation over the aligned series.
///
/// Empty when fewer than `window` rows align; `NaN` until the window fills.
pub fn rolling_correlation(a: &Series, b: &Series, window: usize) -> Series {
    let al = align(a, b);
    if window == 0 || al.len() < window {
        return Series::empty();
    }
    let mut out = vec![f64::NAN; al.len()];
    for end in (window - 1)..al.len() {
        let range = end + 1 - window..=end;
        out[end] = pearson(&al.left[range.clone()], &al.right[range]);
    }
    Series::new(al.timestamps, out)
}

/// Symmetric correlation matrix over the trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,
    /// Row-major, `symbols.len()` squared.
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        Some(self.values[i][j])
    }
}

/// Pairwise correlation of the last `window` aligned rows across N >= 2
/// series. Diagonal is 1.0; undefined cells are 0.0.
pub fn cross_correlation_matrix(
    series: &[(String, Series)],
    window: usize,
) -> Option<CorrelationMatrix> {
    if series.len() < 2 || window == 0 {
        return None;
    }
    let refs: Vec<&Series> = series.iter().map(|(_, s)| s).collect();
    let (timestamps, columns) = align_many(&refs);
    if timestamps.len() < window {
        return None;
    }
    let start = timestamps.len() - window;
    let n = series.len();
    let mut values = vec![vec![0.0; n]; n];
    for i in 0..n {
        values[i][i] = 1.0;
        for j in (i + 1)..n {
            let r = pearson(&columns[i][start..], &columns[j][start..]);
            let r = if r.is_finite() { r } else { 0.0 };
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    Some(CorrelationMatrix {
        symbols: series.iter().map(|(s, _)| s.clone()).collect(),
        values,
    })
}
