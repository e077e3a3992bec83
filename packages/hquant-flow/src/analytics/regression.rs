use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::linalg::lstsq;
use super::series::{align, Series};
use super::special::student_t_two_sided;
use super::stats::median;

/// OLS fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OlsFit {
    pub intercept: f64,
    /// The static hedge ratio.
    pub slope: f64,
    pub r_squared: f64,
    /// Two-sided p-value of the slope t statistic.
    pub p_value: f64,
    pub std_err: f64,
    /// In aligned timestamp order.
    pub residuals: Vec<f64>,
}

fn ols_xy(y: &[f64], x: &[f64]) -> Option<OlsFit> {
    let n = y.len();
    if n < 2 {
        return None;
    }
    if n == 2 {
        return two_point_line(y, x);
    }
    let rows: Vec<Vec<f64>> = x.iter().map(|&xi| vec![1.0, xi]).collect();
    let fit = lstsq(&rows, y)?;
    let (intercept, slope) = (fit.coef[0], fit.coef[1]);
    if !intercept.is_finite() || !slope.is_finite() {
        return None;
    }

    let residuals: Vec<f64> = y
        .iter()
        .zip(x)
        .map(|(yi, xi)| yi - intercept - slope * xi)
        .collect();
    let y_mean = y.iter().sum::<f64>() / n as f64;
    let sst: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = if sst > 0.0 { 1.0 - fit.ssr / sst } else { f64::NAN };

    let std_err = fit.std_err[1];
    let p_value = if std_err > 0.0 {
        student_t_two_sided(slope / std_err, (n - 2) as f64)
    } else {
        0.0
    };

    Some(OlsFit {
        intercept,
        slope,
        r_squared,
        p_value,
        std_err,
        residuals,
    })
}

/// Exact line through two points. No residual degrees of freedom remain, so
/// the inference fields are `NaN`.
fn two_point_line(y: &[f64], x: &[f64]) -> Option<OlsFit> {
    let dx = x[1] - x[0];
    if dx == 0.0 {
        return None;
    }
    let slope = (y[1] - y[0]) / dx;
    let intercept = y[0] - slope * x[0];
    if !intercept.is_finite() || !slope.is_finite() {
        return None;
    }
    Some(OlsFit {
        intercept,
        slope,
        r_squared: if y[0] != y[1] { 1.0 } else { f64::NAN },
        p_value: f64::NAN,
        std_err: f64::NAN,
        residuals: vec![0.0; 2],
    })
}

/// Static hedge ratio: OLS of `y` on `x` with intercept over the aligned rows.
///
/// Needs at least two aligned rows; a degenerate design yields `None`.
pub fn ols_hedge_ratio(y: &Series, x: &Series) -> Option<OlsFit> {
    let al = align(y, x);
    let fit = ols_xy(&al.left, &al.right);
    if fit.is_none() {
        debug!(rows = al.len(), "ols: insufficient or degenerate input");
    }
    fit
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobustMethod {
    Huber,
    TheilSen,
}

impl fmt::Display for RobustMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RobustMethod::Huber => "huber",
            RobustMethod::TheilSen => "theilsen",
        })
    }
}

impl FromStr for RobustMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huber" => Ok(RobustMethod::Huber),
            "theilsen" | "theil-sen" | "theil_sen" => Ok(RobustMethod::TheilSen),
            other => Err(format!("unknown robust method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustFit {
    pub intercept: f64,
    pub slope: f64,
    pub method: RobustMethod,
}

/// Huber threshold in units of the residual scale.
pub const HUBER_EPSILON: f64 = 1.35;
const HUBER_MAX_ITER: usize = 100;
const HUBER_TOL: f64 = 1e-10;

fn weighted_line(y: &[f64], x: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let sw: f64 = w.iter().sum();
    if sw <= 0.0 {
        return None;
    }
    let mx = x.iter().zip(w).map(|(v, w)| v * w).sum::<f64>() / sw;
    let my = y.iter().zip(w).map(|(v, w)| v * w).sum::<f64>() / sw;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for ((xi, yi), wi) in x.iter().zip(y).zip(w) {
        sxy += wi * (xi - mx) * (yi - my);
        sxx += wi * (xi - mx) * (xi - mx);
    }
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((my - slope * mx, slope))
}

fn huber(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    let n = y.len();
    let mut w = vec![1.0; n];
    let (mut a, mut b) = weighted_line(y, x, &w)?;
    for _ in 0..HUBER_MAX_ITER {
        let resid: Vec<f64> = y.iter().zip(x).map(|(yi, xi)| yi - a - b * xi).collect();
        let mut abs: Vec<f64> = resid.iter().map(|r| r.abs()).collect();
        // MAD scale of a normal sample.
        let scale = median(&mut abs) / 0.6745;
        if scale.is_nan() || scale <= 0.0 {
            break;
        }
        let k = HUBER_EPSILON * scale;
        for (wi, r) in w.iter_mut().zip(&resid) {
            *wi = if r.abs() <= k { 1.0 } else { k / r.abs() };
        }
        let (na, nb) = weighted_line(y, x, &w)?;
        let done = (na - a).abs() <= HUBER_TOL * (1.0 + a.abs())
            && (nb - b).abs() <= HUBER_TOL * (1.0 + b.abs());
        a = na;
        b = nb;
        if done {
            break;
        }
    }
    Some((a, b))
}

/// Upper bound on the pairwise slopes Theil–Sen looks at.
pub const THEIL_SEN_MAX_PAIRS: usize = 10_000;

/// splitmix64, fixed seed so repeated fits agree.
struct PairSampler(u64);

impl PairSampler {
    fn next_index(&mut self, n: usize) -> usize {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        (z % n as u64) as usize
    }
}

fn pair_slope(y: &[f64], x: &[f64], i: usize, j: usize) -> Option<f64> {
    let dx = x[j] - x[i];
    (dx != 0.0).then(|| (y[j] - y[i]) / dx)
}

fn theil_sen(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    let n = y.len();
    let total = n.saturating_mul(n - 1) / 2;
    let mut slopes = Vec::with_capacity(total.min(THEIL_SEN_MAX_PAIRS));
    if total <= THEIL_SEN_MAX_PAIRS {
        for i in 0..n {
            for j in (i + 1)..n {
                slopes.extend(pair_slope(y, x, i, j));
            }
        }
    } else {
        // Random pairs of distinct rows in place of the full pair set.
        let mut sampler = PairSampler(n as u64);
        for _ in 0..THEIL_SEN_MAX_PAIRS {
            let i = sampler.next_index(n);
            let mut j = sampler.next_index(n - 1);
            if j >= i {
                j += 1;
            }
            slopes.extend(pair_slope(y, x, i, j));
        }
    }
    if slopes.is_empty() {
        return None;
    }
    let slope = median(&mut slopes);
    let mut offsets: Vec<f64> = y.iter().zip(x).map(|(yi, xi)| yi - slope * xi).collect();
    Some((median(&mut offsets), slope))
}

/// Outlier-resistant hedge ratio over the aligned rows. Needs two rows.
pub fn robust_hedge_ratio(y: &Series, x: &Series, method: RobustMethod) -> Option<RobustFit> {
    let al = align(y, x);
    if al.len() < 2 {
        return None;
    }
    let (intercept, slope) = match method {
        RobustMethod::Huber => huber(&al.left, &al.right),
        RobustMethod::TheilSen => theil_sen(&al.left, &al.right),
    }?;
    if !intercept.is_finite() || !slope.is_finite() {
        debug!(%method, "robust regression diverged");
        return None;
    }
    Some(RobustFit {
        intercept,
        slope,
        method,
    })
}

/// `p1 - hedge_ratio * p2` over the aligned index, or `p1 - p2` without a ratio.
pub fn spread(p1: &Series, p2: &Series, hedge_ratio: Option<f64>) -> Series {
    let al = align(p1, p2);
    let hr = hedge_ratio.unwrap_or(1.0);
    let values = al.left.iter().zip(&al.right).map(|(a, b)| a - hr * b).collect();
    Series::new(al.timestamps, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, a: f64, b: f64) -> (Series, Series) {
        let ts: Vec<i64> = (0..n as i64).collect();
        let x: Vec<f64> = (0..n).map(|i| 10.0 + i as f64 + ((i * 7) % 5) as f64 * 0.3).collect();
        let y: Vec<f64> = x.iter().map(|v| a + b * v).collect();
        (Series::new(ts.clone(), y), Series::new(ts, x))
    }

    #[test]
    fn ols_recovers_line_with_noise() {
        let ts: Vec<i64> = (0..50).collect();
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 1.0 + 2.0 * v + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let fit = ols_hedge_ratio(&Series::new(ts.clone(), y), &Series::new(ts, x)).unwrap();
        assert!((fit.slope - 2.0).abs() < 0.01);
        assert!(fit.r_squared > 0.99);
        assert!(fit.p_value < 1e-10);
        assert!(fit.std_err > 0.0);
        assert_eq!(fit.residuals.len(), 50);
        assert!(fit.residuals.iter().sum::<f64>().abs() < 1e-8);
    }

    #[test]
    fn ols_from_two_rows_has_no_inference() {
        let (y, x) = line(1, 0.0, 1.0);
        assert!(ols_hedge_ratio(&y, &x).is_none());

        let y = Series::new(vec![1, 2], vec![5.0, 9.0]);
        let x = Series::new(vec![1, 2], vec![1.0, 3.0]);
        let fit = ols_hedge_ratio(&y, &x).unwrap();
        assert_eq!((fit.intercept, fit.slope), (3.0, 2.0));
        assert_eq!(fit.r_squared, 1.0);
        assert!(fit.p_value.is_nan());
        assert!(fit.std_err.is_nan());
        assert_eq!(fit.residuals, vec![0.0, 0.0]);

        let flat = Series::new(vec![1, 2], vec![4.0, 4.0]);
        assert!(ols_hedge_ratio(&y, &flat).is_none());

        let (y, x) = line(3, 0.0, 1.0);
        assert!(ols_hedge_ratio(&y, &x).unwrap().std_err.is_finite());
    }

    #[test]
    fn ols_constant_regressor_is_empty() {
        let ts: Vec<i64> = (0..10).collect();
        let y = Series::new(ts.clone(), (0..10).map(|i| i as f64).collect());
        let x = Series::new(ts, vec![5.0; 10]);
        assert!(ols_hedge_ratio(&y, &x).is_none());
    }

    #[test]
    fn robust_methods_resist_an_outlier() {
        let (y, x) = line(30, 2.0, 1.5);
        let mut y = y;
        y.values[28] += 500.0;
        for method in [RobustMethod::Huber, RobustMethod::TheilSen] {
            let fit = robust_hedge_ratio(&y, &x, method).unwrap();
            assert!((fit.slope - 1.5).abs() < 0.05, "{method}: {}", fit.slope);
            assert_eq!(fit.method, method);
        }
        let ols = ols_hedge_ratio(&y, &x).unwrap();
        assert!((ols.slope - 1.5).abs() > 0.05);
    }

    #[test]
    fn theil_sen_samples_pairs_on_long_inputs() {
        // 50k rows would be ~1.25e9 pairs unsampled.
        let n = 50_000;
        let (mut y, x) = line(n, 3.0, 0.75);
        for i in (0..n).step_by(97) {
            y.values[i] += 1_000.0;
        }
        let xs = x.values.clone();
        let ys = y.values.clone();
        let started = std::time::Instant::now();
        let fit = robust_hedge_ratio(&y, &x, RobustMethod::TheilSen).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!((fit.slope - 0.75).abs() < 1e-9, "slope {}", fit.slope);
        assert!((fit.intercept - 3.0).abs() < 1e-4, "intercept {}", fit.intercept);

        // Sampling is seeded, so the fit is reproducible.
        assert_eq!(theil_sen(&ys, &xs), theil_sen(&ys, &xs));
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("Huber".parse::<RobustMethod>().unwrap(), RobustMethod::Huber);
        assert_eq!("theilsen".parse::<RobustMethod>().unwrap(), RobustMethod::TheilSen);
        assert!("lasso".parse::<RobustMethod>().is_err());
    }

    #[test]
    fn spread_over_aligned_index() {
        let a = Series::new(vec![1, 2, 3], vec![10.0, 11.0, 12.0]);
        let b = Series::new(vec![2, 3, 4], vec![5.0, 5.5, 6.0]);
        let s = spread(&a, &b, Some(2.0));
        assert_eq!(s.timestamps, vec![2, 3]);
        assert_eq!(s.values, vec![1.0, 1.0]);
        let plain = spread(&a, &b, None);
        assert_eq!(plain.values, vec![6.0, 6.5]);
    }
}
