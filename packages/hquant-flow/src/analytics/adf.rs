//! Augmented Dickey-Fuller unit-root test, constant-only regression with
//! AIC lag selection and MacKinnon (2010) critical values and p-values.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::linalg::{lstsq, LstsqFit};
use super::special::normal_cdf;

/// Minimum number of finite observations for the test.
pub const ADF_MIN_OBS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    pub one_pct: f64,
    pub five_pct: f64,
    pub ten_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub critical_values: CriticalValues,
    /// Number of lagged differences in the selected regression.
    pub used_lag: usize,
    /// Observations in the selected regression.
    pub n_obs: usize,
    /// `p_value < 0.05`.
    pub is_stationary: bool,
}

// Response-surface coefficients, one regressor, constant term.
const CRIT_1: [f64; 4] = [-3.43035, -6.5393, -16.786, -79.433];
const CRIT_5: [f64; 4] = [-2.86154, -2.8903, -4.234, -40.040];
const CRIT_10: [f64; 4] = [-2.56677, -1.5384, -2.809, 0.0];

const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

fn poly(coef: &[f64], x: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Critical values at sample size `nobs`.
pub fn critical_values(nobs: usize) -> CriticalValues {
    let inv = 1.0 / nobs as f64;
    CriticalValues {
        one_pct: poly(&CRIT_1, inv),
        five_pct: poly(&CRIT_5, inv),
        ten_pct: poly(&CRIT_10, inv),
    }
}

/// Approximate asymptotic p-value of an ADF statistic.
pub fn mackinnon_p(stat: f64) -> f64 {
    if stat > TAU_MAX {
        return 1.0;
    }
    if stat < TAU_MIN {
        return 0.0;
    }
    let coef: &[f64] = if stat <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };
    normal_cdf(poly(coef, stat))
}

/// Design for `lags` lagged differences using the trailing `nobs` rows:
/// `[1, x_{t-1}, dx_{t-1}, .., dx_{t-lags}]` against `dx_t`.
fn design(x: &[f64], dx: &[f64], lags: usize, nobs: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let first = dx.len() - nobs;
    let mut rows = Vec::with_capacity(nobs);
    let mut target = Vec::with_capacity(nobs);
    for t in first..dx.len() {
        let mut row = Vec::with_capacity(lags + 2);
        row.push(1.0);
        // dx[t] = x[t + 1] - x[t], so the level lag is x[t].
        row.push(x[t]);
        for l in 1..=lags {
            row.push(dx[t - l]);
        }
        rows.push(row);
        target.push(dx[t]);
    }
    (rows, target)
}

fn aic(fit: &LstsqFit, k: usize) -> f64 {
    let n = fit.nobs as f64;
    n * ((2.0 * std::f64::consts::PI).ln() + (fit.ssr / n).ln() + 1.0) + 2.0 * k as f64
}

/// Runs the test on the finite values of `series`. `None` below
/// [`ADF_MIN_OBS`] observations or for a degenerate regression.
pub fn adf_test(series: &[f64]) -> Option<AdfResult> {
    let x: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
    let n = x.len();
    if n < ADF_MIN_OBS {
        return None;
    }

    let max_lag = ((12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize).min(n / 2 - 2);
    let dx: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

    // Same sample for every candidate so the criteria are comparable.
    let common = dx.len() - max_lag;
    let mut best: Option<(f64, usize)> = None;
    for lags in 0..=max_lag {
        let (rows, y) = design(&x, &dx, lags, common);
        let Some(fit) = lstsq(&rows, &y) else { continue };
        let ic = aic(&fit, lags + 2);
        if !ic.is_finite() {
            continue;
        }
        if best.map_or(true, |(b, _)| ic < b) {
            best = Some((ic, lags));
        }
    }
    let Some((_, used_lag)) = best else {
        debug!(n, "adf: no estimable lag");
        return None;
    };

    let n_obs = dx.len() - used_lag;
    let (rows, y) = design(&x, &dx, used_lag, n_obs);
    let fit = lstsq(&rows, &y)?;
    let statistic = fit.t_value(1);
    if !statistic.is_finite() {
        debug!(n, "adf: non-finite statistic");
        return None;
    }
    let p_value = mackinnon_p(statistic);

    Some(AdfResult {
        statistic,
        p_value,
        critical_values: critical_values(n_obs),
        used_lag,
        n_obs,
        is_stationary: p_value < 0.05,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(n: usize, mut seed: u64) -> Vec<f64> {
        (0..n)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed % 10_000) as f64 / 5_000.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn too_short_is_empty() {
        assert!(adf_test(&[1.0, 2.0, 1.5, 1.7, 1.2, 1.9, 1.1, 1.3, 1.6]).is_none());
        assert!(adf_test(&[3.0; 40]).is_none());
    }

    #[test]
    fn mean_reverting_series_is_stationary() {
        let e = noise(400, 0x9e37_79b9_7f4a_7c15);
        let mut x = vec![0.0; 400];
        for t in 1..400 {
            x[t] = 0.3 * x[t - 1] + e[t];
        }
        let r = adf_test(&x).unwrap();
        assert!(r.statistic < r.critical_values.one_pct, "{r:?}");
        assert!(r.is_stationary);
        assert!(r.used_lag <= 17);
        assert_eq!(r.n_obs, 399 - r.used_lag);
    }

    #[test]
    fn exploding_series_is_not_stationary() {
        let e = noise(200, 0x2545_f491_4f6c_dd1d);
        let x: Vec<f64> = (0..200)
            .map(|t| 100.0 * 1.01f64.powi(t) + 0.5 * e[t as usize])
            .collect();
        let r = adf_test(&x).unwrap();
        assert!(r.p_value > 0.5, "{r:?}");
        assert!(!r.is_stationary);
    }

    #[test]
    fn response_surface_values() {
        let cv = critical_values(100);
        let expect = -2.86154 - 2.8903 / 100.0 - 4.234 / 1e4 - 40.040 / 1e6;
        assert!((cv.five_pct - expect).abs() < 1e-12);
        assert!(cv.one_pct < cv.five_pct && cv.five_pct < cv.ten_pct);
        // The 5% asymptotic critical value maps back to p = 0.05.
        assert!((mackinnon_p(-2.86154) - 0.05).abs() < 1e-3);
        assert_eq!(mackinnon_p(3.0), 1.0);
        assert_eq!(mackinnon_p(-20.0), 0.0);
    }
}
