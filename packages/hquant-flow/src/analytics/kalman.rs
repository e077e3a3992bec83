use serde::{Deserialize, Serialize};

use super::series::{align, Series};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanParams {
    pub initial_beta: f64,
    /// Process noise `q`.
    pub process_variance: f64,
    /// Measurement noise `m`.
    pub measurement_variance: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            initial_beta: 1.0,
            process_variance: 0.01,
            measurement_variance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HedgeState {
    pub beta: f64,
    pub covariance: f64,
}

/// Scalar random-walk filter on the hedge ratio of `y = beta * x`.
#[derive(Debug, Clone)]
pub struct KalmanHedge {
    params: KalmanParams,
    state: HedgeState,
}

impl KalmanHedge {
    pub fn new(params: KalmanParams) -> Self {
        Self {
            state: HedgeState {
                beta: params.initial_beta,
                covariance: 1.0,
            },
            params,
        }
    }

    pub fn state(&self) -> HedgeState {
        self.state
    }

    /// One predict/update step; returns the posterior beta.
    ///
    /// A non-positive or non-finite innovation variance skips the update and
    /// keeps only the prediction.
    pub fn update(&mut self, y: f64, x: f64) -> f64 {
        let p_pred = self.state.covariance + self.params.process_variance;
        let s = x * p_pred * x + self.params.measurement_variance;
        if !s.is_finite() || s <= 0.0 {
            self.state.covariance = p_pred;
            return self.state.beta;
        }
        let residual = y - self.state.beta * x;
        let gain = p_pred * x / s;
        self.state.beta += gain * residual;
        self.state.covariance = (1.0 - gain * x) * p_pred;
        self.state.beta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanOutput {
    pub timestamps: Vec<i64>,
    pub betas: Vec<f64>,
    /// `y - beta_t * x`.
    pub spread: Vec<f64>,
}

impl KalmanOutput {
    pub fn beta_series(&self) -> Series {
        Series::new(self.timestamps.clone(), self.betas.clone())
    }

    pub fn spread_series(&self) -> Series {
        Series::new(self.timestamps.clone(), self.spread.clone())
    }
}

/// Dynamic hedge ratio of `y` on `x`. The first aligned point carries the
/// initial beta unchanged. Needs two aligned rows.
pub fn kalman_hedge_ratio(y: &Series, x: &Series, params: &KalmanParams) -> Option<KalmanOutput> {
    let al = align(y, x);
    if al.len() < 2 {
        return None;
    }
    let mut filter = KalmanHedge::new(*params);
    let mut betas = Vec::with_capacity(al.len());
    betas.push(filter.state().beta);
    for (&yi, &xi) in al.left.iter().zip(&al.right).skip(1) {
        betas.push(filter.update(yi, xi));
    }
    let spread = al
        .left
        .iter()
        .zip(&al.right)
        .zip(&betas)
        .map(|((yi, xi), b)| yi - b * xi)
        .collect();
    Some(KalmanOutput {
        timestamps: al.timestamps,
        betas,
        spread,
    })
}
