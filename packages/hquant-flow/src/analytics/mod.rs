//! Pair analytics over timestamp-aligned price series.
//!
//! Everything here is a pure function of its inputs except [`KalmanHedge`].
//! Too little input yields `None` or an empty series, never an error.

pub mod adf;
pub mod kalman;
pub mod linalg;
pub mod regression;
pub mod rolling;
pub mod series;
pub mod special;
pub mod stats;

pub use adf::{adf_test, AdfResult, CriticalValues};
pub use kalman::{kalman_hedge_ratio, HedgeState, KalmanHedge, KalmanOutput, KalmanParams};
pub use regression::{
    ols_hedge_ratio, robust_hedge_ratio, spread, OlsFit, RobustFit, RobustMethod,
};
pub use rolling::{
    cross_correlation_matrix, rolling_correlation, rolling_zscore, zscore, CorrelationMatrix,
};
pub use series::{align, align_many, Aligned, Series};
pub use stats::{price_stats, PriceStats};
