//! Pipeline configuration, loaded from JSON and validated once at startup.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::alert::{AlertEngine, DEFAULT_HISTORY_CAPACITY};
use crate::analytics::KalmanParams;
use crate::backtest::BacktestParams;
use crate::error::ConfigError;
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Rolling z-score and correlation window, in observations.
    pub rolling_window: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            rolling_window: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    /// Timeframe name to seconds, e.g. `"5m": 300`.
    pub timeframes: BTreeMap<String, u64>,
    pub alert_interval_ms: u64,
    /// Most recent ticks per symbol fed into each alert cycle.
    pub alert_lookback_ticks: usize,
    pub buffer_capacity: usize,
    /// Applied by [`PipelineConfig::alert_engine`].
    pub alert_history_capacity: usize,
    pub log_level: String,
    pub log_json: bool,
    pub analytics: AnalyticsConfig,
    /// Not read by the pipeline; for callers running the Kalman hedge ratio.
    pub kalman: KalmanParams,
    /// Not read by the pipeline; for callers running the backtest.
    pub backtest: BacktestParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["btcusdt".into(), "ethusdt".into(), "bnbusdt".into()],
            timeframes: BTreeMap::from([
                ("1s".to_string(), 1),
                ("1m".to_string(), 60),
                ("5m".to_string(), 300),
            ]),
            alert_interval_ms: 500,
            alert_lookback_ticks: 1_000,
            buffer_capacity: 10_000,
            alert_history_capacity: DEFAULT_HISTORY_CAPACITY,
            log_level: "info".into(),
            log_json: false,
            analytics: AnalyticsConfig::default(),
            kalman: KalmanParams::default(),
            backtest: BacktestParams::default(),
        }
    }
}

impl PipelineConfig {
    /// An empty alert engine keeping `alert_history_capacity` events.
    pub fn alert_engine(&self) -> AlertEngine {
        AlertEngine::new(self.alert_history_capacity)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Timeframes ordered by length, each checked against its name.
    pub fn timeframes(&self) -> Result<Vec<Timeframe>, ConfigError> {
        let mut out = self
            .timeframes
            .iter()
            .map(|(name, secs)| Timeframe::new(name.as_str(), *secs))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by_key(Timeframe::seconds);
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.symbols.is_empty() {
            return invalid("at least one symbol must be tracked".into());
        }
        if let Some(bad) = self.symbols.iter().find(|s| s.trim().is_empty()) {
            return invalid(format!("empty symbol name {bad:?}"));
        }
        if self.timeframes.is_empty() {
            return invalid("at least one timeframe is required".into());
        }
        self.timeframes()?;

        if self.buffer_capacity == 0 {
            return invalid("buffer_capacity must be positive".into());
        }
        if self.alert_interval_ms == 0 {
            return invalid("alert_interval_ms must be positive".into());
        }
        if self.alert_history_capacity == 0 {
            return invalid("alert_history_capacity must be positive".into());
        }
        let window = self.analytics.rolling_window;
        if window < 2 {
            return invalid(format!("rolling_window must be at least 2, got {window}"));
        }
        if self.alert_lookback_ticks < window {
            return invalid(format!(
                "alert_lookback_ticks ({}) is smaller than rolling_window ({window})",
                self.alert_lookback_ticks
            ));
        }

        let k = &self.kalman;
        if !k.initial_beta.is_finite() {
            return invalid("kalman.initial_beta must be finite".into());
        }
        if !(k.process_variance.is_finite() && k.process_variance >= 0.0) {
            return invalid("kalman.process_variance must be non-negative".into());
        }
        if !(k.measurement_variance.is_finite() && k.measurement_variance > 0.0) {
            return invalid("kalman.measurement_variance must be positive".into());
        }

        let b = &self.backtest;
        if !(b.entry_threshold.is_finite() && b.exit_threshold.is_finite()) {
            return invalid("backtest thresholds must be finite".into());
        }
        if !(b.unit_size.is_finite() && b.unit_size > 0.0) {
            return invalid("backtest.unit_size must be positive".into());
        }
        if !b.initial_equity.is_finite() {
            return invalid("backtest.initial_equity must be finite".into());
        }
        Ok(())
    }
}
