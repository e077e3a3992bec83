//! Streaming tick pipeline: per-symbol ring buffers, periodic OHLCV
//! resampling, rolling pair analytics, rule-based alerts and a
//! mean-reversion backtest.

mod types;
pub use types::*;

pub mod error;
pub use error::*;

pub mod circular;
pub mod tick_buffer;
pub mod timeframe;
pub mod resample;

pub mod analytics;
pub mod alert;
pub mod backtest;

pub mod source;
pub mod store;

pub mod config;
pub mod logging;
pub mod pipeline;

pub use alert::{AlertEngine, AlertEvent, AlertRule, MetricsContext};
pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineStats};
pub use source::{ReplaySource, TickSource};
pub use store::{MarketStore, MemoryStore, SqliteStore, TimeRange};
pub use timeframe::Timeframe;
