use serde::{Deserialize, Serialize};

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Milliseconds since epoch. Not guaranteed to be monotonic per symbol.
    pub timestamp: i64,
    pub symbol: String,
    pub price: f64,
    pub size: f64,
}

impl Tick {
    pub fn new(timestamp: i64, symbol: impl Into<String>, price: f64, size: f64) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            price,
            size,
        }
    }

    /// `price > 0`, `size >= 0`, both finite, symbol non-empty.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        !self.symbol.is_empty()
            && self.price.is_finite()
            && self.price > 0.0
            && self.size.is_finite()
            && self.size >= 0.0
    }
}

/// OHLCV aggregate keyed by `(symbol, timeframe, timestamp)`.
///
/// `timestamp` is the interval start in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: i64,
        symbol: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        trade_count: u64,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            open,
            high,
            low,
            close,
            volume,
            trade_count,
        }
    }

    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}
