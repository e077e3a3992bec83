use std::collections::BTreeMap;

use crate::timeframe::Timeframe;
use crate::{Bar, Tick};

#[derive(Debug, Clone, Copy)]
struct Candle {
    open: f64,
    open_ts: i64,
    high: f64,
    low: f64,
    close: f64,
    close_ts: i64,
    volume: f64,
    trade_count: u64,
}

impl Candle {
    fn new(tick: &Tick) -> Self {
        Self {
            open: tick.price,
            open_ts: tick.timestamp,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            close_ts: tick.timestamp,
            volume: tick.size,
            trade_count: 1,
        }
    }

    fn merge(&mut self, tick: &Tick) {
        // Earlier timestamp takes the open; equal timestamps keep the first seen.
        if tick.timestamp < self.open_ts {
            self.open = tick.price;
            self.open_ts = tick.timestamp;
        }
        // Later or equal timestamp takes the close, so ties resolve to the last seen.
        if tick.timestamp >= self.close_ts {
            self.close = tick.price;
            self.close_ts = tick.timestamp;
        }
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.volume += tick.size;
        self.trade_count += 1;
    }

    fn into_bar(self, start: i64, symbol: &str) -> Bar {
        Bar::new(
            start,
            symbol,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.trade_count,
        )
    }
}

/// Aggregates ticks into OHLCV bars for one timeframe.
///
/// Ticks are grouped by symbol and floored to their interval start. Input
/// order is the buffer insertion order and is only used to break timestamp
/// ties: among equal timestamps the first tick opens and the last one closes.
/// Intervals without ticks produce no bar.
///
/// Output is ordered by symbol, then interval start.
pub fn resample(ticks: &[Tick], timeframe: &Timeframe) -> Vec<Bar> {
    let mut groups: BTreeMap<&str, BTreeMap<i64, Candle>> = BTreeMap::new();
    for tick in ticks {
        let start = timeframe.bucket_start(tick.timestamp);
        groups
            .entry(tick.symbol.as_str())
            .or_default()
            .entry(start)
            .and_modify(|c| c.merge(tick))
            .or_insert_with(|| Candle::new(tick));
    }

    let mut out = Vec::new();
    for (symbol, candles) in groups {
        out.extend(candles.into_iter().map(|(start, c)| c.into_bar(start, symbol)));
    }
    out
}
