//! Tick and bar persistence.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::timeframe::Timeframe;
use crate::{Bar, Tick};

/// Inclusive timestamp bounds; `None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub const fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    pub const fn between(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub const fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    #[inline]
    pub fn contains(&self, ts: i64) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Key-ordered repository of ticks and bars.
///
/// Reads return rows ascending by timestamp. With a `limit`, only the most
/// recent `limit` matching rows are returned. Bars are upserted by
/// `(timeframe, symbol, timestamp)`.
pub trait MarketStore: Send + Sync {
    fn insert_tick(&self, tick: &Tick) -> Result<(), StoreError>;

    /// Returns the number of bars written.
    fn insert_bars(&self, timeframe: &Timeframe, bars: &[Bar]) -> Result<usize, StoreError>;

    fn get_ticks(
        &self,
        symbol: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Tick>, StoreError>;

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Bar>, StoreError>;

    /// Price of the tick with the greatest timestamp.
    fn latest_price(&self, symbol: &str) -> Result<Option<f64>, StoreError>;

    /// Symbols with at least one stored tick, sorted.
    fn symbols(&self) -> Result<Vec<String>, StoreError>;

    /// Earliest and latest stored tick timestamps.
    fn data_range(&self, symbol: &str) -> Result<Option<(i64, i64)>, StoreError>;
}

/// Keeps the trailing `limit` items of an ascending sequence.
pub(crate) fn keep_last<T>(mut rows: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(n) = limit {
        if rows.len() > n {
            rows.drain(..rows.len() - n);
        }
    }
    rows
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store implementation must share.

    use super::*;

    fn tf(name: &str) -> Timeframe {
        Timeframe::parse(name).unwrap()
    }

    pub fn ticks_read_back_ascending_with_limit(store: &dyn MarketStore) {
        for (ts, price) in [(3_000, 103.0), (1_000, 101.0), (2_000, 102.0), (4_000, 104.0)] {
            store.insert_tick(&Tick::new(ts, "btcusdt", price, 1.0)).unwrap();
        }
        store.insert_tick(&Tick::new(1_500, "ethusdt", 10.0, 2.0)).unwrap();

        let all = store.get_ticks("btcusdt", TimeRange::all(), None).unwrap();
        let ts: Vec<i64> = all.iter().map(|t| t.timestamp).collect();
        assert_eq!(ts, vec![1_000, 2_000, 3_000, 4_000]);

        let last_two = store.get_ticks("btcusdt", TimeRange::all(), Some(2)).unwrap();
        let ts: Vec<i64> = last_two.iter().map(|t| t.timestamp).collect();
        assert_eq!(ts, vec![3_000, 4_000]);

        let ranged = store.get_ticks("btcusdt", TimeRange::between(2_000, 3_000), None).unwrap();
        assert_eq!(ranged.len(), 2);

        assert_eq!(store.latest_price("btcusdt").unwrap(), Some(104.0));
        assert_eq!(store.latest_price("solusdt").unwrap(), None);
        assert_eq!(store.symbols().unwrap(), vec!["btcusdt".to_string(), "ethusdt".to_string()]);
        assert_eq!(store.data_range("btcusdt").unwrap(), Some((1_000, 4_000)));
        assert_eq!(store.data_range("solusdt").unwrap(), None);
    }

    pub fn bars_upsert_idempotently(store: &dyn MarketStore) {
        let one_s = tf("1s");
        let one_m = tf("1m");
        let bars = vec![
            Bar::new(0, "btcusdt", 1.0, 2.0, 0.5, 1.5, 3.0, 4),
            Bar::new(1_000, "btcusdt", 1.5, 1.6, 1.4, 1.45, 1.0, 1),
        ];
        assert_eq!(store.insert_bars(&one_s, &bars).unwrap(), 2);
        assert_eq!(store.insert_bars(&one_s, &bars).unwrap(), 2);
        let got = store.get_bars("btcusdt", &one_s, TimeRange::all(), None).unwrap();
        assert_eq!(got, bars);

        // A later resample of the same interval replaces the earlier bar.
        let revised = Bar::new(1_000, "btcusdt", 1.5, 1.9, 1.4, 1.8, 2.0, 2);
        store.insert_bars(&one_s, std::slice::from_ref(&revised)).unwrap();
        let got = store.get_bars("btcusdt", &one_s, TimeRange::all(), None).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1], revised);

        // Timeframes are separate keyspaces.
        assert!(store.get_bars("btcusdt", &one_m, TimeRange::all(), None).unwrap().is_empty());
        let last = store.get_bars("btcusdt", &one_s, TimeRange::all(), Some(1)).unwrap();
        assert_eq!(last, vec![revised]);
    }
}
