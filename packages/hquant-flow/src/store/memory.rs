use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::{keep_last, MarketStore, TimeRange};
use crate::error::StoreError;
use crate::timeframe::Timeframe;
use crate::{Bar, Tick};

/// In-process store. Ticks keep insertion order per symbol; bars are keyed
/// by interval start per `(timeframe, symbol)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ticks: RwLock<HashMap<String, Vec<Tick>>>,
    bars: RwLock<HashMap<(String, String), BTreeMap<i64, Bar>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.read().values().map(Vec::len).sum()
    }

    pub fn bar_count(&self, timeframe: &Timeframe) -> usize {
        self.bars
            .read()
            .iter()
            .filter(|((tf, _), _)| tf == timeframe.name())
            .map(|(_, bars)| bars.len())
            .sum()
    }
}

impl MarketStore for MemoryStore {
    fn insert_tick(&self, tick: &Tick) -> Result<(), StoreError> {
        self.ticks
            .write()
            .entry(tick.symbol.clone())
            .or_default()
            .push(tick.clone());
        Ok(())
    }

    fn insert_bars(&self, timeframe: &Timeframe, bars: &[Bar]) -> Result<usize, StoreError> {
        let mut map = self.bars.write();
        for bar in bars {
            map.entry((timeframe.name().to_string(), bar.symbol.clone()))
                .or_default()
                .insert(bar.timestamp, bar.clone());
        }
        Ok(bars.len())
    }

    fn get_ticks(
        &self,
        symbol: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Tick>, StoreError> {
        let mut rows: Vec<Tick> = match self.ticks.read().get(symbol) {
            Some(ticks) => ticks
                .iter()
                .filter(|t| range.contains(t.timestamp))
                .cloned()
                .collect(),
            None => return Ok(Vec::new()),
        };
        // Stable, so equal timestamps stay in insertion order.
        rows.sort_by_key(|t| t.timestamp);
        Ok(keep_last(rows, limit))
    }

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Bar>, StoreError> {
        let map = self.bars.read();
        let Some(bars) = map.get(&(timeframe.name().to_string(), symbol.to_string())) else {
            return Ok(Vec::new());
        };
        let rows = bars
            .values()
            .filter(|b| range.contains(b.timestamp))
            .cloned()
            .collect();
        Ok(keep_last(rows, limit))
    }

    fn latest_price(&self, symbol: &str) -> Result<Option<f64>, StoreError> {
        let map = self.ticks.read();
        let latest = map.get(symbol).and_then(|ticks| {
            ticks
                .iter()
                .fold(None::<&Tick>, |best, t| match best {
                    Some(b) if b.timestamp > t.timestamp => Some(b),
                    _ => Some(t),
                })
        });
        Ok(latest.map(|t| t.price))
    }

    fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut out: Vec<String> = self
            .ticks
            .read()
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn data_range(&self, symbol: &str) -> Result<Option<(i64, i64)>, StoreError> {
        let map = self.ticks.read();
        let Some(ticks) = map.get(symbol) else {
            return Ok(None);
        };
        let min = ticks.iter().map(|t| t.timestamp).min();
        let max = ticks.iter().map(|t| t.timestamp).max();
        Ok(min.zip(max))
    }
}
