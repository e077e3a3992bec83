use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{MarketStore, TimeRange};
use crate::error::StoreError;
use crate::timeframe::Timeframe;
use crate::{Bar, Tick};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ticks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        price REAL NOT NULL,
        size REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_ticks_symbol_ts ON ticks(symbol, timestamp);

    CREATE TABLE IF NOT EXISTS bars (
        timeframe TEXT NOT NULL,
        symbol TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume REAL NOT NULL,
        trade_count INTEGER NOT NULL,
        UNIQUE(timeframe, symbol, timestamp)
    );
";

/// SQLite-backed store behind a single serialized connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "sqlite store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
}

impl MarketStore for SqliteStore {
    fn insert_tick(&self, tick: &Tick) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO ticks (symbol, timestamp, price, size) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![tick.symbol, tick.timestamp, tick.price, tick.size])?;
        Ok(())
    }

    fn insert_bars(&self, timeframe: &Timeframe, bars: &[Bar]) -> Result<usize, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO bars
                    (timeframe, symbol, timestamp, open, high, low, close, volume, trade_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for bar in bars {
                stmt.execute(params![
                    timeframe.name(),
                    bar.symbol,
                    bar.timestamp,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    i64::try_from(bar.trade_count).unwrap_or(i64::MAX),
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    fn get_ticks(
        &self,
        symbol: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Tick>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, symbol, price, size FROM ticks
             WHERE symbol = ?1
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR timestamp <= ?3)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?4",
        )?;
        let mut rows = stmt
            .query_map(
                params![symbol, range.start, range.end, sql_limit(limit)],
                |row| {
                    Ok(Tick {
                        timestamp: row.get(0)?,
                        symbol: row.get(1)?,
                        price: row.get(2)?,
                        size: row.get(3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    fn get_bars(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        range: TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Bar>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, symbol, open, high, low, close, volume, trade_count FROM bars
             WHERE timeframe = ?1 AND symbol = ?2
               AND (?3 IS NULL OR timestamp >= ?3)
               AND (?4 IS NULL OR timestamp <= ?4)
             ORDER BY timestamp DESC
             LIMIT ?5",
        )?;
        let mut rows = stmt
            .query_map(
                params![
                    timeframe.name(),
                    symbol,
                    range.start,
                    range.end,
                    sql_limit(limit)
                ],
                |row| {
                    let trade_count: i64 = row.get(7)?;
                    Ok(Bar {
                        timestamp: row.get(0)?,
                        symbol: row.get(1)?,
                        open: row.get(2)?,
                        high: row.get(3)?,
                        low: row.get(4)?,
                        close: row.get(5)?,
                        volume: row.get(6)?,
                        trade_count: u64::try_from(trade_count).unwrap_or(0),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    fn latest_price(&self, symbol: &str) -> Result<Option<f64>, StoreError> {
        let conn = self.conn.lock();
        let price = conn
            .query_row(
                "SELECT price FROM ticks WHERE symbol = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;
        Ok(price)
    }

    fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT DISTINCT symbol FROM ticks ORDER BY symbol")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    fn data_range(&self, symbol: &str) -> Result<Option<(i64, i64)>, StoreError> {
        let conn = self.conn.lock();
        let (min, max): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM ticks WHERE symbol = ?1",
            params![symbol],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max))
    }
}
