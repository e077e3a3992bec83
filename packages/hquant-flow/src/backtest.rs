use serde::{Deserialize, Serialize};

use crate::analytics::{rolling_zscore, Series};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestParams {
    /// Enter when `|z|` exceeds this.
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    /// Spread units per trade.
    pub unit_size: f64,
    pub initial_equity: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            entry_threshold: 2.0,
            exit_threshold: 0.0,
            unit_size: 100.0,
            initial_equity: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub direction: Direction,
    pub entry_time: i64,
    pub entry_price: f64,
    pub entry_zscore: f64,
    pub exit_time: i64,
    pub exit_price: f64,
    pub exit_zscore: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Gross profit over gross loss; 0 without losing trades.
    pub profit_factor: f64,
    pub final_equity: f64,
    pub return_pct: f64,
    /// Largest peak-to-trough fall of the equity curve, in percent of the peak.
    pub max_drawdown_pct: f64,
    /// Equity after each simulated step.
    pub equity_curve: Vec<f64>,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    direction: Direction,
    time: i64,
    price: f64,
    zscore: f64,
}

/// Single-position mean-reversion strategy on a spread's z-score.
#[derive(Debug, Clone)]
pub struct MeanReversionBacktest {
    params: BacktestParams,
    equity: f64,
    open: Option<Entry>,
    trades: Vec<Trade>,
    equity_curve: Vec<f64>,
}

impl MeanReversionBacktest {
    pub fn new(params: BacktestParams) -> Self {
        Self {
            equity: params.initial_equity,
            params,
            open: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    pub fn position(&self) -> Position {
        match self.open.map(|e| e.direction) {
            None => Position::Flat,
            Some(Direction::Long) => Position::Long,
            Some(Direction::Short) => Position::Short,
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    fn pnl(&self, entry: &Entry, exit_price: f64) -> f64 {
        match entry.direction {
            Direction::Long => (exit_price - entry.price) * self.params.unit_size,
            Direction::Short => (entry.price - exit_price) * self.params.unit_size,
        }
    }

    fn close(&mut self, time: i64, price: f64, zscore: f64) {
        let Some(entry) = self.open.take() else { return };
        let pnl = self.pnl(&entry, price);
        self.equity += pnl;
        self.trades.push(Trade {
            direction: entry.direction,
            entry_time: entry.time,
            entry_price: entry.price,
            entry_zscore: entry.zscore,
            exit_time: time,
            exit_price: price,
            exit_zscore: zscore,
            pnl,
        });
    }

    /// Advances one observation and appends the resulting equity.
    ///
    /// Entering and exiting never happen on the same step. A `NaN` z-score
    /// leaves the position unchanged.
    pub fn step(&mut self, time: i64, price: f64, z: f64) {
        let entry = self.params.entry_threshold;
        let exit = self.params.exit_threshold;
        match self.position() {
            Position::Flat => {
                let direction = if z < -entry {
                    Some(Direction::Long)
                } else if z > entry {
                    Some(Direction::Short)
                } else {
                    None
                };
                if let Some(direction) = direction {
                    self.open = Some(Entry {
                        direction,
                        time,
                        price,
                        zscore: z,
                    });
                }
            }
            Position::Long if z >= exit => self.close(time, price, z),
            Position::Short if z <= -exit => self.close(time, price, z),
            Position::Long | Position::Short => {}
        }
        self.equity_curve.push(self.equity);
    }

    /// Closes any open position at the given last observation, folding the
    /// result into the last equity point, and reports.
    pub fn finish(mut self, last: Option<(i64, f64, f64)>) -> BacktestReport {
        if let (Some((time, price, z)), true) = (last, self.open.is_some()) {
            self.close(time, price, z);
            if let Some(point) = self.equity_curve.last_mut() {
                *point = self.equity;
            }
        }
        self.report()
    }

    fn report(self) -> BacktestReport {
        let pnls: Vec<f64> = self.trades.iter().map(|t| t.pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
        let avg = |xs: &[f64]| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        };
        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum();
        let total = pnls.len();
        let initial = self.params.initial_equity;

        BacktestReport {
            total_trades: total,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: if total > 0 {
                wins.len() as f64 / total as f64
            } else {
                0.0
            },
            total_pnl: pnls.iter().sum(),
            avg_pnl: avg(&pnls),
            avg_win: avg(&wins),
            avg_loss: avg(&losses),
            profit_factor: if gross_loss != 0.0 {
                (gross_win / gross_loss).abs()
            } else {
                0.0
            },
            final_equity: self.equity,
            return_pct: if initial != 0.0 {
                (self.equity - initial) / initial * 100.0
            } else {
                0.0
            },
            max_drawdown_pct: max_drawdown_pct(&self.equity_curve),
            equity_curve: self.equity_curve,
            trades: self.trades,
        }
    }

    /// Replays `prices` from index `start` against precomputed `zscores`,
    /// force-closing at the last price.
    pub fn simulate(params: BacktestParams, prices: &Series, zscores: &[f64], start: usize) -> BacktestReport {
        let mut bt = Self::new(params);
        let n = prices.len().min(zscores.len());
        for i in start..n {
            bt.step(prices.timestamps[i], prices.values[i], zscores[i]);
        }
        let last = n
            .checked_sub(1)
            .filter(|&i| i >= start)
            .map(|i| (prices.timestamps[i], prices.values[i], zscores[i]));
        bt.finish(last)
    }

    /// Runs the strategy over `spread` with a rolling z-score of `window`.
    /// Trading starts at index `window`; `None` when the spread is shorter.
    pub fn run(params: BacktestParams, spread: &Series, window: usize) -> Option<BacktestReport> {
        if window == 0 || spread.len() < window {
            return None;
        }
        let z = rolling_zscore(&spread.values, window);
        Some(Self::simulate(params, spread, &z, window))
    }
}

/// Peak-to-trough drawdown in percent of the running peak.
pub fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0f64;
    for &e in equity_curve {
        peak = peak.max(e);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - e) / peak * 100.0);
        }
    }
    max_dd
}
