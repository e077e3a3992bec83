// End-to-end flow tests: exchange frames -> pipeline -> store -> analytics,
// alerts and backtest, with no network.
//
// Run with: cargo test --test pipeline_flow

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hquant_flow::analytics::{adf_test, kalman_hedge_ratio, ols_hedge_ratio, spread, KalmanParams, Series};
use hquant_flow::backtest::{BacktestParams, Direction, MeanReversionBacktest};
use hquant_flow::source::decode_trade_message;
use hquant_flow::{
    AlertEngine, AlertRule, MarketStore, MemoryStore, Pipeline, PipelineConfig, ReplaySource,
    SqliteStore, Tick, TimeRange, Timeframe,
};

// ============================================================================
// Helpers
// ============================================================================

fn trade_frame(symbol: &str, price: f64, qty: f64, ts: i64) -> String {
    format!(
        r#"{{"stream":"{lower}@trade","data":{{"e":"trade","E":{ts},"s":"{symbol}","t":1,"p":"{price}","q":"{qty}","T":{ts},"m":false}}}}"#,
        lower = symbol.to_lowercase(),
    )
}

/// Deterministic uniform noise in [-0.5, 0.5).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) - 0.5
    }
}

fn base_config() -> PipelineConfig {
    PipelineConfig {
        symbols: vec!["btcusdt".into(), "ethusdt".into()],
        ..PipelineConfig::default()
    }
}

// ============================================================================
// Ingestion and resampling
// ============================================================================

#[test]
fn exchange_frames_become_minute_bars() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(base_config(), store.clone(), None).unwrap();
    let base = 1_700_000_040_000;

    let frames = [
        trade_frame("BTCUSDT", 100.0, 1.0, base + 1_000),
        trade_frame("BTCUSDT", 105.0, 2.0, base + 2_000),
        trade_frame("ETHUSDT", 2_000.0, 0.5, base + 3_000),
        trade_frame("BTCUSDT", 0.0, 1.0, base + 4_000),
        "garbage".to_string(),
    ];
    for frame in &frames {
        if let Some(tick) = decode_trade_message(frame) {
            pipeline.on_tick(tick);
        }
    }
    assert_eq!(pipeline.stats().ticks_received, 3);

    let minute = Timeframe::parse("1m").unwrap();
    assert_eq!(pipeline.resample_once(&minute), 2);
    assert_eq!(pipeline.resample_once(&minute), 2);

    let btc = store.get_bars("btcusdt", &minute, TimeRange::all(), None).unwrap();
    assert_eq!(btc.len(), 1);
    let bar = &btc[0];
    assert_eq!(bar.timestamp, base);
    assert_eq!((bar.open, bar.high, bar.low, bar.close), (100.0, 105.0, 100.0, 105.0));
    assert_eq!((bar.volume, bar.trade_count), (3.0, 2));
    assert_eq!(bar.timestamp % minute.as_ms(), 0);

    assert_eq!(store.symbols().unwrap(), vec!["btcusdt", "ethusdt"]);
    assert_eq!(store.latest_price("btcusdt").unwrap(), Some(105.0));
}

// ============================================================================
// Analytics and backtest over stored ticks
// ============================================================================

#[test]
fn cointegrated_pair_through_analytics_and_backtest() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut noise = Lcg(7);
    let mut x = 100.0;
    for i in 0..500i64 {
        x += noise.next() * 0.4;
        let y = 2.0 * x + 5.0 + noise.next() * 2.0;
        store.insert_tick(&Tick::new(i * 1_000, "ethusdt", x, 1.0)).unwrap();
        store.insert_tick(&Tick::new(i * 1_000, "btcusdt", y, 1.0)).unwrap();
    }

    let load = |s: &str| Series::from_ticks(&store.get_ticks(s, TimeRange::all(), None).unwrap());
    let y = load("btcusdt");
    let x = load("ethusdt");
    assert_eq!(y.len(), 500);

    let fit = ols_hedge_ratio(&y, &x).unwrap();
    assert!((fit.slope - 2.0).abs() < 0.2, "slope {}", fit.slope);
    assert!(fit.p_value < 1e-6);
    assert_eq!(fit.residuals.len(), 500);

    let spr = spread(&y, &x, Some(fit.slope));
    let adf = adf_test(&spr.values).unwrap();
    assert!(adf.is_stationary, "adf p-value {}", adf.p_value);
    assert!(adf.statistic < adf.critical_values.one_pct);

    let kf = kalman_hedge_ratio(&y, &x, &KalmanParams::default()).unwrap();
    assert_eq!(kf.betas.len(), 500);
    assert_eq!(kf.betas[0], 1.0);
    let late = kf.betas[400..].iter().sum::<f64>() / 100.0;
    assert!((late - 2.05).abs() < 0.2, "late beta {late}");

    // Uniform noise alone stays inside the default entry band; dislocate the
    // spread every 100 steps so each one opens and closes a single trade.
    let quiet = MeanReversionBacktest::run(BacktestParams::default(), &spr, 100).unwrap();
    assert_eq!(quiet.total_trades, 0);
    assert_eq!(quiet.final_equity, 100_000.0);

    let mut shocked = spr.clone();
    for (i, jump) in [(150, 25.0), (250, -25.0), (350, 25.0), (450, -25.0)] {
        shocked.values[i] += jump;
    }
    let report = MeanReversionBacktest::run(BacktestParams::default(), &shocked, 100).unwrap();
    assert_eq!(report.equity_curve.len(), 400);
    assert_eq!(report.total_trades, 4);
    assert_eq!(report.trades.len(), 4);
    assert_eq!(report.winning_trades, 4);
    let entries: Vec<(i64, Direction)> = report.trades.iter().map(|t| (t.entry_time, t.direction)).collect();
    assert_eq!(
        entries,
        vec![
            (150_000, Direction::Short),
            (250_000, Direction::Long),
            (350_000, Direction::Short),
            (450_000, Direction::Long),
        ]
    );
    for t in &report.trades {
        assert!(t.entry_zscore.abs() > 2.0);
        assert!(t.exit_time > t.entry_time && t.exit_time < t.entry_time + 100_000);
    }
    assert!((report.final_equity - (100_000.0 + report.total_pnl)).abs() < 1e-6);
}

// ============================================================================
// Live workers
// ============================================================================

#[test]
fn replayed_feed_drives_workers_and_alerts() {
    let triggered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&triggered);
    let engine = Arc::new(AlertEngine::new(10).with_callback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    engine
        .add_rule(AlertRule::new("btc-live", "btc trading", "price > 0").unwrap().with_symbol("btcusdt"));
    engine
        .add_rule(AlertRule::new("never", "disabled", "price > 0").unwrap().with_enabled(false));

    let cfg = PipelineConfig {
        timeframes: [("1s".to_string(), 1)].into_iter().collect(),
        alert_interval_ms: 20,
        alert_lookback_ticks: 200,
        analytics: hquant_flow::config::AnalyticsConfig { rolling_window: 20 },
        ..base_config()
    };
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let pipeline = Pipeline::new(cfg, store.clone(), Some(Arc::clone(&engine))).unwrap();

    let start = chrono::Utc::now().timestamp_millis() - 30_000;
    let ticks: Vec<Tick> = (0..300)
        .map(|i| Tick::new(start + i * 100, "btcusdt", 100.0 + (i % 7) as f64, 0.1))
        .collect();
    pipeline.start(Box::new(ReplaySource::new(ticks))).unwrap();
    assert!(pipeline.is_running());

    let deadline = Instant::now() + Duration::from_secs(10);
    while triggered.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    pipeline.stop();
    assert!(!pipeline.is_running());

    assert!(triggered.load(Ordering::SeqCst) > 0);
    let events = engine.recent_events(100);
    assert!(events.len() <= 10);
    assert!(events.iter().all(|e| e.rule_id == "btc-live"));
    assert_eq!(engine.rule("never").unwrap().trigger_count, 0);

    let stats = pipeline.stats();
    assert_eq!(stats.ticks_received, 300);
    assert_eq!(stats.store_errors, 0);
    assert!(stats.alert_cycles > 0);
    assert_eq!(store.get_ticks("btcusdt", TimeRange::all(), None).unwrap().len(), 300);

    let second = Timeframe::parse("1s").unwrap();
    assert!(pipeline.resample_once(&second) > 0);
    let bars = store.get_bars("btcusdt", &second, TimeRange::all(), None).unwrap();
    assert_eq!(bars.iter().map(|b| b.trade_count).sum::<u64>(), 300);
}
