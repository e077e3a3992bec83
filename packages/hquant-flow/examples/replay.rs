use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hquant_flow::analytics::{adf_test, kalman_hedge_ratio, ols_hedge_ratio, robust_hedge_ratio, spread, RobustMethod, Series};
use hquant_flow::backtest::MeanReversionBacktest;
use hquant_flow::logging::init_logging;
use hquant_flow::{
    MarketStore, MemoryStore, Pipeline, PipelineConfig, ReplaySource, Tick, TimeRange,
};

// Replays a synthetic BTC/ETH pair through the live pipeline, then runs the
// pair analytics and a backtest over what was stored.
//
// Pass a JSON config path as the first argument to override the defaults.

fn synthetic_ticks(n: i64) -> Vec<Tick> {
    let start = chrono::Utc::now().timestamp_millis();
    let mut out = Vec::with_capacity(2 * n as usize);
    for i in 0..n {
        let t = i as f64;
        let eth = 2_000.0 + (t * 0.01).sin() * 20.0 + (t * 0.37).cos() * 2.0;
        let btc = 20.0 * eth + 500.0 + (t * 1.3).sin() * 30.0;
        out.push(Tick::new(start + i * 10, "btcusdt", btc, 0.01));
        out.push(Tick::new(start + i * 10, "ethusdt", eth, 0.2));
    }
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    init_logging(&config.log_level, config.log_json);

    let store: Arc<dyn MarketStore> = Arc::new(MemoryStore::new());
    let engine = Arc::new(config.alert_engine().with_callback(|rule, ctx| {
        println!(
            "ALERT {} [{}] price={:?} zscore={:?}",
            rule.name,
            ctx.symbol().unwrap_or("-"),
            ctx.number("price"),
            ctx.number("zscore")
        );
    }));
    engine.install_default_rules()?;

    let backtest_params = config.backtest;
    let window = config.analytics.rolling_window;
    let kalman = config.kalman;
    let pipeline = Pipeline::new(config, Arc::clone(&store), Some(engine))?;

    let source = ReplaySource::new(synthetic_ticks(2_000)).with_pace(Duration::from_micros(500));
    pipeline.start(Box::new(source))?;
    thread::sleep(Duration::from_secs(3));
    pipeline.stop();
    for tf in pipeline.timeframes() {
        pipeline.resample_once(tf);
    }
    println!("{}", pipeline.stats());

    let load = |s: &str| -> Result<Series, hquant_flow::StoreError> {
        Ok(Series::from_ticks(&store.get_ticks(s, TimeRange::all(), None)?))
    };
    let btc = load("btcusdt")?;
    let eth = load("ethusdt")?;

    let Some(fit) = ols_hedge_ratio(&btc, &eth) else {
        println!("not enough data for a hedge ratio");
        return Ok(());
    };
    println!(
        "ols: slope={:.4} intercept={:.2} r2={:.4} p={:.3e}",
        fit.slope, fit.intercept, fit.r_squared, fit.p_value
    );
    if let Some(robust) = robust_hedge_ratio(&btc, &eth, RobustMethod::Huber) {
        println!("huber: slope={:.4}", robust.slope);
    }

    let spr = spread(&btc, &eth, Some(fit.slope));
    if let Some(adf) = adf_test(&spr.values) {
        println!(
            "adf: stat={:.3} p={:.4} lag={} stationary={}",
            adf.statistic, adf.p_value, adf.used_lag, adf.is_stationary
        );
    }
    if let Some(kf) = kalman_hedge_ratio(&btc, &eth, &kalman) {
        println!("kalman: last beta={:.4}", kf.betas.last().copied().unwrap_or(f64::NAN));
    }
    if let Some(report) = MeanReversionBacktest::run(backtest_params, &spr, window) {
        println!(
            "backtest: trades={} win_rate={:.2} pnl={:.2} max_dd={:.3}%",
            report.total_trades, report.win_rate, report.total_pnl, report.max_drawdown_pct
        );
    }
    Ok(())
}
