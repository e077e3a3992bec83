//! Ingestion, periodic resampling and alert evaluation wired together.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alert::{AlertEngine, MetricsContext};
use crate::analytics::{price_stats, rolling_zscore};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::resample::resample;
use crate::source::{TickCallback, TickSource};
use crate::store::{MarketStore, TimeRange};
use crate::tick_buffer::{BufferSnapshot, TickBuffers};
use crate::timeframe::Timeframe;
use crate::{Bar, Tick};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub ticks_received: u64,
    /// Ticks rejected as malformed or lost to a failed store write.
    pub ticks_dropped: u64,
    pub bars_written: u64,
    pub store_errors: u64,
    pub alert_cycles: u64,
    pub alerts_triggered: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(running={}, ticks={}, dropped={}, bars={}, store_errors={}, alert_cycles={}, alerts={})",
            self.running,
            self.ticks_received,
            self.ticks_dropped,
            self.bars_written,
            self.store_errors,
            self.alert_cycles,
            self.alerts_triggered
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    ticks_received: AtomicU64,
    ticks_dropped: AtomicU64,
    bars_written: AtomicU64,
    store_errors: AtomicU64,
    alert_cycles: AtomicU64,
    alerts_triggered: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Wakes sleeping workers as soon as a stop is requested.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    fn reset(&self) {
        *self.stopped.lock() = false;
    }

    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }

    /// Sleeps for `timeout` or until triggered. Returns true if triggered.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cv.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

struct Shared {
    config: PipelineConfig,
    timeframes: Vec<Timeframe>,
    buffers: TickBuffers,
    store: Arc<dyn MarketStore>,
    alerts: Option<Arc<AlertEngine>>,
    running: AtomicBool,
    signal: StopSignal,
    counters: Counters,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn on_tick(&self, tick: Tick) {
        let c = &self.counters;
        Counters::bump(&c.ticks_received, 1);
        if !tick.is_well_formed() {
            Counters::bump(&c.ticks_dropped, 1);
            debug!(symbol = %tick.symbol, price = tick.price, size = tick.size, "dropping malformed tick");
            return;
        }
        if let Err(e) = self.store.insert_tick(&tick) {
            Counters::bump(&c.store_errors, 1);
            Counters::bump(&c.ticks_dropped, 1);
            warn!(symbol = %tick.symbol, timestamp = tick.timestamp, error = %e, "failed to persist tick");
            return;
        }
        // Untracked symbols are persisted only.
        self.buffers.push(tick);
    }

    fn bars_for(snapshot: &BufferSnapshot, timeframe: &Timeframe) -> Vec<Bar> {
        let mut bars = resample(&snapshot.ticks, timeframe);
        if snapshot.is_truncated() {
            // The earliest retained interval may have lost ticks to eviction;
            // keep the bar written while it was complete.
            if let Some(oldest) = snapshot.ticks.iter().map(|t| t.timestamp).min() {
                let cutoff = timeframe.bucket_start(oldest);
                bars.retain(|b| b.timestamp > cutoff);
            }
        }
        bars
    }

    fn resample_once(&self, timeframe: &Timeframe) -> usize {
        let mut written = 0;
        for snapshot in self.buffers.snapshot_all() {
            if snapshot.ticks.is_empty() {
                continue;
            }
            let bars = Self::bars_for(&snapshot, timeframe);
            if bars.is_empty() {
                continue;
            }
            match self.store.insert_bars(timeframe, &bars) {
                Ok(n) => written += n,
                Err(e) => {
                    Counters::bump(&self.counters.store_errors, 1);
                    warn!(symbol = %snapshot.symbol, timeframe = %timeframe, error = %e, "failed to persist bars");
                }
            }
        }
        Counters::bump(&self.counters.bars_written, written as u64);
        if written > 0 {
            debug!(timeframe = %timeframe, bars = written, "resampled");
        }
        written
    }

    fn evaluate_alerts_once(&self) -> usize {
        let Some(engine) = &self.alerts else {
            return 0;
        };
        Counters::bump(&self.counters.alert_cycles, 1);
        let window = self.config.analytics.rolling_window;
        let lookback = self.config.alert_lookback_ticks;
        let mut triggered = 0;
        for symbol in &self.config.symbols {
            let ticks = match self.store.get_ticks(symbol, TimeRange::all(), Some(lookback)) {
                Ok(t) => t,
                Err(e) => {
                    Counters::bump(&self.counters.store_errors, 1);
                    warn!(symbol = %symbol, error = %e, "failed to load ticks for alerts");
                    continue;
                }
            };
            if ticks.len() < window {
                continue;
            }
            let prices: Vec<f64> = ticks.iter().map(|t| t.price).collect();
            let ctx = metrics_context(symbol, &prices, window);
            triggered += engine.evaluate(&ctx).len();
        }
        Counters::bump(&self.counters.alerts_triggered, triggered as u64);
        triggered
    }

    fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        PipelineStats {
            running: self.is_running(),
            ticks_received: load(&c.ticks_received),
            ticks_dropped: load(&c.ticks_dropped),
            bars_written: load(&c.bars_written),
            store_errors: load(&c.store_errors),
            alert_cycles: load(&c.alert_cycles),
            alerts_triggered: load(&c.alerts_triggered),
        }
    }
}

/// Metrics for one symbol: `symbol`, `price` (last), `zscore` (last rolling
/// value over `window`) and every price statistic.
pub fn metrics_context(symbol: &str, prices: &[f64], window: usize) -> MetricsContext {
    let mut ctx = MetricsContext::for_symbol(symbol);
    ctx.insert_number("price", prices.last().copied().unwrap_or(0.0));
    let z = rolling_zscore(prices, window);
    ctx.insert_number("zscore", z.last().copied().unwrap_or(0.0));
    if let Some(stats) = price_stats(prices) {
        for (name, value) in stats.fields() {
            ctx.insert_number(name, value);
        }
    }
    ctx
}

fn resample_worker(shared: Arc<Shared>, timeframe: Timeframe) {
    let interval = Duration::from_secs(timeframe.seconds());
    debug!(timeframe = %timeframe, "resample worker started");
    while shared.is_running() {
        if shared.signal.wait(interval) || !shared.is_running() {
            break;
        }
        shared.resample_once(&timeframe);
    }
    debug!(timeframe = %timeframe, "resample worker exited");
}

fn alert_worker(shared: Arc<Shared>) {
    let interval = Duration::from_millis(shared.config.alert_interval_ms);
    debug!("alert worker started");
    while shared.is_running() {
        if shared.signal.wait(interval) || !shared.is_running() {
            break;
        }
        shared.evaluate_alerts_once();
    }
    debug!("alert worker exited");
}

/// Owns the tick buffers and the background workers.
///
/// `start` spawns one resample worker per timeframe plus one alert worker and
/// starts the source; `stop` disconnects the source and joins every worker.
pub struct Pipeline {
    shared: Arc<Shared>,
    source: Mutex<Option<Box<dyn TickSource>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes `start` and `stop`.
    lifecycle: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn MarketStore>,
        alerts: Option<Arc<AlertEngine>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let timeframes = config.timeframes()?;
        let buffers = TickBuffers::new(config.symbols.iter().cloned(), config.buffer_capacity);
        info!(
            symbols = ?config.symbols,
            timeframes = ?timeframes.iter().map(Timeframe::name).collect::<Vec<_>>(),
            capacity = config.buffer_capacity,
            "Creating pipeline"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                timeframes,
                buffers,
                store,
                alerts,
                running: AtomicBool::new(false),
                signal: StopSignal::default(),
                counters: Counters::default(),
            }),
            source: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.shared.timeframes
    }

    pub fn buffers(&self) -> &TickBuffers {
        &self.shared.buffers
    }

    pub fn store(&self) -> &Arc<dyn MarketStore> {
        &self.shared.store
    }

    pub fn alerts(&self) -> Option<&Arc<AlertEngine>> {
        self.shared.alerts.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Ingestion entry point: persists the tick, then buffers it when its
    /// symbol is tracked. Malformed ticks and failed writes are counted and
    /// dropped.
    pub fn on_tick(&self, tick: Tick) {
        self.shared.on_tick(tick);
    }

    /// One resampling pass over every buffer; returns the number of bars written.
    pub fn resample_once(&self, timeframe: &Timeframe) -> usize {
        self.shared.resample_once(timeframe)
    }

    /// One alert cycle over every tracked symbol; returns the triggered count.
    pub fn evaluate_alerts_once(&self) -> usize {
        self.shared.evaluate_alerts_once()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    /// Starts the workers and the source. A second call while running is a
    /// no-op and the extra source is dropped unstarted.
    pub fn start(&self, mut source: Box<dyn TickSource>) -> Result<(), PipelineError> {
        let _lifecycle = self.lifecycle.lock();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!(source = source.name(), "Pipeline already running");
            return Ok(());
        }
        self.shared.signal.reset();

        let mut handles = Vec::with_capacity(self.shared.timeframes.len() + 1);
        let mut spawn_all = || -> Result<(), PipelineError> {
            for tf in &self.shared.timeframes {
                let name = format!("resample-{}", tf.name());
                let shared = Arc::clone(&self.shared);
                let tf = tf.clone();
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || resample_worker(shared, tf))
                    .map_err(|source| PipelineError::Spawn { name, source })?;
                handles.push(handle);
            }
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("alerts".into())
                .spawn(move || alert_worker(shared))
                .map_err(|source| PipelineError::Spawn {
                    name: "alerts".into(),
                    source,
                })?;
            handles.push(handle);
            Ok(())
        };
        let spawned = spawn_all();
        *self.workers.lock() = handles;
        if let Err(e) = spawned {
            self.shutdown_workers();
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let on_tick: TickCallback = Arc::new(move |tick: Tick| shared.on_tick(tick));
        if let Err(e) = source.start(on_tick) {
            self.shutdown_workers();
            return Err(e.into());
        }
        info!(
            source = source.name(),
            workers = self.workers.lock().len(),
            "Pipeline started"
        );
        *self.source.lock() = Some(source);
        Ok(())
    }

    fn shutdown_workers(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.signal.trigger();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(worker = %name, "worker thread panicked");
            }
        }
    }

    /// Disconnects the source and joins the workers after their current
    /// cycle. A no-op when not running.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_running() {
            warn!("Pipeline not running");
            return;
        }
        if let Some(mut source) = self.source.lock().take() {
            source.stop();
        }
        self.shutdown_workers();
        info!(stats = %self.stats(), "Pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
