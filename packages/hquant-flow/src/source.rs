//! Tick ingestion sources.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::Tick;

/// Receives every well-formed tick a source produces.
pub type TickCallback = Arc<dyn Fn(Tick) + Send + Sync>;

/// A producer of trade events with a start/stop lifecycle.
///
/// Sources drop malformed events before invoking the callback.
pub trait TickSource: Send {
    fn start(&mut self, on_tick: TickCallback) -> Result<(), SourceError>;

    /// Stops delivery and releases the source's resources. Idempotent.
    fn stop(&mut self);

    fn name(&self) -> &str {
        "source"
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Num {
    Text(String),
    Float(f64),
}

impl Num {
    fn value(&self) -> Option<f64> {
        match self {
            Num::Text(s) => s.trim().parse().ok(),
            Num::Float(v) => Some(*v),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "s")]
    symbol: Option<String>,
    #[serde(rename = "p")]
    price: Option<Num>,
    #[serde(rename = "q")]
    quantity: Option<Num>,
    #[serde(rename = "T")]
    trade_time: Option<i64>,
}

/// Decodes an exchange trade frame, either a combined-stream envelope
/// (`{"stream": .., "data": {..}}`) or a bare trade payload.
///
/// Returns `None` for anything that does not yield a well-formed tick. A
/// missing trade time is stamped with the current time.
pub fn decode_trade_message(text: &str) -> Option<Tick> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let payload = match root {
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => serde_json::Value::Object(map),
        },
        other => other,
    };
    let raw: RawTrade = serde_json::from_value(payload).ok()?;
    let symbol = raw.symbol?.trim().to_ascii_lowercase();
    let price = raw.price.as_ref().and_then(Num::value)?;
    let size = match &raw.quantity {
        Some(q) => q.value()?,
        None => 0.0,
    };
    let timestamp = raw
        .trade_time
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let tick = Tick::new(timestamp, symbol, price, size);
    tick.is_well_formed().then_some(tick)
}

/// Replays a recorded tick sequence on a background thread.
pub struct ReplaySource {
    ticks: Arc<Vec<Tick>>,
    pace: Option<Duration>,
    running: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self {
            ticks: Arc::new(ticks),
            pace: None,
            running: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Pause between consecutive ticks.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Ticks handed to the callback so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// True once every recorded tick has been replayed or the source stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl TickSource for ReplaySource {
    fn start(&mut self, on_tick: TickCallback) -> Result<(), SourceError> {
        if self.handle.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        self.running.store(true, Ordering::SeqCst);

        let ticks = Arc::clone(&self.ticks);
        let running = Arc::clone(&self.running);
        let delivered = Arc::clone(&self.delivered);
        let pace = self.pace;
        let handle = thread::Builder::new()
            .name("replay-source".into())
            .spawn(move || {
                for tick in ticks.iter() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if !tick.is_well_formed() {
                        debug!(symbol = %tick.symbol, price = tick.price, "dropping malformed tick");
                        continue;
                    }
                    on_tick(tick.clone());
                    delivered.fetch_add(1, Ordering::Relaxed);
                    if let Some(p) = pace {
                        thread::sleep(p);
                    }
                }
                debug!(delivered = delivered.load(Ordering::Relaxed), "replay finished");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SourceError::Start(e.to_string())
            })?;
        self.handle = Some(handle);
        info!(ticks = self.ticks.len(), "replay source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("replay thread panicked");
            }
            info!(delivered = self.delivered(), "replay source stopped");
        }
    }

    fn name(&self) -> &str {
        "replay"
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn decodes_combined_stream_frames() {
        let frame = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"43250.10","q":"0.015","T":1700000000123}}"#;
        let tick = decode_trade_message(frame).unwrap();
        assert_eq!(tick.symbol, "btcusdt");
        assert_eq!(tick.price, 43_250.10);
        assert_eq!(tick.size, 0.015);
        assert_eq!(tick.timestamp, 1_700_000_000_123);

        let bare = r#"{"s":"ETHUSDT","p":2000.5,"q":"1","T":5}"#;
        assert_eq!(decode_trade_message(bare).unwrap().price, 2000.5);
    }

    #[test]
    fn rejects_malformed_frames() {
        for bad in [
            "not json",
            r#"{"data":{"p":"1","q":"1","T":1}}"#,
            r#"{"data":{"s":"BTCUSDT","p":"0","q":"1","T":1}}"#,
            r#"{"data":{"s":"BTCUSDT","p":"-3","q":"1","T":1}}"#,
            r#"{"data":{"s":"BTCUSDT","p":"abc","q":"1","T":1}}"#,
            r#"{"data":{"s":"","p":"1","q":"1","T":1}}"#,
        ] {
            assert!(decode_trade_message(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn replay_delivers_well_formed_ticks_in_order() {
        let ticks = vec![
            Tick::new(1, "a", 1.0, 1.0),
            Tick::new(2, "a", -1.0, 1.0),
            Tick::new(3, "b", 2.0, 1.0),
        ];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut src = ReplaySource::new(ticks);
        src.start(Arc::new(move |t: Tick| sink.lock().push(t.timestamp)))
            .unwrap();
        assert!(matches!(
            src.start(Arc::new(|_: Tick| {})),
            Err(SourceError::AlreadyStarted)
        ));
        while !src.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        src.stop();
        assert_eq!(*seen.lock(), vec![1, 3]);
        assert_eq!(src.delivered(), 2);
        src.stop();
    }
}
