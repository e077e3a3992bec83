use core::fmt;

use crate::error::ConfigError;

/// Named bar interval, a whole number of seconds.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Timeframe {
    name: String,
    seconds: u64,
}

impl fmt::Debug for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeframe({}={}s)", self.name, self.seconds)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Timeframe {
    /// Builds a timeframe whose name must agree with `seconds`.
    pub fn new(name: impl Into<String>, seconds: u64) -> Result<Self, ConfigError> {
        let name = name.into();
        let parsed = parse_seconds(&name).map_err(|reason| ConfigError::InvalidTimeframe {
            name: name.clone(),
            reason: reason.to_string(),
        })?;
        if parsed != seconds {
            return Err(ConfigError::InvalidTimeframe {
                reason: format!("name implies {parsed}s but {seconds}s was configured"),
                name,
            });
        }
        Ok(Self { name, seconds })
    }

    /// Parses names like `1s`, `1m`, `5m`, `4h`, `1d`.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let seconds = parse_seconds(name).map_err(|reason| ConfigError::InvalidTimeframe {
            name: name.to_string(),
            reason: reason.to_string(),
        })?;
        Ok(Self {
            name: name.trim().to_string(),
            seconds,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    #[inline]
    pub fn as_ms(&self) -> i64 {
        self.seconds as i64 * 1_000
    }

    /// Floors a millisecond timestamp to the start of its interval.
    #[inline]
    pub fn bucket_start(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.as_ms()) * self.as_ms()
    }
}

fn parse_seconds(s: &str) -> Result<u64, &'static str> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty timeframe");
    }
    let digits_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if digits_end == 0 {
        return Err("missing number");
    }
    let n: u64 = s[..digits_end].parse().map_err(|_| "invalid number")?;
    if n == 0 {
        return Err("timeframe must be > 0");
    }
    let mult = match s[digits_end..].trim().to_ascii_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return Err("unsupported unit (use s/m/h/d)"),
    };
    n.checked_mul(mult)
        .filter(|&secs| secs <= MAX_SECONDS)
        .ok_or("timeframe too large")
}

/// Largest interval whose millisecond length fits in an `i64`.
const MAX_SECONDS: u64 = (i64::MAX / 1_000) as u64;
