//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs a fmt subscriber filtered by `RUST_LOG` plus `level`.
///
/// Only the first call has any effect. An already installed global
/// subscriber (from a host application or test harness) is left in place.
pub fn init_logging(level: &str, json: bool) {
    let lvl = parse_level(level);
    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive(lvl.into());
        let installed = if json {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
        };
        if installed.is_ok() {
            tracing::info!(log_level = %lvl, json, "Logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("Warning"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn init_is_repeatable() {
        init_logging("DEBUG", false);
        init_logging("INFO", true);
    }
}
