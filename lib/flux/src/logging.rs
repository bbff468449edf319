//! Process-wide logger construction, driven by the `NEXT_LOG_LEVEL` environment variable
//! (0=none .. 5=spam), mirroring the config/env split used for every other `NEXT_*` override.

use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

pub const LOG_LEVEL_NONE: i32 = 0;
pub const LOG_LEVEL_ERROR: i32 = 1;
pub const LOG_LEVEL_WARN: i32 = 2;
pub const LOG_LEVEL_INFO: i32 = 3;
pub const LOG_LEVEL_DEBUG: i32 = 4;
pub const LOG_LEVEL_SPAM: i32 = 5;

/// Reads `NEXT_LOG_LEVEL` from the environment, defaulting to `info` when unset or unparsable.
pub fn level_from_env() -> i32 {
    std::env::var("NEXT_LOG_LEVEL")
        .ok()
        .and_then(|raw| raw.parse::<i32>().ok())
        .unwrap_or(LOG_LEVEL_INFO)
}

fn severity_for_level(level: i32) -> Severity {
    match level {
        l if l <= LOG_LEVEL_NONE => Severity::Critical,
        LOG_LEVEL_ERROR => Severity::Error,
        LOG_LEVEL_WARN => Severity::Warning,
        LOG_LEVEL_INFO => Severity::Info,
        LOG_LEVEL_DEBUG => Severity::Debug,
        _ => Severity::Trace,
    }
}

/// Builds the root logger for a process, honoring `NEXT_LOG_LEVEL`. Endpoints derive child
/// loggers from this root via `.new(o!(...))`.
pub fn root_logger() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity_for_level(level_from_env()));
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to build root logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_defaults_to_info() {
        std::env::remove_var("NEXT_LOG_LEVEL");
        assert_eq!(level_from_env(), LOG_LEVEL_INFO);
    }

    #[test]
    fn severity_maps_monotonically() {
        assert!(matches!(severity_for_level(LOG_LEVEL_NONE), Severity::Critical));
        assert!(matches!(severity_for_level(LOG_LEVEL_SPAM), Severity::Trace));
    }
}
