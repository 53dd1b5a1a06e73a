// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Console logging backend for the `log` facade.
//!
//! The library logs through `log::` macros with a `[module]` prefix in the
//! message text; the binary installs this backend once at startup. The
//! verbosity can be changed at runtime (reload re-applies the configured
//! level via [`apply_level`]).

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "{}.{:03} {:5} {}",
            ts.as_secs(),
            ts.subsec_millis(),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the console backend and set the initial level filter.
///
/// May only be called once per process; subsequent level changes go through
/// [`apply_level`].
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Change the global level filter.
pub fn apply_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Parse a configured verbosity value.
///
/// Accepts the usual level names plus syslog-style digits (`0`-`7`, where
/// 0-3 map to error, 4 to warn, 5-6 to info and 7 to debug).
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => Some(LevelFilter::Off),
        "error" | "err" | "0" | "1" | "2" | "3" => Some(LevelFilter::Error),
        "warn" | "warning" | "4" => Some(LevelFilter::Warn),
        "info" | "5" | "6" => Some(LevelFilter::Info),
        "debug" | "7" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}
