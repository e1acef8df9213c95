//! Configuration for the boardlink bridge.
//!
//! Every tunable has a compile-time default. The serial device, baud rate,
//! engine path and move time can also be overridden through environment
//! variables; command-line flags (see `main.rs`) take precedence over both.

use std::path::PathBuf;
use std::time::Duration;

/// Default serial device the board controller enumerates as.
const DEFAULT_SERIAL_PORT: &str = "/dev/cu.usbmodem101";

/// Default serial baud rate.
const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default engine thinking time per move (in milliseconds).
const DEFAULT_MOVE_TIME_MS: u64 = 1000;

/// Upper bound on a single blocking serial read (in milliseconds).
const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Pause between polls of the serial line (in milliseconds).
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Maximum bytes requested from the serial line per read.
const DEFAULT_READ_CHUNK: usize = 1024;

/// Get the serial device path.
///
/// Priority:
/// 1. `BOARDLINK_SERIAL_PORT` env variable if set
/// 2. `/dev/cu.usbmodem101` as fallback
pub fn get_serial_port() -> String {
    std::env::var("BOARDLINK_SERIAL_PORT").unwrap_or_else(|_| DEFAULT_SERIAL_PORT.to_string())
}

/// Get the serial baud rate.
///
/// Priority:
/// 1. `BOARDLINK_BAUD_RATE` env variable if set (falls back to default if the
///    value cannot be parsed as a `u32`)
/// 2. `115200` as fallback
pub fn get_baud_rate() -> u32 {
    if let Ok(baud) = std::env::var("BOARDLINK_BAUD_RATE") {
        return baud.parse().unwrap_or(DEFAULT_BAUD_RATE);
    }

    DEFAULT_BAUD_RATE
}

/// Get the engine executable path.
///
/// Returns `None` when `BOARDLINK_ENGINE_PATH` is unset, in which case the
/// engine crate looks Stockfish up in its usual install locations.
pub fn get_engine_path() -> Option<PathBuf> {
    std::env::var_os("BOARDLINK_ENGINE_PATH").map(PathBuf::from)
}

/// Get the per-move thinking time in milliseconds.
///
/// Priority:
/// 1. `BOARDLINK_MOVE_TIME_MS` env variable if set (falls back to default if
///    the value cannot be parsed as a `u64`)
/// 2. `1000` as fallback
pub fn get_move_time_ms() -> u64 {
    if let Ok(ms) = std::env::var("BOARDLINK_MOVE_TIME_MS") {
        return ms.parse().unwrap_or(DEFAULT_MOVE_TIME_MS);
    }

    DEFAULT_MOVE_TIME_MS
}

/// Timing and sizing knobs for the control loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub read_chunk: usize,
    pub move_time_ms: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_chunk: DEFAULT_READ_CHUNK,
            move_time_ms: DEFAULT_MOVE_TIME_MS,
        }
    }
}
