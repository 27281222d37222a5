// src/core/commons.rs

use crate::constants::TICK_DURATION;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// A panicking command must never take the whole engine down with it, so a poisoned
/// lock is treated as still usable.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parses a script duration such as `5s`, `10t`, `250ms`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim().to_ascii_lowercase();
    let (number, unit) = match text.find(|c: char| c.is_ascii_alphabetic()) {
        Some(split) => text.split_at(split),
        None => (text.as_str(), "s"),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let seconds = match unit {
        "t" => value * TICK_DURATION.as_secs_f64(),
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86400.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(seconds).ok()
}

/// Converts a tick count to a wall-clock period. Non-positive counts give zero.
pub fn ticks_to_duration(ticks: i64) -> Duration {
    u32::try_from(ticks.max(0))
        .map(|t| TICK_DURATION * t)
        .unwrap_or(Duration::MAX)
}
