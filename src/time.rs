//! Wall-clock timestamps with microsecond resolution.
//!
//! Deadlines are kept as `(seconds, microseconds)` pairs so that the drain
//! loop can compare and subtract them without floating-point drift. The
//! clock is wall time; monotonicity across clock adjustments is an
//! acknowledged limitation of the timeout machinery.

use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: i64 = 1_000_000;

/// A point in wall-clock time, split into whole seconds and microseconds.
///
/// Always normalised: `0 <= usec < 1_000_000`. Ordering follows from the
/// normalised field order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Timestamp {
    sec: i64,
    usec: i64,
}

impl Timestamp {
    /// Current wall-clock time.
    pub(crate) fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self::normalized(elapsed.as_secs() as i64, i64::from(elapsed.subsec_micros())),
            Err(_) => Self::default(),
        }
    }

    /// Builds a timestamp from possibly out-of-range parts, carrying whole
    /// seconds in either direction. A microsecond count of exactly 10^6
    /// carries as well.
    fn normalized(sec: i64, usec: i64) -> Self {
        Self {
            sec: sec + usec.div_euclid(MICROS_PER_SEC),
            usec: usec.rem_euclid(MICROS_PER_SEC),
        }
    }

    /// Interprets a duration in seconds as a timestamp offset. Negative
    /// inputs normalise to offsets in the past.
    pub(crate) fn from_secs_f64(seconds: f64) -> Self {
        let sec = seconds.trunc() as i64;
        let usec = ((seconds - seconds.trunc()) * 1e6) as i64;
        Self::normalized(sec, usec)
    }

    pub(crate) fn as_secs_f64(self) -> f64 {
        self.sec as f64 + self.usec as f64 * 1e-6
    }

    /// Rounds up to whole milliseconds. Only meaningful for non-negative
    /// spans.
    pub(crate) fn as_millis_ceil(self) -> i64 {
        self.sec.saturating_mul(1_000) + (self.usec + 999) / 1_000
    }
}

impl Add for Timestamp {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::normalized(self.sec + other.sec, self.usec + other.usec)
    }
}

impl Sub for Timestamp {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::normalized(self.sec - other.sec, self.usec - other.usec)
    }
}
