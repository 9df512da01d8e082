// Timing provider - injected monotonic microsecond clock
//
// The detection and BPM engines never read wall-clock time directly. They
// receive a Clock capability at construction, which keeps every time-gated
// behavior (debounce, telemetry cadence, AGC step-up delay, rise-time
// measurement) deterministic under test.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic microsecond time source.
///
/// Implementations must be non-decreasing. Sub-10µs jitter is recommended
/// for accurate rise-time classification; beyond that the engines make no
/// assumptions about resolution or epoch.
pub trait Clock {
    /// Current time in microseconds since an arbitrary fixed epoch.
    fn now_us(&self) -> u64;
}

/// Production clock backed by `std::time::Instant`, anchored at construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// Manually advanced clock for tests and offline (file-driven) analysis.
///
/// Cloning yields a handle to the same underlying counter, so a test can
/// hold one handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start_us: u64) -> Self {
        let clock = Self::new();
        clock.set_us(start_us);
        clock
    }

    /// Move time forward by `delta_us`.
    pub fn advance_us(&self, delta_us: u64) {
        self.now_us.set(self.now_us.get() + delta_us);
    }

    /// Jump to an absolute time. Callers are responsible for keeping the
    /// sequence non-decreasing.
    pub fn set_us(&self, timestamp_us: u64) {
        self.now_us.set(timestamp_us);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}
