// IntervalRingBuffer - fixed-capacity ring of inter-beat intervals
//
// Holds the raw interval durations (µs) the BPM engine averages over.
// Statically sized, no allocation: the write pointer wraps modulo the
// capacity and the count saturates, so the 65th insert overwrites the
// oldest entry.

/// Maximum buffered intervals. At 120 BPM this is ~32 seconds of history.
pub const INTERVAL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct IntervalRingBuffer {
    intervals: [u64; INTERVAL_CAPACITY],
    write_index: usize,
    len: usize,
}

impl IntervalRingBuffer {
    pub fn new() -> Self {
        Self {
            intervals: [0; INTERVAL_CAPACITY],
            write_index: 0,
            len: 0,
        }
    }

    /// Append an interval, overwriting the oldest once full.
    pub fn push(&mut self, interval_us: u64) {
        self.intervals[self.write_index] = interval_us;
        self.write_index = (self.write_index + 1) % INTERVAL_CAPACITY;
        if self.len < INTERVAL_CAPACITY {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all buffered intervals. Idempotent.
    pub fn clear(&mut self) {
        self.write_index = 0;
        self.len = 0;
    }

    /// Mean of the buffered intervals in µs, or None when empty.
    pub fn mean_us(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let sum: u64 = self.intervals[..self.len].iter().sum();
        Some(sum as f64 / self.len as f64)
    }

    /// Sample standard deviation (n−1 divisor) of the buffered intervals.
    /// None with fewer than two entries.
    pub fn stddev_us(&self, mean_us: f64) -> Option<f64> {
        if self.len < 2 {
            return None;
        }
        let sum_sq: f64 = self.intervals[..self.len]
            .iter()
            .map(|&interval| {
                let diff = interval as f64 - mean_us;
                diff * diff
            })
            .sum();
        Some((sum_sq / (self.len - 1) as f64).sqrt())
    }
}

impl Default for IntervalRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
