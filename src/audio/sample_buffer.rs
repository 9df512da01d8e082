// SampleWindowBuffer - dual ping-pong buffer for raw ADC samples
//
// One 32-entry window is always the write target; the other holds the last
// completed window for processing. The producer never blocks: when the
// write window fills, the caller swaps roles and keeps sampling while the
// completed window stays stable until the next swap.

/// Samples per window. Two windows are kept for ping-pong operation.
pub const WINDOW_CAPACITY: usize = 32;

/// A single fixed-size sample window with timestamp metadata.
#[derive(Debug, Clone, Copy)]
pub struct SampleWindow {
    samples: [u16; WINDOW_CAPACITY],
    write_index: usize,
    start_timestamp_us: u64,
    end_timestamp_us: u64,
}

impl SampleWindow {
    fn new() -> Self {
        Self {
            samples: [0; WINDOW_CAPACITY],
            write_index: 0,
            start_timestamp_us: 0,
            end_timestamp_us: 0,
        }
    }

    fn reset(&mut self) {
        self.write_index = 0;
    }

    /// Append a sample. Returns true exactly when the window becomes full.
    fn push(&mut self, value: u16, timestamp_us: u64) -> bool {
        if self.write_index == 0 {
            self.start_timestamp_us = timestamp_us;
        }
        self.samples[self.write_index] = value;
        self.write_index += 1;

        if self.write_index >= WINDOW_CAPACITY {
            self.end_timestamp_us = timestamp_us;
            self.write_index = 0;
            return true;
        }
        false
    }

    /// Minimum value over the full window. Linear scan, O(32).
    pub fn find_min(&self) -> u16 {
        self.samples.iter().copied().min().unwrap_or(0)
    }

    /// Maximum value over the full window. Linear scan, O(32).
    pub fn find_max(&self) -> u16 {
        self.samples.iter().copied().max().unwrap_or(0)
    }

    pub fn samples(&self) -> &[u16; WINDOW_CAPACITY] {
        &self.samples
    }

    /// Timestamp of the first sample in the window.
    pub fn start_timestamp_us(&self) -> u64 {
        self.start_timestamp_us
    }

    /// Timestamp of the last sample in the window.
    pub fn end_timestamp_us(&self) -> u64 {
        self.end_timestamp_us
    }
}

/// Dual-window manager. Exactly one window is the write target at any time;
/// the other is the last completed, immutable read window.
#[derive(Debug, Clone, Copy)]
pub struct SampleWindowBuffer {
    windows: [SampleWindow; 2],
    write_index: usize,
}

impl SampleWindowBuffer {
    pub fn new() -> Self {
        Self {
            windows: [SampleWindow::new(), SampleWindow::new()],
            write_index: 0,
        }
    }

    /// Reset both windows to empty. Idempotent.
    pub fn init(&mut self) {
        self.windows = [SampleWindow::new(), SampleWindow::new()];
        self.write_index = 0;
    }

    /// Append a sample to the write window.
    ///
    /// Returns true exactly when the write window has just filled; the
    /// caller is expected to call [`swap`](Self::swap) before the next
    /// sample arrives.
    pub fn add_sample(&mut self, value: u16, timestamp_us: u64) -> bool {
        self.windows[self.write_index].push(value, timestamp_us)
    }

    /// Flip write/read roles and reset the new write window. The previous
    /// write window becomes the read window and is left untouched until the
    /// next swap.
    pub fn swap(&mut self) {
        self.write_index = 1 - self.write_index;
        self.windows[self.write_index].reset();
    }

    /// The last completed window (stable between swaps).
    pub fn read_window(&self) -> &SampleWindow {
        &self.windows[1 - self.write_index]
    }

    /// Index of the window currently being written (0 or 1); diagnostics.
    pub fn write_window_index(&self) -> usize {
        self.write_index
    }
}

impl Default for SampleWindowBuffer {
    fn default() -> Self {
        Self::new()
    }
}
