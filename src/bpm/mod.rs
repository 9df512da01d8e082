// BPM estimation: interval statistics and tempo correction

mod calculation;
mod interval_buffer;

pub use calculation::{BpmCalculation, BpmUpdateEvent};
pub use interval_buffer::{IntervalRingBuffer, INTERVAL_CAPACITY};
