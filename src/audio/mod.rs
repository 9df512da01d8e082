// Acoustic beat detection: adaptive threshold, AGC, and the sample FSM

mod detection;
mod events;
mod sample_buffer;
mod state;

pub use detection::AudioDetection;
pub use events::{AudioTelemetry, BeatEvent};
pub use sample_buffer::{SampleWindow, SampleWindowBuffer, WINDOW_CAPACITY};
pub use state::{DetectionPhase, DetectionState, GainLevel, STATS_WINDOW_SIZE};
