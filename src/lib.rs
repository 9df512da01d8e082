// Clap Tempo Core - adaptive beat detection and BPM estimation
// Single-threaded sample pipeline driven by an injected monotonic clock

// Module declarations
pub mod audio;
pub mod bpm;
pub mod config;
pub mod timing;

// Re-exports for convenience
pub use audio::{AudioDetection, AudioTelemetry, BeatEvent, DetectionPhase, GainLevel};
pub use bpm::{BpmCalculation, BpmUpdateEvent};
pub use config::{AppConfig, BpmConfig, DetectionConfig};
pub use timing::{Clock, ManualClock, MonotonicClock};
