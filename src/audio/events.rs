//! Event snapshots published by the audio detection engine.
//!
//! Both types are immutable value snapshots handed to a single subscriber
//! synchronously, never queued. They derive serde so downstream publishers
//! (dashboards, message buses) can encode them without reaching into
//! engine state.

use crate::audio::state::{DetectionPhase, GainLevel};

/// Snapshot taken at the instant a rising edge's peak is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BeatEvent {
    /// Microsecond timestamp of the peak-detection sample
    pub timestamp_us: u64,
    /// Peak amplitude of the rising edge (ADC units, 0-4095)
    pub amplitude: u16,
    /// Adaptive threshold at detection time
    pub threshold: u16,
    /// Gain level at detection time
    pub gain_level: GainLevel,
    /// True when the rise time exceeded 4ms (kick-drum characteristic)
    pub kick_only: bool,
}

/// Periodic detection diagnostics, published at most every 500ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioTelemetry {
    pub timestamp_us: u64,
    /// Sample value at the time of the snapshot
    pub adc_value: u16,
    /// Minimum over the statistics window
    pub min_value: u16,
    /// Maximum over the statistics window
    pub max_value: u16,
    pub threshold: u16,
    pub noise_floor: u16,
    pub gain_level: GainLevel,
    pub phase: DetectionPhase,
    /// Beats detected since init
    pub beat_count: u32,
    /// Raw threshold crossings rejected by the margin/amplitude gates
    pub false_positive_count: u32,
}
