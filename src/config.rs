//! Configuration for the detection and BPM engines
//!
//! Tunable thresholds and time windows live here so deployments can adjust
//! them from a JSON file without recompiling. Fixed buffer capacities
//! (32-sample windows, 100-entry stats window, 64-interval ring) are
//! compile-time constants on the owning types, not configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub bpm: BpmConfig,
}

/// Audio detection parameters (ADC units are the raw 0-4095 sample range).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Interpolation factor for the adaptive threshold:
    /// threshold = factor × (max − min) + min
    pub threshold_factor: f32,
    /// Hysteresis margin above the adaptive threshold (ADC units)
    pub threshold_margin: u16,
    /// Minimum amplitude above the noise floor for a valid beat (ADC units)
    pub min_signal_amplitude: u16,
    /// ADC level treated as clipping; steps gain down immediately
    pub clipping_threshold: u16,
    /// Rolling-window max below this level counts as a weak signal
    pub weak_signal_threshold: u16,
    /// Delay before a weak signal steps gain up (µs)
    pub agc_step_up_delay_us: u64,
    /// Cool-down after a detected beat (µs)
    pub debounce_us: u64,
    /// Minimum spacing between telemetry snapshots (µs)
    pub telemetry_interval_us: u64,
    /// Rise times strictly above this are classified kick-only (µs)
    pub kick_rise_time_us: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 0.8,
            threshold_margin: 80,
            min_signal_amplitude: 200,
            clipping_threshold: 4000,
            weak_signal_threshold: 1000,
            agc_step_up_delay_us: 5_000_000,
            debounce_us: 50_000,
            telemetry_interval_us: 500_000,
            kick_rise_time_us: 4_000,
        }
    }
}

/// BPM calculation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpmConfig {
    /// Shortest accepted inter-tap interval (µs); 100ms = 600 BPM
    pub min_interval_us: u64,
    /// Longest accepted inter-tap interval (µs); 2000ms = 30 BPM
    pub max_interval_us: u64,
    /// Coefficient-of-variation bound for a stable tempo (percent)
    pub stability_cv_percent: f32,
    /// Interval/reference ratio at or above this counts toward half tempo
    pub half_tempo_ratio: f32,
    /// Interval/reference ratio at or below this counts toward double tempo
    pub double_tempo_ratio: f32,
    /// Consecutive out-of-band intervals required to apply a correction
    pub tempo_run_length: u8,
}

impl Default for BpmConfig {
    fn default() -> Self {
        Self {
            min_interval_us: 100_000,
            max_interval_us: 2_000_000,
            stability_cv_percent: 5.0,
            half_tempo_ratio: 1.8,
            double_tempo_ratio: 0.6,
            tempo_run_length: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            bpm: BpmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults if the
    /// file is missing or malformed. Runtime tuning must never take the
    /// engines down.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}
