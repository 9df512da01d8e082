// DetectionState - adaptive threshold statistics, noise floor, and AGC
//
// Holds everything the rising-edge state machine needs between samples:
// a 100-entry circular statistics window with min/max/threshold, a cached
// noise-floor estimate, the discrete gain level, and the FSM bookkeeping
// (crossing timestamp/value, tracked peak, debounce and telemetry anchors).
//
// Algorithm notes:
// - threshold = factor × (max − min) + min over the valid window entries
// - noise floor = 20th percentile of the window, recomputed every 16th
//   sample via a partial selection sort bounded to the percentile index
//   (O(N×k) instead of a full sort; cheap enough for a sampling loop)

use crate::config::DetectionConfig;

/// Entries in the circular statistics window.
pub const STATS_WINDOW_SIZE: usize = 100;

/// Noise floor recomputation cadence, in samples.
const NOISE_UPDATE_INTERVAL: u64 = 16;

/// Rising-edge state machine tag. Exactly one phase is active at any time.
///
/// Transitions: Idle → RisingEdge → Triggered → Debounce → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPhase {
    /// Monitoring for a validated threshold crossing
    Idle,
    /// Signal crossed the gates; tracking the peak
    RisingEdge,
    /// Beat emitted this sample; leaves on the next call
    Triggered,
    /// Ignoring samples for the debounce period after a beat
    Debounce,
}

/// Discrete input gain level applied upstream of sampling (MAX9814-style
/// 40/50/60 dB steps). Steps are saturating in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainLevel {
    /// Lowest sensitivity; clipping prevention
    Gain40Db,
    /// Medium sensitivity; the boot default
    Gain50Db,
    /// Highest sensitivity for quiet environments
    Gain60Db,
}

impl GainLevel {
    /// One level quieter, clamped at the bottom.
    pub fn step_down(self) -> Self {
        match self {
            GainLevel::Gain60Db => GainLevel::Gain50Db,
            GainLevel::Gain50Db | GainLevel::Gain40Db => GainLevel::Gain40Db,
        }
    }

    /// One level louder, clamped at the top.
    pub fn step_up(self) -> Self {
        match self {
            GainLevel::Gain40Db => GainLevel::Gain50Db,
            GainLevel::Gain50Db | GainLevel::Gain60Db => GainLevel::Gain60Db,
        }
    }
}

/// Mutable state for the audio detection engine.
#[derive(Debug, Clone)]
pub struct DetectionState {
    pub phase: DetectionPhase,

    // Adaptive threshold statistics
    pub threshold: u16,
    pub min_value: u16,
    pub max_value: u16,
    pub noise_floor: u16,

    // AGC
    pub gain_level: GainLevel,
    pub clipping_detected: bool,
    pub last_gain_change_us: u64,

    // Counters
    pub beat_count: u32,
    pub false_positive_count: u32,

    // Rising-edge bookkeeping
    pub last_beat_timestamp_us: Option<u64>,
    pub rising_edge_start_us: u64,
    pub rising_edge_start_value: u16,
    pub rising_edge_peak_value: u16,

    // Telemetry pacing
    pub last_telemetry_us: u64,

    window: [u16; STATS_WINDOW_SIZE],
    window_index: usize,
    window_len: usize,
    samples_seen: u64,
}

impl DetectionState {
    pub fn new() -> Self {
        Self {
            phase: DetectionPhase::Idle,
            threshold: 0,
            min_value: 0,
            max_value: 0,
            noise_floor: 0,
            gain_level: GainLevel::Gain50Db,
            clipping_detected: false,
            last_gain_change_us: 0,
            beat_count: 0,
            false_positive_count: 0,
            last_beat_timestamp_us: None,
            rising_edge_start_us: 0,
            rising_edge_start_value: 0,
            rising_edge_peak_value: 0,
            last_telemetry_us: 0,
            window: [0; STATS_WINDOW_SIZE],
            window_index: 0,
            window_len: 0,
            samples_seen: 0,
        }
    }

    /// Reset to the boot state, anchoring the telemetry and AGC timers at
    /// `now_us` so their first firing waits the full configured interval.
    /// Idempotent for a fixed `now_us`.
    pub fn init(&mut self, now_us: u64) {
        *self = Self::new();
        self.last_telemetry_us = now_us;
        self.last_gain_change_us = now_us;
    }

    /// Insert a sample into the statistics window, overwriting the oldest
    /// entry, and recompute min/max/threshold. The noise floor refreshes on
    /// its own 16-sample cadence.
    pub fn add_to_window(&mut self, value: u16, config: &DetectionConfig) {
        self.window[self.window_index] = value;
        self.window_index = (self.window_index + 1) % STATS_WINDOW_SIZE;
        if self.window_len < STATS_WINDOW_SIZE {
            self.window_len += 1;
        }
        self.samples_seen = self.samples_seen.wrapping_add(1);

        let valid = &self.window[..self.window_len];
        self.min_value = valid.iter().copied().min().unwrap_or(0);
        self.max_value = valid.iter().copied().max().unwrap_or(0);
        self.update_threshold(config);

        // First sample seeds the estimate; afterwards every 16th sample.
        if self.samples_seen % NOISE_UPDATE_INTERVAL == 1 {
            self.noise_floor = self.estimate_noise_floor();
        }
    }

    fn update_threshold(&mut self, config: &DetectionConfig) {
        if self.max_value > self.min_value {
            let range = f32::from(self.max_value - self.min_value);
            let raw = config.threshold_factor * range + f32::from(self.min_value);
            self.threshold = (raw as u16).clamp(self.min_value, self.max_value);
        } else {
            self.threshold = self.min_value;
        }
    }

    /// 20th percentile of the valid window entries.
    ///
    /// Partial selection sort: only the first k+1 positions are ordered,
    /// where k is the percentile index. For a full window that is
    /// O(100×20) comparisons versus O(100²) for a naive full sort.
    fn estimate_noise_floor(&self) -> u16 {
        if self.window_len == 0 {
            return 0;
        }
        let mut scratch = [0u16; STATS_WINDOW_SIZE];
        scratch[..self.window_len].copy_from_slice(&self.window[..self.window_len]);

        let k = self.window_len / 5;
        for i in 0..=k {
            let mut min_idx = i;
            for j in (i + 1)..self.window_len {
                if scratch[j] < scratch[min_idx] {
                    min_idx = j;
                }
            }
            scratch.swap(i, min_idx);
        }
        scratch[k]
    }

    /// True while inside the post-beat debounce window.
    pub fn in_debounce(&self, now_us: u64, config: &DetectionConfig) -> bool {
        match self.last_beat_timestamp_us {
            Some(beat_us) => now_us.saturating_sub(beat_us) < config.debounce_us,
            None => false,
        }
    }

    /// True when the telemetry interval has elapsed since boot or the last
    /// publish. Anchored to time, not sample count, so the cadence is
    /// independent of the sampling rate.
    pub fn should_publish_telemetry(&self, now_us: u64, config: &DetectionConfig) -> bool {
        now_us.saturating_sub(self.last_telemetry_us) >= config.telemetry_interval_us
    }

    /// Bidirectional, hysteretic AGC transition rule.
    ///
    /// Clipping reacts to the instantaneous sample and steps down
    /// immediately; the weak-signal path reacts to the rolling-window max
    /// and steps up only after the configured delay. The asymmetry is
    /// intentional: fast clipping response, slow statistical recovery.
    pub fn update_agc(&mut self, value: u16, now_us: u64, config: &DetectionConfig) {
        if value > config.clipping_threshold {
            self.clipping_detected = true;
            let stepped = self.gain_level.step_down();
            if stepped != self.gain_level {
                log::debug!(
                    "[AGC] clipping at {} ADC, gain {:?} -> {:?}",
                    value,
                    self.gain_level,
                    stepped
                );
                self.gain_level = stepped;
            }
            // Reset the weak-signal timer even when already at minimum gain.
            self.last_gain_change_us = now_us;
        } else if self.max_value < config.weak_signal_threshold {
            let elapsed = now_us.saturating_sub(self.last_gain_change_us);
            if elapsed >= config.agc_step_up_delay_us {
                let stepped = self.gain_level.step_up();
                if stepped != self.gain_level {
                    log::debug!(
                        "[AGC] weak signal (window max {}), gain {:?} -> {:?}",
                        self.max_value,
                        self.gain_level,
                        stepped
                    );
                    self.gain_level = stepped;
                }
                self.last_gain_change_us = now_us;
            }
        } else {
            self.clipping_detected = false;
        }
    }

    /// Number of valid entries currently in the statistics window.
    pub fn window_len(&self) -> usize {
        self.window_len
    }
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectionConfig {
        DetectionConfig::default()
    }

    #[test]
    fn test_threshold_interpolation() {
        let mut state = DetectionState::new();
        let cfg = config();
        state.add_to_window(1000, &cfg);
        state.add_to_window(2000, &cfg);
        // threshold = 0.8 × (2000 − 1000) + 1000 = 1800
        assert_eq!(state.threshold, 1800);
        assert_eq!(state.min_value, 1000);
        assert_eq!(state.max_value, 2000);
    }

    #[test]
    fn test_threshold_stays_within_min_max() {
        let mut state = DetectionState::new();
        let cfg = config();
        for i in 0..500u16 {
            state.add_to_window(1500 + (i * 7) % 900, &cfg);
            assert!(state.threshold >= state.min_value);
            assert!(state.threshold <= state.max_value);
        }
    }

    #[test]
    fn test_threshold_flat_signal() {
        let mut state = DetectionState::new();
        let cfg = config();
        for _ in 0..10 {
            state.add_to_window(2000, &cfg);
        }
        assert_eq!(state.threshold, 2000);
    }

    #[test]
    fn test_window_overwrites_oldest() {
        let mut state = DetectionState::new();
        let cfg = config();
        // Fill with a low plateau, then flood with a high one. Once the low
        // samples age out, min must rise.
        for _ in 0..STATS_WINDOW_SIZE {
            state.add_to_window(500, &cfg);
        }
        for _ in 0..STATS_WINDOW_SIZE {
            state.add_to_window(3000, &cfg);
        }
        assert_eq!(state.min_value, 3000);
        assert_eq!(state.max_value, 3000);
        assert_eq!(state.window_len(), STATS_WINDOW_SIZE);
    }

    #[test]
    fn test_noise_floor_is_20th_percentile() {
        let mut state = DetectionState::new();
        let cfg = config();
        // 100 distinct values 0..100; the 20th percentile index is 20.
        for i in 0..STATS_WINDOW_SIZE as u16 {
            state.add_to_window(i, &cfg);
        }
        // Force a refresh by crossing the next 16-sample boundary with
        // values that keep the distribution identical.
        for i in 0..NOISE_UPDATE_INTERVAL as u16 {
            state.add_to_window(i, &cfg);
        }
        assert_eq!(state.noise_floor, 20);
    }

    #[test]
    fn test_noise_floor_seeded_by_first_sample() {
        let mut state = DetectionState::new();
        let cfg = config();
        state.add_to_window(1234, &cfg);
        assert_eq!(state.noise_floor, 1234);
    }

    #[test]
    fn test_gain_step_saturation() {
        assert_eq!(GainLevel::Gain40Db.step_down(), GainLevel::Gain40Db);
        assert_eq!(GainLevel::Gain60Db.step_up(), GainLevel::Gain60Db);
        assert_eq!(GainLevel::Gain50Db.step_down(), GainLevel::Gain40Db);
        assert_eq!(GainLevel::Gain50Db.step_up(), GainLevel::Gain60Db);
    }

    #[test]
    fn test_agc_steps_down_on_clipping() {
        let mut state = DetectionState::new();
        let cfg = config();
        state.init(0);
        state.update_agc(4050, 1_000, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain40Db);
        assert!(state.clipping_detected);
        // Already at minimum: stays there, timer still resets.
        state.update_agc(4095, 2_000, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain40Db);
        assert_eq!(state.last_gain_change_us, 2_000);
    }

    #[test]
    fn test_agc_steps_up_after_weak_signal_delay() {
        let mut state = DetectionState::new();
        let cfg = config();
        state.init(0);
        // Weak signal: window max below the weak-signal threshold.
        state.add_to_window(100, &cfg);

        // Before the delay elapses: no change.
        state.update_agc(100, cfg.agc_step_up_delay_us - 1, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain50Db);

        // After the delay: one step up.
        state.update_agc(100, cfg.agc_step_up_delay_us, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain60Db);

        // A second step requires another full delay.
        state.update_agc(100, cfg.agc_step_up_delay_us + 1_000, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain60Db);
    }

    #[test]
    fn test_agc_clipping_resets_weak_signal_timer() {
        let mut state = DetectionState::new();
        let cfg = config();
        state.init(0);
        state.add_to_window(100, &cfg);

        state.update_agc(4095, 4_000_000, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain40Db);

        // 5s from boot but only 1s from the clipping event: no step up.
        state.update_agc(100, 5_000_000, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain40Db);

        // Full delay after the clipping event: step up resumes.
        state.update_agc(100, 9_000_000, &cfg);
        assert_eq!(state.gain_level, GainLevel::Gain50Db);
    }

    #[test]
    fn test_debounce_window() {
        let mut state = DetectionState::new();
        let cfg = config();
        assert!(!state.in_debounce(0, &cfg));

        state.last_beat_timestamp_us = Some(100_000);
        assert!(state.in_debounce(100_000, &cfg));
        assert!(state.in_debounce(149_999, &cfg));
        assert!(!state.in_debounce(150_000, &cfg));
    }

    #[test]
    fn test_telemetry_gate_waits_full_interval_from_boot() {
        let mut state = DetectionState::new();
        let cfg = config();
        state.init(1_000);
        assert!(!state.should_publish_telemetry(1_000, &cfg));
        assert!(!state.should_publish_telemetry(500_999, &cfg));
        assert!(state.should_publish_telemetry(501_000, &cfg));
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut state = DetectionState::new();
        let cfg = config();
        for i in 0..40u16 {
            state.add_to_window(i * 50, &cfg);
        }
        state.beat_count = 7;
        state.init(2_000);
        let snapshot = state.clone();
        state.init(2_000);

        assert_eq!(state.beat_count, 0);
        assert_eq!(state.window_len(), 0);
        assert_eq!(state.phase, snapshot.phase);
        assert_eq!(state.threshold, snapshot.threshold);
        assert_eq!(state.last_telemetry_us, snapshot.last_telemetry_us);
    }
}
