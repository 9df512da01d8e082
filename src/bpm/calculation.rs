// BpmCalculation - tempo estimation from beat tap timestamps
//
// Taps arrive as microsecond timestamps (normally straight from BeatEvent
// hand-off). Each accepted tap contributes one inter-beat interval to the
// ring buffer; BPM is 60,000,000 / mean(intervals). A coefficient-of-
// variation score gates the is_stable flag, and a run-length heuristic
// reinterprets sustained 2×/0.5× intervals as half/double tempo without
// attempting any meter analysis.
//
// Failure semantics: invalid intervals are dropped silently, fewer than
// two taps reports the 0.0 BPM sentinel, and no path returns an error.

use crate::bpm::interval_buffer::{IntervalRingBuffer, INTERVAL_CAPACITY};
use crate::config::BpmConfig;

type UpdateCallback = Box<dyn FnMut(BpmUpdateEvent)>;

/// Snapshot published when the computed (bpm, is_stable) pair changes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BpmUpdateEvent {
    pub bpm: f32,
    pub is_stable: bool,
    /// Timestamp of the tap that produced this update
    pub timestamp_us: u64,
    /// Taps represented by the interval buffer (saturates at 64)
    pub tap_count: u8,
}

/// Tempo estimation engine over a fixed-capacity interval ring.
pub struct BpmCalculation {
    config: BpmConfig,
    intervals: IntervalRingBuffer,
    last_accepted_tap_us: Option<u64>,
    current_bpm: f32,
    is_stable: bool,
    cv_percent: f32,

    // Tempo-correction run tracking. The reference interval freezes at the
    // pre-run buffer mean so a sustained 2× run is still measured against
    // the tempo it departed from, not a mean that drifts under it.
    half_run: u8,
    double_run: u8,
    anchor_interval_us: f64,

    last_published: (f32, bool),
    update_callback: Option<UpdateCallback>,
}

impl BpmCalculation {
    pub fn new() -> Self {
        Self::with_config(BpmConfig::default())
    }

    pub fn with_config(config: BpmConfig) -> Self {
        Self {
            config,
            intervals: IntervalRingBuffer::new(),
            last_accepted_tap_us: None,
            current_bpm: 0.0,
            is_stable: false,
            cv_percent: 0.0,
            half_run: 0,
            double_run: 0,
            anchor_interval_us: 0.0,
            last_published: (0.0, false),
            update_callback: None,
        }
    }

    /// Register the update subscriber, replacing any previous one.
    pub fn on_bpm_update(&mut self, callback: impl FnMut(BpmUpdateEvent) + 'static) {
        self.update_callback = Some(Box::new(callback));
    }

    pub fn has_update_callback(&self) -> bool {
        self.update_callback.is_some()
    }

    /// Feed one tap timestamp through the validity gate.
    ///
    /// The interval since the last *accepted* tap must lie in
    /// [min_interval, max_interval] (100ms-2000ms covers 30-600 BPM).
    /// Rejected taps leave the last-accepted marker untouched, so the next
    /// candidate is still measured against the last good tap. The first
    /// tap is always accepted; non-monotonic timestamps are dropped.
    pub fn add_tap(&mut self, timestamp_us: u64) {
        let last_us = match self.last_accepted_tap_us {
            None => {
                self.last_accepted_tap_us = Some(timestamp_us);
                self.recompute(timestamp_us);
                return;
            }
            Some(last_us) => last_us,
        };

        if timestamp_us <= last_us {
            return;
        }
        let interval_us = timestamp_us - last_us;
        if interval_us < self.config.min_interval_us || interval_us > self.config.max_interval_us {
            log::trace!("[BPM] rejected interval {}us", interval_us);
            return;
        }

        self.track_tempo_correction(interval_us);
        self.intervals.push(interval_us);
        self.last_accepted_tap_us = Some(timestamp_us);
        self.recompute(timestamp_us);
    }

    /// Reset all state to empty. Registered callbacks survive. Idempotent.
    pub fn clear(&mut self) {
        self.intervals.clear();
        self.last_accepted_tap_us = None;
        self.current_bpm = 0.0;
        self.is_stable = false;
        self.cv_percent = 0.0;
        self.half_run = 0;
        self.double_run = 0;
        self.anchor_interval_us = 0.0;
        self.last_published = (0.0, false);
    }

    pub fn bpm(&self) -> f32 {
        self.current_bpm
    }

    pub fn is_stable(&self) -> bool {
        self.is_stable
    }

    pub fn coefficient_of_variation(&self) -> f32 {
        self.cv_percent
    }

    /// Taps represented by the buffered intervals, saturating at the ring
    /// capacity: 65 taps report 64.
    pub fn tap_count(&self) -> u8 {
        if self.last_accepted_tap_us.is_none() {
            return 0;
        }
        (self.intervals.len() + 1).min(INTERVAL_CAPACITY) as u8
    }

    fn track_tempo_correction(&mut self, interval_us: u64) {
        let Some(mean_us) = self.intervals.mean_us() else {
            return; // First interval: nothing to compare against yet.
        };
        let reference_us = if self.half_run > 0 || self.double_run > 0 {
            self.anchor_interval_us
        } else {
            mean_us
        };
        if reference_us <= 0.0 {
            return;
        }

        let ratio = interval_us as f64 / reference_us;
        if ratio >= f64::from(self.config.half_tempo_ratio) {
            if self.half_run == 0 {
                self.anchor_interval_us = mean_us;
            }
            self.half_run = self.half_run.saturating_add(1);
            self.double_run = 0;
        } else if ratio <= f64::from(self.config.double_tempo_ratio) {
            if self.double_run == 0 {
                self.anchor_interval_us = mean_us;
            }
            self.double_run = self.double_run.saturating_add(1);
            self.half_run = 0;
        } else {
            // An isolated anomaly (a fill, a dropped beat) is absorbed.
            self.half_run = 0;
            self.double_run = 0;
        }
    }

    fn recompute(&mut self, timestamp_us: u64) {
        let run_length = self.config.tempo_run_length;

        self.current_bpm = match self.intervals.mean_us() {
            Some(mean_us) if mean_us > 0.0 => {
                if self.half_run >= run_length {
                    // Sustained ~2× intervals: the detector now sees every
                    // other beat of the tempo it was tracking.
                    (60_000_000.0 / self.anchor_interval_us / 2.0) as f32
                } else if self.double_run >= run_length {
                    (60_000_000.0 / self.anchor_interval_us * 2.0) as f32
                } else {
                    (60_000_000.0 / mean_us) as f32
                }
            }
            _ => 0.0,
        };

        // Stability needs at least 3 taps (2 buffered intervals).
        match self.intervals.mean_us() {
            Some(mean_us) if self.intervals.len() >= 2 => {
                let stddev = self.intervals.stddev_us(mean_us).unwrap_or(0.0);
                self.cv_percent = (100.0 * stddev / mean_us) as f32;
                self.is_stable = self.cv_percent < self.config.stability_cv_percent;
            }
            _ => {
                self.cv_percent = 0.0;
                self.is_stable = false;
            }
        }

        self.publish_if_changed(timestamp_us);
    }

    fn publish_if_changed(&mut self, timestamp_us: u64) {
        let pair = (self.current_bpm, self.is_stable);
        if pair == self.last_published {
            return;
        }
        self.last_published = pair;

        let event = BpmUpdateEvent {
            bpm: self.current_bpm,
            is_stable: self.is_stable,
            timestamp_us,
            tap_count: self.tap_count(),
        };
        log::debug!(
            "[BPM] update: {:.1} BPM stable {} ({} taps)",
            event.bpm,
            event.is_stable,
            event.tap_count
        );
        if let Some(callback) = self.update_callback.as_mut() {
            callback(event);
        }
    }
}

impl Default for BpmCalculation {
    fn default() -> Self {
        Self::new()
    }
}
