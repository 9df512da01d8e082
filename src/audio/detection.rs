// AudioDetection - rising-edge beat detection engine
//
// The sole per-sample entry point is process_sample(), expected to be
// called at a steady rate from one sampling loop (≤62.5µs spacing for
// 16kHz input keeps the end-to-end latency under 20ms). Per call:
//
// 1. Append the sample to the ping-pong window buffer (swap when full)
// 2. Update the statistics window: min/max, threshold, noise floor
// 3. Run one FSM transition (Idle → RisingEdge → Triggered → Debounce)
// 4. Apply the AGC transition rule
// 5. Publish telemetry if 500ms have elapsed
//
// A beat candidate must clear three layers before the FSM leaves Idle
// (false-positive rejection):
//   Layer 1: value > threshold + margin      (hysteresis)
//   Layer 2: value > noise floor + minimum    (absolute amplitude)
//   Layer 3: rise-time classification only; it never gates the event
//
// Nothing here blocks or sleeps; debounce and telemetry pacing are
// elapsed-time comparisons against the injected clock.

use crate::audio::events::{AudioTelemetry, BeatEvent};
use crate::audio::sample_buffer::{SampleWindow, SampleWindowBuffer};
use crate::audio::state::{DetectionPhase, DetectionState, GainLevel};
use crate::config::DetectionConfig;
use crate::timing::Clock;

type BeatCallback = Box<dyn FnMut(BeatEvent)>;
type TelemetryCallback = Box<dyn FnMut(AudioTelemetry)>;

/// Adaptive-threshold beat detection engine.
///
/// Single-writer, single-reader: all methods take `&mut self` and are meant
/// to be driven from one real-time loop. Event hand-off to subscribers is
/// synchronous within the `process_sample` call stack.
pub struct AudioDetection<C: Clock> {
    clock: C,
    config: DetectionConfig,
    buffers: SampleWindowBuffer,
    state: DetectionState,
    beat_callback: Option<BeatCallback>,
    telemetry_callback: Option<TelemetryCallback>,
}

impl<C: Clock> AudioDetection<C> {
    pub fn new(clock: C) -> Self {
        Self::with_config(clock, DetectionConfig::default())
    }

    pub fn with_config(clock: C, config: DetectionConfig) -> Self {
        let mut engine = Self {
            clock,
            config,
            buffers: SampleWindowBuffer::new(),
            state: DetectionState::new(),
            beat_callback: None,
            telemetry_callback: None,
        };
        engine.init();
        engine
    }

    /// Reset all owned state to the boot configuration. Registered
    /// callbacks survive the reset. Idempotent.
    pub fn init(&mut self) {
        self.buffers.init();
        self.state.init(self.clock.now_us());
    }

    /// Register the beat subscriber, replacing any previous one.
    pub fn on_beat(&mut self, callback: impl FnMut(BeatEvent) + 'static) {
        self.beat_callback = Some(Box::new(callback));
    }

    /// Register the telemetry subscriber, replacing any previous one.
    pub fn on_telemetry(&mut self, callback: impl FnMut(AudioTelemetry) + 'static) {
        self.telemetry_callback = Some(Box::new(callback));
    }

    pub fn has_beat_callback(&self) -> bool {
        self.beat_callback.is_some()
    }

    pub fn has_telemetry_callback(&self) -> bool {
        self.telemetry_callback.is_some()
    }

    /// Process one raw amplitude sample (0-4095 range; out-of-range values
    /// are accepted as-is, the adaptive design is self-stabilizing).
    pub fn process_sample(&mut self, value: u16) {
        let now_us = self.clock.now_us();

        if self.buffers.add_sample(value, now_us) {
            self.buffers.swap();
        }
        self.state.add_to_window(value, &self.config);

        match self.state.phase {
            DetectionPhase::Idle => {
                let threshold_with_margin = self
                    .state
                    .threshold
                    .saturating_add(self.config.threshold_margin);
                let minimum_beat_level = self
                    .state
                    .noise_floor
                    .saturating_add(self.config.min_signal_amplitude);

                let crosses_threshold = value > threshold_with_margin;
                let sufficient_amplitude = value > minimum_beat_level;

                if crosses_threshold && sufficient_amplitude {
                    self.state.phase = DetectionPhase::RisingEdge;
                    self.state.rising_edge_start_us = now_us;
                    self.state.rising_edge_start_value = value;
                    self.state.rising_edge_peak_value = value;
                } else if value > self.state.threshold {
                    // Raw crossing rejected by the margin/amplitude gates.
                    self.state.false_positive_count += 1;
                }
            }
            DetectionPhase::RisingEdge => {
                if value >= self.state.rising_edge_peak_value {
                    self.state.rising_edge_peak_value = value;
                } else {
                    // Signal fell below the tracked peak: the peak was one
                    // sample ago, the beat fires now.
                    self.state.phase = DetectionPhase::Triggered;
                    let rise_time_us = now_us.saturating_sub(self.state.rising_edge_start_us);
                    self.emit_beat(now_us, rise_time_us);
                    self.state.last_beat_timestamp_us = Some(now_us);
                    self.state.beat_count += 1;
                }
            }
            DetectionPhase::Triggered => {
                self.state.phase = DetectionPhase::Debounce;
            }
            DetectionPhase::Debounce => {
                if !self.state.in_debounce(now_us, &self.config) {
                    self.state.phase = DetectionPhase::Idle;
                }
                // Otherwise discard the sample.
            }
        }

        self.state.update_agc(value, now_us, &self.config);
        self.publish_telemetry(now_us, value);
    }

    fn emit_beat(&mut self, timestamp_us: u64, rise_time_us: u64) {
        let event = BeatEvent {
            timestamp_us,
            amplitude: self.state.rising_edge_peak_value,
            threshold: self.state.threshold,
            gain_level: self.state.gain_level,
            // Strict inequality: exactly 4ms is not a kick.
            kick_only: rise_time_us > self.config.kick_rise_time_us,
        };
        log::debug!(
            "[Detect] beat at {}us amplitude {} rise {}us kick_only {}",
            event.timestamp_us,
            event.amplitude,
            rise_time_us,
            event.kick_only
        );
        if let Some(callback) = self.beat_callback.as_mut() {
            callback(event);
        }
    }

    fn publish_telemetry(&mut self, now_us: u64, adc_value: u16) {
        if self.telemetry_callback.is_none() {
            return;
        }
        if !self.state.should_publish_telemetry(now_us, &self.config) {
            return;
        }

        let snapshot = AudioTelemetry {
            timestamp_us: now_us,
            adc_value,
            min_value: self.state.min_value,
            max_value: self.state.max_value,
            threshold: self.state.threshold,
            noise_floor: self.state.noise_floor,
            gain_level: self.state.gain_level,
            phase: self.state.phase,
            beat_count: self.state.beat_count,
            false_positive_count: self.state.false_positive_count,
        };
        if let Some(callback) = self.telemetry_callback.as_mut() {
            callback(snapshot);
        }
        self.state.last_telemetry_us = now_us;
    }

    // Read-only accessors for diagnostics and tests.

    pub fn phase(&self) -> DetectionPhase {
        self.state.phase
    }

    pub fn threshold(&self) -> u16 {
        self.state.threshold
    }

    pub fn noise_floor(&self) -> u16 {
        self.state.noise_floor
    }

    pub fn gain_level(&self) -> GainLevel {
        self.state.gain_level
    }

    pub fn beat_count(&self) -> u32 {
        self.state.beat_count
    }

    pub fn false_positive_count(&self) -> u32 {
        self.state.false_positive_count
    }

    pub fn window_min(&self) -> u16 {
        self.state.min_value
    }

    pub fn window_max(&self) -> u16 {
        self.state.max_value
    }

    /// The last completed 32-sample window (stable between swaps).
    pub fn last_window(&self) -> &SampleWindow {
        self.buffers.read_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SAMPLE_PERIOD_US: u64 = 100;

    fn engine() -> (AudioDetection<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let detection = AudioDetection::new(clock.clone());
        (detection, clock)
    }

    fn feed(detection: &mut AudioDetection<ManualClock>, clock: &ManualClock, value: u16) {
        clock.advance_us(SAMPLE_PERIOD_US);
        detection.process_sample(value);
    }

    /// Settle the adaptive statistics on a flat rest level.
    fn settle(detection: &mut AudioDetection<ManualClock>, clock: &ManualClock, level: u16) {
        for _ in 0..120 {
            feed(detection, clock, level);
        }
    }

    fn collect_beats(detection: &mut AudioDetection<ManualClock>) -> Rc<RefCell<Vec<BeatEvent>>> {
        let beats = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&beats);
        detection.on_beat(move |event| sink.borrow_mut().push(event));
        beats
    }

    #[test]
    fn test_starts_idle() {
        let (detection, _clock) = engine();
        assert_eq!(detection.phase(), DetectionPhase::Idle);
        assert_eq!(detection.beat_count(), 0);
    }

    #[test]
    fn test_fsm_progression_through_beat() {
        let (mut detection, clock) = engine();
        settle(&mut detection, &clock, 2000);
        assert_eq!(detection.phase(), DetectionPhase::Idle);

        // Validated crossing enters RisingEdge.
        feed(&mut detection, &clock, 3500);
        assert_eq!(detection.phase(), DetectionPhase::RisingEdge);

        // Still rising: stays.
        feed(&mut detection, &clock, 3600);
        assert_eq!(detection.phase(), DetectionPhase::RisingEdge);

        // Fall: beat fires, phase is Triggered for exactly this call.
        feed(&mut detection, &clock, 3400);
        assert_eq!(detection.phase(), DetectionPhase::Triggered);
        assert_eq!(detection.beat_count(), 1);

        // Triggered never persists across two calls.
        feed(&mut detection, &clock, 2000);
        assert_eq!(detection.phase(), DetectionPhase::Debounce);
    }

    #[test]
    fn test_debounce_suppresses_crossings_for_50ms() {
        let (mut detection, clock) = engine();
        let beats = collect_beats(&mut detection);
        settle(&mut detection, &clock, 2000);

        feed(&mut detection, &clock, 3500);
        feed(&mut detection, &clock, 3200);
        assert_eq!(beats.borrow().len(), 1);
        feed(&mut detection, &clock, 2000);
        assert_eq!(detection.phase(), DetectionPhase::Debounce);

        // Hammer loud samples through the debounce window: no new beats.
        let beat_time = beats.borrow()[0].timestamp_us;
        while clock.now_us() < beat_time + 49_000 {
            feed(&mut detection, &clock, 3800);
        }
        assert_eq!(beats.borrow().len(), 1);

        // After expiry the engine returns to Idle on the next quiet sample.
        clock.advance_us(2_000);
        detection.process_sample(2000);
        assert_eq!(detection.phase(), DetectionPhase::Idle);
    }

    #[test]
    fn test_kick_classification_long_rise() {
        let (mut detection, clock) = engine();
        let beats = collect_beats(&mut detection);
        settle(&mut detection, &clock, 2000);

        // Crossing, then 5ms of rising samples, then a fall.
        clock.advance_us(SAMPLE_PERIOD_US);
        detection.process_sample(3000);
        for i in 1..=5u64 {
            clock.advance_us(1_000);
            detection.process_sample(3000 + (i * 100) as u16);
        }
        clock.advance_us(SAMPLE_PERIOD_US);
        detection.process_sample(3300);

        let events = beats.borrow();
        assert_eq!(events.len(), 1);
        assert!(events[0].kick_only, "rise time >4ms must classify as kick");
        assert_eq!(events[0].amplitude, 3500);
    }

    #[test]
    fn test_kick_classification_strict_at_4ms() {
        let (mut detection, clock) = engine();
        let beats = collect_beats(&mut detection);
        settle(&mut detection, &clock, 2000);

        // Crossing at t0; peak-detection sample lands exactly 4ms later.
        clock.advance_us(SAMPLE_PERIOD_US);
        detection.process_sample(3000);
        for i in 1..=3u64 {
            clock.advance_us(1_000);
            detection.process_sample(3000 + (i * 100) as u16);
        }
        clock.advance_us(1_000);
        detection.process_sample(3250);

        let events = beats.borrow();
        assert_eq!(events.len(), 1);
        assert!(
            !events[0].kick_only,
            "exactly 4ms rise time is not a kick (strict inequality)"
        );
    }

    #[test]
    fn test_fast_clap_is_not_kick() {
        let (mut detection, clock) = engine();
        let beats = collect_beats(&mut detection);
        settle(&mut detection, &clock, 2000);

        feed(&mut detection, &clock, 3500);
        feed(&mut detection, &clock, 3000);

        let events = beats.borrow();
        assert_eq!(events.len(), 1);
        assert!(!events[0].kick_only);
    }

    #[test]
    fn test_noise_rejected_by_margin_and_amplitude_gates() {
        let (mut detection, clock) = engine();
        let beats = collect_beats(&mut detection);

        // Noise in [1900, 2100]: raw threshold crossings happen, but nothing
        // clears threshold+80 or noise_floor+200.
        for i in 0..1500u64 {
            let value = 1900 + ((i * 37) % 201) as u16;
            feed(&mut detection, &clock, value);
        }

        assert!(beats.borrow().is_empty(), "noise must produce zero beats");
        assert!(
            detection.false_positive_count() > 0,
            "raw crossings should be counted as rejected"
        );
    }

    #[test]
    fn test_events_dropped_without_subscriber() {
        let (mut detection, clock) = engine();
        settle(&mut detection, &clock, 2000);

        feed(&mut detection, &clock, 3500);
        feed(&mut detection, &clock, 3000);

        // Counting still happens; the event just had nowhere to go.
        assert_eq!(detection.beat_count(), 1);
    }

    #[test]
    fn test_callback_replacement_is_silent() {
        let (mut detection, clock) = engine();
        let first = Rc::new(RefCell::new(0u32));
        let second = Rc::new(RefCell::new(0u32));

        let sink = Rc::clone(&first);
        detection.on_beat(move |_| *sink.borrow_mut() += 1);
        let sink = Rc::clone(&second);
        detection.on_beat(move |_| *sink.borrow_mut() += 1);

        settle(&mut detection, &clock, 2000);
        feed(&mut detection, &clock, 3500);
        feed(&mut detection, &clock, 3000);

        assert_eq!(*first.borrow(), 0, "replaced subscriber must not fire");
        assert_eq!(*second.borrow(), 1);
    }

    #[test]
    fn test_telemetry_cadence() {
        let (mut detection, clock) = engine();
        let snapshots = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&snapshots);
        detection.on_telemetry(move |telemetry| sink.borrow_mut().push(telemetry));

        // 1.2s of samples at 100µs spacing: expect 2 snapshots (500ms, 1s).
        for _ in 0..12_000 {
            feed(&mut detection, &clock, 2000);
        }
        let published = snapshots.borrow();
        assert_eq!(published.len(), 2);
        assert!(published[1].timestamp_us - published[0].timestamp_us >= 500_000);
        assert_eq!(published[0].phase, DetectionPhase::Idle);
    }

    #[test]
    fn test_init_resets_counters_and_phase() {
        let (mut detection, clock) = engine();
        settle(&mut detection, &clock, 2000);
        feed(&mut detection, &clock, 3500);
        feed(&mut detection, &clock, 3000);
        assert_eq!(detection.beat_count(), 1);

        detection.init();
        detection.init();
        assert_eq!(detection.beat_count(), 0);
        assert_eq!(detection.false_positive_count(), 0);
        assert_eq!(detection.phase(), DetectionPhase::Idle);
    }

    #[test]
    fn test_saturated_signal_drives_gain_down_not_corruption() {
        let (mut detection, clock) = engine();
        for _ in 0..200 {
            feed(&mut detection, &clock, 4095);
        }
        assert_eq!(detection.gain_level(), GainLevel::Gain40Db);
        // Flat saturated input: threshold pinned to the signal, no beats.
        assert_eq!(detection.beat_count(), 0);
    }
}
