use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_tempo::{
    AppConfig, AudioDetection, BeatEvent, BpmCalculation, BpmUpdateEvent, ManualClock,
};
use rand::Rng;
use rtrb::RingBuffer;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

/// Queue depth between the WAV decode thread and the detection loop.
const SAMPLE_QUEUE_CAPACITY: usize = 8192;

/// Detection expects ADC-rate samples; decimate higher rates down to this.
const TARGET_SAMPLE_RATE: u32 = 10_000;

#[derive(Parser, Debug)]
#[command(
    name = "clap_tempo_cli",
    about = "Offline beat detection and tempo estimation harness"
)]
struct Cli {
    /// Optional JSON config file (defaults apply on any load failure)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the detection pipeline over a WAV file and report the tempo
    Analyze {
        input: PathBuf,
        /// Write the JSON report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Include every beat event in the report
        #[arg(long, default_value_t = false)]
        beats: bool,
    },
    /// Feed a synthetic click track through the pipeline and verify the BPM
    Simulate {
        #[arg(long, default_value_t = 120.0)]
        bpm: f32,
        #[arg(long, default_value_t = 32)]
        clicks: u32,
        /// Random timing jitter as a percentage of the click interval
        #[arg(long, default_value_t = 1.0)]
        jitter_percent: f32,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            input,
            output,
            beats,
        } => run_analyze(&config, &input, output, beats),
        Commands::Simulate {
            bpm,
            clicks,
            jitter_percent,
        } => run_simulate(&config, bpm, clicks, jitter_percent),
    }
}

fn run_analyze(
    config: &AppConfig,
    input: &PathBuf,
    output_path: Option<PathBuf>,
    include_beats: bool,
) -> Result<ExitCode> {
    let mut reader = hound::WavReader::open(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let spec = reader.spec();
    let decimation = (spec.sample_rate / TARGET_SAMPLE_RATE).max(1);
    let effective_rate = spec.sample_rate / decimation;
    let sample_period_us = 1_000_000.0 / f64::from(effective_rate);

    // Decode on a separate thread, detect on this one. The SPSC queue
    // mirrors the shape of a live capture pipeline even though the file
    // source could trivially run inline.
    let (mut producer, mut consumer) = RingBuffer::<u16>::new(SAMPLE_QUEUE_CAPACITY);
    let channels = u32::from(spec.channels);
    let decoder = thread::spawn(move || -> Result<()> {
        let mut frame = 0u32;
        let mut channel = 0u32;
        for sample in reader.samples::<i16>() {
            let sample = sample.context("decoding WAV samples")?;
            // First channel only, decimated down to the target rate.
            let keep = channel == 0 && frame % decimation == 0;
            channel += 1;
            if channel == channels {
                channel = 0;
                frame += 1;
            }
            if !keep {
                continue;
            }
            // Rescale signed 16-bit to the 12-bit unipolar range the
            // detector models; digital silence lands on the 2048 midpoint.
            let value = ((i32::from(sample) + 32_768) >> 4) as u16;
            let mut pending = value;
            loop {
                match producer.push(pending) {
                    Ok(()) => break,
                    Err(rtrb::PushError::Full(v)) => {
                        pending = v;
                        thread::yield_now();
                    }
                }
            }
        }
        Ok(())
    });

    let clock = ManualClock::new();
    let mut detection = AudioDetection::with_config(clock.clone(), config.detection.clone());
    let tempo = Rc::new(RefCell::new(BpmCalculation::with_config(config.bpm.clone())));
    let beat_log = Rc::new(RefCell::new(Vec::new()));
    let last_update = Rc::new(RefCell::new(None::<BpmUpdateEvent>));

    {
        let tempo = Rc::clone(&tempo);
        let beat_log = Rc::clone(&beat_log);
        detection.on_beat(move |event| {
            tempo.borrow_mut().add_tap(event.timestamp_us);
            beat_log.borrow_mut().push(event);
        });
    }
    {
        let last_update = Rc::clone(&last_update);
        tempo
            .borrow_mut()
            .on_bpm_update(move |event| *last_update.borrow_mut() = Some(event));
    }

    let mut elapsed_us = 0.0f64;
    let mut processed = 0u64;
    loop {
        match consumer.pop() {
            Ok(value) => {
                elapsed_us += sample_period_us;
                clock.set_us(elapsed_us as u64);
                detection.process_sample(value);
                processed += 1;
            }
            Err(rtrb::PopError::Empty) => {
                if consumer.is_abandoned() {
                    break;
                }
                thread::yield_now();
            }
        }
    }
    decoder
        .join()
        .map_err(|_| anyhow::anyhow!("decode thread panicked"))?
        .context("decoding WAV input")?;

    log::info!(
        "[CLI] processed {} samples at {}Hz ({}x decimation)",
        processed,
        effective_rate,
        decimation
    );

    let tempo = tempo.borrow();
    let report = AnalyzeReport {
        input: input.display().to_string(),
        sample_rate: effective_rate,
        samples_processed: processed,
        beat_count: detection.beat_count(),
        false_positive_count: detection.false_positive_count(),
        bpm: tempo.bpm(),
        is_stable: tempo.is_stable(),
        coefficient_of_variation: tempo.coefficient_of_variation(),
        tap_count: tempo.tap_count(),
        last_update: *last_update.borrow(),
        beats: if include_beats {
            beat_log.borrow().clone()
        } else {
            Vec::new()
        },
    };
    emit_report(&report, output_path)?;

    Ok(ExitCode::from(0))
}

fn run_simulate(
    config: &AppConfig,
    target_bpm: f32,
    clicks: u32,
    jitter_percent: f32,
) -> Result<ExitCode> {
    anyhow::ensure!(target_bpm > 0.0, "target BPM must be positive");
    anyhow::ensure!(clicks >= 4, "need at least 4 clicks to estimate a tempo");

    let clock = ManualClock::new();
    let mut detection = AudioDetection::with_config(clock.clone(), config.detection.clone());
    let tempo = Rc::new(RefCell::new(BpmCalculation::with_config(config.bpm.clone())));
    {
        let tempo = Rc::clone(&tempo);
        detection.on_beat(move |event| tempo.borrow_mut().add_tap(event.timestamp_us));
    }

    let sample_period_us = 1_000_000 / u64::from(TARGET_SAMPLE_RATE);
    let interval_us = (60_000_000.0 / f64::from(target_bpm)) as u64;
    let mut rng = rand::thread_rng();

    // One second of quiet lead-in seeds the threshold and noise floor.
    let mut now_us = 0u64;
    let lead_in = u64::from(TARGET_SAMPLE_RATE);
    for _ in 0..lead_in {
        now_us += sample_period_us;
        clock.set_us(now_us);
        detection.process_sample(2000 + rng.gen_range(0..20));
    }

    let mut next_click_us = now_us + interval_us;
    for _ in 0..clicks {
        let jitter_span = (interval_us as f64 * f64::from(jitter_percent) / 100.0) as i64;
        let jitter = if jitter_span > 0 {
            rng.gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let click_at = next_click_us.saturating_add_signed(jitter);

        while now_us < click_at {
            now_us += sample_period_us;
            clock.set_us(now_us);
            detection.process_sample(2000 + rng.gen_range(0..20));
        }
        // A clap transient: sharp 1ms attack, then a fast decay.
        for step in 0..10u16 {
            now_us += sample_period_us;
            clock.set_us(now_us);
            detection.process_sample(2100 + step * 150);
        }
        for step in 0..40u16 {
            now_us += sample_period_us;
            clock.set_us(now_us);
            let value = 3600u16.saturating_sub(step * 40).max(2000);
            detection.process_sample(value);
        }
        next_click_us += interval_us;
    }

    let tempo = tempo.borrow();
    let measured = tempo.bpm();
    println!(
        "target {:.1} BPM, measured {:.1} BPM ({} beats detected, stable {})",
        target_bpm,
        measured,
        detection.beat_count(),
        tempo.is_stable()
    );

    if (measured - target_bpm).abs() > 1.0 {
        eprintln!("measured tempo deviates from target by more than 1 BPM");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::from(0))
}

fn emit_report(report: &AnalyzeReport, output_path: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    if let Some(path) = output_path {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(())
}

#[derive(Serialize)]
struct AnalyzeReport {
    input: String,
    sample_rate: u32,
    samples_processed: u64,
    beat_count: u32,
    false_positive_count: u32,
    bpm: f32,
    is_stable: bool,
    coefficient_of_variation: f32,
    tap_count: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_update: Option<BpmUpdateEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    beats: Vec<BeatEvent>,
}
