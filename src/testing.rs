//! Deterministic sample sources and helpers shared by unit and integration tests.

use crate::logging::{LogBuffer, build_subscriber};
use crate::types::{ConsoleWriter, Format, Result, SampleSource};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

/// Source that never produces samples, so every bin ends up missing.
#[derive(Debug, Default)]
pub struct SilentSource {
    pub acquisitions: usize,
    pub deactivated: bool,
}

impl SampleSource for SilentSource {
    fn tune(&mut self, _center_freq_hz: f64, _sample_rate_hz: f64) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _sample_count: usize) -> Result<Vec<Complex32>> {
        self.acquisitions += 1;
        Ok(Vec::new())
    }

    fn deactivate(&mut self) -> Result<()> {
        self.deactivated = true;
        Ok(())
    }

    fn device_args(&self) -> &str {
        "silent"
    }
}

/// Source producing a complex tone at a fixed offset from whatever center it is tuned to.
///
/// The phase restarts at zero on every acquisition, so without noise every
/// step at the same center returns identical samples.
pub struct ToneSource {
    offset_hz: f32,
    amplitude: f32,
    noise: Option<(StdRng, f32)>,
    sample_rate_hz: f64,
    pub tuned: Vec<f64>,
}

impl ToneSource {
    pub fn new(offset_hz: f32, amplitude: f32) -> Self {
        Self {
            offset_hz,
            amplitude,
            noise: None,
            sample_rate_hz: 1.0,
            tuned: Vec::new(),
        }
    }

    /// Add uniform noise of the given peak amplitude, seeded for reproducibility.
    pub fn with_noise(mut self, seed: u64, level: f32) -> Self {
        self.noise = Some((StdRng::seed_from_u64(seed), level));
        self
    }
}

impl SampleSource for ToneSource {
    fn tune(&mut self, center_freq_hz: f64, sample_rate_hz: f64) -> Result<()> {
        self.tuned.push(center_freq_hz);
        self.sample_rate_hz = sample_rate_hz;
        Ok(())
    }

    fn read(&mut self, sample_count: usize) -> Result<Vec<Complex32>> {
        let angular_freq = 2.0 * PI * self.offset_hz / self.sample_rate_hz as f32;

        let samples = (0..sample_count)
            .map(|i| {
                let phase = angular_freq * i as f32;
                let mut sample = Complex32::new(
                    phase.cos() * self.amplitude,
                    phase.sin() * self.amplitude,
                );
                if let Some((rng, level)) = self.noise.as_mut() {
                    sample.re += rng.gen_range(-*level..=*level);
                    sample.im += rng.gen_range(-*level..=*level);
                }
                sample
            })
            .collect();
        Ok(samples)
    }

    fn deactivate(&mut self) -> Result<()> {
        Ok(())
    }

    fn device_args(&self) -> &str {
        "tone"
    }
}

/// `sample_count` samples of a complex tone `offset_hz` above the tuned center.
pub fn tone_samples(
    amplitude: f32,
    offset_hz: f32,
    sample_rate_hz: f32,
    sample_count: usize,
) -> Vec<Complex32> {
    let angular_freq = 2.0 * PI * offset_hz / sample_rate_hz;
    (0..sample_count)
        .map(|i| {
            let phase = angular_freq * i as f32;
            Complex32::new(phase.cos() * amplitude, phase.sin() * amplitude)
        })
        .collect()
}

/// Replays a fixed sequence of reads and logs every call as `tune <hz>` or `read`.
///
/// Once the script runs out every read returns no samples.
pub struct ScriptedSource {
    reads: VecDeque<Vec<Complex32>>,
    events: Rc<RefCell<Vec<String>>>,
}

impl ScriptedSource {
    pub fn new(reads: Vec<Vec<Complex32>>) -> Self {
        Self {
            reads: reads.into(),
            events: Rc::default(),
        }
    }

    /// Shared handle on the call log, for interleaving other events such as pauses.
    pub fn events(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.events)
    }
}

impl SampleSource for ScriptedSource {
    fn tune(&mut self, center_freq_hz: f64, _sample_rate_hz: f64) -> Result<()> {
        self.events.borrow_mut().push(format!("tune {center_freq_hz}"));
        Ok(())
    }

    fn read(&mut self, _sample_count: usize) -> Result<Vec<Complex32>> {
        self.events.borrow_mut().push("read".to_string());
        Ok(self.reads.pop_front().unwrap_or_default())
    }

    fn deactivate(&mut self) -> Result<()> {
        Ok(())
    }

    fn device_args(&self) -> &str {
        "scripted"
    }
}

/// Console writer that records every message for assertions.
#[derive(Default, Clone)]
pub struct MockConsoleWriter {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MockConsoleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_messages(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, message: String) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

impl ConsoleWriter for MockConsoleWriter {
    fn write_info(&self, message: &str) {
        self.push(format!("INFO: {}", message));
    }

    fn write_debug(&self, message: &str) {
        self.push(format!("DEBUG: {}", message));
    }
}

/// Run `f` with a thread-local subscriber and return its result with the captured logs.
pub fn with_captured_logs<T, F>(verbose: bool, format: Format, f: F) -> Result<(T, String)>
where
    F: FnOnce() -> Result<T>,
{
    let buffer = LogBuffer::default();
    let subscriber = build_subscriber(verbose, format, buffer.clone());
    let result = tracing::subscriber::with_default(subscriber, f)?;
    Ok((result, buffer.get_string()))
}
