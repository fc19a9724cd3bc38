//! Sweep reducer: retunes across the requested range, repeats the sweep,
//! and reduces every spectral sample into fixed-width frequency bins.
//!
//! The reducer keeps per-bin counters instead of assuming a uniform sample
//! density, because neighbouring steps overlap (`sample_rate_hz` normally
//! exceeds the step) and the band edges are only covered once.

use crate::spectrum::SpectralEstimator;
use crate::types::{
    LabError, Result, SampleSource, ScanBin, ScanResult, Sleeper, SourceFactory, SweepStatsBin,
    thread_sleeper,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 2_400_000.0;
pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_MISSING_DB: f64 = -120.0;
pub const DEFAULT_EPSILON: f64 = 1e-12;
/// Fraction of the sample rate used as the default retuning step.
pub const DEFAULT_STEP_FRACTION: f64 = 0.8;

/// Everything the reducer needs for one scan invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub start_hz: f64,
    pub stop_hz: f64,
    pub bin_hz: f64,
    pub sample_rate_hz: f64,
    pub fft_size: usize,
    /// Explicit retuning step; `None` means `0.8 * sample_rate_hz`.
    pub step_hz: Option<f64>,
    pub sweeps: usize,
    /// Settling pause between retuning and reading.
    pub dwell_ms: i64,
    /// Value written for bins that received no samples.
    pub missing_db: f64,
    /// Added to `|X|` before taking the logarithm.
    pub epsilon: f64,
    pub collect_sweep_stats: bool,
    pub antenna_tag: Option<String>,
    pub location_tag: Option<String>,
}

impl ScanSettings {
    pub fn new(start_hz: f64, stop_hz: f64, bin_hz: f64) -> Self {
        Self {
            start_hz,
            stop_hz,
            bin_hz,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            fft_size: DEFAULT_FFT_SIZE,
            step_hz: None,
            sweeps: 1,
            dwell_ms: 0,
            missing_db: DEFAULT_MISSING_DB,
            epsilon: DEFAULT_EPSILON,
            collect_sweep_stats: false,
            antenna_tag: None,
            location_tag: None,
        }
    }

    pub fn step(&self) -> f64 {
        self.step_hz
            .unwrap_or(self.sample_rate_hz * DEFAULT_STEP_FRACTION)
    }

    pub fn bin_count(&self) -> usize {
        ((self.stop_hz - self.start_hz) / self.bin_hz).ceil() as usize
    }

    pub fn bin_freq(&self, idx: usize) -> f64 {
        self.start_hz + idx as f64 * self.bin_hz
    }

    /// Reject settings that would make the sweep meaningless. Runs before any acquisition.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("start_hz", self.start_hz),
            ("stop_hz", self.stop_hz),
            ("bin_hz", self.bin_hz),
            ("sample_rate_hz", self.sample_rate_hz),
            ("missing_db", self.missing_db),
            ("epsilon", self.epsilon),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(LabError::InvalidInput(format!("{name} must be finite")));
            }
        }
        if self.bin_hz <= 0.0 {
            return Err(LabError::InvalidInput("bin_hz must be positive".into()));
        }
        if self.stop_hz <= self.start_hz {
            return Err(LabError::InvalidInput(
                "stop_hz must be greater than start_hz".into(),
            ));
        }
        if self.sample_rate_hz <= 0.0 {
            return Err(LabError::InvalidInput(
                "sample_rate_hz must be positive".into(),
            ));
        }
        if self.fft_size == 0 {
            return Err(LabError::InvalidInput("fft_size must be positive".into()));
        }
        if self.sweeps == 0 {
            return Err(LabError::InvalidInput("sweeps must be positive".into()));
        }
        if self.dwell_ms < 0 {
            return Err(LabError::InvalidInput("dwell_ms must be >= 0".into()));
        }
        if let Some(step) = self.step_hz
            && (!step.is_finite() || step <= 0.0)
        {
            return Err(LabError::InvalidInput("step_hz must be positive".into()));
        }
        Ok(())
    }

    /// Center frequencies of one sweep, in tuning order.
    pub fn step_centers(&self) -> Vec<f64> {
        let step = self.step();
        let mut centers = Vec::new();
        let mut center = self.start_hz + self.sample_rate_hz / 2.0;
        while center < self.stop_hz {
            centers.push(center);
            center += step;
        }
        centers
    }
}

/// Result of one reducer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutput {
    pub scan: ScanResult,
    pub sweep_stats: Option<Vec<SweepStatsBin>>,
}

/// Per-bin sums and counts, plus the running maximum for the global accumulator.
struct BinAccumulator {
    sum: Vec<f64>,
    count: Vec<u64>,
    max: Vec<f64>,
}

impl BinAccumulator {
    fn new(n: usize) -> Self {
        Self {
            sum: vec![0.0; n],
            count: vec![0; n],
            max: vec![f64::NEG_INFINITY; n],
        }
    }

    fn reset(&mut self) {
        self.sum.fill(0.0);
        self.count.fill(0);
        self.max.fill(f64::NEG_INFINITY);
    }

    fn add(&mut self, idx: usize, power_db: f64) {
        self.sum[idx] += power_db;
        self.count[idx] += 1;
        if power_db > self.max[idx] {
            self.max[idx] = power_db;
        }
    }

    fn average(&self, idx: usize, missing_db: f64) -> f64 {
        match self.count[idx] {
            0 => missing_db,
            count => self.sum[idx] / count as f64,
        }
    }

    fn maximum(&self, idx: usize, missing_db: f64) -> f64 {
        match self.count[idx] {
            0 => missing_db,
            _ => self.max[idx],
        }
    }
}

/// Min/mean/max of the per-sweep averages of every bin.
struct SweepTracker {
    min: Vec<f64>,
    sum: Vec<f64>,
    max: Vec<f64>,
    sweeps: usize,
}

impl SweepTracker {
    fn new(n: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; n],
            sum: vec![0.0; n],
            max: vec![f64::NEG_INFINITY; n],
            sweeps: 0,
        }
    }

    fn fold(&mut self, sweep: &BinAccumulator, missing_db: f64) {
        for idx in 0..self.sum.len() {
            let avg = sweep.average(idx, missing_db);
            self.min[idx] = self.min[idx].min(avg);
            self.max[idx] = self.max[idx].max(avg);
            self.sum[idx] += avg;
        }
        self.sweeps += 1;
    }

    fn finish(&self, settings: &ScanSettings) -> Vec<SweepStatsBin> {
        let missing = settings.missing_db;
        (0..self.sum.len())
            .map(|idx| {
                if self.sweeps == 0 {
                    SweepStatsBin {
                        freq_hz: settings.bin_freq(idx),
                        sweep_avg_min_db: missing,
                        sweep_avg_mean_db: missing,
                        sweep_avg_max_db: missing,
                    }
                } else {
                    SweepStatsBin {
                        freq_hz: settings.bin_freq(idx),
                        sweep_avg_min_db: self.min[idx],
                        sweep_avg_mean_db: self.sum[idx] / self.sweeps as f64,
                        sweep_avg_max_db: self.max[idx],
                    }
                }
            })
            .collect()
    }
}

/// Deactivates the wrapped source when dropped unless it was released explicitly.
struct SourceGuard {
    source: Option<Box<dyn SampleSource>>,
}

impl SourceGuard {
    fn new(source: Box<dyn SampleSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    fn source_mut(&mut self) -> Result<&mut dyn SampleSource> {
        match self.source.as_mut() {
            Some(source) => Ok(source.as_mut()),
            None => Err(LabError::Device("sample source already released".into())),
        }
    }

    fn release(mut self) -> Result<()> {
        match self.source.take() {
            Some(mut source) => {
                debug!(device = source.device_args(), "Releasing sample source");
                source.deactivate()
            }
            None => Ok(()),
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.take() {
            debug!(
                device = source.device_args(),
                "Releasing sample source after failed scan"
            );
            if let Err(e) = source.deactivate() {
                warn!("Failed to release sample source: {}", e);
            }
        }
    }
}

pub struct SweepReducer<'a> {
    settings: &'a ScanSettings,
    dwell: Sleeper<'a>,
}

impl<'a> SweepReducer<'a> {
    pub fn new(settings: &'a ScanSettings) -> Self {
        Self {
            settings,
            dwell: thread_sleeper(),
        }
    }

    /// Replace the blocking dwell pause.
    pub fn with_sleeper(mut self, dwell: Sleeper<'a>) -> Self {
        self.dwell = dwell;
        self
    }

    /// Validate, open the source once, reduce every sweep, then release the source.
    pub fn run(&mut self, factory: &dyn SourceFactory) -> Result<SweepOutput> {
        self.settings.validate()?;

        let mut guard = SourceGuard::new(factory.open(self.settings.sample_rate_hz)?);
        let output = self.reduce(guard.source_mut()?)?;
        guard.release()?;
        Ok(output)
    }

    /// Reduce all sweeps using an already-open source. The caller owns the source lifecycle.
    pub fn reduce(&mut self, source: &mut dyn SampleSource) -> Result<SweepOutput> {
        let settings = self.settings;
        settings.validate()?;

        let timestamp = ScanResult::now_iso();
        let n = settings.bin_count();
        let centers = settings.step_centers();
        let dwell = Duration::from_millis(settings.dwell_ms as u64);
        let estimator = SpectralEstimator::new(settings.fft_size, settings.epsilon);

        info!(
            message = "Starting sweep scan",
            start_mhz = settings.start_hz / 1e6,
            stop_mhz = settings.stop_hz / 1e6,
            bins = n,
            steps_per_sweep = centers.len(),
            sweeps = settings.sweeps
        );
        if centers.is_empty() {
            warn!("No tuning steps fit below stop_hz; every bin will be reported as missing");
        }

        let mut total = BinAccumulator::new(n);
        let mut per_sweep = BinAccumulator::new(n);
        let mut tracker = SweepTracker::new(n);

        for sweep in 0..settings.sweeps {
            per_sweep.reset();

            for (step_idx, &center) in centers.iter().enumerate() {
                source.tune(center, settings.sample_rate_hz)?;
                if !dwell.is_zero() {
                    (self.dwell)(dwell);
                }
                let samples = source.read(settings.fft_size)?;
                let spectrum = estimator.estimate(&samples, center, settings.sample_rate_hz);

                let mut accepted = 0usize;
                for (freq, power) in spectrum.iter() {
                    if freq < settings.start_hz || freq >= settings.stop_hz {
                        continue;
                    }
                    let idx = ((freq - settings.start_hz) / settings.bin_hz).floor();
                    if idx < 0.0 || idx >= n as f64 {
                        continue;
                    }
                    let idx = idx as usize;
                    total.add(idx, power);
                    per_sweep.add(idx, power);
                    accepted += 1;
                }

                debug!(
                    sweep = sweep + 1,
                    step = step_idx + 1,
                    center_mhz = center / 1e6,
                    samples = samples.len(),
                    accepted = accepted,
                    "Step reduced"
                );
            }

            tracker.fold(&per_sweep, settings.missing_db);
        }

        let bins: Vec<ScanBin> = (0..n)
            .map(|idx| ScanBin {
                freq_hz: settings.bin_freq(idx),
                avg_db: total.average(idx, settings.missing_db),
                max_db: total.maximum(idx, settings.missing_db),
            })
            .collect();

        let missing = total.count.iter().filter(|&&c| c == 0).count();
        info!(
            message = "Sweep scan complete",
            bins = n,
            missing_bins = missing
        );

        let sweep_stats = settings
            .collect_sweep_stats
            .then(|| tracker.finish(settings));

        Ok(SweepOutput {
            scan: ScanResult {
                timestamp,
                start_hz: settings.start_hz,
                stop_hz: settings.stop_hz,
                bin_hz: settings.bin_hz,
                bins,
                antenna_tag: settings.antenna_tag.clone(),
                location_tag: settings.location_tag.clone(),
            },
            sweep_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::estimate_spectrum;
    use crate::testing::{ScriptedSource, SilentSource, ToneSource, tone_samples};
    use num_complex::Complex32;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn small_settings() -> ScanSettings {
        ScanSettings {
            sample_rate_hz: 1_000.0,
            fft_size: 16,
            ..ScanSettings::new(0.0, 2_000.0, 100.0)
        }
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let base = small_settings();
        let cases = [
            ScanSettings { bin_hz: 0.0, ..base.clone() },
            ScanSettings { stop_hz: 0.0, ..base.clone() },
            ScanSettings { sample_rate_hz: -1.0, ..base.clone() },
            ScanSettings { fft_size: 0, ..base.clone() },
            ScanSettings { sweeps: 0, ..base.clone() },
            ScanSettings { dwell_ms: -5, ..base.clone() },
            ScanSettings { step_hz: Some(0.0), ..base.clone() },
            ScanSettings { start_hz: f64::NAN, ..base.clone() },
        ];
        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(LabError::InvalidInput(_))),
                "expected rejection for {settings:?}"
            );
        }
        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_step_centers_use_default_fraction() {
        let settings = small_settings();
        assert_eq!(settings.step(), 800.0);
        assert_eq!(settings.step_centers(), vec![500.0, 1300.0]);
    }

    #[test]
    fn test_bin_count_rounds_up() {
        let settings = ScanSettings::new(0.0, 1_050.0, 100.0);
        assert_eq!(settings.bin_count(), 11);
    }

    #[test]
    fn test_silent_source_fills_every_bin_with_missing() {
        for sweeps in 1..=3 {
            let settings = ScanSettings {
                sweeps,
                collect_sweep_stats: true,
                missing_db: -999.0,
                ..small_settings()
            };
            let mut source = SilentSource::default();
            let output = SweepReducer::new(&settings).reduce(&mut source).unwrap();

            assert_eq!(output.scan.bins.len(), 20);
            for bin in &output.scan.bins {
                assert_eq!(bin.avg_db, -999.0);
                assert_eq!(bin.max_db, -999.0);
            }
            for stats in output.sweep_stats.unwrap() {
                assert_eq!(stats.sweep_avg_min_db, -999.0);
                assert_eq!(stats.sweep_avg_mean_db, -999.0);
                assert_eq!(stats.sweep_avg_max_db, -999.0);
            }
        }
    }

    #[test]
    fn test_bins_are_evenly_spaced_from_start() {
        let settings = small_settings();
        let mut source = ToneSource::new(250.0, 1.0);
        let output = SweepReducer::new(&settings).reduce(&mut source).unwrap();

        for (i, bin) in output.scan.bins.iter().enumerate() {
            assert_eq!(bin.freq_hz, i as f64 * 100.0);
        }
        assert!(output.sweep_stats.is_none());
    }

    #[test]
    fn test_uncovered_tail_bins_are_missing() {
        // Steps at 500 and 1300 Hz with 1 kHz span cover [0, 1800); bins 18 and 19 stay empty.
        let settings = small_settings();
        let mut source = ToneSource::new(250.0, 1.0);
        let output = SweepReducer::new(&settings).reduce(&mut source).unwrap();

        assert_ne!(output.scan.bins[0].avg_db, settings.missing_db);
        assert_ne!(output.scan.bins[17].avg_db, settings.missing_db);
        assert_eq!(output.scan.bins[18].avg_db, settings.missing_db);
        assert_eq!(output.scan.bins[19].max_db, settings.missing_db);
    }

    #[test]
    fn test_max_never_below_average() {
        let settings = ScanSettings {
            sweeps: 2,
            ..small_settings()
        };
        let mut source = ToneSource::new(250.0, 1.0).with_noise(7, 0.1);
        let output = SweepReducer::new(&settings).reduce(&mut source).unwrap();
        for bin in &output.scan.bins {
            assert!(bin.max_db >= bin.avg_db, "bin {:?}", bin);
        }
    }

    #[test]
    fn test_sweep_stats_bracket_the_mean() {
        let settings = ScanSettings {
            sweeps: 3,
            collect_sweep_stats: true,
            ..small_settings()
        };
        let mut source = ToneSource::new(250.0, 1.0).with_noise(11, 0.5);
        let output = SweepReducer::new(&settings).reduce(&mut source).unwrap();
        let stats = output.sweep_stats.unwrap();
        assert_eq!(stats.len(), output.scan.bins.len());
        for s in stats.iter().take(18) {
            assert!(s.sweep_avg_min_db <= s.sweep_avg_mean_db + 1e-9);
            assert!(s.sweep_avg_mean_db <= s.sweep_avg_max_db + 1e-9);
        }
    }

    #[test]
    fn test_identical_sweeps_average_like_single_sweep() {
        let one = small_settings();
        let three = ScanSettings {
            sweeps: 3,
            ..small_settings()
        };
        let a = SweepReducer::new(&one)
            .reduce(&mut ToneSource::new(250.0, 1.0))
            .unwrap();
        let b = SweepReducer::new(&three)
            .reduce(&mut ToneSource::new(250.0, 1.0))
            .unwrap();
        for (x, y) in a.scan.bins.iter().zip(b.scan.bins.iter()) {
            approx::assert_relative_eq!(x.avg_db, y.avg_db, epsilon = 1e-9);
            assert_eq!(x.max_db, y.max_db);
        }
    }

    struct CountingSource {
        released: Rc<RefCell<usize>>,
        fail_on_read: bool,
    }

    impl SampleSource for CountingSource {
        fn tune(&mut self, _center_freq_hz: f64, _sample_rate_hz: f64) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, sample_count: usize) -> Result<Vec<num_complex::Complex32>> {
            if self.fail_on_read {
                return Err(LabError::Device("read failed".into()));
            }
            Ok(vec![num_complex::Complex32::new(1.0, 0.0); sample_count])
        }

        fn deactivate(&mut self) -> Result<()> {
            *self.released.borrow_mut() += 1;
            Ok(())
        }

        fn device_args(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_source_released_after_success_and_failure() {
        for fail in [false, true] {
            let released = Rc::new(RefCell::new(0));
            let handle = Rc::clone(&released);
            let factory = move |_rate: f64| -> Result<Box<dyn SampleSource>> {
                Ok(Box::new(CountingSource {
                    released: Rc::clone(&handle),
                    fail_on_read: fail,
                }))
            };
            let settings = small_settings();
            let result = SweepReducer::new(&settings).run(&factory);
            assert_eq!(result.is_err(), fail);
            assert_eq!(*released.borrow(), 1);
        }
    }

    #[test]
    fn test_invalid_settings_never_open_the_source() {
        let opened = RefCell::new(false);
        let factory = |_rate: f64| -> Result<Box<dyn SampleSource>> {
            *opened.borrow_mut() = true;
            Ok(Box::new(SilentSource::default()))
        };
        let settings = ScanSettings {
            sweeps: 0,
            ..small_settings()
        };
        assert!(SweepReducer::new(&settings).run(&factory).is_err());
        assert!(!*opened.borrow());
    }

    #[test]
    fn test_dwell_pause_sits_between_tune_and_read() {
        for (dwell_ms, expected) in [
            (5, vec!["tune 500", "pause 5", "read", "tune 1300", "pause 5", "read"]),
            (0, vec!["tune 500", "read", "tune 1300", "read"]),
        ] {
            let settings = ScanSettings {
                dwell_ms,
                ..small_settings()
            };
            let mut source = ScriptedSource::new(Vec::new());
            let events = source.events();
            let log = Rc::clone(&events);
            SweepReducer::new(&settings)
                .with_sleeper(Box::new(move |d: Duration| {
                    log.borrow_mut().push(format!("pause {}", d.as_millis()));
                }))
                .reduce(&mut source)
                .unwrap();
            assert_eq!(*events.borrow(), expected);
        }
    }

    /// Powers one read at `center` contributes to bin `idx`, in spectrum order.
    fn bin_powers(settings: &ScanSettings, samples: &[Complex32], center: f64, idx: usize) -> Vec<f64> {
        estimate_spectrum(samples, center, settings.sample_rate_hz, settings.epsilon)
            .iter()
            .filter(|&(f, _)| {
                f >= settings.start_hz
                    && f < settings.stop_hz
                    && ((f - settings.start_hz) / settings.bin_hz).floor() as usize == idx
            })
            .map(|(_, p)| p)
            .collect()
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    #[test]
    fn test_overlapping_steps_average_every_sample() {
        // Bin 8 spans [800, 900): two samples from the step at 500 Hz, two from 1300 Hz.
        let settings = small_settings();
        let first = tone_samples(1.0, 125.0, 1000.0, 16);
        let second = tone_samples(4.0, -312.5, 1000.0, 16);
        let mut source = ScriptedSource::new(vec![first.clone(), second.clone()]);
        let scan = SweepReducer::new(&settings).reduce(&mut source).unwrap().scan;

        let mut powers = bin_powers(&settings, &first, 500.0, 8);
        let from_second = bin_powers(&settings, &second, 1300.0, 8);
        assert_eq!(powers.len(), 2);
        assert_eq!(from_second.len(), 2);
        powers.extend(from_second);

        assert_eq!(scan.bins[8].avg_db, mean(&powers));
        assert_eq!(
            scan.bins[8].max_db,
            powers.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        );
    }

    #[test]
    fn test_sweep_missing_a_bin_feeds_sentinel_into_stats_only() {
        let settings = ScanSettings {
            sweeps: 3,
            collect_sweep_stats: true,
            missing_db: -200.0,
            ..small_settings()
        };
        let quiet = tone_samples(1.0, 0.0, 1000.0, 16);
        let loud = tone_samples(10.0, 0.0, 1000.0, 16);
        let mut source = ScriptedSource::new(vec![
            quiet.clone(),
            quiet.clone(),
            Vec::new(),
            Vec::new(),
            loud.clone(),
            loud.clone(),
        ]);
        let output = SweepReducer::new(&settings).reduce(&mut source).unwrap();

        // Bin 5 spans [500, 600) and is only reached by the step at 500 Hz.
        let first = bin_powers(&settings, &quiet, 500.0, 5);
        let third = bin_powers(&settings, &loud, 500.0, 5);
        let (avg_first, avg_third) = (mean(&first), mean(&third));

        let stats = output.sweep_stats.unwrap();
        assert_eq!(stats[5].sweep_avg_min_db, -200.0);
        assert_eq!(stats[5].sweep_avg_mean_db, (avg_first + -200.0 + avg_third) / 3.0);
        assert_eq!(stats[5].sweep_avg_max_db, avg_first.max(avg_third));

        let all: Vec<f64> = first.iter().chain(third.iter()).copied().collect();
        assert_eq!(output.scan.bins[5].avg_db, mean(&all));
        assert!(output.scan.bins[5].avg_db > -200.0);
    }
}
