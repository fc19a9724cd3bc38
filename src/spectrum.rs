//! Spectral estimator: turns one acquisition into power-vs-frequency.
//!
//! Each acquisition is Hann-windowed, Fourier transformed, shifted so the
//! output runs from the most negative to the most positive offset, and
//! converted to dB with `20 * log10(|X| + epsilon)`.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// Power spectrum of a single acquisition, as parallel vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepSpectrum {
    pub freqs_hz: Vec<f64>,
    pub power_db: Vec<f64>,
}

impl StepSpectrum {
    pub fn len(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs_hz.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.freqs_hz
            .iter()
            .copied()
            .zip(self.power_db.iter().copied())
    }
}

/// Symmetric Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (n - 1) as f64).cos()))
            .collect(),
    }
}

/// Frequency offset of every shifted transform bin, relative to the center frequency.
pub fn shifted_offsets(n: usize, sample_rate_hz: f64) -> Vec<f64> {
    let half = (n / 2) as f64;
    let resolution = sample_rate_hz / n as f64;
    (0..n).map(|k| (k as f64 - half) * resolution).collect()
}

/// Caches the FFT plan and window for one transform size.
pub struct SpectralEstimator {
    size: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f32>>,
    epsilon: f64,
}

impl SpectralEstimator {
    pub fn new(size: usize, epsilon: f64) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            size,
            window: hann_window(size),
            fft: planner.plan_fft_forward(size),
            epsilon,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Estimate the spectrum of `samples` acquired at `center_freq_hz`.
    ///
    /// A buffer of a different length than the planned size gets its own
    /// window and plan, so short device reads are still transformed whole.
    pub fn estimate(
        &self,
        samples: &[Complex32],
        center_freq_hz: f64,
        sample_rate_hz: f64,
    ) -> StepSpectrum {
        let n = samples.len();
        if n == 0 {
            return StepSpectrum::default();
        }

        let (window, fft) = if n == self.size {
            (self.window.clone(), Arc::clone(&self.fft))
        } else {
            let mut planner = FftPlanner::<f32>::new();
            (hann_window(n), planner.plan_fft_forward(n))
        };

        let mut buffer: Vec<Complex32> = samples
            .iter()
            .zip(window.iter())
            .map(|(sample, w)| *sample * (*w as f32))
            .collect();
        fft.process(&mut buffer);

        let half = n / 2;
        let power_db = (0..n)
            .map(|k| {
                let bin = buffer[(k + n - half) % n];
                20.0 * (bin.norm() as f64 + self.epsilon).log10()
            })
            .collect();
        let freqs_hz = shifted_offsets(n, sample_rate_hz)
            .into_iter()
            .map(|offset| center_freq_hz + offset)
            .collect();

        StepSpectrum { freqs_hz, power_db }
    }
}

/// One-shot convenience wrapper around [`SpectralEstimator`].
pub fn estimate_spectrum(
    samples: &[Complex32],
    center_freq_hz: f64,
    sample_rate_hz: f64,
    epsilon: f64,
) -> StepSpectrum {
    if samples.is_empty() {
        return StepSpectrum::default();
    }
    SpectralEstimator::new(samples.len(), epsilon).estimate(samples, center_freq_hz, sample_rate_hz)
}
