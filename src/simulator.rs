//! Seeded synthetic scans.
//!
//! Produces per-bin average/max readings directly, bypassing acquisition and
//! the spectral estimator. Given the same seed and range the output is
//! identical draw for draw, which the baseline and compare workflows rely on.

use crate::types::{LabError, Result, ScanBin, ScanResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tracing::debug;

const NOISE_LEVEL_DB: f64 = -55.0;
const NOISE_SPREAD_DB: f64 = 6.0;
const RIPPLE_DB: f64 = 6.0;
const RIPPLE_CYCLES: f64 = 3.0;
const PEAK_PROBABILITY: f64 = 0.02;
const PEAK_MIN_DB: f64 = 8.0;
const PEAK_MAX_DB: f64 = 18.0;
const MAX_JITTER_DB: f64 = 4.0;

pub struct ScanSimulator {
    rng: StdRng,
}

impl ScanSimulator {
    /// `None` seeds from the operating system, so the scan is not reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn simulate_scan(
        &mut self,
        start_hz: f64,
        stop_hz: f64,
        bin_hz: f64,
        antenna_tag: Option<String>,
        location_tag: Option<String>,
    ) -> Result<ScanResult> {
        if !(bin_hz > 0.0) {
            return Err(LabError::InvalidInput("bin_hz must be positive".into()));
        }
        if !(stop_hz > start_hz) {
            return Err(LabError::InvalidInput(
                "stop_hz must be greater than start_hz".into(),
            ));
        }

        let center = (start_hz + stop_hz) / 2.0;
        let span = (stop_hz - start_hz).max(1.0);
        let mut bins = Vec::new();

        loop {
            let freq_hz = start_hz + bins.len() as f64 * bin_hz;
            if freq_hz >= stop_hz {
                break;
            }

            let noise = NOISE_LEVEL_DB + self.rng.gen_range(-NOISE_SPREAD_DB..NOISE_SPREAD_DB);
            let ripple =
                RIPPLE_DB * ((freq_hz - center) / span * 2.0 * RIPPLE_CYCLES * PI).sin();
            let peak = if self.rng.r#gen::<f64>() < PEAK_PROBABILITY {
                self.rng.gen_range(PEAK_MIN_DB..PEAK_MAX_DB)
            } else {
                0.0
            };
            let avg_db = noise + ripple;
            let max_db = avg_db + peak + self.rng.gen_range(0.0..MAX_JITTER_DB);

            bins.push(ScanBin {
                freq_hz,
                avg_db,
                max_db,
            });
        }

        debug!(
            message = "Simulated scan",
            start_mhz = start_hz / 1e6,
            stop_mhz = stop_hz / 1e6,
            bins = bins.len()
        );

        Ok(ScanResult {
            timestamp: ScanResult::now_iso(),
            start_hz,
            stop_hz,
            bin_hz,
            bins,
            antenna_tag,
            location_tag,
        })
    }
}
