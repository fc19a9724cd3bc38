use crate::file::{read_scan_csv, write_noise_floor_csv};
use crate::types::{LabError, Result, ScanBin};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseFloorStrategy {
    /// Take each bin's average power as its noise floor.
    Avg,
}

impl FromStr for NoiseFloorStrategy {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "avg" => Ok(NoiseFloorStrategy::Avg),
            other => Err(LabError::InvalidInput(format!(
                "unsupported strategy: {other}"
            ))),
        }
    }
}

impl fmt::Display for NoiseFloorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseFloorStrategy::Avg => write!(f, "avg"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseFloorBin {
    pub freq_hz: f64,
    pub noise_floor_db: f64,
}

pub struct NoiseFloorEstimator {
    strategy: NoiseFloorStrategy,
}

impl NoiseFloorEstimator {
    pub fn new(strategy: NoiseFloorStrategy) -> Self {
        Self { strategy }
    }

    /// Parse and validate a strategy name before building the estimator.
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn strategy(&self) -> NoiseFloorStrategy {
        self.strategy
    }

    pub fn estimate(&self, bins: &[ScanBin]) -> Vec<NoiseFloorBin> {
        match self.strategy {
            NoiseFloorStrategy::Avg => bins
                .iter()
                .map(|b| NoiseFloorBin {
                    freq_hz: b.freq_hz,
                    noise_floor_db: b.avg_db,
                })
                .collect(),
        }
    }
}

/// Estimate the noise floor of a scan CSV and write it next to its metadata.
pub fn estimate_noise_floor<P: AsRef<Path>, Q: AsRef<Path>>(
    scan_csv: P,
    out_csv: Q,
    strategy: &str,
) -> Result<Vec<NoiseFloorBin>> {
    let estimator = NoiseFloorEstimator::from_name(strategy)?;
    let (meta, bins) = read_scan_csv(scan_csv)?;
    let floor = estimator.estimate(&bins);
    write_noise_floor_csv(&floor, &meta, estimator.strategy(), out_csv)?;
    Ok(floor)
}
