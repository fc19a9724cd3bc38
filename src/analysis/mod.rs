//! Derived analytics over reduced scans.
//!
//! Each stage takes scans by reference and returns a new value.

pub mod alerts;
pub mod baseline;
pub mod compare;
pub mod noise_floor;

pub use alerts::{AlertEngine, AlertHit, AlertRule, load_alert_rules, write_alert_hits};
pub use baseline::{Baseline, apply_baseline, load_baseline};
pub use compare::{CompareBin, CompareResult, compare_scan_files, compare_scans};
pub use noise_floor::{
    NoiseFloorBin, NoiseFloorEstimator, NoiseFloorStrategy, estimate_noise_floor,
};

use crate::types::ScanBin;
use std::collections::HashMap;

/// Index bins by the exact bit pattern of their frequency.
///
/// Frequencies are matched exactly, never with a tolerance, so the raw bits
/// are a faithful key. `-0.0` and `0.0` are folded together.
pub(crate) fn index_by_freq(bins: &[ScanBin]) -> HashMap<u64, &ScanBin> {
    bins.iter().map(|b| (freq_key(b.freq_hz), b)).collect()
}

pub(crate) fn freq_key(freq_hz: f64) -> u64 {
    if freq_hz == 0.0 {
        0.0f64.to_bits()
    } else {
        freq_hz.to_bits()
    }
}
