use super::{freq_key, index_by_freq};
use crate::file::read_scan_csv;
use crate::types::{Result, ScanBin, ScanMeta, ScanResult};
use std::path::Path;

/// A previously captured scan used as the reference for subtraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub meta: ScanMeta,
    pub bins: Vec<ScanBin>,
}

impl Baseline {
    pub fn new(meta: ScanMeta, bins: Vec<ScanBin>) -> Self {
        Self { meta, bins }
    }
}

/// Read a scan CSV for use as a baseline.
pub fn load_baseline<P: AsRef<Path>>(path: P) -> Result<Baseline> {
    let (meta, bins) = read_scan_csv(path)?;
    Ok(Baseline::new(meta, bins))
}

impl From<ScanResult> for Baseline {
    fn from(scan: ScanResult) -> Self {
        let meta = scan.meta();
        Self {
            meta,
            bins: scan.bins,
        }
    }
}

/// Subtract the baseline average from both readings of every matching bin.
///
/// `max_db` is offset by the baseline's average, not its max: the result is
/// the excursion above the quiet-channel level. Bins without a baseline
/// counterpart are passed through untouched.
pub fn apply_baseline(scan: &ScanResult, baseline: &Baseline) -> Result<ScanResult> {
    scan.grid().ensure_matches(&baseline.meta.grid(), "baseline")?;

    let base_by_freq = index_by_freq(&baseline.bins);
    let bins = scan
        .bins
        .iter()
        .map(|bin| match base_by_freq.get(&freq_key(bin.freq_hz)) {
            Some(base) => ScanBin {
                freq_hz: bin.freq_hz,
                avg_db: bin.avg_db - base.avg_db,
                max_db: bin.max_db - base.avg_db,
            },
            None => *bin,
        })
        .collect();

    Ok(ScanResult {
        bins,
        ..scan.clone()
    })
}
