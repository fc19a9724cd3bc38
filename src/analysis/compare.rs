use super::{freq_key, index_by_freq};
use crate::file::read_scan_csv;
use crate::types::{Result, ScanBin, ScanMeta};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareBin {
    pub freq_hz: f64,
    pub delta_avg_db: f64,
    pub delta_max_db: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompareResult {
    pub bins: Vec<CompareBin>,
    /// Mean of `delta_avg_db` over matched bins; 0.0 when nothing matched.
    pub score: f64,
}

/// Per-bin deltas `b - a` for every frequency present in both scans, in scan A order.
pub fn compare_scans(
    meta_a: &ScanMeta,
    bins_a: &[ScanBin],
    meta_b: &ScanMeta,
    bins_b: &[ScanBin],
) -> Result<CompareResult> {
    meta_a.grid().ensure_matches(&meta_b.grid(), "scan")?;

    let by_freq_b = index_by_freq(bins_b);
    let bins: Vec<CompareBin> = bins_a
        .iter()
        .filter_map(|a| {
            by_freq_b.get(&freq_key(a.freq_hz)).map(|b| CompareBin {
                freq_hz: a.freq_hz,
                delta_avg_db: b.avg_db - a.avg_db,
                delta_max_db: b.max_db - a.max_db,
            })
        })
        .collect();

    let score = if bins.is_empty() {
        0.0
    } else {
        bins.iter().map(|b| b.delta_avg_db).sum::<f64>() / bins.len() as f64
    };

    Ok(CompareResult { bins, score })
}

/// Read both scan CSVs and compare them.
pub fn compare_scan_files<P: AsRef<Path>, Q: AsRef<Path>>(scan_a: P, scan_b: Q) -> Result<CompareResult> {
    let (meta_a, bins_a) = read_scan_csv(scan_a)?;
    let (meta_b, bins_b) = read_scan_csv(scan_b)?;
    compare_scans(&meta_a, &bins_a, &meta_b, &bins_b)
}
