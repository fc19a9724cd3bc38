//! On-disk formats for scans and their derived products.
//!
//! Scan CSVs carry a metadata header and value row, followed by a bins header
//! and one row per bin. Writers create missing parent directories.

use crate::analysis::{CompareResult, NoiseFloorBin, NoiseFloorStrategy};
use crate::bookmarks::Bookmark;
use crate::types::{LabError, Result, ScanBin, ScanMeta, ScanResult, SweepStatsBin};
use serde_json::json;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const META_HEADER: [&str; 6] = [
    "timestamp",
    "start_hz",
    "stop_hz",
    "bin_hz",
    "antenna_tag",
    "location_tag",
];
const BINS_HEADER: [&str; 3] = ["freq_hz", "avg_db", "max_db"];

/// Open `path` for writing, creating its parent directories first.
pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(create_output(path)?))
}

fn meta_values(meta: &ScanMeta) -> [String; 6] {
    [
        meta.timestamp.clone(),
        meta.start_hz.to_string(),
        meta.stop_hz.to_string(),
        meta.bin_hz.to_string(),
        meta.antenna_tag.clone().unwrap_or_default(),
        meta.location_tag.clone().unwrap_or_default(),
    ]
}

pub fn write_scan_csv<P: AsRef<Path>>(scan: &ScanResult, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv_writer(path)?;
    writer.write_record(META_HEADER)?;
    writer.write_record(meta_values(&scan.meta()))?;
    writer.write_record(BINS_HEADER)?;
    for bin in &scan.bins {
        writer.write_record([
            format!("{:.0}", bin.freq_hz),
            format!("{:.2}", bin.avg_db),
            format!("{:.2}", bin.max_db),
        ])?;
    }
    writer.flush()?;
    info!(message = "Wrote scan CSV", path = %path.display(), bins = scan.bins.len());
    Ok(())
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize, what: &str) -> Result<&'a str> {
    record
        .get(idx)
        .ok_or_else(|| LabError::Incompatible(format!("{what} row is missing column {idx}")))
}

fn optional_tag(record: &csv::StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn header_matches(record: &csv::StringRecord, expected: &[&str]) -> bool {
    record.len() >= expected.len() && expected.iter().zip(record.iter()).all(|(e, r)| *e == r)
}

/// Read back a scan CSV as its metadata and bins.
///
/// Only the first four metadata columns and first three bins columns are
/// checked against the expected header. Blank rows are skipped.
pub fn read_scan_csv<P: AsRef<Path>>(path: P) -> Result<(ScanMeta, Vec<ScanBin>)> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut records = reader.records();

    let truncated = || LabError::Incompatible("scan CSV is truncated".into());

    let header = records.next().ok_or_else(truncated)??;
    if !header_matches(&header, &META_HEADER[..4]) {
        return Err(LabError::Incompatible("unexpected scan CSV header".into()));
    }
    let values = records.next().ok_or_else(truncated)??;
    let meta = ScanMeta {
        timestamp: field(&values, 0, "metadata")?.to_string(),
        start_hz: field(&values, 1, "metadata")?.trim().parse()?,
        stop_hz: field(&values, 2, "metadata")?.trim().parse()?,
        bin_hz: field(&values, 3, "metadata")?.trim().parse()?,
        antenna_tag: optional_tag(&values, 4),
        location_tag: optional_tag(&values, 5),
    };

    let bins_header = records.next().ok_or_else(truncated)??;
    if !header_matches(&bins_header, &BINS_HEADER) {
        return Err(LabError::Incompatible(
            "unexpected scan CSV bins header".into(),
        ));
    }

    let mut bins = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        bins.push(ScanBin {
            freq_hz: field(&record, 0, "bin")?.trim().parse()?,
            avg_db: field(&record, 1, "bin")?.trim().parse()?,
            max_db: field(&record, 2, "bin")?.trim().parse()?,
        });
    }

    debug!(message = "Read scan CSV", path = %path.display(), bins = bins.len());
    Ok((meta, bins))
}

pub fn scan_from_csv<P: AsRef<Path>>(path: P) -> Result<ScanResult> {
    let (meta, bins) = read_scan_csv(path)?;
    Ok(ScanResult::from_parts(meta, bins))
}

pub fn write_sweep_stats_csv<P: AsRef<Path>>(bins: &[SweepStatsBin], path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv_writer(path)?;
    writer.write_record([
        "freq_hz",
        "sweep_avg_min_db",
        "sweep_avg_mean_db",
        "sweep_avg_max_db",
    ])?;
    for bin in bins {
        writer.write_record([
            format!("{:.0}", bin.freq_hz),
            format!("{:.2}", bin.sweep_avg_min_db),
            format!("{:.2}", bin.sweep_avg_mean_db),
            format!("{:.2}", bin.sweep_avg_max_db),
        ])?;
    }
    writer.flush()?;
    info!(message = "Wrote sweep stats CSV", path = %path.display(), bins = bins.len());
    Ok(())
}

pub fn write_noise_floor_csv<P: AsRef<Path>>(
    bins: &[NoiseFloorBin],
    meta: &ScanMeta,
    strategy: NoiseFloorStrategy,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv_writer(path)?;

    let mut header: Vec<&str> = META_HEADER.to_vec();
    header.push("strategy");
    writer.write_record(&header)?;

    let mut values = meta_values(meta).to_vec();
    values.push(strategy.to_string());
    writer.write_record(&values)?;

    writer.write_record(["freq_hz", "noise_floor_db"])?;
    for bin in bins {
        writer.write_record([
            format!("{:.0}", bin.freq_hz),
            format!("{:.2}", bin.noise_floor_db),
        ])?;
    }
    writer.flush()?;
    info!(message = "Wrote noise floor CSV", path = %path.display(), strategy = %strategy);
    Ok(())
}

/// `scan_a` and `scan_b` label the inputs in the header row, usually their paths.
pub fn write_compare_csv<P: AsRef<Path>>(
    result: &CompareResult,
    scan_a: &str,
    scan_b: &str,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv_writer(path)?;
    writer.write_record(["scan_a", "scan_b", "score"])?;
    let score = format!("{:.3}", result.score);
    writer.write_record([scan_a, scan_b, score.as_str()])?;
    writer.write_record(["freq_hz", "delta_avg_db", "delta_max_db"])?;
    for bin in &result.bins {
        writer.write_record([
            format!("{:.0}", bin.freq_hz),
            format!("{:.2}", bin.delta_avg_db),
            format!("{:.2}", bin.delta_max_db),
        ])?;
    }
    writer.flush()?;
    info!(message = "Wrote compare CSV", path = %path.display(), score = result.score);
    Ok(())
}

fn range<I: Iterator<Item = f64>>(values: I) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn range_json(values: Option<(f64, f64)>) -> serde_json::Value {
    match values {
        Some((min, max)) => json!({ "min": min, "max": max }),
        None => json!({ "min": null, "max": null }),
    }
}

/// Summarize a scan as JSON: bin count and the spread of both power readings.
///
/// Keys are emitted in sorted order. `bookmarks` is included only when given.
pub fn write_run_report<P: AsRef<Path>>(
    scan: &ScanResult,
    bookmarks: Option<&[Bookmark]>,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let mut payload = json!({
        "timestamp": scan.timestamp,
        "start_hz": scan.start_hz,
        "stop_hz": scan.stop_hz,
        "bin_hz": scan.bin_hz,
        "antenna_tag": scan.antenna_tag,
        "location_tag": scan.location_tag,
        "bins": scan.bins.len(),
        "avg_db_range": range_json(range(scan.bins.iter().map(|b| b.avg_db))),
        "max_db_range": range_json(range(scan.bins.iter().map(|b| b.max_db))),
    });
    if let Some(bookmarks) = bookmarks {
        payload["bookmarks"] = serde_json::to_value(bookmarks)?;
    }

    let mut out = create_output(path)?;
    serde_json::to_writer_pretty(&mut out, &payload)?;
    writeln!(out)?;
    out.flush()?;
    info!(message = "Wrote run report", path = %path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CompareBin;

    fn sample_scan() -> ScanResult {
        ScanResult {
            timestamp: "2024-05-01T12:00:00+00:00".into(),
            start_hz: 100e6,
            stop_hz: 100.03e6,
            bin_hz: 10e3,
            bins: vec![
                ScanBin { freq_hz: 100e6, avg_db: -50.123, max_db: -40.456 },
                ScanBin { freq_hz: 100.01e6, avg_db: -51.0, max_db: -41.0 },
                ScanBin { freq_hz: 100.02e6, avg_db: -120.0, max_db: -120.0 },
            ],
            antenna_tag: Some("discone".into()),
            location_tag: None,
        }
    }

    #[test]
    fn test_scan_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/scan.csv");
        let scan = sample_scan();
        write_scan_csv(&scan, &path).unwrap();

        let back = scan_from_csv(&path).unwrap();
        assert_eq!(back.timestamp, scan.timestamp);
        assert_eq!(back.grid(), scan.grid());
        assert_eq!(back.antenna_tag.as_deref(), Some("discone"));
        assert_eq!(back.location_tag, None);
        assert_eq!(back.bins.len(), 3);
        assert_eq!(back.bins[0].freq_hz, 100e6);
        assert_eq!(back.bins[0].avg_db, -50.12);
        assert_eq!(back.bins[0].max_db, -40.46);
    }

    #[test]
    fn test_scan_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.csv");
        write_scan_csv(&sample_scan(), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,start_hz,stop_hz,bin_hz,antenna_tag,location_tag");
        assert_eq!(lines[1], "2024-05-01T12:00:00+00:00,100000000,100030000,10000,discone,");
        assert_eq!(lines[2], "freq_hz,avg_db,max_db");
        assert_eq!(lines[3], "100000000,-50.12,-40.46");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn test_read_rejects_bad_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "when,start_hz,stop_hz,bin_hz\nx,1,2,1\n").unwrap();
        let err = read_scan_csv(&path).unwrap_err();
        assert_eq!(err.to_string(), "incompatible data: unexpected scan CSV header");

        fs::write(
            &path,
            "timestamp,start_hz,stop_hz,bin_hz,antenna_tag,location_tag\nt,1,2,1,,\nfreq,avg_db,max_db\n",
        )
        .unwrap();
        let err = read_scan_csv(&path).unwrap_err();
        assert_eq!(err.to_string(), "incompatible data: unexpected scan CSV bins header");
    }

    #[test]
    fn test_read_tolerates_python_style_floats_and_blank_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.csv");
        fs::write(
            &path,
            "timestamp,start_hz,stop_hz,bin_hz,antenna_tag,location_tag\n\
             t,100.0,120.0,10.0,,roof\n\
             freq_hz,avg_db,max_db\n\
             100,-50.00,-40.00\n\
             \n\
             110,-52.00,-41.00\n",
        )
        .unwrap();
        let (meta, bins) = read_scan_csv(&path).unwrap();
        assert_eq!(meta.start_hz, 100.0);
        assert_eq!(meta.antenna_tag, None);
        assert_eq!(meta.location_tag.as_deref(), Some("roof"));
        assert_eq!(bins.len(), 2);
    }

    #[test]
    fn test_truncated_scan_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        fs::write(&path, "timestamp,start_hz,stop_hz,bin_hz,antenna_tag,location_tag\n").unwrap();
        assert!(matches!(read_scan_csv(&path), Err(LabError::Incompatible(_))));
    }

    #[test]
    fn test_compare_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmp.csv");
        let result = CompareResult {
            bins: vec![CompareBin { freq_hz: 100.0, delta_avg_db: 2.0, delta_max_db: 1.0 }],
            score: 2.5,
        };
        write_compare_csv(&result, "a.csv", "b.csv", &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "scan_a,scan_b,score\na.csv,b.csv,2.500\nfreq_hz,delta_avg_db,delta_max_db\n100,2.00,1.00\n"
        );
    }

    #[test]
    fn test_noise_floor_csv_has_strategy_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nf.csv");
        let scan = sample_scan();
        let bins = [NoiseFloorBin { freq_hz: 100e6, noise_floor_db: -50.123 }];
        write_noise_floor_csv(&bins, &scan.meta(), NoiseFloorStrategy::Avg, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with(",strategy"));
        assert!(lines[1].ends_with(",avg"));
        assert_eq!(lines[2], "freq_hz,noise_floor_db");
        assert_eq!(lines[3], "100000000,-50.12");
    }

    #[test]
    fn test_run_report_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_run_report(&sample_scan(), None, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["bins"], 3);
        assert_eq!(value["avg_db_range"]["min"], -120.0);
        assert_eq!(value["avg_db_range"]["max"], -50.123);
        assert_eq!(value["max_db_range"]["max"], -40.456);
        assert_eq!(value["location_tag"], serde_json::Value::Null);
        assert!(value.get("bookmarks").is_none());
    }

    #[test]
    fn test_run_report_keys_sorted_and_bookmarks_included() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut scan = sample_scan();
        scan.bins.clear();
        let marks = [Bookmark::new(100e6, "beacon", "")];
        write_run_report(&scan, Some(&marks), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let antenna = text.find("\"antenna_tag\"").unwrap();
        let timestamp = text.find("\"timestamp\"").unwrap();
        assert!(antenna < timestamp);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["bins"], 0);
        assert_eq!(value["avg_db_range"]["min"], serde_json::Value::Null);
        assert_eq!(value["bookmarks"][0]["label"], "beacon");
    }
}
