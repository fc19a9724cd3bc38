//! Labeled frequencies of interest, persisted as a small CSV.

use crate::file::create_output;
use crate::types::{LabError, Result, ScanResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

const HEADER: [&str; 3] = ["freq_hz", "label", "notes"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub freq_hz: f64,
    pub label: String,
    #[serde(default)]
    pub notes: String,
}

impl Bookmark {
    pub fn new(freq_hz: f64, label: &str, notes: &str) -> Self {
        Self {
            freq_hz,
            label: label.to_string(),
            notes: notes.to_string(),
        }
    }
}

/// A missing file is an empty list.
pub fn load_bookmarks<P: AsRef<Path>>(path: P) -> Result<Vec<Bookmark>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut records = reader.records();

    if let Some(header) = records.next() {
        let header = header?;
        let matches = header.len() >= HEADER.len()
            && HEADER.iter().zip(header.iter()).all(|(e, r)| *e == r);
        if !matches {
            return Err(LabError::Incompatible(
                "unexpected bookmarks CSV header".into(),
            ));
        }
    }

    let mut bookmarks = Vec::new();
    for record in records {
        let record = record?;
        let Some(freq) = record.get(0).filter(|f| !f.is_empty()) else {
            continue;
        };
        bookmarks.push(Bookmark {
            freq_hz: freq.trim().parse()?,
            label: record.get(1).unwrap_or_default().to_string(),
            notes: record.get(2).unwrap_or_default().to_string(),
        });
    }
    debug!(message = "Loaded bookmarks", path = %path.display(), count = bookmarks.len());
    Ok(bookmarks)
}

pub fn save_bookmarks<P: AsRef<Path>>(path: P, bookmarks: &[Bookmark]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_writer(create_output(path)?);
    writer.write_record(HEADER)?;
    for bookmark in bookmarks {
        writer.write_record([
            format!("{:.0}", bookmark.freq_hz).as_str(),
            bookmark.label.as_str(),
            bookmark.notes.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn sort_by_freq(bookmarks: &mut [Bookmark]) {
    bookmarks.sort_by(|a, b| a.freq_hz.total_cmp(&b.freq_hz));
}

/// Append and keep the list ordered by frequency. Duplicates are allowed.
pub fn add_bookmark<P: AsRef<Path>>(path: P, bookmark: Bookmark) -> Result<()> {
    let path = path.as_ref();
    let mut bookmarks = load_bookmarks(path)?;
    info!(message = "Adding bookmark", freq_hz = bookmark.freq_hz, label = %bookmark.label);
    bookmarks.push(bookmark);
    sort_by_freq(&mut bookmarks);
    save_bookmarks(path, &bookmarks)
}

/// Drop every bookmark matching the frequency or the label. Returns how many were removed.
pub fn remove_bookmark<P: AsRef<Path>>(
    path: P,
    freq_hz: Option<f64>,
    label: Option<&str>,
) -> Result<usize> {
    let path = path.as_ref();
    let bookmarks = load_bookmarks(path)?;
    let before = bookmarks.len();
    let remaining: Vec<Bookmark> = bookmarks
        .into_iter()
        .filter(|b| {
            let freq_hit = freq_hz.is_some_and(|f| b.freq_hz == f);
            let label_hit = label.is_some_and(|l| b.label == l);
            !(freq_hit || label_hit)
        })
        .collect();
    save_bookmarks(path, &remaining)?;
    let removed = before - remaining.len();
    info!(message = "Removed bookmarks", removed);
    Ok(removed)
}

pub fn export_bookmarks_json<P: AsRef<Path>, Q: AsRef<Path>>(csv_path: P, json_path: Q) -> Result<usize> {
    let bookmarks = load_bookmarks(csv_path)?;
    let mut out = create_output(json_path.as_ref())?;
    serde_json::to_writer_pretty(&mut out, &bookmarks)?;
    writeln!(out)?;
    out.flush()?;
    Ok(bookmarks.len())
}

/// Append the bookmarks from a JSON array to the CSV list, then re-sort. Returns the number imported.
pub fn import_bookmarks_json<P: AsRef<Path>, Q: AsRef<Path>>(csv_path: P, json_path: Q) -> Result<usize> {
    let imported: Vec<Bookmark> = serde_json::from_str(&fs::read_to_string(json_path)?)?;
    let count = imported.len();
    let mut bookmarks = load_bookmarks(csv_path.as_ref())?;
    bookmarks.extend(imported);
    sort_by_freq(&mut bookmarks);
    save_bookmarks(csv_path, &bookmarks)?;
    Ok(count)
}

/// Bookmarks within `[start_hz, stop_hz]`, both ends inclusive.
pub fn match_bookmarks_to_range(bookmarks: &[Bookmark], start_hz: f64, stop_hz: f64) -> Vec<Bookmark> {
    bookmarks
        .iter()
        .filter(|b| b.freq_hz >= start_hz && b.freq_hz <= stop_hz)
        .cloned()
        .collect()
}

pub fn match_bookmarks_to_scan(bookmarks: &[Bookmark], scan: &ScanResult) -> Vec<Bookmark> {
    match_bookmarks_to_range(bookmarks, scan.start_hz, scan.stop_hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_bookmarks(dir.path().join("none.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_add_keeps_sorted_and_allows_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/bookmarks.csv");
        add_bookmark(&path, Bookmark::new(101.1e6, "b", "")).unwrap();
        add_bookmark(&path, Bookmark::new(99.5e6, "a", "local, fm")).unwrap();
        add_bookmark(&path, Bookmark::new(101.1e6, "b", "again")).unwrap();

        let marks = load_bookmarks(&path).unwrap();
        let freqs: Vec<f64> = marks.iter().map(|b| b.freq_hz).collect();
        assert_eq!(freqs, vec![99.5e6, 101.1e6, 101.1e6]);
        assert_eq!(marks[0].notes, "local, fm");
    }

    #[test]
    fn test_remove_by_frequency_or_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmarks.csv");
        save_bookmarks(
            &path,
            &[
                Bookmark::new(100e6, "x", ""),
                Bookmark::new(101e6, "y", ""),
                Bookmark::new(102e6, "x", ""),
                Bookmark::new(103e6, "z", ""),
            ],
        )
        .unwrap();
        assert_eq!(remove_bookmark(&path, None, Some("x")).unwrap(), 2);
        assert_eq!(remove_bookmark(&path, Some(103e6), None).unwrap(), 1);
        assert_eq!(remove_bookmark(&path, Some(1.0), Some("nope")).unwrap(), 0);
        assert_eq!(load_bookmarks(&path).unwrap(), vec![Bookmark::new(101e6, "y", "")]);
    }

    #[test]
    fn test_bad_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmarks.csv");
        fs::write(&path, "frequency,name\n1,a\n").unwrap();
        assert!(matches!(load_bookmarks(&path), Err(LabError::Incompatible(_))));
    }

    #[test]
    fn test_json_export_then_import_appends() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("bookmarks.csv");
        let json_path = dir.path().join("bookmarks.json");
        save_bookmarks(&csv_path, &[Bookmark::new(145.5e6, "calling", "2m")]).unwrap();
        assert_eq!(export_bookmarks_json(&csv_path, &json_path).unwrap(), 1);

        fs::write(
            &json_path,
            r#"[{"freq_hz": 121500000, "label": "guard"}, {"freq_hz": 162400000, "label": "wx", "notes": "noaa"}]"#,
        )
        .unwrap();
        assert_eq!(import_bookmarks_json(&csv_path, &json_path).unwrap(), 2);
        let labels: Vec<String> = load_bookmarks(&csv_path)
            .unwrap()
            .into_iter()
            .map(|b| b.label)
            .collect();
        assert_eq!(labels, vec!["guard", "calling", "wx"]);
    }

    #[test]
    fn test_range_match_is_inclusive() {
        let marks = vec![
            Bookmark::new(99.0, "below", ""),
            Bookmark::new(100.0, "start", ""),
            Bookmark::new(150.0, "mid", ""),
            Bookmark::new(200.0, "stop", ""),
            Bookmark::new(200.5, "above", ""),
        ];
        let matched = match_bookmarks_to_range(&marks, 100.0, 200.0);
        let labels: Vec<&str> = matched.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["start", "mid", "stop"]);
    }
}
