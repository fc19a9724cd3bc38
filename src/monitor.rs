//! Repeated scans on a fixed interval, each persisted as a scan CSV and a run report.

use crate::bookmarks::{Bookmark, load_bookmarks, match_bookmarks_to_scan};
use crate::config::MonitorSettings;
use crate::file::{create_output, write_run_report, write_scan_csv};
use crate::runner::{ScanBackend, Sleeper, thread_sleeper};
use crate::sweep::ScanSettings;
use crate::types::{ConsoleWriter, LabError, Result, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub timestamp: String,
    pub scan_csv: String,
    pub report_json: String,
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub created_at: String,
    pub iterations: usize,
    pub interval_sec: u64,
    pub mode: String,
    pub start_hz: f64,
    pub stop_hz: f64,
    pub bin_hz: f64,
    pub records: Vec<MonitorRecord>,
}

pub struct Monitor<'a> {
    settings: &'a MonitorSettings,
    scan: &'a ScanSettings,
    backend: ScanBackend<'a>,
    bookmarks_file: Option<PathBuf>,
    console: &'a dyn ConsoleWriter,
    sleep: Sleeper<'a>,
}

impl<'a> Monitor<'a> {
    pub fn new(
        settings: &'a MonitorSettings,
        scan: &'a ScanSettings,
        backend: ScanBackend<'a>,
        console: &'a dyn ConsoleWriter,
    ) -> Self {
        Self {
            settings,
            scan,
            backend,
            bookmarks_file: None,
            console,
            sleep: thread_sleeper(),
        }
    }

    /// Attach the bookmarks that fall inside the scan range to every report.
    pub fn with_bookmarks(mut self, path: Option<PathBuf>) -> Self {
        self.bookmarks_file = path;
        self
    }

    pub fn with_sleeper(mut self, sleep: Sleeper<'a>) -> Self {
        self.sleep = sleep;
        self
    }

    fn bookmarks_for(&self, scan: &ScanResult) -> Result<Option<Vec<Bookmark>>> {
        match &self.bookmarks_file {
            Some(path) => Ok(Some(match_bookmarks_to_scan(&load_bookmarks(path)?, scan))),
            None => Ok(None),
        }
    }

    /// Run every iteration and write `summary.json`. Returns the summary path.
    ///
    /// The first failing iteration aborts the run; files already written stay on disk.
    pub fn run(mut self) -> Result<PathBuf> {
        let settings = self.settings;
        if settings.interval_sec == 0 {
            return Err(LabError::InvalidInput("interval_sec must be > 0".into()));
        }
        if settings.iterations == 0 {
            return Err(LabError::InvalidInput("iterations must be > 0".into()));
        }

        let out_dir = settings.out_dir.as_path();
        let scans_dir = out_dir.join("scans");
        let reports_dir = out_dir.join("reports");
        fs::create_dir_all(&scans_dir)?;
        fs::create_dir_all(&reports_dir)?;

        info!(
            message = "Starting monitor",
            mode = self.backend.mode(),
            iterations = settings.iterations,
            interval_sec = settings.interval_sec,
            out_dir = %out_dir.display()
        );

        let mut used_stamps = HashSet::new();
        let mut records = Vec::with_capacity(settings.iterations);

        for idx in 0..settings.iterations {
            let scan = self.backend.scan(self.scan, idx)?;

            let stamp = unique_stamp(&timestamp_slug(), idx, &scans_dir, &mut used_stamps);
            let scan_path = scans_dir.join(format!("scan_{stamp}.csv"));
            let report_path = reports_dir.join(format!("report_{stamp}.json"));

            write_scan_csv(&scan, &scan_path)?;
            let bookmarks = self.bookmarks_for(&scan)?;
            write_run_report(&scan, bookmarks.as_deref(), &report_path)?;

            self.console.write_info(&format!(
                "[{}/{}] {}",
                idx + 1,
                settings.iterations,
                scan_path.display()
            ));
            records.push(MonitorRecord {
                timestamp: scan.timestamp.clone(),
                scan_csv: scan_path.display().to_string(),
                report_json: report_path.display().to_string(),
            });

            if idx + 1 < settings.iterations {
                debug!(message = "Sleeping until next scan", seconds = settings.interval_sec);
                (self.sleep)(Duration::from_secs(settings.interval_sec));
            }
        }

        let summary = MonitorSummary {
            created_at: ScanResult::now_iso(),
            iterations: settings.iterations,
            interval_sec: settings.interval_sec,
            mode: self.backend.mode().to_string(),
            start_hz: self.scan.start_hz,
            stop_hz: self.scan.stop_hz,
            bin_hz: self.scan.bin_hz,
            records,
        };
        let summary_path = out_dir.join("summary.json");
        write_summary(&summary, &summary_path)?;
        self.console
            .write_info(&format!("Summary written to {}", summary_path.display()));
        Ok(summary_path)
    }
}

fn timestamp_slug() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Scans finishing within the same second would share a stamp; later ones get `_<idx>`.
fn unique_stamp(stamp: &str, idx: usize, scans_dir: &Path, used: &mut HashSet<String>) -> String {
    let taken = |s: &str, used: &HashSet<String>| {
        used.contains(s) || scans_dir.join(format!("scan_{s}.csv")).exists()
    };
    let stamp = if taken(stamp, used) {
        format!("{stamp}_{idx}")
    } else {
        stamp.to_string()
    };
    used.insert(stamp.clone());
    stamp
}

fn write_summary(summary: &MonitorSummary, path: &Path) -> Result<()> {
    let mut out = create_output(path)?;
    serde_json::to_writer_pretty(&mut out, summary)?;
    writeln!(out)?;
    out.flush()?;
    info!(message = "Wrote monitor summary", path = %path.display(), records = summary.records.len());
    Ok(())
}

pub fn read_summary<P: AsRef<Path>>(path: P) -> Result<MonitorSummary> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConsoleWriter;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn monitor_settings(out_dir: &Path, iterations: usize) -> MonitorSettings {
        MonitorSettings {
            interval_sec: 5,
            iterations,
            out_dir: out_dir.to_path_buf(),
        }
    }

    #[test]
    fn test_unique_stamp_suffixes_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut used = HashSet::new();
        assert_eq!(unique_stamp("20240101_000000", 0, dir.path(), &mut used), "20240101_000000");
        assert_eq!(unique_stamp("20240101_000000", 1, dir.path(), &mut used), "20240101_000000_1");
        assert_eq!(unique_stamp("20240101_000001", 2, dir.path(), &mut used), "20240101_000001");
    }

    #[test]
    fn test_rejects_zero_interval_and_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let scan = ScanSettings::new(100.0, 200.0, 10.0);
        let console = MockConsoleWriter::new();

        let mut settings = monitor_settings(dir.path(), 1);
        settings.interval_sec = 0;
        let err = Monitor::new(&settings, &scan, ScanBackend::Simulated { seed: Some(1) }, &console)
            .run()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid input: interval_sec must be > 0");

        let settings = monitor_settings(dir.path(), 0);
        assert!(
            Monitor::new(&settings, &scan, ScanBackend::Simulated { seed: Some(1) }, &console)
                .run()
                .is_err()
        );
        assert!(!dir.path().join("scans").exists());
    }

    #[test]
    fn test_sleeps_between_iterations_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = monitor_settings(dir.path(), 3);
        let scan = ScanSettings::new(100.0, 200.0, 10.0);
        let console = MockConsoleWriter::new();
        let sleeps: Rc<RefCell<Vec<Duration>>> = Rc::new(RefCell::new(Vec::new()));
        let recorded = Rc::clone(&sleeps);

        let summary_path =
            Monitor::new(&settings, &scan, ScanBackend::Simulated { seed: Some(3) }, &console)
                .with_sleeper(Box::new(move |d: Duration| recorded.borrow_mut().push(d)))
                .run()
                .unwrap();

        assert_eq!(*sleeps.borrow(), vec![Duration::from_secs(5); 2]);
        let summary = read_summary(&summary_path).unwrap();
        assert_eq!(summary.records.len(), 3);
        assert_eq!(summary.mode, "sim");
        let distinct: HashSet<&String> = summary.records.iter().map(|r| &r.scan_csv).collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(console.get_messages().len(), 4);
    }
}
