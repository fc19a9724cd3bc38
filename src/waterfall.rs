//! Time-lapse of scans over the same range, flattened into one CSV.

use crate::config::WaterfallSettings;
use crate::file::create_output;
use crate::runner::{ScanBackend, Sleeper, thread_sleeper};
use crate::sweep::ScanSettings;
use crate::types::{ConsoleWriter, LabError, Result, ScanResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallSlice {
    pub timestamp: String,
    pub slice_index: usize,
    pub scan: ScanResult,
}

pub struct Waterfall<'a> {
    settings: &'a WaterfallSettings,
    scan: &'a ScanSettings,
    backend: ScanBackend<'a>,
    console: &'a dyn ConsoleWriter,
    sleep: Sleeper<'a>,
}

impl<'a> Waterfall<'a> {
    pub fn new(
        settings: &'a WaterfallSettings,
        scan: &'a ScanSettings,
        backend: ScanBackend<'a>,
        console: &'a dyn ConsoleWriter,
    ) -> Self {
        Self {
            settings,
            scan,
            backend,
            console,
            sleep: thread_sleeper(),
        }
    }

    pub fn with_sleeper(mut self, sleep: Sleeper<'a>) -> Self {
        self.sleep = sleep;
        self
    }

    /// Take every slice in memory, pausing between slices. Nothing is written until all slices succeed.
    pub fn collect(&mut self) -> Result<Vec<WaterfallSlice>> {
        let settings = self.settings;
        if settings.slices == 0 {
            return Err(LabError::InvalidInput("slices must be positive".into()));
        }

        let mut slices = Vec::with_capacity(settings.slices);
        for idx in 0..settings.slices {
            let scan = self.backend.scan(self.scan, idx)?;
            self.console.write_debug(&format!(
                "slice {}/{} at {}",
                idx + 1,
                settings.slices,
                scan.timestamp
            ));
            slices.push(WaterfallSlice {
                timestamp: scan.timestamp.clone(),
                slice_index: idx,
                scan,
            });
            if settings.interval_ms > 0 && idx + 1 < settings.slices {
                (self.sleep)(Duration::from_millis(settings.interval_ms));
            }
        }
        Ok(slices)
    }

    pub fn run(mut self) -> Result<PathBuf> {
        let slices = self.collect()?;
        let out = self.settings.out_csv.clone();
        write_waterfall_csv(&slices, &out)?;
        self.console
            .write_info(&format!("Waterfall written to {}", out.display()));
        Ok(out)
    }
}

pub fn write_waterfall_csv<P: AsRef<Path>>(slices: &[WaterfallSlice], path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_writer(create_output(path)?);
    writer.write_record(["timestamp", "slice_index", "freq_hz", "avg_db", "max_db"])?;
    let mut rows = 0usize;
    for slice in slices {
        let index = slice.slice_index.to_string();
        for bin in &slice.scan.bins {
            writer.write_record([
                slice.timestamp.as_str(),
                index.as_str(),
                format!("{:.0}", bin.freq_hz).as_str(),
                format!("{:.2}", bin.avg_db).as_str(),
                format!("{:.2}", bin.max_db).as_str(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;
    info!(message = "Wrote waterfall CSV", path = %path.display(), slices = slices.len(), rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConsoleWriter;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;

    fn settings(out_csv: PathBuf, slices: usize, interval_ms: u64) -> WaterfallSettings {
        WaterfallSettings {
            slices,
            interval_ms,
            out_csv,
        }
    }

    #[test]
    fn test_zero_slices_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wf = settings(dir.path().join("wf.csv"), 0, 0);
        let scan = ScanSettings::new(100.0, 200.0, 10.0);
        let console = MockConsoleWriter::new();
        let err = Waterfall::new(&wf, &scan, ScanBackend::Simulated { seed: None }, &console)
            .run()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid input: slices must be positive");
        assert!(!dir.path().join("wf.csv").exists());
    }

    #[test]
    fn test_simulated_waterfall_rows() {
        let dir = tempfile::tempdir().unwrap();
        let wf = settings(dir.path().join("out/wf.csv"), 3, 0);
        let scan = ScanSettings::new(100.0, 200.0, 10.0);
        let console = MockConsoleWriter::new();
        let path = Waterfall::new(&wf, &scan, ScanBackend::Simulated { seed: Some(10) }, &console)
            .run()
            .unwrap();

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,slice_index,freq_hz,avg_db,max_db");
        assert_eq!(lines.len(), 1 + 3 * 10);
        assert!(lines[1].contains(",0,100,"));
        assert!(lines[30].contains(",2,190,"));
    }

    #[test]
    fn test_sleeps_between_slices_only() {
        let dir = tempfile::tempdir().unwrap();
        let wf = settings(dir.path().join("wf.csv"), 3, 250);
        let scan = ScanSettings::new(100.0, 200.0, 10.0);
        let console = MockConsoleWriter::new();
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        Waterfall::new(&wf, &scan, ScanBackend::Simulated { seed: Some(1) }, &console)
            .with_sleeper(Box::new(move |d: Duration| {
                assert_eq!(d, Duration::from_millis(250));
                seen.set(seen.get() + 1);
            }))
            .run()
            .unwrap();
        assert_eq!(count.get(), 2);
    }
}
