//! Shared plumbing for the commands that take one or more scans: where the
//! scan comes from, where progress is reported, and how pauses happen.

use crate::simulator::ScanSimulator;
use crate::sweep::{ScanSettings, SweepOutput, SweepReducer};
use crate::types::{ConsoleWriter, Result, ScanResult, SourceFactory};
pub use crate::types::{Sleeper, thread_sleeper};
use tracing::{debug, info};

/// Where scans come from for a run.
pub enum ScanBackend<'a> {
    /// Synthetic scans. Iteration `idx` is seeded with `seed + idx`.
    Simulated { seed: Option<u64> },
    /// Real sweeps through the reducer. The factory opens the device once per scan.
    Hardware { factory: &'a dyn SourceFactory },
}

impl ScanBackend<'_> {
    pub fn mode(&self) -> &'static str {
        match self {
            ScanBackend::Simulated { .. } => "sim",
            ScanBackend::Hardware { .. } => "real",
        }
    }

    /// Take the `idx`-th scan of a run.
    pub fn scan(&self, settings: &ScanSettings, idx: usize) -> Result<ScanResult> {
        Ok(self.sweep(settings, idx)?.scan)
    }

    /// Like [`ScanBackend::scan`], keeping per-sweep statistics when the reducer produced them.
    pub fn sweep(&self, settings: &ScanSettings, idx: usize) -> Result<SweepOutput> {
        match self {
            ScanBackend::Simulated { seed } => {
                let seed = seed.map(|s| s.wrapping_add(idx as u64));
                debug!(message = "Simulated scan", iteration = idx, seed = ?seed);
                let scan = ScanSimulator::new(seed).simulate_scan(
                    settings.start_hz,
                    settings.stop_hz,
                    settings.bin_hz,
                    settings.antenna_tag.clone(),
                    settings.location_tag.clone(),
                )?;
                Ok(SweepOutput {
                    scan,
                    sweep_stats: None,
                })
            }
            ScanBackend::Hardware { factory } => SweepReducer::new(settings).run(*factory),
        }
    }
}

// Default implementation for production use
pub struct DefaultConsoleWriter;

impl ConsoleWriter for DefaultConsoleWriter {
    fn write_info(&self, message: &str) {
        info!("{}", message);
    }

    fn write_debug(&self, message: &str) {
        debug!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SilentSource;
    use crate::types::SampleSource;

    #[test]
    fn test_simulated_backend_offsets_seed_by_iteration() {
        let settings = ScanSettings::new(100.0, 200.0, 10.0);
        let backend = ScanBackend::Simulated { seed: Some(7) };
        let second = backend.scan(&settings, 1).unwrap();
        let direct = ScanSimulator::new(Some(8))
            .simulate_scan(100.0, 200.0, 10.0, None, None)
            .unwrap();
        assert_eq!(second.bins, direct.bins);
        assert_eq!(backend.mode(), "sim");
    }

    #[test]
    fn test_hardware_backend_runs_the_reducer() {
        let factory = |_rate: f64| -> Result<Box<dyn SampleSource>> {
            Ok(Box::new(SilentSource::default()))
        };
        let mut settings = ScanSettings::new(100e6, 101e6, 100e3);
        settings.missing_db = -99.0;
        let backend = ScanBackend::Hardware { factory: &factory };
        let scan = backend.scan(&settings, 0).unwrap();
        assert_eq!(scan.bins.len(), 10);
        assert!(scan.bins.iter().all(|b| b.avg_db == -99.0));
        assert_eq!(backend.mode(), "real");
    }
}
