use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("incompatible data: {0}")]
    Incompatible(String),
    #[error("device error: {0}")]
    Device(String),
    #[cfg(feature = "soapy")]
    #[error(transparent)]
    Soapy(#[from] soapysdr::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
}

pub type Result<T> = std::result::Result<T, LabError>;

/// One fixed-width frequency bin of a reduced scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanBin {
    pub freq_hz: f64,
    pub avg_db: f64,
    pub max_db: f64,
}

/// A complete scan across `[start_hz, stop_hz)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub timestamp: String,
    pub start_hz: f64,
    pub stop_hz: f64,
    pub bin_hz: f64,
    pub bins: Vec<ScanBin>,
    pub antenna_tag: Option<String>,
    pub location_tag: Option<String>,
}

impl ScanResult {
    pub fn now_iso() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    pub fn meta(&self) -> ScanMeta {
        ScanMeta {
            timestamp: self.timestamp.clone(),
            start_hz: self.start_hz,
            stop_hz: self.stop_hz,
            bin_hz: self.bin_hz,
            antenna_tag: self.antenna_tag.clone(),
            location_tag: self.location_tag.clone(),
        }
    }

    pub fn from_parts(meta: ScanMeta, bins: Vec<ScanBin>) -> Self {
        Self {
            timestamp: meta.timestamp,
            start_hz: meta.start_hz,
            stop_hz: meta.stop_hz,
            bin_hz: meta.bin_hz,
            bins,
            antenna_tag: meta.antenna_tag,
            location_tag: meta.location_tag,
        }
    }

    pub fn grid(&self) -> FrequencyGrid {
        FrequencyGrid {
            start_hz: self.start_hz,
            stop_hz: self.stop_hz,
            bin_hz: self.bin_hz,
        }
    }
}

/// Scan metadata without the bins, as stored in the first two CSV rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub timestamp: String,
    pub start_hz: f64,
    pub stop_hz: f64,
    pub bin_hz: f64,
    pub antenna_tag: Option<String>,
    pub location_tag: Option<String>,
}

impl ScanMeta {
    pub fn grid(&self) -> FrequencyGrid {
        FrequencyGrid {
            start_hz: self.start_hz,
            stop_hz: self.stop_hz,
            bin_hz: self.bin_hz,
        }
    }
}

/// The `(start_hz, stop_hz, bin_hz)` tuple two scans must share to be combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyGrid {
    pub start_hz: f64,
    pub stop_hz: f64,
    pub bin_hz: f64,
}

impl FrequencyGrid {
    /// Exact equality check, field by field. `what` names the other side in the error.
    pub fn ensure_matches(&self, other: &FrequencyGrid, what: &str) -> Result<()> {
        if self.start_hz != other.start_hz {
            return Err(LabError::Incompatible(format!("{what} start_hz mismatch")));
        }
        if self.stop_hz != other.stop_hz {
            return Err(LabError::Incompatible(format!("{what} stop_hz mismatch")));
        }
        if self.bin_hz != other.bin_hz {
            return Err(LabError::Incompatible(format!("{what} bin_hz mismatch")));
        }
        Ok(())
    }
}

/// Per-bin statistics of the per-sweep averages across repeated sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepStatsBin {
    pub freq_hz: f64,
    pub sweep_avg_min_db: f64,
    pub sweep_avg_mean_db: f64,
    pub sweep_avg_max_db: f64,
}

/// Abstraction for sources of I/Q samples
pub trait SampleSource {
    /// Retune to `center_freq_hz`. Samples read afterwards come from the new center.
    fn tune(&mut self, center_freq_hz: f64, sample_rate_hz: f64) -> Result<()>;

    /// Read `sample_count` complex samples at the current tuning.
    fn read(&mut self, sample_count: usize) -> Result<Vec<Complex32>>;

    /// Release the underlying device. Called once when a scan finishes, on every exit path.
    fn deactivate(&mut self) -> Result<()>;

    fn device_args(&self) -> &str;
}

/// Opens a [`SampleSource`] for one scan invocation.
pub trait SourceFactory {
    fn open(&self, sample_rate_hz: f64) -> Result<Box<dyn SampleSource>>;
}

impl<F> SourceFactory for F
where
    F: Fn(f64) -> Result<Box<dyn SampleSource>>,
{
    fn open(&self, sample_rate_hz: f64) -> Result<Box<dyn SampleSource>> {
        self(sample_rate_hz)
    }
}

/// Output destination for user-facing progress messages.
pub trait ConsoleWriter {
    fn write_info(&self, message: &str);
    fn write_debug(&self, message: &str);
}

/// Blocking pause. Production code sleeps the thread; tests swap in a recorder.
pub type Sleeper<'a> = Box<dyn FnMut(Duration) + 'a>;

pub fn thread_sleeper<'a>() -> Sleeper<'a> {
    Box::new(thread::sleep)
}

pub trait Logger {
    fn init(&self) -> Result<()>;
}

pub use crate::Format;
