pub mod analysis;
pub mod bookmarks;
pub mod config;
pub mod file;
pub mod logging;
pub mod monitor;
pub mod profiles;
pub mod runner;
pub mod simulator;
#[cfg(feature = "soapy")]
pub mod soapy;
pub mod spectrum;
pub mod sweep;
pub mod testing;
pub mod types;
pub mod waterfall;

pub use crate::logging::LogBuffer;
pub use crate::sweep::{ScanSettings, SweepOutput, SweepReducer};
pub use crate::types::{LabError, Result, ScanBin, ScanMeta, ScanResult, SweepStatsBin};

use clap::ValueEnum;

#[derive(ValueEnum, Copy, Clone, Debug)]
pub enum Format {
    /// JSON structured logging format
    Json,
    /// Simple text logging format
    Text,
    /// Standard log format with timestamps and levels
    Log,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::Text => write!(f, "text"),
            Format::Log => write!(f, "log"),
        }
    }
}
