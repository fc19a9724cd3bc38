//! Layered configuration: explicit flag, then the YAML config file, then a built-in default.
//!
//! ```yaml
//! scan:
//!   start_hz: 88e6
//!   stop_hz: 108e6
//!   bin_hz: 100e3
//!   fft_size: 2048
//! device:
//!   args: driver=rtlsdr
//!   gain_db: auto
//! paths:
//!   bookmarks: data/bookmarks.csv
//! ```

use crate::sweep::{
    DEFAULT_EPSILON, DEFAULT_FFT_SIZE, DEFAULT_MISSING_DB, DEFAULT_SAMPLE_RATE_HZ, ScanSettings,
};
use crate::types::{LabError, Result};
use phf::phf_map;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/antennalab.yaml";
pub const DEFAULT_DEVICE_KIND: &str = "rtlsdr";
pub const DEFAULT_DEVICE_ARGS: &str = "driver=rtlsdr";
pub const DEFAULT_BOOKMARKS_PATH: &str = "data/bookmarks.csv";
pub const DEFAULT_PROFILES_PATH: &str = "data/baseline_profiles.json";
pub const DEFAULT_MONITOR_INTERVAL_SEC: u64 = 60;
pub const DEFAULT_MONITOR_ITERATIONS: usize = 10;
pub const DEFAULT_WATERFALL_SLICES: usize = 10;
pub const DEFAULT_WATERFALL_INTERVAL_MS: u64 = 1000;

static SCAN_OPTIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "start_hz" => "first frequency of the scan range",
    "stop_hz" => "end of the scan range, exclusive",
    "bin_hz" => "width of one output bin",
    "sample_rate_hz" => "device sample rate",
    "fft_size" => "samples per acquisition",
    "step_hz" => "retune step, defaults to 0.8 x sample rate",
    "sweeps" => "number of full passes over the range",
    "dwell_ms" => "pause before each acquisition",
    "missing_db" => "value reported for bins without samples",
    "epsilon" => "floor added to magnitudes before the log",
    "antenna_tag" => "antenna label stored with each scan",
    "location_tag" => "location label stored with each scan",
    "seed" => "simulator seed",
};

static DEVICE_OPTIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "kind" => "instrument family, only rtlsdr is supported",
    "args" => "SoapySDR device arguments",
    "gain_db" => "tuner gain in dB, or auto",
};

static MONITOR_OPTIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "interval_sec" => "seconds between scans",
    "iterations" => "number of scans to take",
    "out_dir" => "directory receiving scans, reports and summary.json",
};

static WATERFALL_OPTIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "slices" => "number of scans in the waterfall",
    "interval_ms" => "pause after each slice",
    "out_csv" => "waterfall CSV destination",
};

static PATHS_OPTIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "bookmarks" => "bookmarks CSV",
    "profiles" => "baseline profiles JSON",
};

pub const SECTIONS: [&str; 5] = ["scan", "device", "monitor", "waterfall", "paths"];

/// Recognized keys for a config section, with a short description of each.
pub fn section_options(section: &str) -> Option<&'static phf::Map<&'static str, &'static str>> {
    match section {
        "scan" => Some(&SCAN_OPTIONS),
        "device" => Some(&DEVICE_OPTIONS),
        "monitor" => Some(&MONITOR_OPTIONS),
        "waterfall" => Some(&WATERFALL_OPTIONS),
        "paths" => Some(&PATHS_OPTIONS),
        _ => None,
    }
}

/// A parsed and validated config file. Empty when no file was found.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    path: Option<PathBuf>,
    sections: BTreeMap<String, serde_yaml::Mapping>,
}

impl ConfigFile {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `explicit`, or `./config/antennalab.yaml` when no path is given.
    ///
    /// A file that does not exist yields an empty config.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            if explicit.is_some() {
                warn!(message = "Config file not found", path = %path.display());
            }
            return Ok(Self::empty());
        }
        let mut config = Self::from_yaml_str(&fs::read_to_string(&path)?)?;
        debug!(message = "Loaded config", path = %path.display(), sections = config.sections.len());
        config.path = Some(path);
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::empty());
        }
        let root: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = match root {
            serde_yaml::Value::Null => return Ok(Self::empty()),
            serde_yaml::Value::Mapping(m) => m,
            _ => return Err(LabError::Config("config root must be a mapping".into())),
        };

        let mut sections = BTreeMap::new();
        for (name, body) in mapping {
            let name = name
                .as_str()
                .ok_or_else(|| LabError::Config("section names must be strings".into()))?
                .to_string();
            let options = section_options(&name)
                .ok_or_else(|| LabError::Config(format!("unknown config section `{name}`")))?;
            let body = match body {
                serde_yaml::Value::Null => serde_yaml::Mapping::new(),
                serde_yaml::Value::Mapping(m) => m,
                _ => {
                    return Err(LabError::Config(format!(
                        "section `{name}` must be a mapping"
                    )));
                }
            };
            for key in body.keys() {
                let key = key.as_str().ok_or_else(|| {
                    LabError::Config(format!("option names in `{name}` must be strings"))
                })?;
                if !options.contains_key(key) {
                    return Err(LabError::Config(format!(
                        "unknown option `{key}` in section `{name}`"
                    )));
                }
            }
            sections.insert(name, body);
        }
        Ok(Self {
            path: None,
            sections,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// A typed value from the file. `null` counts as absent.
    pub fn get<T: DeserializeOwned>(&self, section: &str, key: &str) -> Result<Option<T>> {
        let Some(value) = self.sections.get(section).and_then(|s| s.get(key)) else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| LabError::Config(format!("{section}.{key}: {e}")))
    }

    /// Flag first, then the config file, then `default`.
    pub fn resolve<T: DeserializeOwned>(
        &self,
        section: &str,
        key: &str,
        explicit: Option<T>,
        default: T,
    ) -> Result<T> {
        Ok(self.resolve_opt(section, key, explicit)?.unwrap_or(default))
    }

    pub fn resolve_opt<T: DeserializeOwned>(
        &self,
        section: &str,
        key: &str,
        explicit: Option<T>,
    ) -> Result<Option<T>> {
        match explicit {
            Some(value) => Ok(Some(value)),
            None => self.get(section, key),
        }
    }

    fn require<T: DeserializeOwned>(&self, section: &str, key: &str, explicit: Option<T>) -> Result<T> {
        self.resolve_opt(section, key, explicit)?.ok_or_else(|| {
            LabError::InvalidInput(format!("{key} is required (flag or {section}.{key} in config)"))
        })
    }

    pub fn bookmarks_path(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        self.resolve("paths", "bookmarks", explicit, PathBuf::from(DEFAULT_BOOKMARKS_PATH))
    }

    pub fn profiles_path(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        self.resolve("paths", "profiles", explicit, PathBuf::from(DEFAULT_PROFILES_PATH))
    }
}

/// Scan parameters supplied on the command line. `None` falls through to the config file.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub start_hz: Option<f64>,
    pub stop_hz: Option<f64>,
    pub bin_hz: Option<f64>,
    pub sample_rate_hz: Option<f64>,
    pub fft_size: Option<usize>,
    pub step_hz: Option<f64>,
    pub sweeps: Option<usize>,
    pub dwell_ms: Option<i64>,
    pub missing_db: Option<f64>,
    pub epsilon: Option<f64>,
    pub antenna_tag: Option<String>,
    pub location_tag: Option<String>,
    pub seed: Option<u64>,
}

impl ScanSettings {
    /// Build settings from flags and the `scan` config section.
    ///
    /// The range (`start_hz`, `stop_hz`, `bin_hz`) has no default and must come from one of the two.
    pub fn resolve(overrides: &ScanOverrides, config: &ConfigFile) -> Result<ScanSettings> {
        let o = overrides.clone();
        let mut settings = ScanSettings::new(
            config.require("scan", "start_hz", o.start_hz)?,
            config.require("scan", "stop_hz", o.stop_hz)?,
            config.require("scan", "bin_hz", o.bin_hz)?,
        );
        settings.sample_rate_hz =
            config.resolve("scan", "sample_rate_hz", o.sample_rate_hz, DEFAULT_SAMPLE_RATE_HZ)?;
        settings.fft_size = config.resolve("scan", "fft_size", o.fft_size, DEFAULT_FFT_SIZE)?;
        settings.step_hz = config.resolve_opt("scan", "step_hz", o.step_hz)?;
        settings.sweeps = config.resolve("scan", "sweeps", o.sweeps, 1)?;
        settings.dwell_ms = config.resolve("scan", "dwell_ms", o.dwell_ms, 0)?;
        settings.missing_db = config.resolve("scan", "missing_db", o.missing_db, DEFAULT_MISSING_DB)?;
        settings.epsilon = config.resolve("scan", "epsilon", o.epsilon, DEFAULT_EPSILON)?;
        settings.antenna_tag = config.resolve_opt("scan", "antenna_tag", o.antenna_tag)?;
        settings.location_tag = config.resolve_opt("scan", "location_tag", o.location_tag)?;
        Ok(settings)
    }
}

/// Simulator seed from the flag or `scan.seed`.
pub fn resolve_seed(explicit: Option<u64>, config: &ConfigFile) -> Result<Option<u64>> {
    config.resolve_opt("scan", "seed", explicit)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gain {
    Auto,
    Db(f64),
}

impl FromStr for Gain {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Gain::Auto);
        }
        s.trim()
            .parse::<f64>()
            .map(Gain::Db)
            .map_err(|_| LabError::InvalidInput(format!("gain must be a number or auto, got `{s}`")))
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gain::Auto => write!(f, "auto"),
            Gain::Db(db) => write!(f, "{db} dB"),
        }
    }
}

impl<'de> Deserialize<'de> for Gain {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(db) => Ok(Gain::Db(db)),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub kind: String,
    pub args: String,
    pub gain: Gain,
}

impl DeviceSettings {
    pub fn resolve(args: Option<String>, gain: Option<Gain>, config: &ConfigFile) -> Result<Self> {
        Ok(Self {
            kind: config.resolve("device", "kind", None, DEFAULT_DEVICE_KIND.to_string())?,
            args: config.resolve("device", "args", args, DEFAULT_DEVICE_ARGS.to_string())?,
            gain: config.resolve("device", "gain_db", gain, Gain::Auto)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorOverrides {
    pub interval_sec: Option<u64>,
    pub iterations: Option<usize>,
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub interval_sec: u64,
    pub iterations: usize,
    pub out_dir: PathBuf,
}

impl MonitorSettings {
    pub fn resolve(overrides: &MonitorOverrides, config: &ConfigFile) -> Result<Self> {
        let o = overrides.clone();
        Ok(Self {
            interval_sec: config.resolve(
                "monitor",
                "interval_sec",
                o.interval_sec,
                DEFAULT_MONITOR_INTERVAL_SEC,
            )?,
            iterations: config.resolve(
                "monitor",
                "iterations",
                o.iterations,
                DEFAULT_MONITOR_ITERATIONS,
            )?,
            out_dir: config.require("monitor", "out_dir", o.out_dir)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct WaterfallOverrides {
    pub slices: Option<usize>,
    pub interval_ms: Option<u64>,
    pub out_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallSettings {
    pub slices: usize,
    pub interval_ms: u64,
    pub out_csv: PathBuf,
}

impl WaterfallSettings {
    pub fn resolve(overrides: &WaterfallOverrides, config: &ConfigFile) -> Result<Self> {
        let o = overrides.clone();
        Ok(Self {
            slices: config.resolve("waterfall", "slices", o.slices, DEFAULT_WATERFALL_SLICES)?,
            interval_ms: config.resolve(
                "waterfall",
                "interval_ms",
                o.interval_ms,
                DEFAULT_WATERFALL_INTERVAL_MS,
            )?,
            out_csv: config.require("waterfall", "out_csv", o.out_csv)?,
        })
    }
}
