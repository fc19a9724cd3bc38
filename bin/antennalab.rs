use antennalab::analysis::{
    AlertEngine, apply_baseline, compare_scan_files, estimate_noise_floor, load_alert_rules,
    load_baseline, write_alert_hits,
};
use antennalab::bookmarks::{self, Bookmark};
use antennalab::config::{
    self, ConfigFile, DeviceSettings, Gain, MonitorOverrides, MonitorSettings, ScanOverrides,
    WaterfallOverrides, WaterfallSettings,
};
use antennalab::file::{self, write_run_report, write_scan_csv, write_sweep_stats_csv};
use antennalab::logging::{self, DefaultLogger};
use antennalab::monitor::Monitor;
use antennalab::profiles::{self, BaselineProfile};
use antennalab::runner::{DefaultConsoleWriter, ScanBackend};
use antennalab::types::{ConsoleWriter, Format, LabError, Result, SourceFactory};
use antennalab::waterfall::Waterfall;
use antennalab::{ScanResult, ScanSettings};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "antennalab")]
#[command(about = "Laptop RF toolkit: spectrum scans, baselines, comparisons and alerts")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ./config/antennalab.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    /// Output format: plain text (default)
    #[arg(long, group = "output_format")]
    text: bool,

    /// Output format: JSON
    #[arg(long, group = "output_format")]
    json: bool,

    /// Output format: structured logging
    #[arg(long, group = "output_format")]
    log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show version, config and instrument information
    Info,
    /// Check that the configured instrument is usable
    Health,
    /// Take one scan and write it as CSV
    Scan(ScanCommand),
    /// Estimate the noise floor of a scan CSV
    NoiseFloor {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "avg")]
        strategy: String,
    },
    /// Per-bin deltas between two scans with the same grid
    Compare {
        #[arg(long)]
        a: PathBuf,
        #[arg(long)]
        b: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Check a scan against threshold rules
    Alerts {
        #[arg(long = "in")]
        input: PathBuf,
        /// CSV of freq_hz,threshold_db lines
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Scan repeatedly on a fixed interval
    Monitor(MonitorCommand),
    /// Collect a time-lapse of scans into one CSV
    Waterfall(WaterfallCommand),
    /// Manage frequency bookmarks
    Bookmarks {
        /// Bookmarks CSV (default: paths.bookmarks or data/bookmarks.csv)
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(subcommand)]
        action: BookmarkAction,
    },
    /// Manage named baseline captures
    Profiles {
        /// Profiles JSON (default: paths.profiles or data/baseline_profiles.json)
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    Sim,
    Real,
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[arg(long, value_enum, default_value_t = Mode::Sim)]
    mode: Mode,
    #[arg(long)]
    start_hz: Option<f64>,
    #[arg(long)]
    stop_hz: Option<f64>,
    #[arg(long)]
    bin_hz: Option<f64>,
    #[arg(long)]
    sample_rate_hz: Option<f64>,
    #[arg(long)]
    fft_size: Option<usize>,
    #[arg(long)]
    step_hz: Option<f64>,
    #[arg(long)]
    sweeps: Option<usize>,
    #[arg(long)]
    dwell_ms: Option<i64>,
    /// Value reported for bins that received no samples
    #[arg(long, allow_hyphen_values = true)]
    missing_db: Option<f64>,
    #[arg(long)]
    epsilon: Option<f64>,
    #[arg(long)]
    antenna_tag: Option<String>,
    #[arg(long)]
    location_tag: Option<String>,
    /// Simulator seed
    #[arg(long)]
    seed: Option<u64>,
    /// SoapySDR device arguments (default: driver=rtlsdr)
    #[arg(long)]
    device_args: Option<String>,
    /// Tuner gain in dB, or "auto"
    #[arg(long)]
    gain: Option<Gain>,
}

impl ScanArgs {
    fn overrides(&self) -> ScanOverrides {
        ScanOverrides {
            start_hz: self.start_hz,
            stop_hz: self.stop_hz,
            bin_hz: self.bin_hz,
            sample_rate_hz: self.sample_rate_hz,
            fft_size: self.fft_size,
            step_hz: self.step_hz,
            sweeps: self.sweeps,
            dwell_ms: self.dwell_ms,
            missing_db: self.missing_db,
            epsilon: self.epsilon,
            antenna_tag: self.antenna_tag.clone(),
            location_tag: self.location_tag.clone(),
            seed: self.seed,
        }
    }

    fn settings(&self, config: &ConfigFile) -> Result<ScanSettings> {
        ScanSettings::resolve(&self.overrides(), config)
    }

    fn device(&self, config: &ConfigFile) -> Result<DeviceSettings> {
        DeviceSettings::resolve(self.device_args.clone(), self.gain, config)
    }
}

#[derive(Args, Debug)]
struct ScanCommand {
    #[command(flatten)]
    scan: ScanArgs,
    #[arg(long)]
    out: PathBuf,
    /// Also write per-sweep min/mean/max statistics (real mode only)
    #[arg(long)]
    sweep_stats_csv: Option<PathBuf>,
    /// Subtract this baseline scan CSV before writing
    #[arg(long, conflicts_with = "baseline_profile")]
    baseline: Option<PathBuf>,
    /// Subtract the baseline saved under this profile tag
    #[arg(long)]
    baseline_profile: Option<String>,
    /// Also write a JSON run report
    #[arg(long)]
    report: Option<PathBuf>,
    /// Include bookmarks in range in the run report
    #[arg(long, requires = "report")]
    with_bookmarks: bool,
}

#[derive(Args, Debug)]
struct MonitorCommand {
    #[command(flatten)]
    scan: ScanArgs,
    #[arg(long)]
    interval_sec: Option<u64>,
    #[arg(long)]
    iterations: Option<usize>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Include bookmarks in range in every run report
    #[arg(long)]
    with_bookmarks: bool,
}

#[derive(Args, Debug)]
struct WaterfallCommand {
    #[command(flatten)]
    scan: ScanArgs,
    #[arg(long)]
    slices: Option<usize>,
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum BookmarkAction {
    List,
    Add {
        #[arg(long)]
        freq_hz: f64,
        #[arg(long)]
        label: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Remove every bookmark matching the frequency or the label
    Remove {
        #[arg(long, required_unless_present = "label")]
        freq_hz: Option<f64>,
        #[arg(long)]
        label: Option<String>,
    },
    ExportJson {
        #[arg(long)]
        out: PathBuf,
    },
    ImportJson {
        #[arg(long = "in")]
        input: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    List,
    /// Save or replace a profile pointing at a baseline scan CSV
    Set {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        notes: Option<String>,
    },
    Show {
        #[arg(long)]
        tag: String,
    },
    Remove {
        #[arg(long)]
        tag: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine format from flags (default to Text if none specified)
    let format = if cli.json {
        Format::Json
    } else if cli.log {
        Format::Log
    } else {
        Format::Text
    };
    logging::init(&DefaultLogger::new(cli.verbose, format))?;

    let config = ConfigFile::load(cli.config.as_deref())?;
    let console = DefaultConsoleWriter;

    match cli.command {
        Command::Info => cmd_info(&config),
        Command::Health => cmd_health(&config),
        Command::Scan(cmd) => cmd_scan(&cmd, &config, &console),
        Command::NoiseFloor {
            input,
            out,
            strategy,
        } => {
            let floor = estimate_noise_floor(&input, &out, &strategy)?;
            console.write_info(&format!("Noise floor ({} bins) written to {}", floor.len(), out.display()));
            Ok(())
        }
        Command::Compare { a, b, out } => {
            let result = compare_scan_files(&a, &b)?;
            file::write_compare_csv(&result, &a.display().to_string(), &b.display().to_string(), &out)?;
            println!("score: {:.3} dB over {} bins", result.score, result.bins.len());
            Ok(())
        }
        Command::Alerts { input, rules, out } => {
            let engine = AlertEngine::new(load_alert_rules(&rules)?);
            let hits = engine.evaluate_csv(&input)?;
            write_alert_hits(&hits, &out)?;
            println!("{} alert hit(s) written to {}", hits.len(), out.display());
            Ok(())
        }
        Command::Monitor(cmd) => cmd_monitor(&cmd, &config, &console),
        Command::Waterfall(cmd) => cmd_waterfall(&cmd, &config, &console),
        Command::Bookmarks { file: path, action } => {
            cmd_bookmarks(config.bookmarks_path(path)?, action)
        }
        Command::Profiles { file: path, action } => {
            cmd_profiles(config.profiles_path(path)?, action)
        }
    }
}

fn cmd_info(config: &ConfigFile) -> Result<()> {
    println!("AntennaLab {}", env!("CARGO_PKG_VERSION"));
    match config.path() {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: not found"),
    }
    println!("Instruments:");
    println!("- rtl-sdr (sdr): RTL-SDR relative spectrum scanner");
    println!(
        "  hardware support: {}",
        if cfg!(feature = "soapy") { "soapysdr" } else { "not built (simulation only)" }
    );
    if config.is_empty() {
        println!("Config contents: empty");
    } else {
        let sections: Vec<&str> = config.section_names().collect();
        println!("Config sections: {}", sections.join(", "));
    }
    println!("Config options:");
    for section in config::SECTIONS {
        if let Some(options) = config::section_options(section) {
            let mut keys: Vec<(&str, &str)> = options.entries().map(|(k, v)| (*k, *v)).collect();
            keys.sort();
            for (key, help) in keys {
                println!("  {section}.{key}: {help}");
            }
        }
    }
    Ok(())
}

fn cmd_health(config: &ConfigFile) -> Result<()> {
    match config.path() {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: not found"),
    }
    let device = DeviceSettings::resolve(None, None, config)?;
    if device.kind != config::DEFAULT_DEVICE_KIND {
        println!("rtl-sdr: ERROR - device.kind is not rtlsdr");
        return Err(LabError::Config(format!(
            "unsupported device kind `{}`",
            device.kind
        )));
    }
    println!("rtl-sdr: OK - config looks valid (gain {})", device.gain);
    probe_hardware(&device)
}

#[cfg(feature = "soapy")]
fn probe_hardware(device: &DeviceSettings) -> Result<()> {
    let labels = antennalab::soapy::enumerate_devices(&device.args)?;
    if labels.is_empty() {
        println!("hardware: no device matches `{}`", device.args);
        return Err(LabError::Device(format!("no SDR device matches `{}`", device.args)));
    }
    for label in labels {
        println!("hardware: {label}");
    }
    Ok(())
}

#[cfg(not(feature = "soapy"))]
fn probe_hardware(_device: &DeviceSettings) -> Result<()> {
    println!("hardware: check skipped, built without the soapy feature");
    Ok(())
}

#[cfg(feature = "soapy")]
fn hardware_factory(device: DeviceSettings) -> Result<Box<dyn SourceFactory>> {
    Ok(Box::new(antennalab::soapy::SoapyFactory::new(device)))
}

#[cfg(not(feature = "soapy"))]
fn hardware_factory(_device: DeviceSettings) -> Result<Box<dyn SourceFactory>> {
    Err(LabError::Device(
        "real mode needs hardware support; rebuild with --features soapy".into(),
    ))
}

/// Run `f` with the backend the scan arguments select.
fn with_backend<T>(
    args: &ScanArgs,
    config: &ConfigFile,
    f: impl FnOnce(ScanBackend<'_>) -> Result<T>,
) -> Result<T> {
    match args.mode {
        Mode::Sim => f(ScanBackend::Simulated {
            seed: config::resolve_seed(args.seed, config)?,
        }),
        Mode::Real => {
            let factory = hardware_factory(args.device(config)?)?;
            f(ScanBackend::Hardware {
                factory: factory.as_ref(),
            })
        }
    }
}

fn resolve_baseline_path(cmd: &ScanCommand, config: &ConfigFile) -> Result<Option<PathBuf>> {
    if let Some(path) = &cmd.baseline {
        return Ok(Some(path.clone()));
    }
    let Some(tag) = &cmd.baseline_profile else {
        return Ok(None);
    };
    let profiles_path = config.profiles_path(None)?;
    match profiles::get_profile(&profiles_path, tag)? {
        Some(profile) => Ok(Some(PathBuf::from(profile.csv_path))),
        None => Err(LabError::InvalidInput(format!("no baseline profile tagged `{tag}`"))),
    }
}

fn cmd_scan(cmd: &ScanCommand, config: &ConfigFile, console: &dyn ConsoleWriter) -> Result<()> {
    let mut settings = cmd.scan.settings(config)?;
    settings.collect_sweep_stats = cmd.sweep_stats_csv.is_some();
    let baseline = resolve_baseline_path(cmd, config)?
        .map(load_baseline)
        .transpose()?;

    let output = with_backend(&cmd.scan, config, |backend| backend.sweep(&settings, 0))?;
    let scan: ScanResult = match &baseline {
        Some(baseline) => apply_baseline(&output.scan, baseline)?,
        None => output.scan,
    };

    write_scan_csv(&scan, &cmd.out)?;
    console.write_info(&format!("Scan ({} bins) written to {}", scan.bins.len(), cmd.out.display()));

    if let Some(path) = &cmd.sweep_stats_csv {
        match &output.sweep_stats {
            Some(stats) => {
                write_sweep_stats_csv(stats, path)?;
                console.write_info(&format!("Sweep stats written to {}", path.display()));
            }
            None => console.write_info("Sweep stats are only available for real scans"),
        }
    }

    if let Some(path) = &cmd.report {
        let marks = if cmd.with_bookmarks {
            let all = bookmarks::load_bookmarks(config.bookmarks_path(None)?)?;
            Some(bookmarks::match_bookmarks_to_scan(&all, &scan))
        } else {
            None
        };
        write_run_report(&scan, marks.as_deref(), path)?;
        console.write_info(&format!("Run report written to {}", path.display()));
    }
    Ok(())
}

fn cmd_monitor(cmd: &MonitorCommand, config: &ConfigFile, console: &dyn ConsoleWriter) -> Result<()> {
    let scan = cmd.scan.settings(config)?;
    let settings = MonitorSettings::resolve(
        &MonitorOverrides {
            interval_sec: cmd.interval_sec,
            iterations: cmd.iterations,
            out_dir: cmd.out_dir.clone(),
        },
        config,
    )?;
    let bookmarks_file = if cmd.with_bookmarks {
        Some(config.bookmarks_path(None)?)
    } else {
        None
    };

    let summary = with_backend(&cmd.scan, config, |backend| {
        Monitor::new(&settings, &scan, backend, console)
            .with_bookmarks(bookmarks_file)
            .run()
    })?;
    println!("{}", summary.display());
    Ok(())
}

fn cmd_waterfall(cmd: &WaterfallCommand, config: &ConfigFile, console: &dyn ConsoleWriter) -> Result<()> {
    let scan = cmd.scan.settings(config)?;
    let settings = WaterfallSettings::resolve(
        &WaterfallOverrides {
            slices: cmd.slices,
            interval_ms: cmd.interval_ms,
            out_csv: cmd.out.clone(),
        },
        config,
    )?;
    let out = with_backend(&cmd.scan, config, |backend| {
        Waterfall::new(&settings, &scan, backend, console).run()
    })?;
    println!("{}", out.display());
    Ok(())
}

fn cmd_bookmarks(path: PathBuf, action: BookmarkAction) -> Result<()> {
    match action {
        BookmarkAction::List => {
            let marks = bookmarks::load_bookmarks(&path)?;
            if marks.is_empty() {
                println!("No bookmarks in {}", path.display());
            }
            for mark in marks {
                println!("{:>14.0}  {:<20}  {}", mark.freq_hz, mark.label, mark.notes);
            }
        }
        BookmarkAction::Add {
            freq_hz,
            label,
            notes,
        } => {
            bookmarks::add_bookmark(&path, Bookmark::new(freq_hz, &label, &notes))?;
            println!("Added {label} at {freq_hz:.0} Hz");
        }
        BookmarkAction::Remove { freq_hz, label } => {
            let removed = bookmarks::remove_bookmark(&path, freq_hz, label.as_deref())?;
            println!("Removed {removed} bookmark(s)");
        }
        BookmarkAction::ExportJson { out } => {
            let count = bookmarks::export_bookmarks_json(&path, &out)?;
            println!("Exported {count} bookmark(s) to {}", out.display());
        }
        BookmarkAction::ImportJson { input } => {
            let count = bookmarks::import_bookmarks_json(&path, &input)?;
            println!("Imported {count} bookmark(s) into {}", path.display());
        }
    }
    Ok(())
}

fn cmd_profiles(path: PathBuf, action: ProfileAction) -> Result<()> {
    match action {
        ProfileAction::List => {
            let all = profiles::load_profiles(&path)?;
            if all.is_empty() {
                println!("No baseline profiles in {}", path.display());
            }
            for profile in all {
                println!("{}  {}  {}", profile.tag, profile.csv_path, profile.created_at);
            }
        }
        ProfileAction::Set { tag, csv, notes } => {
            ensure_scan_csv(&csv)?;
            profiles::upsert_profile(
                &path,
                BaselineProfile {
                    tag: tag.clone(),
                    csv_path: csv.display().to_string(),
                    created_at: ScanResult::now_iso(),
                    notes,
                },
            )?;
            println!("Saved profile {tag}");
        }
        ProfileAction::Show { tag } => match profiles::get_profile(&path, &tag)? {
            Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
            None => {
                return Err(LabError::InvalidInput(format!(
                    "no baseline profile tagged `{tag}`"
                )));
            }
        },
        ProfileAction::Remove { tag } => {
            if profiles::remove_profile(&path, &tag)? {
                println!("Removed profile {tag}");
            } else {
                println!("No profile tagged {tag}");
            }
        }
    }
    Ok(())
}

/// A profile must point at a readable scan CSV.
fn ensure_scan_csv(path: &Path) -> Result<()> {
    file::read_scan_csv(path).map(|_| ())
}
