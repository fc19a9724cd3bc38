use crate::file;
use crate::types::{LabError, Result, ScanBin, ScanResult};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRule {
    pub freq_hz: f64,
    pub threshold_db: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertHit {
    pub timestamp: String,
    pub freq_hz: f64,
    pub power_db: f64,
    pub threshold_db: f64,
}

pub struct AlertEngine {
    rules: Vec<AlertRule>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Rule order first, then bin order. Only exact frequency matches fire,
    /// and the threshold is inclusive.
    pub fn evaluate(&self, bins: &[ScanBin]) -> Vec<AlertHit> {
        let now = ScanResult::now_iso();
        let mut hits = Vec::new();
        for rule in &self.rules {
            for bin in bins {
                if bin.freq_hz == rule.freq_hz && bin.max_db >= rule.threshold_db {
                    hits.push(AlertHit {
                        timestamp: now.clone(),
                        freq_hz: bin.freq_hz,
                        power_db: bin.max_db,
                        threshold_db: rule.threshold_db,
                    });
                }
            }
        }
        debug!(message = "Evaluated alert rules", rules = self.rules.len(), hits = hits.len());
        hits
    }

    pub fn evaluate_csv<P: AsRef<Path>>(&self, scan_csv: P) -> Result<Vec<AlertHit>> {
        let (_, bins) = file::read_scan_csv(scan_csv)?;
        Ok(self.evaluate(&bins))
    }
}

/// Read `freq_hz,threshold_db` lines. Blank lines and `#` comments are skipped.
pub fn load_alert_rules<P: AsRef<Path>>(path: P) -> Result<Vec<AlertRule>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(LabError::InvalidInput(format!(
            "alerts config not found: {}",
            path.display()
        )));
    }
    parse_alert_rules(&fs::read_to_string(path)?)
}

pub fn parse_alert_rules(text: &str) -> Result<Vec<AlertRule>> {
    let mut rules = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(LabError::InvalidInput(format!("invalid alert rule: {line}")));
        }
        rules.push(AlertRule {
            freq_hz: parts[0].parse()?,
            threshold_db: parts[1].parse()?,
        });
    }
    Ok(rules)
}

pub fn write_alert_hits<P: AsRef<Path>>(hits: &[AlertHit], path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_writer(file::create_output(path)?);
    writer.write_record(["timestamp", "freq_hz", "power_db", "threshold_db"])?;
    for hit in hits {
        writer.write_record([
            hit.timestamp.clone(),
            format!("{:.0}", hit.freq_hz),
            format!("{:.2}", hit.power_db),
            format!("{:.2}", hit.threshold_db),
        ])?;
    }
    writer.flush()?;
    info!(message = "Wrote alert hits", path = %path.display(), hits = hits.len());
    Ok(())
}
