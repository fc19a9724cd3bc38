//! Named baseline captures, keyed by tag.

use crate::file::create_output;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub tag: String,
    pub csv_path: String,
    pub created_at: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn load_profiles<P: AsRef<Path>>(path: P) -> Result<Vec<BaselineProfile>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

pub fn save_profiles<P: AsRef<Path>>(path: P, profiles: &[BaselineProfile]) -> Result<()> {
    let mut out = create_output(path.as_ref())?;
    serde_json::to_writer_pretty(&mut out, profiles)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Insert or replace the profile with the same tag, keeping the file sorted by tag.
pub fn upsert_profile<P: AsRef<Path>>(path: P, profile: BaselineProfile) -> Result<()> {
    let path = path.as_ref();
    let mut profiles: Vec<BaselineProfile> = load_profiles(path)?
        .into_iter()
        .filter(|p| p.tag != profile.tag)
        .collect();
    info!(message = "Saving baseline profile", tag = %profile.tag, csv_path = %profile.csv_path);
    profiles.push(profile);
    profiles.sort_by(|a, b| a.tag.cmp(&b.tag));
    save_profiles(path, &profiles)
}

pub fn get_profile<P: AsRef<Path>>(path: P, tag: &str) -> Result<Option<BaselineProfile>> {
    Ok(load_profiles(path)?.into_iter().find(|p| p.tag == tag))
}

/// Returns false, without touching the file, when no profile carries `tag`.
pub fn remove_profile<P: AsRef<Path>>(path: P, tag: &str) -> Result<bool> {
    let path = path.as_ref();
    let profiles = load_profiles(path)?;
    let before = profiles.len();
    let remaining: Vec<BaselineProfile> = profiles.into_iter().filter(|p| p.tag != tag).collect();
    if remaining.len() == before {
        return Ok(false);
    }
    save_profiles(path, &remaining)?;
    info!(message = "Removed baseline profile", tag);
    Ok(true)
}
