use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::models::{RosterEntry, ScrapeSnapshot, SemesterSummary};

/// Reads `identifier,full_name,date_of_birth` rows. Dates are `YYYY-MM-DD`.
pub fn read_roster(path: &Path) -> anyhow::Result<Vec<RosterEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open roster {}", path.display()))?;

    let mut entries = Vec::new();
    for (index, result) in reader.deserialize::<RosterEntry>().enumerate() {
        // header is line 1
        let entry = result.with_context(|| format!("roster line {}", index + 2))?;
        entries.push(entry);
    }
    Ok(entries)
}

pub fn write_snapshot(path: &Path, snapshot: &ScrapeSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<ScrapeSnapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid snapshot {}", path.display()))
}

/// A JSON array of semester summaries, oldest first.
pub fn read_semesters(path: &Path) -> anyhow::Result<Vec<SemesterSummary>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a list of semester summaries", path.display()))
}

/// `<dir>/<identifier>.json`, with anything unsafe in a file name replaced.
pub fn snapshot_path(dir: &Path, identifier: &str) -> PathBuf {
    let stem: String = identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{stem}.json"))
}
