use crate::error::{Result, SpecflowError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of a formatted `TIMESTAMP_FORMAT` value.
const TIMESTAMP_LEN: usize = 15;

#[derive(Debug, Clone, Serialize)]
pub struct BackupFile {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Orders backups taken within the same second; 0 for the first.
    pub sequence: u32,
}

/// `<stem>_<YYYYMMDD_HHMMSS>.json`, or `<stem>_<YYYYMMDD_HHMMSS>_<n>.json`
/// for the n-th extra backup in the same second.
pub fn backup_name(stem: &str, at: DateTime<Utc>, sequence: u32) -> String {
    let ts = at.format(TIMESTAMP_FORMAT);
    if sequence == 0 {
        format!("{stem}_{ts}.json")
    } else {
        format!("{stem}_{ts}_{sequence}.json")
    }
}

fn parse_backup_name(stem: &str, file_name: &str) -> Option<(DateTime<Utc>, u32)> {
    let rest = file_name
        .strip_prefix(stem)?
        .strip_prefix('_')?
        .strip_suffix(".json")?;
    let ts = rest.get(..TIMESTAMP_LEN)?;
    let sequence = match rest.get(TIMESTAMP_LEN..)? {
        "" => 0,
        tail => tail.strip_prefix('_')?.parse().ok()?,
    };
    let created_at = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    Some((created_at, sequence))
}

/// First free backup path for `at`.
fn next_backup_path(backups_dir: &Path, stem: &str, at: DateTime<Utc>) -> PathBuf {
    let mut sequence = 0;
    loop {
        let path = backups_dir.join(backup_name(stem, at, sequence));
        if !path.exists() {
            return path;
        }
        sequence += 1;
    }
}

/// Backups of one resource, oldest first.
pub fn list_backups(backups_dir: &Path, stem: &str) -> Result<Vec<BackupFile>> {
    if !backups_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    let entries =
        std::fs::read_dir(backups_dir).map_err(|e| SpecflowError::storage(backups_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SpecflowError::storage(backups_dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some((created_at, sequence)) = parse_backup_name(stem, &name) {
            backups.push(BackupFile {
                path: entry.path(),
                created_at,
                sequence,
            });
        }
    }
    backups.sort_by_key(|b| (b.created_at, b.sequence));
    Ok(backups)
}

/// Copy `source` into the backups directory and prune to the newest
/// `max_backups`. Does nothing when `source` is missing or `max_backups` is 0.
pub fn create_backup(
    source: &Path,
    backups_dir: &Path,
    stem: &str,
    max_backups: usize,
) -> Result<Option<PathBuf>> {
    if max_backups == 0 || !source.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(backups_dir).map_err(|e| SpecflowError::storage(backups_dir, e))?;

    // Make room first so the count never exceeds the limit, even briefly.
    prune_backups(backups_dir, stem, max_backups.saturating_sub(1))?;

    let dest = next_backup_path(backups_dir, stem, Utc::now());
    std::fs::copy(source, &dest).map_err(|e| SpecflowError::storage(&dest, e))?;
    Ok(Some(dest))
}

/// Delete the oldest backups of `stem` until at most `keep` remain.
pub fn prune_backups(backups_dir: &Path, stem: &str, keep: usize) -> Result<usize> {
    let backups = list_backups(backups_dir, stem)?;
    let excess = backups.len().saturating_sub(keep);
    for backup in backups.iter().take(excess) {
        std::fs::remove_file(&backup.path).map_err(|e| SpecflowError::storage(&backup.path, e))?;
    }
    Ok(excess)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
