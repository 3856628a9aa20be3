use crate::error::{Result, SpecflowError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SPECFLOW_DIR: &str = ".specflow";
pub const MEMORY_DIR_NAME: &str = "memory";
pub const BACKUPS_DIR_NAME: &str = "backups";
pub const SPECS_DIR: &str = "specs";
pub const TASKS_DIR_NAME: &str = "tasks";

pub const TASK_STATES_FILE: &str = "task-states.json";
pub const TASK_PROGRESS_FILE: &str = "task-progress.json";
pub const TASK_HISTORY_FILE: &str = "task-history.json";
pub const MONITOR_CONFIG_FILE: &str = "monitor-config.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn specflow_dir(root: &Path) -> PathBuf {
    root.join(SPECFLOW_DIR)
}

pub fn memory_dir(root: &Path) -> PathBuf {
    specflow_dir(root).join(MEMORY_DIR_NAME)
}

pub fn backups_dir(memory_dir: &Path) -> PathBuf {
    memory_dir.join(BACKUPS_DIR_NAME)
}

pub fn specs_dir(root: &Path) -> PathBuf {
    root.join(SPECS_DIR)
}

/// Locate `specs/<feature_id>` or `specs/<feature_id>-<name>`.
pub fn feature_dir(root: &Path, feature_id: &str) -> Option<PathBuf> {
    let specs = specs_dir(root);
    let exact = specs.join(feature_id);
    if exact.is_dir() {
        return Some(exact);
    }
    let prefix = format!("{feature_id}-");
    let mut matches: Vec<PathBuf> = std::fs::read_dir(&specs)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

pub fn tasks_dir(root: &Path, feature_id: &str) -> Option<PathBuf> {
    feature_dir(root, feature_id).map(|dir| dir.join(TASKS_DIR_NAME))
}

/// Feature directories under `specs/`, returned as normalized feature ids.
pub fn discover_feature_ids(root: &Path) -> Result<Vec<String>> {
    let specs = specs_dir(root);
    if !specs.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&specs)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Ok(id) = normalize_feature_id(&name) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Markdown files in a feature's `tasks/` directory, sorted by name.
pub fn task_files(root: &Path, feature_id: &str) -> Result<Vec<PathBuf>> {
    let Some(dir) = tasks_dir(root, feature_id) else {
        return Ok(Vec::new());
    };
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| SpecflowError::storage(&dir, e))? {
        let path = entry.map_err(|e| SpecflowError::storage(&dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Render `path` relative to `root` with forward slashes, for storage.
pub fn relative_display(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

// ---------------------------------------------------------------------------
// Feature id validation
// ---------------------------------------------------------------------------

static FEATURE_RE: OnceLock<Regex> = OnceLock::new();

fn feature_re() -> &'static Regex {
    FEATURE_RE.get_or_init(|| Regex::new(r"^([0-9]{1,8})(?:-[a-z0-9][a-z0-9\-]*)?$").unwrap())
}

/// Accept `001` or a feature directory name like `001-user-auth`, returning `001`.
pub fn normalize_feature_id(raw: &str) -> Result<String> {
    feature_re()
        .captures(raw.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SpecflowError::InvalidFeatureId(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
