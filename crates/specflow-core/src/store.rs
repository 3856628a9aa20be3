//! Durable JSON persistence for task states, progress snapshots, history and
//! monitoring config.
//!
//! Each of the four resources lives in its own file under the memory
//! directory and has its own lock. Writes go through a same-directory temp
//! file and a rename, after copying the previous version into `backups/`.
//! There is no atomicity across resources: a caller that writes state and then
//! history holds two separate locks in sequence.

use crate::backup::{self, BackupFile};
use crate::config::MonitoringConfig;
use crate::diagnostics::{Diagnostics, ErrorCategory};
use crate::error::{Result, SpecflowError};
use crate::io;
use crate::lock::{AdvisoryLock, PlatformLock, ResourceGuard, ResourceLock, DEFAULT_LOCK_TIMEOUT};
use crate::paths;
use crate::progress::ProgressData;
use crate::task::{self, TaskHistory, TaskInfo};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type TaskStatesFile = BTreeMap<String, BTreeMap<String, TaskInfo>>;
type ProgressFile = BTreeMap<String, ProgressData>;
type HistoryFile = Vec<TaskHistory>;

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    TaskStates,
    Progress,
    History,
    Config,
}

impl Resource {
    pub fn all() -> [Resource; 4] {
        [
            Resource::TaskStates,
            Resource::Progress,
            Resource::History,
            Resource::Config,
        ]
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Resource::TaskStates => paths::TASK_STATES_FILE,
            Resource::Progress => paths::TASK_PROGRESS_FILE,
            Resource::History => paths::TASK_HISTORY_FILE,
            Resource::Config => paths::MONITOR_CONFIG_FILE,
        }
    }

    /// File name without `.json`, used to name backups.
    pub fn stem(self) -> &'static str {
        self.file_name().trim_end_matches(".json")
    }

    pub fn lock_name(self) -> &'static str {
        match self {
            Resource::TaskStates => "state",
            Resource::Progress => "progress",
            Resource::History => "history",
            Resource::Config => "config",
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    pub exists: bool,
    pub valid: bool,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub files: BTreeMap<String, FileStatus>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub file: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub backups: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub memory_dir: PathBuf,
    pub resources: Vec<ResourceStats>,
    pub features: usize,
    pub tasks: usize,
    pub history_entries: usize,
}

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub lock_timeout: Duration,
    pub platform_lock: Arc<dyn PlatformLock>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            platform_lock: Arc::new(AdvisoryLock),
        }
    }
}

impl StoreOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_platform_lock(mut self, lock: Arc<dyn PlatformLock>) -> Self {
        self.platform_lock = lock;
        self
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StateStore {
    memory_dir: PathBuf,
    state_lock: ResourceLock,
    progress_lock: ResourceLock,
    history_lock: ResourceLock,
    config_lock: ResourceLock,
    lock_timeout: Duration,
    diagnostics: Diagnostics,
}

impl StateStore {
    pub fn open(
        memory_dir: impl Into<PathBuf>,
        options: StoreOptions,
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        let memory_dir = memory_dir.into();
        io::ensure_dir(&memory_dir)?;
        let lock = |r: Resource| {
            ResourceLock::new(
                r.lock_name(),
                memory_dir.join(format!("{}.lock", r.file_name())),
                Arc::clone(&options.platform_lock),
            )
        };
        Ok(Self {
            state_lock: lock(Resource::TaskStates),
            progress_lock: lock(Resource::Progress),
            history_lock: lock(Resource::History),
            config_lock: lock(Resource::Config),
            lock_timeout: options.lock_timeout,
            memory_dir,
            diagnostics,
        })
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    pub fn backups_dir(&self) -> PathBuf {
        paths::backups_dir(&self.memory_dir)
    }

    pub fn resource_path(&self, resource: Resource) -> PathBuf {
        self.memory_dir.join(resource.file_name())
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn lock(&self, resource: Resource) -> Result<ResourceGuard<'_>> {
        let lock = match resource {
            Resource::TaskStates => &self.state_lock,
            Resource::Progress => &self.progress_lock,
            Resource::History => &self.history_lock,
            Resource::Config => &self.config_lock,
        };
        lock.acquire(self.lock_timeout)
    }

    // -----------------------------------------------------------------------
    // Raw resource I/O (callers hold the resource lock)
    // -----------------------------------------------------------------------

    fn read_resource<T: DeserializeOwned + Default>(&self, resource: Resource) -> Result<T> {
        let path = self.resource_path(resource);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(SpecflowError::storage(&path, e)),
        };
        match serde_json::from_str(&data) {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = SpecflowError::CorruptedData {
                    path,
                    reason: format!("{e}; falling back to latest backup"),
                };
                self.diagnostics.record_error(resource.file_name(), &err);
                Ok(self.recover_from_backup(resource).unwrap_or_default())
            }
        }
    }

    /// Parse the most recent backup of `resource`, if there is one and it is
    /// itself readable.
    fn recover_from_backup<T: DeserializeOwned>(&self, resource: Resource) -> Option<T> {
        let backups = match backup::list_backups(&self.backups_dir(), resource.stem()) {
            Ok(backups) => backups,
            Err(e) => {
                self.diagnostics.record_error(resource.file_name(), &e);
                return None;
            }
        };
        let Some(latest) = backups.last() else {
            self.diagnostics.record(
                ErrorCategory::CorruptedData,
                resource.file_name(),
                "no backup available, using empty default",
            );
            return None;
        };
        let parsed = std::fs::read_to_string(&latest.path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str(&data).map_err(|e| e.to_string()));
        match parsed {
            Ok(value) => {
                tracing::info!(
                    resource = resource.file_name(),
                    backup = %latest.path.display(),
                    "recovered from backup"
                );
                Some(value)
            }
            Err(e) => {
                self.diagnostics.record(
                    ErrorCategory::CorruptedData,
                    resource.file_name(),
                    format!("latest backup is unreadable too ({e}), using empty default"),
                );
                None
            }
        }
    }

    fn write_resource<T: Serialize>(&self, resource: Resource, value: &T, backup_limit: usize) -> Result<()> {
        let path = self.resource_path(resource);
        let mut data = serde_json::to_vec_pretty(value)?;
        data.push(b'\n');

        let existing = match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(SpecflowError::storage(&path, e)),
        };
        if let Some(existing) = existing {
            if existing == data {
                return Ok(());
            }
            // A corrupt file would displace the last good backup.
            if serde_json::from_slice::<serde_json::Value>(&existing).is_ok() {
                backup::create_backup(&path, &self.backups_dir(), resource.stem(), backup_limit)?;
            }
        }
        io::atomic_write(&path, &data)
    }

    fn backup_limit(&self) -> Result<usize> {
        Ok(self.load_config()?.backup_limit())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Replace the stored task set of `feature_id`.
    pub fn save_tasks(&self, tasks: &[TaskInfo], feature_id: &str) -> Result<()> {
        require_feature(feature_id)?;
        let backup_limit = self.backup_limit()?;
        let _guard = self.lock(Resource::TaskStates)?;
        let mut states: TaskStatesFile = self.read_resource(Resource::TaskStates)?;
        states.insert(
            feature_id.to_string(),
            tasks.iter().map(|t| (t.id.clone(), t.clone())).collect(),
        );
        self.write_resource(Resource::TaskStates, &states, backup_limit)
    }

    /// Stored tasks of `feature_id` in id order. Unknown or empty feature
    /// ids yield an empty list.
    pub fn load_tasks(&self, feature_id: &str) -> Result<Vec<TaskInfo>> {
        if feature_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.lock(Resource::TaskStates)?;
        let mut states: TaskStatesFile = self.read_resource(Resource::TaskStates)?;
        let mut tasks: Vec<TaskInfo> = states
            .remove(feature_id)
            .map(|m| m.into_values().collect())
            .unwrap_or_default();
        task::sort_tasks(&mut tasks);
        Ok(tasks)
    }

    /// Read-modify-write of one feature's tasks under a single hold of the
    /// state lock. The file is only rewritten when `f` changed something.
    pub fn update_tasks<R>(
        &self,
        feature_id: &str,
        f: impl FnOnce(&mut Vec<TaskInfo>) -> R,
    ) -> Result<R> {
        require_feature(feature_id)?;
        let backup_limit = self.backup_limit()?;
        let _guard = self.lock(Resource::TaskStates)?;
        let mut states: TaskStatesFile = self.read_resource(Resource::TaskStates)?;
        let before = states.get(feature_id).cloned();

        let mut tasks: Vec<TaskInfo> = before
            .clone()
            .map(|m| m.into_values().collect())
            .unwrap_or_default();
        task::sort_tasks(&mut tasks);
        let result = f(&mut tasks);

        let after: BTreeMap<String, TaskInfo> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let changed = match &before {
            Some(before) => serde_json::to_value(before)? != serde_json::to_value(&after)?,
            None => !after.is_empty(),
        };
        if changed {
            states.insert(feature_id.to_string(), after);
            self.write_resource(Resource::TaskStates, &states, backup_limit)?;
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    pub fn save_progress(&self, progress: &ProgressData) -> Result<()> {
        require_feature(progress.feature_id())?;
        let backup_limit = self.backup_limit()?;
        let _guard = self.lock(Resource::Progress)?;
        let mut all: ProgressFile = self.read_resource(Resource::Progress)?;
        all.insert(progress.feature_id().to_string(), progress.clone());
        self.write_resource(Resource::Progress, &all, backup_limit)
    }

    pub fn load_progress(&self, feature_id: &str) -> Result<Option<ProgressData>> {
        if feature_id.trim().is_empty() {
            return Ok(None);
        }
        let _guard = self.lock(Resource::Progress)?;
        let mut all: ProgressFile = self.read_resource(Resource::Progress)?;
        Ok(all.remove(feature_id))
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Append `entry` for `feature_id` and drop entries older than the
    /// retention window.
    pub fn append_history(&self, entry: &TaskHistory, feature_id: &str) -> Result<()> {
        require_feature(feature_id)?;
        let config = self.load_config()?;
        let _guard = self.lock(Resource::History)?;
        let mut history: HistoryFile = self.read_resource(Resource::History)?;

        let mut scoped = entry.clone();
        scoped.task_id = scoped_task_id(feature_id, &entry.task_id);
        history.push(scoped);
        prune_expired(&mut history, config.history_retention_days);

        self.write_resource(Resource::History, &history, config.backup_limit())
    }

    /// History of `feature_id` in chronological order, task ids unscoped.
    /// `limit` keeps only the most recent entries. An empty feature id never
    /// matches anything.
    pub fn load_history(&self, feature_id: &str, limit: Option<usize>) -> Result<Vec<TaskHistory>> {
        if feature_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let prefix = format!("{feature_id}/");
        let _guard = self.lock(Resource::History)?;
        let history: HistoryFile = self.read_resource(Resource::History)?;

        let mut entries: Vec<TaskHistory> = history
            .into_iter()
            .filter_map(|mut entry| {
                let local = entry.task_id.strip_prefix(&prefix)?.to_string();
                entry.task_id = local;
                Some(entry)
            })
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Config
    // -----------------------------------------------------------------------

    pub fn save_config(&self, config: &MonitoringConfig) -> Result<()> {
        config.ensure_valid()?;
        let _guard = self.lock(Resource::Config)?;
        self.write_resource(Resource::Config, config, config.backup_limit())
    }

    /// Stored config, defaults when absent. Invalid values are fatal.
    pub fn load_config(&self) -> Result<MonitoringConfig> {
        let config = self.read_config()?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Stored config without validation, for reporting what is wrong with it.
    pub fn read_config(&self) -> Result<MonitoringConfig> {
        let _guard = self.lock(Resource::Config)?;
        self.read_resource(Resource::Config)
    }

    // -----------------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------------

    /// Feature ids with stored tasks or progress.
    pub fn list_features(&self) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        {
            let _guard = self.lock(Resource::TaskStates)?;
            let states: TaskStatesFile = self.read_resource(Resource::TaskStates)?;
            ids.extend(states.into_keys());
        }
        {
            let _guard = self.lock(Resource::Progress)?;
            let progress: ProgressFile = self.read_resource(Resource::Progress)?;
            ids.extend(progress.into_keys());
        }
        Ok(ids.into_iter().collect())
    }

    /// Remove every trace of `feature_id`. Returns whether anything existed.
    pub fn reset_feature(&self, feature_id: &str) -> Result<bool> {
        require_feature(feature_id)?;
        let backup_limit = self.backup_limit()?;
        let mut removed = false;
        {
            let _guard = self.lock(Resource::TaskStates)?;
            let mut states: TaskStatesFile = self.read_resource(Resource::TaskStates)?;
            if states.remove(feature_id).is_some() {
                removed = true;
                self.write_resource(Resource::TaskStates, &states, backup_limit)?;
            }
        }
        {
            let _guard = self.lock(Resource::Progress)?;
            let mut progress: ProgressFile = self.read_resource(Resource::Progress)?;
            if progress.remove(feature_id).is_some() {
                removed = true;
                self.write_resource(Resource::Progress, &progress, backup_limit)?;
            }
        }
        {
            let prefix = format!("{feature_id}/");
            let _guard = self.lock(Resource::History)?;
            let mut history: HistoryFile = self.read_resource(Resource::History)?;
            let before = history.len();
            history.retain(|e| !e.task_id.starts_with(&prefix));
            if history.len() != before {
                removed = true;
                self.write_resource(Resource::History, &history, backup_limit)?;
            }
        }
        if removed {
            tracing::info!(feature = feature_id, "feature state reset");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Inspect all four resource files. Missing files are valid; files that do
    /// not parse into their expected shape are reported in `issues`.
    pub fn validate_integrity(&self) -> IntegrityReport {
        let mut files = BTreeMap::new();
        let mut issues = Vec::new();
        for resource in Resource::all() {
            let path = self.resource_path(resource);
            let status = match resource {
                Resource::TaskStates => check_file::<TaskStatesFile>(&path),
                Resource::Progress => check_file::<ProgressFile>(&path),
                Resource::History => check_file::<HistoryFile>(&path),
                Resource::Config => check_file::<MonitoringConfig>(&path),
            };
            if let Some(error) = &status.error {
                issues.push(format!("{}: {error}", resource.file_name()));
            }
            files.insert(resource.file_name().to_string(), status);
        }
        IntegrityReport {
            valid: issues.is_empty(),
            files,
            issues,
        }
    }

    pub fn list_backups(&self, resource: Resource) -> Result<Vec<BackupFile>> {
        backup::list_backups(&self.backups_dir(), resource.stem())
    }

    pub fn storage_stats(&self) -> Result<StorageStats> {
        let mut resources = Vec::new();
        for resource in Resource::all() {
            let path = self.resource_path(resource);
            let meta = std::fs::metadata(&path).ok();
            resources.push(ResourceStats {
                file: resource.file_name().to_string(),
                exists: meta.is_some(),
                size_bytes: meta.map(|m| m.len()).unwrap_or(0),
                backups: self.list_backups(resource)?.len(),
            });
        }
        let (features, tasks) = {
            let _guard = self.lock(Resource::TaskStates)?;
            let states: TaskStatesFile = self.read_resource(Resource::TaskStates)?;
            (states.len(), states.values().map(|m| m.len()).sum())
        };
        let history_entries = {
            let _guard = self.lock(Resource::History)?;
            self.read_resource::<HistoryFile>(Resource::History)?.len()
        };
        Ok(StorageStats {
            memory_dir: self.memory_dir.clone(),
            resources,
            features,
            tasks,
            history_entries,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_feature(feature_id: &str) -> Result<()> {
    if feature_id.trim().is_empty() || feature_id.contains('/') {
        return Err(SpecflowError::InvalidFeatureId(feature_id.to_string()));
    }
    Ok(())
}

/// History entries are stored as `<feature_id>/<task_id>`.
fn scoped_task_id(feature_id: &str, task_id: &str) -> String {
    let prefix = format!("{feature_id}/");
    if task_id.starts_with(&prefix) {
        task_id.to_string()
    } else {
        format!("{prefix}{task_id}")
    }
}

fn prune_expired(history: &mut HistoryFile, retention_days: u32) {
    let cutoff = Utc::now()
        .checked_sub_signed(ChronoDuration::days(i64::from(retention_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    history.retain(|e| e.timestamp >= cutoff);
}

fn check_file<T: DeserializeOwned>(path: &Path) -> FileStatus {
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    match std::fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileStatus {
            exists: false,
            valid: true,
            size_bytes: 0,
            error: None,
        },
        Err(e) => FileStatus {
            exists: true,
            valid: false,
            size_bytes,
            error: Some(format!("unreadable: {e}")),
        },
        Ok(data) => match serde_json::from_str::<T>(&data) {
            Ok(_) => FileStatus {
                exists: true,
                valid: true,
                size_bytes,
                error: None,
            },
            Err(e) => FileStatus {
                exists: true,
                valid: false,
                size_bytes,
                error: Some(format!("invalid JSON: {e}")),
            },
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
