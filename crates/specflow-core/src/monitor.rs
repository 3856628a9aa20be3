//! `Monitor` wires the store, task manager, sync engine and analytics
//! together for one project root.

use crate::analytics::{CompletionEstimate, HealthScore, ProgressEngine, TrendAnalysis, WeightedProgress};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::lock::PlatformLock;
use crate::manager::TaskManager;
use crate::parser::{MarkdownTaskParser, TaskFileParser};
use crate::paths;
use crate::progress::ProgressData;
use crate::store::{IntegrityReport, StateStore, StoreOptions};
use crate::sync::{FullSyncReport, SyncEngine, SyncReport};
use crate::task::TaskHistory;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub store: StoreOptions,
    pub parser: Arc<dyn TaskFileParser>,
    pub engine: ProgressEngine,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            store: StoreOptions::default(),
            parser: Arc::new(MarkdownTaskParser),
            engine: ProgressEngine::new(),
        }
    }
}

impl MonitorOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.store = self.store.with_lock_timeout(timeout);
        self
    }

    pub fn with_platform_lock(mut self, lock: Arc<dyn PlatformLock>) -> Self {
        self.store = self.store.with_platform_lock(lock);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn TaskFileParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_engine(mut self, engine: ProgressEngine) -> Self {
        self.engine = engine;
        self
    }
}

#[derive(Debug)]
pub struct Monitor {
    root: PathBuf,
    store: Arc<StateStore>,
    sync: Arc<SyncEngine>,
    tasks: TaskManager,
    engine: ProgressEngine,
    diagnostics: Diagnostics,
}

impl Monitor {
    /// Open the monitor for `root`, creating `.specflow/memory/` if needed.
    pub fn open(root: impl Into<PathBuf>, options: MonitorOptions) -> Result<Self> {
        let root = root.into();
        let diagnostics = Diagnostics::new();
        let store = Arc::new(StateStore::open(
            paths::memory_dir(&root),
            options.store,
            diagnostics.clone(),
        )?);
        let sync = Arc::new(SyncEngine::new(
            &root,
            Arc::clone(&store),
            Arc::clone(&options.parser),
            diagnostics.clone(),
        ));
        let tasks = TaskManager::new(
            &root,
            Arc::clone(&store),
            options.parser,
            Arc::clone(&sync),
            diagnostics.clone(),
        );
        Ok(Self {
            root,
            store,
            sync,
            tasks,
            engine: options.engine,
            diagnostics,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn engine(&self) -> &ProgressEngine {
        &self.engine
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // -----------------------------------------------------------------------
    // Analytics
    // -----------------------------------------------------------------------

    /// Recompute a feature's progress, attach the completion estimate, and
    /// persist the snapshot.
    pub fn refresh_progress(&self, feature_id: &str) -> Result<ProgressData> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let tasks = self.tasks.get_tasks(&feature_id)?;
        let history = self.store.load_history(&feature_id, None)?;
        let estimate = self.engine.estimate_completion(&tasks, &history);
        let progress = self
            .engine
            .calculate_progress(&tasks, &feature_id)?
            .with_estimated_completion(estimate.estimated_completion);
        self.store.save_progress(&progress)?;
        Ok(progress)
    }

    pub fn weighted_progress(&self, feature_id: &str) -> Result<WeightedProgress> {
        let tasks = self.tasks.get_tasks(feature_id)?;
        Ok(self.engine.calculate_weighted_progress(&tasks))
    }

    pub fn trend(&self, feature_id: &str, days: u32) -> Result<TrendAnalysis> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let tasks = self.tasks.get_tasks(&feature_id)?;
        let remaining = tasks.iter().filter(|t| !t.state.is_terminal()).count();
        let history = self.store.load_history(&feature_id, None)?;
        Ok(self.engine.analyze_trend(&history, days, remaining))
    }

    pub fn health(&self, feature_id: &str) -> Result<HealthScore> {
        let tasks = self.tasks.get_tasks(feature_id)?;
        Ok(self.engine.calculate_health_score(&tasks))
    }

    pub fn estimate(&self, feature_id: &str) -> Result<CompletionEstimate> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let tasks = self.tasks.get_tasks(&feature_id)?;
        let history = self.store.load_history(&feature_id, None)?;
        Ok(self.engine.estimate_completion(&tasks, &history))
    }

    pub fn history(&self, feature_id: &str, limit: Option<usize>) -> Result<Vec<TaskHistory>> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        self.store.load_history(&feature_id, limit)
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    pub fn full_sync(&self, feature_id: &str) -> Result<FullSyncReport> {
        let report = self.sync.full_sync(feature_id)?;
        self.tasks.invalidate(feature_id);
        Ok(report)
    }

    pub fn sync_files_to_store(&self, feature_id: &str) -> Result<SyncReport> {
        let report = self.sync.sync_from_files_to_store(feature_id)?;
        self.tasks.invalidate(feature_id);
        Ok(report)
    }

    pub fn sync_store_to_files(&self, feature_id: &str) -> Result<BTreeMap<String, bool>> {
        self.sync.sync_from_store_to_files(feature_id)
    }

    // -----------------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------------

    /// Features with a `specs/` directory or stored state.
    pub fn features(&self) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = paths::discover_feature_ids(&self.root)?.into_iter().collect();
        ids.extend(self.store.list_features()?);
        Ok(ids.into_iter().collect())
    }

    pub fn reset_feature(&self, feature_id: &str) -> Result<bool> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let removed = self.store.reset_feature(&feature_id)?;
        self.tasks.invalidate(&feature_id);
        Ok(removed)
    }

    pub fn validate(&self) -> IntegrityReport {
        self.store.validate_integrity()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ProcessLocalLock;
    use crate::types::TaskState;
    use tempfile::TempDir;

    fn project() -> (TempDir, Monitor) {
        let dir = TempDir::new().unwrap();
        let tasks = dir.path().join("specs/001-auth/tasks");
        std::fs::create_dir_all(&tasks).unwrap();
        std::fs::write(tasks.join("T001.md"), "### T001: Schema\n\n- [x] tables\n").unwrap();
        std::fs::write(tasks.join("T002.md"), "### T002: Login\n\n- [>] form\n").unwrap();
        std::fs::write(tasks.join("T003.md"), "### T003: Logout\n\n- [ ] button\n").unwrap();
        std::fs::write(
            tasks.join("T004.md"),
            "### T004: SSO\n\n- [!] provider\n  Error: no client id yet\n",
        )
        .unwrap();
        let monitor = Monitor::open(dir.path(), MonitorOptions::default()).unwrap();
        (dir, monitor)
    }

    #[test]
    fn progress_moves_from_25_to_50() {
        let (_dir, monitor) = project();
        let p = monitor.refresh_progress("001").unwrap();
        assert_eq!(p.total_tasks(), 4);
        assert_eq!(p.percentage(), 25.0);

        assert!(monitor.tasks().complete_task("001", "T002", Some(3.0)).unwrap());
        let p = monitor.refresh_progress("001").unwrap();
        assert_eq!(p.percentage(), 50.0);
        assert_eq!(monitor.store().load_progress("001").unwrap().unwrap(), p);
        assert!(p.estimated_completion().is_some());
    }

    #[test]
    fn full_sync_twice_is_clean() {
        let (dir, monitor) = project();
        monitor.tasks().discover_tasks("001").unwrap();
        // Edit a file by hand.
        let path = dir.path().join("specs/001-auth/tasks/T003.md");
        std::fs::write(&path, "### T003: Logout\n\n- [>] button\n").unwrap();

        let first = monitor.full_sync("001").unwrap();
        assert_eq!(first.discrepancy_count(), 1);
        assert_eq!(
            monitor.tasks().get_task("001", "T003").unwrap().unwrap().state,
            TaskState::InProgress
        );
        let second = monitor.full_sync("001").unwrap();
        assert_eq!(second.discrepancy_count(), 0);
    }

    #[test]
    fn full_sync_before_discovery_is_clean() {
        let (_dir, monitor) = project();
        for _ in 0..2 {
            let report = monitor.full_sync("001").unwrap();
            assert_eq!(report.discrepancy_count(), 0);
            assert_eq!(report.files_to_store.add_to_store.len(), 4);
        }
    }

    #[test]
    fn features_merge_dirs_and_store() {
        let (_dir, monitor) = project();
        monitor.tasks().create_task("7", "T001", "Loose", None).unwrap();
        assert_eq!(monitor.features().unwrap(), ["001", "7"]);
        assert!(monitor.reset_feature("7").unwrap());
        assert_eq!(monitor.features().unwrap(), ["001"]);
    }

    #[test]
    fn analytics_through_monitor() {
        let (_dir, monitor) = project();
        let weighted = monitor.weighted_progress("001").unwrap();
        assert_eq!(weighted.percentage, 37.5);
        let health = monitor.health("001").unwrap();
        assert!(health.score <= 100);
        assert_eq!(monitor.trend("001", 14).unwrap().total_completions, 0);
        assert!(monitor.history("001", Some(5)).unwrap().is_empty());
        assert!(monitor.validate().valid);
    }

    #[test]
    fn options_are_applied() {
        let dir = TempDir::new().unwrap();
        let monitor = Monitor::open(
            dir.path(),
            MonitorOptions::default()
                .with_platform_lock(Arc::new(ProcessLocalLock))
                .with_lock_timeout(Duration::from_millis(250)),
        )
        .unwrap();
        assert!(monitor.store().memory_dir().ends_with(".specflow/memory"));
        assert!(monitor.features().unwrap().is_empty());
    }
}
