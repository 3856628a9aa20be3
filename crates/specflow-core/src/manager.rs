//! Task discovery, merge with the store, caching, and state transitions.

use crate::diagnostics::{Diagnostics, ErrorCategory};
use crate::error::{Result, SpecflowError};
use crate::parser::{self, TaskFileParser};
use crate::paths;
use crate::store::StateStore;
use crate::sync::SyncEngine;
use crate::task::{self, TaskHistory, TaskInfo};
use crate::types::TaskState;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CacheEntry {
    tasks: Vec<TaskInfo>,
    loaded_at: Instant,
}

impl CacheEntry {
    fn new(tasks: Vec<TaskInfo>) -> Self {
        Self {
            tasks,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

// ---------------------------------------------------------------------------
// Transition requests
// ---------------------------------------------------------------------------

/// A state change with its call-site preconditions.
#[derive(Debug, Clone)]
struct Transition {
    target: TaskState,
    /// States the task must currently be in; `None` defers to the domain rule.
    allowed_from: Option<&'static [TaskState]>,
    error_message: Option<String>,
    notes: Option<String>,
    execution_time: Option<f64>,
}

impl Transition {
    fn to(target: TaskState) -> Self {
        Self {
            target,
            allowed_from: None,
            error_message: None,
            notes: None,
            execution_time: None,
        }
    }

    fn only_from(mut self, states: &'static [TaskState]) -> Self {
        self.allowed_from = Some(states);
        self
    }
}

const START_FROM: &[TaskState] = &[TaskState::Pending, TaskState::Failed, TaskState::Cancelled];
const COMPLETE_FROM: &[TaskState] = &[TaskState::Pending, TaskState::InProgress];
const BLOCK_FROM: &[TaskState] = &[TaskState::Pending, TaskState::InProgress];

// ---------------------------------------------------------------------------
// TaskManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TaskManager {
    root: PathBuf,
    store: Arc<StateStore>,
    parser: Arc<dyn TaskFileParser>,
    sync: Arc<SyncEngine>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    diagnostics: Diagnostics,
}

impl TaskManager {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<StateStore>,
        parser: Arc<dyn TaskFileParser>,
        sync: Arc<SyncEngine>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            parser,
            sync,
            cache: Mutex::new(HashMap::new()),
            diagnostics,
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Scan the feature's task files and merge them into the store.
    ///
    /// The store keeps the state of tasks it already knows; files supply
    /// titles, descriptions and estimates. Stored tasks with no file remain.
    pub fn discover_tasks(&self, feature_id: &str) -> Result<Vec<TaskInfo>> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let config = self.store.load_config()?;
        let mut scanned =
            parser::scan_feature(&self.root, &feature_id, self.parser.as_ref(), &self.diagnostics)?;
        if scanned.len() > config.max_tasks_per_feature {
            self.diagnostics.record(
                ErrorCategory::Validation,
                &feature_id,
                format!(
                    "{} task files exceed max_tasks_per_feature ({}), extra files ignored",
                    scanned.len(),
                    config.max_tasks_per_feature
                ),
            );
            scanned.truncate(config.max_tasks_per_feature);
        }

        let merged = self.store.update_tasks(&feature_id, |stored| {
            for file in &scanned {
                let parsed = &file.parsed;
                match stored.iter_mut().find(|t| t.id == parsed.id) {
                    Some(existing) => {
                        existing.title = parsed.title.clone();
                        existing.file_path = Some(file.rel_path.clone());
                        if parsed.description.is_some() {
                            existing.description = parsed.description.clone();
                        }
                        if parsed.estimated_hours.is_some() {
                            existing.estimated_hours = parsed.estimated_hours;
                        }
                    }
                    None => stored.push(parsed.clone().into_task_info(Some(file.rel_path.clone()))),
                }
            }
            task::sort_tasks(stored);
            stored.clone()
        })?;

        tracing::debug!(
            feature = %feature_id,
            files = scanned.len(),
            tasks = merged.len(),
            "discovered tasks"
        );
        self.cache().insert(feature_id, CacheEntry::new(merged.clone()));
        Ok(merged)
    }

    /// Tasks of a feature, from cache when fresh.
    pub fn get_tasks(&self, feature_id: &str) -> Result<Vec<TaskInfo>> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let config = self.store.load_config()?;
        if let Some(ttl) = config.cache_ttl() {
            if let Some(entry) = self.cache().get(&feature_id) {
                if entry.is_fresh(ttl) {
                    return Ok(entry.tasks.clone());
                }
            }
        }
        if config.auto_discovery {
            return self.discover_tasks(&feature_id);
        }
        let stored = self.store.load_tasks(&feature_id)?;
        if stored.is_empty() {
            return self.discover_tasks(&feature_id);
        }
        self.cache().insert(feature_id, CacheEntry::new(stored.clone()));
        Ok(stored)
    }

    pub fn get_task(&self, feature_id: &str, task_id: &str) -> Result<Option<TaskInfo>> {
        let tasks = self.get_tasks(feature_id)?;
        Ok(task::find(&tasks, task_id).cloned())
    }

    /// Drop the cached entry and rediscover.
    pub fn refresh_tasks(&self, feature_id: &str) -> Result<Vec<TaskInfo>> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        self.cache().remove(&feature_id);
        self.discover_tasks(&feature_id)
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn invalidate(&self, feature_id: &str) {
        if let Ok(feature_id) = paths::normalize_feature_id(feature_id) {
            self.cache().remove(&feature_id);
        }
    }

    pub fn tasks_by_state(&self, feature_id: &str, state: TaskState) -> Result<Vec<TaskInfo>> {
        Ok(self
            .get_tasks(feature_id)?
            .into_iter()
            .filter(|t| t.state == state)
            .collect())
    }

    pub fn next_task(&self, feature_id: &str) -> Result<Option<TaskInfo>> {
        let tasks = self.get_tasks(feature_id)?;
        Ok(task::next_task(&tasks).cloned())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Apply a state change. Illegal transitions and unknown tasks return
    /// `false` and leave everything untouched.
    pub fn update_task_state(
        &self,
        feature_id: &str,
        task_id: &str,
        new_state: TaskState,
        error_message: Option<String>,
        notes: Option<String>,
    ) -> Result<bool> {
        let mut transition = Transition::to(new_state);
        transition.error_message = error_message;
        transition.notes = notes;
        self.lenient(feature_id, task_id, transition)
    }

    /// Like [`update_task_state`](Self::update_task_state) but reports
    /// rejected transitions as errors and returns the updated task.
    pub fn try_update_task_state(
        &self,
        feature_id: &str,
        task_id: &str,
        new_state: TaskState,
        error_message: Option<String>,
        notes: Option<String>,
    ) -> Result<TaskInfo> {
        let mut transition = Transition::to(new_state);
        transition.error_message = error_message;
        transition.notes = notes;
        self.apply(feature_id, task_id, transition)
    }

    pub fn start_task(&self, feature_id: &str, task_id: &str) -> Result<bool> {
        self.lenient(feature_id, task_id, Transition::to(TaskState::InProgress).only_from(START_FROM))
    }

    pub fn complete_task(&self, feature_id: &str, task_id: &str, execution_time: Option<f64>) -> Result<bool> {
        let mut transition = Transition::to(TaskState::Completed).only_from(COMPLETE_FROM);
        transition.execution_time = execution_time.filter(|h| *h >= 0.0);
        self.lenient(feature_id, task_id, transition)
    }

    pub fn block_task(&self, feature_id: &str, task_id: &str, error_message: &str) -> Result<bool> {
        let mut transition = Transition::to(TaskState::Blocked).only_from(BLOCK_FROM);
        transition.error_message = Some(error_message.to_string());
        self.lenient(feature_id, task_id, transition)
    }

    pub fn reset_task(&self, feature_id: &str, task_id: &str) -> Result<bool> {
        self.lenient(feature_id, task_id, Transition::to(TaskState::Pending))
    }

    fn lenient(&self, feature_id: &str, task_id: &str, transition: Transition) -> Result<bool> {
        match self.apply(feature_id, task_id, transition) {
            Ok(_) => Ok(true),
            Err(e @ (SpecflowError::InvalidTransition { .. } | SpecflowError::TaskNotFound(_))) => {
                tracing::debug!(feature = feature_id, task = task_id, error = %e, "transition rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn apply(&self, feature_id: &str, task_id: &str, transition: Transition) -> Result<TaskInfo> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        // Make sure files discovered so far are in the store.
        self.get_tasks(&feature_id)?;

        let outcome = self.store.update_tasks(&feature_id, |tasks| -> Result<(TaskState, TaskInfo)> {
            let task = task::find_mut(tasks, task_id)?;
            if let Some(allowed) = transition.allowed_from {
                if !allowed.contains(&task.state) {
                    return Err(SpecflowError::InvalidTransition {
                        task: task.id.clone(),
                        from: task.state.to_string(),
                        to: transition.target.to_string(),
                    });
                }
            }
            let old = task.state;
            task.transition(transition.target, transition.error_message.clone())?;
            if transition.target == TaskState::Completed {
                task.execution_time = transition.execution_time;
            }
            Ok((old, task.clone()))
        })?;
        let (old, updated) = outcome?;

        let entry = TaskHistory::new(updated.id.clone(), Some(old), updated.state)
            .with_notes(transition.notes.clone())
            .with_execution_time(updated.execution_time.filter(|_| updated.state == TaskState::Completed));
        if let Err(e) = self.store.append_history(&entry, &feature_id) {
            tracing::warn!(feature = %feature_id, task = task_id, error = %e, "history append failed");
            self.diagnostics.record_error(format!("{feature_id}/{task_id}"), &e);
        }

        self.replace_cached(&feature_id, &updated);

        if let Err(e) = self.sync.sync_task_to_file(&feature_id, &updated) {
            tracing::warn!(feature = %feature_id, task = task_id, error = %e, "task file rewrite failed");
            self.diagnostics.record_error(format!("{feature_id}/{task_id}"), &e);
        }

        tracing::info!(
            feature = %feature_id,
            task = task_id,
            from = %old,
            to = %updated.state,
            "task state changed"
        );
        Ok(updated)
    }

    fn replace_cached(&self, feature_id: &str, updated: &TaskInfo) {
        let mut cache = self.cache();
        if let Some(entry) = cache.get_mut(feature_id) {
            match entry.tasks.iter_mut().find(|t| t.id == updated.id) {
                Some(slot) => *slot = updated.clone(),
                None => {
                    entry.tasks.push(updated.clone());
                    task::sort_tasks(&mut entry.tasks);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Task list edits
    // -----------------------------------------------------------------------

    /// Add a store-only task. Fails if the id is taken or the feature is full.
    pub fn create_task(
        &self,
        feature_id: &str,
        task_id: &str,
        title: &str,
        estimated_hours: Option<f64>,
    ) -> Result<TaskInfo> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let task_id = task_id.trim();
        if task_id.is_empty() || task_id.contains('/') {
            return Err(SpecflowError::Validation(format!("invalid task id '{task_id}'")));
        }
        let config = self.store.load_config()?;
        let mut task = TaskInfo::new(task_id, title.trim());
        task.estimated_hours = estimated_hours.filter(|h| *h > 0.0);

        self.store.update_tasks(&feature_id, |tasks| -> Result<()> {
            if task::find(tasks, task_id).is_some() {
                return Err(SpecflowError::Validation(format!(
                    "task {task_id} already exists in feature {feature_id}"
                )));
            }
            if tasks.len() >= config.max_tasks_per_feature {
                return Err(SpecflowError::Validation(format!(
                    "feature {feature_id} already has {} tasks (max_tasks_per_feature)",
                    tasks.len()
                )));
            }
            tasks.push(task.clone());
            task::sort_tasks(tasks);
            Ok(())
        })??;

        let entry = TaskHistory::new(task.id.clone(), None, task.state)
            .with_notes(Some("created".to_string()));
        if let Err(e) = self.store.append_history(&entry, &feature_id) {
            self.diagnostics.record_error(format!("{feature_id}/{task_id}"), &e);
        }
        self.invalidate(&feature_id);
        Ok(task)
    }

    /// Remove a task from the store. Its markdown file, if any, is left in
    /// place and will be rediscovered.
    pub fn delete_task(&self, feature_id: &str, task_id: &str) -> Result<bool> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let removed = self.store.update_tasks(&feature_id, |tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != task_id);
            tasks.len() != before
        })?;
        if removed {
            self.invalidate(&feature_id);
            tracing::info!(feature = %feature_id, task = task_id, "task deleted");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoringConfig;
    use crate::parser::{MarkdownTaskParser, ParsedTask};
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    /// Parser that answers from a table keyed by file stem.
    #[derive(Debug, Default)]
    struct TableParser(HashMap<String, ParsedTask>);

    impl TaskFileParser for TableParser {
        fn parse(&self, file_stem: &str, _content: &str) -> Option<ParsedTask> {
            self.0.get(file_stem).cloned()
        }
    }

    struct Fixture {
        dir: TempDir,
        store: Arc<StateStore>,
        manager: TaskManager,
        diagnostics: Diagnostics,
    }

    impl Fixture {
        fn with_parser(parser: Arc<dyn TaskFileParser>) -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("specs/001-auth/tasks")).unwrap();
            let diagnostics = Diagnostics::new();
            let store = Arc::new(
                StateStore::open(
                    paths::memory_dir(dir.path()),
                    StoreOptions::default(),
                    diagnostics.clone(),
                )
                .unwrap(),
            );
            let sync = Arc::new(SyncEngine::new(
                dir.path(),
                Arc::clone(&store),
                Arc::clone(&parser),
                diagnostics.clone(),
            ));
            let manager = TaskManager::new(
                dir.path(),
                Arc::clone(&store),
                parser,
                sync,
                diagnostics.clone(),
            );
            Self {
                dir,
                store,
                manager,
                diagnostics,
            }
        }

        fn markdown() -> Self {
            Self::with_parser(Arc::new(MarkdownTaskParser))
        }

        fn write(&self, name: &str, content: &str) {
            std::fs::write(self.dir.path().join("specs/001-auth/tasks").join(name), content).unwrap();
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.dir.path().join("specs/001-auth/tasks").join(name)).unwrap()
        }

        fn seed_three(&self) {
            self.write("T001-setup.md", "### T001: Setup\n\n- [x] scaffold\n");
            self.write("T002-api.md", "### T002: API\n\n- [>] endpoints\n");
            self.write(
                "T003-deploy.md",
                "### T003: Deploy\n\n- [!] ship it\n  Blocked: waiting for prod credentials\n",
            );
        }
    }

    #[test]
    fn discovers_three_files() {
        let fx = Fixture::markdown();
        fx.seed_three();

        let tasks = fx.manager.discover_tasks("001").unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].state, TaskState::Completed);
        assert_eq!(tasks[1].state, TaskState::InProgress);
        assert_eq!(tasks[2].state, TaskState::Blocked);
        assert_eq!(
            tasks[2].error_message.as_deref(),
            Some("waiting for prod credentials")
        );
        assert_eq!(tasks[0].file_path.as_deref(), Some("specs/001-auth/tasks/T001-setup.md"));
        // Persisted after discovery.
        assert_eq!(fx.store.load_tasks("001").unwrap().len(), 3);
    }

    #[test]
    fn merge_keeps_stored_state_and_refreshes_title() {
        let mut table = HashMap::new();
        table.insert("T001".to_string(), ParsedTask::new("T001", "New title", TaskState::Pending));
        table.insert("T002".to_string(), ParsedTask::new("T002", "Fresh", TaskState::InProgress));
        let fx = Fixture::with_parser(Arc::new(TableParser(table)));
        fx.write("T001.md", "");
        fx.write("T002.md", "");
        fx.store
            .save_tasks(
                &[
                    TaskInfo::new("T001", "Old title").with_state(TaskState::Completed),
                    TaskInfo::new("T099", "Archived").with_state(TaskState::Cancelled),
                ],
                "001",
            )
            .unwrap();

        let tasks = fx.manager.discover_tasks("001").unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["T001", "T002", "T099"]);
        assert_eq!(tasks[0].title, "New title");
        assert_eq!(tasks[0].state, TaskState::Completed);
        assert_eq!(tasks[1].state, TaskState::InProgress);
        assert_eq!(tasks[2].title, "Archived");
    }

    #[test]
    fn files_without_id_are_skipped() {
        let fx = Fixture::markdown();
        fx.write("README.md", "# Notes\n");
        fx.write("T001.md", "### T001: Only\n- [ ] x\n");
        assert_eq!(fx.manager.discover_tasks("001").unwrap().len(), 1);
        assert!(fx.diagnostics.is_empty());
    }

    #[test]
    fn discovery_respects_task_limit() {
        let fx = Fixture::markdown();
        fx.store
            .save_config(&MonitoringConfig {
                max_tasks_per_feature: 2,
                ..MonitoringConfig::default()
            })
            .unwrap();
        fx.seed_three();
        assert_eq!(fx.manager.discover_tasks("001").unwrap().len(), 2);
        assert_eq!(fx.diagnostics.summary()[&ErrorCategory::Validation], 1);
    }

    #[test]
    fn get_tasks_uses_cache_until_refreshed() {
        let fx = Fixture::markdown();
        fx.write("T001.md", "### T001: One\n- [ ] x\n");
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 1);

        fx.write("T002.md", "### T002: Two\n- [ ] y\n");
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 1);
        assert_eq!(fx.manager.refresh_tasks("001").unwrap().len(), 2);

        fx.write("T003.md", "### T003: Three\n- [ ] z\n");
        fx.manager.clear_cache();
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 3);
    }

    #[test]
    fn disabled_cache_always_rediscovers() {
        let fx = Fixture::markdown();
        fx.store
            .save_config(&MonitoringConfig {
                cache_enabled: false,
                ..MonitoringConfig::default()
            })
            .unwrap();
        fx.write("T001.md", "### T001: One\n- [ ] x\n");
        fx.manager.get_tasks("001").unwrap();
        fx.write("T002.md", "### T002: Two\n- [ ] y\n");
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 2);
    }

    #[test]
    fn without_auto_discovery_store_is_used() {
        let fx = Fixture::markdown();
        fx.store
            .save_config(&MonitoringConfig {
                auto_discovery: false,
                cache_enabled: false,
                ..MonitoringConfig::default()
            })
            .unwrap();
        fx.write("T001.md", "### T001: One\n- [ ] x\n");
        // Empty store: discovery runs once.
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 1);
        fx.write("T002.md", "### T002: Two\n- [ ] y\n");
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 1);
    }

    #[test]
    fn transitions_persist_history_and_rewrite_file() {
        let fx = Fixture::markdown();
        fx.write("T001.md", "### T001: One\n\n- [ ] x\n");

        assert!(fx.manager.start_task("001", "T001").unwrap());
        assert!(fx.manager.complete_task("001", "T001", Some(1.5)).unwrap());

        let task = fx.manager.get_task("001", "T001").unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.execution_time, Some(1.5));

        let history = fx.store.load_history("001", None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].old_state, Some(TaskState::InProgress));
        assert_eq!(history[1].execution_time, Some(1.5));

        let content = fx.read("T001.md");
        assert!(content.contains("- [x] x"));
        assert!(content.contains("- **Execution Time:** 1.5h"));
    }

    #[test]
    fn unwritable_task_file_does_not_fail_the_update() {
        let fx = Fixture::markdown();
        fx.seed_three();
        fx.manager.discover_tasks("001").unwrap();
        // Not valid UTF-8, so the rewrite cannot read it back.
        std::fs::write(
            fx.dir.path().join("specs/001-auth/tasks/T002-api.md"),
            [0xff, 0xfe, 0x00, 0x80],
        )
        .unwrap();

        assert!(fx.manager.complete_task("001", "T002", None).unwrap());
        assert_eq!(fx.store.load_tasks("001").unwrap()[1].state, TaskState::Completed);
        assert_eq!(fx.store.load_history("001", None).unwrap().len(), 1);
        let incidents = fx.diagnostics.incidents();
        assert!(incidents
            .iter()
            .any(|i| i.category == ErrorCategory::Storage && i.context == "001/T002"));
    }

    #[test]
    fn deleted_task_file_does_not_fail_the_update() {
        let fx = Fixture::markdown();
        fx.seed_three();
        fx.manager.discover_tasks("001").unwrap();
        std::fs::remove_file(fx.dir.path().join("specs/001-auth/tasks/T002-api.md")).unwrap();

        assert!(fx.manager.complete_task("001", "T002", None).unwrap());
        assert_eq!(fx.store.load_tasks("001").unwrap()[1].state, TaskState::Completed);
    }

    #[test]
    fn failed_history_append_keeps_the_new_state() {
        let fx = Fixture::markdown();
        fx.seed_three();
        fx.manager.discover_tasks("001").unwrap();
        std::fs::create_dir_all(fx.store.resource_path(crate::store::Resource::History)).unwrap();

        assert!(fx.manager.complete_task("001", "T002", Some(2.0)).unwrap());
        assert_eq!(fx.store.load_tasks("001").unwrap()[1].state, TaskState::Completed);
        assert!(fx.read("T002-api.md").contains("- [x] endpoints"));
        let incidents = fx.diagnostics.incidents();
        assert!(incidents
            .iter()
            .any(|i| i.category == ErrorCategory::Storage && i.context == "001/T002"));
    }

    #[test]
    fn invalid_transition_returns_false_and_changes_nothing() {
        let fx = Fixture::markdown();
        fx.write("T001.md", "### T001: One\n\n- [x] done\n");
        fx.manager.discover_tasks("001").unwrap();
        let before = std::fs::read(fx.store.resource_path(crate::store::Resource::TaskStates)).unwrap();

        assert!(!fx.manager.update_task_state("001", "T001", TaskState::Pending, None, None).unwrap());
        assert!(!fx.manager.start_task("001", "T001").unwrap());

        let after = std::fs::read(fx.store.resource_path(crate::store::Resource::TaskStates)).unwrap();
        assert_eq!(before, after);
        assert!(fx.store.load_history("001", None).unwrap().is_empty());
    }

    #[test]
    fn strict_entry_point_reports_errors() {
        let fx = Fixture::markdown();
        fx.write("T001.md", "### T001: One\n\n- [x] done\n");
        let err = fx
            .manager
            .try_update_task_state("001", "T001", TaskState::InProgress, None, None)
            .unwrap_err();
        assert!(matches!(err, SpecflowError::InvalidTransition { .. }));
        let err = fx
            .manager
            .try_update_task_state("001", "T404", TaskState::InProgress, None, None)
            .unwrap_err();
        assert!(matches!(err, SpecflowError::TaskNotFound(_)));
        assert!(!fx.manager.start_task("001", "T404").unwrap());
    }

    #[test]
    fn call_site_rules() {
        let fx = Fixture::markdown();
        fx.write("T001.md", "### T001: One\n\n- [ ] x\n");
        // Blocked tasks must be reset before they can start or complete.
        assert!(fx.manager.block_task("001", "T001", "needs review").unwrap());
        let blocked = fx.manager.get_task("001", "T001").unwrap().unwrap();
        assert_eq!(blocked.error_message.as_deref(), Some("needs review"));
        assert!(!fx.manager.start_task("001", "T001").unwrap());
        assert!(!fx.manager.complete_task("001", "T001", None).unwrap());
        assert!(fx.manager.reset_task("001", "T001").unwrap());
        let reset = fx.manager.get_task("001", "T001").unwrap().unwrap();
        assert!(reset.error_message.is_none());
        // In-progress tasks cannot be started again.
        assert!(fx.manager.start_task("001", "T001").unwrap());
        assert!(!fx.manager.start_task("001", "T001").unwrap());
        // Failed tasks can be restarted.
        assert!(fx.manager.update_task_state("001", "T001", TaskState::Failed, None, None).unwrap());
        assert!(fx.manager.start_task("001", "T001").unwrap());
    }

    #[test]
    fn create_and_delete_tasks() {
        let fx = Fixture::markdown();
        let created = fx.manager.create_task("001", "T010", "Write docs", Some(2.0)).unwrap();
        assert_eq!(created.state, TaskState::Pending);
        assert!(matches!(
            fx.manager.create_task("001", "T010", "Again", None),
            Err(SpecflowError::Validation(_))
        ));
        assert_eq!(fx.manager.get_tasks("001").unwrap().len(), 1);
        let history = fx.store.load_history("001", None).unwrap();
        assert_eq!(history[0].old_state, None);

        assert!(fx.manager.delete_task("001", "T010").unwrap());
        assert!(!fx.manager.delete_task("001", "T010").unwrap());
        assert!(fx.manager.get_tasks("001").unwrap().is_empty());
    }

    #[test]
    fn next_task_and_filtering() {
        let fx = Fixture::markdown();
        fx.seed_three();
        fx.write("T004.md", "### T004: Docs\n\n- [ ] write\n");
        assert_eq!(fx.manager.next_task("001").unwrap().unwrap().id, "T002");
        let pending = fx.manager.tasks_by_state("001", TaskState::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "T004");
    }

    #[test]
    fn invalid_feature_id_is_rejected() {
        let fx = Fixture::markdown();
        assert!(matches!(
            fx.manager.get_tasks("../etc"),
            Err(SpecflowError::InvalidFeatureId(_))
        ));
    }
}
