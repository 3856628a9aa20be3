//! Two-way reconciliation between markdown task files and the state store.

use crate::diagnostics::Diagnostics;
use crate::error::{Result, SpecflowError};
use crate::io;
use crate::parser::{self, ScannedFile, TaskFileParser, FOOTER_END, FOOTER_START};
use crate::paths;
use crate::store::StateStore;
use crate::task::{TaskHistory, TaskInfo};
use crate::types::TaskState;
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// The file disagreed with the store and the store took the file's state.
    StateChanged {
        task_id: String,
        store_state: TaskState,
        file_state: TaskState,
    },
    /// The file disagreed but the change is not a legal transition; the
    /// store keeps its state and writes it back to the file.
    Rejected {
        task_id: String,
        store_state: TaskState,
        file_state: TaskState,
        reason: String,
    },
}

impl Discrepancy {
    pub fn task_id(&self) -> &str {
        match self {
            Discrepancy::StateChanged { task_id, .. } | Discrepancy::Rejected { task_id, .. } => task_id,
        }
    }
}

/// A task file with no stored task. Sync never inserts these; discovery does.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UntrackedFile {
    pub task_id: String,
    pub file_state: TaskState,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total_files: usize,
    /// Stored tasks updated from their file.
    pub synced_count: usize,
    pub discrepancies: Vec<Discrepancy>,
    /// Files to add to the store. Reported on every run until discovered,
    /// so they are kept apart from `discrepancies`.
    pub add_to_store: Vec<UntrackedFile>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FullSyncReport {
    pub feature_id: String,
    pub files_to_store: SyncReport,
    /// Per-task outcome of writing the store back to the files.
    pub store_to_files: BTreeMap<String, bool>,
}

impl FullSyncReport {
    pub fn discrepancy_count(&self) -> usize {
        self.files_to_store.discrepancies.len()
    }
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SyncEngine {
    root: PathBuf,
    store: Arc<StateStore>,
    parser: Arc<dyn TaskFileParser>,
    diagnostics: Diagnostics,
}

impl SyncEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<StateStore>,
        parser: Arc<dyn TaskFileParser>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            parser,
            diagnostics,
        }
    }

    fn scan(&self, feature_id: &str) -> Result<Vec<ScannedFile>> {
        parser::scan_feature(&self.root, feature_id, self.parser.as_ref(), &self.diagnostics)
    }

    /// Re-parse every task file and absorb file-side state changes.
    pub fn sync_from_files_to_store(&self, feature_id: &str) -> Result<SyncReport> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let files = self.scan(&feature_id)?;
        let mut report = SyncReport {
            total_files: files.len(),
            ..SyncReport::default()
        };
        if files.is_empty() {
            return Ok(report);
        }

        let history = self.store.update_tasks(&feature_id, |tasks| {
            let mut history = Vec::new();
            for file in &files {
                let parsed = &file.parsed;
                let Some(task) = tasks.iter_mut().find(|t| t.id == parsed.id) else {
                    report.add_to_store.push(UntrackedFile {
                        task_id: parsed.id.clone(),
                        file_state: parsed.state,
                        file_path: file.rel_path.clone(),
                    });
                    continue;
                };
                if task.file_path.is_none() {
                    task.file_path = Some(file.rel_path.clone());
                }
                if task.state == parsed.state {
                    continue;
                }
                let old = task.state;
                match task.transition(parsed.state, parsed.error_message.clone()) {
                    Ok(()) => {
                        report.synced_count += 1;
                        report.discrepancies.push(Discrepancy::StateChanged {
                            task_id: task.id.clone(),
                            store_state: old,
                            file_state: parsed.state,
                        });
                        history.push(
                            TaskHistory::new(task.id.clone(), Some(old), parsed.state)
                                .with_notes(Some("synced from task file".to_string())),
                        );
                    }
                    Err(e) => report.discrepancies.push(Discrepancy::Rejected {
                        task_id: task.id.clone(),
                        store_state: old,
                        file_state: parsed.state,
                        reason: e.to_string(),
                    }),
                }
            }
            history
        })?;

        for entry in &history {
            if let Err(e) = self.store.append_history(entry, &feature_id) {
                self.diagnostics.record_error(format!("{feature_id}/{}", entry.task_id), &e);
            }
        }
        tracing::debug!(
            feature = %feature_id,
            files = report.total_files,
            synced = report.synced_count,
            discrepancies = report.discrepancies.len(),
            untracked = report.add_to_store.len(),
            "files -> store"
        );
        Ok(report)
    }

    /// Rewrite each stored task's file to match the store. Tasks without a
    /// file, or whose file could not be written, map to `false`.
    pub fn sync_from_store_to_files(&self, feature_id: &str) -> Result<BTreeMap<String, bool>> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let tasks = self.store.load_tasks(&feature_id)?;
        let files = self.scan(&feature_id)?;

        let mut results = BTreeMap::new();
        for task in &tasks {
            let ok = match self.resolve_file(task, &files) {
                Some(path) => match write_task_file(&path, task) {
                    Ok(_) => true,
                    Err(e) => {
                        self.diagnostics.record_error(format!("{feature_id}/{}", task.id), &e);
                        false
                    }
                },
                None => false,
            };
            results.insert(task.id.clone(), ok);
        }
        Ok(results)
    }

    /// Files into the store first, then the store back out to the files.
    pub fn full_sync(&self, feature_id: &str) -> Result<FullSyncReport> {
        let feature_id = paths::normalize_feature_id(feature_id)?;
        let files_to_store = self.sync_from_files_to_store(&feature_id)?;
        let store_to_files = self.sync_from_store_to_files(&feature_id)?;
        tracing::info!(
            feature = %feature_id,
            discrepancies = files_to_store.discrepancies.len(),
            "full sync complete"
        );
        Ok(FullSyncReport {
            feature_id,
            files_to_store,
            store_to_files,
        })
    }

    /// Rewrite the file of a single task. Returns whether a file was written.
    pub fn sync_task_to_file(&self, feature_id: &str, task: &TaskInfo) -> Result<bool> {
        let files = match self.stored_path(task) {
            Some(_) => Vec::new(),
            None => self.scan(&paths::normalize_feature_id(feature_id)?)?,
        };
        match self.resolve_file(task, &files) {
            Some(path) => write_task_file(&path, task),
            None => Ok(false),
        }
    }

    fn stored_path(&self, task: &TaskInfo) -> Option<PathBuf> {
        let rel = task.file_path.as_deref()?;
        let path = self.root.join(rel);
        path.is_file().then_some(path)
    }

    fn resolve_file(&self, task: &TaskInfo, files: &[ScannedFile]) -> Option<PathBuf> {
        self.stored_path(task).or_else(|| {
            files
                .iter()
                .find(|f| f.parsed.id == task.id)
                .map(|f| f.path.clone())
        })
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Write `task` into the file at `path` if the rendered content differs.
fn write_task_file(path: &Path, task: &TaskInfo) -> Result<bool> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SpecflowError::storage(path, e))?;
    let updated = render_task_file(&content, task);
    if updated == content {
        return Ok(false);
    }
    io::atomic_write(path, updated.as_bytes())?;
    Ok(true)
}

/// `content` with its primary checkbox, status line and metadata footer set
/// from `task`. Rendering the result again yields the same text.
pub fn render_task_file(content: &str, task: &TaskInfo) -> String {
    let body = parser::strip_footer(content);
    let body = set_primary_marker(&body, task.state);
    let body = set_status_line(&body, task.state);
    format!("{}\n\n---\n{}\n", body.trim_end(), render_footer(task))
}

fn set_primary_marker(body: &str, state: TaskState) -> String {
    parser::checkbox_re()
        .replacen(body, 1, |caps: &regex::Captures| {
            format!("{}{}{}", &caps[1], state.marker(), &caps[3])
        })
        .into_owned()
}

fn set_status_line(body: &str, state: TaskState) -> String {
    let re = parser::status_re();
    if re.is_match(body) {
        return re
            .replacen(body, 1, |caps: &regex::Captures| {
                format!("{}{}", &caps[1], state.label())
            })
            .into_owned();
    }
    format!("{}\n\n**Status:** {}\n", body.trim_end(), state.label())
}

fn render_footer(task: &TaskInfo) -> String {
    let mut lines = vec![
        FOOTER_START.to_string(),
        format!(
            "- **Last Updated:** {}",
            task.last_updated.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        format!("- **State:** {}", task.state.label()),
    ];
    if let Some(hours) = task.execution_time {
        lines.push(format!("- **Execution Time:** {hours}h"));
    }
    if let Some(error) = &task.error_message {
        let error = error.split_whitespace().collect::<Vec<_>>().join(" ");
        lines.push(format!("- **Error:** {error}"));
    }
    lines.push(FOOTER_END.to_string());
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
