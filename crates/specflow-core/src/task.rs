use crate::error::{Result, SpecflowError};
use crate::types::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

// ---------------------------------------------------------------------------
// TaskInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub title: String,
    pub state: TaskState,
    pub last_updated: DateTime<Utc>,
    /// Hours spent, recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    /// Present only while the task is blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    /// Markdown source, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl TaskInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state: TaskState::Pending,
            last_updated: Utc::now(),
            execution_time: None,
            error_message: None,
            description: None,
            estimated_hours: None,
            file_path: None,
        }
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    /// Apply a state change if the domain rule allows it.
    ///
    /// `error_message` is kept only when the new state is `Blocked`.
    pub fn transition(&mut self, target: TaskState, error_message: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(SpecflowError::InvalidTransition {
                task: self.id.clone(),
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        self.error_message = if target == TaskState::Blocked {
            error_message
        } else {
            None
        };
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Weight used by weighted progress and completion estimates.
    pub fn weight(&self) -> f64 {
        match self.estimated_hours {
            Some(h) if h > 0.0 => h,
            _ => 1.0,
        }
    }
}

impl PartialEq for TaskInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskInfo {}

impl Hash for TaskInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// TaskHistory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` for the entry that records a task's creation.
    pub old_state: Option<TaskState>,
    pub new_state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TaskHistory {
    pub fn new(task_id: impl Into<String>, old_state: Option<TaskState>, new_state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            timestamp: Utc::now(),
            old_state,
            new_state,
            execution_time: None,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_execution_time(mut self, hours: Option<f64>) -> Self {
        self.execution_time = hours;
        self
    }

    pub fn is_completion(&self) -> bool {
        self.new_state == TaskState::Completed
    }
}

// ---------------------------------------------------------------------------
// Task list helpers
// ---------------------------------------------------------------------------

/// Sort key that orders `T2` before `T10` and falls back to the raw id.
pub fn sort_key(id: &str) -> (u64, String) {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.parse().unwrap_or(u64::MAX), id.to_string())
}

pub fn sort_tasks(tasks: &mut [TaskInfo]) {
    tasks.sort_by_cached_key(|t| sort_key(&t.id));
}

pub fn find<'a>(tasks: &'a [TaskInfo], id: &str) -> Option<&'a TaskInfo> {
    tasks.iter().find(|t| t.id == id)
}

pub fn find_mut<'a>(tasks: &'a mut [TaskInfo], id: &str) -> Result<&'a mut TaskInfo> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| SpecflowError::TaskNotFound(id.to_string()))
}

/// First open task in id order, preferring one already in progress.
pub fn next_task(tasks: &[TaskInfo]) -> Option<&TaskInfo> {
    tasks
        .iter()
        .find(|t| t.state == TaskState::InProgress)
        .or_else(|| tasks.iter().find(|t| t.state == TaskState::Pending))
}

/// Human-readable summary: "3/5 completed, 1 in progress, 1 blocked"
pub fn summarize(tasks: &[TaskInfo]) -> String {
    let total = tasks.len();
    let count = |s: TaskState| tasks.iter().filter(|t| t.state == s).count();
    format!(
        "{}/{total} completed, {} in progress, {} blocked",
        count(TaskState::Completed),
        count(TaskState::InProgress),
        count(TaskState::Blocked) + count(TaskState::Failed),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
