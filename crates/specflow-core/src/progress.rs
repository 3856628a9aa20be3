use crate::error::{Result, SpecflowError};
use crate::task::TaskInfo;
use crate::types::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ProgressData
// ---------------------------------------------------------------------------

/// Snapshot of a feature's completion, recomputed from its tasks on read.
///
/// Construction and deserialization both enforce
/// `total == completed + in_progress + blocked + pending` and
/// `0 <= percentage <= 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawProgress")]
pub struct ProgressData {
    feature_id: String,
    total_tasks: usize,
    completed_tasks: usize,
    in_progress_tasks: usize,
    blocked_tasks: usize,
    pending_tasks: usize,
    percentage: f64,
    last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawProgress {
    feature_id: String,
    total_tasks: usize,
    completed_tasks: usize,
    in_progress_tasks: usize,
    blocked_tasks: usize,
    pending_tasks: usize,
    percentage: f64,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    estimated_completion: Option<DateTime<Utc>>,
}

impl TryFrom<RawProgress> for ProgressData {
    type Error = SpecflowError;

    fn try_from(raw: RawProgress) -> Result<Self> {
        let mut progress = ProgressData::new(
            raw.feature_id,
            raw.total_tasks,
            raw.completed_tasks,
            raw.in_progress_tasks,
            raw.blocked_tasks,
            raw.pending_tasks,
            raw.percentage,
        )?;
        progress.last_updated = raw.last_updated;
        progress.estimated_completion = raw.estimated_completion;
        Ok(progress)
    }
}

impl ProgressData {
    pub fn new(
        feature_id: impl Into<String>,
        total_tasks: usize,
        completed_tasks: usize,
        in_progress_tasks: usize,
        blocked_tasks: usize,
        pending_tasks: usize,
        percentage: f64,
    ) -> Result<Self> {
        let sum = completed_tasks + in_progress_tasks + blocked_tasks + pending_tasks;
        if sum != total_tasks {
            return Err(SpecflowError::InvalidProgress(format!(
                "total_tasks is {total_tasks} but state counts sum to {sum}"
            )));
        }
        if !(0.0..=100.0).contains(&percentage) {
            return Err(SpecflowError::InvalidProgress(format!(
                "percentage {percentage} is outside 0..=100"
            )));
        }
        Ok(Self {
            feature_id: feature_id.into(),
            total_tasks,
            completed_tasks,
            in_progress_tasks,
            blocked_tasks,
            pending_tasks,
            percentage,
            last_updated: Utc::now(),
            estimated_completion: None,
        })
    }

    /// Count tasks into the four progress buckets. Failed tasks count as
    /// blocked; cancelled tasks are left out of the totals.
    pub fn from_tasks(feature_id: impl Into<String>, tasks: &[TaskInfo]) -> Result<Self> {
        let mut completed = 0;
        let mut in_progress = 0;
        let mut blocked = 0;
        let mut pending = 0;
        for task in tasks {
            match task.state {
                TaskState::Completed => completed += 1,
                TaskState::InProgress => in_progress += 1,
                TaskState::Blocked | TaskState::Failed => blocked += 1,
                TaskState::Pending => pending += 1,
                TaskState::Cancelled => {}
            }
        }
        let total = completed + in_progress + blocked + pending;
        let percentage = if total == 0 {
            0.0
        } else {
            round1(completed as f64 / total as f64 * 100.0)
        };
        Self::new(feature_id, total, completed, in_progress, blocked, pending, percentage)
    }

    pub fn with_estimated_completion(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.estimated_completion = at;
        self
    }

    pub fn feature_id(&self) -> &str {
        &self.feature_id
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks
    }

    pub fn completed_tasks(&self) -> usize {
        self.completed_tasks
    }

    pub fn in_progress_tasks(&self) -> usize {
        self.in_progress_tasks
    }

    pub fn blocked_tasks(&self) -> usize {
        self.blocked_tasks
    }

    pub fn pending_tasks(&self) -> usize {
        self.pending_tasks
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn estimated_completion(&self) -> Option<DateTime<Utc>> {
        self.estimated_completion
    }

    pub fn is_complete(&self) -> bool {
        self.total_tasks > 0 && self.completed_tasks == self.total_tasks
    }
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
