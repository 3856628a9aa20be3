use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn all() -> &'static [TaskState] {
        &[
            TaskState::Pending,
            TaskState::InProgress,
            TaskState::Completed,
            TaskState::Blocked,
            TaskState::Failed,
            TaskState::Cancelled,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Blocked => "blocked",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Upper-case label used in `**Status:**` lines and metadata footers.
    pub fn label(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::InProgress => "IN_PROGRESS",
            TaskState::Completed => "COMPLETED",
            TaskState::Blocked => "BLOCKED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }

    /// Character written between the checkbox brackets, `- [x]`.
    pub fn marker(self) -> char {
        match self {
            TaskState::Pending => ' ',
            TaskState::InProgress => '>',
            TaskState::Completed => 'x',
            TaskState::Blocked | TaskState::Failed => '!',
            TaskState::Cancelled => '~',
        }
    }

    /// Coarse state for a checkbox marker. `[!]` always reads as blocked;
    /// a status line may refine it to failed.
    pub fn from_marker(marker: char) -> Option<TaskState> {
        match marker {
            ' ' => Some(TaskState::Pending),
            '>' => Some(TaskState::InProgress),
            'x' | 'X' => Some(TaskState::Completed),
            '!' => Some(TaskState::Blocked),
            '~' => Some(TaskState::Cancelled),
            _ => None,
        }
    }

    /// Domain transition rule: nothing leaves `Completed`, and `Blocked` may
    /// only be unblocked back to `Pending`.
    pub fn can_transition_to(self, target: TaskState) -> bool {
        match self {
            TaskState::Completed => false,
            TaskState::Blocked => target == TaskState::Pending,
            _ => true,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }

    /// Pending or in progress: work that is open and not waiting on anything.
    pub fn is_open(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::InProgress)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "pending" | "todo" => Ok(TaskState::Pending),
            "in_progress" | "inprogress" | "started" => Ok(TaskState::InProgress),
            "completed" | "complete" | "done" => Ok(TaskState::Completed),
            "blocked" => Ok(TaskState::Blocked),
            "failed" => Ok(TaskState::Failed),
            "cancelled" | "canceled" => Ok(TaskState::Cancelled),
            _ => Err(format!("unknown task state '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_has_no_outgoing_transitions() {
        for &target in TaskState::all() {
            assert!(!TaskState::Completed.can_transition_to(target));
        }
    }

    #[test]
    fn blocked_only_unblocks_to_pending() {
        for &target in TaskState::all() {
            assert_eq!(
                TaskState::Blocked.can_transition_to(target),
                target == TaskState::Pending,
                "blocked -> {target}"
            );
        }
    }

    #[test]
    fn other_states_accept_any_target() {
        for &from in TaskState::all() {
            if matches!(from, TaskState::Completed | TaskState::Blocked) {
                continue;
            }
            for &target in TaskState::all() {
                assert!(from.can_transition_to(target), "{from} -> {target}");
            }
        }
    }

    #[test]
    fn parse_accepts_label_and_variants() {
        assert_eq!("IN_PROGRESS".parse::<TaskState>().unwrap(), TaskState::InProgress);
        assert_eq!("in-progress".parse::<TaskState>().unwrap(), TaskState::InProgress);
        assert_eq!("In Progress".parse::<TaskState>().unwrap(), TaskState::InProgress);
        assert_eq!("canceled".parse::<TaskState>().unwrap(), TaskState::Cancelled);
        assert!("bogus".parse::<TaskState>().is_err());
    }

    #[test]
    fn markers_round_trip_except_failed() {
        for &state in TaskState::all() {
            let coarse = TaskState::from_marker(state.marker()).unwrap();
            if state == TaskState::Failed {
                assert_eq!(coarse, TaskState::Blocked);
            } else {
                assert_eq!(coarse, state);
            }
        }
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&TaskState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
