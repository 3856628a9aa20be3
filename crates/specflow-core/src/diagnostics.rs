use crate::error::SpecflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Maximum number of incidents kept in memory per `Diagnostics` handle.
const MAX_INCIDENTS: usize = 200;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Storage,
    CorruptedData,
    TaskDiscovery,
    StateTransition,
    Configuration,
    LockContention,
    NotFound,
    Validation,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Storage => "storage",
            ErrorCategory::CorruptedData => "corrupted_data",
            ErrorCategory::TaskDiscovery => "task_discovery",
            ErrorCategory::StateTransition => "state_transition",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::LockContention => "lock_contention",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Validation => "validation",
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCategory::Storage | ErrorCategory::Configuration | ErrorCategory::LockContention
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub category: ErrorCategory,
    /// Resource, file, or task the incident concerns.
    pub context: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Shared record of failures that were recovered instead of surfaced.
///
/// Cloning yields another handle onto the same log, so one instance created by
/// the `Monitor` is visible from every component.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    incidents: Arc<Mutex<VecDeque<Incident>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, category: ErrorCategory, context: impl Into<String>, message: impl Into<String>) {
        let incident = Incident {
            category,
            context: context.into(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        tracing::warn!(
            category = %incident.category,
            context = %incident.context,
            "{}",
            incident.message
        );
        let mut log = match self.incidents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if log.len() >= MAX_INCIDENTS {
            log.pop_front();
        }
        log.push_back(incident);
    }

    pub fn record_error(&self, context: impl Into<String>, err: &SpecflowError) {
        self.record(err.category(), context, err.to_string());
    }

    pub fn incidents(&self) -> Vec<Incident> {
        match self.incidents.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Incident counts per category.
    pub fn summary(&self) -> BTreeMap<ErrorCategory, usize> {
        let mut counts = BTreeMap::new();
        for incident in self.incidents() {
            *counts.entry(incident.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.incidents().is_empty()
    }

    pub fn clear(&self) {
        match self.incidents.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
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
    fn clones_share_the_log() {
        let diag = Diagnostics::new();
        let other = diag.clone();
        other.record(ErrorCategory::CorruptedData, "task-states.json", "bad json");
        assert_eq!(diag.incidents().len(), 1);
        assert_eq!(diag.incidents()[0].context, "task-states.json");
    }

    #[test]
    fn summary_counts_by_category() {
        let diag = Diagnostics::new();
        diag.record(ErrorCategory::TaskDiscovery, "a.md", "unreadable");
        diag.record(ErrorCategory::TaskDiscovery, "b.md", "unreadable");
        diag.record(ErrorCategory::Storage, "history", "disk full");
        let summary = diag.summary();
        assert_eq!(summary[&ErrorCategory::TaskDiscovery], 2);
        assert_eq!(summary[&ErrorCategory::Storage], 1);
    }

    #[test]
    fn log_is_bounded() {
        let diag = Diagnostics::new();
        for i in 0..(MAX_INCIDENTS + 10) {
            diag.record(ErrorCategory::Validation, format!("item-{i}"), "x");
        }
        let incidents = diag.incidents();
        assert_eq!(incidents.len(), MAX_INCIDENTS);
        assert_eq!(incidents[0].context, "item-10");
    }

    #[test]
    fn fatal_categories() {
        assert!(ErrorCategory::Storage.is_fatal());
        assert!(ErrorCategory::LockContention.is_fatal());
        assert!(!ErrorCategory::CorruptedData.is_fatal());
        assert!(!ErrorCategory::StateTransition.is_fatal());
    }
}
