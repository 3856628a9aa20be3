//! Progress, velocity and health analytics over task lists and history.
//!
//! Everything here is pure: no I/O, and the clock is fixed per engine so
//! results are reproducible in tests.

use crate::error::Result;
use crate::progress::{round1, ProgressData};
use crate::task::{TaskHistory, TaskInfo};
use crate::types::TaskState;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Daily buckets needed before a trend is reported.
const MIN_TREND_DAYS: usize = 3;
/// Window for the recent completion rate.
const ESTIMATE_WINDOW_DAYS: i64 = 7;
/// Completions in the estimate window that give full confidence.
const FULL_CONFIDENCE_SAMPLES: f64 = 10.0;
/// Open tasks untouched for longer than this count as stale.
const STALE_AFTER_DAYS: i64 = 7;
/// Projections further out than this are clamped.
const MAX_PROJECTION_DAYS: f64 = 36_500.0;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WeightedProgress {
    pub total_weight: f64,
    pub completed_weight: f64,
    pub in_progress_weight: f64,
    /// Completed weight plus half of the in-progress weight.
    pub earned_weight: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Accelerating,
    Decelerating,
    Stable,
    InsufficientData,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Accelerating => "accelerating",
            Trend::Decelerating => "decelerating",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendAnalysis {
    pub trend: Trend,
    pub days_analyzed: u32,
    pub total_completions: usize,
    /// Completions per calendar day; days without completions are absent.
    pub daily_completions: BTreeMap<NaiveDate, usize>,
    pub average_daily_rate: f64,
    pub predicted_completion: Option<DateTime<Utc>>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => HealthStatus::Excellent,
            60..=79 => HealthStatus::Good,
            40..=59 => HealthStatus::Fair,
            _ => HealthStatus::Poor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthPenalty {
    pub points: u32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthScore {
    /// 0..=100
    pub score: u32,
    pub status: HealthStatus,
    pub penalties: Vec<HealthPenalty>,
}

impl HealthScore {
    pub fn issues(&self) -> impl Iterator<Item = &str> {
        self.penalties.iter().map(|p| p.description.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Complete,
    Stalled,
    Projected,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionEstimate {
    pub status: EstimateStatus,
    pub remaining_tasks: usize,
    pub remaining_hours: f64,
    pub recent_completions: usize,
    pub daily_rate: f64,
    pub avg_hours_per_task: f64,
    pub days_remaining: Option<f64>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// ProgressEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressEngine {
    now: Option<DateTime<Utc>>,
}

impl ProgressEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose clock is pinned to `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Simple completed/total percentage.
    pub fn calculate_progress(&self, tasks: &[TaskInfo], feature_id: &str) -> Result<ProgressData> {
        ProgressData::from_tasks(feature_id, tasks)
    }

    /// Cancelled tasks carry no weight.
    pub fn calculate_weighted_progress(&self, tasks: &[TaskInfo]) -> WeightedProgress {
        let mut total = 0.0;
        let mut completed = 0.0;
        let mut in_progress = 0.0;
        for task in tasks.iter().filter(|t| t.state != TaskState::Cancelled) {
            let weight = task.weight();
            total += weight;
            match task.state {
                TaskState::Completed => completed += weight,
                TaskState::InProgress => in_progress += weight,
                _ => {}
            }
        }
        let earned = completed + in_progress * 0.5;
        let percentage = if total > 0.0 {
            round1(earned / total * 100.0)
        } else {
            0.0
        };
        WeightedProgress {
            total_weight: total,
            completed_weight: completed,
            in_progress_weight: in_progress,
            earned_weight: earned,
            percentage,
        }
    }

    /// Velocity trend from completions in the trailing `days`.
    pub fn analyze_trend(&self, history: &[TaskHistory], days: u32, remaining_tasks: usize) -> TrendAnalysis {
        let now = self.now();
        let since = now
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for entry in history {
            if entry.is_completion() && entry.timestamp >= since && entry.timestamp <= now {
                *daily.entry(entry.timestamp.date_naive()).or_default() += 1;
            }
        }
        let total: usize = daily.values().sum();
        let average_daily_rate = if days > 0 {
            total as f64 / f64::from(days)
        } else {
            0.0
        };

        if daily.len() < MIN_TREND_DAYS {
            return TrendAnalysis {
                trend: Trend::InsufficientData,
                days_analyzed: days,
                total_completions: total,
                daily_completions: daily,
                average_daily_rate,
                predicted_completion: None,
                confidence: 0.0,
            };
        }

        let counts: Vec<f64> = daily.values().map(|&c| c as f64).collect();
        let (earlier, recent) = counts.split_at(counts.len() - MIN_TREND_DAYS);
        let trend = match mean(earlier) {
            None => Trend::Stable,
            Some(earlier_mean) => {
                let recent_mean = mean(recent).unwrap_or(0.0);
                if recent_mean > earlier_mean * 1.2 {
                    Trend::Accelerating
                } else if recent_mean < earlier_mean * 0.8 {
                    Trend::Decelerating
                } else {
                    Trend::Stable
                }
            }
        };

        TrendAnalysis {
            trend,
            days_analyzed: days,
            total_completions: total,
            average_daily_rate,
            predicted_completion: project(now, remaining_tasks as f64, average_daily_rate),
            confidence: variation_confidence(&counts),
            daily_completions: daily,
        }
    }

    /// 100 minus penalties for blocked work, stalled velocity and stale tasks.
    pub fn calculate_health_score(&self, tasks: &[TaskInfo]) -> HealthScore {
        let tasks: Vec<&TaskInfo> = tasks
            .iter()
            .filter(|t| t.state != TaskState::Cancelled)
            .collect();
        let mut penalties = Vec::new();
        let total = tasks.len();

        if total > 0 {
            let count = |pred: &dyn Fn(&TaskInfo) -> bool| tasks.iter().filter(|t| pred(t)).count();
            let blocked = count(&|t: &TaskInfo| matches!(t.state, TaskState::Blocked | TaskState::Failed));
            let completed = count(&|t: &TaskInfo| t.state == TaskState::Completed);
            let in_progress = count(&|t: &TaskInfo| t.state == TaskState::InProgress);
            let stale_cutoff = self.now() - Duration::days(STALE_AFTER_DAYS);
            let stale = count(&|t: &TaskInfo| t.state.is_open() && t.last_updated < stale_cutoff);

            let blocked_ratio = blocked as f64 / total as f64;
            if blocked_ratio > 0.3 {
                penalties.push(penalty(30, format!("{blocked} of {total} tasks blocked")));
            } else if blocked_ratio > 0.1 {
                penalties.push(penalty(10, format!("{blocked} of {total} tasks blocked")));
            }

            if in_progress > completed * 2 {
                penalties.push(penalty(
                    15,
                    format!("{in_progress} tasks in progress but only {completed} completed"),
                ));
            }

            let stale_ratio = stale as f64 / total as f64;
            let stale_msg = || format!("{stale} open tasks untouched for over {STALE_AFTER_DAYS} days");
            if stale_ratio > 0.5 {
                penalties.push(penalty(20, stale_msg()));
            } else if stale_ratio > 0.2 {
                penalties.push(penalty(10, stale_msg()));
            }
        }

        let deducted: u32 = penalties.iter().map(|p| p.points).sum();
        let score = 100u32.saturating_sub(deducted);
        HealthScore {
            score,
            status: HealthStatus::from_score(score),
            penalties,
        }
    }

    /// Project a finish date from the last week's completion rate.
    pub fn estimate_completion(&self, tasks: &[TaskInfo], history: &[TaskHistory]) -> CompletionEstimate {
        let now = self.now();
        let remaining: Vec<&TaskInfo> = tasks
            .iter()
            .filter(|t| !t.state.is_terminal())
            .collect();
        let remaining_hours: f64 = remaining.iter().map(|t| t.weight()).sum();

        let since = now - Duration::days(ESTIMATE_WINDOW_DAYS);
        let recent = history
            .iter()
            .filter(|e| e.is_completion() && e.timestamp >= since && e.timestamp <= now)
            .count();
        let daily_rate = recent as f64 / ESTIMATE_WINDOW_DAYS as f64;

        let completed_hours: Vec<f64> = tasks
            .iter()
            .filter(|t| t.state == TaskState::Completed)
            .map(|t| match t.execution_time {
                Some(h) if h > 0.0 => h,
                _ => t.weight(),
            })
            .collect();
        let avg_hours_per_task = mean(&completed_hours).unwrap_or(1.0);
        let confidence = round2((recent as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0));

        let mut estimate = CompletionEstimate {
            status: EstimateStatus::Projected,
            remaining_tasks: remaining.len(),
            remaining_hours,
            recent_completions: recent,
            daily_rate,
            avg_hours_per_task,
            days_remaining: None,
            estimated_completion: None,
            confidence,
        };

        if remaining.is_empty() {
            estimate.status = EstimateStatus::Complete;
            estimate.days_remaining = Some(0.0);
            estimate.estimated_completion = Some(now);
            estimate.confidence = 1.0;
        } else if recent == 0 {
            estimate.status = EstimateStatus::Stalled;
        } else {
            // Hours of work finished per day at the recent pace.
            let hours_per_day = avg_hours_per_task * daily_rate;
            let days = (remaining_hours / hours_per_day).min(MAX_PROJECTION_DAYS);
            estimate.days_remaining = Some(round1(days));
            estimate.estimated_completion = Some(now + fractional_days(days));
        }
        estimate
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn penalty(points: u32, description: String) -> HealthPenalty {
    HealthPenalty {
        points,
        description,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// `max(0, 1 - stdev/mean)` over the daily counts, sample stdev.
fn variation_confidence(counts: &[f64]) -> f64 {
    let Some(avg) = mean(counts) else {
        return 0.0;
    };
    if counts.len() < 2 || avg <= 0.0 {
        return 0.0;
    }
    let variance =
        counts.iter().map(|c| (c - avg).powi(2)).sum::<f64>() / (counts.len() - 1) as f64;
    round2((1.0 - variance.sqrt() / avg).clamp(0.0, 1.0))
}

fn project(now: DateTime<Utc>, remaining: f64, daily_rate: f64) -> Option<DateTime<Utc>> {
    if remaining <= 0.0 {
        return Some(now);
    }
    if daily_rate <= 0.0 {
        return None;
    }
    Some(now + fractional_days((remaining / daily_rate).min(MAX_PROJECTION_DAYS)))
}

fn fractional_days(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0).round() as i64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
