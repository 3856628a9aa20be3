use crate::output::{hours, or_dash, print_json, print_table, timestamp};
use specflow_core::analytics::EstimateStatus;
use specflow_core::Monitor;

pub fn progress(monitor: &Monitor, feature: &str, weighted: bool, json: bool) -> anyhow::Result<()> {
    let progress = monitor.refresh_progress(feature)?;
    let weighted = if weighted {
        Some(monitor.weighted_progress(feature)?)
    } else {
        None
    };

    if json {
        return print_json(&serde_json::json!({
            "progress": progress,
            "weighted": weighted,
        }));
    }

    println!(
        "Feature {}: {:.1}% complete ({}/{} tasks)",
        progress.feature_id(),
        progress.percentage(),
        progress.completed_tasks(),
        progress.total_tasks()
    );
    println!(
        "  in progress: {}  blocked: {}  pending: {}",
        progress.in_progress_tasks(),
        progress.blocked_tasks(),
        progress.pending_tasks()
    );
    if let Some(at) = progress.estimated_completion() {
        println!("  estimated completion: {}", timestamp(at));
    }
    if let Some(w) = weighted {
        println!(
            "  weighted: {:.1}% ({:.1} of {:.1} weight earned)",
            w.percentage, w.earned_weight, w.total_weight
        );
    }
    Ok(())
}

pub fn trend(monitor: &Monitor, feature: &str, days: u32, json: bool) -> anyhow::Result<()> {
    let trend = monitor.trend(feature, days)?;
    if json {
        return print_json(&trend);
    }
    println!(
        "Trend over {} days: {} ({} completions, {:.2}/day, confidence {:.2})",
        trend.days_analyzed,
        trend.trend.as_str(),
        trend.total_completions,
        trend.average_daily_rate,
        trend.confidence
    );
    if let Some(at) = trend.predicted_completion {
        println!("Predicted completion: {}", timestamp(at));
    }
    if !trend.daily_completions.is_empty() {
        let rows = trend
            .daily_completions
            .iter()
            .map(|(day, count)| vec![day.to_string(), count.to_string()])
            .collect();
        print_table(&["DAY", "COMPLETED"], rows);
    }
    Ok(())
}

pub fn health(monitor: &Monitor, feature: &str, json: bool) -> anyhow::Result<()> {
    let health = monitor.health(feature)?;
    if json {
        return print_json(&health);
    }
    println!("Health: {}/100 ({})", health.score, health.status.as_str());
    for penalty in &health.penalties {
        println!("  -{:<3} {}", penalty.points, penalty.description);
    }
    Ok(())
}

pub fn estimate(monitor: &Monitor, feature: &str, json: bool) -> anyhow::Result<()> {
    let estimate = monitor.estimate(feature)?;
    if json {
        return print_json(&estimate);
    }
    match estimate.status {
        EstimateStatus::Complete => println!("All tasks are done."),
        EstimateStatus::Stalled => println!(
            "No completions in the last week; {} task(s) ({}) remaining, no projection.",
            estimate.remaining_tasks,
            hours(estimate.remaining_hours)
        ),
        EstimateStatus::Projected => {
            println!(
                "{} task(s) ({}) remaining at {:.2} completions/day",
                estimate.remaining_tasks,
                hours(estimate.remaining_hours),
                estimate.daily_rate
            );
            println!(
                "Estimated completion: {} (confidence {:.2})",
                or_dash(estimate.estimated_completion.map(timestamp)),
                estimate.confidence
            );
        }
    }
    Ok(())
}

pub fn history(monitor: &Monitor, feature: &str, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let entries = monitor.history(feature, limit)?;
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No history.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                timestamp(e.timestamp),
                e.task_id.clone(),
                or_dash(e.old_state),
                e.new_state.to_string(),
                or_dash(e.notes.as_deref()),
            ]
        })
        .collect();
    print_table(&["WHEN", "TASK", "FROM", "TO", "NOTES"], rows);
    Ok(())
}
