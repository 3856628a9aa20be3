use crate::output::{hours, or_dash, print_json, print_table, timestamp};
use anyhow::Context;
use clap::Subcommand;
use specflow_core::{Monitor, TaskInfo, TaskState};

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// List tasks for a feature
    List {
        feature: String,
        /// Only tasks in this state (e.g. pending, in_progress)
        #[arg(long)]
        state: Option<TaskState>,
    },
    /// Show full details for a single task
    Get { feature: String, task_id: String },
    /// Start a task
    Start { feature: String, task_id: String },
    /// Complete a task
    Complete {
        feature: String,
        task_id: String,
        /// Hours spent on the task
        #[arg(long)]
        hours: Option<f64>,
    },
    /// Mark a task as blocked
    Block {
        feature: String,
        task_id: String,
        #[arg(required = true)]
        reason: Vec<String>,
    },
    /// Move a task back to pending
    Reset { feature: String, task_id: String },
    /// Set any state the transition rules allow
    Set {
        feature: String,
        task_id: String,
        state: TaskState,
        /// Error message, kept while the task is blocked
        #[arg(long)]
        error: Option<String>,
        /// Note recorded in the history entry
        #[arg(long)]
        notes: Option<String>,
    },
    /// Add a task that has no markdown file
    Create {
        feature: String,
        task_id: String,
        #[arg(required = true)]
        title: Vec<String>,
        #[arg(long)]
        estimate: Option<f64>,
    },
    /// Remove a task from the store
    Delete { feature: String, task_id: String },
    /// Show the task to work on next
    Next { feature: String },
}

pub fn run(monitor: &Monitor, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TaskSubcommand::List { feature, state } => list(monitor, &feature, state, json),
        TaskSubcommand::Get { feature, task_id } => get(monitor, &feature, &task_id, json),
        TaskSubcommand::Start { feature, task_id } => {
            let ok = monitor.tasks().start_task(&feature, &task_id)?;
            report(monitor, &feature, &task_id, ok, "start", json)
        }
        TaskSubcommand::Complete {
            feature,
            task_id,
            hours,
        } => {
            let ok = monitor.tasks().complete_task(&feature, &task_id, hours)?;
            report(monitor, &feature, &task_id, ok, "complete", json)
        }
        TaskSubcommand::Block {
            feature,
            task_id,
            reason,
        } => {
            let ok = monitor.tasks().block_task(&feature, &task_id, &reason.join(" "))?;
            report(monitor, &feature, &task_id, ok, "block", json)
        }
        TaskSubcommand::Reset { feature, task_id } => {
            let ok = monitor.tasks().reset_task(&feature, &task_id)?;
            report(monitor, &feature, &task_id, ok, "reset", json)
        }
        TaskSubcommand::Set {
            feature,
            task_id,
            state,
            error,
            notes,
        } => {
            let task = monitor
                .tasks()
                .try_update_task_state(&feature, &task_id, state, error, notes)?;
            print_changed(&feature, &task, json)
        }
        TaskSubcommand::Create {
            feature,
            task_id,
            title,
            estimate,
        } => create(monitor, &feature, &task_id, &title.join(" "), estimate, json),
        TaskSubcommand::Delete { feature, task_id } => delete(monitor, &feature, &task_id, json),
        TaskSubcommand::Next { feature } => next(monitor, &feature, json),
    }
}

/// `specflow discover <feature>`
pub fn discover(monitor: &Monitor, feature: &str, json: bool) -> anyhow::Result<()> {
    let tasks = monitor
        .tasks()
        .discover_tasks(feature)
        .with_context(|| format!("failed to discover tasks for feature '{feature}'"))?;
    if json {
        print_json(&tasks)?;
    } else {
        println!("Discovered {} task(s) in feature {feature}", tasks.len());
        print_task_table(&tasks);
    }
    Ok(())
}

fn list(monitor: &Monitor, feature: &str, state: Option<TaskState>, json: bool) -> anyhow::Result<()> {
    let tasks = match state {
        Some(state) => monitor.tasks().tasks_by_state(feature, state)?,
        None => monitor.tasks().get_tasks(feature)?,
    };
    if json {
        print_json(&tasks)?;
    } else if tasks.is_empty() {
        println!("No tasks.");
    } else {
        print_task_table(&tasks);
        println!();
        println!("{}", specflow_core::task::summarize(&tasks));
    }
    Ok(())
}

fn print_task_table(tasks: &[TaskInfo]) {
    let rows = tasks
        .iter()
        .map(|t| {
            vec![
                t.id.clone(),
                t.state.to_string(),
                t.title.clone(),
                or_dash(t.estimated_hours.map(hours)),
            ]
        })
        .collect();
    print_table(&["ID", "STATE", "TITLE", "EST"], rows);
}

fn get(monitor: &Monitor, feature: &str, task_id: &str, json: bool) -> anyhow::Result<()> {
    let task = monitor
        .tasks()
        .get_task(feature, task_id)?
        .with_context(|| format!("task '{task_id}' not found in feature '{feature}'"))?;
    if json {
        return print_json(&task);
    }
    println!("[{}] {}", task.id, task.title);
    println!("  state:        {}", task.state);
    println!("  last updated: {}", timestamp(task.last_updated));
    if let Some(est) = task.estimated_hours {
        println!("  estimate:     {}", hours(est));
    }
    if let Some(spent) = task.execution_time {
        println!("  spent:        {}", hours(spent));
    }
    if let Some(path) = &task.file_path {
        println!("  file:         {path}");
    }
    if let Some(err) = &task.error_message {
        println!("  error:        {err}");
    }
    if let Some(desc) = &task.description {
        println!();
        println!("{desc}");
    }
    Ok(())
}

/// Report a lenient transition. A rejected one fails with the task's
/// current state.
fn report(
    monitor: &Monitor,
    feature: &str,
    task_id: &str,
    changed: bool,
    verb: &str,
    json: bool,
) -> anyhow::Result<()> {
    let task = monitor.tasks().get_task(feature, task_id)?;
    let Some(task) = task else {
        anyhow::bail!("task '{task_id}' not found in feature '{feature}'");
    };
    if !changed {
        anyhow::bail!("cannot {verb} task {task_id} while it is {}", task.state);
    }
    print_changed(feature, &task, json)
}

fn print_changed(feature: &str, task: &TaskInfo, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&serde_json::json!({
            "feature": feature,
            "task_id": task.id,
            "state": task.state,
            "error_message": task.error_message,
        }))?;
    } else {
        match &task.error_message {
            Some(err) => println!("Task [{}] is now {}: {err}", task.id, task.state),
            None => println!("Task [{}] is now {}", task.id, task.state),
        }
    }
    Ok(())
}

fn create(
    monitor: &Monitor,
    feature: &str,
    task_id: &str,
    title: &str,
    estimate: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let task = monitor.tasks().create_task(feature, task_id, title, estimate)?;
    if json {
        print_json(&task)?;
    } else {
        println!("Created task [{}]: {}", task.id, task.title);
    }
    Ok(())
}

fn delete(monitor: &Monitor, feature: &str, task_id: &str, json: bool) -> anyhow::Result<()> {
    let removed = monitor.tasks().delete_task(feature, task_id)?;
    if json {
        print_json(&serde_json::json!({ "feature": feature, "task_id": task_id, "deleted": removed }))?;
    } else if removed {
        println!("Deleted task [{task_id}]");
    } else {
        anyhow::bail!("task '{task_id}' not found in feature '{feature}'");
    }
    Ok(())
}

fn next(monitor: &Monitor, feature: &str, json: bool) -> anyhow::Result<()> {
    let task = monitor.tasks().next_task(feature)?;
    if json {
        return print_json(&task);
    }
    match task {
        Some(t) => println!("Next: [{}] {} ({})", t.id, t.title, t.state),
        None => println!("Nothing left to do in feature {feature}."),
    }
    Ok(())
}
