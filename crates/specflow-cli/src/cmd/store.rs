use crate::output::{print_json, print_table};
use specflow_core::Monitor;

pub fn validate(monitor: &Monitor, json: bool) -> anyhow::Result<()> {
    let report = monitor.validate();
    if json {
        print_json(&report)?;
    } else {
        let rows = report
            .files
            .iter()
            .map(|(name, status)| {
                let state = match (status.exists, status.valid) {
                    (false, _) => "missing",
                    (true, true) => "ok",
                    (true, false) => "invalid",
                };
                vec![name.clone(), state.to_string(), status.size_bytes.to_string()]
            })
            .collect();
        print_table(&["FILE", "STATUS", "BYTES"], rows);
        for issue in &report.issues {
            println!("[error] {issue}");
        }
    }
    if !report.valid {
        anyhow::bail!("store validation found {} issue(s)", report.issues.len());
    }
    Ok(())
}

pub fn features(monitor: &Monitor, json: bool) -> anyhow::Result<()> {
    let ids = monitor.features()?;
    if json {
        return print_json(&ids);
    }
    if ids.is_empty() {
        println!("No features found.");
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

pub fn reset_feature(monitor: &Monitor, feature: &str, json: bool) -> anyhow::Result<()> {
    let removed = monitor.reset_feature(feature)?;
    if json {
        print_json(&serde_json::json!({ "feature": feature, "reset": removed }))?;
    } else if removed {
        println!("Cleared stored state for feature {feature}.");
    } else {
        println!("Nothing stored for feature {feature}.");
    }
    Ok(())
}

pub fn stats(monitor: &Monitor, json: bool) -> anyhow::Result<()> {
    let stats = monitor.store().storage_stats()?;
    if json {
        return print_json(&stats);
    }
    println!("Memory dir: {}", stats.memory_dir.display());
    println!(
        "Features: {}  Tasks: {}  History entries: {}",
        stats.features, stats.tasks, stats.history_entries
    );
    let rows = stats
        .resources
        .iter()
        .map(|r| {
            vec![
                r.file.clone(),
                if r.exists { r.size_bytes.to_string() } else { "-".to_string() },
                r.backups.to_string(),
            ]
        })
        .collect();
    print_table(&["FILE", "BYTES", "BACKUPS"], rows);
    Ok(())
}
