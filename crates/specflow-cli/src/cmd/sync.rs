use crate::output::{print_json, print_table};
use clap::ValueEnum;
use specflow_core::sync::{Discrepancy, SyncReport};
use specflow_core::Monitor;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncDirection {
    /// Files into the store, then the store back out to files
    Full,
    /// Task files into the store only
    Files,
    /// Store state out to task files only
    Store,
}

pub fn run(monitor: &Monitor, feature: &str, direction: SyncDirection, json: bool) -> anyhow::Result<()> {
    match direction {
        SyncDirection::Full => {
            let report = monitor.full_sync(feature)?;
            if json {
                return print_json(&report);
            }
            print_files_report(&report.files_to_store);
            print_written(&report.store_to_files);
        }
        SyncDirection::Files => {
            let report = monitor.sync_files_to_store(feature)?;
            if json {
                return print_json(&report);
            }
            print_files_report(&report);
        }
        SyncDirection::Store => {
            let written = monitor.sync_store_to_files(feature)?;
            if json {
                return print_json(&written);
            }
            print_written(&written);
        }
    }
    Ok(())
}

fn print_files_report(report: &SyncReport) {
    println!(
        "Scanned {} file(s), applied {} change(s).",
        report.total_files, report.synced_count
    );
    if !report.is_clean() {
        print_discrepancies(&report.discrepancies);
    }
    if !report.add_to_store.is_empty() {
        println!("Untracked task file(s), run discover to add them:");
        for file in &report.add_to_store {
            println!("  {} {} ({})", file.task_id, file.file_path, file.file_state);
        }
    }
}

fn print_discrepancies(discrepancies: &[Discrepancy]) {
    let rows = discrepancies
        .iter()
        .map(|d| match d {
            Discrepancy::StateChanged {
                task_id,
                store_state,
                file_state,
            } => vec![
                task_id.clone(),
                "updated".to_string(),
                format!("{store_state} -> {file_state}"),
            ],
            Discrepancy::Rejected {
                task_id,
                store_state,
                file_state,
                reason,
            } => vec![
                task_id.clone(),
                "rejected".to_string(),
                format!("{store_state} -> {file_state}: {reason}"),
            ],
        })
        .collect();
    print_table(&["TASK", "RESULT", "DETAIL"], rows);
}

fn print_written(written: &BTreeMap<String, bool>) {
    let (synced, missing): (Vec<_>, Vec<_>) = written.iter().partition(|(_, ok)| **ok);
    println!("Synced {} task file(s) from the store.", synced.len());
    if !missing.is_empty() {
        let ids: Vec<&str> = missing.iter().map(|(id, _)| id.as_str()).collect();
        println!("No writable file for: {}", ids.join(", "));
    }
}
