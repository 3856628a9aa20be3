use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use specflow_core::config::WarnLevel;
use specflow_core::Monitor;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show the current monitoring options
    Show,

    /// Change one option, e.g. `config set cache_ttl_seconds 60`
    Set { key: String, value: String },

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(monitor: &Monitor, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(monitor, json),
        ConfigSubcommand::Set { key, value } => set(monitor, &key, &value, json),
        ConfigSubcommand::Validate => validate(monitor, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(monitor: &Monitor, json: bool) -> anyhow::Result<()> {
    let config = monitor.store().load_config().context("failed to load config")?;
    if json {
        return print_json(&config);
    }
    let value = serde_json::to_value(&config)?;
    if let Some(fields) = value.as_object() {
        for (key, v) in fields {
            println!("{key:<26} {v}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// set
// ---------------------------------------------------------------------------

fn set(monitor: &Monitor, key: &str, value: &str, json: bool) -> anyhow::Result<()> {
    let mut config = monitor.store().load_config().context("failed to load config")?;
    config.set(key, value)?;
    monitor.store().save_config(&config).context("failed to save config")?;
    if json {
        print_json(&config)?;
    } else {
        println!("{key} = {value}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(monitor: &Monitor, json: bool) -> anyhow::Result<()> {
    let config = monitor.store().read_config().context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
