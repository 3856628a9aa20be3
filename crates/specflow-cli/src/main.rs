mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, sync::SyncDirection, task::TaskSubcommand};
use specflow_core::{Monitor, MonitorOptions};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "specflow",
    about = "Track task state across spec task files and report progress",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .specflow/ or .git/)
    #[arg(long, global = true, env = "SPECFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// How long to wait for a store lock before giving up
    #[arg(
        long,
        global = true,
        env = "SPECFLOW_LOCK_TIMEOUT_MS",
        value_name = "MS",
        default_value_t = 10_000
    )]
    lock_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and change task state
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Scan a feature's task files and merge them into the store
    Discover { feature: String },

    /// Show (and record) completion progress for a feature
    Progress {
        feature: String,
        /// Weight tasks by estimated hours
        #[arg(long)]
        weighted: bool,
    },

    /// Completion velocity over recent days
    Trend {
        feature: String,
        #[arg(long, default_value_t = 14, value_parser = clap::value_parser!(u32).range(1..=36_500))]
        days: u32,
    },

    /// Health score with the issues that lowered it
    Health { feature: String },

    /// Projected completion date
    Estimate { feature: String },

    /// Recent state changes, oldest first
    History {
        feature: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Reconcile task files and the store
    Sync {
        feature: String,
        #[arg(long, value_enum, default_value_t = SyncDirection::Full)]
        direction: SyncDirection,
    },

    /// Check the store files for corruption
    Validate,

    /// List known features
    Features,

    /// Drop all stored state for a feature
    ResetFeature { feature: String },

    /// Store file sizes, backups and counts
    Stats,

    /// Show, change or validate monitoring options
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let options =
        MonitorOptions::default().with_lock_timeout(Duration::from_millis(cli.lock_timeout_ms));

    let result = Monitor::open(&root, options)
        .map_err(anyhow::Error::from)
        .and_then(|monitor| dispatch(&monitor, cli.command, cli.json));

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn dispatch(monitor: &Monitor, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Task { subcommand } => cmd::task::run(monitor, subcommand, json),
        Commands::Discover { feature } => cmd::task::discover(monitor, &feature, json),
        Commands::Progress { feature, weighted } => {
            cmd::analytics::progress(monitor, &feature, weighted, json)
        }
        Commands::Trend { feature, days } => cmd::analytics::trend(monitor, &feature, days, json),
        Commands::Health { feature } => cmd::analytics::health(monitor, &feature, json),
        Commands::Estimate { feature } => cmd::analytics::estimate(monitor, &feature, json),
        Commands::History { feature, limit } => {
            cmd::analytics::history(monitor, &feature, limit, json)
        }
        Commands::Sync { feature, direction } => cmd::sync::run(monitor, &feature, direction, json),
        Commands::Validate => cmd::store::validate(monitor, json),
        Commands::Features => cmd::store::features(monitor, json),
        Commands::ResetFeature { feature } => cmd::store::reset_feature(monitor, &feature, json),
        Commands::Stats => cmd::store::stats(monitor, json),
        Commands::Config { subcommand } => cmd::config::run(monitor, subcommand, json),
    }
}
