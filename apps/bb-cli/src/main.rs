use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bb_core::{
    config_schema_json, load_effective_config, rollover, write_schema_file, Clock, FileKv,
    LessonFrequency, Outcome, SettingsPatch, SystemClock, TopicSelection, Tracker,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "bb-cli", version, about = "Brain Battery tracker state utilities")]
struct Cli {
    /// State file shared by every process (default: per-user data directory)
    #[arg(long, global = true, env = "BB_STATE_FILE")]
    state: Option<PathBuf>,
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored document
    Doc,
    /// Count scroll events
    Scroll {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Record seconds spent on a tracked site
    Tick(SecondsArgs),
    /// Record seconds spent away from tracked sites
    Recharge(SecondsArgs),
    /// Lesson lifecycle
    Lesson {
        #[command(subcommand)]
        cmd: LessonCmd,
    },
    /// Record a completed standalone task
    Task,
    /// Record a click on an answer's external link
    LinkClick {
        /// Milliseconds between revealing the answer and the click
        #[arg(long)]
        since_reveal_ms: u64,
    },
    /// Per-day totals for today or yesterday
    Totals {
        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Whether the lesson in flight will earn the time bonus
    Bonus,
    /// Whether a lesson is due
    Trigger,
    /// Settings helpers
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Args)]
struct SecondsArgs {
    #[arg(long)]
    seconds: u64,
}

#[derive(Subcommand)]
enum LessonCmd {
    /// Mark a lesson as showing
    Begin,
    /// Record the lesson as completed
    Complete,
}

#[derive(Subcommand)]
enum SettingsCmd {
    /// Print current settings
    Show,
    /// Set lesson frequency (often, sometimes, barely)
    Frequency {
        #[arg(value_parser = parse_frequency)]
        value: LessonFrequency,
    },
    /// Select the active theme
    Theme { name: String },
    /// Replace the selected topics of one theme
    Topics {
        #[arg(long)]
        theme: String,
        topics: Vec<String>,
    },
    /// Replace the tracked sites
    Sites { sites: Vec<String> },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print (or write) the config JSON schema
    Schema {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the effective lease and tracker settings
    Show,
}

fn parse_frequency(raw: &str) -> Result<LessonFrequency, String> {
    LessonFrequency::from_slug(raw)
        .ok_or_else(|| format!("unknown frequency '{raw}' (expected often, sometimes or barely)"))
}

fn default_state_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "brain-battery")
        .context("no home directory for the default state file; pass --state")?;
    Ok(dirs.data_dir().join("state.json"))
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

fn open_tracker(state: Option<PathBuf>) -> Result<Tracker<FileKv>> {
    let path = match state {
        Some(p) => p,
        None => default_state_path()?,
    };
    let kv = FileKv::open(&path).with_context(|| format!("opening state file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "using state file");
    Ok(Tracker::with_system(Arc::new(kv), load_effective_config()))
}

async fn run_scrolls(tracker: &Tracker<FileKv>, count: u32) -> serde_json::Value {
    let mut applied = 0u32;
    let mut skipped: BTreeMap<String, u32> = BTreeMap::new();
    let mut last = None;
    for _ in 0..count {
        let outcome = tracker.record_scroll().await;
        match &outcome {
            Outcome::Applied(_) => applied += 1,
            Outcome::Skipped(reason) => {
                let key = serde_json::to_value(reason)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| format!("{reason:?}"));
                *skipped.entry(key).or_default() += 1;
            }
        }
        last = Some(outcome);
    }
    json!({ "applied": applied, "skipped": skipped, "last": last })
}

async fn run(cli: Cli) -> Result<()> {
    let pretty = cli.pretty;
    if let Commands::Config { cmd } = &cli.command {
        return match cmd {
            ConfigCmd::Schema { out: Some(path) } => {
                write_schema_file(path)
                    .with_context(|| format!("writing schema to {}", path.display()))?;
                emit(&json!({ "written": path }), pretty)
            }
            ConfigCmd::Schema { out: None } => emit(&config_schema_json(), pretty),
            ConfigCmd::Show => {
                let cfg = load_effective_config();
                emit(
                    &json!({
                        "leaseTimeoutMs": cfg.lease_timeout_ms,
                        "confirmDelayMs": cfg.confirm_delay.as_millis() as u64,
                        "maxAttempts": cfg.retry.max_attempts,
                        "baseBackoffMs": cfg.retry.base_backoff.as_millis() as u64,
                        "maxBackoffMs": cfg.retry.max_backoff.as_millis() as u64,
                        "jitterMs": cfg.retry.max_jitter.as_millis() as u64,
                        "rolloverGuard": cfg.rollover_guard,
                        "defaultFrequency": cfg.defaults.frequency,
                        "enabledSites": cfg.defaults.enabled_sites,
                        "taxonomy": cfg.defaults.taxonomy,
                    }),
                    pretty,
                )
            }
        };
    }

    let tracker = open_tracker(cli.state)?;
    match cli.command {
        Commands::Doc => emit(&tracker.document().await, pretty),
        Commands::Scroll { count } => emit(&run_scrolls(&tracker, count).await, pretty),
        Commands::Tick(args) => emit(&tracker.record_time_tick(args.seconds).await, pretty),
        Commands::Recharge(args) => emit(&tracker.record_recharge(args.seconds).await, pretty),
        Commands::Lesson { cmd } => match cmd {
            LessonCmd::Begin => emit(&tracker.begin_lesson().await, pretty),
            LessonCmd::Complete => emit(&tracker.record_lesson_completion().await, pretty),
        },
        Commands::Task => emit(&tracker.record_task_completion().await, pretty),
        Commands::LinkClick { since_reveal_ms } => emit(
            &tracker
                .record_link_click(Duration::from_millis(since_reveal_ms))
                .await,
            pretty,
        ),
        Commands::Totals { date } => {
            let date = date.unwrap_or_else(|| rollover::date_key(SystemClock.local_today()));
            let totals = tracker.totals_for(&date).await;
            emit(&json!({ "date": date, "totals": totals }), pretty)
        }
        Commands::Bonus => emit(&json!({ "bonus": tracker.bonus_status().await }), pretty),
        Commands::Trigger => emit(
            &json!({ "trigger": tracker.should_trigger_lesson().await }),
            pretty,
        ),
        Commands::Settings { cmd } => {
            let patch = match cmd {
                SettingsCmd::Show => return emit(&tracker.document().await.settings, pretty),
                SettingsCmd::Frequency { value } => SettingsPatch {
                    lesson_frequency: Some(value),
                    ..Default::default()
                },
                SettingsCmd::Theme { name } => SettingsPatch {
                    selected_theme: Some(name),
                    ..Default::default()
                },
                SettingsCmd::Topics { theme, topics } => SettingsPatch {
                    selected_topics: Some(TopicSelection { theme, topics }),
                    ..Default::default()
                },
                SettingsCmd::Sites { sites } => SettingsPatch {
                    enabled_sites: Some(sites),
                    ..Default::default()
                },
            };
            emit(&tracker.update_settings(patch).await, pretty)
        }
        Commands::Config { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    bb_otel::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
