use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lookout", version, about = "A calm start page for the terminal")]
pub struct Cli {
    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory for the dashboard and caches
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the interactive dashboard
    Tui,
    /// Print the dashboard
    Show {
        /// Fetch stale weather and calendar data first
        #[arg(long)]
        refresh: bool,
    },
    /// Add or toggle tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Append a line to the notes
    Note { line: String },
    /// Append a link
    Link { line: String },
    /// Set or clear the saved location
    Location {
        #[command(subcommand)]
        action: LocationAction,
    },
    /// Fetch remote data now, ignoring cache freshness
    Refresh {
        #[arg(value_enum, default_value_t = Source::All)]
        source: Source,
    },
    /// Authorize Google access in the browser
    Auth {
        #[arg(value_enum)]
        scope: AuthScope,
        #[arg(long, value_enum, default_value_t = PromptArg::Consent)]
        prompt: PromptArg,
    },
    /// Archive the day to Google Docs, mail it, and clear the dashboard
    Shutdown {
        #[arg(long)]
        went_well: Option<String>,
        #[arg(long)]
        didnt_go: Option<String>,
        #[arg(long)]
        remaining: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// Append a task
    Add { text: String },
    /// Flip a task's completed flag (1-based position)
    Toggle { number: usize },
}

#[derive(Subcommand, Debug)]
pub enum LocationAction {
    Set {
        #[arg(long)]
        label: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// IANA zone name, e.g. America/Chicago
        #[arg(long)]
        timezone: String,
    },
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Weather,
    Calendar,
    All,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScope {
    Calendar,
    Workspace,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptArg {
    Consent,
    SelectAccount,
    None,
}

/// Where log lines go. The dashboard owns the terminal, so it logs to a
/// file instead.
pub enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
}

pub fn init_tracing(verbose: u8, target: LogTarget<'_>) -> anyhow::Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true);

    let init_result = match target {
        LogTarget::Stderr => builder
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .try_init(),
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {:?}", path))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
    };

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }
    Ok(())
}
