use anyhow::Result;
use clap::Parser;
use lookout::cli::{self, Command, LocationAction, LogTarget, TaskAction};
use lookout::commands::{self, Env};
use lookout::shutdown::Reflections;
use lookout::storage::Paths;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.command.unwrap_or(Command::Tui);

    let paths = Paths::resolve(args.data_dir.as_deref(), args.config.as_deref())?;
    let log_file = paths.log_file();
    let target = match command {
        Command::Tui => LogTarget::File(&log_file),
        _ => LogTarget::Stderr,
    };
    cli::init_tracing(args.verbose, target)?;

    let env = Env::load(paths)?;
    match command {
        Command::Tui => commands::tui(&env),
        Command::Show { refresh } => commands::show(&env, refresh),
        Command::Task { action } => match action {
            TaskAction::Add { text } => commands::task_add(&env, text),
            TaskAction::Toggle { number } => commands::task_toggle(&env, number),
        },
        Command::Note { line } => commands::note(&env, line),
        Command::Link { line } => commands::link(&env, line),
        Command::Location { action } => match action {
            LocationAction::Set {
                label,
                lat,
                lon,
                timezone,
            } => commands::location_set(&env, label, lat, lon, timezone),
            LocationAction::Clear => commands::location_clear(&env),
        },
        Command::Refresh { source } => commands::refresh(&env, source),
        Command::Auth { scope, prompt } => commands::auth(&env, scope, prompt),
        Command::Shutdown {
            went_well,
            didnt_go,
            remaining,
        } => commands::shutdown(
            &env,
            Reflections {
                went_well: went_well.unwrap_or_default(),
                didnt_go: didnt_go.unwrap_or_default(),
                remaining: remaining.unwrap_or_default(),
            },
        ),
    }
}
