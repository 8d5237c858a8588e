use crate::cache::{load_cached, refresh_blocking, Cached};
use crate::calendar::{self, CalendarPayload, GoogleCalendarClient};
use crate::cli::{AuthScope, PromptArg, Source};
use crate::clock::{greeting, local_time};
use crate::codec;
use crate::config::Config;
use crate::location;
use crate::model::{normalize_lines, DashboardState, Task};
use crate::oauth::{self, Prompt, ScopeSet};
use crate::shutdown::{self, ContextSnapshot, GoogleWorkspace, Reflections};
use crate::signal::Signal;
use crate::storage::{FileStore, KeyValueStore, Paths, CALENDAR_KEY, WEATHER_KEY};
use crate::ui;
use crate::view;
use crate::weather::{OpenMeteoClient, WeatherReport, WeatherSource};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Config, directories and stores shared by every command.
pub struct Env {
    pub config: Config,
    pub paths: Paths,
    pub store: Arc<dyn KeyValueStore>,
    pub session: FileStore,
}

impl Env {
    pub fn load(paths: Paths) -> Result<Self> {
        let config = Config::load(&paths.config_file)?;
        debug!(data = %paths.data_dir.display(), "resolved paths");
        Ok(Env {
            store: Arc::new(paths.durable_store()),
            session: paths.session_store(),
            config,
            paths,
        })
    }

    fn state(&self) -> DashboardState {
        codec::hydrate(self.store.as_ref())
    }

    fn save(&self, state: &DashboardState) -> Result<()> {
        codec::save(self.store.as_ref(), state)
            .with_context(|| format!("saving dashboard under {:?}", self.paths.data_dir))
    }
}

pub fn show(env: &Env, refresh: bool) -> Result<()> {
    let state = env.state();
    let now = Utc::now();
    let (weather, calendar) = if refresh {
        (
            refresh_weather(env, &state, false),
            refresh_calendar(env, &state, false),
        )
    } else {
        (
            load_cached::<WeatherReport>(env.store.as_ref(), WEATHER_KEY),
            load_cached::<CalendarPayload>(env.store.as_ref(), CALENDAR_KEY),
        )
    };

    let local = local_time(now, Some(location::effective(&state, &env.config)));
    println!("{}", greeting(&env.config.name, &local));
    let place = &location::effective(&state, &env.config).label;
    match view::weather_text(weather.as_ref(), env.config.temperature_unit) {
        Some(line) => println!("{place}: {line}"),
        None => println!("{place}: {}", view::WEATHER_PENDING),
    }

    println!("\nToday");
    for entry in view::appointment_entries(calendar.as_ref()) {
        println!("  {}", entry.plain());
    }
    println!("\nTasks");
    if state.tasks.is_empty() {
        println!("  {}", view::NO_TASKS);
    }
    for (idx, task) in state.tasks.iter().enumerate() {
        let mark = if task.completed { "x" } else { " " };
        println!("  {:>2}. [{}] {}", idx + 1, mark, task.text);
    }
    let notes = view::note_entries(&state.notes);
    if !notes.is_empty() {
        println!("\nNotes");
        for entry in notes {
            println!("  {}", entry.plain());
        }
    }
    println!("\nLinks");
    for entry in view::link_entries(&state.links) {
        println!("  {}", entry.plain());
    }
    Ok(())
}

pub fn task_add(env: &Env, text: String) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        bail!("task text is empty");
    }
    let mut state = env.state();
    state.tasks.push(Task::new(text));
    env.save(&state)?;
    println!("Added task {}: {}", state.tasks.len(), text);
    Ok(())
}

pub fn task_toggle(env: &Env, number: usize) -> Result<()> {
    let mut state = env.state();
    let completed = number
        .checked_sub(1)
        .and_then(|idx| state.toggle_task(idx))
        .with_context(|| format!("no task {} (have {})", number, state.tasks.len()))?;
    env.save(&state)?;
    println!(
        "Task {} {}",
        number,
        if completed { "done" } else { "reopened" }
    );
    Ok(())
}

pub fn note(env: &Env, line: String) -> Result<()> {
    let mut state = env.state();
    let mut lines = normalize_lines(state.notes.lines());
    lines.extend(normalize_lines([line.as_str()]));
    state.notes = lines.join("\n");
    env.save(&state)?;
    Ok(())
}

pub fn link(env: &Env, line: String) -> Result<()> {
    let added = normalize_lines([line.as_str()]);
    if added.is_empty() {
        bail!("link is empty");
    }
    let mut state = env.state();
    state.links.extend(added);
    env.save(&state)?;
    Ok(())
}

pub fn location_set(env: &Env, label: String, lat: f64, lon: f64, timezone: String) -> Result<()> {
    let place = location::validate(&label, lat, lon, &timezone)?;
    let (state, signal) = location::set(env.store.as_ref(), place)?;
    apply_signal(env, &state, signal);
    println!("Location set to {}", location::effective(&state, &env.config).label);
    Ok(())
}

pub fn location_clear(env: &Env) -> Result<()> {
    let (state, signal) = location::clear(env.store.as_ref())?;
    apply_signal(env, &state, signal);
    println!(
        "Location cleared; using {}",
        location::effective(&state, &env.config).label
    );
    Ok(())
}

fn apply_signal(env: &Env, state: &DashboardState, signal: Signal) {
    match signal {
        Signal::LocationUpdated => {
            refresh_weather(env, state, true);
        }
        Signal::TasksUpdated => {}
    }
}

pub fn refresh(env: &Env, source: Source) -> Result<()> {
    let state = env.state();
    if matches!(source, Source::Weather | Source::All) {
        match refresh_weather(env, &state, true) {
            Some(entry) => println!(
                "Weather: {}",
                view::weather_text(Some(&entry), env.config.temperature_unit)
                    .unwrap_or_else(|| view::WEATHER_PENDING.into())
            ),
            None => println!("Weather: unavailable"),
        }
    }
    if matches!(source, Source::Calendar | Source::All) {
        match refresh_calendar(env, &state, true) {
            Some(entry) => println!("Calendar: {} event(s)", entry.payload.items.len()),
            None => println!("Calendar: unavailable (try `lookout auth calendar`)"),
        }
    }
    Ok(())
}

pub fn auth(env: &Env, scope: AuthScope, prompt: PromptArg) -> Result<()> {
    let scope = match scope {
        AuthScope::Calendar => ScopeSet::Calendar,
        AuthScope::Workspace => ScopeSet::Workspace,
    };
    let prompt = match prompt {
        PromptArg::Consent => Prompt::Consent,
        PromptArg::SelectAccount => Prompt::SelectAccount,
        PromptArg::None => Prompt::None,
    };
    println!("Opening the browser to authorize {:?} access...", scope);
    match oauth::authorize(&env.config.google, &env.session, scope, prompt)? {
        Some(_) => println!("Authorized."),
        None => println!("Authorization was not granted."),
    }
    Ok(())
}

pub fn shutdown(env: &Env, reflections: Reflections) -> Result<()> {
    let now = Utc::now();
    let token = shutdown::workspace_token(&env.config.google, &env.session, now.timestamp_millis())?;
    let state = env.state();
    let snapshot = ContextSnapshot::capture(
        &state,
        load_cached::<WeatherReport>(env.store.as_ref(), WEATHER_KEY).as_ref(),
        load_cached::<CalendarPayload>(env.store.as_ref(), CALENDAR_KEY).as_ref(),
        env.config.temperature_unit,
        now,
    );
    let workspace = GoogleWorkspace::new(token);
    let document_id = shutdown::run_pipeline(
        &workspace,
        &env.config.shutdown.recipient,
        &snapshot,
        &reflections,
    )?;
    shutdown::close_day(env.store.as_ref()).context("clearing the day")?;
    info!(document = %document_id, "day closed");
    println!("Saved \"{}\" and mailed it. The day is closed.", snapshot.document_title());
    Ok(())
}

pub fn tui(env: &Env) -> Result<()> {
    ui::run(env)
}

/// One gated weather pass against the durable cache.
pub fn refresh_weather(env: &Env, state: &DashboardState, force: bool) -> Option<Cached<WeatherReport>> {
    let place = location::effective(state, &env.config).clone();
    let client = OpenMeteoClient::new(env.config.temperature_unit);
    refresh_blocking(
        env.store.as_ref(),
        WEATHER_KEY,
        env.config.weather_ttl_ms(),
        Utc::now().timestamp_millis(),
        force,
        || client.current(&place),
    )
}

pub fn refresh_calendar(env: &Env, state: &DashboardState, force: bool) -> Option<Cached<CalendarPayload>> {
    let place = location::effective(state, &env.config).clone();
    let client = GoogleCalendarClient::new();
    let now = Utc::now();
    refresh_blocking(
        env.store.as_ref(),
        CALENDAR_KEY,
        env.config.calendar_ttl_ms(),
        now.timestamp_millis(),
        force,
        || calendar::fetch_today(&client, &env.session, &place, now),
    )
}
