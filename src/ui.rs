use crate::buffer::TextBuffer;
use crate::cache::{load_cached, save_cached, Poller};
use crate::calendar::{self, CalendarPayload, GoogleCalendarClient};
use crate::clock::{greeting, local_time, until_next_minute};
use crate::codec;
use crate::commands::Env;
use crate::error::{AuthError, FetchError, LocationError, ShutdownError};
use crate::location;
use crate::model::{DashboardState, Location};
use crate::oauth::{self, OAuthToken, Prompt, ScopeSet};
use crate::session::{EditBuffer, EditSession, SessionState, Slice};
use crate::shutdown::{self, ContextSnapshot, GoogleWorkspace, Reflections};
use crate::signal::Signal;
use crate::storage::{CALENDAR_KEY, WEATHER_KEY};
use crate::view::{self, Entry};
use crate::weather::{OpenMeteoClient, WeatherReport, WeatherSource};
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Terminal;
use std::io::{stdout, Stdout};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub fn run(env: &Env) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let mut app = App::new(env);
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result
}

/// Results coming back from worker threads.
enum Outcome {
    Weather(Result<WeatherReport, FetchError>),
    Calendar(Result<CalendarPayload, FetchError>),
    Authorized(Result<Option<OAuthToken>, AuthError>),
    Shutdown(Result<String, ShutdownError>),
}

struct App<'a> {
    env: &'a Env,
    state: DashboardState,
    session: EditSession,
    selected_task: usize,
    task_offset: usize,
    mode: Mode,
    weather: Poller<WeatherReport>,
    calendar: Poller<CalendarPayload>,
    authorizing: bool,
    tx: Sender<Outcome>,
    rx: Receiver<Outcome>,
    areas: Areas,
    now: DateTime<Utc>,
    next_tick: Instant,
    status: String,
}

enum Mode {
    Normal,
    Location(LocationForm),
    Shutdown(ShutdownForm),
}

/// Where each module was drawn last frame, for mouse hit-testing.
#[derive(Default, Clone, Copy)]
struct Areas {
    tasks: Option<Rect>,
    notes: Option<Rect>,
    links: Option<Rect>,
}

const LOCATION_LABELS: [&str; 4] = ["Label", "Latitude", "Longitude", "Time zone"];

struct LocationForm {
    fields: [TextBuffer; 4],
    field: usize,
    error: Option<String>,
}

const SHUTDOWN_PROMPTS: [&str; 3] = [
    "What went well today?",
    "What didn’t go as expected?",
    "What, if any, tasks from today remain for tomorrow?",
];

struct ShutdownForm {
    answers: [TextBuffer; 3],
    field: usize,
    preview: Vec<String>,
    submitting: bool,
}

impl Areas {
    fn get(&self, slice: Slice) -> Option<Rect> {
        match slice {
            Slice::Tasks => self.tasks,
            Slice::Notes => self.notes,
            Slice::Links => self.links,
        }
        .filter(|r| r.width > 0 && r.height > 0)
    }

    fn slice_at(&self, column: u16, row: u16) -> Option<Slice> {
        [Slice::Tasks, Slice::Notes, Slice::Links]
            .into_iter()
            .find(|slice| self.get(*slice).is_some_and(|r| hit(r, column, row)))
    }
}

impl<'a> App<'a> {
    fn new(env: &'a Env) -> Self {
        let state = codec::hydrate(env.store.as_ref());
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let mut weather = Poller::new(env.config.weather_ttl_ms());
        weather.seed(load_cached(env.store.as_ref(), WEATHER_KEY), now_ms);
        let mut calendar = Poller::new(env.config.calendar_ttl_ms());
        calendar.seed(load_cached(env.store.as_ref(), CALENDAR_KEY), now_ms);
        let (tx, rx) = mpsc::channel();
        App {
            env,
            state,
            session: EditSession::new(),
            selected_task: 0,
            task_offset: 0,
            mode: Mode::Normal,
            weather,
            calendar,
            authorizing: false,
            tx,
            rx,
            areas: Areas::default(),
            now,
            next_tick: Instant::now() + until_next_minute(now),
            status: String::new(),
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.tick();
            terminal.draw(|f| self.draw(f))?;
            if event::poll(Duration::from_millis(200))? {
                let quit = match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key)?,
                    Event::Mouse(mouse) => {
                        self.handle_mouse(mouse);
                        false
                    }
                    _ => false,
                };
                self.session.settle();
                if quit {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Clock, worker results and due polls. Runs once per loop pass.
    fn tick(&mut self) {
        if Instant::now() >= self.next_tick {
            self.now = Utc::now();
            self.next_tick = Instant::now() + until_next_minute(self.now);
        }
        while let Ok(outcome) = self.rx.try_recv() {
            self.apply(outcome);
        }
        let now_ms = Utc::now().timestamp_millis();
        if self.weather.take_due(now_ms) {
            self.spawn_weather();
        }
        if self.calendar.take_due(now_ms) {
            self.spawn_calendar();
        }
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn current_location(&self) -> Location {
        location::effective(&self.state, &self.env.config).clone()
    }

    fn spawn_weather(&self) {
        let place = self.current_location();
        let unit = self.env.config.temperature_unit;
        debug!(location = %place.label, "weather poll");
        self.spawn(move || Outcome::Weather(OpenMeteoClient::new(unit).current(&place)));
    }

    fn spawn_calendar(&self) {
        let place = self.current_location();
        let session = self.env.session.clone();
        debug!("calendar poll");
        self.spawn(move || {
            let client = GoogleCalendarClient::new();
            Outcome::Calendar(calendar::fetch_today(&client, &session, &place, Utc::now()))
        });
    }

    fn apply(&mut self, outcome: Outcome) {
        let now_ms = Utc::now().timestamp_millis();
        match outcome {
            Outcome::Weather(result) => {
                log_fetch("weather", &result);
                if let Some(entry) = self.weather.complete(result, now_ms) {
                    if let Err(err) = save_cached(self.env.store.as_ref(), WEATHER_KEY, entry) {
                        warn!(error = %err, "could not cache weather");
                    }
                }
            }
            Outcome::Calendar(result) => {
                log_fetch("calendar", &result);
                if let Some(entry) = self.calendar.complete(result, now_ms) {
                    if let Err(err) = save_cached(self.env.store.as_ref(), CALENDAR_KEY, entry) {
                        warn!(error = %err, "could not cache calendar");
                    }
                }
            }
            Outcome::Authorized(result) => {
                self.authorizing = false;
                match result {
                    Ok(Some(_)) => {
                        info!("calendar authorized");
                        self.calendar.force();
                    }
                    Ok(None) => info!("calendar authorization not granted"),
                    Err(err) => warn!(error = %err, "calendar authorization failed"),
                }
            }
            Outcome::Shutdown(result) => {
                if let Mode::Shutdown(form) = &mut self.mode {
                    form.submitting = false;
                }
                match result {
                    Ok(document_id) => {
                        info!(document = %document_id, "shutdown complete");
                        match shutdown::close_day(self.env.store.as_ref()) {
                            Ok(_) => self.handle_signal(Signal::TasksUpdated),
                            Err(err) => {
                                warn!(error = %err, "could not save cleared day");
                                self.state.clear_day();
                            }
                        }
                        self.mode = Mode::Normal;
                        self.status = "The day is closed.".into();
                    }
                    Err(err) => warn!(step = err.step.label(), error = %err, "shutdown failed"),
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        debug!(?signal, "signal");
        match signal {
            Signal::TasksUpdated => {
                self.state = codec::hydrate(self.env.store.as_ref());
                self.clamp_selection();
            }
            Signal::LocationUpdated => {
                self.weather.force();
                self.now = Utc::now();
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.session.is_editing() {
            self.handle_edit_key(key);
            return Ok(false);
        }
        match self.mode {
            Mode::Normal => Ok(self.handle_normal_key(key)),
            Mode::Location(_) => {
                self.handle_location_key(key);
                Ok(false)
            }
            Mode::Shutdown(_) => {
                self.handle_shutdown_key(key);
                Ok(false)
            }
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('t') => self.begin_edit(Slice::Tasks),
            KeyCode::Char('n') => self.begin_edit(Slice::Notes),
            KeyCode::Char('l') => self.begin_edit(Slice::Links),
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_task = self.selected_task.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected_task + 1 < self.state.tasks.len() {
                    self.selected_task += 1;
                }
            }
            KeyCode::Char(' ') => self.toggle_selected(),
            KeyCode::Char('o') => {
                self.mode = Mode::Location(LocationForm::new(&self.current_location()));
                self.status = "Enter save • Ctrl+D clear saved location • Esc close".into();
            }
            KeyCode::Char('s') => self.open_shutdown(),
            KeyCode::Char('a') => self.authorize_calendar(),
            KeyCode::Char('r') => {
                self.weather.force();
                self.calendar.force();
                self.status = "Refreshing".into();
            }
            _ => {}
        }
        false
    }

    fn begin_edit(&mut self, slice: Slice) {
        let present = self.areas.get(slice).is_some();
        if self.session.enter(slice, &self.state, present) {
            self.status = format!("Editing {} • Esc or click outside to finish", slice.label());
        }
    }

    fn finish_edit(&mut self) {
        let Some(slice) = self.session.editing_slice() else {
            return;
        };
        let present = self.areas.get(slice).is_some();
        if let Some(commit) = self.session.commit(&self.state, present) {
            self.state = commit.state;
            let saved = self.persist();
            self.clamp_selection();
            self.status.clear();
            // Only a stored commit is announced; re-reading an unsaved one would drop it.
            if saved && slice == Slice::Tasks {
                self.handle_signal(Signal::TasksUpdated);
            }
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Esc {
            self.finish_edit();
            return;
        }
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);
        let mut collapsed = false;
        match self.session.buffer_mut() {
            Some(EditBuffer::Lines(list)) => match key.code {
                KeyCode::Enter => list.split(),
                KeyCode::Backspace => collapsed = list.backspace(),
                KeyCode::Up => list.focus_prev(),
                KeyCode::Down => list.focus_next(),
                KeyCode::Left => list.focused_mut().move_left(),
                KeyCode::Right => list.focused_mut().move_right(),
                KeyCode::Char(c) if plain => list.focused_mut().insert_char(c),
                _ => {}
            },
            Some(EditBuffer::Text(text)) => edit_text(text, key),
            None => {}
        }
        if collapsed {
            self.finish_edit();
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if !matches!(mouse.kind, MouseEventKind::Down(MouseButton::Left)) {
            return;
        }
        if !matches!(self.mode, Mode::Normal) {
            return;
        }
        let clicked = self.areas.slice_at(mouse.column, mouse.row);
        if let Some(slice) = self.session.editing_slice() {
            if clicked != Some(slice) && self.session.closes_on_outside_click() {
                self.finish_edit();
            }
            return;
        }
        if let Some(slice) = clicked {
            self.begin_edit(slice);
        }
    }

    fn toggle_selected(&mut self) {
        if let Some(completed) = self.state.toggle_task(self.selected_task) {
            debug!(index = self.selected_task, completed, "task toggled");
            if self.persist() {
                self.handle_signal(Signal::TasksUpdated);
            }
        }
    }

    /// Saves the current state; a failed write leaves the session usable.
    fn persist(&mut self) -> bool {
        match codec::save(self.env.store.as_ref(), &self.state) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "dashboard not saved");
                false
            }
        }
    }

    fn clamp_selection(&mut self) {
        self.selected_task = self
            .selected_task
            .min(self.state.tasks.len().saturating_sub(1));
    }

    fn authorize_calendar(&mut self) {
        if self.authorizing {
            return;
        }
        if !self.env.config.google.is_configured() {
            debug!("calendar authorization skipped, no client id");
            return;
        }
        self.authorizing = true;
        self.status = "Waiting for browser authorization".into();
        let google = self.env.config.google.clone();
        let session = self.env.session.clone();
        self.spawn(move || {
            Outcome::Authorized(oauth::authorize(
                &google,
                &session,
                ScopeSet::Calendar,
                Prompt::Consent,
            ))
        });
    }

    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot::capture(
            &self.state,
            self.weather.snapshot(),
            self.calendar.snapshot(),
            self.env.config.temperature_unit,
            Utc::now(),
        )
    }

    fn open_shutdown(&mut self) {
        self.mode = Mode::Shutdown(ShutdownForm::new(self.snapshot().preview_lines()));
        self.status = "Tab next prompt • Ctrl+S close the day • Esc cancel".into();
    }

    fn handle_location_key(&mut self, key: KeyEvent) {
        let mut mode = std::mem::replace(&mut self.mode, Mode::Normal);
        let mut close_form = false;
        if let Mode::Location(form) = &mut mode {
            let control = key.modifiers.contains(KeyModifiers::CONTROL);
            match key.code {
                KeyCode::Esc => close_form = true,
                KeyCode::Tab | KeyCode::Down => form.field = (form.field + 1) % LOCATION_LABELS.len(),
                KeyCode::BackTab | KeyCode::Up => {
                    form.field = (form.field + LOCATION_LABELS.len() - 1) % LOCATION_LABELS.len()
                }
                KeyCode::Char('d') if control => {
                    close_form = self.apply_location(location::clear(self.env.store.as_ref()), form);
                }
                KeyCode::Enter => match form.parse() {
                    Ok(place) => {
                        close_form = self.apply_location(location::set(self.env.store.as_ref(), place), form);
                    }
                    Err(message) => form.error = Some(message),
                },
                KeyCode::Left => form.fields[form.field].move_left(),
                KeyCode::Right => form.fields[form.field].move_right(),
                KeyCode::Backspace => form.fields[form.field].backspace(),
                KeyCode::Char(c) if !control => form.fields[form.field].insert_char(c),
                _ => {}
            }
        }
        if close_form {
            self.status.clear();
        } else {
            self.mode = mode;
        }
    }

    fn apply_location(
        &mut self,
        result: Result<(DashboardState, Signal), LocationError>,
        form: &mut LocationForm,
    ) -> bool {
        match result {
            Ok((state, signal)) => {
                self.state = state;
                self.handle_signal(signal);
                true
            }
            Err(err) => {
                warn!(error = %err, "location not saved");
                form.error = Some(err.to_string());
                false
            }
        }
    }

    fn handle_shutdown_key(&mut self, key: KeyEvent) {
        let submit = {
            let Mode::Shutdown(form) = &mut self.mode else {
                return;
            };
            let control = key.modifiers.contains(KeyModifiers::CONTROL);
            match key.code {
                KeyCode::Esc => {
                    self.mode = Mode::Normal;
                    self.status.clear();
                    return;
                }
                KeyCode::Tab => form.field = (form.field + 1) % SHUTDOWN_PROMPTS.len(),
                KeyCode::BackTab => {
                    form.field = (form.field + SHUTDOWN_PROMPTS.len() - 1) % SHUTDOWN_PROMPTS.len()
                }
                KeyCode::Char('s') if control => {}
                _ => edit_text(&mut form.answers[form.field], key),
            }
            if key.code == KeyCode::Char('s') && control && !form.submitting {
                form.submitting = true;
                Some(form.reflections())
            } else {
                None
            }
        };
        if let Some(reflections) = submit {
            self.submit_shutdown(reflections);
        }
    }

    fn submit_shutdown(&mut self, reflections: Reflections) {
        let snapshot = self.snapshot();
        let google = self.env.config.google.clone();
        let session = self.env.session.clone();
        let recipient = self.env.config.shutdown.recipient.clone();
        info!(date = %snapshot.header.date, "closing the day");
        self.status = "Closing the day".into();
        self.spawn(move || {
            let result = shutdown::workspace_token(&google, &session, Utc::now().timestamp_millis())
                .and_then(|token| {
                    shutdown::run_pipeline(
                        &GoogleWorkspace::new(token),
                        &recipient,
                        &snapshot,
                        &reflections,
                    )
                });
            Outcome::Shutdown(result)
        });
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(3),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_modules(f, layout[1]);
        self.draw_footer(f, layout[2]);

        match &self.mode {
            Mode::Location(form) => draw_location(f, form),
            Mode::Shutdown(form) => draw_shutdown(f, form),
            Mode::Normal => {}
        }
    }

    /// Header time, in the same place the weather and calendar use.
    fn clock(&self) -> DateTime<FixedOffset> {
        local_time(
            self.now,
            Some(location::effective(&self.state, &self.env.config)),
        )
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let local = self.clock();
        let place = location::effective(&self.state, &self.env.config);
        let weather = view::weather_text(self.weather.snapshot(), self.env.config.temperature_unit)
            .unwrap_or_else(|| view::WEATHER_PENDING.to_string());
        let title = Line::from(vec![
            Span::styled(
                greeting(&self.env.config.name, &local),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  •  "),
            Span::styled(place.label.clone(), Style::default().fg(Color::Green)),
            Span::raw("  "),
            Span::styled(weather, Style::default().fg(Color::LightYellow)),
        ]);
        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(title)
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_modules(&mut self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);
        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(columns[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(columns[1]);

        self.areas = Areas {
            tasks: Some(left[0]),
            notes: Some(left[1]),
            links: Some(right[1]),
        };

        let appointments = view::lines(&view::appointment_entries(self.calendar.snapshot()), None);
        f.render_widget(
            Paragraph::new(appointments)
                .wrap(Wrap { trim: true })
                .block(module_block("Today", false)),
            right[0],
        );

        self.draw_tasks(f, left[0]);
        self.draw_text_module(f, Slice::Notes, left[1], view::note_entries(&self.state.notes));
        self.draw_text_module(f, Slice::Links, right[1], view::link_entries(&self.state.links));
    }

    fn draw_tasks(&mut self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let editing = self.session.editing_slice() == Some(Slice::Tasks);
        let lines: Vec<Line<'static>> = match self.session.state() {
            SessionState::Editing {
                slice: Slice::Tasks,
                buffer: EditBuffer::Lines(list),
            } => list
                .lines()
                .iter()
                .enumerate()
                .map(|(idx, row)| {
                    if idx == list.focus() {
                        Line::from(vec![
                            Span::styled("› ", Style::default().fg(Color::Cyan)),
                            Span::styled(row.with_caret(), Style::default().fg(Color::Cyan)),
                        ])
                    } else {
                        Line::from(format!("  {}", row.value()))
                    }
                })
                .collect(),
            _ => {
                let entries = view::task_entries(&self.state.tasks);
                let selected = (!self.state.tasks.is_empty()).then_some(self.selected_task);
                view::lines(&entries, selected)
            }
        };
        let viewport = area.height.saturating_sub(2) as usize;
        let offset = self.task_scroll(viewport, lines.len());
        let paragraph = Paragraph::new(lines)
            .scroll((offset as u16, 0))
            .block(module_block("Tasks", editing));
        f.render_widget(paragraph, area);
    }

    /// Keeps the edit focus in view while editing, else the selection.
    fn task_scroll(&mut self, viewport: usize, rows: usize) -> usize {
        let focus = match self.session.state() {
            SessionState::Editing {
                buffer: EditBuffer::Lines(list),
                ..
            } => list.focus(),
            _ => self.selected_task,
        };
        self.task_offset = adjust_offset(focus, self.task_offset, viewport, 1, rows);
        self.task_offset
    }

    fn draw_text_module(&self, f: &mut ratatui::Frame<'_>, slice: Slice, area: Rect, entries: Vec<Entry>) {
        let editing = self.session.editing_slice() == Some(slice);
        let lines: Vec<Line<'static>> = match self.session.state() {
            SessionState::Editing {
                slice: open,
                buffer: EditBuffer::Text(text),
            } if *open == slice => text
                .with_caret()
                .split('\n')
                .map(|line| Line::from(Span::styled(line.to_string(), Style::default().fg(Color::Cyan))))
                .collect(),
            _ => view::lines(&entries, None),
        };
        let title = match slice {
            Slice::Tasks => "Tasks",
            Slice::Notes => "Notes",
            Slice::Links => "Links",
        };
        let paragraph = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(module_block(title, editing));
        f.render_widget(paragraph, area);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(1)])
            .split(area);
        let help_bar = Paragraph::new(footer_help_line())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help_bar, rows[0]);
        let status = Paragraph::new(Span::styled(
            self.status.clone(),
            Style::default().fg(Color::Gray),
        ))
        .alignment(Alignment::Center);
        f.render_widget(status, rows[1]);
    }
}

impl LocationForm {
    fn new(current: &Location) -> Self {
        LocationForm {
            fields: [
                TextBuffer::new(&current.label),
                TextBuffer::new(&current.lat.to_string()),
                TextBuffer::new(&current.lon.to_string()),
                TextBuffer::new(&current.timezone),
            ],
            field: 0,
            error: None,
        }
    }

    fn parse(&self) -> Result<Location, String> {
        let lat: f64 = self.fields[1]
            .value()
            .trim()
            .parse()
            .map_err(|_| "latitude must be a number".to_string())?;
        let lon: f64 = self.fields[2]
            .value()
            .trim()
            .parse()
            .map_err(|_| "longitude must be a number".to_string())?;
        location::validate(self.fields[0].value(), lat, lon, self.fields[3].value())
            .map_err(|err| err.to_string())
    }
}

impl ShutdownForm {
    fn new(preview: Vec<String>) -> Self {
        ShutdownForm {
            answers: [TextBuffer::new(""), TextBuffer::new(""), TextBuffer::new("")],
            field: 0,
            preview,
            submitting: false,
        }
    }

    fn reflections(&self) -> Reflections {
        Reflections {
            went_well: self.answers[0].value().to_string(),
            didnt_go: self.answers[1].value().to_string(),
            remaining: self.answers[2].value().to_string(),
        }
    }
}

fn edit_text(text: &mut TextBuffer, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => text.insert_char('\n'),
        KeyCode::Backspace => text.backspace(),
        KeyCode::Left => text.move_left(),
        KeyCode::Right => text.move_right(),
        KeyCode::Up => text.move_up(),
        KeyCode::Down => text.move_down(),
        KeyCode::Char(c) => {
            if !key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
            {
                text.insert_char(c);
            }
        }
        _ => {}
    }
}

fn log_fetch<T>(source: &str, result: &Result<T, FetchError>) {
    match result {
        Ok(_) => debug!(source, "fetch succeeded"),
        Err(FetchError::AuthRequired) => debug!(source, "not authorized, keeping last snapshot"),
        Err(err) => warn!(source, error = %err, "fetch failed, keeping last snapshot"),
    }
}

fn module_block(title: &str, editing: bool) -> Block<'static> {
    let color = if editing { Color::Cyan } else { Color::DarkGray };
    Block::default()
        .title(Span::styled(
            title.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn footer_help_line() -> Line<'static> {
    Line::from(vec![
        Span::styled("t/n/l", Style::default().fg(Color::LightYellow)),
        Span::raw(" edit  "),
        Span::styled("↑↓", Style::default().fg(Color::LightCyan)),
        Span::raw(" select  "),
        Span::styled("space", Style::default().fg(Color::LightGreen)),
        Span::raw(" toggle  "),
        Span::styled("o", Style::default().fg(Color::LightMagenta)),
        Span::raw(" location  "),
        Span::styled("a", Style::default().fg(Color::LightBlue)),
        Span::raw(" calendar  "),
        Span::styled("r", Style::default().fg(Color::LightCyan)),
        Span::raw(" refresh  "),
        Span::styled("s", Style::default().fg(Color::LightMagenta)),
        Span::raw(" shutdown  "),
        Span::styled("q", Style::default().fg(Color::LightRed)),
        Span::raw(" quit"),
    ])
}

fn draw_location(f: &mut ratatui::Frame<'_>, form: &LocationForm) {
    let area = centered_rect(60, 50, f.size());
    let mut lines = Vec::new();
    for (idx, label) in LOCATION_LABELS.iter().enumerate() {
        lines.extend(field_lines(label, &form.fields[idx], form.field == idx));
    }
    lines.push(Line::from(""));
    if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::LightRed),
        )));
    }
    lines.push(Line::from(Span::styled(
        "Enter to save • Ctrl+D to clear • Tab/Shift-Tab to move • Esc to close",
        Style::default().fg(Color::Gray),
    )));
    let dialog = Paragraph::new(lines)
        .block(
            Block::default()
                .title(Span::styled(
                    "Location",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(Clear, area);
    f.render_widget(dialog, area);
}

fn draw_shutdown(f: &mut ratatui::Frame<'_>, form: &ShutdownForm) {
    let area = centered_rect(80, 80, f.size());
    let mut lines = Vec::new();
    for (idx, prompt) in SHUTDOWN_PROMPTS.iter().enumerate() {
        lines.push(Line::from(Span::styled(
            prompt.to_string(),
            Style::default()
                .fg(Color::LightMagenta)
                .add_modifier(Modifier::BOLD),
        )));
        lines.extend(field_lines("›", &form.answers[idx], form.field == idx));
        lines.push(Line::from(""));
    }
    lines.extend(form.preview.iter().map(|line| {
        Line::from(Span::styled(
            line.clone(),
            Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
        ))
    }));
    lines.push(Line::from(""));
    let action = if form.submitting {
        "Closing the day…"
    } else {
        "Ctrl+S to close the day • Tab to move • Esc to cancel"
    };
    lines.push(Line::from(Span::styled(action, Style::default().fg(Color::Gray))));
    let dialog = Paragraph::new(lines)
        .block(
            Block::default()
                .title(Span::styled(
                    "Schedule shutdown",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(Clear, area);
    f.render_widget(dialog, area);
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn hit(rect: Rect, column: u16, row: u16) -> bool {
    column >= rect.x
        && column < rect.x.saturating_add(rect.width)
        && row >= rect.y
        && row < rect.y.saturating_add(rect.height)
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(popup_layout[1])[1]
}

fn adjust_offset(
    selected: usize,
    current_offset: usize,
    viewport: usize,
    scrolloff: usize,
    len: usize,
) -> usize {
    if viewport == 0 || len == 0 {
        return 0;
    }
    let max_offset = len.saturating_sub(viewport);
    let margin = scrolloff.min(viewport.saturating_sub(1));
    let mut offset = current_offset.min(max_offset);
    if selected < offset.saturating_add(margin) {
        offset = selected.saturating_sub(margin);
    } else {
        let upper = offset
            .saturating_add(viewport.saturating_sub(1))
            .saturating_sub(margin);
        if selected > upper {
            offset = selected.saturating_add(margin + 1).saturating_sub(viewport);
        }
    }
    offset.min(max_offset)
}

fn field_lines(label: &str, field: &TextBuffer, active: bool) -> Vec<Line<'static>> {
    let label_style = Style::default()
        .fg(Color::Gray)
        .add_modifier(Modifier::BOLD | Modifier::DIM);
    let value_style = Style::default().fg(if active { Color::Cyan } else { Color::White });
    let prefix = format!("{}: ", label);
    let spacer = " ".repeat(prefix.chars().count());
    let text = if active {
        field.with_caret()
    } else {
        field.value().to_string()
    };
    text.split('\n')
        .enumerate()
        .map(|(idx, line)| {
            Line::from(vec![
                Span::styled(
                    if idx == 0 {
                        prefix.clone()
                    } else {
                        spacer.clone()
                    },
                    label_style,
                ),
                Span::styled(line.to_string(), value_style),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::format_time;
    use crate::config::Config;
    use crate::error::StorageError;
    use crate::model::Task;
    use crate::storage::{FileStore, KeyValueStore, MemoryStore, Paths};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    fn env_over(store: Arc<dyn KeyValueStore>) -> (Env, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            data_dir: dir.path().to_path_buf(),
            session_dir: dir.path().join("session"),
            config_file: dir.path().join("config.yml"),
        };
        let env = Env {
            config: Config::default(),
            session: FileStore::new(&paths.session_dir),
            paths,
            store,
        };
        (env, dir)
    }

    fn seeded(tasks: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let state = DashboardState {
            tasks: tasks.iter().map(|t| Task::new(*t)).collect(),
            ..DashboardState::default()
        };
        codec::save(store.as_ref(), &state).unwrap();
        store
    }

    fn on_screen(env: &Env) -> App<'_> {
        let mut app = App::new(env);
        app.areas = Areas {
            tasks: Some(Rect::new(0, 0, 40, 10)),
            notes: Some(Rect::new(0, 10, 40, 5)),
            links: Some(Rect::new(40, 10, 40, 5)),
        };
        app
    }

    fn press(app: &mut App<'_>, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE)).unwrap();
    }

    fn type_text(app: &mut App<'_>, text: &str) {
        for ch in text.chars() {
            press(app, KeyCode::Char(ch));
        }
    }

    fn click(column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    fn stored_tasks(store: &dyn KeyValueStore) -> Vec<Task> {
        codec::load(store).state.tasks
    }

    #[test]
    fn escape_commits_task_edit() {
        let store = seeded(&["call the bank"]);
        complete_first_task(&store);
        let (env, _dir) = env_over(store.clone());
        let mut app = on_screen(&env);

        press(&mut app, KeyCode::Char('t'));
        assert!(app.session.is_editing());
        press(&mut app, KeyCode::Enter);
        type_text(&mut app, "shop");
        press(&mut app, KeyCode::Esc);

        let expected = vec![
            Task {
                text: "call the bank".into(),
                completed: true,
            },
            Task::new("shop"),
        ];
        assert!(!app.session.is_editing());
        assert_eq!(app.state.tasks, expected);
        assert_eq!(stored_tasks(store.as_ref()), expected);
    }

    fn complete_first_task(store: &MemoryStore) {
        let mut state = codec::load(store).state;
        state.toggle_task(0);
        codec::save(store, &state).unwrap();
    }

    #[test]
    fn outside_click_commits_but_opening_click_does_not() {
        let store = seeded(&[]);
        let (env, _dir) = env_over(store.clone());
        let mut app = on_screen(&env);

        app.handle_mouse(click(5, 12));
        assert_eq!(app.session.editing_slice(), Some(Slice::Notes));
        app.handle_mouse(click(50, 2));
        assert!(app.session.is_editing());

        app.session.settle();
        type_text(&mut app, "hello");
        app.handle_mouse(click(6, 13));
        assert!(app.session.is_editing());
        app.handle_mouse(click(50, 2));
        assert!(!app.session.is_editing());
        assert_eq!(app.state.notes, "hello");
        assert_eq!(codec::load(store.as_ref()).state.notes, "hello");
    }

    #[test]
    fn clearing_the_last_row_ends_the_edit() {
        let store = seeded(&["x"]);
        let (env, _dir) = env_over(store.clone());
        let mut app = on_screen(&env);

        press(&mut app, KeyCode::Char('t'));
        press(&mut app, KeyCode::Backspace);
        assert!(app.session.is_editing());
        press(&mut app, KeyCode::Backspace);

        assert!(!app.session.is_editing());
        assert!(app.state.tasks.is_empty());
        assert!(stored_tasks(store.as_ref()).is_empty());
    }

    #[test]
    fn failed_save_keeps_the_edit_in_memory() {
        let store = seeded(&[]);
        let (env, _dir) = env_over(store.clone());
        let mut app = on_screen(&env);
        store.set_failing(true);

        press(&mut app, KeyCode::Char('t'));
        type_text(&mut app, "draft");
        press(&mut app, KeyCode::Esc);

        assert!(!app.session.is_editing());
        assert_eq!(app.state.tasks, vec![Task::new("draft")]);
        store.set_failing(false);
        assert!(stored_tasks(store.as_ref()).is_empty());
    }

    #[test]
    fn task_commits_reload_dependents_but_notes_do_not() {
        let store = Arc::new(CountingStore::default());
        let (env, _dir) = env_over(store.clone());
        let mut app = on_screen(&env);

        let before = store.reads.load(Ordering::SeqCst);
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "idea");
        press(&mut app, KeyCode::Esc);
        assert_eq!(store.reads.load(Ordering::SeqCst), before);

        press(&mut app, KeyCode::Char('t'));
        type_text(&mut app, "plan");
        press(&mut app, KeyCode::Esc);
        assert!(store.reads.load(Ordering::SeqCst) > before);
        assert_eq!(app.state.tasks, vec![Task::new("plan")]);
        assert_eq!(app.state.notes, "idea");
    }

    #[test]
    fn task_scroll_follows_the_edit_focus() {
        let names: Vec<String> = (0..10).map(|i| format!("task {i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let store = seeded(&refs);
        let (env, _dir) = env_over(store.clone());
        let mut app = on_screen(&env);

        press(&mut app, KeyCode::Char('t'));
        for _ in 0..8 {
            press(&mut app, KeyCode::Down);
        }
        assert_eq!(app.task_scroll(5, 10), 5);

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.task_scroll(5, 10), 0);
    }

    #[test]
    fn clock_uses_the_default_location_zone() {
        let (env, _dir) = env_over(Arc::new(MemoryStore::new()));
        let mut app = App::new(&env);
        app.now = Utc.with_ymd_and_hms(2026, 1, 15, 15, 5, 0).unwrap();
        assert_eq!(format_time(&app.clock()), "9:05 AM");
    }

    #[test]
    fn hit_testing_respects_bounds() {
        let rect = Rect::new(2, 3, 4, 2);
        assert!(hit(rect, 2, 3));
        assert!(hit(rect, 5, 4));
        assert!(!hit(rect, 6, 4));
        assert!(!hit(rect, 3, 5));
    }

    #[test]
    fn click_maps_to_module() {
        let areas = Areas {
            tasks: Some(Rect::new(0, 0, 10, 10)),
            notes: Some(Rect::new(0, 10, 10, 5)),
            links: Some(Rect::new(10, 0, 0, 0)),
        };
        assert_eq!(areas.slice_at(3, 12), Some(Slice::Notes));
        assert_eq!(areas.slice_at(20, 20), None);
        assert_eq!(areas.get(Slice::Links), None);
    }

    #[test]
    fn offset_keeps_selection_visible() {
        assert_eq!(adjust_offset(0, 0, 5, 1, 3), 0);
        assert_eq!(adjust_offset(9, 0, 5, 1, 20), 6);
        assert_eq!(adjust_offset(2, 6, 5, 1, 20), 1);
    }

    #[test]
    fn location_form_validates_numbers() {
        let mut form = LocationForm::new(&Location {
            label: "Home".into(),
            lat: 1.0,
            lon: 2.0,
            timezone: "UTC".into(),
        });
        assert_eq!(form.parse().unwrap().label, "Home");
        form.fields[1] = TextBuffer::new("north");
        assert!(form.parse().unwrap_err().contains("latitude"));
    }

    #[test]
    fn field_lines_indent_continuations() {
        let lines = field_lines("Notes", &TextBuffer::new("a\nb"), false);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].spans[0].content, "       ");
    }
}
