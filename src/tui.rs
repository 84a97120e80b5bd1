use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;

use rendflow::config::AppConfig;
use rendflow::core::event::NullSink;
use rendflow::core::formatter::{format_event_line, format_progress_line, format_record_line};
use rendflow::core::jobfile;
use rendflow::core::tracker::Telemetry;
use rendflow::core::{JobEvent, JobId, JobStatus, Supervisor};

use crate::cli::{self, CliError, ShellCommand};

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self, CliError> {
        enable_raw_mode()?;
        io::stdout().execute(EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = stdout.execute(LeaveAlternateScreen);
    }
}

#[derive(Debug, Clone)]
struct JobView {
    command: String,
    status: JobStatus,
    telemetry: Telemetry,
}

#[derive(Debug)]
struct AppState {
    input: String,
    history: Vec<String>,
    jobs: BTreeMap<JobId, JobView>,
    job_queue: VecDeque<String>,
    should_quit: bool,
    scroll_offset: usize,
    view_lines: usize,
    progress_log_counter: u64,
}

const DIVIDER_MARKER: &str = "<divider>";

impl AppState {
    fn new(queue: Vec<String>) -> Self {
        let mut history = Vec::new();
        history.push("Welcome to rendflow. Type 'help' for commands.".to_string());
        if !queue.is_empty() {
            history.push(format!("Loaded {} jobs from job file.", queue.len()));
        }
        Self {
            input: String::new(),
            history,
            jobs: BTreeMap::new(),
            job_queue: VecDeque::from(queue),
            should_quit: false,
            scroll_offset: 0,
            view_lines: 1,
            progress_log_counter: 0,
        }
    }

    fn push_history(&mut self, line: impl Into<String>) {
        const MAX_LINES: usize = 500;
        if self.history.len() >= MAX_LINES {
            let drain_count = self.history.len().saturating_sub(MAX_LINES - 1);
            self.history.drain(0..drain_count);
        }
        self.history.push(line.into());
        self.clamp_scroll();
    }

    fn apply_event(&mut self, event: JobEvent) {
        match &event {
            JobEvent::Started { id, command, .. } => {
                self.jobs.insert(
                    id.clone(),
                    JobView {
                        command: command.clone(),
                        status: JobStatus::Starting,
                        telemetry: Telemetry::default(),
                    },
                );
                self.push_history(format_event_line(&event));
            }
            JobEvent::Progress { id, telemetry } => {
                if let Some(view) = self.jobs.get_mut(id) {
                    view.telemetry = telemetry.clone();
                    if view.telemetry.progress > 0.0 || view.telemetry.current_frame.is_some() {
                        view.status = JobStatus::Running;
                    }
                }
                // The jobs panel shows live progress; the log only samples it.
                self.progress_log_counter = self.progress_log_counter.wrapping_add(1);
                if self.progress_log_counter % 25 == 0 {
                    self.push_history(format_event_line(&event));
                }
            }
            JobEvent::Diagnostic { .. } => self.push_history(format_event_line(&event)),
            JobEvent::Completed { id, .. } | JobEvent::Failed { id, .. } | JobEvent::Stopped { id } => {
                self.jobs.remove(id);
                self.push_history(format_event_line(&event));
            }
        }
    }

    fn set_view_lines(&mut self, lines: usize) {
        self.view_lines = lines.max(1);
        self.clamp_scroll();
    }

    fn scroll_up(&mut self, lines: usize) {
        let max_scroll = self.max_scroll();
        self.scroll_offset = (self.scroll_offset + lines).min(max_scroll);
    }

    fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    fn scroll_top(&mut self) {
        self.scroll_offset = self.max_scroll();
    }

    fn scroll_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    fn max_scroll(&self) -> usize {
        self.history.len().saturating_sub(self.view_lines)
    }

    fn clamp_scroll(&mut self) {
        let max_scroll = self.max_scroll();
        if self.scroll_offset > max_scroll {
            self.scroll_offset = max_scroll;
        }
    }
}

pub fn run(config: &AppConfig, initial_queue: Vec<String>) -> Result<(), CliError> {
    let supervisor = Supervisor::new(config.supervisor_settings());
    let events = supervisor.subscribe();

    let _guard = TerminalGuard::enter()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let mut app = AppState::new(initial_queue);
    let result = event_loop(&mut terminal, &mut app, &supervisor, config, &events);

    // Workers must not outlive the dashboard.
    supervisor.stop_all();
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    supervisor: &Supervisor,
    config: &AppConfig,
    events: &Receiver<JobEvent>,
) -> Result<(), CliError> {
    loop {
        while let Ok(event) = events.try_recv() {
            app.apply_event(event);
        }

        while let Some(command) = app.job_queue.pop_front() {
            start_job(app, supervisor, &command);
        }

        let size = terminal.size()?;
        let jobs_height = (app.jobs.len() as u16 + 2).min(size.height / 3 + 2).max(3);
        let history_height = size.height.saturating_sub(jobs_height + 6).max(3) as usize;
        app.set_view_lines(history_height.saturating_sub(2).max(1));

        terminal.draw(|frame| {
            let layout = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Length(jobs_height),
                    Constraint::Min(3),
                    Constraint::Length(3),
                ])
                .split(frame.size());

            frame.render_widget(render_header(app, supervisor), layout[0]);
            frame.render_widget(render_jobs(app, layout[1].width as usize), layout[1]);

            let history = render_history(app, layout[2].height as usize, layout[2].width as usize);
            frame.render_widget(history, layout[2]);

            let input = Paragraph::new(app.input.as_str())
                .block(Block::default().title("Input").borders(Borders::ALL))
                .wrap(Wrap { trim: false });
            frame.render_widget(input, layout[3]);
            frame.set_cursor(layout[3].x + 1 + app.input.len() as u16, layout[3].y + 1);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.should_quit = true;
                    }
                    KeyCode::Char(ch) => app.input.push(ch),
                    KeyCode::Backspace => {
                        app.input.pop();
                    }
                    KeyCode::Enter => {
                        let line = app.input.trim().to_string();
                        app.input.clear();
                        if !line.is_empty() {
                            handle_line(app, supervisor, config, &line);
                        }
                    }
                    KeyCode::PageUp => {
                        let step = app.view_lines.saturating_sub(1).max(1);
                        app.scroll_up(step);
                    }
                    KeyCode::PageDown => {
                        let step = app.view_lines.saturating_sub(1).max(1);
                        app.scroll_down(step);
                    }
                    KeyCode::Up => app.scroll_up(1),
                    KeyCode::Down => app.scroll_down(1),
                    KeyCode::Home => app.scroll_top(),
                    KeyCode::End => app.scroll_bottom(),
                    KeyCode::Esc => app.should_quit = true,
                    _ => {}
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn start_job(app: &mut AppState, supervisor: &Supervisor, command: &str) {
    if let Err(err) = supervisor.start(command, Arc::new(NullSink)) {
        app.push_history(format!("error: {err}"));
    }
}

fn handle_line(app: &mut AppState, supervisor: &Supervisor, config: &AppConfig, line: &str) {
    let trimmed = line.trim();
    if !app.history.is_empty() {
        app.push_history(DIVIDER_MARKER);
    }
    app.push_history(format!(">> {trimmed}"));

    if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
        app.should_quit = true;
        return;
    }

    if trimmed.eq_ignore_ascii_case("clear") {
        app.history.clear();
        app.scroll_bottom();
        return;
    }

    if trimmed.eq_ignore_ascii_case("help") {
        app.push_history("Commands:");
        app.push_history("  render <worker args...>   launch the configured worker");
        app.push_history("  run <command...>          launch any worker command");
        app.push_history("  stop <id> / stopall");
        app.push_history("  jobs / last");
        app.push_history("  version [executable]");
        app.push_history("  batch <job file>");
        app.push_history("  clear / quit");
        return;
    }

    let command = match cli::parse_line(trimmed) {
        Ok(command) => command,
        Err(err) => {
            app.push_history(format!("error: {err}"));
            return;
        }
    };

    if let Some(launch) = command.launch_line(&config.worker.executable) {
        start_job(app, supervisor, &launch);
        return;
    }

    match command {
        ShellCommand::Stop { id } => {
            let id = JobId::from(id.as_str());
            if !supervisor.stop(&id) {
                app.push_history(format!("no running job with id {id}"));
            }
        }
        ShellCommand::StopAll => supervisor.stop_all(),
        ShellCommand::Jobs => {
            let ids = supervisor.list_active_job_ids();
            if ids.is_empty() {
                app.push_history("no active jobs");
            }
            for id in ids {
                if let Some(record) = supervisor.snapshot(&id) {
                    app.push_history(format_record_line(&record));
                }
            }
        }
        ShellCommand::Last => {
            let records = supervisor.last_outputs();
            if records.is_empty() {
                app.push_history("no finished jobs yet");
            }
            for record in records {
                app.push_history(format_record_line(&record));
            }
        }
        ShellCommand::Version { executable } => {
            let executable = executable.unwrap_or_else(|| config.worker.executable.clone());
            let version = supervisor.get_version(&executable);
            app.push_history(format!("{executable}: {version}"));
        }
        ShellCommand::Batch { file } => load_batch(app, &file),
        ShellCommand::Render { .. } | ShellCommand::Run { .. } => {}
    }
}

fn load_batch(app: &mut AppState, path: &Path) {
    match jobfile::parse_job_file(path) {
        Ok(commands) => {
            let count = commands.len();
            app.job_queue.extend(commands);
            app.push_history(format!("Loaded {} jobs from '{}'.", count, path.display()));
        }
        Err(err) => app.push_history(format!("error reading job file: {err}")),
    }
}

fn render_header(app: &AppState, supervisor: &Supervisor) -> Paragraph<'static> {
    let finished = supervisor.last_outputs();
    let failed = finished
        .iter()
        .filter(|record| record.status == JobStatus::Failed)
        .count();
    let text = Line::from(vec![
        Span::raw(format!("Active: {}", app.jobs.len())),
        Span::raw(format!("  Finished: {}", finished.len())),
        Span::raw(format!("  Failed: {failed}")),
    ]);

    Paragraph::new(text).block(Block::default().title("rendflow").borders(Borders::ALL))
}

fn render_jobs(app: &AppState, width: usize) -> Paragraph<'static> {
    let bar_width = width.saturating_sub(60).clamp(10, 40);
    let lines: Vec<Line> = if app.jobs.is_empty() {
        vec![Line::from("idle")]
    } else {
        app.jobs
            .iter()
            .map(|(id, view)| {
                let label = match view.status {
                    JobStatus::Starting => "starting",
                    _ => "running",
                };
                Line::from(vec![
                    Span::raw(format!("{id:>7} ")),
                    Span::raw(render_progress_bar(view.telemetry.progress, bar_width)),
                    Span::raw(format!(" {label} ")),
                    Span::raw(format_progress_line(&view.telemetry)),
                ])
            })
            .collect()
    };

    let title = match app.jobs.values().next() {
        Some(view) if app.jobs.len() == 1 => format!("Jobs ({})", view.command),
        _ => "Jobs".to_string(),
    };
    Paragraph::new(lines)
        .block(Block::default().title(title).borders(Borders::ALL))
        .wrap(Wrap { trim: true })
}

fn render_progress_bar(progress: f64, width: usize) -> String {
    let width = width.max(10);
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');

    let ratio = (progress / 100.0).clamp(0.0, 1.0);
    let filled = ((ratio * width as f64).round() as usize).min(width);
    for idx in 0..width {
        if idx < filled {
            bar.push('=');
        } else if idx == filled && filled < width {
            bar.push('>');
        } else {
            bar.push(' ');
        }
    }
    bar.push(']');
    bar
}

fn render_history(app: &AppState, height: usize, width: usize) -> Paragraph<'static> {
    let max_lines = height.saturating_sub(2).max(1);
    let end = app.history.len().saturating_sub(app.scroll_offset);
    let start = end.saturating_sub(max_lines);
    let divider_width = width.saturating_sub(2).max(1);
    let divider = "─".repeat(divider_width);
    let lines: Vec<Line> = app.history[start..end]
        .iter()
        .map(|line| {
            if line == DIVIDER_MARKER {
                Line::from(Span::raw(divider.clone()))
            } else {
                Line::from(line.clone())
            }
        })
        .collect();

    Paragraph::new(lines)
        .block(Block::default().title("Session").borders(Borders::ALL))
        .wrap(Wrap { trim: false })
}
