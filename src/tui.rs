use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;
use tracing::info;

use crate::db::ApplicationStore;
use crate::lifecycle::{StageAction, Tracker};
use crate::models::{Application, Stage};

const FORM_LABELS: [&str; 3] = ["Title", "Offer URL", "Company"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Info(String),
    Error(String),
}

#[derive(Debug, Default)]
struct AddForm {
    fields: [String; 3],
    focus: usize,
}

impl AddForm {
    fn next_field(&mut self) {
        self.focus = (self.focus + 1) % self.fields.len();
    }

    fn prev_field(&mut self) {
        self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
    }
}

struct AppState {
    applications: Vec<Application>,
    selected: usize,
    scroll_offset: u16,
    status: Option<Status>,
    form: Option<AddForm>,
}

impl AppState {
    fn new() -> Self {
        Self {
            applications: Vec::new(),
            selected: 0,
            scroll_offset: 0,
            status: None,
            form: None,
        }
    }

    fn current(&self) -> Option<&Application> {
        self.applications.get(self.selected)
    }

    /// Re-reads every row. Keeps the same application selected when it is still listed.
    fn refresh<S: ApplicationStore>(&mut self, tracker: &Tracker<S>) {
        let keep = self.current().map(|a| a.id);
        let listing = tracker.listing();
        self.applications = listing.applications;
        if let Some(err) = listing.error {
            self.status = Some(Status::Error(format!("Could not read applications: {}", err)));
        }
        self.selected = keep
            .and_then(|id| self.applications.iter().position(|a| a.id == id))
            .unwrap_or(0)
            .min(self.applications.len().saturating_sub(1));
    }

    fn next(&mut self) {
        if !self.applications.is_empty() && self.selected < self.applications.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    fn apply<S: ApplicationStore>(&mut self, tracker: &Tracker<S>, action: StageAction) {
        let Some(app) = self.current() else { return };
        let id = app.id;
        self.status = Some(match tracker.apply(id, action) {
            Ok(stage) => Status::Info(format!("#{} moved to {}", id, stage.label())),
            Err(e) => Status::Error(e.to_string()),
        });
        self.refresh(tracker);
    }

    fn submit<S: ApplicationStore>(&mut self, tracker: &Tracker<S>) {
        let Some(form) = &self.form else { return };
        let [title, url, company] = &form.fields;
        match tracker.submit(title, url, company) {
            Ok(id) => {
                info!(id, "added from board");
                self.status = Some(Status::Info(format!("Added application #{}", id)));
                self.form = None;
                self.refresh(tracker);
                if let Some(pos) = self.applications.iter().position(|a| a.id == id) {
                    self.selected = pos;
                }
            }
            Err(e) => self.status = Some(Status::Error(e.to_string())),
        }
    }

    /// Returns false when the board should close.
    fn handle_key<S: ApplicationStore>(&mut self, key: KeyEvent, tracker: &Tracker<S>) -> bool {
        if self.form.is_some() {
            self.handle_form_key(key, tracker);
            return true;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.prev(),
            KeyCode::Char('J') | KeyCode::PageDown => self.scroll_down(),
            KeyCode::Char('K') | KeyCode::PageUp => self.scroll_up(),
            KeyCode::Char('a') => {
                self.form = Some(AddForm::default());
                self.status = None;
            }
            KeyCode::Char('r') => {
                self.status = None;
                self.refresh(tracker);
            }
            KeyCode::Char('s') => self.apply(tracker, StageAction::MarkSent),
            KeyCode::Char('p') => self.apply(tracker, StageAction::StartProcess),
            KeyCode::Char('o') => self.apply(tracker, StageAction::ReceiveOffer),
            _ => {}
        }
        true
    }

    fn handle_form_key<S: ApplicationStore>(&mut self, key: KeyEvent, tracker: &Tracker<S>) {
        match key.code {
            KeyCode::Esc => self.form = None,
            KeyCode::Enter => self.submit(tracker),
            _ => {
                let Some(form) = self.form.as_mut() else { return };
                match key.code {
                    KeyCode::Tab | KeyCode::Down => form.next_field(),
                    KeyCode::BackTab | KeyCode::Up => form.prev_field(),
                    KeyCode::Backspace => {
                        form.fields[form.focus].pop();
                    }
                    KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        form.fields[form.focus].push(c);
                    }
                    _ => {}
                }
            }
        }
    }
}

pub fn run_board<S: ApplicationStore>(tracker: &Tracker<S>) -> Result<()> {
    let mut state = AppState::new();
    state.refresh(tracker);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, tracker);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop<S: ApplicationStore>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    tracker: &Tracker<S>,
) -> Result<()> {
    let mut list_state = ListState::default();

    loop {
        list_state.select((!state.applications.is_empty()).then_some(state.selected));
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if !state.handle_key(key, tracker) {
                break;
            }
        }
    }
    Ok(())
}

fn stage_style(stage: Stage) -> Style {
    match stage {
        Stage::Wishlist => Style::default().fg(Color::Blue),
        Stage::ApplicationSent => Style::default().fg(Color::Cyan),
        Stage::InProcess => Style::default().fg(Color::Yellow),
        Stage::OfferReceived => Style::default().fg(Color::Green),
    }
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[0]);

    // Left panel: applications
    let items: Vec<ListItem> = state
        .applications
        .iter()
        .map(|app| {
            let marker = match app.stage {
                Stage::Wishlist => " ",
                Stage::ApplicationSent => ">",
                Stage::InProcess => "~",
                Stage::OfferReceived => "+",
            };
            let company = app.company_name.as_deref().unwrap_or("?");
            ListItem::new(format!("{} #{:<4} {} | {}", marker, app.id, app.title, company))
                .style(stage_style(app.stage))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Applications ({}) ",
            state.applications.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: detail
    let detail_widget = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail_widget, chunks[1]);

    let status = match &state.status {
        Some(Status::Info(msg)) => Paragraph::new(format!(" {}", msg)).style(Style::default().fg(Color::Green)),
        Some(Status::Error(msg)) => Paragraph::new(format!(" {}", msg)).style(Style::default().fg(Color::Red)),
        None => Paragraph::new(""),
    };
    frame.render_widget(status, rows[1]);

    let help = if state.form.is_some() {
        " tab:next field  enter:save  esc:cancel"
    } else {
        " j/k:navigate  J/K:scroll  a:add  s:sent p:process o:offer  r:reload  q:quit"
    };
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        rows[2],
    );

    if let Some(form) = &state.form {
        draw_form(frame, form);
    }
}

fn draw_form(frame: &mut Frame, form: &AddForm) {
    let area = centered(frame.area(), 60, 9);
    frame.render_widget(Clear, area);

    let lines: Vec<Line> = FORM_LABELS
        .iter()
        .zip(&form.fields)
        .enumerate()
        .flat_map(|(i, (label, value))| {
            let style = if i == form.focus {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let cursor = if i == form.focus { "_" } else { "" };
            [
                Line::from(Span::styled(format!("{}:", label), style)),
                Line::from(format!("  {}{}", value, cursor)),
            ]
        })
        .collect();

    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(" Add application "));
    frame.render_widget(widget, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(app) = state.current() else {
        return Text::raw("No applications yet. Press 'a' to add one.");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        app.title.as_str(),
        Style::default().add_modifier(Modifier::BOLD),
    )));

    if let Some(company) = &app.company_name {
        lines.push(Line::from(format!("at {}", company)));
    }
    lines.push(Line::from(format!("URL: {}", app.company_url)));
    lines.push(Line::from(Span::styled(
        format!("Stage: {}", app.stage.label()),
        stage_style(app.stage),
    )));
    lines.push(Line::from(""));

    if app.progress_notes.is_empty() {
        lines.push(Line::from(Span::styled(
            "(No progress notes)",
            Style::default().fg(Color::DarkGray),
        )));
    } else {
        lines.push(Line::from(Span::styled(
            "Notes",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(&app.progress_notes, 60).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
    }
    lines.push(Line::from(""));

    let local = |at: &chrono::DateTime<chrono::Utc>| {
        at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string()
    };
    lines.push(Line::from(Span::styled(
        format!("Created: {}", local(&app.created_at)),
        Style::default().fg(Color::DarkGray),
    )));
    lines.push(Line::from(Span::styled(
        format!("Updated: {}", local(&app.updated_at)),
        Style::default().fg(Color::DarkGray),
    )));

    Text::from(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MemoryStore;
    use crate::lifecycle::TransitionPolicy;

    fn press(state: &mut AppState, tracker: &Tracker<MemoryStore>, code: KeyCode) -> bool {
        state.handle_key(KeyEvent::new(code, KeyModifiers::NONE), tracker)
    }

    fn type_text(state: &mut AppState, tracker: &Tracker<MemoryStore>, text: &str) {
        for c in text.chars() {
            press(state, tracker, KeyCode::Char(c));
        }
    }

    #[test]
    fn add_form_submits_and_selects_new_row() {
        let tracker = Tracker::new(MemoryStore::default(), TransitionPolicy::Unrestricted);
        tracker.submit("Older", "https://old.example", "").unwrap();
        let mut state = AppState::new();
        state.refresh(&tracker);

        press(&mut state, &tracker, KeyCode::Char('a'));
        type_text(&mut state, &tracker, "Backend Engineer");
        press(&mut state, &tracker, KeyCode::Tab);
        type_text(&mut state, &tracker, "https://co.example/jobs/1");
        press(&mut state, &tracker, KeyCode::Tab);
        type_text(&mut state, &tracker, "Acme");
        press(&mut state, &tracker, KeyCode::Enter);

        assert!(state.form.is_none());
        assert_eq!(state.applications.len(), 2);
        let current = state.current().unwrap();
        assert_eq!(current.title, "Backend Engineer");
        assert_eq!(current.company_name.as_deref(), Some("Acme"));
        assert_eq!(current.stage, Stage::Wishlist);
    }

    #[test]
    fn add_form_keeps_input_on_validation_error() {
        let tracker = Tracker::new(MemoryStore::default(), TransitionPolicy::Unrestricted);
        let mut state = AppState::new();

        press(&mut state, &tracker, KeyCode::Char('a'));
        type_text(&mut state, &tracker, "No URL");
        press(&mut state, &tracker, KeyCode::Enter);

        assert!(matches!(state.status, Some(Status::Error(_))));
        assert_eq!(state.form.as_ref().unwrap().fields[0], "No URL");
        assert_eq!(tracker.store().calls.get(), 0);
    }

    #[test]
    fn form_keys_do_not_trigger_actions() {
        let tracker = Tracker::new(MemoryStore::default(), TransitionPolicy::Unrestricted);
        let mut state = AppState::new();

        press(&mut state, &tracker, KeyCode::Char('a'));
        assert!(press(&mut state, &tracker, KeyCode::Char('q')));
        assert_eq!(state.form.as_ref().unwrap().fields[0], "q");

        press(&mut state, &tracker, KeyCode::Esc);
        assert!(state.form.is_none());
        assert!(!press(&mut state, &tracker, KeyCode::Char('q')));
    }

    #[test]
    fn stage_keys_advance_selected_row() {
        let tracker = Tracker::new(MemoryStore::default(), TransitionPolicy::Unrestricted);
        let id = tracker.submit("SRE", "https://sre.example", "").unwrap();
        let mut state = AppState::new();
        state.refresh(&tracker);

        press(&mut state, &tracker, KeyCode::Char('p'));
        assert_eq!(state.current().unwrap().stage, Stage::InProcess);
        assert_eq!(state.current().unwrap().progress_notes, "Recruitment process started");

        press(&mut state, &tracker, KeyCode::Char('o'));
        assert_eq!(tracker.find(id).unwrap().unwrap().stage, Stage::OfferReceived);
        assert!(matches!(state.status, Some(Status::Info(_))));
    }

    #[test]
    fn regression_is_reported_in_status_line() {
        let tracker = Tracker::new(MemoryStore::default(), TransitionPolicy::ForwardOnly);
        tracker.submit("SRE", "https://sre.example", "").unwrap();
        let mut state = AppState::new();
        state.refresh(&tracker);

        press(&mut state, &tracker, KeyCode::Char('o'));
        press(&mut state, &tracker, KeyCode::Char('s'));

        assert!(matches!(state.status, Some(Status::Error(_))));
        assert_eq!(state.current().unwrap().stage, Stage::OfferReceived);
    }

    #[test]
    fn storage_failure_leaves_empty_board() {
        let tracker = Tracker::new(MemoryStore::default(), TransitionPolicy::Unrestricted);
        tracker.submit("SRE", "https://sre.example", "").unwrap();
        tracker.store().offline.set(true);
        let mut state = AppState::new();

        state.refresh(&tracker);
        assert!(state.applications.is_empty());
        assert!(matches!(state.status, Some(Status::Error(_))));

        // Nothing selected, so stage keys are ignored.
        assert!(press(&mut state, &tracker, KeyCode::Char('s')));
    }
}
