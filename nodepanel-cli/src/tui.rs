//! Interactive node dashboard.

use std::io;
use std::time::{Duration, Instant, SystemTime};

use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, TableState},
};
use tokio::sync::{broadcast, mpsc};

use nodepanel_core::bindings::BindingEditor;
use nodepanel_core::config::DashboardConfig;
use nodepanel_core::editor::{EditorMode, NodeEditor, SubmissionResult, SubmitOutcome, Tab};
use nodepanel_core::error::{Disposition, Field, PanelError};
use nodepanel_core::model::{Node, NodeId, Selection, ServiceBinding};
use nodepanel_core::reducer::{DirectoryEvent, EventEnvelope};
use nodepanel_core::status::{StatusPolicy, Tone, project_status_at};
use nodepanel_core::store::DeleteOutcome;

use crate::commands::{Directory, describe_settings};
use crate::ui::styles;
use crate::ui::theme::theme;

const FORM_FIELDS: [Field; 3] = Field::NODE_FORM;
/// Minimum gap between refreshes triggered by a stale cache
const STALE_RETRY: Duration = Duration::from_secs(1);

/// Results of background work, delivered back to the UI loop
#[derive(Debug)]
enum Message {
    Refreshed(Result<usize, PanelError>),
    Saved(SubmissionResult),
    Deleted {
        name: String,
        result: Result<DeleteOutcome, PanelError>,
    },
    Reconnected {
        name: String,
        result: Result<(), PanelError>,
    },
    Bindings {
        node_id: NodeId,
        result: Result<Vec<ServiceBinding>, PanelError>,
    },
}

#[derive(Debug)]
struct Flash {
    text: String,
    tone: Tone,
}

#[derive(Debug)]
struct ServicesPanel {
    node_id: NodeId,
    name: String,
    loading: bool,
}

pub struct App {
    directory: Directory,
    policy: StatusPolicy,
    refresh_every: Duration,
    editor: NodeEditor,
    focus: Field,
    table: TableState,
    services: Option<ServicesPanel>,
    flash: Option<Flash>,
    refreshing: bool,
    last_refresh: Option<Instant>,
    events: broadcast::Receiver<EventEnvelope>,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    quit: bool,
}

impl App {
    pub fn new(directory: Directory, dashboard: &DashboardConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            events: directory.subscribe(),
            editor: NodeEditor::new(directory.clone()),
            directory,
            policy: dashboard.status_policy(),
            refresh_every: dashboard.refresh_interval(),
            focus: Field::Name,
            table: TableState::default().with_selected(Some(0)),
            services: None,
            flash: None,
            refreshing: false,
            last_refresh: None,
            tx,
            rx,
            quit: false,
        }
    }

    fn info(&mut self, text: impl Into<String>) {
        self.flash = Some(Flash {
            text: text.into(),
            tone: Tone::Positive,
        });
    }

    fn warn(&mut self, text: impl Into<String>) {
        self.flash = Some(Flash {
            text: text.into(),
            tone: Tone::Neutral,
        });
    }

    fn report(&mut self, e: &PanelError, action: &str) {
        let notice = e.notice(action);
        if notice.disposition == Disposition::AlreadyGone {
            self.request_refresh();
        }
        self.flash = Some(Flash {
            text: notice.message,
            tone: Tone::Negative,
        });
    }

    fn selected_node(&self) -> Option<Node> {
        let nodes = self.directory.nodes();
        let index = self.table.selected()?.min(nodes.len().checked_sub(1)?);
        nodes.into_iter().nth(index)
    }

    fn move_selection(&mut self, delta: isize) {
        let count = self.directory.nodes().len();
        if count == 0 {
            self.table.select(None);
            return;
        }
        let current = self.table.selected().unwrap_or(0).min(count - 1) as isize;
        let next = (current + delta).clamp(0, count as isize - 1);
        self.table.select(Some(next as usize));
    }

    // --- background work ---

    fn request_refresh(&mut self) {
        if self.refreshing {
            return;
        }
        self.refreshing = true;
        self.last_refresh = Some(Instant::now());
        let directory = self.directory.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = directory.refresh().await.map(|nodes| nodes.len());
            let _ = tx.send(Message::Refreshed(result));
        });
    }

    fn load_bindings(&self, editor: BindingEditor) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let node_id = editor.node_id();
            let result = editor.list().await;
            let _ = tx.send(Message::Bindings { node_id, result });
        });
    }

    /// Periodic housekeeping between frames
    pub fn tick(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            self.handle_message(message);
        }
        loop {
            match self.events.try_recv() {
                Ok(envelope) => self.observe(envelope),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "dashboard lagged behind directory events");
                }
                Err(_) => break,
            }
        }

        let due = match self.last_refresh {
            None => true,
            Some(at) => {
                let elapsed = at.elapsed();
                elapsed >= self.refresh_every
                    || (self.directory.is_stale() && elapsed >= STALE_RETRY)
            }
        };
        if due {
            self.request_refresh();
        }
    }

    fn observe(&mut self, envelope: EventEnvelope) {
        if let DirectoryEvent::NodeRemoved { id } = envelope.event {
            if self.services.as_ref().is_some_and(|p| p.node_id == id) {
                self.services = None;
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Refreshed(result) => {
                self.refreshing = false;
                if let Err(e) = result {
                    self.report(&e, "Refresh nodes");
                }
            }
            Message::Saved(done) => match self.editor.finish(done) {
                SubmitOutcome::Saved(node) | SubmitOutcome::SavedInBackground(node) => {
                    self.info(format!("Saved {}", node.name));
                }
                // Field errors and the notice stay in the open form
                SubmitOutcome::Rejected(_) => {}
                SubmitOutcome::FailedInBackground(notice) => {
                    self.flash = Some(Flash {
                        text: notice.message,
                        tone: Tone::Negative,
                    });
                }
            },
            Message::Deleted { name, result } => match result {
                Ok(DeleteOutcome::Deleted) => self.info(format!("Deleted {}", name)),
                Ok(DeleteOutcome::AlreadyGone) => self.warn(format!("{} was already gone", name)),
                Err(e) => self.report(&e, &format!("Delete {}", name)),
            },
            Message::Reconnected { name, result } => match result {
                Ok(()) => self.info(format!("Reconnect requested for {}", name)),
                Err(e) => self.report(&e, &format!("Reconnect {}", name)),
            },
            Message::Bindings { node_id, result } => {
                if let Some(panel) = self.services.as_mut().filter(|p| p.node_id == node_id) {
                    panel.loading = false;
                }
                if let Err(e) = result {
                    self.report(&e, "Load services");
                }
            }
        }
    }

    // --- keys ---

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.quit = true;
            return;
        }
        if self.editor.is_open() {
            self.handle_form_key(key);
            return;
        }
        if let Selection::Deleting(id) = self.directory.selection() {
            self.handle_delete_confirmation(id, key);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Esc => self.services = None,
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('R') => self.request_refresh(),
            KeyCode::Char('a') => {
                self.editor.open_create();
                self.focus = Field::Name;
            }
            KeyCode::Char('e') => {
                if let Some(node) = self.selected_node() {
                    match self.editor.open_edit(node.id) {
                        Ok(()) => self.focus = Field::Name,
                        Err(e) => self.report(&e, "Edit node"),
                    }
                }
            }
            KeyCode::Char('d') => {
                if let Some(node) = self.selected_node() {
                    if let Err(e) = self.directory.mark_for_deletion(node.id) {
                        self.report(&e, "Delete node");
                    }
                }
            }
            KeyCode::Char('r') => self.reconnect_selected(),
            KeyCode::Char('s') => self.toggle_services(),
            _ => {}
        }
    }

    fn handle_delete_confirmation(&mut self, id: NodeId, key: KeyEvent) {
        if key.code != KeyCode::Char('y') {
            self.directory.clear_selection();
            self.warn("Delete cancelled");
            return;
        }
        let name = self
            .directory
            .node(id)
            .map(|n| n.name)
            .unwrap_or_else(|| format!("node {}", id));
        let directory = self.directory.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = directory.confirm_deletion().await;
            let _ = tx.send(Message::Deleted { name, result });
        });
    }

    fn reconnect_selected(&mut self) {
        let Some(node) = self.selected_node() else {
            return;
        };
        let view = project_status_at(&node, SystemTime::now(), &self.policy);
        if !view.reconnectable {
            self.warn(format!(
                "{} is {}; only nodes in error can be reconnected",
                node.name, view.label
            ));
            return;
        }
        let directory = self.directory.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = directory.reconnect_node(&node).await;
            let _ = tx.send(Message::Reconnected {
                name: node.name,
                result,
            });
        });
    }

    fn toggle_services(&mut self) {
        if self.services.take().is_some() {
            return;
        }
        let Some(node) = self.selected_node() else {
            return;
        };
        match BindingEditor::open(self.directory.clone(), node.id) {
            Ok(editor) => {
                self.services = Some(ServicesPanel {
                    node_id: node.id,
                    name: node.name,
                    loading: true,
                });
                self.load_bindings(editor);
            }
            Err(e) => self.report(&e, "Open services"),
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.editor.close();
                return;
            }
            KeyCode::F(1) => {
                let _ = self.editor.select_tab(Tab::Basic);
                return;
            }
            KeyCode::F(2) => {
                match self.editor.select_tab(Tab::Services) {
                    Ok(()) => match self.editor.services() {
                        Ok(services) => self.load_bindings(services),
                        Err(e) => self.report(&e, "Open services"),
                    },
                    Err(e) => self.report(&e, "Open services"),
                }
                return;
            }
            _ => {}
        }
        if self.editor.tab() != Tab::Basic {
            return;
        }

        let position = FORM_FIELDS.iter().position(|f| *f == self.focus).unwrap_or(0);
        match key.code {
            KeyCode::Tab | KeyCode::Down => {
                self.focus = FORM_FIELDS[(position + 1) % FORM_FIELDS.len()];
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.focus = FORM_FIELDS[(position + FORM_FIELDS.len() - 1) % FORM_FIELDS.len()];
            }
            KeyCode::Enter => self.submit_form(),
            KeyCode::Backspace => {
                let mut value = self.field_value(self.focus).to_string();
                value.pop();
                self.set_field(self.focus, value);
            }
            KeyCode::Char(c) => {
                let mut value = self.field_value(self.focus).to_string();
                value.push(c);
                self.set_field(self.focus, value);
            }
            _ => {}
        }
    }

    fn field_value(&self, field: Field) -> &str {
        let form = self.editor.form();
        match field {
            Field::Address => &form.address,
            Field::Port => &form.port,
            _ => &form.name,
        }
    }

    fn set_field(&mut self, field: Field, value: String) {
        match field {
            Field::Address => self.editor.set_address(value),
            Field::Port => self.editor.set_port(value),
            _ => self.editor.set_name(value),
        }
    }

    fn submit_form(&mut self) {
        match self.editor.begin_submit() {
            Ok(submission) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let done = submission.run().await;
                    let _ = tx.send(Message::Saved(done));
                });
            }
            // recorded per field by the editor
            Err(PanelError::Validation(_)) => {}
            Err(e) => self.report(&e, "Save node"),
        }
    }

    // --- rendering ---

    pub fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(f.area());

        self.draw_header(f, chunks[0]);
        if self.services.is_some() {
            let body = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);
            self.draw_nodes(f, body[0]);
            self.draw_services(f, body[1]);
        } else {
            self.draw_nodes(f, chunks[1]);
        }
        self.draw_status_line(f, chunks[2]);
        draw_key_hints(f, chunks[3], self.editor.is_open());

        if self.editor.is_open() {
            self.draw_form(f);
        }
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let mut spans = vec![
            Span::styled(" nodepanel ", styles::title()),
            Span::styled(
                format!("· {} · {} nodes", self.directory.backend_name(), self.directory.nodes().len()),
                styles::text_dim(),
            ),
        ];
        if self.refreshing {
            spans.push(Span::styled("  refreshing…", styles::warn()));
        }
        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_nodes(&mut self, f: &mut Frame, area: Rect) {
        let nodes = self.directory.nodes();
        let now = SystemTime::now();
        let deleting = match self.directory.selection() {
            Selection::Deleting(id) => Some(id),
            _ => None,
        };

        let rows: Vec<Row> = nodes
            .iter()
            .map(|node| {
                let view = project_status_at(node, now, &self.policy);
                let mut label = format!("{} {}", view.icon, view.label);
                if self.directory.is_busy(node.id) {
                    label.push_str(" …");
                }
                let row = Row::new(vec![
                    Cell::from(Span::styled(label, styles::status(&view))),
                    Cell::from(node.name.clone()),
                    Cell::from(endpoint(node)),
                    Cell::from(node.xray_version.clone().unwrap_or_else(|| "-".into())),
                    Cell::from(Span::styled(
                        node.message.clone().unwrap_or_default(),
                        styles::text_dim(),
                    )),
                ]);
                if deleting == Some(node.id) {
                    row.style(styles::error())
                } else {
                    row
                }
            })
            .collect();

        match self.table.selected() {
            _ if nodes.is_empty() => self.table.select(None),
            Some(i) if i >= nodes.len() => self.table.select(Some(nodes.len() - 1)),
            None => self.table.select(Some(0)),
            Some(_) => {}
        }

        let table = Table::new(
            rows,
            [
                Constraint::Length(18),
                Constraint::Percentage(25),
                Constraint::Percentage(30),
                Constraint::Length(10),
                Constraint::Min(10),
            ],
        )
        .header(Row::new(vec!["STATUS", "NAME", "ENDPOINT", "XRAY", "MESSAGE"]).style(styles::title()))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(if self.services.is_some() {
                    styles::border_subtle()
                } else {
                    styles::border_focused()
                })
                .title(" Nodes "),
        )
        .row_highlight_style(styles::selection())
        .highlight_symbol("▶ ");

        f.render_stateful_widget(table, area, &mut self.table);
    }

    fn draw_services(&self, f: &mut Frame, area: Rect) {
        let Some(panel) = &self.services else {
            return;
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(styles::border_focused())
            .title(format!(" Services · {} ", panel.name));
        let bindings = self.directory.bindings(panel.node_id);
        f.render_widget(bindings_list(bindings.as_deref(), panel.loading).block(block), area);
    }

    fn draw_status_line(&self, f: &mut Frame, area: Rect) {
        let line = if let Selection::Deleting(id) = self.directory.selection() {
            let name = self.directory.node(id).map(|n| n.name).unwrap_or_default();
            Line::from(Span::styled(
                format!(" Delete {} and all of its services? y to confirm, any other key to cancel", name),
                styles::warn(),
            ))
        } else if let Some(flash) = &self.flash {
            Line::from(Span::styled(format!(" {}", flash.text), theme().tone_style(flash.tone)))
        } else {
            Line::default()
        };
        f.render_widget(Paragraph::new(line), area);
    }

    fn draw_form(&self, f: &mut Frame) {
        let area = centered_rect(60, 14, f.area());
        f.render_widget(Clear, area);

        let title = match self.editor.mode() {
            EditorMode::Editing(node) => format!(" Edit {} ", node.name),
            _ => " Add node ".to_string(),
        };
        let tabs: Vec<Span> = self
            .editor
            .visible_tabs()
            .iter()
            .map(|tab| {
                let label = match tab {
                    Tab::Basic => " F1 Basic ",
                    Tab::Services => " F2 Services ",
                };
                if *tab == self.editor.tab() {
                    Span::styled(label, styles::selection())
                } else {
                    Span::styled(label, styles::text_dim())
                }
            })
            .collect();
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(styles::border_focused())
            .title(title)
            .title_bottom(Line::from(tabs));

        if self.editor.tab() == Tab::Services {
            if let EditorMode::Editing(node) = self.editor.mode() {
                let bindings = self.directory.bindings(node.id);
                f.render_widget(bindings_list(bindings.as_deref(), bindings.is_none()).block(block), area);
            }
            return;
        }

        let mut lines = Vec::new();
        for field in FORM_FIELDS {
            let focused = field == self.focus;
            let marker = if focused { "▏" } else { "" };
            lines.push(Line::from(vec![
                Span::styled(format!(" {:<8}", field.as_str()), styles::key_hint()),
                Span::styled(
                    format!("{}{}", self.field_value(field), marker),
                    if focused { styles::text() } else { styles::text_dim() },
                ),
            ]));
            if let Some(error) = self.editor.field_error(field) {
                lines.push(Line::from(Span::styled(format!("          {}", error), styles::error())));
            }
        }
        lines.push(Line::default());
        if let Some(notice) = self.editor.notice() {
            lines.push(Line::from(Span::styled(format!(" {}", notice.message), styles::error())));
        }
        if self.editor.is_submitting() {
            lines.push(Line::from(Span::styled(" saving…", styles::warn())));
        } else {
            lines.push(Line::from(Span::styled(" Enter save · Esc cancel", styles::text_dim())));
        }

        f.render_widget(Paragraph::new(lines).block(block), area);
    }
}

fn bindings_list(bindings: Option<&[ServiceBinding]>, loading: bool) -> List<'static> {
    let items: Vec<ListItem> = match bindings {
        Some([]) => vec![ListItem::new(Span::styled("No services configured", styles::text_dim()))],
        Some(bindings) => bindings
            .iter()
            .map(|b| {
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:<12}", b.protocol()), styles::success()),
                    Span::raw(format!(
                        "{:<6} ",
                        b.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
                    )),
                    Span::styled(describe_settings(&b.settings), styles::text_dim()),
                ]))
            })
            .collect(),
        None if loading => vec![ListItem::new(Span::styled("loading…", styles::warn()))],
        None => Vec::new(),
    };
    List::new(items)
}

fn draw_key_hints(f: &mut Frame, area: Rect, form_open: bool) {
    let keys: &[(&str, &str)] = if form_open {
        &[("Tab", "next field"), ("Enter", "save"), ("F2", "services"), ("Esc", "close")]
    } else {
        &[
            ("j/k", "move"),
            ("a", "add"),
            ("e", "edit"),
            ("d", "delete"),
            ("r", "reconnect"),
            ("s", "services"),
            ("R", "refresh"),
            ("q", "quit"),
        ]
    };
    let mut spans = Vec::new();
    for (key, label) in keys {
        spans.push(Span::styled(format!(" {} ", key), styles::key_hint()));
        spans.push(Span::styled(format!("{} ", label), styles::text_dim()));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn endpoint(node: &Node) -> String {
    match node.port {
        Some(port) => format!("{}:{}", node.address, port),
        None => node.address.clone(),
    }
}

/// Rect of `width_pct` percent of `area`'s width and `height` rows, centered
fn centered_rect(width_pct: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * width_pct / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

// --- Terminal setup/teardown ---
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

pub async fn run_tui(directory: Directory, dashboard: &DashboardConfig) -> anyhow::Result<()> {
    let mut app = App::new(directory, dashboard);
    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, &mut app).await;
    restore_terminal(terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    while !app.quit {
        app.tick();
        terminal.draw(|f| app.draw(f))?;

        if event::poll(Duration::from_millis(50))? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key);
                }
            }
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}
