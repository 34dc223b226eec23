use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use scout_core::agent::{LoopEvent, LoopPhase};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::AppEvent;
use crate::format::{self, Entry, EntryKind};
use crate::widgets;
use crate::worker::{Command, Handle, Output, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    You,
    /// Direct reply from the worker (quick intents, slash commands).
    Reply,
    Notice,
    /// Rendered loop event.
    Loop(EntryKind),
}

#[derive(Debug, Clone)]
pub struct Message {
    pub speaker: Speaker,
    pub text: String,
}

/// TUI application state.
pub struct App {
    pub messages: Vec<Message>,
    pub input: String,
    pub cursor: usize,
    pub scroll_offset: u16,
    pub thinking: bool,
    pub anim_frame: usize,
    pub status: Status,
    pub phase: Option<LoopPhase>,
    /// SQL waiting for a y/n answer.
    pub approval: Option<String>,
    pub should_exit: bool,
}

impl App {
    fn new(status: Status) -> Self {
        Self {
            messages: Vec::new(),
            input: String::new(),
            cursor: 0,
            scroll_offset: 0,
            thinking: false,
            anim_frame: 0,
            status,
            phase: None,
            approval: None,
            should_exit: false,
        }
    }

    fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.messages.push(Message { speaker, text: text.into() });
        self.scroll_offset = 0;
    }

    /// Plan snapshots of one goal overwrite each other.
    fn push_entry(&mut self, entry: Entry) {
        if entry.kind == EntryKind::Plan {
            let since_input = self.messages.iter().rposition(|m| m.speaker == Speaker::You).map_or(0, |i| i + 1);
            if let Some(prev) = self.messages[since_input..]
                .iter_mut()
                .rev()
                .find(|m| m.speaker == Speaker::Loop(EntryKind::Plan))
            {
                prev.text = entry.text;
                return;
            }
        }
        self.push(Speaker::Loop(entry.kind), entry.text);
    }

    fn on_loop_event(&mut self, event: &LoopEvent) {
        if let LoopEvent::PhaseChange { to, .. } = event {
            self.phase = Some(*to);
        }
        if let Some(entry) = format::render(event) {
            self.push_entry(entry);
        }
    }

    fn on_output(&mut self, output: Output) {
        match output {
            Output::Reply(text) => self.push(Speaker::Reply, text),
            Output::Notice(text) => self.push(Speaker::Notice, text),
            Output::Approval { sql } => self.approval = Some(sql),
            Output::Cleared => {
                self.messages.clear();
                self.phase = None;
                self.approval = None;
            }
            Output::Idle => self.thinking = false,
        }
    }

    fn submit_input(&mut self) -> Option<String> {
        let text = self.input.trim().to_owned();
        if text.is_empty() {
            return None;
        }
        self.input.clear();
        self.cursor = 0;
        self.push(Speaker::You, text.clone());
        self.thinking = true;
        Some(text)
    }

    /// `y`/`n` on an empty prompt answer the pending approval.
    fn take_decision(&mut self, c: char) -> Option<bool> {
        if self.approval.is_none() || !self.input.is_empty() {
            return None;
        }
        let approved = match c {
            'y' | 'Y' => true,
            'n' | 'N' => false,
            _ => return None,
        };
        self.approval = None;
        self.thinking = true;
        self.push(Speaker::You, if approved { "approved" } else { "rejected" });
        Some(approved)
    }

    fn insert_str(&mut self, s: &str) {
        self.input.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    fn prev_boundary(&self) -> usize {
        self.input[..self.cursor].char_indices().next_back().map_or(0, |(i, _)| i)
    }

    fn next_boundary(&self) -> usize {
        self.input[self.cursor..]
            .chars()
            .next()
            .map_or(self.input.len(), |c| self.cursor + c.len_utf8())
    }

    fn backspace(&mut self) {
        let prev = self.prev_boundary();
        self.input.drain(prev..self.cursor);
        self.cursor = prev;
    }
}

/// Run the TUI event loop until Ctrl+C or cancellation.
pub async fn run_app(mut handle: Handle, token: CancellationToken, notices: Vec<String>) -> anyhow::Result<()> {
    terminal::enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut event_rx = crate::event::spawn(stop.clone());

    let mut app = App::new(handle.status.borrow().clone());
    for notice in notices {
        app.push(Speaker::Notice, notice);
    }
    let mut anim_interval = tokio::time::interval(std::time::Duration::from_millis(80));
    anim_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    terminal.draw(|f| widgets::draw(f, &app))?;

    while !app.should_exit {
        tokio::select! {
            _ = token.cancelled() => break,
            evt = event_rx.recv() => {
                let Some(evt) = evt else { break };
                match evt {
                    AppEvent::Key(key) => handle_key(&mut app, key, &handle.commands).await,
                    AppEvent::Paste(text) => app.insert_str(&text.replace(['\r', '\n'], " ")),
                    AppEvent::Resize => {}
                }
            }
            Some(event) = handle.events.recv() => app.on_loop_event(&event),
            Some(output) = handle.output.recv() => app.on_output(output),
            Ok(()) = handle.status.changed() => {
                app.status = handle.status.borrow_and_update().clone();
            }
            _ = anim_interval.tick() => {
                if app.thinking {
                    app.anim_frame = app.anim_frame.wrapping_add(1);
                }
            }
        }
        terminal.draw(|f| widgets::draw(f, &app))?;
    }

    stop.store(true, Ordering::Relaxed);
    terminal::disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), DisableBracketedPaste, LeaveAlternateScreen)?;
    Ok(())
}

async fn send(app: &mut App, commands: &mpsc::Sender<Command>, cmd: Command) {
    if commands.send(cmd).await.is_err() {
        tracing::warn!("worker is gone");
        app.should_exit = true;
    }
}

async fn handle_key(app: &mut App, key: KeyEvent, commands: &mpsc::Sender<Command>) {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => app.should_exit = true,
        (_, KeyCode::Enter) => {
            if let Some(text) = app.submit_input() {
                send(app, commands, Command::Input(text)).await;
            }
        }
        (_, KeyCode::Esc) => {
            app.input.clear();
            app.cursor = 0;
        }
        (_, KeyCode::Backspace) => app.backspace(),
        (_, KeyCode::Left) => app.cursor = app.prev_boundary(),
        (_, KeyCode::Right) => app.cursor = app.next_boundary(),
        (_, KeyCode::Up) => app.scroll_offset = app.scroll_offset.saturating_add(1),
        (_, KeyCode::Down) => app.scroll_offset = app.scroll_offset.saturating_sub(1),
        (_, KeyCode::PageUp) => app.scroll_offset = app.scroll_offset.saturating_add(10),
        (_, KeyCode::PageDown) => app.scroll_offset = app.scroll_offset.saturating_sub(10),
        (_, KeyCode::Home) => app.cursor = 0,
        (_, KeyCode::End) => app.cursor = app.input.len(),
        (_, KeyCode::Char(c)) => match app.take_decision(c) {
            Some(approved) => send(app, commands, Command::Decide(approved)).await,
            None => app.insert_str(c.encode_utf8(&mut [0; 4])),
        },
        _ => {}
    }
}
