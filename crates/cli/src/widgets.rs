use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use unicode_width::UnicodeWidthStr;

use crate::format::EntryKind;
use crate::tui::{App, Message, Speaker};

/// Render markdown with `tui_markdown` (ratatui-core types) and convert to
/// ratatui 0.29 lines, patching `base` under every span.
fn md_to_lines(content: &str, base: Style) -> Vec<Line<'static>> {
    tui_markdown::from_str(content)
        .lines
        .into_iter()
        .map(|line| {
            line.spans
                .into_iter()
                .map(|s| Span::styled(s.content.into_owned(), base.patch(convert_style(s.style))))
                .collect::<Vec<_>>()
                .into()
        })
        .collect()
}

/// Plain lines, one per `\n`, all in `style`.
fn plain_lines(content: &str, style: Style) -> Vec<Line<'static>> {
    content.lines().map(|l| Line::from(Span::styled(l.to_owned(), style))).collect()
}

fn convert_style(s: ratatui_core::style::Style) -> Style {
    let mut out = Style::default();
    if let Some(c) = s.fg {
        out.fg = Some(convert_color(c));
    }
    if let Some(c) = s.bg {
        out.bg = Some(convert_color(c));
    }
    out.add_modifier = Modifier::from_bits_truncate(s.add_modifier.bits());
    out.sub_modifier = Modifier::from_bits_truncate(s.sub_modifier.bits());
    out
}

fn convert_color(c: ratatui_core::style::Color) -> Color {
    use ratatui_core::style::Color as C;
    match c {
        C::Reset => Color::Reset,
        C::Black => Color::Black,
        C::Red => Color::Red,
        C::Green => Color::Green,
        C::Yellow => Color::Yellow,
        C::Blue => Color::Blue,
        C::Magenta => Color::Magenta,
        C::Cyan => Color::Cyan,
        C::Gray => Color::Gray,
        C::DarkGray => Color::DarkGray,
        C::LightRed => Color::LightRed,
        C::LightGreen => Color::LightGreen,
        C::LightYellow => Color::LightYellow,
        C::LightBlue => Color::LightBlue,
        C::LightMagenta => Color::LightMagenta,
        C::LightCyan => Color::LightCyan,
        C::White => Color::White,
        C::Rgb(r, g, b) => Color::Rgb(r, g, b),
        C::Indexed(i) => Color::Indexed(i),
    }
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const INPUT_PREFIX: &str = "> ";

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(f.area());

    draw_chat(f, app, chunks[0]);
    draw_status(f, app, chunks[1]);
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let s = &app.status;
    let model = if s.model.is_empty() { s.provider.clone() } else { format!("{} · {}", s.provider, s.model) };
    let phase = app.phase.map_or_else(|| "idle".to_owned(), |p| p.to_string());
    let mut spans = vec![Span::styled(
        format!(" {model}  |  {}  |  {phase}", s.database),
        Style::default().fg(Color::DarkGray),
    )];
    if app.approval.is_some() {
        spans.push(Span::styled("  |  approve? y/n", Style::default().fg(Color::Yellow).bold()));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn message_lines(msg: &Message) -> Vec<Line<'static>> {
    let dim = Style::default().fg(Color::DarkGray);
    match msg.speaker {
        Speaker::You => vec![Line::from(vec![Span::raw(INPUT_PREFIX), Span::raw(msg.text.clone())])],
        Speaker::Reply | Speaker::Loop(EntryKind::Answer) => md_to_lines(&msg.text, Style::default()),
        Speaker::Notice => md_to_lines(&msg.text, Style::default().fg(Color::Cyan)),
        Speaker::Loop(EntryKind::Approval) => md_to_lines(&msg.text, Style::default().fg(Color::Yellow)),
        Speaker::Loop(EntryKind::Alert) => plain_lines(&msg.text, Style::default().fg(Color::Red)),
        Speaker::Loop(EntryKind::Plan) => plain_lines(&msg.text, Style::default().fg(Color::Blue)),
        Speaker::Loop(EntryKind::Trace) => plain_lines(&msg.text, dim),
    }
}

fn draw_chat(f: &mut Frame, app: &App, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for msg in &app.messages {
        // blank line before each new question
        if !lines.is_empty() && msg.speaker == Speaker::You {
            lines.push(Line::default());
        }
        lines.extend(message_lines(msg));
    }
    if app.thinking {
        let frame = SPINNER[app.anim_frame % SPINNER.len()];
        let label = app.phase.map_or_else(|| "working".to_owned(), |p| p.to_string());
        lines.push(Line::from(Span::styled(format!("{frame} {label}..."), Style::default().dim())));
    }

    if !lines.is_empty() {
        lines.push(Line::default());
    }
    lines.push(Line::from(vec![Span::raw(INPUT_PREFIX), Span::raw(&app.input)]));

    // inner width: area minus borders
    let inner_w = area.width.saturating_sub(2) as usize;

    let wrapped_total: u16 = lines.iter().map(|l| wrapped_line_count(l, inner_w)).sum();
    let visible = area.height.saturating_sub(2);
    let scroll = wrapped_total.saturating_sub(visible).saturating_sub(app.scroll_offset);

    let block = Block::default().borders(Borders::ALL).title(" sqlscout ");
    let para = Paragraph::new(lines).block(block).wrap(Wrap { trim: false }).scroll((scroll, 0));
    f.render_widget(para, area);

    let cursor_w = INPUT_PREFIX.width() + app.input[..app.cursor].width();
    let (cursor_row, cursor_col) = if inner_w > 0 { (cursor_w / inner_w, cursor_w % inner_w) } else { (0, 0) };

    let input_rows = greedy_wrap_rows(&format!("{INPUT_PREFIX}{}", app.input), inner_w);
    let abs_row = wrapped_total.saturating_sub(input_rows) + cursor_row as u16;
    let vis_row = abs_row.saturating_sub(scroll);

    f.set_cursor_position(Position::new(area.x + 1 + cursor_col as u16, area.y + 1 + vis_row));
}

/// Visual rows of `line` when wrapped to `width` columns.
fn wrapped_line_count(line: &Line, width: usize) -> u16 {
    let full: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
    full.split('\n').map(|sub| greedy_wrap_rows(sub, width)).sum()
}

/// Char-by-char greedy wrap; approximates ratatui's word wrap from below.
fn greedy_wrap_rows(s: &str, width: usize) -> u16 {
    if width == 0 {
        return 1;
    }
    let mut rows: u16 = 1;
    let mut col: usize = 0;
    for ch in s.chars() {
        let cw = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if cw == 0 {
            continue;
        }
        if col + cw > width {
            rows += 1;
            col = cw;
        } else {
            col += cw;
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_counts_wide_chars() {
        assert_eq!(greedy_wrap_rows("abcd", 4), 1);
        assert_eq!(greedy_wrap_rows("abcde", 4), 2);
        assert_eq!(greedy_wrap_rows("表表表", 4), 2);
        assert_eq!(greedy_wrap_rows("", 4), 1);
    }

    #[test]
    fn markdown_keeps_base_color() {
        let lines = md_to_lines("plain", Style::default().fg(Color::Cyan));
        assert!(!lines.is_empty());
        assert!(lines[0].spans.iter().all(|s| s.style.fg == Some(Color::Cyan)));
    }
}
