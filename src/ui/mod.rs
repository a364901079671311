pub mod components;
pub mod renderfns;
pub mod view;
pub mod views;

use querydeck::cache::QueryStatus;
use querydeck::QueryError;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, TableState, Wrap};

use crate::app::App;
use renderfns::{draw_footer, draw_header, error_message, status_color};

/// Draw header, current view, overlays and footer.
pub fn draw(frame: &mut Frame, app: &mut App) {
  let [header, content, footer] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(1),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  let shortcuts = app.current_view().map(|v| v.shortcuts()).unwrap_or_default();
  draw_header(frame, header, app.title(), app.cache_stats(), &shortcuts);

  if let Some(view) = app.current_view_mut() {
    view.render(frame, content);
  }
  app.command_input().render_overlay(frame, content);

  let status = app.status_line();
  draw_footer(frame, footer, &app.view_breadcrumb(), status.as_deref());
}

/// Keep the selection inside `0..len`, selecting the first row when
/// nothing is selected.
pub fn ensure_valid_selection(state: &mut TableState, len: usize) {
  if len == 0 {
    state.select(None);
  } else {
    match state.selected() {
      Some(i) if i >= len => state.select(Some(len - 1)),
      None => state.select(Some(0)),
      _ => {}
    }
  }
}

/// Bordered block whose title carries the load state, e.g.
/// ` Cars (120) · loading `.
pub fn data_block(title: String, status: QueryStatus) -> Block<'static> {
  let suffix = match status {
    QueryStatus::Loading => " · loading",
    QueryStatus::Error => " · error",
    _ => "",
  };
  Block::default()
    .title(format!(" {title}{suffix} "))
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(match status {
      QueryStatus::Error => status_color(status),
      _ => Color::Blue,
    }))
}

/// Message in place of a list that has nothing to show yet.
pub fn draw_placeholder(
  frame: &mut Frame,
  area: Rect,
  block: Block<'static>,
  loading: bool,
  error: Option<&QueryError>,
  what: &str,
) {
  let (text, color) = match error {
    Some(error) if !loading => (
      format!("Error loading {what}: {}. Press 'r' to retry.", error_message(error)),
      Color::Red,
    ),
    _ if loading => (format!("Loading {what}..."), Color::DarkGray),
    _ => (format!("No {what} found."), Color::DarkGray),
  };
  let paragraph = Paragraph::new(text)
    .block(block)
    .wrap(Wrap { trim: true })
    .style(Style::default().fg(color));
  frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ensure_valid_selection() {
    let mut state = TableState::default();
    ensure_valid_selection(&mut state, 3);
    assert_eq!(state.selected(), Some(0));
    state.select(Some(7));
    ensure_valid_selection(&mut state, 3);
    assert_eq!(state.selected(), Some(2));
    ensure_valid_selection(&mut state, 0);
    assert_eq!(state.selected(), None);
  }
}
