use super::KeyResult;
use crate::ui::renderfns::centered;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

/// Yes/no question guarding a destructive action. Carries the value the
/// parent acts on once confirmed.
#[derive(Debug, Clone)]
pub struct Confirm<T> {
  pending: Option<(String, T)>,
}

impl<T> Default for Confirm<T> {
  fn default() -> Self {
    Self { pending: None }
  }
}

impl<T> Confirm<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.pending.is_some()
  }

  pub fn ask(&mut self, question: impl Into<String>, value: T) {
    self.pending = Some((question.into(), value));
  }

  /// `y` yields the value, `n`/Esc drops it.
  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<T> {
    if self.pending.is_none() {
      return KeyResult::NotHandled;
    }
    match key.code {
      KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => match self.pending.take() {
        Some((_, value)) => KeyResult::Event(value),
        None => KeyResult::Handled,
      },
      KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
        self.pending = None;
        KeyResult::Handled
      }
      _ => KeyResult::Handled,
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    let Some((question, _)) = &self.pending else {
      return;
    };
    let overlay_area = centered(area, (question.chars().count() as u16 + 4).max(24), 4);
    frame.render_widget(Clear, overlay_area);
    let text = vec![
      Line::from(question.as_str()),
      Line::from(vec![
        Span::styled("y", Style::default().fg(Color::Cyan)),
        Span::styled(" yes   ", Style::default().fg(Color::DarkGray)),
        Span::styled("n", Style::default().fg(Color::Cyan)),
        Span::styled(" no", Style::default().fg(Color::DarkGray)),
      ]),
    ];
    let paragraph = Paragraph::new(text).wrap(Wrap { trim: true }).block(
      Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Confirm "),
    );
    frame.render_widget(paragraph, overlay_area);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
  }

  #[test]
  fn test_yes_yields_value_once() {
    let mut confirm = Confirm::new();
    confirm.ask("Delete this car?", 7u64);
    assert_eq!(confirm.handle_key(key('x')), KeyResult::Handled);
    assert_eq!(confirm.handle_key(key('y')), KeyResult::Event(7));
    assert_eq!(confirm.handle_key(key('y')), KeyResult::NotHandled);
  }

  #[test]
  fn test_no_drops_value() {
    let mut confirm = Confirm::new();
    confirm.ask("Delete?", 1u64);
    assert_eq!(confirm.handle_key(key('n')), KeyResult::Handled);
    assert!(!confirm.is_active());
  }
}
