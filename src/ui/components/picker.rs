use super::KeyResult;
use crate::ui::renderfns::centered;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState};

/// Events emitted by the picker that parent needs to handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerEvent {
  /// Index into the options passed to `show`
  Selected(usize),
  Cancelled,
}

/// Centered list overlay for choosing one of a few options.
#[derive(Debug, Clone, Default)]
pub struct Picker {
  active: bool,
  options: Vec<String>,
  selected: usize,
  title: String,
}

impl Picker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  /// Open with `options`, highlighting `selected`.
  pub fn show(&mut self, title: impl Into<String>, options: Vec<String>, selected: usize) {
    self.active = !options.is_empty();
    self.selected = selected.min(options.len().saturating_sub(1));
    self.options = options;
    self.title = title.into();
  }

  pub fn hide(&mut self) {
    self.active = false;
    self.options.clear();
    self.selected = 0;
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<PickerEvent> {
    if !self.active {
      return KeyResult::NotHandled;
    }

    let len = self.options.len();
    match key.code {
      KeyCode::Esc | KeyCode::Char('q') => {
        self.hide();
        KeyResult::Event(PickerEvent::Cancelled)
      }
      KeyCode::Enter => {
        let selected = self.selected;
        self.hide();
        KeyResult::Event(PickerEvent::Selected(selected))
      }
      KeyCode::Char('j') | KeyCode::Down => {
        self.selected = (self.selected + 1) % len;
        KeyResult::Handled
      }
      KeyCode::Char('k') | KeyCode::Up => {
        self.selected = (self.selected + len - 1) % len;
        KeyResult::Handled
      }
      _ => KeyResult::Handled,
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let widest = self
      .options
      .iter()
      .map(|o| o.chars().count())
      .chain([self.title.chars().count()])
      .max()
      .unwrap_or(10);
    let overlay_area = centered(area, widest as u16 + 6, self.options.len() as u16 + 2);

    frame.render_widget(Clear, overlay_area);
    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(format!(" {} ", self.title));

    let items: Vec<ListItem> = self
      .options
      .iter()
      .map(|option| ListItem::new(Span::styled(option.clone(), Style::default().fg(Color::Cyan))))
      .collect();
    let list = List::new(items)
      .block(block)
      .highlight_style(Style::default().bg(Color::DarkGray).fg(Color::White));
    let mut state = ListState::default().with_selected(Some(self.selected));
    frame.render_stateful_widget(list, overlay_area, &mut state);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  #[test]
  fn test_wraps_and_selects() {
    let mut picker = Picker::new();
    picker.show("Department", vec!["All".into(), "IT".into(), "HR".into()], 0);
    picker.handle_key(key(KeyCode::Up));
    assert_eq!(
      picker.handle_key(key(KeyCode::Enter)),
      KeyResult::Event(PickerEvent::Selected(2))
    );
    assert!(!picker.is_active());
    assert_eq!(picker.handle_key(key(KeyCode::Enter)), KeyResult::NotHandled);
  }

  #[test]
  fn test_empty_options_stay_hidden() {
    let mut picker = Picker::new();
    picker.show("Nothing", Vec::new(), 3);
    assert!(!picker.is_active());
  }
}
