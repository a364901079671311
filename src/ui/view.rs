use crossterm::event::KeyEvent;
use querydeck::api::DataClient;
use ratatui::prelude::*;

/// A keyboard shortcut hint for display in the header
#[derive(Debug, Clone)]
pub struct ShortcutInfo {
  pub key: &'static str,
  pub label: &'static str,
  pub priority: u8, // Lower = shown first
}

impl ShortcutInfo {
  pub const fn new(key: &'static str, label: &'static str) -> Self {
    Self {
      key,
      label,
      priority: 100,
    }
  }

  pub const fn with_priority(mut self, priority: u8) -> Self {
    self.priority = priority;
    self
  }
}

/// What every view gets handed when it is created.
#[derive(Clone, Debug)]
pub struct ViewContext {
  pub client: DataClient,
  /// Rows per page for client-side paging
  pub page_size: usize,
  pub max_visible_pages: usize,
}

/// Actions that a view can request in response to user input
pub enum ViewAction {
  None,
  Push(Box<dyn View>),
  /// Go back; on the root view this quits
  Pop,
}

/// Views own their bindings and poll them in `tick`. Input flows
/// App → View → Components, and views answer with a [`ViewAction`].
pub trait View {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction;

  fn render(&mut self, frame: &mut Frame, area: Rect);

  fn breadcrumb_label(&self) -> String;

  /// Poll bindings. Called for every view on the stack each tick.
  fn tick(&mut self) {}

  /// True while a text field or prompt owns the keyboard, so global keys
  /// like `:` reach the view instead of the App.
  fn captures_input(&self) -> bool {
    false
  }

  /// One-line message for the footer, e.g. the outcome of the last write.
  fn status(&self) -> Option<String> {
    None
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("r", "refetch").with_priority(20),
      ShortcutInfo::new("q", "back").with_priority(90),
    ]
  }
}
