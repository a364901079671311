use crate::commands::{Action, Command};
use crate::event::{Event, EventHandler};
use crate::ui;
use crate::ui::components::{CommandEvent, CommandInput, KeyResult};
use crate::ui::renderfns::CacheStats;
use crate::ui::view::{View, ViewAction, ViewContext};
use crate::ui::views;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use querydeck::api::DataClient;
use querydeck::config::{Config, StartView};
use querydeck::QueryKey;
use ratatui::prelude::*;
use std::io::stdout;
use std::time::Duration;
use tracing::{debug, info};

const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Main application state
pub struct App {
  config: Config,
  ctx: ViewContext,
  /// Navigation stack - root is always at index 0
  view_stack: Vec<Box<dyn View>>,
  command: CommandInput,
  /// Outcome of the last `:` command
  message: Option<String>,
  should_quit: bool,
}

impl App {
  pub fn new(config: Config, client: DataClient) -> Self {
    let ctx = ViewContext {
      client,
      page_size: config.ui.page_size,
      max_visible_pages: config.ui.max_visible_pages,
    };
    let root = views::open(config.ui.start_view, ctx.clone());
    Self {
      config,
      ctx,
      view_stack: vec![root],
      command: CommandInput::new(),
      message: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let gc = self.ctx.client.cache().spawn_gc(GC_INTERVAL);

    let result = self.event_loop().await;

    // Restore the terminal even when the loop failed
    gc.abort();
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    info!("exiting");
    result
  }

  async fn event_loop(&mut self) -> Result<()> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    let mut events = EventHandler::new(self.config.tick_rate());

    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(Event::Key(key)) => self.handle_key(key),
        Some(Event::Tick) => self.tick(),
        Some(Event::Resize) => {}
        None => break,
      }
    }
    Ok(())
  }

  fn tick(&mut self) {
    for view in &mut self.view_stack {
      view.tick();
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }

    let view_captures = self
      .current_view()
      .map(|v| v.captures_input())
      .unwrap_or(false);
    if !view_captures || self.command.is_active() {
      match self.command.handle_key(key) {
        KeyResult::Event(CommandEvent::Submitted(cmd)) => {
          self.execute_command(cmd);
          return;
        }
        KeyResult::Event(CommandEvent::Unknown(input)) => {
          if !input.is_empty() {
            self.message = Some(format!("Unknown command: {input}"));
          }
          return;
        }
        KeyResult::Event(CommandEvent::Cancelled) | KeyResult::Handled => return,
        KeyResult::NotHandled => {}
      }
    }

    let action = match self.current_view_mut() {
      Some(view) => view.handle_key(key),
      None => ViewAction::Pop,
    };
    self.apply(action);
  }

  fn apply(&mut self, action: ViewAction) {
    match action {
      ViewAction::None => {}
      ViewAction::Push(view) => {
        debug!(view = %view.breadcrumb_label(), "push view");
        self.message = None;
        self.view_stack.push(view);
      }
      ViewAction::Pop => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
        } else {
          self.should_quit = true;
        }
      }
    }
  }

  fn execute_command(&mut self, cmd: &Command) {
    debug!(command = cmd.name, "execute command");
    match cmd.action {
      Action::Open(view) => self.open(view),
      Action::Refresh => {
        // The empty key is a prefix of every key
        let count = self
          .ctx
          .client
          .cache()
          .invalidate(&QueryKey::from_parts(Vec::new()));
        self.message = Some(format!("Invalidated {count} cached queries"));
      }
      Action::Collect => {
        let removed = self.ctx.client.cache().collect_garbage();
        self.message = Some(format!("Removed {removed} idle entries"));
      }
      Action::Quit => self.should_quit = true,
    }
  }

  /// Replace the whole stack with a fresh top-level screen.
  fn open(&mut self, view: StartView) {
    self.view_stack.clear();
    self.view_stack.push(views::open(view, self.ctx.clone()));
    self.message = None;
  }

  // Accessors for the UI

  pub fn current_view(&self) -> Option<&dyn View> {
    self.view_stack.last().map(|v| &**v)
  }

  pub fn current_view_mut(&mut self) -> Option<&mut Box<dyn View>> {
    self.view_stack.last_mut()
  }

  pub fn title(&self) -> &str {
    self.config.ui.title.as_deref().unwrap_or("querydeck")
  }

  pub fn cache_stats(&self) -> CacheStats {
    CacheStats {
      entries: self.ctx.client.cache().len(),
      pending_mutations: self.ctx.client.executor().pending().len(),
    }
  }

  pub fn command_input(&self) -> &CommandInput {
    &self.command
  }

  /// The view's own message wins over the last command's.
  pub fn status_line(&self) -> Option<String> {
    self
      .current_view()
      .and_then(|v| v.status())
      .or_else(|| self.message.clone())
  }

  pub fn view_breadcrumb(&self) -> Vec<String> {
    self.view_stack.iter().map(|v| v.breadcrumb_label()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use querydeck::api::MockBackend;
  use querydeck::QueryCache;

  fn app(start: StartView) -> App {
    let mut config = Config::default();
    config.ui.start_view = start;
    let client = DataClient::new(QueryCache::new(), MockBackend::new(Duration::ZERO), None);
    App::new(config, client)
  }

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn type_command(app: &mut App, text: &str) {
    app.handle_key(key(KeyCode::Char(':')));
    for c in text.chars() {
      app.handle_key(key(KeyCode::Char(c)));
    }
    app.handle_key(key(KeyCode::Enter));
  }

  #[tokio::test]
  async fn test_open_command_replaces_stack() {
    let mut app = app(StartView::Cars);
    assert_eq!(app.view_breadcrumb(), vec!["Cars"]);

    type_command(&mut app, "users");
    assert_eq!(app.view_breadcrumb(), vec!["Users"]);
    assert!(!app.command_input().is_active());
  }

  #[tokio::test]
  async fn test_unknown_command_reports() {
    let mut app = app(StartView::Cars);
    type_command(&mut app, "zzz");
    assert_eq!(app.status_line().as_deref(), Some("Unknown command: zzz"));
    assert_eq!(app.view_breadcrumb(), vec!["Cars"]);
  }

  #[tokio::test]
  async fn test_pop_on_root_quits() {
    let mut app = app(StartView::Posts);
    app.handle_key(key(KeyCode::Char('q')));
    assert!(app.should_quit);
  }

  #[tokio::test]
  async fn test_ctrl_c_quits() {
    let mut app = app(StartView::Employees);
    app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
    assert!(app.should_quit);
  }

  #[tokio::test]
  async fn test_quit_and_gc_commands() {
    let mut app = app(StartView::Uploads);
    type_command(&mut app, "gc");
    assert_eq!(app.status_line().as_deref(), Some("Removed 0 idle entries"));
    type_command(&mut app, "quit");
    assert!(app.should_quit);
  }
}
