use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{User, UserDraft, UserPage};
use querydeck::api::{keys, DataClient};
use querydeck::cache::QueryKey;
use querydeck::pagination::{CursorState, ListController};
use querydeck::query::{use_entry, use_mutation, EntryBinding, EntryOptions, MutationBinding};
use ratatui::prelude::*;
use ratatui::widgets::{Paragraph, Row, Table, TableState};

use crate::ui::components::{
  user_form, user_values, Confirm, Form, FormEvent, KeyResult, SearchEvent, SearchInput,
};
use crate::ui::renderfns::error_message;
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::views::UserDetailView;
use crate::ui::{data_block, draw_placeholder, ensure_valid_selection};

const USERS_PER_PAGE: usize = 3;

pub(super) fn role_color(role: &str) -> Color {
  match role {
    "Manager" => Color::Magenta,
    "Developer" => Color::Blue,
    "Designer" => Color::Yellow,
    "Tester" => Color::Green,
    _ => Color::Gray,
  }
}

/// User accounts, paged by "has more" rather than a total. A `/` search
/// replaces the page with matching users until it is cleared.
pub struct UsersView {
  ctx: ViewContext,
  pages: ListController,
  cursor: CursorState,
  users: EntryBinding<UserPage>,
  search: SearchInput,
  /// Disabled while the search query is empty
  results: EntryBinding<Vec<User>>,
  table_state: TableState,
  form: Form<UserDraft>,
  confirm: Confirm<u64>,
  create: MutationBinding<UserDraft, User>,
  update: MutationBinding<(u64, UserDraft), User>,
  /// Takes the key of the page the user was deleted from
  delete: MutationBinding<(u64, QueryKey), u64>,
  message: Option<String>,
}

impl UsersView {
  pub fn new(ctx: ViewContext) -> Self {
    let client = &ctx.client;
    let pages = ListController::new(keys::users(), USERS_PER_PAGE);
    let cursor = CursorState::new(USERS_PER_PAGE);
    let users = use_entry(
      client.cache(),
      pages.key_for(cursor.page),
      client.users_loader(),
      EntryOptions::default().keep_previous_data(),
    );
    let results = use_entry(
      client.cache(),
      keys::user_search(""),
      client.user_search_loader(),
      EntryOptions::default().enabled(false),
    );

    let api = client.backend().clone();
    let create = use_mutation(
      client.executor(),
      move |draft: UserDraft| {
        let api = api.clone();
        async move { api.create_user(draft).await }
      },
      |_| DataClient::create_user_options(),
    );
    let api = client.backend().clone();
    let update = use_mutation(
      client.executor(),
      move |(id, draft): (u64, UserDraft)| {
        let api = api.clone();
        async move { api.update_user(id, draft).await }
      },
      |(id, _)| DataClient::update_user_options(*id),
    );
    let api = client.backend().clone();
    let delete = use_mutation(
      client.executor(),
      move |(id, _page): (u64, QueryKey)| {
        let api = api.clone();
        async move { api.delete_user(id).await }
      },
      |(id, page)| DataClient::delete_user_options(*id, page.clone()),
    );

    Self {
      ctx,
      pages,
      cursor,
      users,
      search: SearchInput::new(),
      results,
      table_state: TableState::default(),
      form: user_form(),
      confirm: Confirm::new(),
      create,
      update,
      delete,
      message: None,
    }
  }

  fn is_searching(&self) -> bool {
    self.results.is_enabled()
  }

  /// Rows on screen: search matches while searching, else the current page.
  fn visible_users(&self) -> &[User] {
    if self.is_searching() {
      self.results.data().map(Vec::as_slice).unwrap_or(&[])
    } else {
      self.users.data().map(|p| p.users.as_slice()).unwrap_or(&[])
    }
  }

  fn selected_user(&self) -> Option<&User> {
    self
      .table_state
      .selected()
      .and_then(|i| self.visible_users().get(i))
  }

  /// Follow the search query; an empty one turns the search off.
  fn search_for(&mut self, query: &str) {
    let enabled = !query.is_empty();
    if !enabled {
      self.results.set_enabled(false);
    }
    self.results.set_key(keys::user_search(query));
    self.results.set_enabled(enabled);
    self.table_state.select(Some(0));
  }

  fn load_page(&mut self) {
    self.users.set_key(self.pages.key_for(self.cursor.page));
    self.table_state.select(Some(0));
  }

  fn handle_overlays(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match self.form.handle_key(key) {
      KeyResult::Event(FormEvent::Submitted { id: Some(id), value: draft }) => {
        self.update.mutate((id, draft));
        return Some(ViewAction::None);
      }
      KeyResult::Event(FormEvent::Submitted { id: None, value: draft }) => {
        self.create.mutate(draft);
        return Some(ViewAction::None);
      }
      KeyResult::NotHandled => {}
      _ => return Some(ViewAction::None),
    }

    match self.search.handle_key(key) {
      KeyResult::Event(SearchEvent::Submitted(query))
      | KeyResult::Event(SearchEvent::Changed(query)) => {
        self.search_for(&query);
        return Some(ViewAction::None);
      }
      KeyResult::Handled => return Some(ViewAction::None),
      KeyResult::NotHandled => {}
    }

    match self.confirm.handle_key(key) {
      KeyResult::Event(id) => {
        self.delete.mutate((id, self.users.key().clone()));
        Some(ViewAction::None)
      }
      KeyResult::Handled => Some(ViewAction::None),
      KeyResult::NotHandled => None,
    }
  }

  fn handle_navigation(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.table_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.table_state.select_previous(),
      KeyCode::Char('l') | KeyCode::Right if !self.is_searching() => {
        // Wait for the current page before trusting has_more
        if !self.users.is_previous_data() && self.cursor.next() {
          self.load_page();
        }
      }
      KeyCode::Char('h') | KeyCode::Left if !self.is_searching() => {
        if self.cursor.prev() {
          self.load_page();
        }
      }
      _ => return None,
    }
    Some(ViewAction::None)
  }

  fn handle_actions(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('a') => {
        self.message = None;
        self.form.open_add();
      }
      KeyCode::Char('e') => {
        if let Some(user) = self.selected_user() {
          let values = user_values(user);
          let id = user.id;
          self.message = None;
          self.form.open(Some(id), values);
        }
      }
      KeyCode::Enter => {
        if let Some(user) = self.selected_user() {
          let view = UserDetailView::new(self.ctx.clone(), user.id, user.name.clone());
          return Some(ViewAction::Push(Box::new(view)));
        }
      }
      KeyCode::Char('d') | KeyCode::Delete => {
        if let Some(user) = self.selected_user() {
          let question = format!("Delete user {}?", user.name);
          let id = user.id;
          self.message = None;
          self.confirm.ask(question, id);
        }
      }
      KeyCode::Char('r') if self.is_searching() => self.results.refetch(),
      KeyCode::Char('r') => self.users.refetch(),
      KeyCode::Esc if self.is_searching() => {
        self.search = SearchInput::new();
        self.search_for("");
      }
      KeyCode::Char('q') | KeyCode::Esc => return Some(ViewAction::Pop),
      _ => return None,
    }
    Some(ViewAction::None)
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    let rows_len = self.visible_users().len();
    ensure_valid_selection(&mut self.table_state, rows_len);

    let (title, status, loading, error) = if self.is_searching() {
      (
        format!("Search \"{}\" ({rows_len})", self.search.query()),
        self.results.status(),
        self.results.is_loading(),
        self.results.error(),
      )
    } else {
      let title = match self.users.data() {
        Some(page) => format!("Users ({})", page.total),
        None => "Users".to_string(),
      };
      (
        title,
        self.users.status(),
        self.users.is_loading(),
        self.users.error(),
      )
    };
    let block = data_block(title, status);

    if rows_len == 0 {
      draw_placeholder(frame, area, block, loading, error, "users");
      return;
    }

    let dim = !self.is_searching() && self.users.is_previous_data();
    let rows: Vec<Row> = self
      .visible_users()
      .iter()
      .map(|user| {
        let row = Row::new(vec![
          Span::styled(user.id.to_string(), Style::default().fg(Color::Cyan)),
          Span::raw(user.name.clone()),
          Span::raw(user.email.clone()),
          Span::styled(user.role.clone(), Style::default().fg(role_color(&user.role))),
        ]);
        if dim {
          row.style(Style::default().fg(Color::DarkGray))
        } else {
          row
        }
      })
      .collect();

    let table = Table::new(
      rows,
      [
        Constraint::Length(6),
        Constraint::Percentage(30),
        Constraint::Percentage(40),
        Constraint::Length(10),
      ],
    )
    .header(Row::new(["ID", "Name", "Email", "Role"]).style(Style::default().bold()))
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }

  fn poll_mutations(&mut self) {
    if self.create.poll() {
      self.message = Some(match (self.create.error(), self.create.result()) {
        (Some(err), _) => format!("Could not add user: {}", error_message(err)),
        (None, Some(user)) => format!("Added user {}", user.name),
        (None, None) => String::new(),
      });
    }
    if self.update.poll() {
      self.message = Some(match (self.update.error(), self.update.result()) {
        (Some(err), _) => format!("Could not save user: {}", error_message(err)),
        (None, Some(user)) => format!("Saved user #{}", user.id),
        (None, None) => String::new(),
      });
    }
    if self.delete.poll() {
      self.message = Some(match (self.delete.error(), self.delete.result()) {
        (Some(err), _) => format!("Delete failed, user restored: {}", error_message(err)),
        (None, Some(id)) => format!("Deleted user #{id}"),
        (None, None) => String::new(),
      });
    }
  }

  fn pager_line(&self) -> Line<'static> {
    let enabled = Style::default().fg(Color::Cyan);
    let disabled = Style::default().fg(Color::DarkGray);
    let prev = if self.cursor.has_prev() { enabled } else { disabled };
    let next = if self.cursor.has_more { enabled } else { disabled };
    Line::from(vec![
      Span::styled("‹ prev ", prev),
      Span::styled(format!(" Page {} ", self.cursor.page), Style::default().bold()),
      Span::styled(" next ›", next),
    ])
  }
}

impl View for UsersView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    self
      .handle_overlays(key)
      .or_else(|| self.handle_navigation(key))
      .or_else(|| self.handle_actions(key))
      .unwrap_or(ViewAction::None)
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let [list, pager] = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(area);
    self.render_table(frame, list);
    if !self.is_searching() {
      frame.render_widget(Paragraph::new(self.pager_line()).centered(), pager);
    }
    self.search.render_overlay(frame, area);
    self.form.render_overlay(frame, area);
    self.confirm.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Users".to_string()
  }

  fn tick(&mut self) {
    if self.users.poll() && !self.users.is_previous_data() {
      if let Some(has_more) = self.users.data().map(|p| p.has_more) {
        self.cursor.update(has_more);
      }
    }
    self.results.poll();
    self.poll_mutations();
  }

  fn captures_input(&self) -> bool {
    self.form.is_active() || self.search.is_active() || self.confirm.is_active()
  }

  fn status(&self) -> Option<String> {
    if self.create.is_pending() {
      return Some("Creating...".to_string());
    }
    if self.update.is_pending() {
      return Some("Saving...".to_string());
    }
    if self.delete.is_pending() {
      return Some("Deleting...".to_string());
    }
    self.message.clone().filter(|m| !m.is_empty())
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("/", "search").with_priority(15),
      ShortcutInfo::new("enter", "open").with_priority(18),
      ShortcutInfo::new("a", "add").with_priority(20),
      ShortcutInfo::new("e", "edit").with_priority(21),
      ShortcutInfo::new("d", "delete").with_priority(22),
      ShortcutInfo::new("h/l", "page").with_priority(30),
      ShortcutInfo::new("r", "refetch").with_priority(40),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossterm::event::KeyModifiers;
  use querydeck::api::MockBackend;
  use querydeck::QueryCache;
  use std::time::Duration;

  fn view() -> UsersView {
    let client = DataClient::new(QueryCache::new(), MockBackend::new(Duration::ZERO), None);
    UsersView::new(ViewContext {
      client,
      page_size: 10,
      max_visible_pages: 5,
    })
  }

  fn press(view: &mut UsersView, codes: &[KeyCode]) {
    for code in codes {
      view.handle_key(KeyEvent::new(*code, KeyModifiers::NONE));
    }
  }

  #[tokio::test]
  async fn test_search_runs_only_with_query() {
    let mut view = view();
    assert!(!view.is_searching());

    press(&mut view, &[KeyCode::Char('/'), KeyCode::Char('r'), KeyCode::Char('a')]);
    assert!(view.captures_input());
    assert!(view.is_searching());
    assert_eq!(view.results.key(), &keys::user_search("ra"));

    press(&mut view, &[KeyCode::Enter]);
    assert!(!view.captures_input());
    assert!(view.is_searching());

    // Esc clears the search before it leaves the view
    press(&mut view, &[KeyCode::Esc]);
    assert!(!view.is_searching());
    assert_eq!(view.search.query(), "");
  }

  #[tokio::test]
  async fn test_add_opens_user_form() {
    let mut view = view();
    press(&mut view, &[KeyCode::Char('a')]);
    assert!(view.form.is_active());
    assert!(view.captures_input());
    press(&mut view, &[KeyCode::Esc]);
    assert!(!view.form.is_active());
  }
}
