use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{User, UserDraft};
use querydeck::api::{keys, DataClient};
use querydeck::query::{use_entry, use_mutation, EntryBinding, EntryOptions, MutationBinding};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use super::users::role_color;
use crate::ui::components::{user_form, user_values, Form, FormEvent, KeyResult};
use crate::ui::renderfns::error_message;
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::{data_block, draw_placeholder};

/// One user under `["user", id]`, editable in place.
pub struct UserDetailView {
  id: u64,
  name: String,
  user: EntryBinding<User>,
  form: Form<UserDraft>,
  update: MutationBinding<(u64, UserDraft), User>,
  message: Option<String>,
}

impl UserDetailView {
  pub fn new(ctx: ViewContext, id: u64, name: String) -> Self {
    let client = &ctx.client;
    let user = use_entry(
      client.cache(),
      keys::user(id),
      client.user_loader(),
      EntryOptions::default(),
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

    Self {
      id,
      name,
      user,
      form: user_form(),
      update,
      message: None,
    }
  }

  fn render_details(&self, frame: &mut Frame, area: Rect, user: &User) {
    let label = Style::default().fg(Color::DarkGray);
    let lines = vec![
      Line::from(vec![
        Span::styled("Name:  ", label),
        Span::styled(user.name.clone(), Style::default().bold()),
      ]),
      Line::from(vec![
        Span::styled("Email: ", label),
        Span::raw(user.email.clone()),
      ]),
      Line::from(vec![
        Span::styled("Role:  ", label),
        Span::styled(user.role.clone(), Style::default().fg(role_color(&user.role))),
      ]),
    ];
    let block = data_block(format!("User #{}", self.id), self.user.status());
    frame.render_widget(Paragraph::new(lines).block(block), area);
  }
}

impl View for UserDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match self.form.handle_key(key) {
      KeyResult::Event(FormEvent::Submitted { id: Some(id), value }) => {
        self.update.mutate((id, value));
        return ViewAction::None;
      }
      KeyResult::NotHandled => {}
      _ => return ViewAction::None,
    }

    match key.code {
      KeyCode::Char('e') => {
        if let Some(user) = self.user.data() {
          let values = user_values(user);
          self.message = None;
          self.form.open(Some(self.id), values);
        }
      }
      KeyCode::Char('r') => self.user.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    match self.user.data() {
      Some(user) => self.render_details(frame, area, user),
      None => {
        let block = Block::default()
          .title(format!(" {} ", self.name))
          .borders(Borders::ALL);
        draw_placeholder(
          frame,
          area,
          block,
          self.user.is_loading(),
          self.user.error(),
          "user",
        );
      }
    }
    self.form.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    self.name.clone()
  }

  fn tick(&mut self) {
    self.user.poll();
    if self.update.poll() {
      self.message = Some(match (self.update.error(), self.update.result()) {
        (Some(err), _) => format!("Could not save: {}", error_message(err)),
        (None, Some(user)) => {
          self.name = user.name.clone();
          "User updated".to_string()
        }
        (None, None) => String::new(),
      });
    }
  }

  fn captures_input(&self) -> bool {
    self.form.is_active()
  }

  fn status(&self) -> Option<String> {
    if self.update.is_pending() {
      return Some("Saving...".to_string());
    }
    self.message.clone().filter(|m| !m.is_empty())
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("e", "edit").with_priority(20),
      ShortcutInfo::new("r", "refetch").with_priority(30),
      ShortcutInfo::new("q", "back").with_priority(90),
    ]
  }
}
