use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::keys;
use querydeck::api::types::Post;
use querydeck::query::{use_entry, EntryBinding, EntryOptions};
use ratatui::prelude::*;
use ratatui::widgets::{Paragraph, Wrap};

use crate::ui::renderfns::truncate;
use crate::ui::view::{View, ViewAction, ViewContext};
use crate::ui::{data_block, draw_placeholder};

pub struct PostDetailView {
  id: u64,
  title: String,
  post: EntryBinding<Post>,
  scroll: u16,
}

impl PostDetailView {
  pub fn new(ctx: ViewContext, id: u64, title: String) -> Self {
    let client = &ctx.client;
    let post = use_entry(
      client.cache(),
      keys::post(id),
      client.post_loader(),
      EntryOptions::default(),
    );
    Self {
      id,
      title,
      post,
      scroll: 0,
    }
  }
}

impl View for PostDetailView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.scroll = self.scroll.saturating_add(1),
      KeyCode::Char('k') | KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
      KeyCode::Char('r') => self.post.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let block = data_block(format!("Post #{}", self.id), self.post.status());
    let Some(post) = self.post.data() else {
      draw_placeholder(
        frame,
        area,
        block,
        self.post.is_loading(),
        self.post.error(),
        "post",
      );
      return;
    };

    let mut lines = vec![
      Line::from(Span::styled(post.title.clone(), Style::default().fg(Color::Cyan).bold())),
      Line::from(Span::styled(
        format!("by user {}", post.user_id),
        Style::default().fg(Color::DarkGray),
      )),
      Line::default(),
    ];
    lines.extend(post.body.lines().map(|l| Line::from(l.to_string())));

    let paragraph = Paragraph::new(lines)
      .block(block)
      .wrap(Wrap { trim: false })
      .scroll((self.scroll, 0));
    frame.render_widget(paragraph, area);
  }

  fn breadcrumb_label(&self) -> String {
    truncate(&self.title, 30)
  }

  fn tick(&mut self) {
    self.post.poll();
  }
}
