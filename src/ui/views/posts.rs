use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::keys;
use querydeck::api::types::Post;
use querydeck::pagination::{page_numbers, PaginationState};
use querydeck::query::{use_entry, EntryBinding, EntryOptions};
use ratatui::prelude::*;
use ratatui::widgets::{Row, Table, TableState};

use crate::ui::renderfns::{draw_pager, truncate};
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::views::PostDetailView;
use crate::ui::{data_block, draw_placeholder, ensure_valid_selection};

const POSTS_PER_PAGE: usize = 6;

/// Posts from the remote JSON API, paged locally.
pub struct PostsView {
  ctx: ViewContext,
  posts: EntryBinding<Vec<Post>>,
  page: usize,
  table_state: TableState,
}

impl PostsView {
  pub fn new(ctx: ViewContext) -> Self {
    let client = &ctx.client;
    let posts = use_entry(
      client.cache(),
      keys::posts(),
      client.posts_loader(),
      EntryOptions::default(),
    );
    Self {
      ctx,
      posts,
      page: 1,
      table_state: TableState::default(),
    }
  }

  fn all_posts(&self) -> &[Post] {
    self.posts.data().map(Vec::as_slice).unwrap_or(&[])
  }

  fn pagination(&self) -> PaginationState {
    PaginationState::derive(self.all_posts().len(), POSTS_PER_PAGE, self.page)
  }

  fn page_posts(&self) -> &[Post] {
    self.pagination().window().slice(self.all_posts())
  }

  fn go_to_page(&mut self, page: usize) {
    let clamped = PaginationState::derive(self.all_posts().len(), POSTS_PER_PAGE, page).page;
    if clamped != self.page {
      self.page = clamped;
      self.table_state.select(Some(0));
    }
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    self.page = self.pagination().page;
    let rows_len = self.page_posts().len();
    ensure_valid_selection(&mut self.table_state, rows_len);

    let block = data_block(format!("Posts ({})", self.all_posts().len()), self.posts.status());
    if rows_len == 0 {
      draw_placeholder(
        frame,
        area,
        block,
        self.posts.is_loading(),
        self.posts.error(),
        "posts",
      );
      return;
    }

    let title_width = area.width.saturating_sub(20) as usize;
    let rows: Vec<Row> = self
      .page_posts()
      .iter()
      .map(|post| {
        Row::new(vec![
          Span::styled(post.id.to_string(), Style::default().fg(Color::Cyan)),
          Span::raw(truncate(&post.title, title_width)),
          Span::styled(post.user_id.to_string(), Style::default().fg(Color::DarkGray)),
        ])
      })
      .collect();

    let table = Table::new(
      rows,
      [Constraint::Length(5), Constraint::Min(10), Constraint::Length(6)],
    )
    .header(Row::new(["ID", "Title", "User"]).style(Style::default().bold()))
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }
}

impl View for PostsView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.table_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.table_state.select_previous(),
      KeyCode::Char('l') | KeyCode::Right => self.go_to_page(self.page + 1),
      KeyCode::Char('h') | KeyCode::Left => self.go_to_page(self.page.saturating_sub(1)),
      KeyCode::Char('g') | KeyCode::Home => self.go_to_page(1),
      KeyCode::Char('G') | KeyCode::End => self.go_to_page(usize::MAX),
      KeyCode::Enter => {
        let selected = self
          .table_state
          .selected()
          .and_then(|i| self.page_posts().get(i));
        if let Some(post) = selected {
          let view = PostDetailView::new(self.ctx.clone(), post.id, post.title.clone());
          return ViewAction::Push(Box::new(view));
        }
      }
      KeyCode::Char('r') => self.posts.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let [list, pager] = Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(area);
    self.render_table(frame, list);

    let state = self.pagination();
    let pages = page_numbers(
      state.total,
      state.limit,
      state.page,
      self.ctx.max_visible_pages,
    );
    draw_pager(frame, pager, &state, &pages);
  }

  fn breadcrumb_label(&self) -> String {
    "Posts".to_string()
  }

  fn tick(&mut self) {
    self.posts.poll();
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("enter", "open").with_priority(20),
      ShortcutInfo::new("h/l", "page").with_priority(30),
      ShortcutInfo::new("r", "refetch").with_priority(40),
    ]
  }
}
