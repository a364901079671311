use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{Car, CarDraft};
use querydeck::api::{keys, DataClient};
use querydeck::pagination::{page_numbers, PaginationState};
use querydeck::query::{use_entry, use_mutation, EntryBinding, EntryOptions, MutationBinding};
use ratatui::prelude::*;
use ratatui::widgets::{Row, Table, TableState};

use crate::ui::components::{car_form, car_values, Confirm, Form, FormEvent, KeyResult};
use crate::ui::renderfns::{draw_pager, error_message, format_price};
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::{data_block, draw_placeholder, ensure_valid_selection};

/// Cars manager: the whole list is cached under one key and paged locally.
pub struct CarsView {
  ctx: ViewContext,
  cars: EntryBinding<Vec<Car>>,
  page: usize,
  table_state: TableState,
  form: Form<CarDraft>,
  confirm: Confirm<u64>,
  create: MutationBinding<CarDraft, Car>,
  update: MutationBinding<(u64, CarDraft), Car>,
  delete: MutationBinding<u64, u64>,
  message: Option<String>,
}

impl CarsView {
  pub fn new(ctx: ViewContext) -> Self {
    let client = &ctx.client;
    let cars = use_entry(
      client.cache(),
      keys::cars(),
      client.cars_loader(),
      EntryOptions::default(),
    );

    let api = client.backend().clone();
    let create = use_mutation(
      client.executor(),
      move |draft: CarDraft| {
        let api = api.clone();
        async move { api.create_car(draft).await }
      },
      |_| DataClient::create_car_options(),
    );
    let api = client.backend().clone();
    let update = use_mutation(
      client.executor(),
      move |(id, draft): (u64, CarDraft)| {
        let api = api.clone();
        async move { api.update_car(id, draft).await }
      },
      |_| DataClient::update_car_options(),
    );
    let api = client.backend().clone();
    let delete = use_mutation(
      client.executor(),
      move |id: u64| {
        let api = api.clone();
        async move { api.delete_car(id).await }
      },
      |id| DataClient::delete_car_options(*id),
    );

    Self {
      ctx,
      cars,
      page: 1,
      table_state: TableState::default(),
      form: car_form(),
      confirm: Confirm::new(),
      create,
      update,
      delete,
      message: None,
    }
  }

  fn all_cars(&self) -> &[Car] {
    self.cars.data().map(Vec::as_slice).unwrap_or(&[])
  }

  fn pagination(&self) -> PaginationState {
    PaginationState::derive(self.all_cars().len(), self.ctx.page_size, self.page)
  }

  fn page_cars(&self) -> &[Car] {
    self.pagination().window().slice(self.all_cars())
  }

  fn selected_car(&self) -> Option<&Car> {
    self
      .table_state
      .selected()
      .and_then(|i| self.page_cars().get(i))
  }

  fn go_to_page(&mut self, page: usize) {
    let clamped = PaginationState::derive(self.all_cars().len(), self.ctx.page_size, page).page;
    if clamped != self.page {
      self.page = clamped;
      self.table_state.select(Some(0));
    }
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

    match self.confirm.handle_key(key) {
      KeyResult::Event(id) => {
        self.delete.mutate(id);
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
      KeyCode::Char('l') | KeyCode::Right => self.go_to_page(self.page + 1),
      KeyCode::Char('h') | KeyCode::Left => self.go_to_page(self.page.saturating_sub(1)),
      KeyCode::Char('g') | KeyCode::Home => self.go_to_page(1),
      KeyCode::Char('G') | KeyCode::End => self.go_to_page(usize::MAX),
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
      KeyCode::Char('e') | KeyCode::Enter => {
        if let Some(car) = self.selected_car() {
          let values = car_values(car);
          let id = car.id;
          self.message = None;
          self.form.open(Some(id), values);
        }
      }
      KeyCode::Char('d') | KeyCode::Delete => {
        if let Some(car) = self.selected_car() {
          let question = format!("Delete {} {} ({})?", car.make, car.model, car.year);
          let id = car.id;
          self.confirm.ask(question, id);
        }
      }
      KeyCode::Char('r') => self.cars.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return Some(ViewAction::Pop),
      _ => return None,
    }
    Some(ViewAction::None)
  }

  fn poll_mutations(&mut self) {
    if self.create.poll() {
      if let Some(err) = self.create.error() {
        self.message = Some(format!("Could not add car: {}", error_message(err)));
      } else if let Some(car) = self.create.result() {
        self.message = Some(format!("Added {} {}", car.make, car.model));
        // New cars go to the front of the list
        self.go_to_page(1);
        self.table_state.select(Some(0));
      }
    }
    if self.update.poll() {
      self.message = Some(match (self.update.error(), self.update.result()) {
        (Some(err), _) => format!("Could not save car: {}", error_message(err)),
        (None, Some(car)) => format!("Saved car #{}", car.id),
        (None, None) => String::new(),
      });
    }
    if self.delete.poll() {
      self.message = Some(match (self.delete.error(), self.delete.result()) {
        (Some(err), _) => format!("Delete failed, car restored: {}", error_message(err)),
        (None, Some(id)) => format!("Deleted car #{id}"),
        (None, None) => String::new(),
      });
    }
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    let state = self.pagination();
    self.page = state.page;
    let rows_len = self.page_cars().len();
    ensure_valid_selection(&mut self.table_state, rows_len);

    let title = format!("Cars ({})", self.all_cars().len());
    let block = data_block(title, self.cars.status());

    if rows_len == 0 {
      draw_placeholder(
        frame,
        area,
        block,
        self.cars.is_loading(),
        self.cars.error(),
        "cars",
      );
      return;
    }

    let rows: Vec<Row> = self
      .page_cars()
      .iter()
      .map(|car| {
        Row::new(vec![
          Span::styled(car.id.to_string(), Style::default().fg(Color::Cyan)),
          Span::raw(car.make.clone()),
          Span::raw(car.model.clone()),
          Span::raw(car.year.to_string()),
          Span::styled(format_price(car.price), Style::default().fg(Color::Green)),
        ])
      })
      .collect();

    let table = Table::new(
      rows,
      [
        Constraint::Length(6),
        Constraint::Percentage(30),
        Constraint::Percentage(30),
        Constraint::Length(6),
        Constraint::Length(14),
      ],
    )
    .header(Row::new(["ID", "Make", "Model", "Year", "Price"]).style(Style::default().bold()))
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }
}

impl View for CarsView {
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

    let state = self.pagination();
    let pages = page_numbers(
      state.total,
      state.limit,
      state.page,
      self.ctx.max_visible_pages,
    );
    draw_pager(frame, pager, &state, &pages);

    self.form.render_overlay(frame, area);
    self.confirm.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Cars".to_string()
  }

  fn tick(&mut self) {
    self.cars.poll();
    self.poll_mutations();
  }

  fn captures_input(&self) -> bool {
    self.form.is_active() || self.confirm.is_active()
  }

  fn status(&self) -> Option<String> {
    if self.create.is_pending() || self.update.is_pending() {
      return Some("Saving...".to_string());
    }
    self.message.clone().filter(|m| !m.is_empty())
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("a", "add").with_priority(20),
      ShortcutInfo::new("e", "edit").with_priority(21),
      ShortcutInfo::new("d", "delete").with_priority(22),
      ShortcutInfo::new("h/l", "page").with_priority(30),
      ShortcutInfo::new("r", "refetch").with_priority(40),
    ]
  }
}
