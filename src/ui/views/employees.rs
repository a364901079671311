use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{
  Employee, EmployeeDraft, EmployeePage, EmployeeQuery, EmployeeStatus, SortField, SortOrder,
  DEPARTMENTS,
};
use querydeck::api::{keys, DataClient};
use querydeck::pagination::{page_numbers, PaginationState};
use querydeck::query::{use_entry, use_mutation, EntryBinding, EntryOptions, MutationBinding};
use ratatui::prelude::*;
use ratatui::widgets::{Row, Table, TableState};
use std::collections::BTreeSet;

use crate::ui::components::{
  employee_form, Confirm, Form, FormEvent, KeyResult, Picker, PickerEvent, SearchEvent, SearchInput,
};
use crate::ui::renderfns::{draw_pager, error_message, format_price};
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::views::EmployeeDetailView;
use crate::ui::{data_block, draw_placeholder, ensure_valid_selection};

const SORT_COLUMNS: [(SortField, &str); 4] = [
  (SortField::Id, "ID"),
  (SortField::Name, "Name"),
  (SortField::Department, "Department"),
  (SortField::Salary, "Salary"),
];

fn department_color(department: &str) -> Color {
  match department {
    "IT" => Color::Blue,
    "HR" => Color::Magenta,
    "Sales" => Color::Green,
    "Finance" => Color::Yellow,
    _ => Color::Gray,
  }
}

enum PendingDelete {
  One(u64),
  Many(Vec<u64>),
}

/// Team directory. Every filter, sort and page combination is its own
/// cache entry under the `employees` prefix.
pub struct EmployeesView {
  ctx: ViewContext,
  query: EmployeeQuery,
  list: EntryBinding<EmployeePage>,
  table_state: TableState,
  search: SearchInput,
  departments: Picker,
  form: Form<EmployeeDraft>,
  confirm: Confirm<PendingDelete>,
  /// Checked rows, kept across pages
  selected: BTreeSet<u64>,
  create: MutationBinding<EmployeeDraft, Employee>,
  delete: MutationBinding<u64, Employee>,
  bulk_delete: MutationBinding<Vec<u64>, usize>,
  message: Option<String>,
}

impl EmployeesView {
  pub fn new(ctx: ViewContext) -> Self {
    let client = &ctx.client;
    let query = EmployeeQuery::default();
    let list = use_entry(
      client.cache(),
      keys::employee_list(&query),
      client.employees_loader(),
      EntryOptions::default().keep_previous_data(),
    );

    let api = client.backend().clone();
    let create = use_mutation(
      client.executor(),
      move |draft: EmployeeDraft| {
        let api = api.clone();
        async move { api.create_employee(draft).await }
      },
      |_| DataClient::create_employee_options(),
    );
    let api = client.backend().clone();
    let delete = use_mutation(
      client.executor(),
      move |id: u64| {
        let api = api.clone();
        async move { api.delete_employee(id).await }
      },
      |id| DataClient::delete_employee_options(*id),
    );
    let api = client.backend().clone();
    let bulk_delete = use_mutation(
      client.executor(),
      move |ids: Vec<u64>| {
        let api = api.clone();
        async move { api.bulk_delete_employees(&ids).await }
      },
      |_| DataClient::bulk_delete_options(),
    );

    Self {
      ctx,
      query,
      list,
      table_state: TableState::default(),
      search: SearchInput::new(),
      departments: Picker::new(),
      form: employee_form(),
      confirm: Confirm::new(),
      selected: BTreeSet::new(),
      create,
      delete,
      bulk_delete,
      message: None,
    }
  }

  fn employees(&self) -> &[Employee] {
    self
      .list
      .data()
      .map(|page| page.employees.as_slice())
      .unwrap_or(&[])
  }

  fn pagination(&self) -> PaginationState {
    let total = self.list.data().map(|page| page.total).unwrap_or(0);
    PaginationState::derive(total, self.query.limit, self.query.page)
  }

  fn current(&self) -> Option<&Employee> {
    self
      .table_state
      .selected()
      .and_then(|i| self.employees().get(i))
  }

  /// Point the binding at a new query; same query is a no-op.
  fn apply(&mut self, query: EmployeeQuery) {
    if query != self.query {
      self.query = query;
      self.list.set_key(keys::employee_list(&self.query));
      self.table_state.select(Some(0));
    }
  }

  /// Filters changed: start over from the first page.
  fn filter(&mut self, update: impl FnOnce(&mut EmployeeQuery)) {
    let mut query = self.query.clone();
    update(&mut query);
    query.page = 1;
    self.apply(query);
  }

  fn go_to_page(&mut self, page: usize) {
    let state = self.pagination();
    let page = PaginationState::derive(state.total, state.limit, page).page;
    let query = EmployeeQuery {
      page,
      ..self.query.clone()
    };
    self.apply(query);
  }

  fn sort_by(&mut self, field: SortField) {
    self.filter(|q| {
      if q.sort_by == field {
        q.sort_order = q.sort_order.toggle();
      } else {
        q.sort_by = field;
        q.sort_order = Default::default();
      }
    });
  }

  fn handle_overlays(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match self.search.handle_key(key) {
      KeyResult::Event(SearchEvent::Submitted(search)) | KeyResult::Event(SearchEvent::Changed(search)) => {
        self.filter(|q| q.search = search);
        return Some(ViewAction::None);
      }
      KeyResult::Handled => return Some(ViewAction::None),
      KeyResult::NotHandled => {}
    }

    match self.departments.handle_key(key) {
      KeyResult::Event(PickerEvent::Selected(index)) => {
        let department = index
          .checked_sub(1)
          .and_then(|i| DEPARTMENTS.get(i))
          .map(|d| d.to_string())
          .unwrap_or_default();
        self.filter(|q| q.department = department);
        return Some(ViewAction::None);
      }
      KeyResult::NotHandled => {}
      _ => return Some(ViewAction::None),
    }

    match self.form.handle_key(key) {
      KeyResult::Event(FormEvent::Submitted { value, .. }) => {
        self.create.mutate(value);
        return Some(ViewAction::None);
      }
      KeyResult::NotHandled => {}
      _ => return Some(ViewAction::None),
    }

    match self.confirm.handle_key(key) {
      KeyResult::Event(PendingDelete::One(id)) => self.delete.mutate(id),
      KeyResult::Event(PendingDelete::Many(ids)) => self.bulk_delete.mutate(ids),
      KeyResult::Handled => {}
      KeyResult::NotHandled => return None,
    }
    Some(ViewAction::None)
  }

  fn handle_navigation(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.table_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.table_state.select_previous(),
      KeyCode::Char('l') | KeyCode::Right => self.go_to_page(self.query.page + 1),
      KeyCode::Char('h') | KeyCode::Left => self.go_to_page(self.query.page.saturating_sub(1)),
      KeyCode::Char(c @ '1'..='4') => {
        let column = c as usize - '1' as usize;
        self.sort_by(SORT_COLUMNS[column].0);
      }
      KeyCode::Char('s') => self.sort_by(self.query.sort_by.next()),
      _ => return None,
    }
    Some(ViewAction::None)
  }

  fn handle_actions(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('f') => {
        let options = std::iter::once("All departments".to_string())
          .chain(DEPARTMENTS.iter().map(|d| d.to_string()))
          .collect();
        let current = DEPARTMENTS
          .iter()
          .position(|d| *d == self.query.department)
          .map_or(0, |i| i + 1);
        self.departments.show("Department", options, current);
      }
      KeyCode::Char(' ') => {
        if let Some(id) = self.current().map(|e| e.id) {
          if !self.selected.remove(&id) {
            self.selected.insert(id);
          }
          self.table_state.select_next();
        }
      }
      KeyCode::Char('A') => {
        let ids: Vec<u64> = self.employees().iter().map(|e| e.id).collect();
        if ids.iter().all(|id| self.selected.contains(id)) {
          self.selected.retain(|id| !ids.contains(id));
        } else {
          self.selected.extend(ids);
        }
      }
      KeyCode::Char('a') => self.form.open_add(),
      KeyCode::Char('d') => {
        if let Some(employee) = self.current() {
          let question = format!("Delete {}?", employee.name);
          let id = employee.id;
          self.confirm.ask(question, PendingDelete::One(id));
        }
      }
      KeyCode::Char('D') => {
        if self.selected.is_empty() {
          self.message = Some("Please select employees to delete".to_string());
        } else {
          let ids: Vec<u64> = self.selected.iter().copied().collect();
          let question = format!("Delete {} selected employees?", ids.len());
          self.confirm.ask(question, PendingDelete::Many(ids));
        }
      }
      KeyCode::Char('r') => self.list.refetch(),
      KeyCode::Enter => {
        let employee = self.current()?;
        return Some(ViewAction::Push(Box::new(EmployeeDetailView::new(
          self.ctx.clone(),
          employee.id,
          employee.name.clone(),
        ))));
      }
      KeyCode::Char('q') | KeyCode::Esc => return Some(ViewAction::Pop),
      _ => return None,
    }
    Some(ViewAction::None)
  }

  fn poll_mutations(&mut self) {
    if self.create.poll() {
      self.message = Some(match (self.create.error(), self.create.result()) {
        (Some(err), _) => format!("Could not add employee: {}", error_message(err)),
        (None, Some(employee)) => format!("Added {}", employee.name),
        (None, None) => String::new(),
      });
    }
    if self.delete.poll() {
      self.message = Some(match (self.delete.error(), self.delete.result()) {
        (Some(err), _) => format!("Delete failed: {}", error_message(err)),
        (None, Some(employee)) => {
          self.selected.remove(&employee.id);
          "Employee deleted successfully!".to_string()
        }
        (None, None) => String::new(),
      });
    }
    if self.bulk_delete.poll() {
      self.message = Some(match (self.bulk_delete.error(), self.bulk_delete.result()) {
        (Some(err), _) => format!("Bulk delete failed: {}", error_message(err)),
        (None, Some(count)) => {
          self.selected.clear();
          format!("Deleted {count} selected employees")
        }
        (None, None) => String::new(),
      });
    }
  }

  fn filter_line(&self) -> Line<'static> {
    let dim = Style::default().fg(Color::DarkGray);
    let value = Style::default().fg(Color::Yellow);
    let search = if self.query.search.is_empty() {
      "-".to_string()
    } else {
      format!("\"{}\"", self.query.search)
    };
    let department = if self.query.department.is_empty() {
      "All".to_string()
    } else {
      self.query.department.clone()
    };
    Line::from(vec![
      Span::styled(" search: ", dim),
      Span::styled(search, value),
      Span::styled("  department: ", dim),
      Span::styled(department, value),
      Span::styled("  selected: ", dim),
      Span::styled(self.selected.len().to_string(), value),
    ])
  }

  fn sort_icon(&self, field: SortField) -> &'static str {
    match (self.query.sort_by == field, self.query.sort_order) {
      (false, _) => "⇅",
      (true, SortOrder::Asc) => "↑",
      (true, SortOrder::Desc) => "↓",
    }
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    let len = self.employees().len();
    ensure_valid_selection(&mut self.table_state, len);

    let total = self.pagination().total;
    let mut title = format!("Employees ({total})");
    if self.list.is_previous_data() {
      title.push_str(" · updating");
    }
    let block = data_block(title, self.list.status());

    if len == 0 {
      draw_placeholder(
        frame,
        area,
        block,
        self.list.is_loading(),
        self.list.error(),
        "employees",
      );
      return;
    }

    let rows: Vec<Row> = self
      .employees()
      .iter()
      .map(|e| {
        let check = if self.selected.contains(&e.id) { "[x]" } else { "[ ]" };
        let status_color = match e.status {
          EmployeeStatus::Active => Color::Green,
          EmployeeStatus::Inactive => Color::Red,
        };
        Row::new(vec![
          Span::raw(check),
          Span::styled(e.id.to_string(), Style::default().fg(Color::Cyan)),
          Span::raw(e.name.clone()),
          Span::styled(e.department.clone(), Style::default().fg(department_color(&e.department))),
          Span::raw(format_price(e.salary)),
          Span::raw(e.email.clone()),
          Span::styled(format!("{:?}", e.status), Style::default().fg(status_color)),
        ])
      })
      .collect();

    let mut header = vec!["".to_string()];
    header.extend(
      SORT_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, (field, label))| format!("{}:{label} {}", i + 1, self.sort_icon(*field))),
    );
    header.extend(["Email".to_string(), "Status".to_string()]);

    let table = Table::new(
      rows,
      [
        Constraint::Length(3),
        Constraint::Length(8),
        Constraint::Percentage(22),
        Constraint::Length(15),
        Constraint::Length(14),
        Constraint::Percentage(30),
        Constraint::Length(8),
      ],
    )
    .header(Row::new(header).style(Style::default().bold()))
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }
}

impl View for EmployeesView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    self
      .handle_overlays(key)
      .or_else(|| self.handle_navigation(key))
      .or_else(|| self.handle_actions(key))
      .unwrap_or(ViewAction::None)
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let [filters, list, pager] = Layout::vertical([
      Constraint::Length(1),
      Constraint::Min(3),
      Constraint::Length(1),
    ])
    .areas(area);

    frame.render_widget(self.filter_line(), filters);
    self.render_table(frame, list);

    let state = self.pagination();
    let pages = page_numbers(
      state.total,
      state.limit,
      state.page,
      self.ctx.max_visible_pages,
    );
    draw_pager(frame, pager, &state, &pages);

    self.search.render_overlay(frame, area);
    self.departments.render_overlay(frame, area);
    self.form.render_overlay(frame, area);
    self.confirm.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Employees".to_string()
  }

  fn tick(&mut self) {
    self.list.poll();
    self.poll_mutations();
  }

  fn captures_input(&self) -> bool {
    self.search.is_active()
      || self.departments.is_active()
      || self.form.is_active()
      || self.confirm.is_active()
  }

  fn status(&self) -> Option<String> {
    if self.delete.is_pending() || self.bulk_delete.is_pending() {
      return Some("Deleting...".to_string());
    }
    if self.create.is_pending() {
      return Some("Saving...".to_string());
    }
    self.message.clone().filter(|m| !m.is_empty())
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("/", "search").with_priority(15),
      ShortcutInfo::new("f", "department").with_priority(16),
      ShortcutInfo::new("1-4", "sort").with_priority(17),
      ShortcutInfo::new("space", "select").with_priority(20),
      ShortcutInfo::new("a", "add").with_priority(21),
      ShortcutInfo::new("d/D", "delete").with_priority(22),
      ShortcutInfo::new("h/l", "page").with_priority(30),
    ]
  }
}
