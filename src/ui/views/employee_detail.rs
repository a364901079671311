use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{Employee, EmployeeDraft, EmployeeStatus};
use querydeck::api::{keys, DataClient};
use querydeck::query::{use_entry, use_mutation, EntryBinding, EntryOptions, MutationBinding};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::ui::components::{employee_form, employee_values, Form, FormEvent, KeyResult};
use crate::ui::renderfns::{error_message, format_price};
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::{data_block, draw_placeholder};

/// One employee, loaded under its own key and editable in place.
pub struct EmployeeDetailView {
  id: u64,
  name: String,
  employee: EntryBinding<Employee>,
  form: Form<EmployeeDraft>,
  update: MutationBinding<(u64, EmployeeDraft), Employee>,
  message: Option<String>,
}

impl EmployeeDetailView {
  pub fn new(ctx: ViewContext, id: u64, name: String) -> Self {
    let client = &ctx.client;
    let employee = use_entry(
      client.cache(),
      keys::employee(id),
      client.employee_loader(),
      EntryOptions::default(),
    );

    let api = client.backend().clone();
    let update = use_mutation(
      client.executor(),
      move |(id, draft): (u64, EmployeeDraft)| {
        let api = api.clone();
        async move { api.update_employee(id, draft).await }
      },
      |(id, _)| DataClient::update_employee_options(*id),
    );

    Self {
      id,
      name,
      employee,
      form: employee_form(),
      update,
      message: None,
    }
  }

  fn render_details(&self, frame: &mut Frame, area: Rect, employee: &Employee) {
    let label = Style::default().fg(Color::DarkGray);
    let status = match employee.status {
      EmployeeStatus::Active => Span::styled("Active", Style::default().fg(Color::Green)),
      EmployeeStatus::Inactive => Span::styled("Inactive", Style::default().fg(Color::Red)),
    };
    let lines = vec![
      Line::from(vec![
        Span::styled("Name:       ", label),
        Span::styled(employee.name.clone(), Style::default().bold()),
      ]),
      Line::from(vec![
        Span::styled("Email:      ", label),
        Span::raw(employee.email.clone()),
      ]),
      Line::from(vec![
        Span::styled("Department: ", label),
        Span::raw(employee.department.clone()),
      ]),
      Line::from(vec![
        Span::styled("Salary:     ", label),
        Span::raw(format_price(employee.salary)),
      ]),
      Line::from(vec![Span::styled("Status:     ", label), status]),
    ];
    let block = data_block(format!("Employee #{}", self.id), self.employee.status());
    frame.render_widget(Paragraph::new(lines).block(block), area);
  }
}

impl View for EmployeeDetailView {
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
        if let Some(employee) = self.employee.data() {
          let values = employee_values(employee);
          self.message = None;
          self.form.open(Some(self.id), values);
        }
      }
      KeyCode::Char('r') => self.employee.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return ViewAction::Pop,
      _ => {}
    }
    ViewAction::None
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    match self.employee.data() {
      Some(employee) => self.render_details(frame, area, employee),
      None => {
        let block = Block::default()
          .title(format!(" {} ", self.name))
          .borders(Borders::ALL);
        draw_placeholder(
          frame,
          area,
          block,
          self.employee.is_loading(),
          self.employee.error(),
          "employee",
        );
      }
    }
    self.form.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    self.name.clone()
  }

  fn tick(&mut self) {
    self.employee.poll();
    if self.update.poll() {
      self.message = Some(match (self.update.error(), self.update.result()) {
        (Some(err), _) => format!("Could not save: {}", error_message(err)),
        (None, Some(employee)) => {
          self.name = employee.name.clone();
          "Employee updated".to_string()
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
