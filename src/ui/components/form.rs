use super::input::{InputResult, TextInput};
use super::KeyResult;
use crate::ui::renderfns::{centered, error_message};
use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{Car, CarDraft, Employee, EmployeeDraft, User, UserDraft};
use querydeck::QueryError;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Turns the raw field values into a checked value
pub type Parser<T> = fn(&[&str]) -> Result<T, QueryError>;

/// Events emitted by the form that parent needs to handle
#[derive(Debug, Clone, PartialEq)]
pub enum FormEvent<T> {
  /// Parsed and validated; `id` is set when editing an existing record
  Submitted { id: Option<u64>, value: T },
  Cancelled,
}

/// Add/edit overlay over a few text fields. Tab moves between fields,
/// Enter on the last one submits. Invalid input keeps the form open with
/// the message shown under the fields.
#[derive(Debug, Clone)]
pub struct Form<T> {
  noun: &'static str,
  labels: &'static [&'static str],
  parse: Parser<T>,
  active: bool,
  editing: Option<u64>,
  fields: Vec<TextInput>,
  focus: usize,
  error: Option<String>,
}

impl<T> Form<T> {
  pub fn new(noun: &'static str, labels: &'static [&'static str], parse: Parser<T>) -> Self {
    Self {
      noun,
      labels,
      parse,
      active: false,
      editing: None,
      fields: Vec::new(),
      focus: 0,
      error: None,
    }
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn open_add(&mut self) {
    self.open(None, Vec::new());
  }

  /// Open prefilled with `values`, one per label.
  pub fn open(&mut self, id: Option<u64>, values: Vec<String>) {
    let mut values = values.into_iter();
    self.fields = self
      .labels
      .iter()
      .map(|_| TextInput::with_value(values.next().unwrap_or_default()))
      .collect();
    self.active = true;
    self.editing = id;
    self.focus = 0;
    self.error = None;
  }

  pub fn value(&self) -> Result<T, QueryError> {
    let raw: Vec<&str> = self.fields.iter().map(|f| f.value().trim()).collect();
    (self.parse)(&raw)
  }

  fn close(&mut self) {
    self.active = false;
    self.error = None;
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<FormEvent<T>> {
    if !self.active {
      return KeyResult::NotHandled;
    }

    let count = self.fields.len();
    match key.code {
      KeyCode::Tab | KeyCode::Down => {
        self.focus = (self.focus + 1) % count;
        return KeyResult::Handled;
      }
      KeyCode::BackTab | KeyCode::Up => {
        self.focus = (self.focus + count - 1) % count;
        return KeyResult::Handled;
      }
      _ => {}
    }

    match self.fields[self.focus].handle_key(key) {
      InputResult::Cancelled => {
        self.close();
        KeyResult::Event(FormEvent::Cancelled)
      }
      InputResult::Submitted(_) if self.focus + 1 < count => {
        self.focus += 1;
        KeyResult::Handled
      }
      InputResult::Submitted(_) => match self.value() {
        Ok(value) => {
          let id = self.editing;
          self.close();
          KeyResult::Event(FormEvent::Submitted { id, value })
        }
        Err(err) => {
          self.error = Some(error_message(&err));
          KeyResult::Handled
        }
      },
      InputResult::Consumed => {
        self.error = None;
        KeyResult::Handled
      }
      InputResult::NotHandled => KeyResult::Handled,
    }
  }

  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let overlay_area = centered(area, 56, self.fields.len() as u16 + 5);
    frame.render_widget(Clear, overlay_area);

    let title = match self.editing {
      Some(id) => format!(" Edit {} #{id} ", self.noun),
      None => format!(" Add new {} ", self.noun),
    };
    let width = self.labels.iter().map(|l| l.len()).max().unwrap_or(0);
    let mut lines: Vec<Line> = self
      .labels
      .iter()
      .zip(&self.fields)
      .enumerate()
      .map(|(i, (label, field))| {
        let focused = i == self.focus;
        let label_style = if focused {
          Style::default().fg(Color::Yellow).bold()
        } else {
          Style::default().fg(Color::DarkGray)
        };
        let mut spans = vec![Span::styled(format!("{label:>width$}: "), label_style)];
        if focused {
          spans.extend(field.spans(Style::default()));
        } else {
          spans.push(Span::raw(field.value().to_string()));
        }
        Line::from(spans)
      })
      .collect();

    lines.push(Line::default());
    lines.push(match &self.error {
      Some(error) => Line::styled(error.clone(), Style::default().fg(Color::Red)),
      None => Line::styled(
        "Tab next field, Enter save, Esc cancel",
        Style::default().fg(Color::DarkGray),
      ),
    });

    let paragraph = Paragraph::new(lines).block(
      Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green))
        .title(title),
    );
    frame.render_widget(paragraph, overlay_area);
  }
}

fn number<N: std::str::FromStr>(raw: &str, field: &str) -> Result<N, QueryError> {
  raw
    .parse()
    .map_err(|_| QueryError::Validation(format!("{field} must be a number")))
}

fn parse_car(raw: &[&str]) -> Result<CarDraft, QueryError> {
  let draft = CarDraft {
    make: raw[0].to_string(),
    model: raw[1].to_string(),
    year: number(raw[2], "Year")?,
    price: number(raw[3], "Price")?,
  };
  draft.validate()?;
  Ok(draft)
}

pub fn car_form() -> Form<CarDraft> {
  Form::new("car", &["Make", "Model", "Year", "Price"], parse_car)
}

pub fn car_values(car: &Car) -> Vec<String> {
  vec![
    car.make.clone(),
    car.model.clone(),
    car.year.to_string(),
    car.price.to_string(),
  ]
}

fn parse_employee(raw: &[&str]) -> Result<EmployeeDraft, QueryError> {
  let draft = EmployeeDraft {
    name: raw[0].to_string(),
    email: raw[1].to_string(),
    department: raw[2].to_string(),
    // Blank salary falls through to the "fill all fields" check
    salary: if raw[3].is_empty() {
      0.0
    } else {
      number(raw[3], "Salary")?
    },
  };
  draft.validate()?;
  Ok(draft)
}

pub fn employee_form() -> Form<EmployeeDraft> {
  Form::new(
    "employee",
    &["Name", "Email", "Department", "Salary"],
    parse_employee,
  )
}

pub fn employee_values(employee: &Employee) -> Vec<String> {
  vec![
    employee.name.clone(),
    employee.email.clone(),
    employee.department.clone(),
    employee.salary.to_string(),
  ]
}

fn parse_user(raw: &[&str]) -> Result<UserDraft, QueryError> {
  let draft = UserDraft {
    name: raw[0].to_string(),
    email: raw[1].to_string(),
    // New users default to the first role
    role: if raw[2].is_empty() {
      "Developer".to_string()
    } else {
      raw[2].to_string()
    },
  };
  draft.validate()?;
  Ok(draft)
}

pub fn user_form() -> Form<UserDraft> {
  Form::new("user", &["Name", "Email", "Role"], parse_user)
}

pub fn user_values(user: &User) -> Vec<String> {
  vec![user.name.clone(), user.email.clone(), user.role.clone()]
}
