//! In-memory backend with simulated latency.
//!
//! Seeded with a few hundred cars, ten employees and five users. Every call
//! sleeps for the configured latency before touching the data, so loads and
//! mutations overlap the way they would against a real server.

use chrono::Utc;
use futures::future::try_join_all;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::types::{
  Car, CarDraft, Employee, EmployeeDraft, EmployeePage, EmployeeQuery, EmployeeStatus, FileSpec,
  SortField, SortOrder, UploadedFile, User, UserDraft, UserPage,
};
use crate::error::QueryError;
use crate::mutation::ProgressReporter;

const MAKES: &[(&str, &[&str])] = &[
  ("Toyota", &["Corolla", "Camry", "RAV4", "Prius"]),
  ("Honda", &["Civic", "Accord", "CR-V"]),
  ("Ford", &["Focus", "Mustang", "F-150", "Escape"]),
  ("BMW", &["320i", "X3", "M5"]),
  ("Hyundai", &["i20", "Creta", "Verna"]),
  ("Tata", &["Nexon", "Harrier", "Punch"]),
  ("Kia", &["Seltos", "Sonet"]),
  ("Volvo", &["XC40", "XC90", "S60"]),
];

const SEED_CARS: u64 = 120;

fn seed_cars() -> Vec<Car> {
  let models: Vec<(&str, &str)> = MAKES
    .iter()
    .flat_map(|(make, models)| models.iter().map(move |model| (*make, *model)))
    .collect();
  (1..=SEED_CARS)
    .map(|id| {
      let (make, model) = models[(id as usize - 1) % models.len()];
      Car {
        id,
        make: make.to_string(),
        model: model.to_string(),
        year: 2000 + (id * 7 % 25) as i32,
        price: 8_000.0 + ((id * 1_337) % 40_000) as f64,
      }
    })
    .collect()
}

fn seed_employees() -> Vec<Employee> {
  let rows: [(&str, &str, &str, f64, EmployeeStatus); 10] = [
    ("Ravi Kumar", "ravi", "IT", 50000.0, EmployeeStatus::Active),
    ("Priya Sharma", "priya", "HR", 45000.0, EmployeeStatus::Active),
    ("Arjun Reddy", "arjun", "Sales", 55000.0, EmployeeStatus::Active),
    ("Sneha Patel", "sneha", "IT", 52000.0, EmployeeStatus::Active),
    ("Karthik Rao", "karthik", "Finance", 48000.0, EmployeeStatus::Inactive),
    ("Meera Shah", "meera", "IT", 60000.0, EmployeeStatus::Active),
    ("Vijay Singh", "vijay", "Sales", 47000.0, EmployeeStatus::Active),
    ("Divya Iyer", "divya", "HR", 46000.0, EmployeeStatus::Active),
    ("Rahul Verma", "rahul", "IT", 58000.0, EmployeeStatus::Active),
    ("Anjali Nair", "anjali", "Finance", 51000.0, EmployeeStatus::Active),
  ];
  rows
    .into_iter()
    .zip(1..)
    .map(|((name, mail, department, salary, status), id)| Employee {
      id,
      name: name.to_string(),
      email: format!("{mail}@company.com"),
      department: department.to_string(),
      salary,
      status,
    })
    .collect()
}

fn seed_users() -> Vec<User> {
  [
    ("Ravi Kumar", "ravi", "Developer"),
    ("Priya Sharma", "priya", "Designer"),
    ("Arjun Reddy", "arjun", "Manager"),
    ("Sneha Patel", "sneha", "Developer"),
    ("Karthik Rao", "karthik", "Tester"),
  ]
  .into_iter()
  .zip(1..)
  .map(|((name, mail, role), id)| User {
    id,
    name: name.to_string(),
    email: format!("{mail}@example.com"),
    role: role.to_string(),
  })
  .collect()
}

struct MockState {
  cars: Vec<Car>,
  employees: Vec<Employee>,
  users: Vec<User>,
  files: Vec<UploadedFile>,
  next_file_id: u64,
  fail_next: Option<QueryError>,
}

/// Seeded data store standing in for a remote API.
#[derive(Clone)]
pub struct MockBackend {
  state: Arc<Mutex<MockState>>,
  latency: Duration,
}

impl MockBackend {
  pub fn new(latency: Duration) -> Self {
    Self {
      state: Arc::new(Mutex::new(MockState {
        cars: seed_cars(),
        employees: seed_employees(),
        users: seed_users(),
        files: Vec::new(),
        next_file_id: 1,
        fail_next: None,
      })),
      latency,
    }
  }

  pub fn latency(&self) -> Duration {
    self.latency
  }

  /// Make the next call fail with `error`.
  pub fn fail_next(&self, error: QueryError) {
    self.state().fail_next = Some(error);
  }

  fn state(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Sleep for `latency`, then lock the data, failing if a failure was armed.
  async fn enter(&self, latency: Duration) -> Result<MutexGuard<'_, MockState>, QueryError> {
    tokio::time::sleep(latency).await;
    let mut state = self.state();
    match state.fail_next.take() {
      Some(err) => Err(err),
      None => Ok(state),
    }
  }

  // Cars

  pub async fn cars(&self) -> Result<Vec<Car>, QueryError> {
    let state = self.enter(self.latency).await?;
    Ok(state.cars.clone())
  }

  pub async fn create_car(&self, draft: CarDraft) -> Result<Car, QueryError> {
    draft.validate()?;
    let mut state = self.enter(self.latency).await?;
    let id = state.cars.iter().map(|c| c.id).max().unwrap_or(0) + 1;
    let car = draft.into_car(id);
    state.cars.insert(0, car.clone());
    debug!(id, "car created");
    Ok(car)
  }

  pub async fn update_car(&self, id: u64, draft: CarDraft) -> Result<Car, QueryError> {
    draft.validate()?;
    let mut state = self.enter(self.latency).await?;
    let car = state
      .cars
      .iter_mut()
      .find(|c| c.id == id)
      .ok_or_else(|| QueryError::NotFound(format!("Car {id} not found")))?;
    *car = draft.into_car(id);
    Ok(car.clone())
  }

  pub async fn delete_car(&self, id: u64) -> Result<u64, QueryError> {
    let mut state = self.enter(self.latency).await?;
    let index = state
      .cars
      .iter()
      .position(|c| c.id == id)
      .ok_or_else(|| QueryError::NotFound(format!("Car {id} not found")))?;
    state.cars.remove(index);
    Ok(id)
  }

  // Employees

  /// Filter, sort and paginate the employee table.
  pub async fn employees(&self, query: &EmployeeQuery) -> Result<EmployeePage, QueryError> {
    let state = self.enter(self.latency).await?;
    Ok(employee_page(&state.employees, query))
  }

  pub async fn employee(&self, id: u64) -> Result<Employee, QueryError> {
    let state = self.enter(self.latency / 2).await?;
    state
      .employees
      .iter()
      .find(|e| e.id == id)
      .cloned()
      .ok_or_else(|| QueryError::NotFound("Employee not found".into()))
  }

  pub async fn create_employee(&self, draft: EmployeeDraft) -> Result<Employee, QueryError> {
    draft.validate()?;
    let mut state = self.enter(self.latency).await?;
    let id = state.employees.iter().map(|e| e.id).max().unwrap_or(0) + 1;
    let employee = Employee {
      id,
      name: draft.name,
      email: draft.email,
      department: draft.department,
      salary: draft.salary,
      status: EmployeeStatus::Active,
    };
    state.employees.push(employee.clone());
    Ok(employee)
  }

  pub async fn update_employee(&self, id: u64, draft: EmployeeDraft) -> Result<Employee, QueryError> {
    draft.validate()?;
    let mut state = self.enter(self.latency).await?;
    let employee = state
      .employees
      .iter_mut()
      .find(|e| e.id == id)
      .ok_or_else(|| QueryError::NotFound("Employee not found".into()))?;
    employee.name = draft.name;
    employee.email = draft.email;
    employee.department = draft.department;
    employee.salary = draft.salary;
    Ok(employee.clone())
  }

  pub async fn delete_employee(&self, id: u64) -> Result<Employee, QueryError> {
    let mut state = self.enter(self.latency).await?;
    let index = state
      .employees
      .iter()
      .position(|e| e.id == id)
      .ok_or_else(|| QueryError::NotFound("Employee not found".into()))?;
    Ok(state.employees.remove(index))
  }

  /// Delete every listed employee; unknown ids are ignored.
  pub async fn bulk_delete_employees(&self, ids: &[u64]) -> Result<usize, QueryError> {
    let mut state = self.enter(self.latency).await?;
    let before = state.employees.len();
    state.employees.retain(|e| !ids.contains(&e.id));
    Ok(before - state.employees.len())
  }

  // Users

  pub async fn users(&self, page: usize, limit: usize) -> Result<UserPage, QueryError> {
    let state = self.enter(self.latency).await?;
    let window = crate::pagination::window_for(page, limit);
    let end = window.offset.saturating_add(window.length);
    Ok(UserPage {
      users: window.slice(&state.users).to_vec(),
      has_more: end < state.users.len(),
      total: state.users.len(),
      page: page.max(1),
    })
  }

  pub async fn user(&self, id: u64) -> Result<User, QueryError> {
    let state = self.enter(self.latency / 2).await?;
    state
      .users
      .iter()
      .find(|u| u.id == id)
      .cloned()
      .ok_or_else(|| QueryError::NotFound("User not found".into()))
  }

  pub async fn create_user(&self, draft: UserDraft) -> Result<User, QueryError> {
    draft.validate()?;
    let mut state = self.enter(self.latency).await?;
    let id = state.users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
    let user = draft.into_user(id);
    state.users.push(user.clone());
    debug!(id, "user created");
    Ok(user)
  }

  pub async fn update_user(&self, id: u64, draft: UserDraft) -> Result<User, QueryError> {
    draft.validate()?;
    let mut state = self.enter(self.latency).await?;
    let user = state
      .users
      .iter_mut()
      .find(|u| u.id == id)
      .ok_or_else(|| QueryError::NotFound("User not found".into()))?;
    *user = draft.into_user(id);
    Ok(user.clone())
  }

  /// Users whose name or email contains `query`, ignoring case.
  pub async fn search_users(&self, query: &str) -> Result<Vec<User>, QueryError> {
    let state = self.enter(self.latency / 2).await?;
    let needle = query.to_lowercase();
    Ok(
      state
        .users
        .iter()
        .filter(|u| {
          u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect(),
    )
  }

  pub async fn delete_user(&self, id: u64) -> Result<u64, QueryError> {
    let mut state = self.enter(self.latency).await?;
    let index = state
      .users
      .iter()
      .position(|u| u.id == id)
      .ok_or_else(|| QueryError::NotFound("User not found".into()))?;
    state.users.remove(index);
    Ok(id)
  }

  // Files

  pub async fn files(&self) -> Result<Vec<UploadedFile>, QueryError> {
    let state = self.enter(self.latency).await?;
    Ok(state.files.clone())
  }

  /// Upload in ten steps of ten percent, one `latency` apart.
  pub async fn upload(
    &self,
    file: FileSpec,
    progress: ProgressReporter,
  ) -> Result<UploadedFile, QueryError> {
    if file.name.trim().is_empty() {
      return Err(QueryError::Validation("Please select a file".into()));
    }
    for step in 1..=10u8 {
      tokio::time::sleep(self.latency / 10).await;
      progress.report(step * 10);
    }

    let mut state = self.enter(Duration::ZERO).await?;
    let uploaded = UploadedFile {
      id: state.next_file_id,
      name: file.name,
      size: file.size,
      kind: file.kind,
      uploaded_at: Utc::now(),
    };
    state.next_file_id += 1;
    state.files.push(uploaded.clone());
    Ok(uploaded)
  }

  /// Upload all files concurrently, each driving its share of `progress`.
  pub async fn upload_many(
    &self,
    files: Vec<FileSpec>,
    progress: ProgressReporter,
  ) -> Result<Vec<UploadedFile>, QueryError> {
    if files.is_empty() {
      return Err(QueryError::Validation("Please select files".into()));
    }
    let count = files.len();
    try_join_all(
      files
        .into_iter()
        .enumerate()
        .map(|(index, file)| self.upload(file, progress.scaled(index, count))),
    )
    .await
  }

  pub async fn delete_file(&self, id: u64) -> Result<u64, QueryError> {
    let mut state = self.enter(self.latency / 2).await?;
    state.files.retain(|f| f.id != id);
    Ok(id)
  }
}

impl std::fmt::Debug for MockBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MockBackend")
      .field("latency", &self.latency)
      .finish_non_exhaustive()
  }
}

fn employee_page(all: &[Employee], query: &EmployeeQuery) -> EmployeePage {
  let search = query.search.to_lowercase();
  let mut rows: Vec<Employee> = all
    .iter()
    .filter(|e| {
      search.is_empty()
        || e.name.to_lowercase().contains(&search)
        || e.email.to_lowercase().contains(&search)
        || e.department.to_lowercase().contains(&search)
    })
    .filter(|e| query.department.is_empty() || e.department == query.department)
    .cloned()
    .collect();

  rows.sort_by(|a, b| {
    let ordering = compare_by(a, b, query.sort_by);
    match query.sort_order {
      SortOrder::Asc => ordering,
      SortOrder::Desc => ordering.reverse(),
    }
  });

  let state = crate::pagination::PaginationState::derive(rows.len(), query.limit, query.page);
  EmployeePage {
    employees: crate::pagination::window_for(query.page, query.limit)
      .slice(&rows)
      .to_vec(),
    total: rows.len(),
    page: query.page,
    total_pages: state.total_pages(),
  }
}

fn compare_by(a: &Employee, b: &Employee, field: SortField) -> Ordering {
  match field {
    SortField::Id => a.id.cmp(&b.id),
    SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    SortField::Department => a.department.cmp(&b.department),
    SortField::Salary => a.salary.total_cmp(&b.salary),
  }
}
