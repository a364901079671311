use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// A car listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
  pub id: u64,
  pub make: String,
  pub model: String,
  pub year: i32,
  pub price: f64,
}

/// Fields for creating or editing a car
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarDraft {
  pub make: String,
  pub model: String,
  pub year: i32,
  pub price: f64,
}

impl CarDraft {
  /// Check the draft the way the car form does.
  pub fn validate(&self) -> Result<(), QueryError> {
    let current_year = Utc::now().year();
    let make = self.make.trim();
    if make.is_empty() {
      return Err(QueryError::Validation("Make is required".into()));
    }
    if make.chars().count() < 2 {
      return Err(QueryError::Validation("Enter at least 2 characters".into()));
    }
    if self.model.trim().is_empty() {
      return Err(QueryError::Validation("Model is required".into()));
    }
    if self.year < 1900 {
      return Err(QueryError::Validation("Year must be >= 1900".into()));
    }
    if self.year > current_year {
      return Err(QueryError::Validation(format!(
        "Year cannot be > {current_year}"
      )));
    }
    if !(self.price > 0.0) {
      return Err(QueryError::Validation("Price must be positive".into()));
    }
    Ok(())
  }

  pub fn into_car(self, id: u64) -> Car {
    Car {
      id,
      make: self.make,
      model: self.model,
      year: self.year,
      price: self.price,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmployeeStatus {
  Active,
  Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
  pub id: u64,
  pub name: String,
  pub email: String,
  pub department: String,
  pub salary: f64,
  pub status: EmployeeStatus,
}

/// Fields for creating or updating an employee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeDraft {
  pub name: String,
  pub email: String,
  pub department: String,
  pub salary: f64,
}

impl EmployeeDraft {
  pub fn validate(&self) -> Result<(), QueryError> {
    if self.name.trim().is_empty() || self.email.trim().is_empty() || !(self.salary > 0.0) {
      return Err(QueryError::Validation("Please fill all fields".into()));
    }
    if !self.email.contains('@') {
      return Err(QueryError::Validation(format!(
        "Invalid email: {}",
        self.email
      )));
    }
    Ok(())
  }
}

pub const DEPARTMENTS: &[&str] = &["IT", "HR", "Sales", "Finance"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
  #[default]
  Id,
  Name,
  Department,
  Salary,
}

impl SortField {
  pub fn next(self) -> Self {
    match self {
      SortField::Id => SortField::Name,
      SortField::Name => SortField::Department,
      SortField::Department => SortField::Salary,
      SortField::Salary => SortField::Id,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      SortField::Id => "ID",
      SortField::Name => "Name",
      SortField::Department => "Department",
      SortField::Salary => "Salary",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

impl SortOrder {
  pub fn toggle(self) -> Self {
    match self {
      SortOrder::Asc => SortOrder::Desc,
      SortOrder::Desc => SortOrder::Asc,
    }
  }
}

/// Parameters of an employee listing. Serialized into the cache key, so two
/// equal queries share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeQuery {
  pub search: String,
  pub department: String,
  pub page: usize,
  pub limit: usize,
  pub sort_by: SortField,
  pub sort_order: SortOrder,
}

impl Default for EmployeeQuery {
  fn default() -> Self {
    Self {
      search: String::new(),
      department: String::new(),
      page: 1,
      limit: 5,
      sort_by: SortField::Id,
      sort_order: SortOrder::Asc,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePage {
  pub employees: Vec<Employee>,
  pub total: usize,
  pub page: usize,
  pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub name: String,
  pub email: String,
  pub role: String,
}

pub const USER_ROLES: &[&str] = &["Developer", "Designer", "Manager", "Tester"];

/// Fields for creating or editing a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDraft {
  pub name: String,
  pub email: String,
  pub role: String,
}

impl UserDraft {
  pub fn validate(&self) -> Result<(), QueryError> {
    if self.name.trim().is_empty() || self.email.trim().is_empty() {
      return Err(QueryError::Validation("Please fill all fields".into()));
    }
    if !self.email.contains('@') {
      return Err(QueryError::Validation(format!(
        "Invalid email: {}",
        self.email
      )));
    }
    if !USER_ROLES.contains(&self.role.as_str()) {
      return Err(QueryError::Validation(format!(
        "Role must be one of {}",
        USER_ROLES.join(", ")
      )));
    }
    Ok(())
  }

  pub fn into_user(self, id: u64) -> User {
    User {
      id,
      name: self.name,
      email: self.email,
      role: self.role,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
  pub users: Vec<User>,
  pub has_more: bool,
  pub total: usize,
  pub page: usize,
}

/// A blog post as served by a JSONPlaceholder-style API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  #[serde(default)]
  pub user_id: u64,
  pub id: u64,
  pub title: String,
  pub body: String,
}

/// A file selected for upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
  pub name: String,
  pub size: u64,
  pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
  pub id: u64,
  pub name: String,
  pub size: u64,
  pub kind: String,
  pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn draft() -> CarDraft {
    CarDraft {
      make: "Toyota".into(),
      model: "Corolla".into(),
      year: 2015,
      price: 12000.0,
    }
  }

  #[test]
  fn test_valid_car_draft() {
    assert!(draft().validate().is_ok());
  }

  #[test]
  fn test_car_draft_rules() {
    let cases = [
      (CarDraft { make: "T".into(), ..draft() }, "Enter at least 2 characters"),
      (CarDraft { model: " ".into(), ..draft() }, "Model is required"),
      (CarDraft { year: 1899, ..draft() }, "Year must be >= 1900"),
      (CarDraft { price: 0.0, ..draft() }, "Price must be positive"),
    ];
    for (car, message) in cases {
      assert_eq!(car.validate(), Err(QueryError::Validation(message.into())));
    }

    let future = CarDraft {
      year: Utc::now().year() + 1,
      ..draft()
    };
    assert!(matches!(future.validate(), Err(QueryError::Validation(_))));
  }

  #[test]
  fn test_user_draft_rules() {
    let draft = UserDraft {
      name: "Asha".into(),
      email: "asha@example.com".into(),
      role: "Tester".into(),
    };
    assert!(draft.validate().is_ok());

    let blank = UserDraft {
      email: " ".into(),
      ..draft.clone()
    };
    assert_eq!(
      blank.validate(),
      Err(QueryError::Validation("Please fill all fields".into()))
    );
    let bad_email = UserDraft {
      email: "asha".into(),
      ..draft.clone()
    };
    assert_eq!(
      bad_email.validate(),
      Err(QueryError::Validation("Invalid email: asha".into()))
    );
    let bad_role = UserDraft {
      role: "Intern".into(),
      ..draft
    };
    assert!(matches!(bad_role.validate(), Err(QueryError::Validation(_))));
  }

  #[test]
  fn test_employee_query_key_shape() {
    let value = serde_json::to_value(EmployeeQuery::default()).unwrap();
    assert_eq!(
      value,
      serde_json::json!({
        "search": "",
        "department": "",
        "page": 1,
        "limit": 5,
        "sortBy": "id",
        "sortOrder": "asc",
      })
    );
  }

  #[test]
  fn test_post_decodes_placeholder_shape() {
    let post: Post =
      serde_json::from_str(r#"{"userId": 1, "id": 3, "title": "t", "body": "b"}"#).unwrap();
    assert_eq!(post.user_id, 1);
    assert_eq!(post.id, 3);
  }
}
