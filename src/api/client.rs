//! Cache-aware client: query keys, loaders and mutation options for every
//! screen.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;

use super::mock::MockBackend;
use super::remote::RemoteApi;
use super::types::{Car, Employee, EmployeeQuery, User};
use crate::cache::{QueryCache, QueryKey};
use crate::error::QueryError;
use crate::mutation::{MutateOptions, MutationExecutor};

/// Query keys used across the app.
pub mod keys {
  use super::*;

  pub fn cars() -> QueryKey {
    QueryKey::new("cars")
  }

  /// Prefix of every employee listing.
  pub fn employees() -> QueryKey {
    QueryKey::new("employees")
  }

  pub fn employee_list(query: &EmployeeQuery) -> QueryKey {
    employees().with(query)
  }

  pub fn employee(id: u64) -> QueryKey {
    QueryKey::new("employee").with(id)
  }

  /// Prefix of every user page.
  pub fn users() -> QueryKey {
    QueryKey::new("users")
  }

  pub fn user(id: u64) -> QueryKey {
    QueryKey::new("user").with(id)
  }

  /// Prefix of every user search.
  pub fn user_searches() -> QueryKey {
    QueryKey::new("users-search")
  }

  pub fn user_search(query: &str) -> QueryKey {
    user_searches().with(query)
  }

  pub fn posts() -> QueryKey {
    QueryKey::new("posts")
  }

  pub fn post(id: u64) -> QueryKey {
    QueryKey::new("post").with(id)
  }

  pub fn files() -> QueryKey {
    QueryKey::new("files")
  }
}

pub type KeyedLoader =
  Box<dyn Fn(&QueryKey) -> BoxFuture<'static, Result<Value, QueryError>> + Send + Sync>;

fn to_json<T: Serialize>(value: T) -> Result<Value, QueryError> {
  serde_json::to_value(value).map_err(QueryError::from)
}

/// Second key segment decoded as `T`.
fn param<T: serde::de::DeserializeOwned>(key: &QueryKey) -> Result<T, QueryError> {
  let raw = key
    .parts()
    .get(1)
    .cloned()
    .ok_or_else(|| QueryError::Validation(format!("key {key} has no parameters")))?;
  serde_json::from_value(raw).map_err(QueryError::from)
}

fn without_id(list: Option<&Value>, id: u64) -> Value {
  let items = list
    .and_then(Value::as_array)
    .map(|items| {
      items
        .iter()
        .filter(|item| item.get("id").and_then(Value::as_u64) != Some(id))
        .cloned()
        .collect()
    })
    .unwrap_or_default();
  Value::Array(items)
}

#[derive(serde::Deserialize)]
struct PageParams {
  page: usize,
  limit: usize,
}

/// Everything a view needs to read and write data.
#[derive(Clone, Debug)]
pub struct DataClient {
  cache: QueryCache,
  executor: MutationExecutor,
  backend: MockBackend,
  remote: Option<RemoteApi>,
}

impl DataClient {
  pub fn new(cache: QueryCache, backend: MockBackend, remote: Option<RemoteApi>) -> Self {
    let executor = MutationExecutor::new(cache.clone());
    Self {
      cache,
      executor,
      backend,
      remote,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn executor(&self) -> &MutationExecutor {
    &self.executor
  }

  pub fn backend(&self) -> &MockBackend {
    &self.backend
  }

  pub fn remote(&self) -> Option<&RemoteApi> {
    self.remote.as_ref()
  }

  // Loaders. Each reads its parameters from the key it is called with.

  pub fn cars_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |_key: &QueryKey| {
      let api = api.clone();
      async move { to_json(api.cars().await?) }.boxed()
    })
  }

  /// Loader for keys built by [`keys::employee_list`].
  pub fn employees_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |key: &QueryKey| {
      let api = api.clone();
      let query = param::<EmployeeQuery>(key);
      async move { to_json(api.employees(&query?).await?) }.boxed()
    })
  }

  pub fn employee_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |key: &QueryKey| {
      let api = api.clone();
      let id = param::<u64>(key);
      async move { to_json(api.employee(id?).await?) }.boxed()
    })
  }

  /// Loader for keys built by a `ListController` over [`keys::users`].
  pub fn users_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |key: &QueryKey| {
      let api = api.clone();
      let params = param::<PageParams>(key);
      async move {
        let params = params?;
        to_json(api.users(params.page, params.limit).await?)
      }
      .boxed()
    })
  }

  pub fn user_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |key: &QueryKey| {
      let api = api.clone();
      let id = param::<u64>(key);
      async move { to_json(api.user(id?).await?) }.boxed()
    })
  }

  /// Loader for keys built by [`keys::user_search`].
  pub fn user_search_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |key: &QueryKey| {
      let api = api.clone();
      let query = param::<String>(key);
      async move { to_json(api.search_users(&query?).await?) }.boxed()
    })
  }

  pub fn posts_loader(&self) -> KeyedLoader {
    let remote = self.remote.clone();
    Box::new(move |_key: &QueryKey| {
      let remote = remote.clone();
      async move {
        match remote {
          Some(remote) => remote.posts().await,
          None => Err(QueryError::Network("posts API is not configured".into())),
        }
      }
      .boxed()
    })
  }

  pub fn post_loader(&self) -> KeyedLoader {
    let remote = self.remote.clone();
    Box::new(move |key: &QueryKey| {
      let remote = remote.clone();
      let id = param::<u64>(key);
      async move {
        let id = id?;
        match remote {
          Some(remote) => remote.post(id).await,
          None => Err(QueryError::Network("posts API is not configured".into())),
        }
      }
      .boxed()
    })
  }

  pub fn files_loader(&self) -> KeyedLoader {
    let api = self.backend.clone();
    Box::new(move |_key: &QueryKey| {
      let api = api.clone();
      async move { to_json(api.files().await?) }.boxed()
    })
  }

  // Mutation effects

  /// Drop the car from the cached list right away; put it back if the
  /// server refuses.
  pub fn delete_car_options(id: u64) -> MutateOptions<u64> {
    MutateOptions::new().optimistic(keys::cars(), move |cars| without_id(cars, id))
  }

  /// Prepend the created car to the cached list.
  pub fn create_car_options() -> MutateOptions<Car> {
    MutateOptions::new().merge_into(keys::cars(), |cars, car: &Car| {
      let mut items = cars.and_then(Value::as_array).cloned().unwrap_or_default();
      if let Ok(car) = serde_json::to_value(car) {
        items.insert(0, car);
      }
      Value::Array(items)
    })
  }

  /// Replace the edited car in the cached list.
  pub fn update_car_options() -> MutateOptions<Car> {
    MutateOptions::new().merge_into(keys::cars(), |cars, car: &Car| {
      let items = cars.and_then(Value::as_array).cloned().unwrap_or_default();
      let updated = serde_json::to_value(car).unwrap_or(Value::Null);
      Value::Array(
        items
          .into_iter()
          .map(|item| {
            if item.get("id").and_then(Value::as_u64) == Some(car.id) {
              updated.clone()
            } else {
              item
            }
          })
          .collect(),
      )
    })
  }

  pub fn create_employee_options() -> MutateOptions<Employee> {
    MutateOptions::new().invalidates(keys::employees())
  }

  pub fn update_employee_options(id: u64) -> MutateOptions<Employee> {
    MutateOptions::new()
      .invalidates(keys::employees())
      .invalidates(keys::employee(id))
  }

  pub fn delete_employee_options(id: u64) -> MutateOptions<Employee> {
    Self::update_employee_options(id)
  }

  pub fn bulk_delete_options() -> MutateOptions<usize> {
    MutateOptions::new().invalidates(keys::employees())
  }

  /// Reload user pages and searches; the new user may land on any of them.
  pub fn create_user_options() -> MutateOptions<User> {
    MutateOptions::new()
      .invalidates(keys::users())
      .invalidates(keys::user_searches())
  }

  pub fn update_user_options(id: u64) -> MutateOptions<User> {
    Self::create_user_options().invalidates(keys::user(id))
  }

  /// Remove the user from the page being shown, roll back on failure and
  /// reload every user page once the server confirms. A page that never
  /// loaded is left alone.
  pub fn delete_user_options(id: u64, page_key: QueryKey) -> MutateOptions<u64> {
    MutateOptions::new()
      .optimistic_patch(page_key, move |page| {
        let mut page = page.clone();
        if let Some(users) = page.get_mut("users") {
          *users = without_id(Some(users), id);
        }
        page
      })
      .invalidates(keys::users())
      .invalidates(keys::user_searches())
      .invalidates(keys::user(id))
  }

  pub fn upload_options<R>() -> MutateOptions<R> {
    MutateOptions::new().invalidates(keys::files())
  }

  pub fn delete_file_options(id: u64) -> MutateOptions<u64> {
    MutateOptions::new().optimistic(keys::files(), move |files| without_id(files, id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{EmployeePage, UserDraft, UserPage};
  use crate::cache::FetchOptions;
  use crate::pagination::ListController;
  use std::time::Duration;

  fn client() -> DataClient {
    DataClient::new(
      QueryCache::new(),
      MockBackend::new(Duration::from_millis(50)),
      None,
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_car_scenario() {
    let client = client();
    let loader = client.cars_loader();
    let key = keys::cars();
    client
      .cache()
      .fetch(&key, move || loader(&keys::cars()), &FetchOptions::default())
      .await
      .unwrap();
    let before = client.cache().get(&key).data;

    // Id 500 doesn't exist, so the server rejects the delete
    let api = client.backend().clone();
    let cache = client.cache().clone();
    let result = client
      .executor()
      .mutate(
        move |id: u64| async move {
          let during: Vec<Car> = cache.get_data(&keys::cars()).unwrap().unwrap();
          assert!(during.iter().all(|c| c.id != 5));
          api.delete_car(if id == 5 { 500 } else { id }).await
        },
        5,
        DataClient::delete_car_options(5),
      )
      .await;

    assert!(matches!(result, Err(QueryError::NotFound(_))));
    assert_eq!(client.cache().get(&key).data, before);
    let cars: Vec<Car> = client.cache().get_data(&key).unwrap().unwrap();
    assert_eq!(cars[4].id, 5, "car 5 back in its original position");
  }

  #[tokio::test(start_paused = true)]
  async fn test_employee_key_drives_loader() {
    let client = client();
    let query = EmployeeQuery {
      department: "HR".into(),
      ..EmployeeQuery::default()
    };
    let key = keys::employee_list(&query);
    assert!(key.starts_with(&keys::employees()));

    let loader = client.employees_loader();
    let load_key = key.clone();
    let page = client
      .cache()
      .fetch_as::<EmployeePage, _, _>(&key, move || loader(&load_key), &FetchOptions::default())
      .await
      .unwrap()
      .data;
    assert_eq!(page.total, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_employee_invalidates_lists() {
    let client = client();
    let key = keys::employee_list(&EmployeeQuery::default());
    let loader = client.employees_loader();
    let load_key = key.clone();
    client
      .cache()
      .fetch(&key, move || loader(&load_key), &FetchOptions::default())
      .await
      .unwrap();

    let api = client.backend().clone();
    client
      .executor()
      .mutate(
        move |id: u64| async move { api.delete_employee(id).await },
        3,
        DataClient::delete_employee_options(3),
      )
      .await
      .unwrap();

    assert!(client.cache().get(&key).updated_at.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_user_optimistic_page() {
    let client = client();
    let list = ListController::new(keys::users(), 3);
    let key = list.key();
    let loader = client.users_loader();
    let load_key = key.clone();
    client
      .cache()
      .fetch(&key, move || loader(&load_key), &FetchOptions::default())
      .await
      .unwrap();

    let api = client.backend().clone();
    client
      .executor()
      .mutate(
        move |id: u64| async move { api.delete_user(id).await },
        2,
        DataClient::delete_user_options(2, key.clone()),
      )
      .await
      .unwrap();

    let page: UserPage = client.cache().get_data(&key).unwrap().unwrap();
    assert!(page.users.iter().all(|u| u.id != 2));
    assert!(client.cache().get(&key).updated_at.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_user_leaves_unloaded_page_alone() {
    let client = client();
    let key = ListController::new(keys::users(), 3).key_for(2);

    let api = client.backend().clone();
    client
      .executor()
      .mutate(
        move |id: u64| async move { api.delete_user(id).await },
        4,
        DataClient::delete_user_options(4, key.clone()),
      )
      .await
      .unwrap();

    let entry = client.cache().get(&key);
    assert_eq!(entry.status, crate::cache::QueryStatus::Idle);
    assert!(entry.data.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_user_invalidates_detail_and_search() {
    let client = client();
    let detail = keys::user(2);
    let search = keys::user_search("priya");
    for key in [&detail, &search] {
      let loader = match key.namespace() {
        Some("user") => client.user_loader(),
        _ => client.user_search_loader(),
      };
      let load_key = key.clone();
      client
        .cache()
        .fetch(key, move || loader(&load_key), &FetchOptions::default())
        .await
        .unwrap();
    }
    let found: Vec<User> = client.cache().get_data(&search).unwrap().unwrap();
    assert_eq!(found.len(), 1);

    let api = client.backend().clone();
    let draft = UserDraft {
      name: "Priya S".into(),
      email: "priya@example.com".into(),
      role: "Manager".into(),
    };
    let updated = client
      .executor()
      .mutate(
        move |(id, draft): (u64, UserDraft)| async move { api.update_user(id, draft).await },
        (2, draft),
        DataClient::update_user_options(2),
      )
      .await
      .unwrap();
    assert_eq!(updated.role, "Manager");

    assert!(client.cache().get(&detail).updated_at.is_none());
    assert!(client.cache().get(&search).updated_at.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_user_search_loader_reads_query() {
    let client = client();
    let loader = client.user_search_loader();
    let found: Vec<User> =
      serde_json::from_value(loader(&keys::user_search("rao")).await.unwrap()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Karthik Rao");
  }

  #[tokio::test]
  async fn test_posts_without_remote_fail() {
    let client = client();
    let loader = client.posts_loader();
    assert!(matches!(
      loader(&keys::posts()).await,
      Err(QueryError::Network(_))
    ));
  }

  #[test]
  fn test_missing_key_parameter() {
    assert!(matches!(
      param::<u64>(&QueryKey::new("post")),
      Err(QueryError::Validation(_))
    ));
  }
}
