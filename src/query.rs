//! View-facing bindings over the cache and the mutation executor.
//!
//! Views never touch the cache directly. They hold an [`EntryBinding`] per
//! keyed read and a [`MutationBinding`] per write, and call `poll()` on every
//! tick of their event loop.
//!
//! # Example
//!
//! ```ignore
//! let api = client.clone();
//! let mut cars: EntryBinding<Vec<Car>> = use_entry(
//!   &cache,
//!   QueryKey::new("cars"),
//!   move |_key| {
//!     let api = api.clone();
//!     async move { api.load_cars().await }
//!   },
//!   EntryOptions::default(),
//! );
//!
//! // In event loop tick
//! if cars.poll() {
//!   // Entry changed, re-render
//! }
//!
//! // In render
//! match cars.data() {
//!   Some(cars) => render_cars(cars),
//!   None if cars.is_loading() => render_spinner(),
//!   None => render_error(cars.error()),
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::cache::{FetchOptions, QueryCache, QueryEntry, QueryKey, QueryStatus, Subscription};
use crate::error::QueryError;
use crate::mutation::{MutateOptions, MutationExecutor, MutationStatus, ProgressReporter};

type KeyLoader = Arc<dyn Fn(&QueryKey) -> BoxFuture<'static, Result<Value, QueryError>> + Send + Sync>;

/// Behaviour switches for [`use_entry`].
#[derive(Debug, Clone)]
pub struct EntryOptions {
  /// When false the binding never loads on its own (dependent queries).
  pub enabled: bool,
  /// Keep showing the previous key's data while a new key loads.
  pub keep_previous_data: bool,
  pub fetch: FetchOptions,
}

impl Default for EntryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      keep_previous_data: false,
      fetch: FetchOptions::default(),
    }
  }
}

impl EntryOptions {
  #[must_use]
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  #[must_use]
  pub fn keep_previous_data(mut self) -> Self {
    self.keep_previous_data = true;
    self
  }

  #[must_use]
  pub fn fetch_options(mut self, fetch: FetchOptions) -> Self {
    self.fetch = fetch;
    self
  }
}

/// Subscribe to `key` and load it through `loader` when needed.
///
/// The loader receives the binding's current key, so the same binding can
/// follow parameter changes through [`EntryBinding::set_key`].
pub fn use_entry<T, F, Fut>(
  cache: &QueryCache,
  key: QueryKey,
  loader: F,
  options: EntryOptions,
) -> EntryBinding<T>
where
  T: DeserializeOwned,
  F: Fn(&QueryKey) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
{
  let loader: KeyLoader = Arc::new(move |key: &QueryKey| loader(key).boxed());
  let (tx, rx) = mpsc::unbounded_channel();
  let subscription = subscribe(cache, &key, tx.clone());
  let entry = cache.get(&key);

  let mut binding = EntryBinding {
    cache: cache.clone(),
    loader,
    options,
    tx,
    rx,
    subscription,
    invalidations: cache.invalidations(),
    entry: QueryEntry::clone(&entry),
    data: None,
    previous: None,
    decode_error: None,
  };
  binding.apply(entry);
  binding.fetch();
  binding
}

fn subscribe(
  cache: &QueryCache,
  key: &QueryKey,
  tx: mpsc::UnboundedSender<QueryEntry>,
) -> Subscription {
  cache.subscribe(key, move |entry| {
    // Binding dropped
    let _ = tx.send(entry.clone());
  })
}

/// Live view of one cache entry, decoded as `T`.
pub struct EntryBinding<T> {
  cache: QueryCache,
  loader: KeyLoader,
  options: EntryOptions,
  tx: mpsc::UnboundedSender<QueryEntry>,
  rx: mpsc::UnboundedReceiver<QueryEntry>,
  subscription: Subscription,
  invalidations: broadcast::Receiver<QueryKey>,
  entry: QueryEntry,
  data: Option<T>,
  previous: Option<T>,
  decode_error: Option<QueryError>,
}

impl<T: DeserializeOwned> EntryBinding<T> {
  pub fn key(&self) -> &QueryKey {
    self.subscription.key()
  }

  pub fn entry(&self) -> &QueryEntry {
    &self.entry
  }

  pub fn status(&self) -> QueryStatus {
    self.entry.status
  }

  /// Data for the current key, or the previous key's data while the new
  /// one loads when `keep_previous_data` is set.
  pub fn data(&self) -> Option<&T> {
    self.data.as_ref().or(self.previous.as_ref())
  }

  /// Whether [`data`](Self::data) belongs to a previous key.
  pub fn is_previous_data(&self) -> bool {
    self.data.is_none() && self.previous.is_some()
  }

  pub fn is_loading(&self) -> bool {
    self.entry.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.entry.is_success() && self.decode_error.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.entry.is_error() || self.decode_error.is_some()
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.entry.error.as_ref().or(self.decode_error.as_ref())
  }

  pub fn is_enabled(&self) -> bool {
    self.options.enabled
  }

  /// Load the entry unless it is fresh or already loading.
  pub fn fetch(&self) {
    if !self.options.enabled {
      return;
    }
    let (cache, key, loader, opts) = self.load_parts();
    tokio::spawn(async move {
      let load_key = key.clone();
      // Outcome reaches the binding through its subscription
      let _ = cache.fetch(&key, move || loader(&load_key), &opts).await;
    });
  }

  /// Load the entry now, even if fresh.
  pub fn refetch(&self) {
    let (cache, key, loader, opts) = self.load_parts();
    tokio::spawn(async move {
      let load_key = key.clone();
      let _ = cache.refetch(&key, move || loader(&load_key), &opts).await;
    });
  }

  fn load_parts(&self) -> (QueryCache, QueryKey, KeyLoader, FetchOptions) {
    (
      self.cache.clone(),
      self.key().clone(),
      Arc::clone(&self.loader),
      self.options.fetch.clone(),
    )
  }

  /// Follow a different key (new filters, new page).
  pub fn set_key(&mut self, key: QueryKey) {
    if &key == self.key() {
      return;
    }
    debug!(from = %self.key(), to = %key, "binding key changed");

    let previous = self.data.take();
    self.previous = if self.options.keep_previous_data {
      previous.or(self.previous.take())
    } else {
      None
    };

    // Drops the old subscription; anything it queued is filtered in poll
    self.subscription = subscribe(&self.cache, &key, self.tx.clone());
    let entry = self.cache.get(&key);
    self.entry = entry.clone();
    self.apply(entry);
    self.fetch();
  }

  pub fn set_enabled(&mut self, enabled: bool) {
    let was = self.options.enabled;
    self.options.enabled = enabled;
    if enabled && !was {
      self.fetch();
    }
  }

  /// Apply queued changes. Returns true if anything visible changed.
  ///
  /// Also reloads when the current key was invalidated.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(entry) = self.rx.try_recv() {
      if &entry.key == self.key() {
        self.apply(entry);
        changed = true;
      }
    }

    let mut invalidated = false;
    loop {
      match self.invalidations.try_recv() {
        Ok(key) => invalidated |= &key == self.key(),
        // Missed some; reload to be safe
        Err(broadcast::error::TryRecvError::Lagged(_)) => invalidated = true,
        Err(_) => break,
      }
    }
    if invalidated {
      self.fetch();
    }

    changed
  }

  fn apply(&mut self, entry: QueryEntry) {
    self.decode_error = None;
    if entry.data.is_some() {
      match entry.data_as::<T>() {
        Some(Ok(data)) => {
          self.data = Some(data);
          self.previous = None;
        }
        Some(Err(err)) => self.decode_error = Some(err),
        None => {}
      }
    } else {
      self.data = None;
    }
    self.entry = entry;
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for EntryBinding<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EntryBinding")
      .field("key", self.subscription.key())
      .field("status", &self.entry.status)
      .field("data", &self.data)
      .field("enabled", &self.options.enabled)
      .finish_non_exhaustive()
  }
}

type Operation<A, R> =
  Arc<dyn Fn(A, ProgressReporter) -> BoxFuture<'static, Result<R, QueryError>> + Send + Sync>;
type OptionsFor<A, R> = Arc<dyn Fn(&A) -> MutateOptions<R> + Send + Sync>;

/// Bind a write operation. `options_for` builds the cache effects for each
/// call from its arguments.
pub fn use_mutation<A, R, F, Fut, O>(
  executor: &MutationExecutor,
  operation: F,
  options_for: O,
) -> MutationBinding<A, R>
where
  A: Send + 'static,
  R: Send + 'static,
  F: Fn(A) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, QueryError>> + Send + 'static,
  O: Fn(&A) -> MutateOptions<R> + Send + Sync + 'static,
{
  use_progress_mutation(
    executor,
    move |args, _progress| operation(args),
    options_for,
  )
}

/// Like [`use_mutation`] for operations that report progress.
pub fn use_progress_mutation<A, R, F, Fut, O>(
  executor: &MutationExecutor,
  operation: F,
  options_for: O,
) -> MutationBinding<A, R>
where
  A: Send + 'static,
  R: Send + 'static,
  F: Fn(A, ProgressReporter) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, QueryError>> + Send + 'static,
  O: Fn(&A) -> MutateOptions<R> + Send + Sync + 'static,
{
  let (tx, rx) = mpsc::unbounded_channel();
  MutationBinding {
    executor: executor.clone(),
    operation: Arc::new(move |args, progress| operation(args, progress).boxed()),
    options_for: Arc::new(options_for),
    tx,
    rx,
    status: MutationStatus::Idle,
    in_flight: 0,
    result: None,
    error: None,
    progress: None,
  }
}

/// Handle for invoking a mutation from a view.
pub struct MutationBinding<A, R> {
  executor: MutationExecutor,
  operation: Operation<A, R>,
  options_for: OptionsFor<A, R>,
  tx: mpsc::UnboundedSender<Result<R, QueryError>>,
  rx: mpsc::UnboundedReceiver<Result<R, QueryError>>,
  status: MutationStatus,
  in_flight: usize,
  result: Option<R>,
  error: Option<QueryError>,
  progress: Option<watch::Receiver<u8>>,
}

impl<A: Send + 'static, R: Send + 'static> MutationBinding<A, R> {
  /// Start the operation in the background. Poll to observe the outcome.
  pub fn mutate(&mut self, args: A) {
    let options = (self.options_for)(&args);
    let operation = Arc::clone(&self.operation);
    let executor = self.executor.clone();
    let tx = self.tx.clone();
    let (reporter, progress) = ProgressReporter::new();

    self.status = MutationStatus::Pending;
    self.in_flight += 1;
    self.error = None;
    self.progress = Some(progress);

    tokio::spawn(async move {
      let result = executor
        .mutate_with_progress(
          move |args, progress| operation(args, progress),
          args,
          reporter,
          options,
        )
        .await;
      let _ = tx.send(result);
    });
  }

  /// Apply finished calls. Returns true if the status changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(result) = self.rx.try_recv() {
      self.in_flight = self.in_flight.saturating_sub(1);
      match result {
        Ok(value) => {
          self.result = Some(value);
          self.error = None;
          self.status = MutationStatus::Success;
        }
        Err(err) => {
          self.error = Some(err);
          self.status = MutationStatus::Error;
        }
      }
      changed = true;
    }
    // Last call wins while others are still running
    if self.in_flight > 0 {
      self.status = MutationStatus::Pending;
    }
    changed
  }

  pub fn status(&self) -> MutationStatus {
    self.status
  }

  pub fn is_pending(&self) -> bool {
    self.status == MutationStatus::Pending
  }

  pub fn is_error(&self) -> bool {
    self.status == MutationStatus::Error
  }

  pub fn is_success(&self) -> bool {
    self.status == MutationStatus::Success
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }

  /// Result of the last successful call.
  pub fn result(&self) -> Option<&R> {
    self.result.as_ref()
  }

  /// Progress of the latest call in percent, if one was made.
  pub fn progress(&self) -> Option<u8> {
    self.progress.as_ref().map(|rx| *rx.borrow())
  }

  /// Forget the last outcome.
  pub fn reset(&mut self) {
    if self.in_flight == 0 {
      self.status = MutationStatus::Idle;
      self.result = None;
      self.error = None;
      self.progress = None;
    }
  }
}

impl<A, R> std::fmt::Debug for MutationBinding<A, R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MutationBinding")
      .field("status", &self.status)
      .field("in_flight", &self.in_flight)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::QueryConfig;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn counting(
    counter: Arc<AtomicU32>,
  ) -> impl Fn(&QueryKey) -> BoxFuture<'static, Result<Value, QueryError>> + Send + Sync + 'static
  {
    move |key: &QueryKey| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      let key = key.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!({ "key": key.as_str(), "n": n }))
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_entry_binding_loads_on_create() {
    let cache = QueryCache::new();
    let mut binding: EntryBinding<Vec<u32>> = use_entry(
      &cache,
      QueryKey::new("ids"),
      |_: &QueryKey| async { Ok(json!([1, 2, 3])) },
      EntryOptions::default(),
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(binding.poll());
    assert!(binding.is_success());
    assert_eq!(binding.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_entry_binding_error() {
    let cache = QueryCache::new();
    let mut binding: EntryBinding<i32> = use_entry(
      &cache,
      QueryKey::new("broken"),
      |_: &QueryKey| async { Err(QueryError::Http { status: 500, message: "boom".into() }) },
      EntryOptions::default(),
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    binding.poll();
    assert!(binding.is_error());
    assert_eq!(binding.error().map(ToString::to_string), Some("HTTP 500: boom".into()));
  }

  #[tokio::test]
  async fn test_disabled_binding_does_not_load() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let mut binding: EntryBinding<Value> = use_entry(
      &cache,
      QueryKey::new("employee").with(7),
      counting(counter.clone()),
      EntryOptions::default().enabled(false),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(binding.status(), QueryStatus::Idle);

    binding.set_enabled(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(binding.is_success());
  }

  #[tokio::test]
  async fn test_two_bindings_share_one_load() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("cars");
    let mut a: EntryBinding<Value> =
      use_entry(&cache, key.clone(), counting(counter.clone()), EntryOptions::default());
    let mut b: EntryBinding<Value> =
      use_entry(&cache, key.clone(), counting(counter.clone()), EntryOptions::default());

    tokio::time::sleep(Duration::from_millis(50)).await;
    a.poll();
    b.poll();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(a.data(), b.data());
    assert_eq!(cache.get(&key).subscriber_count, 2);

    drop(a);
    assert_eq!(cache.get(&key).subscriber_count, 1);
  }

  #[tokio::test]
  async fn test_invalidation_triggers_refetch() {
    let cache = QueryCache::with_config(QueryConfig::new(Duration::from_secs(60), Duration::from_secs(60)));
    let counter = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("employees").with(json!({"page": 1}));
    let mut binding: EntryBinding<Value> =
      use_entry(&cache, key, counting(counter.clone()), EntryOptions::default());

    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    assert_eq!(binding.data().map(|d| d["n"].clone()), Some(json!(0)));

    cache.invalidate(&QueryKey::new("employees"));
    binding.poll();
    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(binding.data().map(|d| d["n"].clone()), Some(json!(1)));
  }

  #[tokio::test]
  async fn test_set_key_keeps_previous_data() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let page = |n: u32| QueryKey::new("users").with(json!({"page": n}));
    let mut binding: EntryBinding<Value> = use_entry(
      &cache,
      page(1),
      counting(counter.clone()),
      EntryOptions::default().keep_previous_data(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    let first = binding.data().cloned();
    assert!(first.is_some());

    binding.set_key(page(2));
    binding.poll();
    assert!(binding.is_previous_data());
    assert_eq!(binding.data().cloned(), first);

    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    assert!(!binding.is_previous_data());
    assert_eq!(
      binding.data().map(|d| d["key"].clone()),
      Some(json!(page(2).as_str()))
    );
  }

  #[tokio::test]
  async fn test_set_key_without_keep_previous_clears() {
    let cache = QueryCache::new();
    let counter = Arc::new(AtomicU32::new(0));
    let mut binding: EntryBinding<Value> = use_entry(
      &cache,
      QueryKey::new("posts").with(1),
      counting(counter),
      EntryOptions::default(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    binding.poll();
    binding.set_key(QueryKey::new("posts").with(2));
    assert!(binding.data().is_none());
  }

  #[tokio::test]
  async fn test_mutation_binding_lifecycle() {
    let cache = QueryCache::new();
    let executor = MutationExecutor::new(cache.clone());
    let key = QueryKey::new("cars");
    cache.set_data(&key, |_| json!([{"id": 1}, {"id": 2}]));

    let mut delete = use_mutation(
      &executor,
      |id: u64| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if id == 2 {
          Err(QueryError::NotFound(format!("car {id}")))
        } else {
          Ok(id)
        }
      },
      {
        let key = key.clone();
        move |id: &u64| {
          let id = *id;
          MutateOptions::new().optimistic(key.clone(), move |cars| {
            let cars = cars.and_then(Value::as_array).cloned().unwrap_or_default();
            Value::Array(cars.into_iter().filter(|c| c["id"] != json!(id)).collect())
          })
        }
      },
    );

    assert_eq!(delete.status(), MutationStatus::Idle);
    delete.mutate(2);
    assert!(delete.is_pending());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(delete.poll());
    assert!(delete.is_error());
    assert_eq!(delete.error(), Some(&QueryError::NotFound("car 2".into())));
    assert_eq!(cache.get(&key).data, Some(json!([{"id": 1}, {"id": 2}])));

    delete.mutate(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    delete.poll();
    assert!(delete.is_success());
    assert_eq!(delete.result(), Some(&1));
    assert_eq!(delete.progress(), Some(100));
    assert_eq!(cache.get(&key).data, Some(json!([{"id": 2}])));
  }

  #[tokio::test]
  async fn test_progress_mutation_reports() {
    let executor = MutationExecutor::new(QueryCache::new());
    let mut upload = use_progress_mutation(
      &executor,
      |size: u32, progress: ProgressReporter| async move {
        for step in 1..=5u8 {
          tokio::time::sleep(Duration::from_millis(10)).await;
          progress.report(step * 10);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(size)
      },
      |_: &u32| MutateOptions::new(),
    );

    upload.mutate(1024);
    tokio::time::sleep(Duration::from_millis(80)).await;
    upload.poll();
    assert!(upload.is_pending());
    assert_eq!(upload.progress(), Some(50));

    tokio::time::sleep(Duration::from_millis(100)).await;
    upload.poll();
    assert!(upload.is_success());
    assert_eq!(upload.progress(), Some(100));
  }
}
