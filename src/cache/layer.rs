//! The query cache: keyed entries, deduplicated loads, staleness and
//! invalidation.

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::config::{FetchOptions, QueryConfig, ResolvedOptions};
use super::entry::{QueryEntry, QueryStatus};
use super::key::QueryKey;
use super::storage::{
  clear_entry, deliver_all, CacheSnapshot, EntryStore, InFlight, ListenerSlot, Notification,
  SavedEntry, SharedLoad,
};
use super::traits::{CacheResult, Listener};
use crate::error::QueryError;

/// Boxed loader shape used where a concrete closure type can't be named.
pub type BoxLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, QueryError>> + Send + Sync>;

/// Adapt a loader producing a typed value into one producing JSON.
pub fn json_loader<T, F, Fut>(loader: F) -> BoxLoader
where
  T: Serialize + Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
  Arc::new(move || {
    let fut = loader();
    async move {
      let value = fut.await?;
      serde_json::to_value(value).map_err(QueryError::from)
    }
    .boxed()
  })
}

struct Inner {
  store: Mutex<EntryStore>,
  config: QueryConfig,
  invalidations: broadcast::Sender<QueryKey>,
}

/// Shared request-state cache.
///
/// Construct one per process and hand clones to every consumer; clones share
/// the same store. All state changes go through one internal lock that is
/// never held across an await or while listeners run.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

enum Plan {
  Cached(Value),
  Join(SharedLoad),
  Start(SharedLoad, Option<Notification>),
}

impl QueryCache {
  pub fn new() -> Self {
    Self::with_config(QueryConfig::default())
  }

  pub fn with_config(config: QueryConfig) -> Self {
    let (invalidations, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(Inner {
        store: Mutex::new(EntryStore::default()),
        config,
        invalidations,
      }),
    }
  }

  pub fn config(&self) -> &QueryConfig {
    &self.inner.config
  }

  fn store(&self) -> MutexGuard<'_, EntryStore> {
    self
      .inner
      .store
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Current entry for `key`, creating an idle one if unseen.
  pub fn get(&self, key: &QueryKey) -> QueryEntry {
    self.store().slot_mut(key, Instant::now()).entry.clone()
  }

  /// Cached payload decoded as `T`, if any.
  pub fn get_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<Result<T, QueryError>> {
    let store = self.store();
    store.get(key).and_then(|slot| slot.entry.data_as())
  }

  /// Keys currently held by the cache.
  pub fn keys(&self) -> Vec<QueryKey> {
    self.store().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.store().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Register `listener` for changes to `key`.
  ///
  /// The listener stops being called as soon as the returned
  /// [`Subscription`] is unsubscribed or dropped, even for changes that were
  /// already in the middle of being delivered.
  pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
  where
    F: Fn(&QueryEntry) + Send + Sync + 'static,
  {
    let active = Arc::new(AtomicBool::new(true));
    let listener: Listener = Arc::new(listener);

    let id = {
      let mut store = self.store();
      let id = store.next_listener_id();
      let slot = store.slot_mut(key, Instant::now());
      slot
        .listeners
        .push(ListenerSlot::new(id, Arc::clone(&active), listener));
      slot.entry.subscriber_count += 1;
      slot.idle_since = None;
      id
    };

    Subscription {
      cache: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
      active,
    }
  }

  /// Receive every key invalidated from now on.
  pub fn invalidations(&self) -> broadcast::Receiver<QueryKey> {
    self.inner.invalidations.subscribe()
  }

  /// Return data for `key`, loading it through `loader` when needed.
  ///
  /// 1. If a load for `key` is in flight, wait for it instead of starting another.
  /// 2. If the entry is successful and fresh, return it without calling `loader`.
  /// 3. Otherwise mark the entry loading and run `loader` (with retries).
  ///
  /// Failures are stored on the entry with previous data retained, and
  /// returned to every waiter.
  pub async fn fetch<F, Fut>(
    &self,
    key: &QueryKey,
    loader: F,
    options: &FetchOptions,
  ) -> Result<CacheResult<Value>, QueryError>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
  {
    let opts = options.resolve(&self.inner.config);

    let plan = {
      let now = Instant::now();
      let mut store = self.store();
      let slot = store.slot_mut(key, now);
      let joined = slot.in_flight.as_ref().map(|f| f.load.clone());
      let cached = if slot.entry.is_fresh(now, opts.stale_time) {
        slot.entry.data.clone()
      } else {
        None
      };

      match (joined, cached) {
        (Some(load), _) => Plan::Join(load),
        (None, Some(data)) => Plan::Cached(data),
        (None, None) => {
          let (load, loading) = self.begin_load(&mut store, key, loader, opts);
          Plan::Start(load, loading)
        }
      }
    };

    match plan {
      Plan::Cached(data) => {
        debug!(key = %key.fingerprint(), "cache hit");
        Ok(CacheResult::from_cache(data))
      }
      Plan::Join(load) => {
        debug!(key = %key.fingerprint(), "joining in-flight load");
        load.await.map(CacheResult::deduped)
      }
      Plan::Start(load, loading) => {
        deliver_all(loading);
        load.await.map(CacheResult::from_network)
      }
    }
  }

  /// Fetch and decode the payload as `T`.
  pub async fn fetch_as<T, F, Fut>(
    &self,
    key: &QueryKey,
    loader: F,
    options: &FetchOptions,
  ) -> Result<CacheResult<T>, QueryError>
  where
    T: DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
  {
    let result = self.fetch(key, loader, options).await?;
    let data = serde_json::from_value(result.data)?;
    Ok(CacheResult {
      data,
      source: result.source,
    })
  }

  /// Start a new load even if the entry is fresh or already loading.
  ///
  /// An older load still in flight keeps running; whichever result carries
  /// the higher sequence number wins when both settle.
  pub async fn refetch<F, Fut>(
    &self,
    key: &QueryKey,
    loader: F,
    options: &FetchOptions,
  ) -> Result<CacheResult<Value>, QueryError>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
  {
    let opts = options.resolve(&self.inner.config);
    let (load, loading) = {
      let mut store = self.store();
      self.begin_load(&mut store, key, loader, opts)
    };
    deliver_all(loading);
    load.await.map(CacheResult::from_network)
  }

  /// Register a load for `key` and spawn it. Called with the lock held.
  ///
  /// Returns the shared load and the Loading notification, which the caller
  /// delivers once the lock is released.
  fn begin_load<F, Fut>(
    &self,
    store: &mut EntryStore,
    key: &QueryKey,
    loader: F,
    opts: ResolvedOptions,
  ) -> (SharedLoad, Option<Notification>)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
  {
    let seq = store.next_seq();
    debug!(key = %key.fingerprint(), seq, "starting load");

    let slot = store.slot_mut(key, Instant::now());
    slot.entry.status = QueryStatus::Loading;
    let loading = slot.notification();

    // The task settles the entry itself, so a caller that stops waiting or a
    // loader that panics cannot leave the entry stuck in Loading.
    let cache = self.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let result = AssertUnwindSafe(run_loader(&loader, opts))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
          let message = panic_message(panic.as_ref());
          error!(key = %task_key.fingerprint(), seq, %message, "loader panicked");
          Err(QueryError::Network(format!("loader panicked: {message}")))
        });
      cache.settle(&task_key, seq, result.clone());
      result
    });
    let abort = handle.abort_handle();
    let load = async move { handle.await.unwrap_or(Err(QueryError::Cancelled)) }
      .boxed()
      .shared();

    slot.in_flight = Some(InFlight {
      seq,
      load: load.clone(),
      abort,
    });
    (load, loading)
  }

  /// Apply a finished load, unless a newer write already landed.
  fn settle(&self, key: &QueryKey, seq: u64, result: Result<Value, QueryError>) {
    let note = {
      let mut store = self.store();
      let Some(slot) = store.get_mut(key) else {
        return;
      };
      if slot.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
        slot.in_flight = None;
      }

      if seq <= slot.applied_seq {
        debug!(key = %key.fingerprint(), seq, applied = slot.applied_seq, "discarding superseded result");
        if slot.in_flight.is_none() && slot.entry.is_loading() {
          slot.entry.status = slot.entry.settled_status();
          slot.notification()
        } else {
          None
        }
      } else {
        slot.applied_seq = seq;
        match result {
          Ok(data) => slot.entry.write_success(data, Instant::now()),
          Err(err) => {
            warn!(key = %key.fingerprint(), error = %err, "load failed");
            slot.entry.write_error(err);
          }
        }
        // A forced refetch started after this one is still running.
        if slot.in_flight.is_some() {
          slot.entry.status = QueryStatus::Loading;
        }
        slot.notification()
      }
    };

    if let Some(note) = note {
      note.deliver();
    }
  }

  /// Mark every entry under `prefix` stale without dropping its data.
  ///
  /// Returns how many entries matched. Bindings watching a matching key
  /// reload on their next poll.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let (keys, notes) = {
      let mut store = self.store();
      let mut keys = Vec::new();
      let mut notes = Vec::new();
      for slot in store.matching_mut(prefix) {
        slot.entry.updated_at = None;
        keys.push(slot.entry.key.clone());
        notes.extend(slot.notification());
      }
      (keys, notes)
    };

    debug!(prefix = %prefix, matched = keys.len(), "invalidated");
    for key in &keys {
      // No receivers is fine
      let _ = self.inner.invalidations.send(key.clone());
    }
    deliver_all(notes);
    keys.len()
  }

  /// Abort in-flight loads under `prefix`.
  ///
  /// Waiters of an aborted load receive [`QueryError::Cancelled`]; entries
  /// return to the status they had before the load started.
  pub fn cancel(&self, prefix: &QueryKey) -> usize {
    let (count, notes) = {
      let mut store = self.store();
      let mut count = 0;
      let mut notes = Vec::new();
      for slot in store.matching_mut(prefix) {
        if slot.abort_in_flight() {
          count += 1;
          notes.extend(slot.notification());
        }
      }
      (count, notes)
    };
    if count > 0 {
      debug!(prefix = %prefix, count, "cancelled in-flight loads");
    }
    deliver_all(notes);
    count
  }

  /// Drop entries under `prefix`, aborting their loads.
  ///
  /// Subscriptions stay valid; a later `get` or `fetch` starts from Idle.
  pub fn remove(&self, prefix: &QueryKey) -> usize {
    let (matched, notes) = {
      let mut store = self.store();
      for slot in store.matching_mut(prefix) {
        slot.abort_in_flight();
      }
      store.remove_matching(prefix)
    };
    debug!(prefix = %prefix, matched, "removed entries");
    deliver_all(notes);
    matched
  }

  /// Write data for `key` synchronously and mark it successful.
  ///
  /// The write takes a sequence number, so a load that started earlier and
  /// settles later does not overwrite it.
  pub fn set_data<F>(&self, key: &QueryKey, updater: F) -> QueryEntry
  where
    F: FnOnce(Option<&Value>) -> Value,
  {
    let (entry, note) = {
      let mut store = self.store();
      let seq = store.next_seq();
      let slot = store.slot_mut(key, Instant::now());
      let data = updater(slot.entry.data.as_ref());
      slot.applied_seq = seq;
      slot.entry.write_success(data, Instant::now());
      (slot.entry.clone(), slot.notification())
    };
    if let Some(note) = note {
      note.deliver();
    }
    entry
  }

  /// Like [`set_data`](Self::set_data), but only when `key` already holds
  /// data. Entries that never loaded are left untouched and `None` is
  /// returned.
  pub fn update_data<F>(&self, key: &QueryKey, updater: F) -> Option<QueryEntry>
  where
    F: FnOnce(&Value) -> Value,
  {
    let (entry, note) = {
      let mut store = self.store();
      let seq = store.next_seq();
      let slot = store.get_mut(key)?;
      let data = updater(slot.entry.data.as_ref()?);
      slot.applied_seq = seq;
      slot.entry.write_success(data, Instant::now());
      (slot.entry.clone(), slot.notification())
    };
    deliver_all(note);
    Some(entry)
  }

  /// Capture the current state of `keys`.
  pub fn snapshot(&self, keys: &[QueryKey]) -> CacheSnapshot {
    let store = self.store();
    CacheSnapshot {
      entries: keys
        .iter()
        .map(|key| {
          let saved = store.get(key).map(|slot| SavedEntry::capture(&slot.entry));
          (key.clone(), saved)
        })
        .collect(),
    }
  }

  /// Put `snapshot` back. Keys unknown at capture time are cleared.
  pub fn restore(&self, snapshot: CacheSnapshot) {
    let notes: Vec<Notification> = {
      let mut store = self.store();
      let mut notes = Vec::new();
      for (key, saved) in snapshot.entries {
        let seq = store.next_seq();
        let slot = store.slot_mut(&key, Instant::now());
        slot.applied_seq = seq;
        match saved {
          Some(saved) => saved.apply(&mut slot.entry),
          None => clear_entry(&mut slot.entry),
        }
        notes.extend(slot.notification());
      }
      notes
    };
    deliver_all(notes);
  }

  /// Remove entries that have had no subscribers for longer than `gc_time`.
  pub fn collect_garbage(&self) -> usize {
    let removed = self
      .store()
      .collect(Instant::now(), self.inner.config.gc_time);
    if removed > 0 {
      debug!(removed, "collected idle entries");
    }
    removed
  }

  /// Run [`collect_garbage`](Self::collect_garbage) every `every` until the
  /// cache is dropped.
  pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      interval.tick().await;
      loop {
        interval.tick().await;
        match weak.upgrade() {
          Some(inner) => {
            QueryCache { inner }.collect_garbage();
          }
          None => break,
        }
      }
    })
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for QueryCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryCache")
      .field("config", &self.inner.config)
      .field("entries", &self.len())
      .finish_non_exhaustive()
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  panic
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| panic.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_string())
}

async fn run_loader<F, Fut>(loader: &F, opts: ResolvedOptions) -> Result<Value, QueryError>
where
  F: Fn() -> Fut,
  Fut: Future<Output = Result<Value, QueryError>>,
{
  let mut attempt = 0;
  loop {
    let outcome = match opts.timeout {
      Some(limit) => tokio::time::timeout(limit, loader())
        .await
        .unwrap_or(Err(QueryError::Timeout(limit))),
      None => loader().await,
    };

    match outcome {
      Err(err) if attempt < opts.retry_count && err.is_retryable() => {
        attempt += 1;
        debug!(attempt, error = %err, "retrying load");
        tokio::time::sleep(opts.retry_delay).await;
      }
      outcome => return outcome,
    }
  }
}

/// Handle for a listener registered with [`QueryCache::subscribe`].
pub struct Subscription {
  cache: Weak<Inner>,
  key: QueryKey,
  id: u64,
  active: Arc<AtomicBool>,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }

  /// Stop receiving changes. Also happens on drop.
  pub fn unsubscribe(self) {}

  fn release(&mut self) {
    if !self.active.swap(false, Ordering::AcqRel) {
      return;
    }
    let Some(inner) = self.cache.upgrade() else {
      return;
    };
    let mut store = inner.store.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(slot) = store.get_mut(&self.key) {
      let before = slot.listeners.len();
      slot.listeners.retain(|l| l.id != self.id);
      if slot.listeners.len() < before {
        slot.entry.subscriber_count = slot.entry.subscriber_count.saturating_sub(1);
        if slot.entry.subscriber_count == 0 {
          slot.idle_since = Some(Instant::now());
        }
      }
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("active", &self.is_active())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use serde_json::json;
  use std::sync::atomic::AtomicUsize;

  fn counting_loader(
    calls: Arc<AtomicUsize>,
    value: Value,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<'static, Result<Value, QueryError>> + Clone + Send + Sync + 'static
  {
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      let value = value.clone();
      async move {
        tokio::time::sleep(delay).await;
        Ok(value)
      }
      .boxed()
    }
  }

  fn stale_after(ms: u64) -> QueryCache {
    QueryCache::with_config(QueryConfig::new(
      Duration::from_millis(ms),
      Duration::from_secs(60),
    ))
  }

  #[tokio::test]
  async fn test_get_creates_idle_entry() {
    let cache = QueryCache::new();
    let entry = cache.get(&QueryKey::new("cars"));
    assert_eq!(entry.status, QueryStatus::Idle);
    assert!(entry.data.is_none());
    assert_eq!(cache.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_fetches_share_one_load() {
    let cache = QueryCache::new();
    let key = QueryKey::new("cars");
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone(), json!([{"id": 1}]), Duration::from_millis(50));
    let opts = FetchOptions::default();

    let (a, b, c) = tokio::join!(
      cache.fetch(&key, loader.clone(), &opts),
      cache.fetch(&key, loader.clone(), &opts),
      cache.fetch(&key, loader, &opts),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let a = a.unwrap();
    assert_eq!(a.source, CacheSource::Network);
    assert_eq!(b.unwrap().source, CacheSource::Deduped);
    assert_eq!(c.unwrap().data, json!([{"id": 1}]));
    assert!(cache.get(&key).is_success());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cars_staleness_scenario() {
    let cache = stale_after(5000);
    let key = QueryKey::new("cars");
    let calls = Arc::new(AtomicUsize::new(0));
    let loader_a = counting_loader(calls.clone(), json!({"id": 1}), Duration::ZERO);
    let opts = FetchOptions::default();

    let first = cache.fetch(&key, loader_a.clone(), &opts).await.unwrap();
    assert_eq!(first.data, json!({"id": 1}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(1000)).await;
    let second = cache.fetch(&key, loader_a.clone(), &opts).await.unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, json!({"id": 1}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(5000)).await;
    let third = cache.fetch(&key, loader_a, &opts).await.unwrap();
    assert_eq!(third.source, CacheSource::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_forces_reload() {
    let cache = stale_after(60_000);
    let key = QueryKey::new("employees").with(json!({"page": 1}));
    let calls = Arc::new(AtomicUsize::new(0));
    let loader = counting_loader(calls.clone(), json!([]), Duration::ZERO);
    let opts = FetchOptions::default();

    cache.fetch(&key, loader.clone(), &opts).await.unwrap();
    cache.fetch(&key, loader.clone(), &opts).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(cache.invalidate(&QueryKey::new("employees")), 1);
    let entry = cache.get(&key);
    assert_eq!(entry.data, Some(json!([])), "invalidation keeps data");
    assert!(entry.updated_at.is_none());

    cache.fetch(&key, loader, &opts).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_broadcasts_matching_keys() {
    let cache = QueryCache::new();
    let mut rx = cache.invalidations();
    let users = QueryKey::new("users");
    let user = QueryKey::new("user").with(1);
    cache.set_data(&users, |_| json!([]));
    cache.set_data(&user, |_| json!({}));

    assert_eq!(cache.invalidate(&QueryKey::new("users")), 1);
    assert_eq!(rx.try_recv().unwrap(), users);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_failure_keeps_previous_data() {
    let cache = QueryCache::new();
    let key = QueryKey::new("cars");
    cache.set_data(&key, |_| json!([1, 2, 3]));

    let err = cache
      .fetch(
        &key,
        || async { Err(QueryError::Network("offline".into())) },
        &FetchOptions::default(),
      )
      .await
      .unwrap_err();

    assert_eq!(err, QueryError::Network("offline".into()));
    let entry = cache.get(&key);
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.data, Some(json!([1, 2, 3])));
    assert_eq!(entry.error, Some(err));
  }

  #[tokio::test(start_paused = true)]
  async fn test_older_result_does_not_overwrite_newer() {
    let cache = QueryCache::new();
    let key = QueryKey::new("posts");
    let opts = FetchOptions::default();

    let slow = cache.fetch(
      &key,
      || async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!("old"))
      },
      &opts,
    );
    let fast = cache.refetch(
      &key,
      || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!("new"))
      },
      &opts,
    );

    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow.unwrap().data, json!("old"));
    assert_eq!(fast.unwrap().data, json!("new"));

    let entry = cache.get(&key);
    assert_eq!(entry.data, Some(json!("new")));
    assert_eq!(entry.status, QueryStatus::Success);
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_data_wins_over_earlier_load() {
    let cache = QueryCache::new();
    let key = QueryKey::new("users");

    let opts = FetchOptions::default();
    let load = cache.fetch(
      &key,
      || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!(["server"]))
      },
      &opts,
    );
    let write = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cache.set_data(&key, |_| json!(["local"]));
    };
    let (loaded, ()) = tokio::join!(load, write);
    assert_eq!(loaded.unwrap().data, json!(["server"]));
    assert_eq!(cache.get(&key).data, Some(json!(["local"])));
    assert!(cache.get(&key).is_success());
  }

  #[tokio::test]
  async fn test_listeners_see_loading_then_success() {
    let cache = QueryCache::new();
    let key = QueryKey::new("cars");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _sub = cache.subscribe(&key, move |entry| {
      seen_clone.lock().unwrap().push(entry.status);
    });

    cache
      .fetch(&key, || async { Ok(json!(1)) }, &FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(
      *seen.lock().unwrap(),
      vec![QueryStatus::Loading, QueryStatus::Success]
    );
    assert_eq!(cache.get(&key).subscriber_count, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loading_not_redelivered_after_local_write() {
    let cache = QueryCache::new();
    let key = QueryKey::new("users");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _sub = cache.subscribe(&key, move |entry| {
      seen_clone.lock().unwrap().push(entry.status);
    });

    // Start the load and stop waiting before its task has run
    let started = cache
      .fetch(
        &key,
        || async {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok(json!(["server"]))
        },
        &FetchOptions::default(),
      )
      .now_or_never();
    assert!(started.is_none());
    cache.set_data(&key, |_| json!(["local"]));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let entry = cache.get(&key);
    assert!(entry.is_success());
    assert_eq!(entry.data, Some(json!(["local"])));
    assert_eq!(
      *seen.lock().unwrap(),
      vec![QueryStatus::Loading, QueryStatus::Success]
    );
  }

  async fn exploding_loader() -> Result<Value, QueryError> {
    panic!("loader exploded")
  }

  #[tokio::test]
  async fn test_panicking_loader_settles_entry() {
    let cache = QueryCache::new();
    let key = QueryKey::new("cars");
    let opts = FetchOptions::default().retry(0, Duration::ZERO);

    let err = cache.fetch(&key, exploding_loader, &opts).await.unwrap_err();
    assert!(matches!(&err, QueryError::Network(msg) if msg.contains("loader exploded")));
    let entry = cache.get(&key);
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.error, Some(err));

    // The key is not wedged on the dead load
    let loaded = cache
      .fetch(&key, || async { Ok(json!([1])) }, &opts)
      .await
      .unwrap();
    assert_eq!(loaded.source, CacheSource::Network);
    assert!(cache.get(&key).is_success());
  }

  #[tokio::test(start_paused = true)]
  async fn test_unsubscribed_listener_not_called_on_resolution() {
    let cache = QueryCache::new();
    let key = QueryKey::new("cars");
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let sub = cache.subscribe(&key, move |_| {
      calls_clone.fetch_add(1, Ordering::SeqCst);
    });

    let opts = FetchOptions::default();
    let fetch = cache.fetch(
      &key,
      || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!("done"))
      },
      &opts,
    );
    let leave = async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      sub.unsubscribe();
    };
    let (result, ()) = tokio::join!(fetch, leave);

    assert_eq!(result.unwrap().data, json!("done"));
    // Only the Loading broadcast reached the listener
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let entry = cache.get(&key);
    assert_eq!(entry.subscriber_count, 0);
    assert_eq!(entry.data, Some(json!("done")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_on_retryable_error() {
    let cache = QueryCache::with_config(
      QueryConfig::default().with_retry(2, Duration::from_millis(100)),
    );
    let key = QueryKey::new("flaky");
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let loader = move || {
      let n = calls_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(QueryError::Http {
            status: 503,
            message: "busy".into(),
          })
        } else {
          Ok(json!("ok"))
        }
      }
    };

    let result = cache.fetch(&key, loader, &FetchOptions::default()).await;
    assert_eq!(result.unwrap().data, json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_no_retry_on_not_found() {
    let cache = QueryCache::with_config(QueryConfig::default().with_retry(3, Duration::ZERO));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let result = cache
      .fetch(
        &QueryKey::new("employee").with(99),
        move || {
          calls_clone.fetch_add(1, Ordering::SeqCst);
          async { Err(QueryError::NotFound("employee 99".into())) }
        },
        &FetchOptions::default(),
      )
      .await;
    assert!(matches!(result, Err(QueryError::NotFound(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_is_ordinary_failure() {
    let cache = QueryCache::new();
    let key = QueryKey::new("slow");
    let result = cache
      .fetch(
        &key,
        || async {
          tokio::time::sleep(Duration::from_secs(10)).await;
          Ok(json!(1))
        },
        &FetchOptions::default().timeout(Duration::from_secs(1)),
      )
      .await;
    assert_eq!(
      result.unwrap_err(),
      QueryError::Timeout(Duration::from_secs(1))
    );
    assert!(cache.get(&key).is_error());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_restores_previous_status() {
    let cache = QueryCache::new();
    let key = QueryKey::new("users");
    cache.set_data(&key, |_| json!(["a"]));
    cache.invalidate(&key);

    let opts = FetchOptions::default();
    let fetch = cache.fetch(
      &key,
      || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(json!(["b"]))
      },
      &opts,
    );
    let cancel = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      assert!(cache.get(&key).is_loading());
      cache.cancel(&QueryKey::new("users"))
    };
    let (result, cancelled) = tokio::join!(fetch, cancel);

    assert_eq!(cancelled, 1);
    assert_eq!(result.unwrap_err(), QueryError::Cancelled);
    let entry = cache.get(&key);
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(json!(["a"])));
  }

  #[tokio::test(start_paused = true)]
  async fn test_gc_removes_only_idle_entries() {
    let cache = QueryCache::with_config(QueryConfig::new(
      Duration::ZERO,
      Duration::from_secs(30),
    ));
    let watched = QueryKey::new("watched");
    let dropped = QueryKey::new("dropped");
    let _sub = cache.subscribe(&watched, |_| {});
    let sub = cache.subscribe(&dropped, |_| {});
    cache.set_data(&dropped, |_| json!(1));
    drop(sub);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(cache.collect_garbage(), 0);

    tokio::time::advance(Duration::from_secs(25)).await;
    assert_eq!(cache.collect_garbage(), 1);
    assert_eq!(cache.keys(), vec![watched]);
  }

  #[tokio::test]
  async fn test_snapshot_restore_round_trip() {
    let cache = QueryCache::new();
    let cars = QueryKey::new("cars");
    let unseen = QueryKey::new("never");
    cache.set_data(&cars, |_| json!([1, 2]));
    let before_cars = cache.get(&cars);

    let snapshot = cache.snapshot(&[cars.clone(), unseen.clone()]);
    cache.set_data(&cars, |_| json!([]));
    cache.set_data(&unseen, |_| json!("x"));
    cache.restore(snapshot);

    assert_eq!(cache.get(&cars), before_cars);
    let unseen_entry = cache.get(&unseen);
    assert_eq!(unseen_entry.status, QueryStatus::Idle);
    assert!(unseen_entry.data.is_none());
  }

  #[tokio::test]
  async fn test_fetch_as_decodes() {
    let cache = QueryCache::new();
    let key = QueryKey::new("ids");
    let loader = json_loader(|| async { Ok::<_, QueryError>(vec![3u32, 4]) });
    let result: CacheResult<Vec<u32>> = cache
      .fetch_as(&key, move || loader(), &FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(result.data, vec![3, 4]);
    assert_eq!(cache.get_data::<Vec<u32>>(&key), Some(Ok(vec![3, 4])));
  }
}
