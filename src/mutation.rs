//! Write operations against the cache: optimistic updates, rollback and
//! settle-time invalidation.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheSnapshot, QueryCache, QueryKey};
use crate::error::QueryError;

enum Updater {
  /// Write whatever the closure returns, loaded or not
  Write(Box<dyn FnOnce(Option<&Value>) -> Value + Send>),
  /// Patch data already in the cache, skip keys that never loaded
  Patch(Box<dyn FnOnce(&Value) -> Value + Send>),
}
type Merger<R> = Box<dyn Fn(Option<&Value>, &R) -> Value + Send + Sync>;
type SettleHook<R> = Box<dyn FnOnce(&Result<R, QueryError>) + Send>;

/// Lifecycle of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
  Idle,
  Pending,
  Success,
  Error,
}

/// Book-keeping for one invocation, visible through
/// [`MutationExecutor::pending`] until it settles.
#[derive(Debug, Clone)]
pub struct MutationRecord {
  pub id: u64,
  pub status: MutationStatus,
  /// Keys patched optimistically
  pub keys: Vec<QueryKey>,
  pub started_at: Instant,
  pub(crate) rollback: Option<CacheSnapshot>,
}

impl MutationRecord {
  pub fn has_rollback(&self) -> bool {
    self.rollback.is_some()
  }
}

/// What a mutation does to the cache around the operation itself.
///
/// ```ignore
/// let options = MutateOptions::new()
///   .optimistic(QueryKey::new("cars"), move |cars| without_car(cars, 5))
///   .invalidates(QueryKey::new("cars"));
/// ```
pub struct MutateOptions<R> {
  optimistic: Vec<(QueryKey, Updater)>,
  invalidates: Vec<QueryKey>,
  merges: Vec<(QueryKey, Merger<R>)>,
  on_settle: Option<SettleHook<R>>,
}

impl<R> Default for MutateOptions<R> {
  fn default() -> Self {
    Self {
      optimistic: Vec::new(),
      invalidates: Vec::new(),
      merges: Vec::new(),
      on_settle: None,
    }
  }
}

impl<R> MutateOptions<R> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Patch `key` before the operation runs; undone if it fails.
  #[must_use]
  pub fn optimistic<F>(mut self, key: QueryKey, updater: F) -> Self
  where
    F: FnOnce(Option<&Value>) -> Value + Send + 'static,
  {
    self.optimistic.push((key, Updater::Write(Box::new(updater))));
    self
  }

  /// Like [`optimistic`](Self::optimistic), but leaves `key` alone when it
  /// holds no data yet.
  #[must_use]
  pub fn optimistic_patch<F>(mut self, key: QueryKey, patch: F) -> Self
  where
    F: FnOnce(&Value) -> Value + Send + 'static,
  {
    self.optimistic.push((key, Updater::Patch(Box::new(patch))));
    self
  }

  /// Mark `prefix` stale once the operation succeeds.
  #[must_use]
  pub fn invalidates(mut self, prefix: QueryKey) -> Self {
    self.invalidates.push(prefix);
    self
  }

  /// Write the confirmed result into `key`. Only used when no
  /// invalidations are declared.
  #[must_use]
  pub fn merge_into<F>(mut self, key: QueryKey, merge: F) -> Self
  where
    F: Fn(Option<&Value>, &R) -> Value + Send + Sync + 'static,
  {
    self.merges.push((key, Box::new(merge)));
    self
  }

  /// Run after the operation settles, whatever the outcome.
  #[must_use]
  pub fn on_settle<F>(mut self, hook: F) -> Self
  where
    F: FnOnce(&Result<R, QueryError>) + Send + 'static,
  {
    self.on_settle = Some(Box::new(hook));
    self
  }

  pub fn is_optimistic(&self) -> bool {
    !self.optimistic.is_empty()
  }
}

/// Progress sink handed to long-running operations.
///
/// Values are percentages, clamped to `0..=100` and never go backwards. A
/// reporter can be split so that several sub-operations share one overall
/// bar: sub-operation `i` of `n` reporting `p` moves the total to
/// `(i * 100 + p) / n`.
#[derive(Clone)]
pub struct ProgressReporter {
  tx: Arc<watch::Sender<u8>>,
  base: f64,
  span: f64,
}

impl ProgressReporter {
  pub fn new() -> (Self, watch::Receiver<u8>) {
    let (tx, rx) = watch::channel(0);
    (
      Self {
        tx: Arc::new(tx),
        base: 0.0,
        span: 100.0,
      },
      rx,
    )
  }

  /// Report `percent` of this reporter's share.
  pub fn report(&self, percent: u8) {
    let percent = f64::from(percent.min(100));
    let overall = (self.base + percent * self.span / 100.0).round().clamp(0.0, 100.0) as u8;
    self.tx.send_if_modified(|current| {
      if overall > *current {
        *current = overall;
        true
      } else {
        false
      }
    });
  }

  pub fn finish(&self) {
    self.report(100);
  }

  /// Reporter for sub-operation `index` out of `count`.
  pub fn scaled(&self, index: usize, count: usize) -> Self {
    let count = count.max(1) as f64;
    let span = self.span / count;
    Self {
      tx: Arc::clone(&self.tx),
      base: self.base + span * index as f64,
      span,
    }
  }

  pub fn current(&self) -> u8 {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<u8> {
    self.tx.subscribe()
  }
}

impl std::fmt::Debug for ProgressReporter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProgressReporter")
      .field("current", &self.current())
      .field("base", &self.base)
      .field("span", &self.span)
      .finish()
  }
}

struct Shared {
  cache: QueryCache,
  next_id: AtomicU64,
  records: Mutex<HashMap<u64, MutationRecord>>,
}

/// Runs mutations against a [`QueryCache`].
#[derive(Clone)]
pub struct MutationExecutor {
  shared: Arc<Shared>,
}

impl MutationExecutor {
  pub fn new(cache: QueryCache) -> Self {
    Self {
      shared: Arc::new(Shared {
        cache,
        next_id: AtomicU64::new(1),
        records: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.shared.cache
  }

  fn records(&self) -> MutexGuard<'_, HashMap<u64, MutationRecord>> {
    self
      .shared
      .records
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Mutations that have started but not yet settled.
  pub fn pending(&self) -> Vec<MutationRecord> {
    let mut records: Vec<_> = self.records().values().cloned().collect();
    records.sort_by_key(|r| r.id);
    records
  }

  /// Run `operation(args)` with the cache effects declared in `options`.
  ///
  /// 1. Optimistic patches: in-flight loads for the patched keys are
  ///    cancelled, their state snapshotted, then the patches applied.
  /// 2. The operation runs.
  /// 3. On success, declared prefixes are invalidated; without any, declared
  ///    merges write the result into the cache.
  /// 4. On failure, the snapshot is restored.
  /// 5. `on_settle` runs in both cases.
  ///
  /// If the returned future is dropped before the operation settles, the
  /// snapshot is restored as if the operation had failed.
  pub async fn mutate<A, R, F, Fut>(
    &self,
    operation: F,
    args: A,
    options: MutateOptions<R>,
  ) -> Result<R, QueryError>
  where
    F: FnOnce(A) -> Fut,
    Fut: Future<Output = Result<R, QueryError>>,
  {
    self.execute(move || operation(args), options).await
  }

  /// Like [`mutate`](Self::mutate), for operations that report progress.
  ///
  /// The reporter is finished (set to 100) when the operation succeeds.
  pub async fn mutate_with_progress<A, R, F, Fut>(
    &self,
    operation: F,
    args: A,
    progress: ProgressReporter,
    options: MutateOptions<R>,
  ) -> Result<R, QueryError>
  where
    F: FnOnce(A, ProgressReporter) -> Fut,
    Fut: Future<Output = Result<R, QueryError>>,
  {
    let reporter = progress.clone();
    let result = self
      .execute(move || operation(args, reporter), options)
      .await;
    if result.is_ok() {
      progress.finish();
    }
    result
  }

  async fn execute<R, F, Fut>(&self, start: F, options: MutateOptions<R>) -> Result<R, QueryError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, QueryError>>,
  {
    let MutateOptions {
      optimistic,
      invalidates,
      merges,
      on_settle,
    } = options;
    let cache = &self.shared.cache;

    let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
    let keys: Vec<QueryKey> = optimistic.iter().map(|(key, _)| key.clone()).collect();
    let rollback = if optimistic.is_empty() {
      None
    } else {
      for key in &keys {
        cache.cancel(key);
      }
      let snapshot = cache.snapshot(&keys);
      for (key, updater) in optimistic {
        match updater {
          Updater::Write(write) => {
            cache.set_data(&key, write);
          }
          Updater::Patch(patch) => {
            if cache.update_data(&key, patch).is_none() {
              debug!(id, key = %key, "no cached data to patch");
            }
          }
        }
      }
      Some(snapshot)
    };

    self.records().insert(
      id,
      MutationRecord {
        id,
        status: MutationStatus::Pending,
        keys,
        started_at: Instant::now(),
        rollback,
      },
    );
    debug!(id, "mutation started");

    let mut guard = PendingGuard {
      executor: self,
      id,
      armed: true,
    };
    let result = start().await;
    guard.armed = false;

    match &result {
      Ok(value) => {
        self.set_status(id, MutationStatus::Success);
        if invalidates.is_empty() {
          for (key, merge) in &merges {
            cache.set_data(key, |current| merge(current, value));
          }
        } else {
          for prefix in &invalidates {
            cache.invalidate(prefix);
          }
        }
        debug!(id, "mutation succeeded");
      }
      Err(err) => {
        self.set_status(id, MutationStatus::Error);
        warn!(id, error = %err, "mutation failed");
        self.roll_back(id);
      }
    }

    if let Some(hook) = on_settle {
      hook(&result);
    }
    self.records().remove(&id);
    result
  }

  fn set_status(&self, id: u64, status: MutationStatus) {
    if let Some(record) = self.records().get_mut(&id) {
      record.status = status;
    }
  }

  /// Restore the record's snapshot. Taking it out guarantees at most one
  /// restore per mutation.
  fn roll_back(&self, id: u64) {
    let snapshot = self
      .records()
      .get_mut(&id)
      .and_then(|record| record.rollback.take());
    if let Some(snapshot) = snapshot {
      warn!(id, keys = snapshot.len(), "rolling back optimistic update");
      self.shared.cache.restore(snapshot);
    }
  }
}

impl std::fmt::Debug for MutationExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MutationExecutor")
      .field("pending", &self.records().len())
      .finish_non_exhaustive()
  }
}

/// Rolls back and forgets a mutation whose future was dropped mid-flight.
struct PendingGuard<'a> {
  executor: &'a MutationExecutor,
  id: u64,
  armed: bool,
}

impl Drop for PendingGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      debug!(id = self.id, "mutation abandoned");
      self.executor.roll_back(self.id);
      self.executor.records().remove(&self.id);
    }
  }
}
