//! In-memory entry store backing [`QueryCache`](super::QueryCache).
//!
//! Everything here runs under the cache's single lock. Nothing in this
//! module awaits or calls listeners; changes that subscribers must see are
//! returned as [`Notification`]s and delivered after the lock is released.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::entry::{QueryEntry, QueryStatus};
use super::key::QueryKey;
use super::traits::Listener;
use crate::error::QueryError;

/// A load that several callers can await.
pub(crate) type SharedLoad = Shared<BoxFuture<'static, Result<Value, QueryError>>>;

pub(crate) struct InFlight {
  pub seq: u64,
  pub load: SharedLoad,
  pub abort: AbortHandle,
}

pub(crate) struct ListenerSlot {
  pub id: u64,
  pub active: Arc<AtomicBool>,
  /// Version of the newest notification handed to this listener
  pub delivered: Arc<AtomicU64>,
  pub listener: Listener,
}

impl ListenerSlot {
  pub fn new(id: u64, active: Arc<AtomicBool>, listener: Listener) -> Self {
    Self {
      id,
      active,
      delivered: Arc::new(AtomicU64::new(0)),
      listener,
    }
  }
}

/// Everything the cache tracks for one key.
pub(crate) struct Slot {
  pub entry: QueryEntry,
  pub in_flight: Option<InFlight>,
  /// Sequence number of the last write applied to `entry`
  pub applied_seq: u64,
  pub listeners: Vec<ListenerSlot>,
  /// When the last subscriber left (or the slot was created without one)
  pub idle_since: Option<Instant>,
  /// Bumped for every notification taken from this slot
  version: u64,
}

impl Slot {
  fn new(key: QueryKey, now: Instant) -> Self {
    Self {
      entry: QueryEntry::idle(key),
      in_flight: None,
      applied_seq: 0,
      listeners: Vec::new(),
      idle_since: Some(now),
      version: 0,
    }
  }

  /// Notification carrying the current entry, if anyone is listening.
  ///
  /// Each call is stamped with a higher version than the last, so a
  /// notification delivered after a newer one from the same slot is dropped.
  pub fn notification(&mut self) -> Option<Notification> {
    if self.listeners.is_empty() {
      return None;
    }
    self.version += 1;
    Some(Notification {
      version: self.version,
      entry: self.entry.clone(),
      listeners: self
        .listeners
        .iter()
        .map(|l| Recipient {
          active: Arc::clone(&l.active),
          delivered: Arc::clone(&l.delivered),
          listener: Arc::clone(&l.listener),
        })
        .collect(),
    })
  }

  /// Abort the in-flight load, if any, and fall back to the settled status.
  pub fn abort_in_flight(&mut self) -> bool {
    match self.in_flight.take() {
      Some(in_flight) => {
        in_flight.abort.abort();
        if self.entry.is_loading() {
          self.entry.status = self.entry.settled_status();
        }
        true
      }
      None => false,
    }
  }

  pub fn is_collectable(&self, now: Instant, gc_time: std::time::Duration) -> bool {
    self.entry.subscriber_count == 0
      && self.in_flight.is_none()
      && self
        .idle_since
        .is_some_and(|since| now.saturating_duration_since(since) >= gc_time)
  }
}

struct Recipient {
  active: Arc<AtomicBool>,
  delivered: Arc<AtomicU64>,
  listener: Listener,
}

/// Pending delivery of an entry to its listeners.
pub(crate) struct Notification {
  version: u64,
  entry: QueryEntry,
  listeners: Vec<Recipient>,
}

impl Notification {
  pub fn deliver(self) {
    for recipient in &self.listeners {
      // Unsubscribed between collection and delivery
      if !recipient.active.load(Ordering::Acquire) {
        continue;
      }
      // A newer state already reached this listener
      if recipient.delivered.fetch_max(self.version, Ordering::AcqRel) >= self.version {
        continue;
      }
      (recipient.listener)(&self.entry);
    }
  }
}

pub(crate) fn deliver_all(notifications: impl IntoIterator<Item = Notification>) {
  for notification in notifications {
    notification.deliver();
  }
}

#[derive(Default)]
pub(crate) struct EntryStore {
  slots: HashMap<QueryKey, Slot>,
  next_seq: u64,
  next_listener_id: u64,
}

impl EntryStore {
  pub fn next_seq(&mut self) -> u64 {
    self.next_seq += 1;
    self.next_seq
  }

  pub fn next_listener_id(&mut self) -> u64 {
    self.next_listener_id += 1;
    self.next_listener_id
  }

  /// Slot for `key`, created idle if unseen.
  pub fn slot_mut(&mut self, key: &QueryKey, now: Instant) -> &mut Slot {
    self
      .slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(key.clone(), now))
  }

  pub fn get_mut(&mut self, key: &QueryKey) -> Option<&mut Slot> {
    self.slots.get_mut(key)
  }

  pub fn get(&self, key: &QueryKey) -> Option<&Slot> {
    self.slots.get(key)
  }

  /// Slots whose key starts with `prefix`.
  pub fn matching_mut<'a>(
    &'a mut self,
    prefix: &'a QueryKey,
  ) -> impl Iterator<Item = &'a mut Slot> + 'a {
    self
      .slots
      .iter_mut()
      .filter(move |(key, _)| key.starts_with(prefix))
      .map(|(_, slot)| slot)
  }

  pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.slots.keys()
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  /// Forget entries under `prefix`, returning how many matched.
  ///
  /// Slots that still have listeners are reset to Idle instead of removed so
  /// their subscriptions keep working.
  pub fn remove_matching(&mut self, prefix: &QueryKey) -> (usize, Vec<Notification>) {
    let mut matched = 0;
    let mut notes = Vec::new();
    self.slots.retain(|key, slot| {
      if !key.starts_with(prefix) {
        return true;
      }
      matched += 1;
      if slot.listeners.is_empty() {
        return false;
      }
      slot.abort_in_flight();
      clear_entry(&mut slot.entry);
      notes.extend(slot.notification());
      true
    });
    (matched, notes)
  }

  /// Drop collectable slots, returning how many were removed.
  pub fn collect(&mut self, now: Instant, gc_time: std::time::Duration) -> usize {
    let before = self.slots.len();
    self
      .slots
      .retain(|_, slot| !slot.is_collectable(now, gc_time));
    before - self.slots.len()
  }
}

/// Saved cache state for a set of keys, used to roll back optimistic writes.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
  pub(crate) entries: Vec<(QueryKey, Option<SavedEntry>)>,
}

impl CacheSnapshot {
  pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.entries.iter().map(|(key, _)| key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SavedEntry {
  status: QueryStatus,
  data: Option<Value>,
  error: Option<QueryError>,
  updated_at: Option<Instant>,
  fetched_at: Option<DateTime<Utc>>,
}

impl SavedEntry {
  pub fn capture(entry: &QueryEntry) -> Self {
    Self {
      status: entry.status,
      data: entry.data.clone(),
      error: entry.error.clone(),
      updated_at: entry.updated_at,
      fetched_at: entry.fetched_at,
    }
  }

  pub fn apply(&self, entry: &mut QueryEntry) {
    entry.status = self.status;
    entry.data = self.data.clone();
    entry.error = self.error.clone();
    entry.updated_at = self.updated_at;
    entry.fetched_at = self.fetched_at;
  }
}

/// Reset an entry to the never-loaded state, keeping its subscribers.
pub(crate) fn clear_entry(entry: &mut QueryEntry) {
  entry.status = QueryStatus::Idle;
  entry.data = None;
  entry.error = None;
  entry.updated_at = None;
  entry.fetched_at = None;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;
  use std::time::Duration;

  #[test]
  fn test_slot_created_idle() {
    let mut store = EntryStore::default();
    let key = QueryKey::new("cars");
    let slot = store.slot_mut(&key, Instant::now());
    assert_eq!(slot.entry.status, QueryStatus::Idle);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_sequence_numbers_increase() {
    let mut store = EntryStore::default();
    let a = store.next_seq();
    let b = store.next_seq();
    assert!(b > a);
  }

  #[test]
  fn test_inactive_listener_not_called() {
    let mut store = EntryStore::default();
    let key = QueryKey::new("cars");
    let seen = Arc::new(Mutex::new(0));
    let active = Arc::new(AtomicBool::new(true));

    let seen_clone = Arc::clone(&seen);
    let slot = store.slot_mut(&key, Instant::now());
    slot.listeners.push(ListenerSlot::new(
      1,
      Arc::clone(&active),
      Arc::new(move |_| *seen_clone.lock().unwrap() += 1),
    ));

    let first = slot.notification().unwrap();
    let second = slot.notification().unwrap();
    first.deliver();
    active.store(false, Ordering::Release);
    second.deliver();
    assert_eq!(*seen.lock().unwrap(), 1);
  }

  #[test]
  fn test_older_notification_dropped_after_newer() {
    let mut store = EntryStore::default();
    let key = QueryKey::new("cars");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = Arc::clone(&seen);
    let slot = store.slot_mut(&key, Instant::now());
    slot.listeners.push(ListenerSlot::new(
      1,
      Arc::new(AtomicBool::new(true)),
      Arc::new(move |entry: &QueryEntry| seen_clone.lock().unwrap().push(entry.status)),
    ));

    slot.entry.status = QueryStatus::Loading;
    let loading = slot.notification().unwrap();
    slot.entry.write_success(json!(1), Instant::now());
    let done = slot.notification().unwrap();

    done.deliver();
    loading.deliver();
    assert_eq!(*seen.lock().unwrap(), vec![QueryStatus::Success]);
  }

  #[test]
  fn test_collect_respects_subscribers_and_age() {
    let mut store = EntryStore::default();
    let start = Instant::now();
    store.slot_mut(&QueryKey::new("old"), start);
    store.slot_mut(&QueryKey::new("watched"), start).entry.subscriber_count = 1;

    assert_eq!(store.collect(start, Duration::from_secs(10)), 0);
    assert_eq!(
      store.collect(start + Duration::from_secs(10), Duration::from_secs(10)),
      1
    );
    assert!(store.get(&QueryKey::new("watched")).is_some());
    assert!(store.get(&QueryKey::new("old")).is_none());
  }

  #[test]
  fn test_remove_matching_keeps_watched_slots() {
    let mut store = EntryStore::default();
    let now = Instant::now();
    store.slot_mut(&QueryKey::new("user").with(1), now);
    let watched = store.slot_mut(&QueryKey::new("user").with(2), now);
    watched.entry.write_success(json!({"id": 2}), now);
    watched
      .listeners
      .push(ListenerSlot::new(1, Arc::new(AtomicBool::new(true)), Arc::new(|_| {})));
    store.slot_mut(&QueryKey::new("users"), now);

    let (matched, notes) = store.remove_matching(&QueryKey::new("user"));
    assert_eq!(matched, 2);
    assert_eq!(notes.len(), 1);
    assert_eq!(store.len(), 2);
    let kept = store.get(&QueryKey::new("user").with(2)).unwrap();
    assert_eq!(kept.entry.status, QueryStatus::Idle);
    assert!(kept.entry.data.is_none());
  }

  #[test]
  fn test_saved_entry_round_trip() {
    let mut entry = QueryEntry::idle(QueryKey::new("cars"));
    entry.write_success(json!([1]), Instant::now());
    let saved = SavedEntry::capture(&entry);

    let before = entry.clone();
    entry.write_success(json!([]), Instant::now());
    saved.apply(&mut entry);
    assert_eq!(entry, before);
  }
}
