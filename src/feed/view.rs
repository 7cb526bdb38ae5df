//! Observer-side merge of change events into a local list.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::{ChangeEvent, ChangeHandler, ChangeOp, ChangeRecord};
use crate::models::{CredentialResponse, RequestResponse};

/// A row type that can live in a [`LocalView`].
pub trait FeedRecord: Clone {
    fn id(&self) -> i64;
    fn updated_at(&self) -> DateTime<Utc>;
    fn from_change(record: &ChangeRecord) -> Option<Self>;
}

impl FeedRecord for RequestResponse {
    fn id(&self) -> i64 {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn from_change(record: &ChangeRecord) -> Option<Self> {
        match record {
            ChangeRecord::Request(r) => Some(r.clone()),
            ChangeRecord::Credential(_) => None,
        }
    }
}

impl FeedRecord for CredentialResponse {
    fn id(&self) -> i64 {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn from_change(record: &ChangeRecord) -> Option<Self> {
        match record {
            ChangeRecord::Credential(c) => Some(c.clone()),
            ChangeRecord::Request(_) => None,
        }
    }
}

/// Ordered local copy of one entity list, as an operator screen holds it.
///
/// Merge rules:
/// - insert appends unless the id is already present
/// - update replaces the entry with the same id, or appends it when absent;
///   a record whose `updated_at` is older than the local copy is dropped
/// - delete removes the entry with the same id
#[derive(Debug, Clone)]
pub struct LocalView<T> {
    items: Vec<T>,
}

pub type SharedView<T> = Arc<Mutex<LocalView<T>>>;

impl<T: FeedRecord> Default for LocalView<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: FeedRecord> LocalView<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the view from an initial fetch.
    pub fn from_snapshot(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn shared(self) -> SharedView<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    /// Returns whether the view changed.
    pub fn apply_insert(&mut self, record: T) -> bool {
        if self.position(record.id()).is_some() {
            return false;
        }
        self.items.push(record);
        true
    }

    pub fn apply_update(&mut self, record: T) -> bool {
        match self.position(record.id()) {
            Some(idx) => {
                if record.updated_at() < self.items[idx].updated_at() {
                    log::debug!(
                        "Dropping stale update for id {} ({} < {})",
                        record.id(),
                        record.updated_at(),
                        self.items[idx].updated_at()
                    );
                    return false;
                }
                self.items[idx] = record;
                true
            }
            None => {
                self.items.push(record);
                true
            }
        }
    }

    pub fn apply_delete(&mut self, id: i64) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.items.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Merges one event; events for other entity kinds are ignored.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        self.apply_op(event.op, &event.record)
    }

    fn apply_op(&mut self, op: ChangeOp, record: &ChangeRecord) -> bool {
        let Some(row) = T::from_change(record) else {
            return false;
        };
        match op {
            ChangeOp::Insert => self.apply_insert(row),
            ChangeOp::Update => self.apply_update(row),
            ChangeOp::Delete => self.apply_delete(row.id()),
        }
    }
}

impl<T: FeedRecord> ChangeHandler for SharedView<T> {
    fn on_insert(&mut self, record: &ChangeRecord) {
        lock(self).apply_op(ChangeOp::Insert, record);
    }

    fn on_update(&mut self, record: &ChangeRecord) {
        lock(self).apply_op(ChangeOp::Update, record);
    }

    fn on_delete(&mut self, record: &ChangeRecord) {
        lock(self).apply_op(ChangeOp::Delete, record);
    }
}

fn lock<T>(view: &SharedView<T>) -> std::sync::MutexGuard<'_, LocalView<T>> {
    view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
