//! Row-level change feed for credentials and requests.
//!
//! Services publish an event after every committed write. Observers either
//! hold a raw `broadcast::Receiver` (the WebSocket session does) or register a
//! [`ChangeHandler`] through [`ChangeFeed::subscribe`]. Delivery is
//! at-most-once per observer; an observer that lags past the channel capacity
//! loses events and has to reload its view.

mod view;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{CredentialResponse, RequestResponse};

pub use view::{FeedRecord, LocalView, SharedView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Credentials,
    Requests,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Credentials => write!(f, "credentials"),
            EntityKind::Requests => write!(f, "requests"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Full row snapshot carried by an event (the last known row for deletes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChangeRecord {
    Credential(CredentialResponse),
    Request(RequestResponse),
}

impl ChangeRecord {
    pub fn entity(&self) -> EntityKind {
        match self {
            ChangeRecord::Credential(_) => EntityKind::Credentials,
            ChangeRecord::Request(_) => EntityKind::Requests,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            ChangeRecord::Credential(c) => c.id,
            ChangeRecord::Request(r) => r.id,
        }
    }
}

impl From<CredentialResponse> for ChangeRecord {
    fn from(value: CredentialResponse) -> Self {
        ChangeRecord::Credential(value)
    }
}

impl From<RequestResponse> for ChangeRecord {
    fn from(value: RequestResponse) -> Self {
        ChangeRecord::Request(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    pub record: ChangeRecord,
    pub emitted_at: DateTime<Utc>,
}

/// Callbacks invoked for events of one entity kind.
pub trait ChangeHandler {
    fn on_insert(&mut self, record: &ChangeRecord);
    fn on_update(&mut self, record: &ChangeRecord);
    fn on_delete(&mut self, record: &ChangeRecord);
}

/// Adapter turning three closures into a [`ChangeHandler`].
pub struct FnHandler<I, U, D> {
    pub on_insert: I,
    pub on_update: U,
    pub on_delete: D,
}

impl<I, U, D> ChangeHandler for FnHandler<I, U, D>
where
    I: FnMut(&ChangeRecord),
    U: FnMut(&ChangeRecord),
    D: FnMut(&ChangeRecord),
{
    fn on_insert(&mut self, record: &ChangeRecord) {
        (self.on_insert)(record)
    }

    fn on_update(&mut self, record: &ChangeRecord) {
        (self.on_update)(record)
    }

    fn on_delete(&mut self, record: &ChangeRecord) {
        (self.on_delete)(record)
    }
}

/// Live registration returned by [`ChangeFeed::subscribe`]; dropping it stops delivery.
pub struct Subscription {
    id: Uuid,
    entity: EntityKind,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        log::debug!("Feed subscription {} ({}) closed", self.id, self.entity);
        self.handle.abort();
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, op: ChangeOp, record: impl Into<ChangeRecord>) {
        let record = record.into();
        let event = ChangeEvent {
            entity: record.entity(),
            op,
            record,
            emitted_at: Utc::now(),
        };
        // 没有订阅者时 send 返回 Err，属于正常情况
        if let Ok(observers) = self.tx.send(event) {
            log::debug!("Change event delivered to {observers} observers");
        }
    }

    pub fn inserted(&self, record: impl Into<ChangeRecord>) {
        self.publish(ChangeOp::Insert, record)
    }

    pub fn updated(&self, record: impl Into<ChangeRecord>) {
        self.publish(ChangeOp::Update, record)
    }

    pub fn deleted(&self, record: impl Into<ChangeRecord>) {
        self.publish(ChangeOp::Delete, record)
    }

    /// Raw receiver for observers that drive their own loop.
    pub fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Registers `handler` for events of `entity`.
    ///
    /// Events published after this call returns are delivered in publish
    /// order. Must be called from within a tokio runtime.
    pub fn subscribe<H>(&self, entity: EntityKind, mut handler: H) -> Subscription
    where
        H: ChangeHandler + Send + 'static,
    {
        let id = Uuid::new_v4();
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.entity == entity => match event.op {
                        ChangeOp::Insert => handler.on_insert(&event.record),
                        ChangeOp::Update => handler.on_update(&event.record),
                        ChangeOp::Delete => handler.on_delete(&event.record),
                    },
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Feed subscription {id} lagged, {skipped} events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        log::debug!("Feed subscription {id} ({entity}) opened");
        Subscription { id, entity, handle }
    }

    pub fn subscribe_fn<I, U, D>(
        &self,
        entity: EntityKind,
        on_insert: I,
        on_update: U,
        on_delete: D,
    ) -> Subscription
    where
        I: FnMut(&ChangeRecord) + Send + 'static,
        U: FnMut(&ChangeRecord) + Send + 'static,
        D: FnMut(&ChangeRecord) + Send + 'static,
    {
        self.subscribe(
            entity,
            FnHandler {
                on_insert,
                on_update,
                on_delete,
            },
        )
    }
}
