//! Realtime change notifications.
//!
//! Every table has a dedicated `broadcast::Sender` that fans out row change
//! events to all active subscribers. Stores publish into the hub after a
//! mutation commits (in-memory) or when the database notifies (Postgres).

use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinHandle};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// Tables that emit change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Likes,
    Tags,
    ItemTags,
    FunFacts,
    Profiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Likes => "likes",
            Table::Tags => "tags",
            Table::ItemTags => "item_tags",
            Table::FunFacts => "fun_facts",
            Table::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "likes" => Ok(Table::Likes),
            "tags" => Ok(Table::Tags),
            "item_tags" => Ok(Table::ItemTags),
            "fun_facts" | "funfacts" => Ok(Table::FunFacts),
            "profiles" => Ok(Table::Profiles),
            other => Err(format!("unknown table '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Which change kinds a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventMask {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventMask {
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            EventMask::All => true,
            EventMask::Only(k) => *k == kind,
        }
    }
}

impl FromStr for EventMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "*" | "" | "all" => Ok(EventMask::All),
            "insert" => Ok(EventMask::Only(ChangeKind::Insert)),
            "update" => Ok(EventMask::Only(ChangeKind::Update)),
            "delete" => Ok(EventMask::Only(ChangeKind::Delete)),
            other => Err(format!("unknown event '{}'", other)),
        }
    }
}

/// A single row change.
///
/// `record` holds the new row for inserts/updates and is `None` for deletes
/// or when the source could not attach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        table: Table,
        kind: ChangeKind,
        id: Uuid,
        record: Option<serde_json::Value>,
    ) -> Self {
        Self {
            table,
            kind,
            id,
            record,
            at: Utc::now(),
        }
    }

    /// Build an event carrying the serialized row.
    pub fn with_row<T: Serialize>(table: Table, kind: ChangeKind, id: Uuid, row: &T) -> Self {
        Self::new(table, kind, id, serde_json::to_value(row).ok())
    }
}

/// Outcome of waiting on a [`Subscription`]
#[derive(Debug)]
pub enum Received {
    Event(Arc<ChangeEvent>),
    /// Events were dropped because the subscriber fell behind.
    Lagged(u64),
    Closed,
}

/// Receiving end of a table subscription; dropping it unsubscribes.
pub struct Subscription {
    table: Table,
    mask: EventMask,
    rx: broadcast::Receiver<Arc<ChangeEvent>>,
}

impl Subscription {
    pub fn table(&self) -> Table {
        self.table
    }

    /// Wait for the next event accepted by the mask.
    pub async fn recv(&mut self) -> Received {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.mask.accepts(event.kind) => return Received::Event(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Received::Lagged(n),
                Err(broadcast::error::RecvError::Closed) => return Received::Closed,
            }
        }
    }
}

/// Handle for a callback subscription created by [`ChangeHub::watch`].
///
/// The callback task stops on `unsubscribe()` or when the handle is dropped.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone, Default)]
pub struct ChangeHub {
    channels: Arc<DashMap<Table, broadcast::Sender<Arc<ChangeEvent>>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, table: Table) -> broadcast::Sender<Arc<ChangeEvent>> {
        self.channels
            .entry(table)
            .or_insert_with(|| {
                let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
                tx
            })
            .value()
            .clone()
    }

    pub fn subscribe(&self, table: Table, mask: EventMask) -> Subscription {
        Subscription {
            table,
            mask,
            rx: self.sender(table).subscribe(),
        }
    }

    /// Run `callback` for every accepted event until the handle goes away.
    ///
    /// A lagged subscriber gets `None` so it can resynchronize wholesale.
    pub fn watch<F>(&self, table: Table, mask: EventMask, mut callback: F) -> SubscriptionHandle
    where
        F: FnMut(Option<Arc<ChangeEvent>>) + Send + 'static,
    {
        let mut sub = self.subscribe(table, mask);
        let task = tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Received::Event(event) => callback(Some(event)),
                    Received::Lagged(n) => {
                        tracing::warn!(table = %table, skipped = n, "realtime subscriber lagged");
                        callback(None);
                    }
                    Received::Closed => break,
                }
            }
        });
        SubscriptionHandle { task }
    }

    /// Best-effort fan-out; having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        if let Some(tx) = self.channels.get(&event.table) {
            let _ = tx.send(Arc::new(event));
        }
    }

    pub fn subscriber_count(&self, table: Table) -> usize {
        self.channels
            .get(&table)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(table: Table, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent::new(table, kind, Uuid::new_v4(), None)
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_for_their_table_only() {
        let hub = ChangeHub::new();
        let mut likes = hub.subscribe(Table::Likes, EventMask::All);
        let mut tags = hub.subscribe(Table::Tags, EventMask::All);

        hub.publish(event(Table::Likes, ChangeKind::Insert));

        match likes.recv().await {
            Received::Event(e) => assert_eq!(e.table, Table::Likes),
            other => panic!("unexpected: {:?}", other),
        }
        let nothing = tokio::time::timeout(Duration::from_millis(20), tags.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_mask_filters_change_kinds() {
        let hub = ChangeHub::new();
        let mut deletes = hub.subscribe(Table::FunFacts, "delete".parse().unwrap());

        hub.publish(event(Table::FunFacts, ChangeKind::Insert));
        hub.publish(event(Table::FunFacts, ChangeKind::Delete));

        match deletes.recv().await {
            Received::Event(e) => assert_eq!(e.kind, ChangeKind::Delete),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watch_stops_after_unsubscribe() {
        let hub = ChangeHub::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = hub.watch(Table::Tags, EventMask::All, move |e| {
            let _ = tx.send(e.map(|e| e.kind));
        });

        hub.publish(event(Table::Tags, ChangeKind::Update));
        assert_eq!(rx.recv().await, Some(Some(ChangeKind::Update)));

        handle.unsubscribe();
        for _ in 0..10 {
            if hub.subscriber_count(Table::Tags) == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.subscriber_count(Table::Tags), 0);
    }

    #[test]
    fn test_event_mask_parsing() {
        assert_eq!("*".parse::<EventMask>().unwrap(), EventMask::All);
        assert_eq!(
            "INSERT".parse::<EventMask>().unwrap(),
            EventMask::Only(ChangeKind::Insert)
        );
        assert!("upsert".parse::<EventMask>().is_err());
    }
}
