//! Live lists: a fetched collection kept current by realtime change events.
//!
//! A [`LiveList`] subscribes to its tables before the first read, so no
//! change committed between the read and the subscription is missed. Events
//! carrying a decodable row are applied as patches keyed by id; anything else
//! (a missing or foreign record, a related table, a lagged subscription)
//! triggers a full refetch.

use std::{cmp::Ordering, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::{
    sync::{mpsc, watch, RwLock},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::db::models::{FunFact, LikeItem, LikeKind, LikeWithTags, ListOrder, Tag, TagWithCount};
use crate::db::Store;
use crate::error::StoreResult;
use crate::realtime::{ChangeEvent, ChangeHub, ChangeKind, EventMask, SubscriptionHandle, Table};

/// A row that can live in a [`LiveList`].
pub trait Record: Clone + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn sort_name(&self) -> &str;
}

impl Record for LikeItem {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_name(&self) -> &str {
        &self.item_name
    }
}

impl Record for LikeWithTags {
    fn id(&self) -> Uuid {
        self.like.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.like.created_at
    }
    fn sort_name(&self) -> &str {
        &self.like.item_name
    }
}

impl Record for Tag {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_name(&self) -> &str {
        &self.name
    }
}

impl Record for TagWithCount {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_name(&self) -> &str {
        &self.name
    }
}

impl Record for FunFact {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_name(&self) -> &str {
        &self.title
    }
}

/// Where a live list reads from and which tables it follows.
#[async_trait]
pub trait ListSource<T>: Send + Sync + 'static {
    fn hub(&self) -> ChangeHub;

    /// Table whose rows make up the list.
    fn table(&self) -> Table;

    /// Tables to follow; changes outside [`ListSource::table`] cause a refetch.
    fn watches(&self) -> Vec<Table> {
        vec![self.table()]
    }

    async fn fetch(&self) -> StoreResult<Vec<T>>;
}

pub struct LikesSource {
    store: Arc<dyn Store>,
    kind: LikeKind,
    order: ListOrder,
}

impl LikesSource {
    pub fn new(store: Arc<dyn Store>, kind: LikeKind, order: ListOrder) -> Self {
        Self { store, kind, order }
    }
}

#[async_trait]
impl ListSource<LikeWithTags> for LikesSource {
    fn hub(&self) -> ChangeHub {
        self.store.changes().clone()
    }

    fn table(&self) -> Table {
        Table::Likes
    }

    fn watches(&self) -> Vec<Table> {
        vec![Table::Likes, Table::ItemTags]
    }

    async fn fetch(&self) -> StoreResult<Vec<LikeWithTags>> {
        self.store.list_likes(self.kind, self.order).await
    }
}

pub struct TagsSource {
    store: Arc<dyn Store>,
    order: ListOrder,
}

impl TagsSource {
    pub fn new(store: Arc<dyn Store>, order: ListOrder) -> Self {
        Self { store, order }
    }
}

#[async_trait]
impl ListSource<TagWithCount> for TagsSource {
    fn hub(&self) -> ChangeHub {
        self.store.changes().clone()
    }

    fn table(&self) -> Table {
        Table::Tags
    }

    fn watches(&self) -> Vec<Table> {
        vec![Table::Tags, Table::ItemTags]
    }

    async fn fetch(&self) -> StoreResult<Vec<TagWithCount>> {
        self.store.list_tags(self.order).await
    }
}

pub struct FunFactsSource {
    store: Arc<dyn Store>,
    order: ListOrder,
}

impl FunFactsSource {
    pub fn new(store: Arc<dyn Store>, order: ListOrder) -> Self {
        Self { store, order }
    }
}

#[async_trait]
impl ListSource<FunFact> for FunFactsSource {
    fn hub(&self) -> ChangeHub {
        self.store.changes().clone()
    }

    fn table(&self) -> Table {
        Table::FunFacts
    }

    async fn fetch(&self) -> StoreResult<Vec<FunFact>> {
        self.store.list_fun_facts(self.order).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Shown before the store confirmed the write.
    Pending,
    Committed,
    /// The write was rejected; kept until discarded.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub row: T,
    pub state: EntryState,
    pub client_id: Option<Uuid>,
}

impl<T> Entry<T> {
    fn committed(row: T) -> Self {
        Self {
            row,
            state: EntryState::Committed,
            client_id: None,
        }
    }
}

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct ListState<T> {
    entries: Vec<Entry<T>>,
    loading: bool,
}

struct Shared<T> {
    state: RwLock<ListState<T>>,
    updates: watch::Sender<u64>,
    filter: Filter<T>,
    order: ListOrder,
}

fn compare<T: Record>(order: ListOrder, a: &T, b: &T) -> Ordering {
    match order {
        ListOrder::Newest => b.created_at().cmp(&a.created_at()),
        ListOrder::Oldest => a.created_at().cmp(&b.created_at()),
        ListOrder::Name => a
            .sort_name()
            .to_lowercase()
            .cmp(&b.sort_name().to_lowercase()),
    }
}

impl<T: Record> Shared<T> {
    fn notify(&self) {
        self.updates.send_modify(|version| *version += 1);
    }

    fn sort(&self, entries: &mut [Entry<T>]) {
        entries.sort_by(|a, b| compare(self.order, &a.row, &b.row));
    }

    async fn refetch(&self, source: &dyn ListSource<T>) {
        match source.fetch().await {
            Ok(rows) => {
                let mut state = self.state.write().await;
                let mut entries: Vec<Entry<T>> = rows
                    .into_iter()
                    .filter(|row| (self.filter)(row))
                    .map(Entry::committed)
                    .collect();
                let fetched: Vec<Uuid> = entries.iter().map(|e| e.row.id()).collect();
                entries.extend(state.entries.drain(..).filter(|e| {
                    e.state != EntryState::Committed && !fetched.contains(&e.row.id())
                }));
                self.sort(&mut entries);
                state.entries = entries;
                state.loading = false;
            }
            Err(e) => {
                tracing::error!(table = %source.table(), error = %e, "live list refetch failed");
                self.state.write().await.loading = false;
            }
        }
        self.notify();
    }

    /// Apply one event in place; returns `false` when a refetch is needed.
    async fn apply(&self, event: &ChangeEvent, table: Table) -> bool {
        if event.table != table {
            return false;
        }

        let mut state = self.state.write().await;
        match event.kind {
            ChangeKind::Delete => {
                state.entries.retain(|e| e.row.id() != event.id);
            }
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(row) = event
                    .record
                    .clone()
                    .and_then(|value| serde_json::from_value::<T>(value).ok())
                else {
                    return false;
                };

                if !(self.filter)(&row) {
                    state.entries.retain(|e| e.row.id() != event.id);
                } else if let Some(existing) =
                    state.entries.iter_mut().find(|e| e.row.id() == event.id)
                {
                    existing.row = row;
                    existing.state = EntryState::Committed;
                } else {
                    state.entries.push(Entry::committed(row));
                }
                self.sort(&mut state.entries);
            }
        }
        drop(state);

        self.notify();
        true
    }
}

/// A list that follows realtime changes until dropped.
pub struct LiveList<T: Record> {
    shared: Arc<Shared<T>>,
    source: Arc<dyn ListSource<T>>,
    driver: JoinHandle<()>,
    _subscriptions: Vec<SubscriptionHandle>,
}

impl<T: Record> LiveList<T> {
    pub fn new<S: ListSource<T>>(source: S, order: ListOrder) -> Self {
        Self::with_filter(source, order, |_: &T| true)
    }

    /// Only rows accepted by `filter` are kept, including rows arriving
    /// through realtime patches.
    pub fn with_filter<S, F>(source: S, order: ListOrder, filter: F) -> Self
    where
        S: ListSource<T>,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let (updates, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: RwLock::new(ListState {
                entries: Vec::new(),
                loading: true,
            }),
            updates,
            filter: Arc::new(filter),
            order,
        });
        let source: Arc<dyn ListSource<T>> = Arc::new(source);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = source.hub();
        let subscriptions = source
            .watches()
            .into_iter()
            .map(|table| {
                let tx = tx.clone();
                hub.watch(table, EventMask::All, move |event| {
                    let _ = tx.send(event);
                })
            })
            .collect();

        let driver = {
            let shared = shared.clone();
            let source = source.clone();
            tokio::spawn(async move {
                shared.refetch(source.as_ref()).await;
                while let Some(event) = rx.recv().await {
                    let patched = match event {
                        Some(event) => shared.apply(&event, source.table()).await,
                        None => false,
                    };
                    if !patched {
                        shared.refetch(source.as_ref()).await;
                    }
                }
            })
        };

        Self {
            shared,
            source,
            driver,
            _subscriptions: subscriptions,
        }
    }

    /// Receiver bumped after every change to the list.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    pub async fn is_loading(&self) -> bool {
        self.shared.state.read().await.loading
    }

    /// True once loaded with nothing to show.
    pub async fn is_empty(&self) -> bool {
        let state = self.shared.state.read().await;
        !state.loading && state.entries.is_empty()
    }

    pub async fn entries(&self) -> Vec<Entry<T>> {
        self.shared.state.read().await.entries.clone()
    }

    /// Rows in display order, excluding failed optimistic entries.
    pub async fn items(&self) -> Vec<T> {
        self.shared
            .state
            .read()
            .await
            .entries
            .iter()
            .filter(|e| e.state != EntryState::Failed)
            .map(|e| e.row.clone())
            .collect()
    }

    pub async fn refresh(&self) {
        self.shared.refetch(self.source.as_ref()).await;
    }

    /// Show `row` before the write completes; returns its client id.
    pub async fn insert_optimistic(&self, row: T) -> Uuid {
        let client_id = Uuid::new_v4();
        let mut state = self.shared.state.write().await;
        state.entries.push(Entry {
            row,
            state: EntryState::Pending,
            client_id: Some(client_id),
        });
        self.shared.sort(&mut state.entries);
        drop(state);

        self.shared.notify();
        client_id
    }

    /// Replace a pending entry with the stored row, dropping any copy of it
    /// that realtime already delivered.
    pub async fn confirm(&self, client_id: Uuid, row: T) {
        let mut state = self.shared.state.write().await;
        let id = row.id();
        state
            .entries
            .retain(|e| e.client_id == Some(client_id) || e.row.id() != id);

        let keep = (self.shared.filter)(&row);
        if let Some(pos) = state
            .entries
            .iter()
            .position(|e| e.client_id == Some(client_id))
        {
            if keep {
                state.entries[pos] = Entry::committed(row);
            } else {
                state.entries.remove(pos);
            }
        } else if keep {
            state.entries.push(Entry::committed(row));
        }
        self.shared.sort(&mut state.entries);
        drop(state);

        self.shared.notify();
    }

    pub async fn reject(&self, client_id: Uuid) {
        let mut state = self.shared.state.write().await;
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.client_id == Some(client_id))
        {
            entry.state = EntryState::Failed;
        }
        drop(state);

        self.shared.notify();
    }

    pub async fn discard_failed(&self) {
        self.shared
            .state
            .write()
            .await
            .entries
            .retain(|e| e.state != EntryState::Failed);
        self.shared.notify();
    }
}

impl LiveList<LikeWithTags> {
    /// Likes or dislikes in `order`, following inserts, edits and deletes.
    pub fn likes(store: Arc<dyn Store>, kind: LikeKind, order: ListOrder) -> Self {
        Self::with_filter(LikesSource::new(store, kind, order), order, move |row| {
            kind.matches(&row.like)
        })
    }
}

impl<T: Record> Drop for LiveList<T> {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewFunFact, NewLikeItem, UpdateLikeItem};
    use crate::db::MemoryStore;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Mutex;
    use std::time::Duration;

    async fn wait_until<T, F>(list: &LiveList<T>, pred: F)
    where
        T: Record,
        F: Fn(&[Entry<T>]) -> bool,
    {
        let mut updates = list.updates();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !list.is_loading().await && pred(&list.entries().await) {
                    return;
                }
                if updates.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .expect("list did not reach the expected state");
    }

    fn new_like(name: &str, is_like: bool) -> NewLikeItem {
        NewLikeItem {
            item_name: name.to_string(),
            description: None,
            is_like,
        }
    }

    fn fact(title: &str) -> FunFact {
        FunFact {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }

    struct FakeSource {
        hub: ChangeHub,
        rows: Mutex<Vec<FunFact>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ListSource<FunFact> for Arc<FakeSource> {
        fn hub(&self) -> ChangeHub {
            self.hub.clone()
        }

        fn table(&self) -> Table {
            Table::FunFacts
        }

        async fn fetch(&self) -> StoreResult<Vec<FunFact>> {
            if self.fail.load(AtomicOrdering::SeqCst) {
                return Err(StoreError::Unavailable("offline".to_string()));
            }
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn fake_source(rows: Vec<FunFact>) -> Arc<FakeSource> {
        Arc::new(FakeSource {
            hub: ChangeHub::new(),
            rows: Mutex::new(rows),
            fail: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_two_lists_observe_the_same_insert() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let first = LiveList::likes(store.clone(), LikeKind::Like, ListOrder::Newest);
        let second = LiveList::likes(store.clone(), LikeKind::All, ListOrder::Newest);
        wait_until(&first, |_| true).await;
        wait_until(&second, |_| true).await;
        assert!(first.is_empty().await);

        let created = store.insert_like(new_like("Cats", true), &[]).await.unwrap();

        let id = created.like.id;
        wait_until(&first, |e| e.iter().any(|e| e.row.like.id == id)).await;
        wait_until(&second, |e| e.iter().any(|e| e.row.like.id == id)).await;
    }

    #[tokio::test]
    async fn test_filter_applies_to_patches() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let likes = LiveList::likes(store.clone(), LikeKind::Like, ListOrder::Newest);
        wait_until(&likes, |_| true).await;

        store.insert_like(new_like("Mondays", false), &[]).await.unwrap();
        let tea = store.insert_like(new_like("Tea", true), &[]).await.unwrap();
        wait_until(&likes, |e| e.len() == 1).await;
        assert_eq!(likes.items().await[0].like.item_name, "Tea");

        let flip = UpdateLikeItem {
            is_like: Some(false),
            ..UpdateLikeItem::default()
        };
        store.update_like(tea.like.id, flip).await.unwrap();
        wait_until(&likes, |e| e.is_empty()).await;
    }

    #[tokio::test]
    async fn test_delete_and_order_are_maintained() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let facts = LiveList::new(
            FunFactsSource::new(store.clone(), ListOrder::Name),
            ListOrder::Name,
        );
        wait_until(&facts, |_| true).await;

        let zebra = store
            .insert_fun_fact(NewFunFact { title: "Zebra".into(), description: None })
            .await
            .unwrap();
        store
            .insert_fun_fact(NewFunFact { title: "apple".into(), description: None })
            .await
            .unwrap();
        wait_until(&facts, |e| e.len() == 2).await;
        let titles: Vec<String> = facts.items().await.into_iter().map(|f| f.title).collect();
        assert_eq!(titles, vec!["apple", "Zebra"]);

        store.delete_fun_fact(zebra.id).await.unwrap();
        wait_until(&facts, |e| e.len() == 1).await;
    }

    #[tokio::test]
    async fn test_event_without_record_triggers_refetch() {
        let source = fake_source(vec![fact("Owls")]);
        let list = LiveList::new(source.clone(), ListOrder::Newest);
        wait_until(&list, |e| e.len() == 1).await;

        let added = fact("Bats");
        source.rows.lock().unwrap().push(added.clone());
        source
            .hub
            .publish(ChangeEvent::new(Table::FunFacts, ChangeKind::Insert, added.id, None));

        wait_until(&list, |e| e.len() == 2).await;
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_previous_rows() {
        let source = fake_source(vec![fact("Owls")]);
        let list = LiveList::new(source.clone(), ListOrder::Newest);
        wait_until(&list, |e| e.len() == 1).await;

        source.fail.store(true, AtomicOrdering::SeqCst);
        list.refresh().await;

        assert_eq!(list.items().await.len(), 1);
        assert!(!list.is_loading().await);
    }

    #[tokio::test]
    async fn test_optimistic_entry_is_confirmed_without_duplicates() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let facts = LiveList::new(
            FunFactsSource::new(store.clone(), ListOrder::Newest),
            ListOrder::Newest,
        );
        wait_until(&facts, |_| true).await;

        let client_id = facts.insert_optimistic(fact("Cats purr")).await;
        assert_eq!(facts.entries().await[0].state, EntryState::Pending);

        let stored = store
            .insert_fun_fact(NewFunFact { title: "Cats purr".into(), description: None })
            .await
            .unwrap();
        let stored_id = stored.id;
        wait_until(&facts, |e| e.iter().any(|e| e.row.id == stored_id)).await;

        facts.confirm(client_id, stored).await;
        let entries = facts.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, EntryState::Committed);
        assert_eq!(entries[0].row.id, stored_id);
    }

    #[tokio::test]
    async fn test_rejected_entry_is_marked_then_discarded() {
        let source = fake_source(Vec::new());
        let list = LiveList::new(source, ListOrder::Newest);
        wait_until(&list, |_| true).await;

        let client_id = list.insert_optimistic(fact("Nope")).await;
        list.reject(client_id).await;
        assert_eq!(list.entries().await[0].state, EntryState::Failed);
        assert!(list.items().await.is_empty());

        list.discard_failed().await;
        assert!(list.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_list_releases_subscriptions() {
        let source = fake_source(Vec::new());
        let hub = source.hub.clone();
        let list = LiveList::new(source, ListOrder::Newest);
        assert_eq!(hub.subscriber_count(Table::FunFacts), 1);

        drop(list);
        for _ in 0..10 {
            if hub.subscriber_count(Table::FunFacts) == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.subscriber_count(Table::FunFacts), 0);
    }
}
