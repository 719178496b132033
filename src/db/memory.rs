//! Process-local store, used when no `DATABASE_URL` is configured and by tests.
//!
//! All state sits behind one lock, so multi-row writes (a like plus its item
//! tags, a tag plus its cascaded links) are atomic with respect to readers.
//! Change events are published before the write lock is released, so
//! subscribers see them in commit order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    DashboardStats, FunFact, ItemTag, LikeItem, LikeKind, LikeWithTags, ListOrder, NewFunFact,
    NewLikeItem, NewTag, Profile, Role, Tag, TagRef, TagWithCount, TagWithItems, UpdateFunFact,
    UpdateLikeItem, UpdateTag,
};
use super::Store;
use crate::error::{StoreError, StoreResult};
use crate::realtime::{ChangeEvent, ChangeHub, ChangeKind, Table};

#[derive(Default)]
struct Inner {
    likes: HashMap<Uuid, LikeItem>,
    tags: HashMap<Uuid, Tag>,
    item_tags: Vec<ItemTag>,
    fun_facts: HashMap<Uuid, FunFact>,
    profiles: HashMap<Uuid, Profile>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing creation timestamps keep "newest first" stable.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn tags_of(&self, like_id: Uuid) -> Vec<TagRef> {
        let mut tags: Vec<TagRef> = self
            .item_tags
            .iter()
            .filter(|it| it.like_id == like_id)
            .filter_map(|it| self.tags.get(&it.tag_id))
            .map(|t| TagRef {
                id: t.id,
                name: t.name.clone(),
            })
            .collect();
        tags.sort_by_key(|t| t.name.to_lowercase());
        tags
    }

    fn with_tags(&self, like: &LikeItem) -> LikeWithTags {
        LikeWithTags {
            like: like.clone(),
            tags: self.tags_of(like.id),
        }
    }

    fn item_count(&self, tag_id: Uuid) -> i64 {
        self.item_tags.iter().filter(|it| it.tag_id == tag_id).count() as i64
    }

    fn with_count(&self, tag: &Tag) -> TagWithCount {
        TagWithCount {
            id: tag.id,
            name: tag.name.clone(),
            description: tag.description.clone(),
            created_at: tag.created_at,
            item_count: self.item_count(tag.id),
        }
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        let wanted = name.trim().to_lowercase();
        self.tags
            .values()
            .any(|t| Some(t.id) != except && t.name.to_lowercase() == wanted)
    }

    fn likes_for_tag(&self, tag_id: Uuid) -> Vec<LikeItem> {
        let mut likes: Vec<LikeItem> = self
            .item_tags
            .iter()
            .filter(|it| it.tag_id == tag_id)
            .filter_map(|it| self.likes.get(&it.like_id).cloned())
            .collect();
        likes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        likes
    }
}

fn compare(order: ListOrder, a: (&DateTime<Utc>, &str), b: (&DateTime<Utc>, &str)) -> Ordering {
    match order {
        ListOrder::Newest => b.0.cmp(a.0),
        ListOrder::Oldest => a.0.cmp(b.0),
        ListOrder::Name => a.1.to_lowercase().cmp(&b.1.to_lowercase()),
    }
}

fn matches_term(term: &str, primary: &str, secondary: Option<&str>) -> bool {
    primary.to_lowercase().contains(term)
        || secondary.is_some_and(|s| s.to_lowercase().contains(term))
}

/// Profile rows go out without the email address.
fn profile_event(kind: ChangeKind, profile: &Profile) -> ChangeEvent {
    let mut event = ChangeEvent::with_row(Table::Profiles, kind, profile.id, profile);
    if let Some(serde_json::Value::Object(record)) = event.record.as_mut() {
        record.remove("email");
    }
    event
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    hub: ChangeHub,
    ops: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store operations issued so far.
    pub fn op_count(&self) -> usize {
        self.ops.load(AtomicOrdering::SeqCst)
    }

    fn record_op(&self) {
        self.ops.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Seed a profile; in production the auth backend creates these.
    pub async fn insert_profile(&self, email: &str, role: Role) -> Profile {
        let mut inner = self.inner.write().await;
        let now = inner.next_timestamp();
        let profile = Profile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            created_at: now,
            updated_at: now,
        };
        inner.profiles.insert(profile.id, profile.clone());

        self.hub.publish(profile_event(ChangeKind::Insert, &profile));
        profile
    }

    /// Number of item tag rows referencing `tag_id`.
    pub async fn item_tag_count(&self, tag_id: Uuid) -> usize {
        self.inner.read().await.item_count(tag_id) as usize
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn changes(&self) -> &ChangeHub {
        &self.hub
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        let _inner = self.inner.read().await;
        Ok(start.elapsed())
    }

    async fn list_likes(
        &self,
        kind: LikeKind,
        order: ListOrder,
    ) -> StoreResult<Vec<LikeWithTags>> {
        self.record_op();
        let inner = self.inner.read().await;
        let mut likes: Vec<&LikeItem> = inner.likes.values().filter(|l| kind.matches(l)).collect();
        likes.sort_by(|a, b| {
            compare(
                order,
                (&a.created_at, &a.item_name),
                (&b.created_at, &b.item_name),
            )
        });
        Ok(likes.into_iter().map(|l| inner.with_tags(l)).collect())
    }

    async fn get_like(&self, id: Uuid) -> StoreResult<Option<LikeWithTags>> {
        self.record_op();
        let inner = self.inner.read().await;
        Ok(inner.likes.get(&id).map(|l| inner.with_tags(l)))
    }

    async fn insert_like(
        &self,
        like: NewLikeItem,
        tag_ids: &[Uuid],
    ) -> StoreResult<LikeWithTags> {
        self.record_op();
        let mut tag_ids = tag_ids.to_vec();
        tag_ids.sort();
        tag_ids.dedup();

        let mut inner = self.inner.write().await;
        if let Some(missing) = tag_ids.iter().find(|id| !inner.tags.contains_key(id)) {
            return Err(StoreError::InvalidReference(format!("unknown tag {}", missing)));
        }

        let item = LikeItem {
            id: Uuid::new_v4(),
            item_name: like.item_name,
            description: like.description,
            is_like: like.is_like,
            created_at: inner.next_timestamp(),
        };
        inner.likes.insert(item.id, item.clone());

        let links: Vec<ItemTag> = tag_ids
            .iter()
            .map(|tag_id| ItemTag {
                id: Uuid::new_v4(),
                like_id: item.id,
                tag_id: *tag_id,
            })
            .collect();
        inner.item_tags.extend(links.iter().cloned());
        let created = inner.with_tags(&item);

        self.hub.publish(ChangeEvent::with_row(
            Table::Likes,
            ChangeKind::Insert,
            item.id,
            &created,
        ));
        for link in &links {
            self.hub.publish(ChangeEvent::with_row(
                Table::ItemTags,
                ChangeKind::Insert,
                link.id,
                link,
            ));
        }
        Ok(created)
    }

    async fn update_like(&self, id: Uuid, patch: UpdateLikeItem) -> StoreResult<Option<LikeItem>> {
        self.record_op();
        let mut inner = self.inner.write().await;
        let Some(like) = inner.likes.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = patch.item_name {
            like.item_name = name;
        }
        if let Some(description) = patch.description {
            like.description = description;
        }
        if let Some(is_like) = patch.is_like {
            like.is_like = is_like;
        }
        let updated = like.clone();
        let record = inner.with_tags(&updated);

        self.hub
            .publish(ChangeEvent::with_row(Table::Likes, ChangeKind::Update, id, &record));
        Ok(Some(updated))
    }

    async fn delete_like(&self, id: Uuid) -> StoreResult<bool> {
        self.record_op();
        let mut inner = self.inner.write().await;
        if inner.likes.remove(&id).is_none() {
            return Ok(false);
        }
        let (removed, kept): (Vec<ItemTag>, Vec<ItemTag>) = std::mem::take(&mut inner.item_tags)
            .into_iter()
            .partition(|it| it.like_id == id);
        inner.item_tags = kept;

        for link in removed {
            self.hub
                .publish(ChangeEvent::new(Table::ItemTags, ChangeKind::Delete, link.id, None));
        }
        self.hub
            .publish(ChangeEvent::new(Table::Likes, ChangeKind::Delete, id, None));
        Ok(true)
    }

    async fn recent_likes(&self, limit: i64) -> StoreResult<Vec<LikeItem>> {
        self.record_op();
        let inner = self.inner.read().await;
        let mut likes: Vec<LikeItem> = inner.likes.values().cloned().collect();
        likes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        likes.truncate(limit.max(0) as usize);
        Ok(likes)
    }

    async fn list_tags(&self, order: ListOrder) -> StoreResult<Vec<TagWithCount>> {
        self.record_op();
        let inner = self.inner.read().await;
        let mut tags: Vec<&Tag> = inner.tags.values().collect();
        tags.sort_by(|a, b| compare(order, (&a.created_at, &a.name), (&b.created_at, &b.name)));
        Ok(tags.into_iter().map(|t| inner.with_count(t)).collect())
    }

    async fn get_tag(&self, id: Uuid) -> StoreResult<Option<Tag>> {
        self.record_op();
        Ok(self.inner.read().await.tags.get(&id).cloned())
    }

    async fn find_tag_by_name(&self, name: &str) -> StoreResult<Option<Tag>> {
        self.record_op();
        let wanted = name.trim().to_lowercase();
        let inner = self.inner.read().await;
        Ok(inner
            .tags
            .values()
            .find(|t| t.name.to_lowercase() == wanted)
            .cloned())
    }

    async fn insert_tag(&self, tag: NewTag) -> StoreResult<Tag> {
        self.record_op();
        let mut inner = self.inner.write().await;
        if inner.name_taken(&tag.name, None) {
            return Err(StoreError::Conflict(format!("tag '{}' already exists", tag.name)));
        }
        let created = Tag {
            id: Uuid::new_v4(),
            name: tag.name,
            description: tag.description,
            created_at: inner.next_timestamp(),
        };
        inner.tags.insert(created.id, created.clone());

        self.hub.publish(ChangeEvent::with_row(
            Table::Tags,
            ChangeKind::Insert,
            created.id,
            &created,
        ));
        Ok(created)
    }

    async fn update_tag(&self, id: Uuid, patch: UpdateTag) -> StoreResult<Option<Tag>> {
        self.record_op();
        let mut inner = self.inner.write().await;
        if let Some(name) = &patch.name {
            if inner.name_taken(name, Some(id)) {
                return Err(StoreError::Conflict(format!("tag '{}' already exists", name)));
            }
        }
        let Some(tag) = inner.tags.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            tag.name = name;
        }
        if let Some(description) = patch.description {
            tag.description = description;
        }
        let updated = tag.clone();

        self.hub
            .publish(ChangeEvent::with_row(Table::Tags, ChangeKind::Update, id, &updated));
        Ok(Some(updated))
    }

    async fn delete_tag(&self, id: Uuid) -> StoreResult<bool> {
        self.record_op();
        let mut inner = self.inner.write().await;
        if inner.tags.remove(&id).is_none() {
            return Ok(false);
        }
        let (removed, kept): (Vec<ItemTag>, Vec<ItemTag>) = std::mem::take(&mut inner.item_tags)
            .into_iter()
            .partition(|it| it.tag_id == id);
        inner.item_tags = kept;

        for link in removed {
            self.hub
                .publish(ChangeEvent::new(Table::ItemTags, ChangeKind::Delete, link.id, None));
        }
        self.hub
            .publish(ChangeEvent::new(Table::Tags, ChangeKind::Delete, id, None));
        Ok(true)
    }

    async fn likes_for_tag(&self, tag_id: Uuid) -> StoreResult<Vec<LikeItem>> {
        self.record_op();
        Ok(self.inner.read().await.likes_for_tag(tag_id))
    }

    async fn recent_tags(&self, limit: i64) -> StoreResult<Vec<TagWithCount>> {
        let mut tags = self.list_tags(ListOrder::Newest).await?;
        tags.truncate(limit.max(0) as usize);
        Ok(tags)
    }

    async fn list_fun_facts(&self, order: ListOrder) -> StoreResult<Vec<FunFact>> {
        self.record_op();
        let inner = self.inner.read().await;
        let mut facts: Vec<FunFact> = inner.fun_facts.values().cloned().collect();
        facts.sort_by(|a, b| compare(order, (&a.created_at, &a.title), (&b.created_at, &b.title)));
        Ok(facts)
    }

    async fn get_fun_fact(&self, id: Uuid) -> StoreResult<Option<FunFact>> {
        self.record_op();
        Ok(self.inner.read().await.fun_facts.get(&id).cloned())
    }

    async fn insert_fun_fact(&self, fact: NewFunFact) -> StoreResult<FunFact> {
        self.record_op();
        let mut inner = self.inner.write().await;
        let created = FunFact {
            id: Uuid::new_v4(),
            title: fact.title,
            description: fact.description,
            created_at: inner.next_timestamp(),
        };
        inner.fun_facts.insert(created.id, created.clone());

        self.hub.publish(ChangeEvent::with_row(
            Table::FunFacts,
            ChangeKind::Insert,
            created.id,
            &created,
        ));
        Ok(created)
    }

    async fn update_fun_fact(
        &self,
        id: Uuid,
        patch: UpdateFunFact,
    ) -> StoreResult<Option<FunFact>> {
        self.record_op();
        let mut inner = self.inner.write().await;
        let Some(fact) = inner.fun_facts.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = patch.title {
            fact.title = title;
        }
        if let Some(description) = patch.description {
            fact.description = description;
        }
        let updated = fact.clone();

        self.hub.publish(ChangeEvent::with_row(
            Table::FunFacts,
            ChangeKind::Update,
            id,
            &updated,
        ));
        Ok(Some(updated))
    }

    async fn delete_fun_fact(&self, id: Uuid) -> StoreResult<bool> {
        self.record_op();
        let mut inner = self.inner.write().await;
        let removed = inner.fun_facts.remove(&id).is_some();
        if removed {
            self.hub
                .publish(ChangeEvent::new(Table::FunFacts, ChangeKind::Delete, id, None));
        }
        Ok(removed)
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        self.record_op();
        Ok(self.inner.read().await.profiles.get(&id).cloned())
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        self.record_op();
        let inner = self.inner.read().await;
        let mut profiles: Vec<Profile> = inner.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(profiles)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<Profile>> {
        self.record_op();
        let mut inner = self.inner.write().await;
        let now = inner.next_timestamp();
        let Some(profile) = inner.profiles.get_mut(&id) else {
            return Ok(None);
        };
        profile.role = role;
        profile.updated_at = now;
        let updated = profile.clone();

        self.hub.publish(profile_event(ChangeKind::Update, &updated));
        Ok(Some(updated))
    }

    async fn search_likes(&self, term: &str) -> StoreResult<Vec<LikeWithTags>> {
        self.record_op();
        let term = term.to_lowercase();
        let inner = self.inner.read().await;
        let mut likes: Vec<&LikeItem> = inner
            .likes
            .values()
            .filter(|l| matches_term(&term, &l.item_name, l.description.as_deref()))
            .collect();
        likes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(likes.into_iter().map(|l| inner.with_tags(l)).collect())
    }

    async fn search_tags(&self, term: &str) -> StoreResult<Vec<TagWithItems>> {
        self.record_op();
        let term = term.to_lowercase();
        let inner = self.inner.read().await;
        let mut tags: Vec<&Tag> = inner
            .tags
            .values()
            .filter(|t| matches_term(&term, &t.name, t.description.as_deref()))
            .collect();
        tags.sort_by_key(|t| t.name.to_lowercase());
        Ok(tags
            .into_iter()
            .map(|t| TagWithItems {
                tag: t.clone(),
                items: inner.likes_for_tag(t.id),
            })
            .collect())
    }

    async fn search_fun_facts(&self, term: &str) -> StoreResult<Vec<FunFact>> {
        self.record_op();
        let term = term.to_lowercase();
        let inner = self.inner.read().await;
        let mut facts: Vec<FunFact> = inner
            .fun_facts
            .values()
            .filter(|f| matches_term(&term, &f.title, f.description.as_deref()))
            .cloned()
            .collect();
        facts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(facts)
    }

    async fn stats(&self) -> StoreResult<DashboardStats> {
        self.record_op();
        let inner = self.inner.read().await;
        let total_likes = inner.likes.values().filter(|l| l.is_like).count() as i64;
        Ok(DashboardStats {
            total_likes,
            total_dislikes: inner.likes.len() as i64 - total_likes,
            total_tags: inner.tags.len() as i64,
            total_fun_facts: inner.fun_facts.len() as i64,
        })
    }
}
