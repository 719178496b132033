//! Postgres-backed store.
//!
//! Change notifications come from the `notify_row_change` triggers installed
//! by [`super::run_migrations`], so writes made by any client (including the
//! hosted dashboard) reach subscribers, not just writes made through here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{postgres::PgListener, PgPool};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::models::{
    DashboardStats, FunFact, LikeItem, LikeKind, LikeWithTags, ListOrder, NewFunFact,
    NewLikeItem, NewTag, Profile, Role, Tag, TagRef, TagWithCount, TagWithItems, UpdateFunFact,
    UpdateLikeItem, UpdateTag,
};
use super::{contains_pattern, Store, ROW_CHANGES_CHANNEL};
use crate::error::{StoreError, StoreResult};
use crate::realtime::{ChangeEvent, ChangeHub, ChangeKind, Table};

const LIKE_COLUMNS: &str = "id, item_name, description, is_like, created_at";
const TAG_COLUMNS: &str = "id, name, description, created_at";
const FUN_FACT_COLUMNS: &str = "id, title, description, created_at";
const PROFILE_COLUMNS: &str = "id, email, role, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
    hub: ChangeHub,
    listener: Option<JoinHandle<()>>,
}

impl PgStore {
    /// Store without a notification listener; subscribers never fire.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hub: ChangeHub::new(),
            listener: None,
        }
    }

    /// Store that forwards database row change notifications to its hub.
    pub async fn connect(pool: PgPool) -> Result<Self, sqlx::Error> {
        let mut store = Self::new(pool);
        let mut listener = PgListener::connect_with(&store.pool).await?;
        listener.listen(ROW_CHANGES_CHANNEL).await?;

        let hub = store.hub.clone();
        store.listener = Some(tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => match parse_notification(notification.payload()) {
                        Some(event) => hub.publish(event),
                        None => tracing::warn!(
                            payload = %notification.payload(),
                            "unparseable row change notification"
                        ),
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "row change listener failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));

        tracing::info!(channel = ROW_CHANGES_CHANNEL, "listening for row changes");
        Ok(store)
    }

    async fn attach_tags(&self, likes: Vec<LikeItem>) -> StoreResult<Vec<LikeWithTags>> {
        if likes.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = likes.iter().map(|l| l.id).collect();

        let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            r#"
            SELECT it.like_id, t.id, t.name
            FROM item_tags it
            JOIN tags t ON t.id = it.tag_id
            WHERE it.like_id = ANY($1)
            ORDER BY LOWER(t.name)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_like: HashMap<Uuid, Vec<TagRef>> = HashMap::new();
        for (like_id, id, name) in rows {
            by_like.entry(like_id).or_default().push(TagRef { id, name });
        }

        Ok(likes
            .into_iter()
            .map(|like| {
                let tags = by_like.remove(&like.id).unwrap_or_default();
                LikeWithTags { like, tags }
            })
            .collect())
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

fn order_clause(order: ListOrder, prefix: &str, label: &str) -> String {
    match order {
        ListOrder::Newest => format!("{prefix}created_at DESC"),
        ListOrder::Oldest => format!("{prefix}created_at ASC"),
        ListOrder::Name => format!("LOWER({prefix}{label}) ASC"),
    }
}

/// Translate constraint violations into domain errors.
fn map_write_error(e: sqlx::Error, what: &str) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Conflict(format!("{} already exists", what));
        }
        if db.is_foreign_key_violation() {
            return StoreError::InvalidReference(format!("unknown {}", what));
        }
    }
    StoreError::Database(e)
}

#[derive(Debug, Deserialize)]
struct RowChangePayload {
    table: Table,
    kind: ChangeKind,
    id: Uuid,
    record: Option<Value>,
}

/// Decode a trigger payload; row keys are converted to the API's camelCase.
fn parse_notification(payload: &str) -> Option<ChangeEvent> {
    let change: RowChangePayload = serde_json::from_str(payload).ok()?;
    Some(ChangeEvent::new(
        change.table,
        change.kind,
        change.id,
        change.record.map(camel_case_keys),
    ))
}

fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| (to_camel_case(&key), v))
                .collect(),
        ),
        other => other,
    }
}

fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl Store for PgStore {
    fn changes(&self) -> &ChangeHub {
        &self.hub
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(start.elapsed())
    }

    async fn list_likes(
        &self,
        kind: LikeKind,
        order: ListOrder,
    ) -> StoreResult<Vec<LikeWithTags>> {
        let sql = format!(
            "SELECT {LIKE_COLUMNS} FROM likes \
             WHERE ($1::BOOLEAN IS NULL OR is_like = $1) ORDER BY {}",
            order_clause(order, "", "item_name")
        );
        let likes = sqlx::query_as::<_, LikeItem>(&sql)
            .bind(kind.flag())
            .fetch_all(&self.pool)
            .await?;
        self.attach_tags(likes).await
    }

    async fn get_like(&self, id: Uuid) -> StoreResult<Option<LikeWithTags>> {
        let like = sqlx::query_as::<_, LikeItem>(&format!(
            "SELECT {LIKE_COLUMNS} FROM likes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match like {
            Some(like) => Ok(self.attach_tags(vec![like]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn insert_like(
        &self,
        like: NewLikeItem,
        tag_ids: &[Uuid],
    ) -> StoreResult<LikeWithTags> {
        let mut tag_ids = tag_ids.to_vec();
        tag_ids.sort();
        tag_ids.dedup();

        // Item and links commit together; dropping `tx` on error rolls back.
        let mut tx = self.pool.begin().await?;

        let item = sqlx::query_as::<_, LikeItem>(&format!(
            "INSERT INTO likes (item_name, description, is_like) \
             VALUES ($1, $2, $3) RETURNING {LIKE_COLUMNS}"
        ))
        .bind(&like.item_name)
        .bind(&like.description)
        .bind(like.is_like)
        .fetch_one(&mut *tx)
        .await?;

        if !tag_ids.is_empty() {
            sqlx::query(
                "INSERT INTO item_tags (like_id, tag_id) SELECT $1, UNNEST($2::UUID[])",
            )
            .bind(item.id)
            .bind(&tag_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, "tag"))?;
        }

        let tags = sqlx::query_as::<_, TagRef>(
            r#"
            SELECT t.id, t.name
            FROM item_tags it
            JOIN tags t ON t.id = it.tag_id
            WHERE it.like_id = $1
            ORDER BY LOWER(t.name)
            "#,
        )
        .bind(item.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LikeWithTags { like: item, tags })
    }

    async fn update_like(&self, id: Uuid, patch: UpdateLikeItem) -> StoreResult<Option<LikeItem>> {
        let like = sqlx::query_as::<_, LikeItem>(&format!(
            r#"
            UPDATE likes SET
                item_name = COALESCE($2, item_name),
                description = CASE WHEN $3 THEN $4 ELSE description END,
                is_like = COALESCE($5, is_like)
            WHERE id = $1
            RETURNING {LIKE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.item_name)
        .bind(patch.description.is_some())
        .bind(patch.description.flatten())
        .bind(patch.is_like)
        .fetch_optional(&self.pool)
        .await?;
        Ok(like)
    }

    async fn delete_like(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM likes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_likes(&self, limit: i64) -> StoreResult<Vec<LikeItem>> {
        let likes = sqlx::query_as::<_, LikeItem>(&format!(
            "SELECT {LIKE_COLUMNS} FROM likes ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(likes)
    }

    async fn list_tags(&self, order: ListOrder) -> StoreResult<Vec<TagWithCount>> {
        let sql = format!(
            r#"
            SELECT t.id, t.name, t.description, t.created_at, COUNT(it.id) AS item_count
            FROM tags t
            LEFT JOIN item_tags it ON it.tag_id = t.id
            GROUP BY t.id
            ORDER BY {}
            "#,
            order_clause(order, "t.", "name")
        );
        let tags = sqlx::query_as::<_, TagWithCount>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    async fn get_tag(&self, id: Uuid) -> StoreResult<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>(&format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tag)
    }

    async fn find_tag_by_name(&self, name: &str) -> StoreResult<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE LOWER(name) = LOWER($1) LIMIT 1"
        ))
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(tag)
    }

    async fn insert_tag(&self, tag: NewTag) -> StoreResult<Tag> {
        sqlx::query_as::<_, Tag>(&format!(
            "INSERT INTO tags (name, description) VALUES ($1, $2) RETURNING {TAG_COLUMNS}"
        ))
        .bind(&tag.name)
        .bind(&tag.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &format!("tag '{}'", tag.name)))
    }

    async fn update_tag(&self, id: Uuid, patch: UpdateTag) -> StoreResult<Option<Tag>> {
        let label = patch.name.clone().unwrap_or_else(|| id.to_string());
        sqlx::query_as::<_, Tag>(&format!(
            r#"
            UPDATE tags SET
                name = COALESCE($2, name),
                description = CASE WHEN $3 THEN $4 ELSE description END
            WHERE id = $1
            RETURNING {TAG_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.name)
        .bind(patch.description.is_some())
        .bind(patch.description.flatten())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &format!("tag '{}'", label)))
    }

    async fn delete_tag(&self, id: Uuid) -> StoreResult<bool> {
        // item_tags rows go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn likes_for_tag(&self, tag_id: Uuid) -> StoreResult<Vec<LikeItem>> {
        let likes = sqlx::query_as::<_, LikeItem>(
            r#"
            SELECT l.id, l.item_name, l.description, l.is_like, l.created_at
            FROM likes l
            JOIN item_tags it ON it.like_id = l.id
            WHERE it.tag_id = $1
            ORDER BY l.created_at DESC
            "#,
        )
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(likes)
    }

    async fn recent_tags(&self, limit: i64) -> StoreResult<Vec<TagWithCount>> {
        let tags = sqlx::query_as::<_, TagWithCount>(
            r#"
            SELECT t.id, t.name, t.description, t.created_at, COUNT(it.id) AS item_count
            FROM tags t
            LEFT JOIN item_tags it ON it.tag_id = t.id
            GROUP BY t.id
            ORDER BY t.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    async fn list_fun_facts(&self, order: ListOrder) -> StoreResult<Vec<FunFact>> {
        let sql = format!(
            "SELECT {FUN_FACT_COLUMNS} FROM fun_facts ORDER BY {}",
            order_clause(order, "", "title")
        );
        let facts = sqlx::query_as::<_, FunFact>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(facts)
    }

    async fn get_fun_fact(&self, id: Uuid) -> StoreResult<Option<FunFact>> {
        let fact = sqlx::query_as::<_, FunFact>(&format!(
            "SELECT {FUN_FACT_COLUMNS} FROM fun_facts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fact)
    }

    async fn insert_fun_fact(&self, fact: NewFunFact) -> StoreResult<FunFact> {
        let fact = sqlx::query_as::<_, FunFact>(&format!(
            "INSERT INTO fun_facts (title, description) \
             VALUES ($1, $2) RETURNING {FUN_FACT_COLUMNS}"
        ))
        .bind(&fact.title)
        .bind(&fact.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(fact)
    }

    async fn update_fun_fact(
        &self,
        id: Uuid,
        patch: UpdateFunFact,
    ) -> StoreResult<Option<FunFact>> {
        let fact = sqlx::query_as::<_, FunFact>(&format!(
            r#"
            UPDATE fun_facts SET
                title = COALESCE($2, title),
                description = CASE WHEN $3 THEN $4 ELSE description END
            WHERE id = $1
            RETURNING {FUN_FACT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.title)
        .bind(patch.description.is_some())
        .bind(patch.description.flatten())
        .fetch_optional(&self.pool)
        .await?;
        Ok(fact)
    }

    async fn delete_fun_fact(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM fun_facts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        let profiles = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(profiles)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "UPDATE profiles SET role = $2, updated_at = now() \
             WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn search_likes(&self, term: &str) -> StoreResult<Vec<LikeWithTags>> {
        let likes = sqlx::query_as::<_, LikeItem>(&format!(
            r#"
            SELECT {LIKE_COLUMNS} FROM likes
            WHERE item_name ILIKE $1 OR description ILIKE $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(contains_pattern(term))
        .fetch_all(&self.pool)
        .await?;
        self.attach_tags(likes).await
    }

    async fn search_tags(&self, term: &str) -> StoreResult<Vec<TagWithItems>> {
        let tags = sqlx::query_as::<_, Tag>(&format!(
            r#"
            SELECT {TAG_COLUMNS} FROM tags
            WHERE name ILIKE $1 OR description ILIKE $1
            ORDER BY LOWER(name)
            "#
        ))
        .bind(contains_pattern(term))
        .fetch_all(&self.pool)
        .await?;

        if tags.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = tags.iter().map(|t| t.id).collect();

        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, Option<String>, bool, DateTime<Utc>)>(
            r#"
            SELECT it.tag_id, l.id, l.item_name, l.description, l.is_like, l.created_at
            FROM item_tags it
            JOIN likes l ON l.id = it.like_id
            WHERE it.tag_id = ANY($1)
            ORDER BY l.created_at DESC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_tag: HashMap<Uuid, Vec<LikeItem>> = HashMap::new();
        for (tag_id, id, item_name, description, is_like, created_at) in rows {
            by_tag.entry(tag_id).or_default().push(LikeItem {
                id,
                item_name,
                description,
                is_like,
                created_at,
            });
        }

        Ok(tags
            .into_iter()
            .map(|tag| {
                let items = by_tag.remove(&tag.id).unwrap_or_default();
                TagWithItems { tag, items }
            })
            .collect())
    }

    async fn search_fun_facts(&self, term: &str) -> StoreResult<Vec<FunFact>> {
        let facts = sqlx::query_as::<_, FunFact>(&format!(
            r#"
            SELECT {FUN_FACT_COLUMNS} FROM fun_facts
            WHERE title ILIKE $1 OR description ILIKE $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(contains_pattern(term))
        .fetch_all(&self.pool)
        .await?;
        Ok(facts)
    }

    async fn stats(&self) -> StoreResult<DashboardStats> {
        let (total_likes, total_dislikes, total_tags, total_fun_facts): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM likes WHERE is_like),
                    (SELECT COUNT(*) FROM likes WHERE NOT is_like),
                    (SELECT COUNT(*) FROM tags),
                    (SELECT COUNT(*) FROM fun_facts)
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(DashboardStats {
            total_likes,
            total_dislikes,
            total_tags,
            total_fun_facts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification_converts_row_keys() {
        let id = Uuid::new_v4();
        let payload = serde_json::json!({
            "table": "likes",
            "kind": "insert",
            "id": id,
            "record": {
                "id": id,
                "item_name": "Rainy days",
                "description": null,
                "is_like": true,
                "created_at": "2024-03-01T10:00:00.123456+00:00"
            }
        })
        .to_string();

        let event = parse_notification(&payload).unwrap();
        assert_eq!(event.table, Table::Likes);
        assert_eq!(event.kind, ChangeKind::Insert);

        let like: LikeItem = serde_json::from_value(event.record.unwrap()).unwrap();
        assert_eq!(like.item_name, "Rainy days");
        assert!(like.is_like);
    }

    #[test]
    fn test_parse_notification_for_oversized_update_has_no_record() {
        let payload = format!(
            r#"{{"table":"fun_facts","kind":"update","id":"{}","record":null}}"#,
            Uuid::new_v4()
        );
        let event = parse_notification(&payload).unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert!(event.record.is_none());
    }

    #[test]
    fn test_parse_notification_for_delete_has_no_record() {
        let payload = format!(
            r#"{{"table":"fun_facts","kind":"delete","id":"{}","record":null}}"#,
            Uuid::new_v4()
        );
        let event = parse_notification(&payload).unwrap();
        assert_eq!(event.table, Table::FunFacts);
        assert!(event.record.is_none());
    }

    #[test]
    fn test_parse_notification_rejects_garbage() {
        assert!(parse_notification("not json").is_none());
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(order_clause(ListOrder::Newest, "t.", "name"), "t.created_at DESC");
        assert_eq!(order_clause(ListOrder::Name, "", "title"), "LOWER(title) ASC");
    }
}
