pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::realtime::ChangeHub;
use models::{
    DashboardStats, FunFact, LikeItem, LikeKind, LikeWithTags, ListOrder, NewFunFact,
    NewLikeItem, NewTag, Profile, Role, Tag, TagWithCount, TagWithItems, UpdateFunFact,
    UpdateLikeItem, UpdateTag,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Data access for every table the site uses.
///
/// Implementations publish a [`crate::realtime::ChangeEvent`] on
/// [`Store::changes`] for every committed insert, update and delete.
/// Nothing is retried: a failure surfaces once to the caller.
#[async_trait]
pub trait Store: Send + Sync {
    fn changes(&self) -> &ChangeHub;

    /// Short backend label for health output.
    fn backend_name(&self) -> &'static str;

    /// Round-trip to the backend, for health checks.
    async fn ping(&self) -> StoreResult<Duration>;

    async fn list_likes(&self, kind: LikeKind, order: ListOrder)
        -> StoreResult<Vec<LikeWithTags>>;
    async fn get_like(&self, id: Uuid) -> StoreResult<Option<LikeWithTags>>;
    /// Insert a like and its tag links atomically; an unknown tag id
    /// rejects the whole operation.
    async fn insert_like(&self, like: NewLikeItem, tag_ids: &[Uuid])
        -> StoreResult<LikeWithTags>;
    async fn update_like(&self, id: Uuid, patch: UpdateLikeItem) -> StoreResult<Option<LikeItem>>;
    /// Deletes the like together with its item tags.
    async fn delete_like(&self, id: Uuid) -> StoreResult<bool>;
    async fn recent_likes(&self, limit: i64) -> StoreResult<Vec<LikeItem>>;

    async fn list_tags(&self, order: ListOrder) -> StoreResult<Vec<TagWithCount>>;
    async fn get_tag(&self, id: Uuid) -> StoreResult<Option<Tag>>;
    /// Case-insensitive exact match.
    async fn find_tag_by_name(&self, name: &str) -> StoreResult<Option<Tag>>;
    async fn insert_tag(&self, tag: NewTag) -> StoreResult<Tag>;
    async fn update_tag(&self, id: Uuid, patch: UpdateTag) -> StoreResult<Option<Tag>>;
    /// Deletes the tag and cascades to its item tags.
    async fn delete_tag(&self, id: Uuid) -> StoreResult<bool>;
    async fn likes_for_tag(&self, tag_id: Uuid) -> StoreResult<Vec<LikeItem>>;
    async fn recent_tags(&self, limit: i64) -> StoreResult<Vec<TagWithCount>>;

    async fn list_fun_facts(&self, order: ListOrder) -> StoreResult<Vec<FunFact>>;
    async fn get_fun_fact(&self, id: Uuid) -> StoreResult<Option<FunFact>>;
    async fn insert_fun_fact(&self, fact: NewFunFact) -> StoreResult<FunFact>;
    async fn update_fun_fact(&self, id: Uuid, patch: UpdateFunFact)
        -> StoreResult<Option<FunFact>>;
    async fn delete_fun_fact(&self, id: Uuid) -> StoreResult<bool>;

    async fn get_profile(&self, id: Uuid) -> StoreResult<Option<Profile>>;
    async fn list_profiles(&self) -> StoreResult<Vec<Profile>>;
    async fn set_role(&self, id: Uuid, role: Role) -> StoreResult<Option<Profile>>;

    /// Case-insensitive substring match on name or description.
    async fn search_likes(&self, term: &str) -> StoreResult<Vec<LikeWithTags>>;
    async fn search_tags(&self, term: &str) -> StoreResult<Vec<TagWithItems>>;
    /// Case-insensitive substring match on title or description.
    async fn search_fun_facts(&self, term: &str) -> StoreResult<Vec<FunFact>>;

    async fn stats(&self) -> StoreResult<DashboardStats>;
}

/// Build an `ILIKE` pattern matching `term` anywhere, with the pattern
/// metacharacters in `term` escaped.
pub fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/fansite".to_string()),
            max_connections: std::env::var("DB_POOL_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_POOL_MIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        }
    }
}

pub async fn init_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Initializing database connection pool...");
    tracing::debug!(
        "Database URL: {}",
        config.url.replace(
            |c: char| !c.is_ascii_alphanumeric() && c != ':' && c != '/' && c != '@' && c != '.',
            "*"
        )
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    tracing::info!("Database connection pool initialized successfully");

    Ok(pool)
}

/// Notification channel fed by the row change triggers.
pub const ROW_CHANGES_CHANNEL: &str = "row_changes";

/// `pg_notify` rejects payloads of 8000 bytes or more. Larger rows are sent
/// without their record and listeners refetch.
pub const NOTIFY_PAYLOAD_LIMIT: usize = 7900;

fn notify_function_sql() -> String {
    format!(
        r#"
        CREATE OR REPLACE FUNCTION notify_row_change() RETURNS trigger AS $$
        DECLARE
            rec RECORD;
            row_json JSONB;
            payload TEXT;
        BEGIN
            IF TG_OP = 'DELETE' THEN
                rec := OLD;
            ELSE
                rec := NEW;
                row_json := to_jsonb(rec);
                IF TG_TABLE_NAME = 'profiles' THEN
                    row_json := row_json - 'email';
                END IF;
            END IF;
            payload := jsonb_build_object(
                'table', TG_TABLE_NAME,
                'kind', lower(TG_OP),
                'id', rec.id,
                'record', row_json
            )::text;
            IF octet_length(payload) > {limit} THEN
                payload := jsonb_build_object(
                    'table', TG_TABLE_NAME,
                    'kind', lower(TG_OP),
                    'id', rec.id,
                    'record', NULL
                )::text;
            END IF;
            PERFORM pg_notify('{channel}', payload);
            RETURN rec;
        END;
        $$ LANGUAGE plpgsql
        "#,
        limit = NOTIFY_PAYLOAD_LIMIT,
        channel = ROW_CHANGES_CHANNEL,
    )
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS likes (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            item_name TEXT NOT NULL,
            description TEXT,
            is_like BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            description TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_tags (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            like_id UUID NOT NULL REFERENCES likes(id) ON DELETE CASCADE,
            tag_id UUID NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            UNIQUE (like_id, tag_id)
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fun_facts (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::raw_sql(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_name_lower ON tags (LOWER(name));
        CREATE INDEX IF NOT EXISTS idx_likes_created_at ON likes (created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_likes_is_like ON likes (is_like);
        CREATE INDEX IF NOT EXISTS idx_item_tags_tag_id ON item_tags (tag_id);
        CREATE INDEX IF NOT EXISTS idx_fun_facts_created_at ON fun_facts (created_at DESC)
        "#,
    )
    .execute(pool)
    .await?;

    let notify_fn = notify_function_sql();
    sqlx::raw_sql(&notify_fn).execute(pool).await?;

    for table in ["likes", "tags", "item_tags", "fun_facts", "profiles"] {
        let ddl = format!(
            r#"
            DROP TRIGGER IF EXISTS {table}_notify ON {table};
            CREATE TRIGGER {table}_notify
                AFTER INSERT OR UPDATE OR DELETE ON {table}
                FOR EACH ROW EXECUTE FUNCTION notify_row_change()
            "#
        );
        sqlx::raw_sql(&ddl).execute(pool).await?;
    }

    tracing::info!("Database migrations completed successfully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_default_uses_env_or_fallback() {
        let config = DbConfig::default();
        assert!(config.max_connections >= 1);
        assert!(config.connect_timeout_secs >= 1);
        assert!(config.idle_timeout_secs >= 1);
        assert!(!config.url.is_empty());
    }

    #[test]
    fn test_notify_function_caps_payload_and_hides_email() {
        let sql = notify_function_sql();
        assert!(sql.contains("octet_length(payload) > 7900"));
        assert!(sql.contains("'record', NULL"));
        assert!(sql.contains("row_json - 'email'"));
        assert!(sql.contains("pg_notify('row_changes', payload)"));
        assert!(NOTIFY_PAYLOAD_LIMIT < 8000);
    }

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("cat"), "%cat%");
        assert_eq!(contains_pattern("100%_"), "%100\\%\\_%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }
}
