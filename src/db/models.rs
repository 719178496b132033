//! Database Models - structs representing database tables (used by sqlx/serde).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Like or dislike entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeItem {
    pub id: Uuid,
    pub item_name: String,
    pub description: Option<String>,
    pub is_like: bool,
    pub created_at: DateTime<Utc>,
}

/// New like/dislike for insertion
#[derive(Debug, Clone)]
pub struct NewLikeItem {
    pub item_name: String,
    pub description: Option<String>,
    pub is_like: bool,
}

/// Like/dislike update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UpdateLikeItem {
    pub item_name: Option<String>,
    pub description: Option<Option<String>>,
    pub is_like: Option<bool>,
}

/// Tag model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTag {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

/// Join row between a like and a tag
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTag {
    pub id: Uuid,
    pub like_id: Uuid,
    pub tag_id: Uuid,
}

/// Fun fact model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunFact {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFunFact {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateFunFact {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
}

/// Authorization role stored on a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Profile row; `id` matches the auth identity
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Minimal tag reference attached to a like
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TagRef {
    pub id: Uuid,
    pub name: String,
}

/// Like with its tags (list and search views)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeWithTags {
    #[serde(flatten)]
    pub like: LikeItem,
    pub tags: Vec<TagRef>,
}

/// Tag with the number of items carrying it
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagWithCount {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub item_count: i64,
}

/// Tag matched by search, with the items it labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagWithItems {
    #[serde(flatten)]
    pub tag: Tag,
    pub items: Vec<LikeItem>,
}

/// Row counts for the admin dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_likes: i64,
    pub total_dislikes: i64,
    pub total_tags: i64,
    pub total_fun_facts: i64,
}

/// Which side of the like/dislike flag a list shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeKind {
    #[default]
    All,
    Like,
    Dislike,
}

impl LikeKind {
    pub fn flag(&self) -> Option<bool> {
        match self {
            LikeKind::All => None,
            LikeKind::Like => Some(true),
            LikeKind::Dislike => Some(false),
        }
    }

    pub fn matches(&self, item: &LikeItem) -> bool {
        self.flag().is_none_or(|flag| item.is_like == flag)
    }
}

/// List ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    #[default]
    Newest,
    Oldest,
    Name,
}
