/**
 * Admin Routes
 * Dashboard overview and user role management
 */
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::AdminUser;
use crate::db::models::{DashboardStats, LikeItem, Profile, Role, TagWithCount};
use crate::error::{ApiError, ApiResult};
use crate::forms::RoleForm;
use crate::state::AppState;

const RECENT_LIKES: i64 = 5;
const RECENT_TAGS: i64 = 6;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub stats: DashboardStats,
    pub recent_likes: Vec<LikeItem>,
    pub recent_tags: Vec<TagWithCount>,
}

/// GET /api/admin/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> ApiResult<Json<DashboardResponse>> {
    let (stats, recent_likes, recent_tags) = tokio::try_join!(
        state.store.stats(),
        state.store.recent_likes(RECENT_LIKES),
        state.store.recent_tags(RECENT_TAGS),
    )?;

    Ok(Json(DashboardResponse {
        stats,
        recent_likes,
        recent_tags,
    }))
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> ApiResult<Json<Vec<Profile>>> {
    Ok(Json(state.store.list_profiles().await?))
}

/// PATCH /api/admin/users/{id}/role
pub async fn set_user_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(form): Json<RoleForm>,
) -> ApiResult<Json<Profile>> {
    let role = form.validate()?;

    if id == admin.id && role != Role::Admin {
        return Err(ApiError::Conflict(
            "Admins cannot remove their own admin role".to_string(),
        ));
    }

    let updated = state
        .store
        .set_role(id, role)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

    tracing::info!(user_id = %id, role = role.as_str(), admin = %admin.id, "user role changed");
    Ok(Json(updated))
}
