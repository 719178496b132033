/**
 * Likes Routes
 * Public list/submit plus admin edit/delete for likes and dislikes
 */
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::auth::AdminUser;
use super::LikesQuery;
use crate::db::models::{LikeItem, LikeWithTags};
use crate::error::{ApiError, ApiResult};
use crate::forms::{LikeForm, UpdateLikeForm};
use crate::state::AppState;

/// GET /api/likes?kind=like|dislike|all&order=newest|oldest|name
pub async fn list_likes(
    State(state): State<AppState>,
    Query(query): Query<LikesQuery>,
) -> ApiResult<Json<Vec<LikeWithTags>>> {
    let likes = state.store.list_likes(query.kind, query.order).await?;
    Ok(Json(likes))
}

/// GET /api/likes/{id}
pub async fn get_like(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LikeWithTags>> {
    state
        .store
        .get_like(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Like".to_string()))
}

/// POST /api/likes
/// Open submission; one stored submission per IP per rate-limit window
pub async fn create_like(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(form): Json<LikeForm>,
) -> ApiResult<(StatusCode, Json<LikeWithTags>)> {
    let (like, tag_ids) = form.validate()?;

    if !state.limiter.allows(addr.ip()).await {
        tracing::warn!(ip = %addr.ip(), "like submission rate limited");
        return Err(ApiError::TooManyRequests);
    }

    let created = state.store.insert_like(like, &tag_ids).await?;
    state.limiter.record(addr.ip()).await;
    tracing::info!(
        like_id = %created.like.id,
        is_like = created.like.is_like,
        tags = created.tags.len(),
        "like created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /api/admin/likes/{id}
pub async fn update_like(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(form): Json<UpdateLikeForm>,
) -> ApiResult<Json<LikeItem>> {
    let patch = form.validate()?;
    let updated = state
        .store
        .update_like(id, patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("Like".to_string()))?;

    tracing::info!(like_id = %id, admin = %admin.id, "like updated");
    Ok(Json(updated))
}

/// DELETE /api/admin/likes/{id}
pub async fn delete_like(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_like(id).await? {
        return Err(ApiError::NotFound("Like".to_string()));
    }

    tracing::info!(like_id = %id, admin = %admin.id, "like deleted");
    Ok(StatusCode::NO_CONTENT)
}
