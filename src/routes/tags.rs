/**
 * Tags Routes
 * Tag listing and detail, open tag submission, and admin tag management
 */
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::auth::AdminUser;
use super::OrderQuery;
use crate::db::models::{NewTag, Tag, TagWithCount, TagWithItems};
use crate::error::{ApiError, ApiResult};
use crate::forms::{TagForm, UpdateTagForm};
use crate::state::AppState;

/// GET /api/tags?order=
pub async fn list_tags(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Vec<TagWithCount>>> {
    Ok(Json(state.store.list_tags(query.order).await?))
}

/// GET /api/tags/{id}
/// The tag with every like and dislike carrying it
pub async fn get_tag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TagWithItems>> {
    let tag = state
        .store
        .get_tag(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tag".to_string()))?;
    let items = state.store.likes_for_tag(id).await?;
    Ok(Json(TagWithItems { tag, items }))
}

async fn insert_unique(state: &AppState, tag: NewTag) -> ApiResult<Tag> {
    // Friendly message up front; the store's unique index is still the arbiter.
    if state.store.find_tag_by_name(&tag.name).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "A tag named '{}' already exists",
            tag.name
        )));
    }
    Ok(state.store.insert_tag(tag).await?)
}

/// POST /api/tags
/// Open submission; one stored submission per IP per rate-limit window
pub async fn create_tag(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(form): Json<TagForm>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    let tag = form.validate()?;

    if !state.limiter.allows(addr.ip()).await {
        tracing::warn!(ip = %addr.ip(), "tag submission rate limited");
        return Err(ApiError::TooManyRequests);
    }

    let created = insert_unique(&state, tag).await?;
    state.limiter.record(addr.ip()).await;
    tracing::info!(tag_id = %created.id, name = %created.name, "tag created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/admin/tags
pub async fn admin_create_tag(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(form): Json<TagForm>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    let tag = form.validate()?;
    let created = insert_unique(&state, tag).await?;
    tracing::info!(tag_id = %created.id, admin = %admin.id, "tag created by admin");
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /api/admin/tags/{id}
pub async fn update_tag(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(form): Json<UpdateTagForm>,
) -> ApiResult<Json<Tag>> {
    let patch = form.validate()?;

    if let Some(name) = &patch.name {
        if let Some(existing) = state.store.find_tag_by_name(name).await? {
            if existing.id != id {
                return Err(ApiError::Conflict(format!(
                    "A tag named '{}' already exists",
                    name
                )));
            }
        }
    }

    let updated = state
        .store
        .update_tag(id, patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tag".to_string()))?;

    tracing::info!(tag_id = %id, admin = %admin.id, "tag updated");
    Ok(Json(updated))
}

/// DELETE /api/admin/tags/{id}
/// Removes the tag from every item it labels
pub async fn delete_tag(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_tag(id).await? {
        return Err(ApiError::NotFound("Tag".to_string()));
    }

    tracing::info!(tag_id = %id, admin = %admin.id, "tag deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewLikeItem, Role};
    use crate::db::Store;
    use crate::routes::test_support::{
        app, bearer, empty_request, json_request, send, test_state, test_state_with_window,
    };
    use axum::routing::delete;
    use axum::Router;
    use serde_json::json;

    #[tokio::test]
    async fn test_short_tag_name_never_reaches_store() {
        let (state, memory) = test_state();
        let (status, body) = send(
            app(&state),
            json_request("POST", "/api/tags", None, json!({"name": "a"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"]["name"], "Tag name must be at least 2 characters.");
        assert_eq!(memory.op_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_tag_name_conflicts() {
        let (state, _) = test_state();
        let (status, _) = send(
            app(&state),
            json_request("POST", "/api/tags", None, json!({"name": "Music"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            app(&state),
            json_request("POST", "/api/tags", None, json!({"name": " music "})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_conflicting_submission_keeps_the_window_open() {
        let (state, memory) = test_state_with_window(std::time::Duration::from_secs(60));
        memory
            .insert_tag(NewTag { name: "Music".into(), description: None })
            .await
            .unwrap();

        let (status, _) = send(
            app(&state),
            json_request("POST", "/api/tags", None, json!({"name": "music"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            app(&state),
            json_request("POST", "/api/tags", None, json!({"name": "Books"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            app(&state),
            json_request("POST", "/api/tags", None, json!({"name": "Films"})),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_delete_tag_cascades_to_items() {
        let (state, memory) = test_state();
        let admin = memory.insert_profile("admin@example.com", Role::Admin).await;
        let tag = memory
            .insert_tag(NewTag { name: "Music".into(), description: None })
            .await
            .unwrap();
        let like = memory
            .insert_like(
                NewLikeItem { item_name: "Jazz".into(), description: None, is_like: true },
                &[tag.id],
            )
            .await
            .unwrap();

        let (status, _) = send(
            app(&state),
            empty_request(
                "DELETE",
                &format!("/api/admin/tags/{}", tag.id),
                Some(&bearer(&state, admin.id)),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(memory.item_tag_count(tag.id).await, 0);

        let uri = format!("/api/likes/{}", like.like.id);
        let (_, body) = send(app(&state), empty_request("GET", &uri, None)).await;
        assert_eq!(body["tags"], json!([]));
        let uri = format!("/api/tags/{}", tag.id);
        let (status, _) = send(app(&state), empty_request("GET", &uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_handler_rechecks_role_without_gate() {
        let (state, memory) = test_state();
        let user = memory.insert_profile("fan@example.com", Role::User).await;
        let tag = memory
            .insert_tag(NewTag { name: "Music".into(), description: None })
            .await
            .unwrap();

        // Handler mounted alone, outside the admin route layer.
        let bare = Router::new()
            .route("/tags/{id}", delete(delete_tag))
            .with_state(state.clone());

        let (status, _) = send(
            bare.clone(),
            empty_request("DELETE", &format!("/tags/{}", tag.id), Some(&bearer(&state, user.id))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let uri = format!("/tags/{}", tag.id);
        let (status, _) = send(bare, empty_request("DELETE", &uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(memory.get_tag(tag.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tag_detail_lists_tagged_items() {
        let (state, memory) = test_state();
        let tag = memory
            .insert_tag(NewTag { name: "Food".into(), description: None })
            .await
            .unwrap();
        memory
            .insert_like(
                NewLikeItem { item_name: "Olives".into(), description: None, is_like: false },
                &[tag.id],
            )
            .await
            .unwrap();

        let uri = format!("/api/tags/{}", tag.id);
        let (status, body) = send(app(&state), empty_request("GET", &uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Food");
        assert_eq!(body["items"][0]["itemName"], "Olives");

        let (_, list) = send(app(&state), empty_request("GET", "/api/tags", None)).await;
        assert_eq!(list[0]["itemCount"], 1);
    }

    #[tokio::test]
    async fn test_rename_to_existing_name_conflicts() {
        let (state, memory) = test_state();
        let admin = memory.insert_profile("admin@example.com", Role::Admin).await;
        memory
            .insert_tag(NewTag { name: "Music".into(), description: None })
            .await
            .unwrap();
        let food = memory
            .insert_tag(NewTag { name: "Food".into(), description: None })
            .await
            .unwrap();

        let (status, _) = send(
            app(&state),
            json_request(
                "PATCH",
                &format!("/api/admin/tags/{}", food.id),
                Some(&bearer(&state, admin.id)),
                json!({"name": "MUSIC"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
