/**
 * Fun Facts Routes
 */
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::auth::AdminUser;
use super::OrderQuery;
use crate::db::models::FunFact;
use crate::error::{ApiError, ApiResult};
use crate::forms::{FunFactForm, UpdateFunFactForm};
use crate::state::AppState;

/// GET /api/funfacts?order=
pub async fn list_fun_facts(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Vec<FunFact>>> {
    Ok(Json(state.store.list_fun_facts(query.order).await?))
}

/// GET /api/funfacts/{id}
pub async fn get_fun_fact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<FunFact>> {
    state
        .store
        .get_fun_fact(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Fun fact".to_string()))
}

/// POST /api/admin/funfacts
pub async fn create_fun_fact(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(form): Json<FunFactForm>,
) -> ApiResult<(StatusCode, Json<FunFact>)> {
    let fact = form.validate()?;
    let created = state.store.insert_fun_fact(fact).await?;
    tracing::info!(fun_fact_id = %created.id, admin = %admin.id, "fun fact created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /api/admin/funfacts/{id}
pub async fn update_fun_fact(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(form): Json<UpdateFunFactForm>,
) -> ApiResult<Json<FunFact>> {
    let patch = form.validate()?;
    let updated = state
        .store
        .update_fun_fact(id, patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("Fun fact".to_string()))?;
    tracing::info!(fun_fact_id = %id, admin = %admin.id, "fun fact updated");
    Ok(Json(updated))
}

/// DELETE /api/admin/funfacts/{id}
pub async fn delete_fun_fact(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.store.delete_fun_fact(id).await? {
        return Err(ApiError::NotFound("Fun fact".to_string()));
    }
    tracing::info!(fun_fact_id = %id, admin = %admin.id, "fun fact deleted");
    Ok(StatusCode::NO_CONTENT)
}
