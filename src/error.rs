//! Error types shared by the store and the HTTP layer.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type StoreResult<T, E = StoreError> = Result<T, E>;
pub type ApiResult<T, E = ApiError> = Result<T, E>;

/// Failures raised by a [`crate::db::Store`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Per-field validation messages, keyed by the camelCase field name.
pub type FieldErrors = BTreeMap<&'static str, String>;

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("authorization required")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("too many requests")]
    TooManyRequests,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if !matches!(e, StoreError::Database(_)) {
            tracing::warn!(error = %e, "store rejected operation");
        }
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::InvalidReference(msg) => {
                let mut fields = FieldErrors::new();
                fields.insert("tagIds", msg);
                ApiError::Validation(fields)
            }
            StoreError::Unavailable(msg) => ApiError::Unavailable(msg),
            StoreError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::Internal("Database error".to_string())
            }
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(fields: FieldErrors) -> Self {
        ApiError::Validation(fields)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(fields) => ErrorResponse {
                error: "Validation failed".to_string(),
                message: None,
                fields: fields
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                redirect: None,
            },
            ApiError::Unauthorized => ErrorResponse {
                error: "Authorization required".to_string(),
                message: None,
                fields: BTreeMap::new(),
                redirect: Some("/login".to_string()),
            },
            ApiError::Forbidden(msg) => ErrorResponse {
                error: "Forbidden".to_string(),
                message: Some(msg),
                fields: BTreeMap::new(),
                redirect: Some("/".to_string()),
            },
            ApiError::NotFound(what) => ErrorResponse {
                error: "Not found".to_string(),
                message: Some(format!("{} not found", what)),
                fields: BTreeMap::new(),
                redirect: None,
            },
            ApiError::Conflict(msg) => ErrorResponse {
                error: "Conflict".to_string(),
                message: Some(msg),
                fields: BTreeMap::new(),
                redirect: None,
            },
            ApiError::TooManyRequests => ErrorResponse {
                error: "Too many requests. Please try again later.".to_string(),
                message: None,
                fields: BTreeMap::new(),
                redirect: None,
            },
            ApiError::Unavailable(msg) => ErrorResponse {
                error: "Service unavailable".to_string(),
                message: Some(msg),
                fields: BTreeMap::new(),
                redirect: None,
            },
            ApiError::Internal(msg) => ErrorResponse {
                error: msg,
                message: None,
                fields: BTreeMap::new(),
                redirect: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
