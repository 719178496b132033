/**
 * Health Routes
 * Endpoints for checking backend health status
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::realtime::Table;
use crate::state::AppState;

// Track server start time for uptime calculation
lazy_static::lazy_static! {
    static ref SERVER_START: Instant = Instant::now();
}

/// Initialize the server start time
pub fn init_start_time() {
    lazy_static::initialize(&SERVER_START);
}

/// Single service check result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheck {
    pub status: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Detailed health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    pub database: ServiceCheck,
    /// Open realtime subscriptions across all tables
    pub realtime_subscribers: usize,
}

/// Ready check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Simple health response
#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
}

async fn check_store(state: &AppState) -> ServiceCheck {
    let backend = state.store.backend_name().to_string();
    match state.store.ping().await {
        Ok(duration) => ServiceCheck {
            status: "healthy".to_string(),
            backend,
            response_time: Some(duration.as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "store health check failed");
            ServiceCheck {
                status: "unhealthy".to_string(),
                backend,
                response_time: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// GET /health - Simple health ping
pub async fn health_ping() -> impl IntoResponse {
    Json(SimpleHealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /health/detailed - Detailed health with all checks
pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_store(&state).await;
    let hub = state.store.changes();
    let realtime_subscribers = [
        Table::Likes,
        Table::Tags,
        Table::ItemTags,
        Table::FunFacts,
        Table::Profiles,
    ]
    .into_iter()
    .map(|table| hub.subscriber_count(table))
    .sum();

    // "ok" as long as the process answers; checks carry the detail
    let response = DetailedHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime: SERVER_START.elapsed().as_secs(),
        checks: HealthChecks {
            database,
            realtime_subscribers,
        },
    };

    (StatusCode::OK, Json(response))
}

/// GET /health/database - Database health check
pub async fn health_database(State(state): State<AppState>) -> impl IntoResponse {
    let check = check_store(&state).await;
    let status = if check.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(check))
}

/// GET /health/ready - Readiness check
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.store.ping().await.is_ok();

    let response = ReadyResponse {
        status: if ready { "ready" } else { "not ready" }.to_string(),
        timestamp: Utc::now(),
        uptime: SERVER_START.elapsed().as_secs(),
        reason: (!ready).then(|| "Store is not reachable".to_string()),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app, empty_request, send, test_state};

    #[tokio::test]
    async fn test_health_ping_returns_ok() {
        init_start_time();
        let (state, _) = test_state();
        let (status, body) = send(app(&state), empty_request("GET", "/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_health_database_reports_memory_backend() {
        let (state, _) = test_state();
        let (status, body) =
            send(app(&state), empty_request("GET", "/health/database", None)).await;
        assert_eq!(status, StatusCode::OK);
        let check: ServiceCheck = serde_json::from_value(body).unwrap();
        assert_eq!(check.status, "healthy");
        assert_eq!(check.backend, "memory");
    }

    #[tokio::test]
    async fn test_health_detailed_counts_subscribers() {
        init_start_time();
        let (state, _) = test_state();
        let _sub = state
            .store
            .changes()
            .subscribe(Table::Likes, crate::realtime::EventMask::All);

        let (status, body) =
            send(app(&state), empty_request("GET", "/health/detailed", None)).await;
        assert_eq!(status, StatusCode::OK);
        let body: DetailedHealthResponse = serde_json::from_value(body).unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.checks.realtime_subscribers, 1);
    }

    #[tokio::test]
    async fn test_health_ready_returns_ready() {
        let (state, _) = test_state();
        let (status, body) = send(app(&state), empty_request("GET", "/health/ready", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }
}
