//! Fansite Backend - library for app logic and testing

pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod logging;
pub mod realtime;
pub mod routes;
pub mod search;
pub mod state;
pub mod sync;

use anyhow::Context;
use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use config::AppConfig;
use db::{MemoryStore, PgStore, Store};
use state::AppState;

/// CORS for the configured frontend origins.
pub fn configure_cors(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(routes::admin::dashboard))
        .route(
            "/likes/{id}",
            patch(routes::likes::update_like).delete(routes::likes::delete_like),
        )
        .route("/tags", post(routes::tags::admin_create_tag))
        .route(
            "/tags/{id}",
            patch(routes::tags::update_tag).delete(routes::tags::delete_tag),
        )
        .route("/funfacts", post(routes::funfacts::create_fun_fact))
        .route(
            "/funfacts/{id}",
            patch(routes::funfacts::update_fun_fact).delete(routes::funfacts::delete_fun_fact),
        )
        .route("/users", get(routes::admin::list_users))
        .route("/users/{id}/role", patch(routes::admin::set_user_role))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            routes::auth::admin_gate,
        ))
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors(&state.config);

    Router::new()
        .route(
            "/api/likes",
            get(routes::likes::list_likes).post(routes::likes::create_like),
        )
        .route("/api/likes/{id}", get(routes::likes::get_like))
        .route(
            "/api/tags",
            get(routes::tags::list_tags).post(routes::tags::create_tag),
        )
        .route("/api/tags/{id}", get(routes::tags::get_tag))
        .route("/api/funfacts", get(routes::funfacts::list_fun_facts))
        .route("/api/funfacts/{id}", get(routes::funfacts::get_fun_fact))
        .route("/api/search", get(routes::search::search))
        .route("/api/realtime/{table}", get(routes::realtime::subscribe))
        .route("/api/session", get(routes::auth::current_session))
        .nest("/api/admin", admin_routes(&state))
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/database", get(routes::health::health_database))
        .route("/health/ready", get(routes::health::health_ready))
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        // Global 2 MB request body cap
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    let Some(db_config) = &config.database else {
        tracing::info!("DATABASE_URL not set. Using the in-memory store.");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = db::init_pool(db_config)
        .await
        .context("failed to initialize database pool")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    let store = PgStore::connect(pool)
        .await
        .context("failed to start row change listener")?;
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Run the server (used by main).
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    // Dropping the guards stops the background log writers.
    let _log_guards = logging::init(&config.log);

    routes::health::init_start_time();
    config.validate()?;

    let store = open_store(&config).await?;
    let addr = config.bind_addr()?;
    let app = create_app(AppState::new(store, config));

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{empty_request, send, test_state};
    use axum::http::StatusCode;

    #[test]
    fn test_cors_skips_invalid_origins() {
        let config = AppConfig {
            allowed_origins: vec!["http://localhost:3000".to_string(), "bad\norigin".to_string()],
            ..AppConfig::default()
        };
        let _cors = configure_cors(&config);
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let (state, _) = test_state();
        let req = empty_request("GET", "/health", None);
        let res = tower::ServiceExt::oneshot(create_app(state), req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (state, _) = test_state();
        let (status, _) = send(create_app(state), empty_request("GET", "/api/nothing", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
