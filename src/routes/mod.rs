/**
 * Routes Module
 * API route handlers
 */

pub mod admin;
pub mod auth;
pub mod funfacts;
pub mod health;
pub mod likes;
pub mod realtime;
pub mod search;
pub mod tags;

use serde::Deserialize;

use crate::db::models::{LikeKind, ListOrder};

/// `?order=` for list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    #[serde(default)]
    pub order: ListOrder,
}

/// `?kind=&order=` for the likes list
#[derive(Debug, Default, Deserialize)]
pub struct LikesQuery {
    #[serde(default)]
    pub kind: LikeKind,
    #[serde(default)]
    pub order: ListOrder,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use axum::{
        body::Body,
        extract::connect_info::MockConnectInfo,
        http::{Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::AppConfig;
    use crate::db::MemoryStore;
    use crate::state::AppState;

    /// State with the submission limit switched off.
    pub fn test_state() -> (AppState, Arc<MemoryStore>) {
        test_state_with_window(Duration::ZERO)
    }

    pub fn test_state_with_window(window: Duration) -> (AppState, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let config = AppConfig {
            jwt_secret: "route-test-secret".to_string(),
            submit_rate_limit: window,
            ..AppConfig::default()
        };
        (AppState::new(memory.clone(), config), memory)
    }

    /// Full application router with a fixed peer address.
    pub fn app(state: &AppState) -> Router {
        crate::create_app(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 12345))))
    }

    pub fn bearer(state: &AppState, user_id: Uuid) -> String {
        let token = crate::routes::auth::create_access_token(
            user_id,
            None,
            &state.config.jwt_secret,
            chrono::Duration::minutes(5),
        )
        .unwrap();
        format!("Bearer {}", token)
    }

    pub fn json_request(
        method: &str,
        uri: &str,
        auth: Option<&str>,
        json: serde_json::Value,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(json.to_string())).unwrap()
    }

    pub fn empty_request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Send one request; an empty body decodes as `null`.
    pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
