/**
 * Session & Admin Gate
 * Reads the auth backend's access tokens and enforces the admin role
 */
use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::Profile;
use crate::db::Store;
use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims issued by the auth backend. Only `sub` is trusted for identity;
/// any role claim in the token is ignored in favour of the stored profile.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// Signed-in identity
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Sign an access token; real tokens come from the auth backend.
pub fn create_access_token(
    user_id: Uuid,
    email: Option<&str>,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.map(str::to_string),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify and decode an access token
pub fn verify_access_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    // Auth backend tokens carry an audience we don't pin.
    validation.validate_aud = false;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(token_data.claims)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// The caller's session, if any. Missing or invalid tokens mean signed out.
#[derive(Debug, Clone, Default)]
pub struct Session(pub Option<Identity>);

impl Session {
    pub fn from_headers(headers: &HeaderMap, secret: &str) -> Self {
        let Some(token) = extract_bearer_token(headers) else {
            return Session(None);
        };

        let claims = match verify_access_token(token, secret) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("Token verification failed: {}", e);
                return Session(None);
            }
        };

        match claims.sub.parse::<Uuid>() {
            Ok(id) => Session(Some(Identity {
                id,
                email: claims.email,
            })),
            Err(_) => {
                tracing::debug!(sub = %claims.sub, "token subject is not a profile id");
                Session(None)
            }
        }
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Session::from_headers(&parts.headers, &state.config.jwt_secret))
    }
}

/// The single admin check.
///
/// No session is `Unauthorized`. A lookup error, a missing profile and a
/// non-admin role are all `Forbidden`.
pub async fn authorize_admin(store: &dyn Store, session: &Session) -> Result<Profile, ApiError> {
    let Some(identity) = &session.0 else {
        return Err(ApiError::Unauthorized);
    };

    match store.get_profile(identity.id).await {
        Ok(Some(profile)) if profile.is_admin() => Ok(profile),
        Ok(Some(profile)) => {
            tracing::warn!(user_id = %profile.id, "non-admin attempted admin access");
            Err(ApiError::Forbidden("Admin role required".to_string()))
        }
        Ok(None) => {
            tracing::warn!(user_id = %identity.id, "admin check for unknown profile");
            Err(ApiError::Forbidden("Admin role required".to_string()))
        }
        Err(e) => {
            tracing::error!(user_id = %identity.id, error = %e, "admin role lookup failed");
            Err(ApiError::Forbidden("Could not verify admin role".to_string()))
        }
    }
}

/// Extractor for admin-only handlers; re-checks the role on every request.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Profile);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_headers(&parts.headers, &state.config.jwt_secret);
        authorize_admin(state.store.as_ref(), &session)
            .await
            .map(AdminUser)
    }
}

/// Route layer guarding the whole admin area.
pub async fn admin_gate(
    State(state): State<AppState>,
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authorize_admin(state.store.as_ref(), &session).await?;
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: Option<Identity>,
    pub profile: Option<Profile>,
    pub is_admin: bool,
}

/// GET /api/session
pub async fn current_session(
    State(state): State<AppState>,
    session: Session,
) -> Json<SessionResponse> {
    let profile = match &session.0 {
        Some(identity) => state
            .store
            .get_profile(identity.id)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "profile lookup failed");
                None
            }),
        None => None,
    };

    Json(SessionResponse {
        is_admin: profile.as_ref().is_some_and(Profile::is_admin),
        user: session.0,
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use crate::routes::test_support::{bearer, send, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_verify_access_token_invalid_returns_err() {
        assert!(verify_access_token("invalid.jwt.token", SECRET).is_err());
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token =
            create_access_token(Uuid::new_v4(), None, "other", Duration::minutes(5)).unwrap();
        assert!(verify_access_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_session_reads_bearer_subject() {
        let id = Uuid::new_v4();
        let token =
            create_access_token(id, Some("fan@example.com"), SECRET, Duration::minutes(5)).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());

        let session = Session::from_headers(&headers, SECRET);
        assert_eq!(session.0.map(|i| i.id), Some(id));
        assert!(Session::from_headers(&HeaderMap::new(), SECRET).0.is_none());
    }

    #[tokio::test]
    async fn test_authorize_admin_is_fail_closed() {
        let (state, memory) = test_state();
        let admin = memory.insert_profile("admin@example.com", Role::Admin).await;
        let user = memory.insert_profile("fan@example.com", Role::User).await;
        let session = |id| {
            Session(Some(Identity {
                id,
                email: None,
            }))
        };

        let store = state.store.as_ref();
        assert!(matches!(
            authorize_admin(store, &Session(None)).await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            authorize_admin(store, &session(user.id)).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            authorize_admin(store, &session(Uuid::new_v4())).await,
            Err(ApiError::Forbidden(_))
        ));
        assert_eq!(authorize_admin(store, &session(admin.id)).await.unwrap().id, admin.id);
    }

    #[tokio::test]
    async fn test_admin_gate_redirects_by_failure() {
        let (state, memory) = test_state();
        let user = memory.insert_profile("fan@example.com", Role::User).await;
        let app = Router::new()
            .route("/gated", get(|| async { "ok" }))
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), admin_gate))
            .with_state(state.clone());

        let req = Request::get("/gated").body(Body::empty()).unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["redirect"], "/login");

        let req = Request::get("/gated")
            .header("authorization", bearer(&state, user.id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["redirect"], "/");
    }

    #[tokio::test]
    async fn test_session_endpoint_reports_admin_flag() {
        let (state, memory) = test_state();
        let admin = memory.insert_profile("admin@example.com", Role::Admin).await;
        let app = crate::create_app(state.clone());

        let req = Request::get("/api/session").body(Body::empty()).unwrap();
        let (status, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["user"].is_null());
        assert_eq!(body["isAdmin"], false);

        let req = Request::get("/api/session")
            .header("authorization", bearer(&state, admin.id))
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(app, req).await;
        assert_eq!(body["isAdmin"], true);
        assert_eq!(body["profile"]["email"], "admin@example.com");
    }
}
