/**
 * Realtime Routes
 * Row change notifications streamed as Server-Sent Events
 */
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;

use super::auth::{authorize_admin, Session};
use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::realtime::{EventMask, Received, Subscription, Table};
use crate::state::AppState;

const KEEP_ALIVE_SECS: u64 = 15;

#[derive(Debug, Default, Deserialize)]
pub struct RealtimeQuery {
    /// `*`, `insert`, `update` or `delete`
    #[serde(default)]
    pub event: Option<String>,
}

fn into_events(sub: Subscription) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(sub, |mut sub| async move {
        let event = match sub.recv().await {
            Received::Event(change) => Event::default()
                .event(change.kind.as_str())
                .id(change.id.to_string())
                .json_data(&*change),
            // Tells the client to refetch; it missed events.
            Received::Lagged(skipped) => Ok(Event::default()
                .event("resync")
                .data(skipped.to_string())),
            Received::Closed => return None,
        };
        Some((event, sub))
    })
}

/// GET /api/realtime/{table}?event=*
/// The profiles stream is admin-only.
pub async fn subscribe(
    State(state): State<AppState>,
    session: Session,
    Path(table): Path<String>,
    Query(query): Query<RealtimeQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let table: Table = table
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Table '{}'", table)))?;
    if table == Table::Profiles {
        authorize_admin(state.store.as_ref(), &session).await?;
    }
    let mask: EventMask = query.event.as_deref().unwrap_or("*").parse().map_err(|e: String| {
        let mut fields = FieldErrors::new();
        fields.insert("event", e);
        ApiError::Validation(fields)
    })?;

    let sub = state.store.changes().subscribe(table, mask);
    tracing::debug!(table = %table, mask = ?mask, "realtime subscriber connected");

    Ok(Sse::new(into_events(sub)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

#[cfg(test)]
mod tests {
    use crate::db::models::{NewTag, Role};
    use crate::db::Store;
    use crate::realtime::Table;
    use crate::routes::test_support::{app, bearer, empty_request, send, test_state};
    use axum::http::StatusCode;
    use futures::StreamExt;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_stream_delivers_matching_events() {
        let (state, memory) = test_state();
        let res = app(&state)
            .oneshot(empty_request("GET", "/api/realtime/tags?event=insert", None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "text/event-stream");
        assert_eq!(memory.changes().subscriber_count(Table::Tags), 1);

        memory
            .insert_tag(NewTag { name: "Music".into(), description: None })
            .await
            .unwrap();

        let mut body = res.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: insert"));
        assert!(text.contains("\"name\":\"Music\""));
    }

    #[tokio::test]
    async fn test_unknown_table_is_404() {
        let (state, _) = test_state();
        let (status, _) =
            send(app(&state), empty_request("GET", "/api/realtime/users", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            app(&state),
            empty_request("GET", "/api/realtime/likes?event=upsert", None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["fields"]["event"].is_string());
    }

    #[tokio::test]
    async fn test_profiles_stream_requires_admin() {
        let (state, memory) = test_state();
        let fan = memory.insert_profile("fan@example.com", Role::User).await;
        let admin = memory.insert_profile("admin@example.com", Role::Admin).await;

        let (status, _) =
            send(app(&state), empty_request("GET", "/api/realtime/profiles", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            app(&state),
            empty_request("GET", "/api/realtime/profiles", Some(&bearer(&state, fan.id))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(memory.changes().subscriber_count(Table::Profiles), 0);

        let res = app(&state)
            .oneshot(empty_request(
                "GET",
                "/api/realtime/profiles",
                Some(&bearer(&state, admin.id)),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        memory.insert_profile("secret-admin@example.com", Role::Admin).await;
        let mut body = res.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: insert"));
        assert!(!text.contains("secret-admin@example.com"));
    }
}
