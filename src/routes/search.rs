use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::search::{run_search, SearchHit};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

/// GET /api/search?q=
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let term = query.q.trim().to_string();
    let results = run_search(state.store.as_ref(), &term).await?;
    Ok(Json(SearchResponse {
        query: term,
        results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewFunFact;
    use crate::db::Store;
    use crate::routes::test_support::{app, empty_request, send, test_state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_search_endpoint_tags_fun_fact_hits() {
        let (state, memory) = test_state();
        memory
            .insert_fun_fact(NewFunFact {
                title: "Cats are cute".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let (status, body) =
            send(app(&state), empty_request("GET", "/api/search?q=cat", None)).await;
        assert_eq!(status, StatusCode::OK);
        let body: SearchResponse = serde_json::from_value(body).unwrap();
        assert_eq!(body.results.len(), 1);
        assert_eq!(body.results[0].title, "Cats are cute");
        assert_eq!(
            serde_json::to_value(body.results[0].kind).unwrap(),
            "fun_fact"
        );
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let (state, memory) = test_state();
        let (status, body) = send(app(&state), empty_request("GET", "/api/search?q=", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"], serde_json::json!([]));
        assert_eq!(memory.op_count(), 0);
    }
}
