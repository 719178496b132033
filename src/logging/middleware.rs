use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

/// Coarse bucket for a request path, recorded on every access log line.
fn route_area(path: &str) -> &'static str {
    if path.starts_with("/api/admin") {
        "admin"
    } else if path.starts_with("/api/realtime") {
        "realtime"
    } else if path.starts_with("/health") {
        "health"
    } else if path.starts_with("/api") {
        "public"
    } else {
        "other"
    }
}

/// Access log. Client errors log at warn, server errors at error.
///
/// Realtime streams log when the stream is handed back, not when it closes.
pub async fn log_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let area = route_area(&path);
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    tracing::debug!(%request_id, %method, %path, area, "incoming request");

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match status {
        500..=599 => tracing::error!(
            %request_id,
            %method,
            %path,
            area,
            status,
            elapsed_ms,
            "request failed"
        ),
        400..=499 => tracing::warn!(
            %request_id,
            %method,
            %path,
            area,
            status,
            elapsed_ms,
            "request rejected"
        ),
        _ => tracing::info!(
            %request_id,
            %method,
            %path,
            area,
            status,
            elapsed_ms,
            "request served"
        ),
    }

    response
}

pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}
