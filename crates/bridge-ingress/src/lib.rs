//! Ingress API: the durable front door. `POST /api/inbox` persists the
//! caller's message before acknowledging it; parsing and dispatch are the
//! Router's job, not this crate's.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bridge_store::Store;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub shared_secret: String,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Serialize)]
struct InboxResponse {
    ok: bool,
    stored: bool,
    idempotency_key: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/inbox", post(inbox_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

/// Extract the JSON `source` field from a body the caller declared as JSON.
/// Anything that doesn't parse as a JSON object with a string `source`
/// field yields an empty source hint.
fn extract_source(content_type: &str, body: &[u8]) -> String {
    if !content_type.contains("json") {
        return String::new();
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("source").and_then(|s| s.as_str()).map(str::to_string))
        .unwrap_or_default()
}

async fn inbox_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.shared_secret.is_empty() {
        let provided = headers
            .get("X-Shared-Secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != state.shared_secret {
            warn!("ingress rejected: missing or invalid shared secret");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let key = headers
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let content_type = headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let source = extract_source(content_type, &body);

    match state.store.inbox_insert(&key, &source, &body).await {
        Ok(result) => {
            metrics::counter!("bridge.inbox.accepted_total").increment(1);
            info!(
                idempotency_key = %result.idempotency_key,
                stored = result.stored,
                "inbox message accepted"
            );
            Json(InboxResponse {
                ok: true,
                stored: result.stored,
                idempotency_key: result.idempotency_key,
            })
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "inbox persistence failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn build_app(shared_secret: &str) -> (Router, Store) {
        let store = Store::in_memory().await.unwrap();
        let router = create_router(AppState {
            store: store.clone(),
            shared_secret: shared_secret.to_string(),
        });
        (router, store)
    }

    #[tokio::test]
    async fn test_health_ok() {
        let (app, _store) = build_app("").await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_inbox_idempotency() {
        let (app, store) = build_app("").await;
        let body = r#"{"cmd":"TTP2=?"}"#;

        let req = || {
            Request::builder()
                .method("POST")
                .uri("/api/inbox")
                .header("Content-Type", "application/json")
                .header("X-Idempotency-Key", "k1")
                .body(Body::from(body))
                .unwrap()
        };

        let resp1 = app.clone().oneshot(req()).await.unwrap();
        assert_eq!(resp1.status(), StatusCode::OK);
        let bytes1 = axum::body::to_bytes(resp1.into_body(), usize::MAX).await.unwrap();
        let json1: serde_json::Value = serde_json::from_slice(&bytes1).unwrap();
        assert_eq!(json1["stored"], true);

        let resp2 = app.clone().oneshot(req()).await.unwrap();
        let bytes2 = axum::body::to_bytes(resp2.into_body(), usize::MAX).await.unwrap();
        let json2: serde_json::Value = serde_json::from_slice(&bytes2).unwrap();
        assert_eq!(json2["stored"], false);
        assert_eq!(json2["idempotency_key"], "k1");

        assert!(store.inbox_find_by_key("k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auth_rejects_missing_secret() {
        let (app, _store) = build_app("s3cr3t").await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/inbox")
            .body(Body::from("TTP2=?"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_accepts_matching_secret() {
        let (app, _store) = build_app("s3cr3t").await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/inbox")
            .header("X-Shared-Secret", "s3cr3t")
            .body(Body::from("TTP2=?"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_plaintext_body_stored_verbatim() {
        let (app, store) = build_app("").await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/inbox")
            .header("X-Idempotency-Key", "k9")
            .body(Body::from("TTP2=23"))
            .unwrap();
        app.oneshot(req).await.unwrap();

        let row = store.inbox_find_by_key("k9").await.unwrap().unwrap();
        assert_eq!(row.payload, b"TTP2=23");
    }
}
