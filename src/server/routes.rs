//! HTTP route handlers for the chat-status service.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};

use super::state::AppState;
use crate::payload;

type ApiError = (StatusCode, Json<Value>);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chat-status", get(list_statuses).post(set_status))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "chat-status",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Status listing response.
#[derive(Debug, Serialize)]
pub struct StatusesResponse {
    /// Enabled flag per conversation id.
    pub statuses: HashMap<String, bool>,
}

fn storage_error(err: &crate::error::TrackerError) -> ApiError {
    tracing::error!(?err, "Chat status storage failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": err.to_string()})),
    )
}

async fn list_statuses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusesResponse>, ApiError> {
    let statuses = state.store.all().await.map_err(|e| storage_error(&e))?;
    Ok(Json(StatusesResponse { statuses }))
}

/// Body is read as raw bytes so that malformed JSON and missing or mistyped
/// fields all get the same 400 instead of the extractor's rejection.
async fn set_status(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let chat_id = body.get("chat_id").and_then(payload::id_string);
    let enabled = body.get("enabled").and_then(Value::as_bool);

    let (Some(chat_id), Some(enabled)) = (chat_id, enabled) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "chat_id and enabled required"})),
        ));
    };

    state
        .store
        .set(&chat_id, enabled)
        .await
        .map_err(|e| storage_error(&e))?;
    tracing::info!(%chat_id, enabled, "Chat status updated");

    Ok(Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ChatStatusStore;
    use axum::body::Body;
    use axum::http::{Request, header};
    use tokio_rusqlite::Connection;
    use tower::ServiceExt;

    async fn app() -> Router {
        let conn = Connection::open_in_memory().await.unwrap();
        let store = ChatStatusStore::new(Arc::new(conn)).await.unwrap();
        create_router(AppState::with_store(store))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(body: &str) -> Request<Body> {
        Request::post("/chat-status")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "chat-status");
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let app = app().await;

        let (status, body) = call(&app, post(r#"{"chat_id":"42","enabled":true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        call(&app, post(r#"{"chat_id":"7","enabled":false}"#)).await;
        let (list_status, listing) = call(&app, get("/chat-status")).await;
        assert_eq!(list_status, StatusCode::OK);
        assert_eq!(listing, json!({"statuses": {"42": true, "7": false}}));
    }

    #[tokio::test]
    async fn test_numeric_chat_id_is_stringified() {
        let app = app().await;

        let (status, body) = call(&app, post(r#"{"chat_id":42,"enabled":true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        call(&app, post(r#"{"chat_id":"42","enabled":false}"#)).await;
        let (_, listing) = call(&app, get("/chat-status")).await;
        assert_eq!(listing, json!({"statuses": {"42": false}}));
    }

    #[tokio::test]
    async fn test_invalid_bodies_rejected() {
        let app = app().await;
        for body in [
            r#"{"chat_id":"42"}"#,
            r#"{"enabled":true}"#,
            r#"{"chat_id":"","enabled":true}"#,
            r#"{"chat_id":"42","enabled":"yes"}"#,
            r#"{"chat_id":null,"enabled":true}"#,
            r#"{"chat_id":false,"enabled":true}"#,
            "not json",
        ] {
            let (status, json) = call(&app, post(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(json["error"], "chat_id and enabled required");
        }

        let (_, body) = call(&app, get("/chat-status")).await;
        assert_eq!(body, json!({"statuses": {}}));
    }
}
