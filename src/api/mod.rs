//! Record API: a small JSON surface over the submission store.
//!
//! `status` is the only column that can change after a record is written;
//! `PUT /api/records/:reference/status` is how back-office tooling moves an
//! application along.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::forms::types::FormKind;
use crate::records::RecordStore;

/// Page size when `limit` is absent.
pub const DEFAULT_PAGE: usize = 50;
/// Largest page a single request may ask for.
pub const MAX_PAGE: usize = 200;
const MAX_STATUS_LEN: usize = 64;
const MAX_BODY_BYTES: usize = 16 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiState {
    pub records: Arc<RecordStore>,
}

/// JSON 404 for unknown API paths.
async fn handle_api_fallback() -> ApiResponse {
    err_json(StatusCode::NOT_FOUND, "Unknown API endpoint")
}

/// Build the axum router with every record API route.
pub fn build_router(state: ApiState) -> Router {
    let api_router = Router::new()
        .route("/health", get(handle_health))
        .route("/records", get(handle_list_records))
        .route("/records/:reference", get(handle_get_record))
        .route("/records/:reference/status", put(handle_set_status))
        .fallback(handle_api_fallback);

    Router::new()
        .nest("/api", api_router)
        .fallback(handle_api_fallback)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: ApiState, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind record API on {addr}: {e}")
    })?;
    tracing::info!("record API listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ── Response helpers ─────────────────────────────────────────────

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok_json(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn err_json(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

fn join_error(e: tokio::task::JoinError) -> ApiResponse {
    err_json(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("Task join error: {e}"),
    )
}

// ── Request bodies ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListQuery {
    form: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

// ── Handlers ─────────────────────────────────────────────────────

async fn handle_health(State(state): State<ApiState>) -> impl IntoResponse {
    let records = state.records.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, String> {
        let (_, total) = records.list(None, 0, 0).map_err(|e| format!("{e:#}"))?;
        Ok(serde_json::json!({
            "status": "ok",
            "records": total,
        }))
    })
    .await;

    match result {
        Ok(Ok(value)) => ok_json(value),
        Ok(Err(msg)) => err_json(StatusCode::INTERNAL_SERVER_ERROR, &msg),
        Err(e) => join_error(e),
    }
}

async fn handle_list_records(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let kind = match query.form.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        None => None,
        Some(raw) => match FormKind::parse(raw) {
            Some(kind) => Some(kind),
            None => {
                return err_json(StatusCode::BAD_REQUEST, &format!("Unknown form '{raw}'"));
            }
        },
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let offset = query.offset.unwrap_or(0);

    let records = state.records.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, String> {
        let (page, total) = records
            .list(kind, limit, offset)
            .map_err(|e| format!("{e:#}"))?;
        Ok(serde_json::json!({
            "records": page,
            "total": total,
            "limit": limit,
            "offset": offset,
        }))
    })
    .await;

    match result {
        Ok(Ok(value)) => ok_json(value),
        Ok(Err(msg)) => err_json(StatusCode::INTERNAL_SERVER_ERROR, &msg),
        Err(e) => join_error(e),
    }
}

async fn handle_get_record(
    State(state): State<ApiState>,
    AxumPath(reference): AxumPath<String>,
) -> impl IntoResponse {
    let records = state.records.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<ApiResponse, String> {
        match records.get(&reference) {
            Ok(Some(record)) => Ok(ok_json(serde_json::json!(record))),
            Ok(None) => Ok(err_json(
                StatusCode::NOT_FOUND,
                &format!("No record with reference '{reference}'"),
            )),
            Err(e) => Err(format!("{e:#}")),
        }
    })
    .await;

    match result {
        Ok(Ok(resp)) => resp,
        Ok(Err(msg)) => err_json(StatusCode::INTERNAL_SERVER_ERROR, &msg),
        Err(e) => join_error(e),
    }
}

async fn handle_set_status(
    State(state): State<ApiState>,
    AxumPath(reference): AxumPath<String>,
    Json(body): Json<StatusBody>,
) -> impl IntoResponse {
    let status = body.status.trim().to_string();
    if status.is_empty() {
        return err_json(StatusCode::BAD_REQUEST, "status must not be empty");
    }
    if status.chars().count() > MAX_STATUS_LEN || status.chars().any(char::is_control) {
        return err_json(StatusCode::BAD_REQUEST, "status is not a valid label");
    }

    let records = state.records.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<ApiResponse, String> {
        let updated = records
            .update_status(&reference, &status, Utc::now())
            .map_err(|e| format!("{e:#}"))?;
        if !updated {
            return Ok(err_json(
                StatusCode::NOT_FOUND,
                &format!("No record with reference '{reference}'"),
            ));
        }
        match records.get(&reference) {
            Ok(Some(record)) => Ok(ok_json(serde_json::json!(record))),
            Ok(None) => Ok(err_json(StatusCode::NOT_FOUND, "Record disappeared")),
            Err(e) => Err(format!("{e:#}")),
        }
    })
    .await;

    match result {
        Ok(Ok(resp)) => resp,
        Ok(Err(msg)) => err_json(StatusCode::INTERNAL_SERVER_ERROR, &msg),
        Err(e) => join_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{NewRecord, STATUS_SUBMITTED};
    use crate::session::Language;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn store_with_feedback() -> (Arc<RecordStore>, String) {
        let store = RecordStore::open_in_memory().unwrap();
        let outcome = store
            .insert(
                &NewRecord {
                    form_id: Uuid::new_v4(),
                    kind: FormKind::Feedback,
                    user_id: "7".into(),
                    language: Language::English,
                    reference_prefix: "FDB".into(),
                    fields: BTreeMap::from([("message".to_string(), "Quick service".to_string())]),
                    status: STATUS_SUBMITTED.into(),
                    remote_reference: None,
                },
                Utc::now(),
            )
            .unwrap();
        let reference = outcome.record().reference.clone();
        (Arc::new(store), reference)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_counts_records() {
        let (records, _) = store_with_feedback();
        let (status, body) = call(build_router(ApiState { records }), get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["records"], 1);
    }

    #[tokio::test]
    async fn unknown_form_filter_is_bad_request() {
        let (records, _) = store_with_feedback();
        let (status, body) = call(
            build_router(ApiState { records }),
            get_req("/api/records?form=parking_permit"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("parking_permit"));
    }

    #[tokio::test]
    async fn list_clamps_page_size() {
        let (records, _) = store_with_feedback();
        let (status, body) = call(
            build_router(ApiState { records }),
            get_req("/api/records?form=feedback&limit=5000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limit"], MAX_PAGE);
        assert_eq!(body["total"], 1);
        assert_eq!(body["records"][0]["form_kind"], "feedback");
    }

    #[tokio::test]
    async fn set_status_rejects_blank_label() {
        let (records, reference) = store_with_feedback();
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/api/records/{reference}/status"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"status":"   "}"#))
            .unwrap();
        let (status, _) = call(build_router(ApiState { records }), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let (records, _) = store_with_feedback();
        let (status, body) = call(build_router(ApiState { records }), get_req("/api/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Unknown API endpoint");
    }
}
