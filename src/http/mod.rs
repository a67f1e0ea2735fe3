//! C7: live HTTP handler, plus the static/REST endpoints that sit alongside it.
//!
//! Everything request-shaped lives here; the modules it calls into (`manifest`, `segment`,
//! `drm`, `ingest`, `governor`) stay pure or I/O-only and know nothing about axum.

pub mod api;
pub mod live;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::catalog::Catalog;
use crate::error::LivesimError;
use crate::governor::Governor;
use crate::ingest::IngestManager;

pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub governor: Arc<Governor>,
    pub ingest: Arc<IngestManager>,
    /// scheme+host this server is reachable at, used to build LA-URL / UTCTiming / patch-location
    /// absolute URLs embedded in synthesized manifests.
    pub base_url: String,
    /// the server's configured Availability Start Time, epoch milliseconds.
    pub ast_ms: i64,
    pub governor_header_name: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/metrics", get(api::metrics))
        .route("/favicon.ico", get(api::favicon))
        .route("/assets", get(api::list_assets))
        .route("/api/cmaf-ingests", post(api::create_ingest))
        .route("/api/cmaf-ingests/{id}", get(api::get_ingest))
        .route("/api/cmaf-ingests/{id}", delete(api::delete_ingest))
        .route("/api/cmaf-ingests/{id}/step", get(api::step_ingest))
        .route("/{*rest}", get(live::handle).post(api::handle_post_suffix))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), governor_layer))
        .layer(middleware::map_response(add_standard_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Adds the headers spec §6 requires on every response, regardless of status or handler.
async fn add_standard_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("DASH-IF-livesim2", HeaderValue::from_static(crate::LIVESIM_VERSION));
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert("Access-Control-Allow-Private-Network", HeaderValue::from_static("true"));
    headers.insert("Timing-Allow-Origin", HeaderValue::from_static("*"));
    response
}

/// Applies the request governor (C9) ahead of every route; whitelisted and under-quota clients
/// pass through untouched, everyone else gets 429 with the configured header attached.
async fn governor_layer(State(state): State<Arc<AppState>>, ConnectInfo(addr): ConnectInfo<SocketAddr>, request: Request<Body>, next: Next) -> Response {
    let forwarded_for = request.headers().get("X-Forwarded-For").and_then(|v| v.to_str().ok());
    let remote_ip: IpAddr = addr.ip();
    let key = Governor::client_key(forwarded_for, remote_ip);
    let admission = state.governor.admit(&key);
    let header_name = axum::http::HeaderName::from_bytes(state.governor_header_name.as_bytes()).ok();
    let header_value = HeaderValue::from_str(&admission.header_value()).ok();

    let mut response = if admission.is_admitted() {
        next.run(request).await
    } else {
        (StatusCode::TOO_MANY_REQUESTS, "rate limited\n").into_response()
    };

    if let (Some(name), Some(value)) = (header_name, header_value) {
        response.headers_mut().insert(name, value);
    }
    response
}

impl IntoResponse for LivesimError {
    fn into_response(self) -> Response {
        match self {
            LivesimError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("{msg}\n")).into_response(),
            LivesimError::Gone => (StatusCode::GONE, "gone\n").into_response(),
            LivesimError::TooEarly { delta_ms } => {
                (StatusCode::from_u16(425).expect("425 is a valid HTTP status"), format!("too early by {delta_ms}ms\n")).into_response()
            },
            LivesimError::PatchGone => (StatusCode::GONE, "patch publishTime too old\n").into_response(),
            LivesimError::PatchTooEarly { delta_ms } => {
                (StatusCode::from_u16(425).expect("425 is a valid HTTP status"), format!("patch too early by {delta_ms}ms\n")).into_response()
            },
            LivesimError::AtoInfTimeline => (StatusCode::BAD_REQUEST, format!("{self}\n")).into_response(),
            LivesimError::UrlOption { token, reason } => {
                (StatusCode::BAD_REQUEST, format!("bad URL option '{token}': {reason}\n")).into_response()
            },
            LivesimError::PeriodNotMultiple { .. } => (StatusCode::BAD_REQUEST, format!("{self}\n")).into_response(),
            LivesimError::MissingAnnexIQuery(_) => (StatusCode::BAD_REQUEST, format!("{self}\n")).into_response(),
            LivesimError::Parsing(_) => (StatusCode::BAD_REQUEST, format!("{self}\n")).into_response(),
            LivesimError::Io(_, _) | LivesimError::Mp4Box(_) | LivesimError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error\n").into_response()
            },
        }
    }
}
