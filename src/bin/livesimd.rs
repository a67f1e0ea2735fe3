//! Entry point: wires configuration, the asset catalog, the request governor, the CMAF ingest
//! manager and the HTTP router together, then serves until shut down.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::BoxError;
use clap::Parser;
use tower::ServiceBuilder;
use tracing::{error, info};

use livesim::catalog::Catalog;
use livesim::config::Config;
use livesim::governor::Governor;
use livesim::http::{build_router, AppState};
use livesim::ingest::IngestManager;
use livesim::logging;

fn main() -> ExitCode {
    let config = match Config::try_parse() {
        Ok(c) => c,
        Err(e) => {
            // `--help`/`--version` are not config errors: let clap print and exit 0 for those.
            if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                e.exit();
            }
            let _ = e.print();
            return ExitCode::from(1);
        },
    };
    logging::init(config.verbose, config.quiet);

    let ast_ms = config.ast.as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp_millis())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let catalog = match Catalog::build(&config.vod_root) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, root = %config.vod_root.display(), "failed to build asset catalog");
            return ExitCode::from(2);
        },
    };
    info!(assets = catalog.len(), "asset catalog ready");
    let catalog = Arc::new(catalog);

    let governor = Arc::new(Governor::new(
        config.max_requests,
        Duration::from_millis(config.governor_interval_ms),
        config.governor_whitelist.clone(),
        config.governor_log_path(),
    ));

    let ingest = Arc::new(IngestManager::new(Arc::clone(&catalog)));

    let state = Arc::new(AppState {
        catalog,
        governor,
        ingest: Arc::clone(&ingest),
        base_url: config.base_url.clone(),
        ast_ms,
        governor_header_name: config.governor_header.clone(),
    });

    let addr = config.socket_addr();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::from(2);
        },
    };

    runtime.block_on(serve(addr, config.timeout_s, state, ingest))
}

async fn serve(addr: SocketAddr, timeout_s: u64, state: Arc<AppState>, ingest: Arc<IngestManager>) -> ExitCode {
    let app = build_router(Arc::clone(&state)).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_timeout_error))
            .timeout(Duration::from_secs(timeout_s)),
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listener");
            return ExitCode::from(2);
        },
    };
    info!(%addr, "livesimd listening");

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, cancelling active ingest sessions");
        ingest.cancel_all();
    };

    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::from(2)
        },
    }
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::GATEWAY_TIMEOUT, "request timed out\n".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled error: {err}\n"))
    }
}
