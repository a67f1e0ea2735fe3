//! Dispatch for the `/livesim2/...` path grammar (spec §6): manifests and patch documents to
//! C5, segments (including init segments) to C6.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::DateTime;
use futures_util::stream;

use crate::drm;
use crate::error::LivesimError;
use crate::http::AppState;
use crate::manifest::{self, SynthesisContext};
use crate::segment::{self, MaterializedSegment, SegSelector, WriteSegmentRequest};
use crate::urlcfg;

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match handle_inner(&state, &rest, &query).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn handle_inner(state: &AppState, rest: &str, query: &HashMap<String, String>) -> Result<Response, LivesimError> {
    let suffix = rest.strip_prefix("livesim2/")
        .ok_or_else(|| LivesimError::NotFound(format!("no such route '{rest}'")))?;

    let parsed = urlcfg::parse_path(suffix)?;
    let asset = state.catalog.find_asset(&parsed.content_part)
        .ok_or_else(|| LivesimError::NotFound(format!("no such asset in path '{}'", parsed.content_part)))?;

    let asset_suffix = parsed.content_part
        .trim_start_matches('/')
        .strip_prefix(asset.path.as_str())
        .map(|s| s.trim_start_matches('/'))
        .unwrap_or_default();

    let now_ms = query.get("nowMS")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or_else(wall_clock_ms);

    if asset_suffix.ends_with(".mpd") || asset_suffix.ends_with(".mpp") {
        if query.contains_key("publishTime") && query.contains_key("ttl") {
            return handle_patch_request(state, &asset, &parsed.cfg, asset_suffix, query);
        }
        return handle_manifest_request(state, &asset, &parsed.cfg, asset_suffix, now_ms, query);
    }

    handle_segment_request(state, &asset, &parsed.cfg, asset_suffix, now_ms).await
}

fn handle_manifest_request(
    state: &AppState,
    asset: &crate::catalog::Asset,
    cfg: &urlcfg::ResponseConfig,
    mpd_name: &str,
    now_ms: i64,
    query: &HashMap<String, String>,
) -> Result<Response, LivesimError> {
    let ctx = SynthesisContext {
        asset,
        cfg,
        now_ms,
        ast_ms: state.ast_ms,
        base_url: &state.base_url,
        actual_query: query,
    };
    let mpd = manifest::synthesize_live_mpd(&ctx, mpd_name)?;
    let xml = crate::serialize(&mpd)?;
    Ok((
        [("content-type", "application/dash+xml")],
        xml,
    ).into_response())
}

fn handle_patch_request(
    state: &AppState,
    asset: &crate::catalog::Asset,
    cfg: &urlcfg::ResponseConfig,
    mpd_name: &str,
    query: &HashMap<String, String>,
) -> Result<Response, LivesimError> {
    let publish_time_old_ms = query.get("publishTime")
        .and_then(|s| DateTime::<chrono::FixedOffset>::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp_millis())
        .ok_or_else(|| LivesimError::Parsing("missing or malformed publishTime".to_string()))?;
    let ttl_s: u64 = query.get("ttl").and_then(|s| s.parse().ok())
        .ok_or_else(|| LivesimError::Parsing("missing or malformed ttl".to_string()))?;
    let now_ms = query.get("nowDate")
        .and_then(|s| DateTime::<chrono::FixedOffset>::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp_millis())
        .unwrap_or_else(wall_clock_ms);

    let ref_rep = asset.ref_representation();
    let seg_dur_ms = ref_rep.loop_duration_ms() / ref_rep.segments.len().max(1) as i64;
    let mup_ms = (cfg.mup_s.unwrap_or(seg_dur_ms as f64 / 1000.0) * 1000.0) as i64;

    manifest::validate_patch_request(publish_time_old_ms, now_ms, mup_ms, ttl_s)?;

    let empty_query = HashMap::new();
    let old_ctx = SynthesisContext {
        asset, cfg, now_ms: publish_time_old_ms, ast_ms: state.ast_ms, base_url: &state.base_url, actual_query: &empty_query,
    };
    let new_ctx = SynthesisContext {
        asset, cfg, now_ms, ast_ms: state.ast_ms, base_url: &state.base_url, actual_query: &empty_query,
    };
    let old_mpd = manifest::synthesize_live_mpd(&old_ctx, mpd_name)?;
    let new_mpd = manifest::synthesize_live_mpd(&new_ctx, mpd_name)?;
    let patch = manifest::generate_patch(&old_mpd, &new_mpd);
    let xml = crate::serialize_patch(&patch)?;

    let expires = DateTime::<chrono::Utc>::from_timestamp_millis(publish_time_old_ms + ttl_s as i64 * 1000)
        .map(|d| d.to_rfc2822())
        .unwrap_or_default();

    let mut resp = ([("content-type", "application/dash-patch+xml")], xml).into_response();
    if let Ok(v) = HeaderValue::from_str(&expires) {
        resp.headers_mut().insert("Expires", v);
    }
    Ok(resp)
}

async fn handle_segment_request(
    state: &AppState,
    asset: &crate::catalog::Asset,
    cfg: &urlcfg::ResponseConfig,
    suffix: &str,
    now_ms: i64,
) -> Result<Response, LivesimError> {
    let (rep_id, filename) = suffix.rsplit_once('/')
        .ok_or_else(|| LivesimError::NotFound(format!("malformed segment path '{suffix}'")))?;
    let (stem, ext) = filename.rsplit_once('.')
        .ok_or_else(|| LivesimError::NotFound(format!("segment filename '{filename}' has no extension")))?;

    let selector = if stem == "init" {
        SegSelector::Init
    } else if cfg.addressing_mode.uses_time_key() {
        SegSelector::Time(stem.parse::<i64>().map_err(|_| LivesimError::NotFound(format!("'{stem}' is not a valid segment time")))?)
    } else {
        SegSelector::Number(stem.parse::<u64>().map_err(|_| LivesimError::NotFound(format!("'{stem}' is not a valid segment number")))?)
    };

    let drm_params = cfg.eccp.map(|eccp| (eccp, drm::DEFAULT_KID));

    let text_templates = default_text_templates(cfg, asset, rep_id);

    let req = WriteSegmentRequest {
        cfg,
        drm: drm_params,
        asset,
        rep_id,
        selector,
        now_ms,
        ast_ms: state.ast_ms,
        period_start_ms: 0,
        text_templates: text_templates.as_ref(),
        // Marking the actual final segment of a bounded (start/stop-configured) live window is a
        // deliberate simplification left for the ingest scheduler, which already tracks
        // lastSegNrToSend explicitly; the pull path always serves "not last" segments.
        is_last: false,
    };

    let materialized = segment::write_segment(req).await?;

    let content_type = content_type_for_ext(ext);
    match materialized {
        MaterializedSegment::Buffered(bytes) => {
            Ok(([("content-type", content_type)], bytes).into_response())
        },
        MaterializedSegment::Chunked(rx) => {
            let byte_stream = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
            });
            let mut resp = Response::new(Body::from_stream(byte_stream));
            *resp.status_mut() = StatusCode::OK;
            resp.headers_mut().insert("content-type", HeaderValue::from_static(content_type));
            resp.headers_mut().insert("transfer-encoding", HeaderValue::from_static("chunked"));
            Ok(resp)
        },
    }
}

fn content_type_for_ext(ext: &str) -> &'static str {
    match ext {
        "mpd" | "mpp" => "application/dash+xml",
        "mp4" | "m4s" | "cmfv" => "video/mp4",
        "cmfa" => "audio/mp4",
        "cmft" => "application/mp4",
        "jpg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Builds a one-entry template map for [`segment::write_segment`]'s text-synthesis path when
/// `timesubsstpp`/`timesubswvtt` is active for a text representation, keyed "default" so it
/// applies regardless of the representation's id. The cue body is format-appropriate (a minimal
/// TTML `<p>` for stpp, a minimal WebVTT cue for wvtt) and carries a `{wallclock}` placeholder
/// that the materializer fills in with the segment's availability instant.
fn default_text_templates(
    cfg: &urlcfg::ResponseConfig,
    asset: &crate::catalog::Asset,
    rep_id: &str,
) -> Option<HashMap<String, String>> {
    if !cfg.timesubs_stpp && !cfg.timesubs_wvtt {
        return None;
    }
    let rep = asset.representation(rep_id)?;
    if rep.content_kind != crate::catalog::ContentKind::Text {
        return None;
    }
    let template = if rep.codecs.contains("wvtt") {
        "WEBVTT\n\n00:00:00.000 --> 00:00:10.000\nLive caption at {wallclock}\n".to_string()
    } else {
        "<p begin=\"0s\" end=\"10s\">Live caption at {wallclock}</p>".to_string()
    };
    let mut templates = HashMap::new();
    templates.insert("default".to_string(), template);
    Some(templates)
}

fn wall_clock_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
