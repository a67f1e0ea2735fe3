//! C6: segment materialization, driven through `write_segment` against on-disk fixture segments.

mod common;

use std::time::{Duration, Instant};

use livesim::error::LivesimError;
use livesim::segment::{self, MaterializedSegment, SegSelector, WriteSegmentRequest};
use livesim::urlcfg::ResponseConfig;
use livesim::wrap;

#[tokio::test]
async fn available_segment_is_returned_with_a_rewritten_sequence_number() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let cfg = ResponseConfig::default();
    let rep = asset.representation(common::VIDEO_REP).unwrap();
    let nr = rep.start_nr();
    let avail_ms = wrap::calc_segment_availability_time(&asset, rep, nr, 0, 0, &cfg).unwrap();

    let req = WriteSegmentRequest {
        cfg: &cfg, drm: None, asset: &asset, rep_id: common::VIDEO_REP,
        selector: SegSelector::Number(nr), now_ms: avail_ms, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    match segment::write_segment(req).await.unwrap() {
        MaterializedSegment::Buffered(bytes) => {
            assert!(bytes.len() > 8);
            assert_eq!(&bytes[4..8], b"moof");
        },
        MaterializedSegment::Chunked(_) => panic!("expected a buffered segment with no chunkdur configured"),
    }
}

#[tokio::test]
async fn segment_requested_before_its_availability_time_is_too_early() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let cfg = ResponseConfig::default();
    let rep = asset.representation(common::VIDEO_REP).unwrap();
    let nr = rep.start_nr() + 3;
    let avail_ms = wrap::calc_segment_availability_time(&asset, rep, nr, 0, 0, &cfg).unwrap();

    let req = WriteSegmentRequest {
        cfg: &cfg, drm: None, asset: &asset, rep_id: common::VIDEO_REP,
        selector: SegSelector::Number(nr), now_ms: avail_ms - 10_000, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    let err = segment::write_segment(req).await.unwrap_err();
    assert!(matches!(err, LivesimError::TooEarly { .. }));
}

#[tokio::test]
async fn segment_fallen_out_of_the_time_shift_buffer_is_gone() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let mut cfg = ResponseConfig::default();
    cfg.tsbd_s = Some(5.0);
    let rep = asset.representation(common::VIDEO_REP).unwrap();
    let nr = rep.start_nr();
    let avail_ms = wrap::calc_segment_availability_time(&asset, rep, nr, 0, 0, &cfg).unwrap();

    let req = WriteSegmentRequest {
        cfg: &cfg, drm: None, asset: &asset, rep_id: common::VIDEO_REP,
        selector: SegSelector::Number(nr), now_ms: avail_ms + 60_000, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    let err = segment::write_segment(req).await.unwrap_err();
    assert!(matches!(err, LivesimError::Gone));
}

#[tokio::test]
async fn init_segment_is_served_regardless_of_availability() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let cfg = ResponseConfig::default();
    let req = WriteSegmentRequest {
        cfg: &cfg, drm: None, asset: &asset, rep_id: common::VIDEO_REP,
        selector: SegSelector::Init, now_ms: 0, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    match segment::write_segment(req).await.unwrap() {
        MaterializedSegment::Buffered(_) => {},
        MaterializedSegment::Chunked(_) => panic!("init segments are never chunked"),
    }
}

/// With `chunkdur_s` set, `write_segment` returns a `Chunked` receiver that emits one piece per
/// scheduled chunk-availability instant (spec §4.6 item 7), paced in real time rather than sent
/// back-to-back, and whose concatenation reproduces exactly what the buffered path would send.
#[tokio::test]
async fn chunked_segment_paces_delivery_and_reconstructs_the_same_bytes() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let rep = asset.representation(common::VIDEO_REP).unwrap();
    let nr = rep.start_nr();

    let mut chunked_cfg = ResponseConfig::default();
    chunked_cfg.chunkdur_s = Some(0.5); // 2.0s segment / 0.5s chunks => 4 chunks, 500ms apart
    let avail_ms = wrap::calc_segment_availability_time(&asset, rep, nr, 0, 0, &chunked_cfg).unwrap();
    // Arrive partway through the segment's chunk schedule so only the later chunks need to wait.
    let now_ms = avail_ms + 1200;

    let buffered_cfg = ResponseConfig::default();
    let buffered_req = WriteSegmentRequest {
        cfg: &buffered_cfg, drm: None, asset: &asset, rep_id: common::VIDEO_REP,
        selector: SegSelector::Number(nr), now_ms, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    let expected = match segment::write_segment(buffered_req).await.unwrap() {
        MaterializedSegment::Buffered(bytes) => bytes,
        MaterializedSegment::Chunked(_) => panic!("expected a buffered segment with no chunkdur configured"),
    };

    let chunked_req = WriteSegmentRequest {
        cfg: &chunked_cfg, drm: None, asset: &asset, rep_id: common::VIDEO_REP,
        selector: SegSelector::Number(nr), now_ms, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    let mut rx = match segment::write_segment(chunked_req).await.unwrap() {
        MaterializedSegment::Chunked(rx) => rx,
        MaterializedSegment::Buffered(_) => panic!("expected a chunked segment with chunkdur configured"),
    };

    let started = Instant::now();
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    let elapsed = started.elapsed();

    assert_eq!(chunks.len(), 4, "expected one chunk per scheduled chunk-availability instant");
    let reconstructed: Vec<u8> = chunks.iter().flatten().copied().collect();
    assert_eq!(reconstructed, expected.to_vec());
    // The last chunk's scheduled instant (avail_ms + 1500ms) is ~300ms after `now_ms`; a
    // back-to-back (unpaced) sink would drain in well under that.
    assert!(elapsed >= Duration::from_millis(200), "chunks were not paced: arrived after {elapsed:?}");
}

#[tokio::test]
async fn unknown_representation_is_not_found() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let cfg = ResponseConfig::default();
    let req = WriteSegmentRequest {
        cfg: &cfg, drm: None, asset: &asset, rep_id: "does-not-exist",
        selector: SegSelector::Number(1), now_ms: 0, ast_ms: 0, period_start_ms: 0,
        text_templates: None, is_last: false,
    };
    let err = segment::write_segment(req).await.unwrap_err();
    assert!(matches!(err, LivesimError::NotFound(_)));
}
