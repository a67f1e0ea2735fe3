//! C5: manifest synthesis, run end to end against the catalog fixture.

mod common;

use std::collections::HashMap;

use livesim::manifest::{self, SynthesisContext};
use livesim::urlcfg::ResponseConfig;

#[test]
fn synthesized_manifest_is_dynamic_and_serializes() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let cfg = ResponseConfig::default();
    let empty_query = HashMap::new();

    let ast_ms = 1_713_000_000_000;
    let now_ms = ast_ms + 45_000;
    let ctx = SynthesisContext {
        asset: &asset, cfg: &cfg, now_ms, ast_ms, base_url: "https://example.test", actual_query: &empty_query,
    };
    let mpd = manifest::synthesize_live_mpd(&ctx, "Manifest.mpd").unwrap();
    assert_eq!(mpd.mpdtype.as_deref(), Some("dynamic"));
    assert!(mpd.mediaPresentationDuration.is_none(), "a dynamic manifest carries no fixed duration");
    assert!(mpd.availabilityStartTime.is_some());

    let xml = livesim::serialize(&mpd).unwrap();
    assert!(xml.contains("dynamic"));
    assert!(xml.contains(common::VIDEO_REP));
}

#[test]
fn ltgt_option_adds_a_service_description_latency_element() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let mut cfg = ResponseConfig::default();
    cfg.ltgt_ms = Some(3000);
    let empty_query = HashMap::new();
    let ctx = SynthesisContext {
        asset: &asset, cfg: &cfg, now_ms: 1_713_000_045_000, ast_ms: 1_713_000_000_000,
        base_url: "https://example.test", actual_query: &empty_query,
    };
    let mpd = manifest::synthesize_live_mpd(&ctx, "Manifest.mpd").unwrap();
    let latency = mpd.ServiceDescription.unwrap().Latency.unwrap();
    assert_eq!(latency.target, Some(3000.0));
}

#[test]
fn periods_not_a_multiple_of_segment_duration_is_rejected() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let mut cfg = ResponseConfig::default();
    // 3600s/7 isn't a whole number of milliseconds divisible by the 2000ms segment duration
    cfg.periods_per_hour = Some(7);
    let empty_query = HashMap::new();
    let ctx = SynthesisContext {
        asset: &asset, cfg: &cfg, now_ms: 1_713_000_045_000, ast_ms: 1_713_000_000_000,
        base_url: "https://example.test", actual_query: &empty_query,
    };
    let err = manifest::synthesize_live_mpd(&ctx, "Manifest.mpd").unwrap_err();
    assert!(matches!(err, livesim::error::LivesimError::PeriodNotMultiple { .. }));
}

#[test]
fn missing_required_annex_i_query_param_is_rejected() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let mut cfg = ResponseConfig::default();
    let mut required = HashMap::new();
    required.insert("customer".to_string(), String::new());
    cfg.annex_i_query = Some(required);
    let empty_query = HashMap::new();
    let ctx = SynthesisContext {
        asset: &asset, cfg: &cfg, now_ms: 1_713_000_045_000, ast_ms: 1_713_000_000_000,
        base_url: "https://example.test", actual_query: &empty_query,
    };
    let err = manifest::synthesize_live_mpd(&ctx, "Manifest.mpd").unwrap_err();
    assert!(matches!(err, livesim::error::LivesimError::MissingAnnexIQuery(_)));
}
