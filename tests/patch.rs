//! MPD-Patch generation (C5, continued): diffing two successive live manifests of the same asset.

mod common;

use std::collections::HashMap;

use livesim::manifest::{self, SynthesisContext};
use livesim::urlcfg::ResponseConfig;

#[test]
fn pure_append_is_expressed_as_an_add_operation() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    let cfg = ResponseConfig::default();
    let empty_query = HashMap::new();
    let ast_ms = 1_713_000_000_000;

    let old_ctx = SynthesisContext {
        asset: &asset, cfg: &cfg, now_ms: ast_ms + 20_000, ast_ms, base_url: "https://example.test", actual_query: &empty_query,
    };
    let new_ctx = SynthesisContext {
        asset: &asset, cfg: &cfg, now_ms: ast_ms + 22_000, ast_ms, base_url: "https://example.test", actual_query: &empty_query,
    };
    let old = manifest::synthesize_live_mpd(&old_ctx, "Manifest.mpd").unwrap();
    let new = manifest::synthesize_live_mpd(&new_ctx, "Manifest.mpd").unwrap();

    let patch = manifest::generate_patch(&old, &new);
    assert!(!patch.add.is_empty(), "a 2s tick forward should append new <S> entries, not replace the timeline");
    assert_eq!(patch.publish_time, new.publishTime);
}

#[test]
fn validate_patch_request_enforces_the_publish_tick_and_ttl() {
    let old_ms = 1_713_252_878_000;
    assert!(manifest::validate_patch_request(old_ms, old_ms + 100, 2000, 60).is_err());
    assert!(manifest::validate_patch_request(old_ms, old_ms + 2000, 2000, 60).is_ok());
    assert!(manifest::validate_patch_request(old_ms, old_ms + 61_000, 2000, 60).is_err());
}
