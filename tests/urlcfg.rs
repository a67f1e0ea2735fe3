//! C2: URL config parsing, against paths that resolve into the catalog fixture.

mod common;

use livesim::error::LivesimError;
use livesim::urlcfg::{self, AddressingMode};

#[test]
fn parsed_content_part_resolves_through_the_catalog() {
    let (_tmp, catalog) = common::build_catalog();
    let parsed = urlcfg::parse_path(&format!("startNr_5/{}/Manifest.mpd", common::ASSET_PATH)).unwrap();
    assert_eq!(parsed.cfg.start_nr, Some(5));
    let asset = catalog.find_asset(&parsed.content_part).expect("content part should resolve");
    assert_eq!(asset.path, common::ASSET_PATH);
}

#[test]
fn segtimelinenr_pattern_sets_number_keyed_pattern_mode() {
    let parsed = urlcfg::parse_path(&format!("segtimelinenr_pattern/{}/Manifest.mpd", common::ASSET_PATH)).unwrap();
    assert_eq!(parsed.cfg.addressing_mode, AddressingMode::SegmentTimelineNrPattern);
    assert!(!parsed.cfg.addressing_mode.uses_time_key());
}

#[test]
fn ssr_option_parses_adaptation_set_id_pairs() {
    let parsed = urlcfg::parse_path(&format!("ssr_1-2/{}/Manifest.mpd", common::ASSET_PATH)).unwrap();
    assert_eq!(parsed.cfg.ssr_pairs, vec![(1, 2)]);
}

#[test]
fn annexi_option_parses_key_value_pairs() {
    let parsed = urlcfg::parse_path(&format!("annexI_customer=acme,region=eu/{}/Manifest.mpd", common::ASSET_PATH)).unwrap();
    let map = parsed.cfg.annex_i_query.unwrap();
    assert_eq!(map.get("customer").map(String::as_str), Some("acme"));
    assert_eq!(map.get("region").map(String::as_str), Some("eu"));
}

#[test]
fn malformed_eccp_value_is_a_typed_url_option_error() {
    let err = urlcfg::parse_path(&format!("eccp_rot13/{}/Manifest.mpd", common::ASSET_PATH)).unwrap_err();
    match err {
        LivesimError::UrlOption { reason, .. } => assert!(reason.contains("cenc or cbcs")),
        other => panic!("expected UrlOption, got {other:?}"),
    }
}

#[test]
fn utc_none_clears_any_earlier_methods_in_the_same_token() {
    let parsed = urlcfg::parse_path(&format!("utc_httpiso,none/{}/Manifest.mpd", common::ASSET_PATH)).unwrap();
    assert!(parsed.cfg.utc_methods.is_empty());
}
