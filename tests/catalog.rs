//! C1: asset catalog, built from the on-disk fixture exactly as `livesimd` would on startup.

mod common;

use livesim::catalog::ContentKind;

#[test]
fn build_discovers_all_representations() {
    let (_tmp, catalog) = common::build_catalog();
    assert_eq!(catalog.len(), 1);
    let asset = catalog.find_asset(common::ASSET_PATH).expect("asset present");
    assert_eq!(asset.representations.len(), 3);
    assert!(asset.representation(common::VIDEO_REP).is_some());
    assert!(asset.representation(common::AUDIO_REP).is_some());
    assert!(asset.representation(common::TEXT_REP).is_some());
}

#[test]
fn text_representation_is_classified_correctly() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    assert_eq!(asset.representation(common::TEXT_REP).unwrap().content_kind, ContentKind::Text);
}

#[test]
fn segment_tables_satisfy_contiguity_invariants() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    for rep in asset.representations.values() {
        rep.check_invariants().unwrap_or_else(|e| panic!("{}: {e}", rep.id));
    }
}

#[test]
fn ref_representation_is_the_video_one() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    assert_eq!(asset.ref_representation().content_kind, ContentKind::Video);
    assert_eq!(asset.ref_representation().id, common::VIDEO_REP);
}

#[test]
fn loop_duration_matches_fixture_geometry() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(common::ASSET_PATH).unwrap();
    assert_eq!(asset.loop_dur_ms(), 10_000);
}

#[test]
fn find_asset_matches_on_path_prefix_with_mpd_suffix() {
    let (_tmp, catalog) = common::build_catalog();
    let asset = catalog.find_asset(&format!("{}/Manifest.mpd", common::ASSET_PATH))
        .expect("prefix match should find the asset");
    assert_eq!(asset.path, common::ASSET_PATH);
}

#[test]
fn find_asset_returns_none_for_unknown_path() {
    let (_tmp, catalog) = common::build_catalog();
    assert!(catalog.find_asset("no-such-asset").is_none());
}

#[test]
fn asset_paths_lists_every_catalogued_asset() {
    let (_tmp, catalog) = common::build_catalog();
    assert_eq!(catalog.asset_paths(), vec![common::ASSET_PATH]);
}
