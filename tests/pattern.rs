//! C4 canonical-Pattern collapsing (the 2024 MPD amendment), against a representation whose
//! segment durations never reduce to plain run-length encoding: a 4-segment cycle with one odd
//! duration out, repeated several times, matching spec.md's concrete scenario.

mod common;

use livesim::catalog::{CatalogRepresentation, ContentKind, SegmentTableEntry};
use livesim::timeline;

fn make_rep(durations: &[i64], timescale: u64) -> CatalogRepresentation {
    let mut t = 0i64;
    let segments = durations.iter().enumerate().map(|(i, &d)| {
        let e = SegmentTableEntry {
            idx: i, start_time: t, end_time: t + d, nr: 1 + i as u64, size: 1000,
            file_ref: std::path::PathBuf::new(),
        };
        t += d;
        e
    }).collect();
    CatalogRepresentation {
        id: "v1".into(), adaptation_set_id: 0, content_kind: ContentKind::Video,
        codecs: "avc1".into(), mime_type: "video/mp4".into(), bandwidth: 1_000_000,
        media_timescale: timescale, sample_rate: None, default_sample_duration: None,
        edit_list_offset: 0, init_segment: bytes::Bytes::new(), segments,
    }
}

#[test]
fn four_segment_cycle_collapses_to_one_pattern_entry() {
    let durations = [96256, 96256, 96256, 95232].repeat(6);
    let rep = make_rep(&durations, 48000);
    let entries = timeline::generate_timeline_entries(&rep, 0, 1_000_000_000, 0, 0, None, true).unwrap();
    assert_eq!(entries.s_list.len(), 1);
    let s = &entries.s_list[0];
    assert!(s.pattern.is_some(), "expected a <Pattern> child on the collapsed <S>");
    let pattern = s.pattern.as_ref().unwrap();
    let sum: i64 = pattern.entries.iter().map(|p| p.d * (p.r.unwrap_or(0) + 1)).sum();
    assert_eq!(sum, 96256 * 3 + 95232);
}

#[test]
fn pattern_entry_offset_tracks_the_starting_phase() {
    let durations = [96256, 96256, 96256, 95232].repeat(6);
    let rep = make_rep(&durations, 48000);
    // window starting mid-cycle (skip the first segment, whose end is at ts=96256) should report
    // a non-zero patternEntry
    let entries = timeline::generate_timeline_entries(&rep, 2006, 1_000_000_000, 0, 0, None, true).unwrap();
    let pattern_entry = entries.s_list[0].pattern_entry.expect("pattern offset recorded");
    assert_eq!(pattern_entry, 1);
}

#[test]
fn uniform_durations_never_produce_a_pattern() {
    let durations = [2000; 8];
    let rep = make_rep(&durations, 1000);
    let entries = timeline::generate_timeline_entries(&rep, 0, 16_000, 0, 0, None, true).unwrap();
    assert!(entries.s_list[0].pattern.is_none(), "plain run-length encoding should win when there's no shorter repeating unit");
}
