//! Shared fixture for the integration test suite: a tiny two-representation VoD asset (one
//! video, one audio) written to a temporary directory in the shape `Catalog::build` expects,
//! plus the minimal ISO-BMFF box bytes the segment materializer needs to rewrite.
//!
//! The fixture deliberately mirrors the DASH-IF `testpic_2s` naming convention used throughout
//! spec.md's concrete scenarios (§8), without attempting to reproduce its exact segment count or
//! byte contents.

use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

pub const ASSET_PATH: &str = "testpic_2s";
pub const VIDEO_REP: &str = "V300";
pub const AUDIO_REP: &str = "A48";
pub const TEXT_REP: &str = "STPP0";
/// one loop: 5 segments of 2000ms each, video timescale 1000
pub const SEGMENTS_PER_LOOP: u64 = 5;
pub const VIDEO_SEG_DUR_TS: i64 = 2000;
pub const VIDEO_TIMESCALE: u64 = 1000;
pub const AUDIO_TIMESCALE: u64 = 48000;
/// matches one 2s video segment exactly, so audio-follows-video alignment is exact
pub const AUDIO_SEG_DUR_TS: i64 = 96_000;

fn static_mpd_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-live:2011" type="static" minBufferTime="PT2S" mediaPresentationDuration="PT10S">
  <Period id="p0">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4" codecs="avc1.640028" segmentAlignment="true">
      <Representation id="{VIDEO_REP}" bandwidth="300000" width="640" height="360">
        <SegmentTemplate media="$RepresentationID$/$Number$.m4s" initialization="$RepresentationID$/init.mp4" timescale="{VIDEO_TIMESCALE}" startNumber="1">
          <SegmentTimeline>
            <S t="0" d="{VIDEO_SEG_DUR_TS}" r="{}"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
    <AdaptationSet id="2" contentType="audio" mimeType="audio/mp4" codecs="mp4a.40.2">
      <Representation id="{AUDIO_REP}" bandwidth="48000" audioSamplingRate="{AUDIO_TIMESCALE}">
        <SegmentTemplate media="$RepresentationID$/$Number$.m4s" initialization="$RepresentationID$/init.mp4" timescale="{AUDIO_TIMESCALE}" startNumber="1">
          <SegmentTimeline>
            <S t="0" d="{AUDIO_SEG_DUR_TS}" r="{}"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
    <AdaptationSet id="3" contentType="text" mimeType="application/mp4" codecs="stpp">
      <Representation id="{TEXT_REP}" bandwidth="1000">
        <SegmentTemplate media="$RepresentationID$/$Number$.m4s" initialization="$RepresentationID$/init.mp4" timescale="{VIDEO_TIMESCALE}" startNumber="1">
          <SegmentTimeline>
            <S t="0" d="{VIDEO_SEG_DUR_TS}" r="{}"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>
"#,
        SEGMENTS_PER_LOOP - 1,
        SEGMENTS_PER_LOOP - 1,
        SEGMENTS_PER_LOOP - 1,
    )
}

/// A minimal `moof`(`mfhd`+`traf`(`tfhd`+`tfdt`))+`mdat` fragment, valid enough for
/// `segment::write_segment`'s box surgery to locate and patch.
fn build_segment_bytes(seq: u32, decode_time: u64) -> Vec<u8> {
    let mut tfdt = BytesMut::new();
    tfdt.put_u32(20);
    tfdt.put_slice(b"tfdt");
    tfdt.put_u32(1 << 24); // version 1, no flags
    tfdt.put_u64(decode_time);

    let mut tfhd = BytesMut::new();
    tfhd.put_u32(16);
    tfhd.put_slice(b"tfhd");
    tfhd.put_u32(0);
    tfhd.put_u32(1);

    let mut traf = BytesMut::new();
    traf.put_u32(8 + tfhd.len() as u32 + tfdt.len() as u32);
    traf.put_slice(b"traf");
    traf.put_slice(&tfhd);
    traf.put_slice(&tfdt);

    let mut mfhd = BytesMut::new();
    mfhd.put_u32(16);
    mfhd.put_slice(b"mfhd");
    mfhd.put_u32(0);
    mfhd.put_u32(seq);

    let mut moof = BytesMut::new();
    moof.put_u32(8 + mfhd.len() as u32 + traf.len() as u32);
    moof.put_slice(b"moof");
    moof.put_slice(&mfhd);
    moof.put_slice(&traf);

    let mut mdat = BytesMut::new();
    let payload = b"0123456789abcdef";
    mdat.put_u32(8 + payload.len() as u32);
    mdat.put_slice(b"mdat");
    mdat.put_slice(payload);

    let mut out = Vec::new();
    out.extend_from_slice(&moof);
    out.extend_from_slice(&mdat);
    out
}

/// Writes the fixture asset under `root`, returning the asset's directory.
pub fn write_asset(root: &Path) -> PathBuf {
    let asset_dir = root.join(ASSET_PATH);
    std::fs::create_dir_all(&asset_dir).expect("create asset dir");
    std::fs::write(asset_dir.join("Manifest.mpd"), static_mpd_xml()).expect("write manifest");

    for rep in [VIDEO_REP, AUDIO_REP, TEXT_REP] {
        std::fs::create_dir_all(asset_dir.join(rep)).expect("create rep dir");
    }

    for nr in 1..=SEGMENTS_PER_LOOP {
        let video_decode_time = (nr - 1) as u64 * VIDEO_SEG_DUR_TS as u64;
        std::fs::write(
            asset_dir.join(VIDEO_REP).join(format!("{nr}.m4s")),
            build_segment_bytes(nr as u32, video_decode_time),
        ).expect("write video segment");

        let audio_decode_time = (nr - 1) as u64 * AUDIO_SEG_DUR_TS as u64;
        std::fs::write(
            asset_dir.join(AUDIO_REP).join(format!("{nr}.m4s")),
            build_segment_bytes(nr as u32, audio_decode_time),
        ).expect("write audio segment");

        // Same timing as the video track; contents are irrelevant since `timesubsstpp` makes
        // the server synthesize text samples instead of reading these bytes.
        std::fs::write(
            asset_dir.join(TEXT_REP).join(format!("{nr}.m4s")),
            build_segment_bytes(nr as u32, video_decode_time),
        ).expect("write text segment");
    }

    asset_dir
}

/// Builds the fixture asset in a fresh temp dir and loads it through `Catalog::build`, exactly
/// the path production startup takes.
pub fn build_catalog() -> (tempfile::TempDir, livesim::catalog::Catalog) {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_asset(tmp.path());
    let catalog = livesim::catalog::Catalog::build(tmp.path()).expect("build catalog");
    (tmp, catalog)
}
