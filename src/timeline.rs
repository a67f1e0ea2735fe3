//! C4: timeline-entry generator.
//!
//! Produces the `<S>` run-length list covering one wrap window for a single representation:
//! plain run-length encoding, audio-follows-video boundary alignment for dependent audio
//! representations, canonical Pattern collapsing (the 2024 MPD amendment), and sub-segment
//! chunking for low-latency delivery.

use crate::catalog::CatalogRepresentation;
use crate::error::LivesimError;
use crate::wrap;
use crate::{Pattern, P, S};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSegmentInfo {
    pub nr: u64,
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct TimelineEntries {
    pub s_list: Vec<S>,
    pub start_nr: u64,
    pub media_timescale: u64,
    pub last_segment_info: LastSegmentInfo,
}

/// One (start, end, nr) triple in a representation's own media timescale, already unwrapped
/// across loop boundaries and rebased relative to the owning period's start.
#[derive(Debug, Clone, Copy)]
struct Boundary {
    start: i64,
    end: i64,
    nr: u64,
}

impl Boundary {
    fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Collects every segment whose end time falls in `[window_start_ms + ato_ms, window_end_ms +
/// ato_ms]`, in the representation's own timescale, rebased so that `period_start_ts` reads as
/// zero.
fn collect_boundaries(
    rep: &CatalogRepresentation,
    window_start_ms: i64,
    window_end_ms: i64,
    ato_ms: i64,
    period_start_ts: i64,
) -> Result<Vec<Boundary>, LivesimError> {
    let lo_ts = wrap::ms_to_ts(window_start_ms + ato_ms, rep.media_timescale);
    let hi_ts = wrap::ms_to_ts(window_end_ms + ato_ms, rep.media_timescale);
    let first_nr = wrap::first_nr_with_end_geq(rep, lo_ts)?;
    let last_nr = wrap::last_nr_with_end_leq(rep, hi_ts)?;
    if last_nr < first_nr {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity((last_nr - first_nr + 1) as usize);
    for nr in first_nr..=last_nr {
        let start = wrap::segment_start_time_ts(rep, nr)? - period_start_ts;
        let end = wrap::segment_end_time_ts(rep, nr)? - period_start_ts;
        out.push(Boundary { start, end, nr });
    }
    Ok(out)
}

/// Plain (non-audio-dependent) timeline generation for one representation over a wrap window.
pub fn generate_timeline_entries(
    rep: &CatalogRepresentation,
    window_start_ms: i64,
    window_end_ms: i64,
    ato_ms: i64,
    period_start_ts: i64,
    chunkdur_s: Option<f64>,
    use_pattern: bool,
) -> Result<TimelineEntries, LivesimError> {
    let boundaries = collect_boundaries(rep, window_start_ms, window_end_ms, ato_ms, period_start_ts)?;
    build_entries(rep, &boundaries, chunkdur_s, use_pattern)
}

/// Audio-follows-video timeline generation: `ref_rep` is the reference video representation of
/// the period, `audio_rep` the dependent audio representation being aligned to it.
pub fn generate_timeline_entries_from_ref(
    ref_rep: &CatalogRepresentation,
    audio_rep: &CatalogRepresentation,
    window_start_ms: i64,
    window_end_ms: i64,
    ato_ms: i64,
    period_start_ts: i64,
    chunkdur_s: Option<f64>,
    use_pattern: bool,
) -> Result<TimelineEntries, LivesimError> {
    let video_boundaries = collect_boundaries(ref_rep, window_start_ms, window_end_ms, ato_ms, period_start_ts)?;
    let frame_dur = audio_rep.default_sample_duration.unwrap_or(1).max(1) as i64;
    let edit_offset = audio_rep.edit_list_offset;

    let mut audio_boundaries = Vec::with_capacity(video_boundaries.len());
    let mut nr = audio_rep.start_nr();
    for (i, vb) in video_boundaries.iter().enumerate() {
        let raw_start = audio_boundary_ts(vb.start, ref_rep.media_timescale, audio_rep.media_timescale, frame_dur, edit_offset);
        let raw_end = audio_boundary_ts(vb.end, ref_rep.media_timescale, audio_rep.media_timescale, frame_dur, edit_offset);

        let is_absolute_origin = vb.nr == ref_rep.start_nr() && period_start_ts == 0;
        let (start, end) = if i == 0 && is_absolute_origin && raw_start < 0 {
            // The very first audio boundary of the whole stream would precede the origin because
            // of the edit-list offset; pin it to zero and absorb the offset into this segment's
            // duration instead of shifting every later boundary.
            (0, raw_end - edit_offset.max(0))
        } else {
            (raw_start, raw_end)
        };
        // audio segments never start before their matching video segment
        let start = start.max(vb.start.saturating_sub(frame_dur));
        audio_boundaries.push(Boundary { start, end: end.max(start), nr });
        nr += 1;
    }
    build_entries(audio_rep, &audio_boundaries, chunkdur_s, use_pattern)
}

fn audio_boundary_ts(video_ts: i64, video_scale: u64, audio_scale: u64, frame_dur: i64, edit_offset: i64) -> i64 {
    let raw = wrap::scale_time(video_ts, video_scale, audio_scale);
    let grid = raw.div_euclid(frame_dur) * frame_dur;
    grid - edit_offset
}

fn build_entries(
    rep: &CatalogRepresentation,
    boundaries: &[Boundary],
    chunkdur_s: Option<f64>,
    use_pattern: bool,
) -> Result<TimelineEntries, LivesimError> {
    if boundaries.is_empty() {
        return Ok(TimelineEntries {
            s_list: Vec::new(),
            start_nr: rep.start_nr(),
            media_timescale: rep.media_timescale,
            last_segment_info: LastSegmentInfo { nr: rep.start_nr(), time: 0 },
        });
    }

    let k = chunk_count(rep, boundaries[0].duration(), chunkdur_s)?;

    let last = boundaries.last().expect("checked non-empty above");
    let last_segment_info = LastSegmentInfo { nr: last.nr, time: last.start };

    if use_pattern {
        if let Some(entries) = try_pattern_encode(rep, boundaries, k)? {
            return Ok(TimelineEntries {
                s_list: entries,
                start_nr: boundaries[0].nr,
                media_timescale: rep.media_timescale,
                last_segment_info,
            });
        }
    }

    Ok(TimelineEntries {
        s_list: run_length_encode(boundaries, k)?,
        start_nr: boundaries[0].nr,
        media_timescale: rep.media_timescale,
        last_segment_info,
    })
}

pub(crate) fn chunk_count(rep: &CatalogRepresentation, seg_dur_ts: i64, chunkdur_s: Option<f64>) -> Result<Option<u64>, LivesimError> {
    let Some(chunkdur_s) = chunkdur_s else { return Ok(None) };
    let seg_dur_s = seg_dur_ts as f64 / rep.media_timescale as f64;
    if chunkdur_s >= seg_dur_s {
        return Err(LivesimError::UrlOption {
            token: format!("chunkdur_{chunkdur_s}"),
            reason: format!("chunkdur ({chunkdur_s}s) must be less than the segment duration ({seg_dur_s}s)"),
        });
    }
    Ok(Some((seg_dur_s / chunkdur_s).ceil() as u64))
}

/// Collapses runs of identical consecutive durations to `{d, r=count-1}`, carrying `@t` on the
/// first entry only.
fn run_length_encode(boundaries: &[Boundary], k: Option<u64>) -> Result<Vec<S>, LivesimError> {
    let mut out: Vec<S> = Vec::new();
    for (i, b) in boundaries.iter().enumerate() {
        let d = b.duration();
        if let Some(last) = out.last_mut() {
            if last.d == d {
                last.r = Some(last.r.unwrap_or(0) + 1);
                continue;
            }
        }
        let mut s = S::plain(if i == 0 { Some(b.start) } else { None }, d, None);
        s.k = k;
        out.push(s);
    }
    Ok(out)
}

/// Attempts to collapse `boundaries` into a single `<S>` with a `<Pattern>` child, per the 2024
/// MPD amendment. Returns `None` when no repeating sub-unit shorter than the whole window exists
/// (plain run-length encoding is then used instead).
fn try_pattern_encode(rep: &CatalogRepresentation, boundaries: &[Boundary], k: Option<u64>) -> Result<Option<Vec<S>>, LivesimError> {
    let loop_len = rep.segments.len();
    if loop_len < 2 {
        return Ok(None);
    }
    let loop_durations: Vec<i64> = rep.segments.iter().map(|s| s.duration()).collect();
    let period = find_period(&loop_durations);
    if period <= 1 || period >= loop_len {
        return Ok(None);
    }
    if boundaries.len() < period {
        // Not enough of the window to even confirm one full cycle; fall back to plain encoding.
        return Ok(None);
    }

    let canonical = canonicalize_pattern(&loop_durations[..period]);
    let rotation = rotation_offset(&loop_durations[..period], &canonical);

    let start_nr = rep.start_nr();
    let first_inner_idx = ((boundaries[0].nr - start_nr) % loop_len as u64) as usize;
    let phase = first_inner_idx % period;
    let pattern_entry = ((phase as i64 - rotation).rem_euclid(period as i64)) as u64;

    let pattern = Pattern {
        entries: collapse_pattern_runs(&canonical),
    };
    let sum_d: i64 = canonical.iter().sum();

    let mut s = S::plain(Some(boundaries[0].start), sum_d, None);
    s.k = k;
    s.pattern_entry = Some(pattern_entry);
    s.pattern = Some(pattern);
    Ok(Some(vec![s]))
}

/// The smallest `period` dividing `len(durations)` such that `durations[i] == durations[i %
/// period]` for every `i`; returns `durations.len()` if no shorter period exists.
fn find_period(durations: &[i64]) -> usize {
    let len = durations.len();
    for period in 1..len {
        if len % period != 0 {
            continue;
        }
        if durations.iter().enumerate().all(|(i, &d)| d == durations[i % period]) {
            return period;
        }
    }
    len
}

/// Rotates `pattern` so that its maximum-duration entry comes first (DASH-IF's canonical form),
/// ties broken by earliest original index.
fn canonicalize_pattern(pattern: &[i64]) -> Vec<i64> {
    let max_idx = pattern.iter().enumerate()
        .max_by_key(|&(i, &d)| (d, std::cmp::Reverse(i)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = pattern[max_idx..].to_vec();
    rotated.extend_from_slice(&pattern[..max_idx]);
    rotated
}

fn rotation_offset(original: &[i64], canonical: &[i64]) -> i64 {
    for rot in 0..original.len() {
        let matches = canonical.iter().enumerate()
            .all(|(i, &d)| d == original[(rot + i) % original.len()]);
        if matches {
            return rot as i64;
        }
    }
    0
}

fn collapse_pattern_runs(durations: &[i64]) -> Vec<P> {
    let mut out: Vec<P> = Vec::new();
    for &d in durations {
        if let Some(last) = out.last_mut() {
            if last.d == d {
                last.r = Some(last.r.unwrap_or(0) + 1);
                continue;
            }
        }
        out.push(P { d, r: None });
    }
    out
}
