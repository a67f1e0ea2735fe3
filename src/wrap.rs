//! C3: wrap/availability calculus.
//!
//! Pure functions over `(asset, config, nowMS)` that locate a wall-clock instant within the
//! looping VoD timeline. Nothing here touches I/O or the HTTP layer; `manifest.rs` and
//! `segment.rs` are the only callers.

use crate::catalog::{Asset, CatalogRepresentation};
use crate::error::LivesimError;
use crate::urlcfg::{AddressingMode, Ato, ResponseConfig};

/// Position within the first and last loop iteration covered by the time-shift buffer window,
/// and how many loops were crossed getting there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapTimes {
    pub start_rel_ms: i64,
    pub now_rel_ms: i64,
    pub start_wraps: i64,
    pub now_wraps: i64,
}

/// `calcWrapTimes`: clamps `now_ms` into `[ast_ms, ast_ms + live_window_ms]` and computes
/// `startRelMS = (nowMS - tsbDur) mod loopDurMS`, plus wrap counts for both ends of the window.
pub fn calc_wrap_times(asset: &Asset, ast_ms: i64, now_ms: i64, tsb_dur_ms: i64, live_window_ms: Option<i64>) -> WrapTimes {
    let loop_dur_ms = asset.loop_dur_ms().max(1);
    let mut clamped_now = now_ms.max(ast_ms);
    if let Some(w) = live_window_ms {
        clamped_now = clamped_now.min(ast_ms + w);
    }
    let now_elapsed = clamped_now - ast_ms;
    let start_elapsed = (now_elapsed - tsb_dur_ms).max(0);

    WrapTimes {
        start_rel_ms: start_elapsed.rem_euclid(loop_dur_ms),
        now_rel_ms: now_elapsed.rem_euclid(loop_dur_ms),
        start_wraps: start_elapsed.div_euclid(loop_dur_ms),
        now_wraps: now_elapsed.div_euclid(loop_dur_ms),
    }
}

/// `setOffsetInAdaptationSet`: clamps `ato` to a non-negative millisecond offset, rejecting
/// infinity when the addressing mode uses an explicit SegmentTimeline (there is no well-defined
/// "always available" point on a timeline with discrete, enumerated entries).
pub fn set_offset_in_adaptation_set(cfg: &ResponseConfig) -> Result<i64, LivesimError> {
    match cfg.ato {
        None => Ok(0),
        Some(Ato::Inf) => {
            if cfg.addressing_mode.is_timeline() {
                Err(LivesimError::AtoInfTimeline)
            } else {
                Ok(i64::MAX)
            }
        },
        Some(Ato::Seconds { millis }) => Ok(millis as i64),
    }
}

/// `calcSegmentAvailabilityTime`: `AST + periodStart + segmentEndTimePT - ato*1000`, all in
/// milliseconds. `nr` is the absolute, ever-increasing segment number (not wrapped).
pub fn calc_segment_availability_time(
    asset: &Asset,
    rep: &CatalogRepresentation,
    nr: u64,
    ast_ms: i64,
    period_start_ms: i64,
    cfg: &ResponseConfig,
) -> Result<i64, LivesimError> {
    let ato_ms = set_offset_in_adaptation_set(cfg)?;
    if ato_ms == i64::MAX {
        // ato=inf outside timeline addressing: the segment is always available, so its
        // availability time is unboundedly in the past.
        return Ok(i64::MIN / 2);
    }
    let end_ts = segment_end_time_ts(rep, nr)?;
    let end_ms = ts_to_ms(end_ts, rep.media_timescale);
    Ok(ast_ms + period_start_ms + end_ms - ato_ms)
}

/// `findLastSegNr`: the greatest `n` such that `calcSegmentAvailabilityTime(n) <= nowMS`.
/// Segment availability times increase strictly and uniformly with `nr` (spec §8 invariant 1),
/// so this is a closed-form division refined by a small local scan to absorb rounding from
/// variable segment durations (patterns, audio frames).
pub fn find_last_seg_nr(
    asset: &Asset,
    rep: &CatalogRepresentation,
    ast_ms: i64,
    period_start_ms: i64,
    now_ms: i64,
    cfg: &ResponseConfig,
) -> Result<u64, LivesimError> {
    let start_nr = rep.start_nr();
    if rep.segments.is_empty() {
        return Err(LivesimError::Internal(format!("representation {} has no segments", rep.id)));
    }
    let avg_dur_ms = rep.loop_duration_ms() / rep.segments.len() as i64;
    if avg_dur_ms <= 0 {
        return Err(LivesimError::Internal(format!("representation {} has zero average duration", rep.id)));
    }
    let elapsed_ms = now_ms - ast_ms - period_start_ms;
    if elapsed_ms < 0 {
        return Ok(start_nr.saturating_sub(1));
    }
    let mut guess = start_nr + (elapsed_ms / avg_dur_ms) as u64;

    // Walk forward while still available, then back off while not yet available: a handful of
    // iterations converges regardless of which direction the average-duration estimate erred in.
    loop {
        let avail = calc_segment_availability_time(asset, rep, guess + 1, ast_ms, period_start_ms, cfg)?;
        if avail <= now_ms {
            guess += 1;
        } else {
            break;
        }
    }
    loop {
        if guess <= start_nr {
            break;
        }
        let avail = calc_segment_availability_time(asset, rep, guess, ast_ms, period_start_ms, cfg)?;
        if avail > now_ms {
            guess -= 1;
        } else {
            break;
        }
    }
    Ok(guess)
}

/// Presentation end time, in `rep`'s media timescale, of absolute segment number `nr` — folding
/// the loop count back into the single-loop segment table via `divmod`.
pub fn segment_end_time_ts(rep: &CatalogRepresentation, nr: u64) -> Result<i64, LivesimError> {
    let (loop_nr, entry) = locate_segment(rep, nr)?;
    Ok(entry.end_time + loop_nr as i64 * rep.loop_duration_ts())
}

pub fn segment_start_time_ts(rep: &CatalogRepresentation, nr: u64) -> Result<i64, LivesimError> {
    let (loop_nr, entry) = locate_segment(rep, nr)?;
    Ok(entry.start_time + loop_nr as i64 * rep.loop_duration_ts())
}

/// `(loopNr, innerIdx) = divmod(nr - startNr, len(segTable))`, returning the segment table entry
/// at `innerIdx`.
pub fn locate_segment(rep: &CatalogRepresentation, nr: u64) -> Result<(u64, &crate::catalog::SegmentTableEntry), LivesimError> {
    let start_nr = rep.start_nr();
    if nr < start_nr {
        return Err(LivesimError::NotFound(format!("segment nr {nr} precedes startNumber {start_nr}")));
    }
    let offset = nr - start_nr;
    let n = rep.segments.len() as u64;
    let loop_nr = offset / n;
    let inner_idx = (offset % n) as usize;
    Ok((loop_nr, &rep.segments[inner_idx]))
}

/// The greatest segment number whose end time (in the representation's media timescale,
/// accounting for loop count) is at most `target_ts`. Used by the timeline generator to find the
/// last `<S>` entry a window covers.
pub fn last_nr_with_end_leq(rep: &CatalogRepresentation, target_ts: i64) -> Result<u64, LivesimError> {
    let start_nr = rep.start_nr();
    if target_ts < 0 || rep.segments.is_empty() {
        return Ok(start_nr.saturating_sub(1));
    }
    let avg = (rep.loop_duration_ts() / rep.segments.len() as i64).max(1);
    let mut guess = start_nr + (target_ts / avg) as u64;
    loop {
        if segment_end_time_ts(rep, guess + 1)? <= target_ts {
            guess += 1;
        } else {
            break;
        }
    }
    loop {
        if guess <= start_nr {
            break;
        }
        if segment_end_time_ts(rep, guess)? > target_ts {
            guess -= 1;
        } else {
            break;
        }
    }
    Ok(guess)
}

/// The least segment number whose end time is at least `target_ts`.
pub fn first_nr_with_end_geq(rep: &CatalogRepresentation, target_ts: i64) -> Result<u64, LivesimError> {
    let candidate = last_nr_with_end_leq(rep, target_ts)?;
    if candidate < rep.start_nr() {
        return Ok(rep.start_nr());
    }
    if segment_end_time_ts(rep, candidate)? < target_ts {
        return Ok(candidate + 1);
    }
    let mut n = candidate;
    while n > rep.start_nr() && segment_end_time_ts(rep, n - 1)? >= target_ts {
        n -= 1;
    }
    Ok(n)
}

/// Proportional-rounding timescale conversion, pinning the boundary so that repeated conversions
/// of the same instant between two timescales are stable (used to align audio segment boundaries
/// to a video reference in `timeline.rs`).
pub fn scale_time(time: i64, from_ts: u64, to_ts: u64) -> i64 {
    if from_ts == to_ts || from_ts == 0 {
        return time;
    }
    let num = time as i128 * to_ts as i128;
    let den = from_ts as i128;
    round_div(num, den) as i64
}

/// Rounds to nearest, ties away from zero, for both positive and negative dividends.
fn round_div(num: i128, den: i128) -> i128 {
    if (num < 0) != (den < 0) {
        (num - den / 2) / den
    } else {
        (num + den / 2) / den
    }
}

fn ts_to_ms(ts: i64, timescale: u64) -> i64 {
    if timescale == 0 {
        return 0;
    }
    ts * 1000 / timescale as i64
}

pub fn ms_to_ts(ms: i64, timescale: u64) -> i64 {
    ms * timescale as i64 / 1000
}
