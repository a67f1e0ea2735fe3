//! C5: manifest synthesizer.
//!
//! Turns a catalog [`Asset`]'s static MPD into a live `@type=dynamic` manifest for a given
//! [`ResponseConfig`] and wall-clock instant, and generates MPD-Patch documents between two such
//! manifests. This is the largest component by spec share; it leans on `wrap` for availability
//! math and `timeline` for the `<SegmentTimeline>` contents, and owns everything else the DASH-IF
//! low-latency/DRM/patch/multi-period extensions touch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::catalog::{Asset, CatalogRepresentation, ContentKind};
use crate::drm::{self, CpixProfile};
use crate::error::LivesimError;
use crate::timeline::{self, TimelineEntries};
use crate::urlcfg::{AddressingMode, EccpMode, ResponseConfig, UtcMethod};
use crate::wrap;
use crate::{
    AdaptationSet, DescriptorProperty, Latency, Location, Period, PatchDocument, PatchLocation,
    PatchOp, Representation, S, SegmentTemplate, SegmentTimeline, ServiceDescription, UTCTiming, MPD,
};

/// Everything the synthesizer needs beyond the asset and config: server-side knobs that aren't
/// part of the client-visible URL configuration.
pub struct SynthesisContext<'a> {
    pub asset: &'a Asset,
    pub cfg: &'a ResponseConfig,
    pub now_ms: i64,
    /// the server's configured Availability Start Time, epoch milliseconds
    pub ast_ms: i64,
    /// scheme+host the server is reachable at, used to build LA-URL / patch-location URLs
    pub base_url: &'a str,
    /// the incoming request's query string, used to validate Annex I requirements
    pub actual_query: &'a HashMap<String, String>,
}

const DEFAULT_TSBD_S: f64 = 60.0;
const AVAILABILITY_TOLERANCE_MS: i64 = 50;

pub fn synthesize_live_mpd(ctx: &SynthesisContext, mpd_name: &str) -> Result<MPD, LivesimError> {
    let mut mpd = ctx.asset.vod_mpd(mpd_name)
        .ok_or_else(|| LivesimError::NotFound(format!("no such manifest '{mpd_name}' in asset '{}'", ctx.asset.path)))?;

    let ref_rep = ctx.asset.ref_representation();
    let seg_dur_ms = ref_rep.loop_duration_ms() / ctx.asset.ref_representation().segments.len() as i64;
    let tsbd_ms = (ctx.cfg.tsbd_s.unwrap_or(DEFAULT_TSBD_S) * 1000.0) as i64;
    let mup_ms = (ctx.cfg.mup_s.unwrap_or(seg_dur_ms as f64 / 1000.0) * 1000.0) as i64;

    mpd.mpdtype = Some("dynamic".to_string());
    mpd.availabilityStartTime = Some(format_epoch_ms(ctx.ast_ms));
    mpd.publishTime = Some(format_epoch_ms(ctx.now_ms));
    mpd.minimumUpdatePeriod = Some(crate::format_xs_duration(crate::duration_from_ms(mup_ms)));
    mpd.timeShiftBufferDepth = Some(crate::format_xs_duration(crate::duration_from_ms(tsbd_ms)));
    mpd.mediaPresentationDuration = None;
    mpd.suggestedPresentationDelay = Some(crate::format_xs_duration(crate::duration_from_ms(
        ctx.cfg.ltgt_ms.map(|l| l as i64).unwrap_or(2 * seg_dur_ms),
    )));

    let ato_ms = wrap::set_offset_in_adaptation_set(ctx.cfg)?;

    let window_start_ms = ctx.now_ms - ctx.ast_ms - tsbd_ms;
    let window_end_ms = ctx.now_ms - ctx.ast_ms;

    let vod_period = mpd.periods.first().cloned()
        .ok_or_else(|| LivesimError::Internal(format!("asset '{}' MPD has no Period", ctx.asset.path)))?;

    mpd.periods = match ctx.cfg.periods_per_hour {
        None | Some(0) => vec![build_period(
            ctx, &vod_period, ref_rep, 0, "p0", window_start_ms, window_end_ms, ato_ms,
        )?],
        Some(n) => build_multi_period(ctx, &vod_period, ref_rep, n, window_start_ms, window_end_ms, ato_ms)?,
    };

    apply_utc_timing(&mut mpd, &ctx.cfg.utc_methods, ctx.base_url);

    if let Some(ltgt_ms) = ctx.cfg.ltgt_ms {
        mpd.ServiceDescription = Some(ServiceDescription {
            id: Some("0".to_string()),
            Latency: Some(Latency {
                min: Some(ltgt_ms as f64 * 0.75),
                max: Some(ltgt_ms as f64 * 2.0),
                target: Some(ltgt_ms as f64),
                referenceId: Some("0".to_string()),
            }),
        });
    }

    if let Some(ttl) = ctx.cfg.patch_ttl_s {
        let url = build_patch_url(ctx.base_url, &ctx.asset.path, mpd_name, ctx.cfg, ctx.now_ms, ttl);
        mpd.PatchLocation = Some(PatchLocation { ttl: Some(ttl as f64), url });
    }

    if let Some(required) = &ctx.cfg.annex_i_query {
        let missing: Vec<&str> = required.keys()
            .filter(|k| !ctx.actual_query.contains_key(k.as_str()))
            .map(|k| k.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(LivesimError::MissingAnnexIQuery(missing.join(",")));
        }
    }

    if let Some(url) = rewrite_location_url(ctx) {
        mpd.Location = Some(Location { url });
    }

    Ok(mpd)
}

fn build_multi_period(
    ctx: &SynthesisContext,
    vod_period: &Period,
    ref_rep: &CatalogRepresentation,
    periods_per_hour: u32,
    window_start_ms: i64,
    window_end_ms: i64,
    ato_ms: i64,
) -> Result<Vec<Period>, LivesimError> {
    let period_dur_s = 3600.0 / periods_per_hour as f64;
    let period_dur_ms = (period_dur_s * 1000.0).round() as i64;
    let seg_dur_ms = ref_rep.loop_duration_ms() / ref_rep.segments.len() as i64;
    if period_dur_ms % seg_dur_ms != 0 {
        return Err(LivesimError::PeriodNotMultiple { period_s: period_dur_ms as u64 / 1000, seg_ms: seg_dur_ms as u64 });
    }

    let first_period_idx = window_start_ms.div_euclid(period_dur_ms);
    let last_period_idx = window_end_ms.div_euclid(period_dur_ms);

    let mut periods = Vec::new();
    for idx in first_period_idx..=last_period_idx {
        let p_start_ms = idx * period_dur_ms;
        let p_end_ms = p_start_ms + period_dur_ms;
        let clipped_start = p_start_ms.max(window_start_ms);
        let clipped_end = p_end_ms.min(window_end_ms);
        if clipped_end < clipped_start {
            continue;
        }
        let mut period = build_period(
            ctx, vod_period, ref_rep, p_start_ms, &format!("p{idx}"), clipped_start, clipped_end, ato_ms,
        )?;
        period.start = Some(crate::format_xs_duration(crate::duration_from_ms(p_start_ms)));
        period.duration = Some(std::time::Duration::from_millis(period_dur_ms.max(0) as u64));
        periods.push(period);
    }
    Ok(periods)
}

fn build_period(
    ctx: &SynthesisContext,
    vod_period: &Period,
    ref_rep: &CatalogRepresentation,
    period_start_offset_ms: i64,
    period_id: &str,
    window_start_ms: i64,
    window_end_ms: i64,
    ato_ms: i64,
) -> Result<Period, LivesimError> {
    let mut period = vod_period.clone();
    period.id = Some(period_id.to_string());

    for aset in &mut period.adaptations {
        if aset.contentType.is_none() {
            aset.contentType = infer_content_type(aset);
        }

        let is_ref_video = aset.is_video();
        for rep in &mut aset.representations {
            let Some(catalog_rep) = ctx.asset.representation(rep.id.as_deref().unwrap_or_default()) else {
                continue;
            };
            let period_start_ts = wrap::ms_to_ts(period_start_offset_ms, catalog_rep.media_timescale);

            let entries = if !is_ref_video && catalog_rep.content_kind == ContentKind::Audio {
                timeline::generate_timeline_entries_from_ref(
                    ref_rep, catalog_rep, window_start_ms, window_end_ms, ato_ms, period_start_ts,
                    ctx.cfg.chunkdur_s, ctx.cfg.addressing_mode.is_pattern(),
                )?
            } else {
                timeline::generate_timeline_entries(
                    catalog_rep, window_start_ms, window_end_ms, ato_ms, period_start_ts,
                    ctx.cfg.chunkdur_s, ctx.cfg.addressing_mode.is_pattern(),
                )?
            };

            apply_addressing_mode(rep, aset.SegmentTemplate.as_ref(), catalog_rep, &entries, ctx.cfg, ato_ms);
        }

        apply_drm(aset, ctx)?;

        if let Some(required) = &ctx.cfg.annex_i_query {
            let _ = required;
            aset.essential_properties.push(DescriptorProperty {
                schemeIdUri: "urn:mpeg:dash:urlparam:2016".to_string(),
                value: None,
                queryTemplate: Some("$querypart$".to_string()),
                useMPDUrlQuery: Some(true),
            });
        }
    }

    apply_ssr(&mut period, &ctx.cfg.ssr_pairs);

    Ok(period)
}

fn apply_addressing_mode(
    rep: &mut Representation,
    aset_template: Option<&SegmentTemplate>,
    catalog_rep: &CatalogRepresentation,
    entries: &TimelineEntries,
    cfg: &ResponseConfig,
    ato_ms: i64,
) {
    let mut st = rep.SegmentTemplate.clone()
        .or_else(|| aset_template.cloned())
        .unwrap_or_default();

    st.timescale = Some(entries.media_timescale);
    st.presentationTimeOffset = Some(0);

    match cfg.addressing_mode {
        AddressingMode::Number => {
            st.SegmentTimeline = None;
            st.startNumber = Some(entries.start_nr);
            let seg_dur_ts = entries.s_list.first().map(|s| s.d).unwrap_or(0);
            st.duration = Some(seg_dur_ts as u64);
            if !st.media.as_deref().unwrap_or_default().contains("$Number") {
                st.media = Some(default_media_template(catalog_rep, false));
            }
        },
        mode => {
            st.duration = None;
            st.startNumber = Some(entries.start_nr);
            st.SegmentTimeline = Some(SegmentTimeline { segments: entries.s_list.clone() });
            let uses_time = mode.uses_time_key();
            if st.media.as_deref().map(|m| m.contains("$Time$") != uses_time).unwrap_or(true) {
                st.media = Some(default_media_template(catalog_rep, uses_time));
            }
        },
    }

    if ato_ms > 0 && ato_ms != i64::MAX {
        st.availabilityTimeOffset = Some(ato_ms as f64 / 1000.0);
        st.availabilityTimeComplete = Some(false);
    } else if ato_ms == i64::MAX {
        st.availabilityTimeOffset = Some(f64::INFINITY);
        st.availabilityTimeComplete = Some(false);
    }

    rep.SegmentTemplate = Some(st);
}

fn default_media_template(rep: &CatalogRepresentation, use_time: bool) -> String {
    let ext = match rep.content_kind {
        ContentKind::Video => "cmfv",
        ContentKind::Audio => "cmfa",
        ContentKind::Text => "cmft",
        ContentKind::Image => "jpg",
    };
    if use_time {
        format!("$RepresentationID$/$Time$.{ext}")
    } else {
        format!("$RepresentationID$/$Number$.{ext}")
    }
}

fn infer_content_type(aset: &AdaptationSet) -> Option<String> {
    if aset.is_video() {
        Some("video".to_string())
    } else if aset.is_audio() {
        Some("audio".to_string())
    } else if aset.is_text() {
        Some("text".to_string())
    } else {
        None
    }
}

fn apply_utc_timing(mpd: &mut MPD, methods: &[UtcMethod], base_url: &str) {
    mpd.utc_timings.clear();
    for m in methods {
        let (scheme, value) = match m {
            UtcMethod::HttpIso => ("urn:mpeg:dash:utc:http-iso:2014", format!("{base_url}/time/iso")),
            UtcMethod::HttpHead => ("urn:mpeg:dash:utc:http-head:2014", format!("{base_url}/time/head")),
            UtcMethod::Ntp => ("urn:mpeg:dash:utc:ntp:2014", "europe.pool.ntp.org".to_string()),
            UtcMethod::Sntp => ("urn:mpeg:dash:utc:sntp:2014", "europe.pool.ntp.org".to_string()),
            UtcMethod::Direct => ("urn:mpeg:dash:utc:direct:2014", Utc::now().to_rfc3339()),
            UtcMethod::None => continue,
        };
        mpd.utc_timings.push(UTCTiming { schemeIdUri: scheme.to_string(), value });
    }
}

fn apply_drm(aset: &mut AdaptationSet, ctx: &SynthesisContext) -> Result<(), LivesimError> {
    if aset.is_text() {
        return Ok(());
    }
    let la_url = format!("{}/{}/eccp.json", ctx.base_url, ctx.asset.path);

    if let Some(eccp) = ctx.cfg.eccp {
        let eccp_mode = match eccp {
            EccpMode::Cenc => EccpMode::Cenc,
            EccpMode::Cbcs => EccpMode::Cbcs,
        };
        aset.content_protections = drm::clearkey_content_protections(&drm::DEFAULT_KID, eccp_mode, &la_url);
    }
    if let Some(profile_name) = &ctx.cfg.drm_profile {
        let profile = CpixProfile::parse(profile_name)
            .ok_or_else(|| LivesimError::UrlOption { token: format!("drm_{profile_name}"), reason: "unknown CPIX profile".to_string() })?;
        aset.content_protections.push(drm::cpix_content_protection(profile, &drm::DEFAULT_KID, &la_url));
    }
    Ok(())
}

fn apply_ssr(period: &mut Period, pairs: &[(i64, i64)]) {
    for &(a, b) in pairs {
        for id in [a, b] {
            if let Some(aset) = period.adaptations.iter_mut().find(|a| a.id == Some(id)) {
                aset.supplemental_properties.push(DescriptorProperty {
                    schemeIdUri: "urn:mpeg:dash:adaptation-set-switching:2016".to_string(),
                    value: Some(format!("{a},{b}")),
                    queryTemplate: None,
                    useMPDUrlQuery: None,
                });
            }
        }
    }
}

fn build_patch_url(base_url: &str, asset_path: &str, mpd_name: &str, cfg: &ResponseConfig, publish_ms: i64, ttl: u64) -> String {
    let _ = cfg;
    format!(
        "{base_url}/{asset_path}/{mpd_name}?publishTime={}&ttl={ttl}",
        format_epoch_ms(publish_ms)
    )
}

fn rewrite_location_url(ctx: &SynthesisContext) -> Option<String> {
    if ctx.cfg.startrel.is_none() && ctx.cfg.stoprel.is_none() {
        return None;
    }
    let now_s = ctx.now_ms / 1000;
    let start = ctx.cfg.startrel.map(|r| now_s + r).or(ctx.cfg.start);
    let stop = ctx.cfg.stoprel.map(|r| now_s + r).or(ctx.cfg.stop);
    let mut tokens = Vec::new();
    if let Some(s) = start {
        tokens.push(format!("start_{s}"));
    }
    if let Some(s) = stop {
        tokens.push(format!("stop_{s}"));
    }
    Some(format!("{}/{}/{}", ctx.base_url, tokens.join("/"), ctx.asset.path))
}

fn format_epoch_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).expect("epoch 0 is always valid"))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// --- MPD-Patch (C5, continued) ---

/// Validates a patch request's timing before generating the diff: too early if the next
/// publish tick hasn't occurred yet, gone if `publish_time_old_ms` has aged out of the TTL.
pub fn validate_patch_request(publish_time_old_ms: i64, now_ms: i64, mup_ms: i64, ttl_s: u64) -> Result<(), LivesimError> {
    let next_tick_ms = publish_time_old_ms + mup_ms;
    if now_ms < next_tick_ms {
        return Err(LivesimError::PatchTooEarly { delta_ms: next_tick_ms - now_ms });
    }
    if now_ms - publish_time_old_ms > ttl_s as i64 * 1000 {
        return Err(LivesimError::PatchGone);
    }
    Ok(())
}

/// Diffs two successive live MPDs (same asset/config, different `nowMS`) into a `Patch` document.
/// Per representation's SegmentTimeline, the common case — new segments appended, old ones
/// dropped off the front of the time-shift window — is expressed as `remove`/`add` operations;
/// anything else falls back to a whole-element `replace`.
pub fn generate_patch(old: &MPD, new: &MPD) -> PatchDocument {
    let mut patch = PatchDocument {
        mpd_id: new.id.clone(),
        original_publish_time: old.publishTime.clone(),
        publish_time: new.publishTime.clone(),
        ..Default::default()
    };

    patch.replace.push(PatchOp {
        sel: "/MPD/@publishTime".to_string(),
        add_type: None,
        content: new.publishTime.clone(),
    });

    for (pi, (old_period, new_period)) in old.periods.iter().zip(new.periods.iter()).enumerate() {
        for (ai, (old_aset, new_aset)) in old_period.adaptations.iter().zip(new_period.adaptations.iter()).enumerate() {
            for (ri, (old_rep, new_rep)) in old_aset.representations.iter().zip(new_aset.representations.iter()).enumerate() {
                let base_sel = format!(
                    "/MPD/Period[{}]/AdaptationSet[{}]/Representation[{}]/SegmentTemplate/SegmentTimeline",
                    pi + 1, ai + 1, ri + 1
                );
                diff_segment_timeline(&mut patch, &base_sel, old_rep.SegmentTemplate.as_ref(), new_rep.SegmentTemplate.as_ref());
            }
            // adaptation-level SegmentTemplate (audio/video sharing one at the AdaptationSet, no per-Representation override)
            if old_aset.representations.is_empty() {
                let base_sel = format!("/MPD/Period[{}]/AdaptationSet[{}]/SegmentTemplate/SegmentTimeline", pi + 1, ai + 1);
                diff_segment_timeline(&mut patch, &base_sel, old_aset.SegmentTemplate.as_ref(), new_aset.SegmentTemplate.as_ref());
            }
        }
    }
    patch
}

fn diff_segment_timeline(patch: &mut PatchDocument, sel: &str, old_st: Option<&SegmentTemplate>, new_st: Option<&SegmentTemplate>) {
    let (Some(old_st), Some(new_st)) = (old_st, new_st) else { return };
    let old_list = old_st.SegmentTimeline.as_ref().map(|t| t.segments.as_slice()).unwrap_or(&[]);
    let new_list = new_st.SegmentTimeline.as_ref().map(|t| t.segments.as_slice()).unwrap_or(&[]);
    if s_lists_equal(old_list, new_list) {
        return;
    }

    let old_durations = expand_s_list(old_list);
    let new_durations = expand_s_list(new_list);

    let common_prefix = old_durations.iter().zip(new_durations.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common_prefix == old_durations.len() && new_durations.len() > old_durations.len() {
        // pure append: express as an `add` of the trailing new <S> entries
        if let Some(tail) = build_tail_s_list(new_list, common_prefix) {
            patch.add.push(PatchOp {
                sel: format!("{sel}/S[last()]"),
                add_type: Some("after".to_string()),
                content: Some(serialize_s_fragment(&tail)),
            });
            return;
        }
    }

    // anything more complex than a clean append (TSB slide dropping old entries, a pattern
    // re-collapse, a gap): replace the whole timeline element.
    patch.replace.push(PatchOp {
        sel: sel.to_string(),
        add_type: None,
        content: Some(serialize_s_fragment(new_list)),
    });
}

fn s_lists_equal(a: &[S], b: &[S]) -> bool {
    expand_s_list(a) == expand_s_list(b)
}

fn expand_s_list(list: &[S]) -> Vec<i64> {
    let mut out = Vec::new();
    for s in list {
        let repeat = s.r.unwrap_or(0).max(0);
        for _ in 0..=repeat {
            out.push(s.d);
        }
    }
    out
}

/// Best-effort reconstruction of the `<S>` elements appended after `skip` segments of `new_list`
/// have already been seen (used to build the `add` fragment for a pure-append patch).
fn build_tail_s_list(new_list: &[S], skip: usize) -> Option<Vec<S>> {
    let mut seen = 0usize;
    let mut tail = Vec::new();
    for s in new_list {
        let count = s.r.unwrap_or(0) as usize + 1;
        if seen + count <= skip {
            seen += count;
            continue;
        }
        let remaining_skip = skip.saturating_sub(seen);
        let kept = count - remaining_skip;
        let mut entry = s.clone();
        entry.t = None;
        entry.r = if kept > 1 { Some(kept as i64 - 1) } else { None };
        tail.push(entry);
        seen += count;
    }
    if tail.is_empty() { None } else { Some(tail) }
}

fn serialize_s_fragment(list: &[S]) -> String {
    list.iter().map(|s| {
        let mut attrs = format!("d=\"{}\"", s.d);
        if let Some(t) = s.t {
            attrs = format!("t=\"{t}\" {attrs}");
        }
        if let Some(r) = s.r {
            attrs.push_str(&format!(" r=\"{r}\""));
        }
        format!("<S {attrs}/>")
    }).collect::<Vec<_>>().join("")
}
