//! C2: URL config parser.
//!
//! The live-simulation path grammar is `/livesim2/{option_token}*/{asset-path}/{mpd-or-segment}`.
//! `parse_path` peels `key_value` tokens from the front of the path until what remains no longer
//! looks like an option token, then hands back a typed [`ResponseConfig`] plus the residual
//! `contentPart` (the asset path and trailing mpd/segment suffix) for the catalog lookup.
//!
//! Parsing is total: any token that doesn't match a known key, or whose value fails its own
//! validator, produces [`LivesimError::UrlOption`] naming the offending token and carrying an
//! edit-distance "did you mean" suggestion, exactly as it would be typed by a client fat-fingering
//! a query flag.

use std::collections::HashMap;

use crate::error::LivesimError;

const KNOWN_KEYS: &[&str] = &[
    "startNr", "start", "stop", "startrel", "stoprel", "mup", "tsbd", "ltgt", "ato", "chunkdur",
    "segtimeline", "segtimelinenr", "periods", "continuous", "patch", "eccp", "drm", "annexI",
    "utc", "timesubsstpp", "timesubswvtt", "ssr",
];

/// Flag-only tokens: keys recognized with no accompanying `_value`.
const FLAG_KEYS: &[&str] = &["continuous", "timesubsstpp", "timesubswvtt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ato {
    Seconds { millis: u64 },
    Inf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// `$Number$`-only addressing, no SegmentTimeline.
    Number,
    /// `segtimeline_<entries>`: explicit `$Time$`-keyed SegmentTimeline.
    SegmentTimeline { entries: u32 },
    /// `segtimelinenr_<entries>`: explicit `$Number$`-keyed SegmentTimeline.
    SegmentTimelineNr { entries: u32 },
    /// `segtimeline_pattern`: canonical-Pattern collapsed SegmentTimeline, `$Time$`-keyed.
    SegmentTimelinePattern,
    /// `segtimelinenr_pattern`: canonical-Pattern collapsed SegmentTimeline, `$Number$`-keyed.
    SegmentTimelineNrPattern,
}

impl AddressingMode {
    pub fn is_timeline(&self) -> bool {
        !matches!(self, AddressingMode::Number)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, AddressingMode::SegmentTimelinePattern | AddressingMode::SegmentTimelineNrPattern)
    }

    pub fn uses_time_key(&self) -> bool {
        matches!(self, AddressingMode::SegmentTimeline { .. } | AddressingMode::SegmentTimelinePattern)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccpMode {
    Cenc,
    Cbcs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtcMethod {
    HttpIso,
    HttpHead,
    Ntp,
    Sntp,
    Direct,
    None,
}

impl UtcMethod {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "httpiso" => Ok(UtcMethod::HttpIso),
            "httphead" => Ok(UtcMethod::HttpHead),
            "ntp" => Ok(UtcMethod::Ntp),
            "sntp" => Ok(UtcMethod::Sntp),
            "direct" => Ok(UtcMethod::Direct),
            "none" => Ok(UtcMethod::None),
            other => Err(format!("unrecognized UTCTiming method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseConfig {
    pub start_nr: Option<u64>,
    /// absolute epoch seconds
    pub start: Option<i64>,
    pub stop: Option<i64>,
    /// seconds relative to the request's `nowMS`, resolved to `start`/`stop` by the caller
    pub startrel: Option<i64>,
    pub stoprel: Option<i64>,
    pub mup_s: Option<f64>,
    pub tsbd_s: Option<f64>,
    pub ltgt_ms: Option<u64>,
    pub ato: Option<Ato>,
    pub chunkdur_s: Option<f64>,
    pub addressing_mode: AddressingMode,
    pub periods_per_hour: Option<u32>,
    /// Accepted for URL-grammar compatibility with the `continuous` token; this engine never
    /// restarts `availabilityStartTime` across a wrap of the VoD loop (it is fixed once at
    /// server startup), so there is no alternate "non-continuous" AST behavior to toggle here.
    /// Period splitting is a separate, independent axis controlled by `periods_per_hour`.
    pub continuous: bool,
    pub patch_ttl_s: Option<u64>,
    pub eccp: Option<EccpMode>,
    pub drm_profile: Option<String>,
    pub annex_i_query: Option<HashMap<String, String>>,
    pub utc_methods: Vec<UtcMethod>,
    pub timesubs_stpp: bool,
    pub timesubs_wvtt: bool,
    pub ssr_pairs: Vec<(i64, i64)>,
}

/// The result of a successful path parse.
pub struct ParsedPath {
    pub cfg: ResponseConfig,
    /// the remaining path segments, joined with `/`: asset path plus mpd-or-segment suffix
    pub content_part: String,
}

/// Peel `key_value` option tokens from the front of `path` until the first segment that isn't a
/// recognized option key, returning the accumulated config and the unconsumed remainder.
pub fn parse_path(path: &str) -> Result<ParsedPath, LivesimError> {
    let mut cfg = ResponseConfig::default();
    let mut segments = path.trim_matches('/').split('/').peekable();
    let mut consumed = Vec::new();

    while let Some(seg) = segments.peek().copied() {
        if seg.is_empty() {
            segments.next();
            continue;
        }
        let (key, value) = split_token(seg);
        if !KNOWN_KEYS.contains(&key) {
            break;
        }
        apply_option(&mut cfg, key, value, seg)?;
        consumed.push(seg);
        segments.next();
    }

    let content_part: Vec<&str> = segments.collect();
    if content_part.is_empty() {
        return Err(LivesimError::UrlOption {
            token: path.to_string(),
            reason: "no asset path remains after option tokens".to_string(),
        });
    }

    Ok(ParsedPath { cfg, content_part: content_part.join("/") })
}

fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('_') {
        Some((k, v)) if KNOWN_KEYS.contains(&k) => (k, Some(v)),
        _ => (token, None),
    }
}

fn apply_option(cfg: &mut ResponseConfig, key: &str, value: Option<&str>, token: &str) -> Result<(), LivesimError> {
    let err = |reason: String| LivesimError::UrlOption { token: token.to_string(), reason };
    let require_value = |value: Option<&str>| -> Result<&str, LivesimError> {
        value.ok_or_else(|| err(format!("option '{key}' requires a value")))
    };

    match key {
        "startNr" => cfg.start_nr = Some(parse_u64(require_value(value)?, &err)?),
        "start" => cfg.start = Some(parse_i64(require_value(value)?, &err)?),
        "stop" => cfg.stop = Some(parse_i64(require_value(value)?, &err)?),
        "startrel" => cfg.startrel = Some(parse_i64(require_value(value)?, &err)?),
        "stoprel" => cfg.stoprel = Some(parse_i64(require_value(value)?, &err)?),
        "mup" => cfg.mup_s = Some(parse_f64(require_value(value)?, &err)?),
        "tsbd" => cfg.tsbd_s = Some(parse_f64(require_value(value)?, &err)?),
        "ltgt" => cfg.ltgt_ms = Some(parse_u64(require_value(value)?, &err)?),
        "ato" => {
            let v = require_value(value)?;
            cfg.ato = Some(if v == "inf" {
                Ato::Inf
            } else {
                let s = parse_f64(v, &err)?;
                Ato::Seconds { millis: (s * 1000.0).round() as u64 }
            });
        },
        "chunkdur" => cfg.chunkdur_s = Some(parse_f64(require_value(value)?, &err)?),
        "segtimeline" => {
            cfg.addressing_mode = match value {
                Some("pattern") => AddressingMode::SegmentTimelinePattern,
                Some(v) => AddressingMode::SegmentTimeline { entries: parse_u32(v, &err)? },
                None => AddressingMode::SegmentTimeline { entries: 0 },
            };
        },
        "segtimelinenr" => {
            cfg.addressing_mode = match value {
                Some("pattern") => AddressingMode::SegmentTimelineNrPattern,
                Some(v) => AddressingMode::SegmentTimelineNr { entries: parse_u32(v, &err)? },
                None => AddressingMode::SegmentTimelineNr { entries: 0 },
            };
        },
        "periods" => cfg.periods_per_hour = Some(parse_u32(require_value(value)?, &err)?),
        "continuous" => cfg.continuous = true,
        "patch" => cfg.patch_ttl_s = Some(parse_u64(require_value(value)?, &err)?),
        "eccp" => {
            cfg.eccp = Some(match require_value(value)? {
                "cenc" => EccpMode::Cenc,
                "cbcs" => EccpMode::Cbcs,
                other => return Err(err(format!("unknown eccp mode '{other}', expected cenc or cbcs"))),
            });
        },
        "drm" => cfg.drm_profile = Some(require_value(value)?.to_string()),
        "annexI" => {
            let v = require_value(value)?;
            let mut map = HashMap::new();
            for pair in v.split(',') {
                let (k, v) = pair.split_once('=')
                    .ok_or_else(|| err(format!("annexI entry '{pair}' is not k=v")))?;
                map.insert(k.to_string(), v.to_string());
            }
            cfg.annex_i_query = Some(map);
        },
        "utc" => {
            let v = require_value(value)?;
            let mut methods = Vec::new();
            for m in v.split(',') {
                methods.push(UtcMethod::parse(m).map_err(err)?);
            }
            if methods.contains(&UtcMethod::None) {
                cfg.utc_methods.clear();
            } else {
                cfg.utc_methods = methods;
            }
        },
        "timesubsstpp" => cfg.timesubs_stpp = true,
        "timesubswvtt" => cfg.timesubs_wvtt = true,
        "ssr" => {
            let v = require_value(value)?;
            for pair in v.split(',') {
                let (a, b) = pair.split_once('-')
                    .ok_or_else(|| err(format!("ssr pair '{pair}' is not id-id")))?;
                let a = parse_i64(a, &err)?;
                let b = parse_i64(b, &err)?;
                cfg.ssr_pairs.push((a, b));
            }
        },
        other => return Err(unrecognized_key(other, token)),
    }
    Ok(())
}

fn unrecognized_key(key: &str, token: &str) -> LivesimError {
    let suggestion = KNOWN_KEYS.iter()
        .min_by_key(|&&k| edit_distance::edit_distance(k, key))
        .filter(|&&k| edit_distance::edit_distance(k, key) <= 3)
        .copied();
    let reason = match suggestion {
        Some(s) => format!("unrecognized option key '{key}' (did you mean '{s}'?)"),
        None => format!("unrecognized option key '{key}'"),
    };
    LivesimError::UrlOption { token: token.to_string(), reason }
}

fn parse_u64(v: &str, err: &impl Fn(String) -> LivesimError) -> Result<u64, LivesimError> {
    v.parse().map_err(|_| err(format!("'{v}' is not a non-negative integer")))
}

fn parse_u32(v: &str, err: &impl Fn(String) -> LivesimError) -> Result<u32, LivesimError> {
    v.parse().map_err(|_| err(format!("'{v}' is not a non-negative integer")))
}

fn parse_i64(v: &str, err: &impl Fn(String) -> LivesimError) -> Result<i64, LivesimError> {
    v.parse().map_err(|_| err(format!("'{v}' is not an integer")))
}

fn parse_f64(v: &str, err: &impl Fn(String) -> LivesimError) -> Result<f64, LivesimError> {
    v.parse().map_err(|_| err(format!("'{v}' is not a number")))
}

impl Default for AddressingMode {
    fn default() -> Self {
        AddressingMode::Number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_asset_path() {
        let p = parse_path("testpic_2s/Manifest.mpd").unwrap();
        assert_eq!(p.content_part, "testpic_2s/Manifest.mpd");
        assert_eq!(p.cfg.addressing_mode, AddressingMode::Number);
    }

    #[test]
    fn peels_multiple_options() {
        let p = parse_path("ltgt_2500/ato_1/chunkdur_0.25/testpic_2s/Manifest.mpd").unwrap();
        assert_eq!(p.cfg.ltgt_ms, Some(2500));
        assert_eq!(p.cfg.ato, Some(Ato::Seconds { millis: 1000 }));
        assert_eq!(p.cfg.chunkdur_s, Some(0.25));
        assert_eq!(p.content_part, "testpic_2s/Manifest.mpd");
    }

    #[test]
    fn ato_inf_parses() {
        let p = parse_path("ato_inf/testpic_2s/Manifest.mpd").unwrap();
        assert_eq!(p.cfg.ato, Some(Ato::Inf));
    }

    #[test]
    fn segtimeline_pattern_token() {
        let p = parse_path("segtimeline_pattern/testpic_2s/Manifest.mpd").unwrap();
        assert_eq!(p.cfg.addressing_mode, AddressingMode::SegmentTimelinePattern);
    }

    #[test]
    fn unknown_option_is_a_typed_error() {
        let err = parse_path("atoo_1/testpic_2s/Manifest.mpd").unwrap_err();
        match err {
            LivesimError::UrlOption { token, reason } => {
                assert_eq!(token, "atoo_1");
                assert!(reason.contains("did you mean 'ato'"), "{reason}");
            },
            other => panic!("expected UrlOption, got {other:?}"),
        }
    }

    #[test]
    fn periods_not_multiple_is_caught_downstream_not_here() {
        let p = parse_path("periods_60/testpic_8s/Manifest.mpd").unwrap();
        assert_eq!(p.cfg.periods_per_hour, Some(60));
    }
}
