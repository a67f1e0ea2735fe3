//! Synthesizes a live DASH (MPEG-DASH / CMAF) stream from a static, on-disk VoD asset.
//!
//! A client requesting a manifest or segment at wall-clock time `T` is served content that
//! appears to have been encoded and published in real time, even though the underlying media
//! samples loop through a finite VoD asset. The same engine drives an outbound CMAF-ingest mode,
//! PUTting synthesized init and media segments to an external ingest endpoint.
//!
//! This library provides the DASH MPD data model (serde-based, following ISO/IEC 23009-1:2019,
//! diverging from the formal schema where in-the-wild implementations do) plus the live-timeline
//! synthesis engine: the wrap/availability calculus, the SegmentTimeline generator, the manifest
//! synthesizer (including MPD-Patch and DASH-IF low-latency extensions), the segment materializer,
//! the CMAF ingest scheduler, and the per-IP request governor.
//!
//! Deliberately out of scope: transcoding or re-encoding of media; DRM key generation (keys are
//! derived deterministically from key IDs); originating HTTP/2 or HTTP/3 (a reverse proxy can add
//! that in front of the plain HTTP/1.1 server here).

#![allow(non_snake_case)]

pub mod error;
pub mod catalog;
pub mod urlcfg;
pub mod wrap;
pub mod timeline;
pub mod drm;
pub mod manifest;
pub mod segment;
pub mod governor;
pub mod ingest;
pub mod http;
pub mod config;
pub mod logging;

pub use error::LivesimError;

use serde::{Deserialize, Serialize, de};
use std::collections::HashMap;
use std::time::Duration;
use regex::Regex;

/// Version string advertised in the `DASH-IF-livesim2` response header on every request, and in
/// the `DASH-IF-Ingest` / `DASH-IF-livesim2` headers sent on outbound CMAF ingest PUTs.
pub const LIVESIM_VERSION: &str = concat!("livesim-rs/", env!("CARGO_PKG_VERSION"));

// Parse an XML duration string, as per https://www.w3.org/TR/xmlschema-2/#duration
//
// The lexical representation for duration is the ISO 8601 extended format PnYnMnDTnHnMnS.
// Examples: "PT0H0M30.030S", "PT1.2S", "PT1004199059S", "PT130S".
pub fn parse_xs_duration(s: &str) -> Result<Duration, LivesimError> {
    match iso8601::duration(s) {
        Ok(iso8601::Duration::Weeks(w)) => Ok(Duration::new(w as u64 * 60 * 60 * 24 * 7, 0)),
        Ok(iso8601::Duration::YMDHMS { year, month, day, hour, minute, second, millisecond }) => {
            let mut secs: u64 = second.into();
            secs += minute as u64 * 60;
            secs += hour as u64 * 60 * 60;
            secs += day as u64 * 60 * 60 * 24;
            secs += month as u64 * 60 * 60 * 24 * 31;
            secs += year as u64 * 60 * 60 * 24 * 31 * 365;
            Ok(Duration::new(secs, millisecond * 1000))
        },
        Err(e) => Err(LivesimError::Parsing(format!("couldn't parse XS duration {s}: {e:?}"))),
    }
}

/// Render a `Duration` as an xs:duration string, eg. `PT6.000S`. We always emit a plain
/// seconds-with-millis form: DASH clients accept this and it keeps generation deterministic
/// (no locale- or calendar-dependent Y/M/D breakdown to round-trip).
pub fn format_xs_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let millis = d.subsec_millis();
    if millis == 0 {
        format!("PT{secs}S")
    } else {
        format!("PT{secs}.{millis:03}S")
    }
}

pub fn duration_from_ms(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

fn deserialize_xs_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    match <Option<String>>::deserialize(deserializer) {
        Ok(Some(xs)) => parse_xs_duration(&xs).map(Some).map_err(de::Error::custom),
        Ok(None) => Ok(None),
        Err(_) => Ok(None),
    }
}

fn serialize_xs_duration<S>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match d {
        Some(d) => serializer.serialize_some(&format_xs_duration(*d)),
        None => serializer.serialize_none(),
    }
}

// The MPD format is documented by ISO using an XML Schema at
// https://standards.iso.org/ittf/PubliclyAvailableStandards/MPEG-DASH_schema_files/DASH-MPD-edition2.xsd
// We occasionally diverge from the standard when in-the-wild implementations (and the DASH-IF
// livesim2 conformance tooling this crate emulates) do.
//
// We use quick-xml + serde to both parse source VoD manifests and to serialize the synthesized
// live manifests. Attributes are marked with a leading `@` in their serde rename, per quick-xml's
// convention; everything else is a child element.

/// The title of the media stream.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Title {
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Source {
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Copyright {
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Metainformation concerning the media stream (title, language, etc.)
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProgramInformation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Title: Option<Title>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Copyright: Option<Copyright>,
    #[serde(rename = "@lang", skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// One run of a repeating duration pattern, as introduced by the 2024 amendment to MPEG-DASH for
/// collapsing long SegmentTimelines (see [`crate::timeline`]).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct P {
    #[serde(rename = "@d")]
    pub d: i64,
    #[serde(rename = "@r", skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
}

/// A repeating `<Pattern>` of `<P>` durations, paired with the `pE` offset on the owning `<S>`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Pattern {
    #[serde(rename = "P")]
    pub entries: Vec<P>,
}

/// Describes a sequence of contiguous Segments with identical duration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct S {
    #[serde(rename = "@t", skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
    /// the duration (or, with a Pattern child, the sum of one period of the pattern)
    #[serde(rename = "@d")]
    pub d: i64,
    /// the repeat count (number of contiguous Segments with identical duration minus one)
    #[serde(rename = "@r", skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
    /// number of sub-segment chunks this segment is split into for low-latency delivery
    #[serde(rename = "@k", skip_serializing_if = "Option::is_none")]
    pub k: Option<u64>,
    /// offset into the canonical Pattern corresponding to this S's first segment
    #[serde(rename = "@pE", skip_serializing_if = "Option::is_none")]
    pub pattern_entry: Option<u64>,
    #[serde(rename = "Pattern", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
}

impl S {
    pub fn plain(t: Option<i64>, d: i64, r: Option<i64>) -> Self {
        S { t, d, r, k: None, pattern_entry: None, pattern: None }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SegmentTimeline {
    #[serde(rename = "S", default)]
    pub segments: Vec<S>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Initialization {
    #[serde(rename = "@sourceURL", skip_serializing_if = "Option::is_none")]
    pub sourceURL: Option<String>,
    #[serde(rename = "@range", skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

/// Allows template-based `SegmentURL` construction using `$Time$`, `$Number$`, `$Bandwidth$`,
/// `$RepresentationID$`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SegmentTemplate {
    #[serde(rename = "@initialization", skip_serializing_if = "Option::is_none")]
    pub initialization: Option<String>,
    #[serde(rename = "@media", skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(rename = "@index", skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub SegmentTimeline: Option<SegmentTimeline>,
    #[serde(rename = "@startNumber", skip_serializing_if = "Option::is_none")]
    pub startNumber: Option<u64>,
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(rename = "@timescale", skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u64>,
    #[serde(rename = "@presentationTimeOffset", skip_serializing_if = "Option::is_none")]
    pub presentationTimeOffset: Option<i64>,
    #[serde(rename = "@availabilityTimeOffset", skip_serializing_if = "Option::is_none")]
    pub availabilityTimeOffset: Option<f64>,
    #[serde(rename = "@availabilityTimeComplete", skip_serializing_if = "Option::is_none")]
    pub availabilityTimeComplete: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BaseURL {
    #[serde(rename = "$text")]
    pub base: String,
    #[serde(rename = "@serviceLocation", skip_serializing_if = "Option::is_none")]
    pub serviceLocation: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SegmentBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Initialization: Option<Initialization>,
    #[serde(rename = "@timescale", skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u64>,
    #[serde(rename = "@indexRange", skip_serializing_if = "Option::is_none")]
    pub indexRange: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SegmentURL {
    #[serde(rename = "@media", skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(rename = "@mediaRange", skip_serializing_if = "Option::is_none")]
    pub mediaRange: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SegmentList {
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Initialization: Option<Initialization>,
    #[serde(rename = "SegmentURL", default)]
    pub segment_urls: Vec<SegmentURL>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Resync {
    #[serde(rename = "@dT", skip_serializing_if = "Option::is_none")]
    pub dT: Option<u64>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub rtype: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AudioChannelConfiguration {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: String,
    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Accessibility {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: String,
    #[serde(rename = "@value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Role {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: String,
    #[serde(rename = "@value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A generic `EssentialProperty` or `SupplementalProperty` node. Used both for the DASH-IF Annex I
/// URL-query-advertisement mechanism and for adaptation-set-switching hints.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DescriptorProperty {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: String,
    #[serde(rename = "@value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "@queryTemplate", skip_serializing_if = "Option::is_none")]
    pub queryTemplate: Option<String>,
    #[serde(rename = "@useMPDUrlQuery", skip_serializing_if = "Option::is_none")]
    pub useMPDUrlQuery: Option<bool>,
}

/// Content protection (DRM) advertisement: a default-KID ClearKey descriptor, or a CPIX-sourced
/// Widevine/PlayReady/FairPlay descriptor. We don't round-trip PSSH boxes byte-for-byte; we model
/// enough structure to synthesize a conformant advertisement.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContentProtection {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: String,
    #[serde(rename = "@value", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "@cenc:default_KID", skip_serializing_if = "Option::is_none")]
    pub default_kid: Option<String>,
    #[serde(rename = "pssh", skip_serializing_if = "Option::is_none")]
    pub pssh: Option<String>,
    #[serde(rename = "Laurl", skip_serializing_if = "Option::is_none")]
    pub laurl: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Representation {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@mimeType", skip_serializing_if = "Option::is_none")]
    pub mimeType: Option<String>,
    #[serde(rename = "@codecs", skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(rename = "@contentType", skip_serializing_if = "Option::is_none")]
    pub contentType: Option<String>,
    #[serde(rename = "@bandwidth", skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u64>,
    #[serde(rename = "@audioSamplingRate", skip_serializing_if = "Option::is_none")]
    pub audioSamplingRate: Option<u64>,
    #[serde(rename = "@width", skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(rename = "@height", skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub BaseURL: Option<BaseURL>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub AudioChannelConfiguration: Option<AudioChannelConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub SegmentBase: Option<SegmentBase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub SegmentList: Option<SegmentList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Resync: Option<Resync>,
    #[serde(rename = "ContentProtection", default, skip_serializing_if = "Vec::is_empty")]
    pub content_protections: Vec<ContentProtection>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContentComponent {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@lang", skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(rename = "@contentType", skip_serializing_if = "Option::is_none")]
    pub contentType: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdaptationSet {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub BaseURL: Option<BaseURL>,
    #[serde(rename = "@group", skip_serializing_if = "Option::is_none")]
    pub group: Option<i64>,
    #[serde(rename = "@contentType", skip_serializing_if = "Option::is_none")]
    pub contentType: Option<String>,
    #[serde(rename = "@lang", skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(rename = "@segmentAlignment", skip_serializing_if = "Option::is_none")]
    pub segmentAlignment: Option<bool>,
    #[serde(rename = "@bitstreamSwitching", skip_serializing_if = "Option::is_none")]
    pub bitstreamSwitching: Option<bool>,
    #[serde(rename = "@mimeType", skip_serializing_if = "Option::is_none")]
    pub mimeType: Option<String>,
    #[serde(rename = "@codecs", skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ContentComponent: Option<ContentComponent>,
    #[serde(rename = "Accessibility", default, skip_serializing_if = "Vec::is_empty")]
    pub accessibilities: Vec<Accessibility>,
    #[serde(rename = "Role", default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,
    #[serde(rename = "ContentProtection", default, skip_serializing_if = "Vec::is_empty")]
    pub content_protections: Vec<ContentProtection>,
    #[serde(rename = "SupplementalProperty", default, skip_serializing_if = "Vec::is_empty")]
    pub supplemental_properties: Vec<DescriptorProperty>,
    #[serde(rename = "EssentialProperty", default, skip_serializing_if = "Vec::is_empty")]
    pub essential_properties: Vec<DescriptorProperty>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    /// Returns `true` if this AdaptationSet carries audio content, inferred from `contentType`,
    /// `mimeType`, or a child Representation's attributes when the AdaptationSet itself doesn't say.
    pub fn is_audio(&self) -> bool {
        self.content_kind_matches("audio")
    }

    pub fn is_video(&self) -> bool {
        self.content_kind_matches("video")
    }

    pub fn is_text(&self) -> bool {
        self.content_kind_matches("text") || self.content_kind_matches("application")
    }

    fn content_kind_matches(&self, kind: &str) -> bool {
        if let Some(ct) = &self.contentType {
            if ct == kind {
                return true;
            }
        }
        if let Some(mt) = &self.mimeType {
            if mt.starts_with(&format!("{kind}/")) {
                return true;
            }
        }
        self.representations.iter().any(|r| {
            r.contentType.as_deref() == Some(kind)
                || r.mimeType.as_deref().is_some_and(|m| m.starts_with(&format!("{kind}/")))
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Location {
    #[serde(rename = "$text")]
    pub url: String,
}

/// A `<PatchLocation ttl="...">` child advertising where to fetch an MPD-Patch document.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PatchLocation {
    #[serde(rename = "@ttl", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,
    #[serde(rename = "$text")]
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Period {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@start", skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_xs_duration")]
    #[serde(deserialize_with = "deserialize_xs_duration")]
    #[serde(rename = "@duration")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub BaseURL: Option<BaseURL>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(rename = "AdaptationSet", default)]
    pub adaptations: Vec<AdaptationSet>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Latency {
    #[serde(rename = "@min", skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(rename = "@max", skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(rename = "@target", skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    #[serde(rename = "@referenceId", skip_serializing_if = "Option::is_none")]
    pub referenceId: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceDescription {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Latency: Option<Latency>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UTCTiming {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: String,
    #[serde(rename = "@value")]
    pub value: String,
}

/// The root node of a parsed or synthesized DASH MPD manifest.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MPD {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub mpdtype: Option<String>,
    #[serde(rename = "@xmlns", skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(rename = "@profiles", skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,
    #[serde(rename = "@minBufferTime", skip_serializing_if = "Option::is_none")]
    pub minBufferTime: Option<String>,
    #[serde(rename = "@minimumUpdatePeriod", skip_serializing_if = "Option::is_none")]
    pub minimumUpdatePeriod: Option<String>,
    #[serde(rename = "@timeShiftBufferDepth", skip_serializing_if = "Option::is_none")]
    pub timeShiftBufferDepth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_xs_duration")]
    #[serde(deserialize_with = "deserialize_xs_duration")]
    #[serde(rename = "@mediaPresentationDuration")]
    pub mediaPresentationDuration: Option<Duration>,
    #[serde(rename = "@suggestedPresentationDelay", skip_serializing_if = "Option::is_none")]
    pub suggestedPresentationDelay: Option<String>,
    #[serde(rename = "@publishTime", skip_serializing_if = "Option::is_none")]
    pub publishTime: Option<String>,
    #[serde(rename = "@availabilityStartTime", skip_serializing_if = "Option::is_none")]
    pub availabilityStartTime: Option<String>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
    #[serde(rename = "BaseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<BaseURL>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ServiceDescription: Option<ServiceDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ProgramInformation: Option<ProgramInformation>,
    #[serde(rename = "UTCTiming", default, skip_serializing_if = "Vec::is_empty")]
    pub utc_timings: Vec<UTCTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub Location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub PatchLocation: Option<PatchLocation>,
}

impl Default for MPD {
    fn default() -> Self {
        MPD {
            id: None,
            mpdtype: None,
            xmlns: Some("urn:mpeg:dash:schema:mpd:2011".to_string()),
            profiles: Some("urn:mpeg:dash:profile:isoff-live:2011".to_string()),
            minBufferTime: Some("PT2S".to_string()),
            minimumUpdatePeriod: None,
            timeShiftBufferDepth: None,
            mediaPresentationDuration: None,
            suggestedPresentationDelay: None,
            publishTime: None,
            availabilityStartTime: None,
            periods: Vec::new(),
            base_url: None,
            ServiceDescription: None,
            ProgramInformation: None,
            utc_timings: Vec::new(),
            Location: None,
            PatchLocation: None,
        }
    }
}

/// Parse an MPD manifest, provided as an XML string, returning an `MPD` node.
///
/// Used both for the (external, black-box) static-VoD-manifest parsing step in the asset catalog
/// and for tests that round-trip a synthesized manifest.
pub fn parse(xml: &str) -> Result<MPD, LivesimError> {
    let mut deserializer = quick_xml::de::Deserializer::from_str(xml);
    serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|e| LivesimError::Parsing(format!("{e}")))
}

/// Serialize an `MPD` node back to an XML string, with the standard DASH XML declaration.
pub fn serialize(mpd: &MPD) -> Result<String, LivesimError> {
    let mut buf = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    buf.push('\n');
    let body = quick_xml::se::to_string_with_root("MPD", mpd)
        .map_err(|e| LivesimError::Parsing(format!("{e}")))?;
    buf.push_str(&body);
    Ok(buf)
}

/// A patch document per the MPEG-DASH "Patch" schema (2020 amendment): a sequence of `replace`,
/// `remove`, and `add` operations targeting XPath-like selectors into the previously published MPD.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PatchDocument {
    #[serde(rename = "@mpdId", skip_serializing_if = "Option::is_none")]
    pub mpd_id: Option<String>,
    #[serde(rename = "@originalPublishTime", skip_serializing_if = "Option::is_none")]
    pub original_publish_time: Option<String>,
    #[serde(rename = "@publishTime", skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    #[serde(rename = "replace", default)]
    pub replace: Vec<PatchOp>,
    #[serde(rename = "remove", default)]
    pub remove: Vec<PatchOp>,
    #[serde(rename = "add", default)]
    pub add: Vec<PatchOp>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PatchOp {
    #[serde(rename = "@sel")]
    pub sel: String,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub add_type: Option<String>,
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

pub fn serialize_patch(patch: &PatchDocument) -> Result<String, LivesimError> {
    let mut buf = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    buf.push('\n');
    let body = quick_xml::se::to_string_with_root("Patch", patch)
        .map_err(|e| LivesimError::Parsing(format!("{e}")))?;
    buf.push_str(&body);
    Ok(buf)
}

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf: "For the avoidance of doubt, only
// %0[width]d is permitted [in URL templates] and no other identifiers." We reimplement this
// directly rather than pull in a full C printf() implementation.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
pub fn resolve_url_template(template: &str, params: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for k in ["RepresentationID", "Number", "Time", "Bandwidth"] {
        let ident = format!("${k}$");
        if result.contains(&ident) {
            if let Some(value) = params.get(k) {
                result = result.replace(&ident, value);
            }
        }
        let re = format!("\\${k}%0([\\d])d\\$");
        let ident_re = Regex::new(&re).expect("static regex");
        if let Some(cap) = ident_re.captures(&result) {
            if let Some(value) = params.get(k) {
                let width: usize = cap[1].parse().expect("single digit width");
                let padded = format!("{value:0>width$}");
                let m = ident_re.find(&result).expect("regex matched above");
                result = result[..m.start()].to_owned() + &padded + &result[m.end()..];
            }
        }
    }
    result
}

pub fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url_template() {
        assert_eq!(
            resolve_url_template("AA$Time$BB", &HashMap::from([("Time", "ZZZ".to_string())])),
            "AAZZZBB"
        );
        assert_eq!(
            resolve_url_template("AA$Number%06d$BB", &HashMap::from([("Number", "42".to_string())])),
            "AA000042BB"
        );
        let dict = HashMap::from([
            ("RepresentationID", "640x480".to_string()),
            ("Number", "42".to_string()),
        ]);
        assert_eq!(
            resolve_url_template("AA/$RepresentationID$/segment-$Number%05d$.mp4", &dict),
            "AA/640x480/segment-00042.mp4"
        );
    }

    #[test]
    fn test_parse_xs_duration() {
        assert!(parse_xs_duration("").is_err());
        assert!(parse_xs_duration("foobles").is_err());
        assert_eq!(parse_xs_duration("PT3H11M53S").ok(), Some(Duration::new(11513, 0)));
        assert_eq!(parse_xs_duration("PT30M38S").ok(), Some(Duration::new(1838, 0)));
        assert_eq!(parse_xs_duration("PT1.5S").ok(), Some(Duration::new(1, 500_000)));
        assert_eq!(parse_xs_duration("PT0S").ok(), Some(Duration::new(0, 0)));
    }

    #[test]
    fn test_format_xs_duration_roundtrip() {
        assert_eq!(format_xs_duration(Duration::new(6, 0)), "PT6S");
        assert_eq!(format_xs_duration(Duration::new(2, 500_000_000)), "PT2.500S");
    }

    #[test]
    fn test_is_audio_video_adaptation() {
        let mut a = AdaptationSet {
            id: Some(1),
            BaseURL: None,
            group: None,
            contentType: Some("audio".to_string()),
            lang: None,
            segmentAlignment: None,
            bitstreamSwitching: None,
            mimeType: None,
            codecs: None,
            SegmentTemplate: None,
            ContentComponent: None,
            accessibilities: Vec::new(),
            roles: Vec::new(),
            content_protections: Vec::new(),
            supplemental_properties: Vec::new(),
            essential_properties: Vec::new(),
            representations: Vec::new(),
        };
        assert!(a.is_audio());
        assert!(!a.is_video());
        a.contentType = None;
        a.mimeType = Some("video/mp4".to_string());
        assert!(a.is_video());
    }
}
