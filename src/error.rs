//! Error taxonomy (spec §4.10, §7). Pure functions in `wrap`, `timeline`, `manifest`, and
//! `segment` return one of these; the HTTP layer (`http::live`) is the only place that knows
//! how to turn one into a status code (spec §4.7's propagation policy).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LivesimError {
    /// The requested asset, representation, or ingest session doesn't exist. -> 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested segment has aged out of the time-shift buffer window. -> 410.
    #[error("gone")]
    Gone,

    /// The requested segment is not yet available; the client should retry after `delta_ms`. -> 425.
    #[error("too early by {delta_ms}ms")]
    TooEarly { delta_ms: i64 },

    /// `ato=inf` was combined with a SegmentTimeline addressing mode, which has no well-defined
    /// availability time to offset from. -> 400.
    #[error("availabilityTimeOffset=inf is incompatible with SegmentTimeline addressing")]
    AtoInfTimeline,

    /// A URL option token failed to parse. -> 400.
    #[error("unrecognized or malformed URL option '{token}': {reason}")]
    UrlOption { token: String, reason: String },

    /// Multi-period splitting requested a period duration that doesn't evenly divide the
    /// representation's segment duration. -> 400.
    #[error("period duration {period_s}s not a multiple of segment duration {seg_ms}ms")]
    PeriodNotMultiple { period_s: u64, seg_ms: u64 },

    /// A required query parameter for Annex I URL-query advertisement was missing. -> 400.
    #[error("missing required URL query parameter(s) for annexI: {0}")]
    MissingAnnexIQuery(String),

    /// The MPD-Patch request's `publishTime` predates the TTL window. -> 410.
    #[error("patch publishTime too old")]
    PatchGone,

    /// The MPD-Patch request arrived before the next publish tick. -> 425.
    #[error("patch too early by {delta_ms}ms")]
    PatchTooEarly { delta_ms: i64 },

    #[error("XML (de)serialization error: {0}")]
    Parsing(String),

    #[error("I/O error: {0}: {1}")]
    Io(std::io::Error, String),

    #[error("ISO-BMFF box error: {0}")]
    Mp4Box(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LivesimError {
    pub fn io(e: std::io::Error, context: impl Into<String>) -> Self {
        LivesimError::Io(e, context.into())
    }
}
