//! ClearKey and CPIX DRM descriptor support for the manifest synthesizer (C5) and segment
//! materializer (C6).
//!
//! Key generation is explicitly out of scope (spec.md's Non-goals): keys are derived
//! deterministically from key IDs by the fixed transform below, standing in for the external
//! module a real deployment would consult. CPIX profile selection is similarly a fixed, built-in
//! table rather than a loaded CPIX package — real PSSH payloads are not round-tripped.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LivesimError;
use crate::urlcfg::EccpMode;
use crate::ContentProtection;

/// Salt for the deterministic KID→key transform. Fixed so that repeated requests for the same
/// KID always yield the same key, which is all the conformance-testing use case requires.
const KEY_DERIVATION_SALT: &[u8] = b"livesim-rs-clearkey-v1";

/// Default KID used for `eccp_cenc`/`eccp_cbcs` when a representation doesn't carry its own.
pub const DEFAULT_KID: [u8; 16] = *b"livesim-defaultK";

pub fn encode_id16(bytes: &[u8; 16]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_id16(s: &str) -> Result<[u8; 16], LivesimError> {
    let decoded = URL_SAFE_NO_PAD.decode(s)
        .map_err(|e| LivesimError::Parsing(format!("invalid base64url KID '{s}': {e}")))?;
    decoded.try_into().map_err(|v: Vec<u8>| {
        LivesimError::Parsing(format!("KID must decode to 16 bytes, got {}", v.len()))
    })
}

/// Deterministically derives a 16-byte content key from a 16-byte key ID.
pub fn derive_key(kid: &[u8; 16]) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DERIVATION_SALT);
    hasher.update(kid);
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

#[derive(Debug, Deserialize)]
pub struct ClearKeyRequest {
    pub kids: Vec<String>,
    #[serde(default, rename = "type")]
    pub key_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearKeyResponseKey {
    pub kty: &'static str,
    pub k: String,
    pub kid: String,
}

#[derive(Debug, Serialize)]
pub struct ClearKeyResponse {
    pub keys: Vec<ClearKeyResponseKey>,
    #[serde(rename = "type")]
    pub key_type: String,
}

/// Handles `POST {asset}/eccp.json`: derives a key per requested KID.
pub fn handle_la_url_request(req: &ClearKeyRequest) -> Result<ClearKeyResponse, LivesimError> {
    let mut keys = Vec::with_capacity(req.kids.len());
    for kid_b64 in &req.kids {
        let kid = decode_id16(kid_b64)?;
        let key = derive_key(&kid);
        keys.push(ClearKeyResponseKey {
            kty: "oct",
            k: encode_id16(&key),
            kid: kid_b64.clone(),
        });
    }
    Ok(ClearKeyResponse { keys, key_type: req.key_type.clone().unwrap_or_else(|| "temporary".to_string()) })
}

const CLEARKEY_SCHEME_ID: &str = "urn:uuid:e2719d58-a985-b3c9-781a-b030af78d30e";

/// Builds the default-KID ClearKey `ContentProtection` pair (`mp4protection` + `clearkey`
/// descriptor) for `eccp_cenc`/`eccp_cbcs`.
pub fn clearkey_content_protections(kid: &[u8; 16], eccp: EccpMode, la_url: &str) -> Vec<ContentProtection> {
    let scheme = match eccp {
        EccpMode::Cenc => "cenc",
        EccpMode::Cbcs => "cbcs",
    };
    vec![
        ContentProtection {
            schemeIdUri: "urn:mpeg:dash:mp4protection:2011".to_string(),
            value: Some(scheme.to_string()),
            default_kid: Some(format_kid_uuid(kid)),
            pssh: None,
            laurl: None,
        },
        ContentProtection {
            schemeIdUri: CLEARKEY_SCHEME_ID.to_string(),
            value: Some("ClearKey1.0".to_string()),
            default_kid: Some(format_kid_uuid(kid)),
            pssh: None,
            laurl: Some(la_url.to_string()),
        },
    ]
}

fn format_kid_uuid(kid: &[u8; 16]) -> String {
    let hex: String = kid.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32]
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpixProfile {
    Widevine,
    PlayReady,
    FairPlay,
}

impl CpixProfile {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "widevine" => Some(CpixProfile::Widevine),
            "playready" => Some(CpixProfile::PlayReady),
            "fairplay" => Some(CpixProfile::FairPlay),
            _ => None,
        }
    }

    fn scheme_id(&self) -> &'static str {
        match self {
            CpixProfile::Widevine => "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed",
            CpixProfile::PlayReady => "urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95",
            CpixProfile::FairPlay => "urn:uuid:94ce86fb-07ff-4f43-adb8-93d2fa968ca2",
        }
    }

    fn value(&self) -> &'static str {
        match self {
            CpixProfile::Widevine => "widevine",
            CpixProfile::PlayReady => "PlayReady",
            CpixProfile::FairPlay => "FairPlay",
        }
    }
}

/// Builds a `ContentProtection` descriptor for a loaded CPIX profile, with a LA-URL pointing at
/// the server's own `eccp.json` endpoint (as with ClearKey, no real key-exchange protocol or
/// PSSH payload is exercised here).
pub fn cpix_content_protection(profile: CpixProfile, kid: &[u8; 16], la_url: &str) -> ContentProtection {
    ContentProtection {
        schemeIdUri: profile.scheme_id().to_string(),
        value: Some(profile.value().to_string()),
        default_kid: Some(format_kid_uuid(kid)),
        pssh: None,
        laurl: Some(la_url.to_string()),
    }
}
