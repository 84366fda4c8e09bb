//! Share codec: a macro packed into a short, copy-pasteable string.
//!
//! Format: `GMAC-` followed by URL-safe unpadded base64 of
//! `version byte ‖ crc32(compressed) ‖ zlib(compact JSON)`. Decoding rejects
//! unknown versions, tampered payloads, and payloads that decode to a
//! structurally invalid macro.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};
use thiserror::Error;
use tracing::debug;

use crate::model::{Macro, StructuralError, validate};

pub const SHARE_PREFIX: &str = "GMAC-";
pub const SHARE_VERSION: u8 = 1;

/// Version byte + CRC32, before the compressed body.
const HEADER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("share code does not start with `{SHARE_PREFIX}`")]
    MissingPrefix,

    #[error("share code payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("share code payload is truncated")]
    Truncated,

    #[error("unsupported share code version {0}")]
    UnsupportedVersion(u8),

    #[error("share code checksum mismatch (expected {expected:#010x}, found {found:#010x})")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("share code payload failed to decompress: {0}")]
    Inflate(String),

    #[error("share code payload is not a valid macro: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("decoded macro failed validation ({} finding(s))", .0.len())]
    Invalid(Vec<StructuralError>),
}

/// Produce a share code for a macro. Encoding does not validate; `decode`
/// re-checks structure so a corrupt or hand-built code can never round-trip
/// into a broken macro.
pub fn encode(mac: &Macro) -> anyhow::Result<String> {
    let json = serde_json::to_vec(mac)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let mut payload = Vec::with_capacity(HEADER_LEN + compressed.len());
    payload.push(SHARE_VERSION);
    payload.extend_from_slice(&checksum(&compressed).to_be_bytes());
    payload.extend_from_slice(&compressed);

    let code = format!("{SHARE_PREFIX}{}", URL_SAFE_NO_PAD.encode(payload));
    debug!(
        target: "gmacro::share",
        raw = json.len(), compressed = compressed.len(), code_len = code.len(),
        "Encoded share code"
    );
    Ok(code)
}

/// Reconstruct a macro from a share code.
pub fn decode(code: &str) -> Result<Macro, DecodeError> {
    let code = code.trim();
    let (prefix, body) = match (
        code.get(..SHARE_PREFIX.len()),
        code.get(SHARE_PREFIX.len()..),
    ) {
        (Some(prefix), Some(body)) => (prefix, body),
        _ => return Err(DecodeError::MissingPrefix),
    };
    if !prefix.eq_ignore_ascii_case(SHARE_PREFIX) {
        return Err(DecodeError::MissingPrefix);
    }

    let payload = URL_SAFE_NO_PAD.decode(body)?;
    if payload.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }

    let version = payload[0];
    if version != SHARE_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let expected = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    let compressed = &payload[HEADER_LEN..];
    let found = checksum(compressed);
    if found != expected {
        return Err(DecodeError::ChecksumMismatch { expected, found });
    }

    let mut json = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut json)
        .map_err(|e| DecodeError::Inflate(e.to_string()))?;

    let mac: Macro = serde_json::from_slice(&json)?;
    let errors = validate(&mac);
    if !errors.is_empty() {
        return Err(DecodeError::Invalid(errors));
    }
    Ok(mac)
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(bytes);
    crc.sum()
}
