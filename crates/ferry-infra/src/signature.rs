//! HMAC-SHA256 request signatures for realtime notifications
//!
//! The signature covers `v0:{timestamp}:{raw body}` and is sent as `v0=<hex digest>`.
//! Timestamps outside the tolerance window are rejected to stop replays.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_VERSION: &str = "v0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Request timestamp is not a unix timestamp")]
    InvalidTimestamp,

    #[error("Request timestamp is outside the allowed window")]
    Expired,

    #[error("Signature is not in v0=<hex> form")]
    Malformed,

    #[error("Signature does not match request body")]
    Mismatch,
}

/// Signature for `body` sent at `timestamp`, in header form (`v0=<hex>`)
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(SIGNATURE_VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("{}={}", SIGNATURE_VERSION, hex::encode(mac.finalize().into_bytes()))
}

/// Check a signed request
///
/// `now` is the current unix time in seconds. The comparison runs in constant time.
pub fn verify_signature(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader("timestamp"))?;
    let signature = signature.ok_or(SignatureError::MissingHeader("signature"))?;

    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if now.abs_diff(sent_at) > tolerance.as_secs() {
        return Err(SignatureError::Expired);
    }

    let digest = signature
        .strip_prefix(SIGNATURE_VERSION)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or(SignatureError::Malformed)?;
    if digest.is_empty() || hex::decode(digest).is_err() {
        return Err(SignatureError::Malformed);
    }

    let expected = compute_signature(secret, timestamp.trim(), body);
    let matches: bool = expected
        .as_bytes()
        .ct_eq(signature.to_ascii_lowercase().as_bytes())
        .into();
    if !matches {
        return Err(SignatureError::Mismatch);
    }

    Ok(())
}
