//! Session id generation and validation.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;

static SID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new("^[A-Za-z0-9,-]{22,256}$").unwrap()
});

/// Whether `sid` matches the session id grammar
/// (`^[A-Za-z0-9,-]{22,256}$`)
#[must_use]
pub fn validate_id(sid: &str) -> bool {
    SID_PATTERN.is_match(sid)
}

/// Generate a fresh session id: base64 of 32 cryptographically random
/// bytes, mapped into the sid alphabet (`+` becomes `-`, `/` becomes `,`).
#[must_use]
pub fn create_sid() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    STANDARD_NO_PAD
        .encode(raw)
        .replace('+', "-")
        .replace('/', ",")
}
