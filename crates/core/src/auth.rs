use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use url::Url;

pub const DEFAULT_LINK_TTL_SECS: i64 = 3600;
pub const MIN_LINK_TTL_SECS: i64 = 60;
pub const MAX_LINK_TTL_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecureLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Sign a voucher download for one session until `expires` (unix seconds).
///
/// Note: new_from_slice only fails for algorithms with key length constraints.
/// SHA256 accepts any key length, so this is infallible in practice.
pub fn sign_download(secret: &str, session_id: &str, expires: i64) -> String {
    let data = format!("{}.{}", session_id, expires);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// A link is good strictly before its expiry and only for the session it was
/// signed for.
pub fn verify_download(
    secret: &str,
    session_id: &str,
    expires: i64,
    signature: &str,
    now: DateTime<Utc>,
) -> bool {
    if now.timestamp() >= expires {
        return false;
    }
    let expected = sign_download(secret, session_id, expires);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

pub fn clamp_ttl(ttl_secs: Option<i64>) -> i64 {
    ttl_secs
        .unwrap_or(DEFAULT_LINK_TTL_SECS)
        .clamp(MIN_LINK_TTL_SECS, MAX_LINK_TTL_SECS)
}

pub fn build_secure_link(
    public_url: &str,
    secret: &str,
    session_id: &str,
    now: DateTime<Utc>,
    ttl_secs: Option<i64>,
) -> Result<SecureLink, url::ParseError> {
    let expires = now.timestamp() + clamp_ttl(ttl_secs);
    let signature = sign_download(secret, session_id, expires);
    let base = format!("{}/vouchers/download", public_url.trim_end_matches('/'));
    let url = Url::parse_with_params(
        &base,
        &[
            ("session_id", session_id),
            ("expires", &expires.to_string()),
            ("sig", &signature),
        ],
    )?;

    Ok(SecureLink {
        url: url.to_string(),
        expires_at: Utc
            .timestamp_opt(expires, 0)
            .single()
            .unwrap_or(now + Duration::seconds(clamp_ttl(ttl_secs))),
    })
}

pub fn admin_token_matches(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
