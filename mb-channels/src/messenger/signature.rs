//! `x-hub-signature` verification: HMAC-SHA1 of the raw request body keyed
//! with the app secret, sent as `sha1=<hex digest>`.

use crate::error::WebhookError;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature";
const SIGNATURE_PREFIX: &str = "sha1=";

fn keyed_mac(app_secret: &str) -> Result<HmacSha1, WebhookError> {
    HmacSha1::new_from_slice(app_secret.as_bytes())
        .map_err(|_| WebhookError::Authentication("app secret cannot key hmac-sha1"))
}

/// Header value Facebook would send for `body`.
pub fn sign(app_secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = keyed_mac(app_secret)?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a signature header against the raw body. The digest comparison is
/// constant time.
pub fn verify_signature(
    header: Option<&str>,
    body: &[u8],
    app_secret: &str,
) -> Result<(), WebhookError> {
    let header = header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(WebhookError::Authentication("missing signature header"))?;
    let digest_hex = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(WebhookError::Authentication("unsupported signature scheme"))?;
    let digest = hex::decode(digest_hex)
        .map_err(|_| WebhookError::Authentication("malformed signature digest"))?;

    let mut mac = keyed_mac(app_secret)?;
    mac.update(body);
    mac.verify_slice(&digest)
        .map_err(|_| WebhookError::Authentication("signature mismatch"))
}

/// Byte comparison whose timing does not depend on where the inputs differ.
pub(crate) fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}
