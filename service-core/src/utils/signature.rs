//! HMAC-SHA256 helpers shared by the payment provider adapters.
//!
//! Both providers sign webhook bodies with a shared secret and send the
//! lowercase hex digest in a header. Comparisons are constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute `hex(HMAC-SHA256(payload, secret))`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex-encoded HMAC-SHA256 signature using constant-time comparison.
///
/// An empty secret never verifies: an unconfigured provider must not accept
/// events signed with the empty key.
pub fn verify_hmac_sha256_hex(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    if secret.is_empty() {
        return Ok(false);
    }

    let expected = hmac_sha256_hex(secret, payload)?;
    Ok(constant_time_eq(&expected, signature.trim()))
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
