use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over the concatenation of `parts`.
///
/// Callers are responsible for framing: parts are fed to the MAC back to back
/// with no separator added here.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    for part in parts {
        mac.update(part);
    }

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex-encoded HMAC-SHA256, used where the digest is persisted as text.
pub fn hmac_sha256_hex(key: &[u8], parts: &[&[u8]]) -> Result<String, anyhow::Error> {
    Ok(hex::encode(hmac_sha256(key, parts)?))
}

/// Verify an HMAC-SHA256 tag using constant-time comparison
pub fn verify_hmac_sha256(
    key: &[u8],
    parts: &[&[u8]],
    presented: &[u8],
) -> Result<bool, anyhow::Error> {
    let expected = hmac_sha256(key, parts)?;
    Ok(constant_time_eq(&expected, presented))
}

/// Length check first, then a constant-time byte comparison.
pub fn constant_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    if expected.len() != presented.len() {
        return false;
    }

    expected.ct_eq(presented).into()
}
