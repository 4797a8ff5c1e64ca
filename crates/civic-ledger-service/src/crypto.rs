//! Cryptographic utilities for event signature verification.
//!
//! Collaborators may sign event bodies with a shared secret. The signature is
//! the hex-encoded HMAC-SHA256 of the raw request body.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Arguments
///
/// * `secret` - The secret key for HMAC computation
/// * `message` - The message to sign
///
/// # Returns
///
/// A hex-encoded string of the HMAC-SHA256 result (64 characters), or `None`
/// if the key is rejected.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex-encoded HMAC-SHA256 signature over `message`.
///
/// Comparison is constant-time.
#[must_use]
pub fn verify_signature(secret: &str, message: &[u8], signature: &str) -> bool {
    hmac_sha256_hex(secret, message)
        .is_some_and(|expected| constant_time_eq(&expected, &signature.trim().to_lowercase()))
}

/// Constant-time string comparison to prevent timing attacks.
///
/// This function compares two strings in constant time to prevent timing
/// side-channel attacks when verifying signatures and API keys.
///
/// # Arguments
///
/// * `a` - First string to compare
/// * `b` - Second string to compare
///
/// # Returns
///
/// `true` if the strings are equal, `false` otherwise.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
