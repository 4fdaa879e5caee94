//! Webhook signature verification: HMAC-SHA256 over the raw body, hex
//! encoded, compared in constant time.

use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64;

pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    let mut key = [0u8; BLOCK_SIZE];
    if secret.len() > BLOCK_SIZE {
        let digest = Sha256::digest(secret);
        key[..digest.len()].copy_from_slice(&digest);
    } else {
        key[..secret.len()].copy_from_slice(secret);
    }

    let mut inner = Sha256::new();
    inner.update(key.map(|b| b ^ 0x36));
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(key.map(|b| b ^ 0x5c));
    outer.update(inner_digest);

    hex_encode(&outer.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time comparison of the presented signature against the expected
/// HMAC for the body.
pub fn verify_signature(secret: &str, body: &[u8], presented: &str) -> bool {
    let expected = hmac_sha256_hex(secret.as_bytes(), body);
    let presented = presented.trim_start_matches("sha256=");
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
