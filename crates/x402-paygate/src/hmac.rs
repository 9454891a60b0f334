use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over the given body bytes using the shared secret.
/// Returns the hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    alloy::hex::encode(raw_hmac(secret, body))
}

/// Verify a hex-encoded HMAC-SHA256 signature against the expected body.
///
/// Uses constant-time comparison. Invalid hex is compared against zeros so a
/// malformed signature takes the same path as a wrong one.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);

    let expected = alloy::hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);

    // verify_slice is constant-time
    mac.verify_slice(&expected).is_ok()
}

/// Derive a domain-separated subkey: `HMAC(secret, label)`.
///
/// Keeps keys for different purposes (token signing, facilitator auth)
/// independent even when operators reuse one configured secret.
pub fn derive_key(secret: &[u8], label: &[u8]) -> Vec<u8> {
    raw_hmac(secret, label)
}

fn raw_hmac(secret: &[u8], body: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}
