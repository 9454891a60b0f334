//! Constant-time helpers shared by the gate and the HTTP server.
//!
//! All comparisons go through the `subtle` crate.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time byte comparison that does not leak input lengths or content.
///
/// Both inputs are hashed to fixed-length SHA-256 digests before comparison,
/// so timing reveals neither the content nor the length of either input.
///
/// Used for the `/metrics` bearer token and for matching a presented access
/// token's id against the id recorded when it was minted.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Fill a buffer of `N` bytes from the OS CSPRNG and hex-encode it.
///
/// Challenge and token ids come from here; they are never derived from
/// timestamps or other guessable inputs.
pub fn random_hex_id<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::fill(&mut bytes); // CSPRNG via ThreadRng -> OsRng
    alloy::hex::encode(bytes)
}
