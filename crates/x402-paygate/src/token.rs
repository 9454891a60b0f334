//! HMAC-signed bearer access tokens.
//!
//! Wire format: `base64url(JSON claims) "." hex(HMAC-SHA256(key, encoded claims))`.
//! The key is derived from the configured secret with a fixed label so the
//! raw secret never signs anything directly.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::TokenError;
use crate::hmac::{compute_hmac, derive_key, verify_hmac};
use crate::model::{AccessToken, AccessTokenClaims};

const TOKEN_KEY_LABEL: &[u8] = b"x402-paygate-access-token";

/// Upper bound on a presented token. Anything longer is rejected before any
/// decoding or MAC work.
const MAX_TOKEN_LEN: usize = 1024;

/// Signs and checks access tokens.
pub struct TokenSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: derive_key(secret, TOKEN_KEY_LABEL),
        }
    }

    /// Sign `claims` and produce the bearer token.
    pub fn mint(&self, claims: AccessTokenClaims) -> Result<AccessToken, TokenError> {
        let json = serde_json::to_vec(&claims).map_err(|e| TokenError::Encoding(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = compute_hmac(&self.key, payload.as_bytes());
        let encoded = format!("{payload}.{signature}");
        Ok(AccessToken {
            claims,
            signature,
            encoded,
        })
    }

    /// Check the signature of a presented token and return its claims.
    ///
    /// Expiry and challenge binding are the caller's concern; this only
    /// establishes that the claims were produced by this signer.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(TokenError::Malformed("token too long".to_string()));
        }
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature separator".to_string()))?;

        // MAC first: nothing attacker-controlled is decoded before authentication.
        if !verify_hmac(&self.key, payload.as_bytes(), signature) {
            return Err(TokenError::BadSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| TokenError::Malformed(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(format!("invalid claims: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> AccessTokenClaims {
        AccessTokenClaims {
            token_id: "t1".to_string(),
            challenge_id: "c1".to_string(),
            issued_at: 1_000,
            expires_at: 4_600,
        }
    }

    #[test]
    fn minted_token_verifies() {
        let signer = TokenSigner::new(b"secret");
        let token = signer.mint(claims()).unwrap();
        assert_eq!(signer.verify(token.bearer()).unwrap(), claims());
        assert!(token.bearer().ends_with(&token.signature));
    }

    #[test]
    fn other_secret_rejects() {
        let token = TokenSigner::new(b"secret-a").mint(claims()).unwrap();
        assert_eq!(
            TokenSigner::new(b"secret-b").verify(token.bearer()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn edited_claims_are_rejected() {
        let signer = TokenSigner::new(b"secret");
        let token = signer.mint(claims()).unwrap();
        let (_, sig) = token.bearer().split_once('.').unwrap();

        let mut forged = claims();
        forged.expires_at = u64::MAX;
        forged.challenge_id = "c2".to_string();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert_eq!(
            signer.verify(&format!("{forged_payload}.{sig}")),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn raw_secret_hmac_is_not_a_valid_signature() {
        let signer = TokenSigner::new(b"secret");
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims()).unwrap());
        let sig = compute_hmac(b"secret", payload.as_bytes());
        assert_eq!(
            signer.verify(&format!("{payload}.{sig}")),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn malformed_tokens() {
        let signer = TokenSigner::new(b"secret");
        assert!(matches!(signer.verify("no-separator"), Err(TokenError::Malformed(_))));
        assert_eq!(signer.verify("abc.zz"), Err(TokenError::BadSignature));
        assert!(matches!(
            signer.verify(&"a".repeat(MAX_TOKEN_LEN + 1)),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn signed_garbage_payload_is_malformed() {
        let signer = TokenSigner::new(b"secret");
        let payload = URL_SAFE_NO_PAD.encode(b"not json");
        let sig = compute_hmac(&derive_key(b"secret", TOKEN_KEY_LABEL), payload.as_bytes());
        assert!(matches!(
            signer.verify(&format!("{payload}.{sig}")),
            Err(TokenError::Malformed(_))
        ));
    }
}
