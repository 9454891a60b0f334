//! Settlement verification: does a payment reference really pay a challenge?
//!
//! - [`SettlementVerifier`] — the pluggable capability
//! - [`verify_with_retry`] — per-attempt timeout and bounded backoff for transient failures
//! - [`PayerSignatureVerifier`] — checks the payer's EIP-191 signature, then delegates
//! - [`StaticVerifier`] — deterministic verdicts for tests and local development
//!
//! The remote facilitator implementation lives in
//! [`crate::facilitator_client::HttpSettlementVerifier`].

use std::time::Duration;

use alloy::primitives::{Address, Signature, U256};
use futures::future::BoxFuture;

use crate::error::VerifierError;

/// Everything a verifier needs to judge one proof against one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCheck {
    pub challenge_id: String,
    pub tx_reference: String,
    pub payer: Address,
    pub pay_to: Address,
    /// Minimum transfer, in token base units.
    pub amount: U256,
    pub token: String,
    /// Hex signature by `payer` over [`payment_message`].
    pub signature: String,
}

/// Definitive answer from a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected { reason: String },
}

impl Verdict {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Verdict::Rejected {
            reason: reason.into(),
        }
    }
}

/// Verifies that a referenced payment transfers at least `amount` to `pay_to`
/// from `payer`, and that the signature authenticates `payer`.
///
/// Returns a boxed future so the gate can hold an `Arc<dyn SettlementVerifier>`.
pub trait SettlementVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        check: &'a SettlementCheck,
    ) -> BoxFuture<'a, Result<Verdict, VerifierError>>;
}

/// Timeout and retry bounds for verifier calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single verifier call.
    pub attempt_timeout: Duration,
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (0-based), with ±25% jitter.
    fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let scaled = base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(jitter_ms(scaled))
    }
}

/// Add ±25% jitter to a base delay.
fn jitter_ms(base: u64) -> u64 {
    let quarter = base / 4;
    let mut bytes = [0u8; 8];
    rand::fill(&mut bytes);
    let offset = u64::from_le_bytes(bytes) % (quarter * 2 + 1);
    base - quarter + offset
}

/// Run a verifier under `policy`.
///
/// Each attempt is bounded by `attempt_timeout`. Timeouts and
/// [`VerifierError::Transient`] are retried with exponential backoff up to
/// `max_attempts`; a [`Verdict`] (accept or reject) or a
/// [`VerifierError::Fatal`] ends the loop immediately.
pub async fn verify_with_retry(
    verifier: &dyn SettlementVerifier,
    check: &SettlementCheck,
    policy: &RetryPolicy,
) -> Result<Verdict, VerifierError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = VerifierError::Transient("no attempt made".to_string());

    for attempt in 0..attempts {
        let result = tokio::time::timeout(policy.attempt_timeout, verifier.verify(check))
            .await
            .unwrap_or_else(|_| {
                Err(VerifierError::Transient(format!(
                    "verifier timed out after {}ms",
                    policy.attempt_timeout.as_millis()
                )))
            });

        match result {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    challenge_id = %check.challenge_id,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    "settlement verifier transient failure"
                );
                last_err = e;
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
            other => return other,
        }
    }

    Err(last_err)
}

/// The message a payer signs to bind a transaction reference to a challenge.
pub fn payment_message(challenge_id: &str, tx_reference: &str) -> String {
    format!("x402-paygate:{challenge_id}:{tx_reference}")
}

/// secp256k1 curve order N / 2. Signatures with s > this are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xDFE92F46681B20A0,
    0x5D576E7357A4501D,
    0xFFFFFFFFFFFFFFFF,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the signer of an EIP-191 `personal_sign` signature over `message`.
/// Rejects non-65-byte and high-s signatures.
pub fn recover_signer(message: &str, signature_hex: &str) -> Result<Address, String> {
    let sig_bytes = alloy::hex::decode(signature_hex.trim())
        .map_err(|e| format!("invalid hex signature: {e}"))?;
    if sig_bytes.len() != 65 {
        return Err(format!("signature must be 65 bytes, got {}", sig_bytes.len()));
    }
    let sig = Signature::from_raw(&sig_bytes).map_err(|e| format!("invalid signature: {e}"))?;
    if sig.s() > SECP256K1_N_DIV_2 {
        return Err("high-s signature rejected (EIP-2 malleability)".to_string());
    }
    sig.recover_address_from_msg(message.as_bytes())
        .map_err(|e| format!("recovery failed: {e}"))
}

/// Decorator: authenticates the payer locally, then asks `inner` about the
/// transfer itself. A bad signature is a definitive rejection and never
/// reaches the inner verifier.
pub struct PayerSignatureVerifier<V> {
    inner: V,
}

impl<V: SettlementVerifier> PayerSignatureVerifier<V> {
    pub fn new(inner: V) -> Self {
        Self { inner }
    }
}

impl<V: SettlementVerifier> SettlementVerifier for PayerSignatureVerifier<V> {
    fn verify<'a>(
        &'a self,
        check: &'a SettlementCheck,
    ) -> BoxFuture<'a, Result<Verdict, VerifierError>> {
        Box::pin(async move {
            let message = payment_message(&check.challenge_id, &check.tx_reference);
            match recover_signer(&message, &check.signature) {
                Ok(signer) if signer == check.payer => self.inner.verify(check).await,
                Ok(signer) => {
                    tracing::info!(
                        challenge_id = %check.challenge_id,
                        claimed = %check.payer,
                        recovered = %signer,
                        "payer signature does not match payer address"
                    );
                    Ok(Verdict::rejected("signature does not authenticate payer"))
                }
                Err(reason) => Ok(Verdict::rejected(reason)),
            }
        })
    }
}

/// Verifier with a fixed verdict. Used by tests and by the server's
/// insecure development mode.
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    verdict: Verdict,
}

impl StaticVerifier {
    pub fn accept_all() -> Self {
        Self {
            verdict: Verdict::Accepted,
        }
    }

    pub fn reject_all(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::rejected(reason),
        }
    }
}

impl SettlementVerifier for StaticVerifier {
    fn verify<'a>(
        &'a self,
        _check: &'a SettlementCheck,
    ) -> BoxFuture<'a, Result<Verdict, VerifierError>> {
        let verdict = self.verdict.clone();
        Box::pin(async move { Ok(verdict) })
    }
}
