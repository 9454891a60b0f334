//! The payment-gated access controller.
//!
//! [`PaymentGate`] owns the three protocol operations:
//!
//! 1. [`issue_challenge`](PaymentGate::issue_challenge): mint and persist a challenge
//! 2. [`accept_proof`](PaymentGate::accept_proof): verify settlement, consume the
//!    challenge atomically, mint the single access token bound to it
//! 3. [`authorize`](PaymentGate::authorize): release a resource to the holder of a
//!    valid token
//!
//! Storage, settlement verification and time are injected, so the gate holds
//! no global state and every TTL path can be driven from tests.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use crate::clock::{Clock, SystemClock};
use crate::error::{GateError, PriceError, VerifierError};
use crate::model::{
    AccessToken, AccessTokenClaims, Challenge, ChallengeStatus, ConsumeOutcome, Consumption,
    PaymentProof, ProofSubmission,
};
use crate::price::parse_amount;
use crate::security::{constant_time_eq, random_hex_id};
use crate::store::ChallengeStore;
use crate::token::TokenSigner;
use crate::verifier::{verify_with_retry, RetryPolicy, SettlementCheck, SettlementVerifier, Verdict};

/// Default challenge lifetime (1 hour).
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 3600;

/// Default access token lifetime (1 hour).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Interval of the background expired-challenge purge.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Pricing, recipient and lifetimes for every challenge the gate issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Human-readable price, as shown to clients.
    pub required_amount: String,
    /// Same price in token base units.
    pub amount: U256,
    pub token: String,
    pub recipient: Address,
    pub challenge_ttl_secs: u64,
    pub token_ttl_secs: u64,
    pub retry: RetryPolicy,
}

impl GateConfig {
    /// Build a config from a human-readable price. Lifetimes and retry policy
    /// start at their defaults.
    pub fn new(
        price: &str,
        decimals: u32,
        token: impl Into<String>,
        recipient: Address,
    ) -> Result<Self, PriceError> {
        let amount = parse_amount(price, decimals)?;
        Ok(Self {
            required_amount: price.trim().trim_start_matches('$').to_string(),
            amount,
            token: token.into(),
            recipient,
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_challenge_ttl(mut self, secs: u64) -> Self {
        self.challenge_ttl_secs = secs;
        self
    }

    pub fn with_token_ttl(mut self, secs: u64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Payment-gated access controller.
pub struct PaymentGate {
    config: GateConfig,
    store: Arc<dyn ChallengeStore>,
    verifier: Arc<dyn SettlementVerifier>,
    signer: TokenSigner,
    clock: Arc<dyn Clock>,
}

impl PaymentGate {
    /// Create a gate on the system clock. `secret` keys the access token HMAC.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn ChallengeStore>,
        verifier: Arc<dyn SettlementVerifier>,
        secret: &[u8],
    ) -> Self {
        Self {
            config,
            store,
            verifier,
            signer: TokenSigner::new(secret),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Mint a fresh challenge and persist it as Issued.
    pub fn issue_challenge(&self) -> Result<Challenge, GateError> {
        let now = self.clock.now();
        let challenge = Challenge {
            id: random_hex_id::<32>(),
            required_amount: self.config.required_amount.clone(),
            amount: self.config.amount.to_string(),
            token: self.config.token.clone(),
            recipient_address: self.config.recipient,
            created_at: now,
            expires_at: now.saturating_add(self.config.challenge_ttl_secs),
            status: ChallengeStatus::Issued,
        };

        self.store.put(&challenge).map_err(|e| {
            tracing::error!(error = %e, "failed to persist challenge");
            GateError::from(e)
        })?;

        tracing::info!(
            challenge_id = %challenge.id,
            amount = %challenge.amount,
            expires_at = challenge.expires_at,
            "challenge issued"
        );
        Ok(challenge)
    }

    /// Verify a payment proof and, if it settles the challenge, consume the
    /// challenge and return the access token bound to it.
    ///
    /// At most one call per challenge ever succeeds: the final Issued→Consumed
    /// step is a single compare-and-set in the store, so concurrent winners of
    /// the verification step still race there and all but one get
    /// [`GateError::AlreadyConsumed`].
    pub async fn accept_proof(&self, proof: &ProofSubmission) -> Result<AccessToken, GateError> {
        let challenge_id = proof.challenge_id.as_str();

        let record = self
            .store
            .get(challenge_id)
            .map_err(|e| self.internal("challenge lookup failed", e))?
            .ok_or(GateError::NotFound)?;

        match record.challenge.status_at(self.clock.now()) {
            ChallengeStatus::Expired => return Err(GateError::Expired),
            ChallengeStatus::Consumed => return Err(GateError::AlreadyConsumed),
            ChallengeStatus::Issued => {}
        }

        if proof.tx_reference.trim().is_empty() {
            return Err(GateError::VerificationFailed(
                "missing transaction reference".to_string(),
            ));
        }

        // Verify against what the challenge promised, not the current config.
        let amount = U256::from_str_radix(&record.challenge.amount, 10).map_err(|e| {
            self.internal("stored challenge amount is not a base-10 integer", e)
        })?;
        let check = SettlementCheck {
            challenge_id: challenge_id.to_string(),
            tx_reference: proof.tx_reference.clone(),
            payer: proof.payer_address,
            pay_to: record.challenge.recipient_address,
            amount,
            token: record.challenge.token.clone(),
            signature: proof.signature.clone(),
        };

        match verify_with_retry(self.verifier.as_ref(), &check, &self.config.retry).await {
            Ok(Verdict::Accepted) => {}
            Ok(Verdict::Rejected { reason }) => {
                tracing::warn!(challenge_id, reason = %reason, "payment proof rejected");
                return Err(GateError::VerificationFailed(reason));
            }
            Err(VerifierError::Transient(e)) => {
                tracing::warn!(challenge_id, error = %e, "settlement verifier exhausted retries");
                return Err(GateError::VerificationFailed(
                    "settlement verifier unavailable".to_string(),
                ));
            }
            Err(e @ VerifierError::Fatal(_)) => {
                return Err(self.internal("settlement verifier failed", e));
            }
        }

        // Verification can take seconds; expiry is judged at consume time.
        let now = self.clock.now();
        let token = self.signer.mint(AccessTokenClaims {
            token_id: random_hex_id::<16>(),
            challenge_id: challenge_id.to_string(),
            issued_at: now,
            expires_at: now.saturating_add(self.config.token_ttl_secs),
        })?;

        let consumption = Consumption {
            proof: PaymentProof {
                challenge_id: challenge_id.to_string(),
                tx_reference: proof.tx_reference.clone(),
                payer_address: proof.payer_address,
                submitted_at: now,
            },
            token_id: token.claims.token_id.clone(),
        };

        let outcome = self
            .store
            .compare_and_consume(&consumption, now)
            .map_err(|e| self.internal("challenge consume failed", e))?;

        match outcome {
            ConsumeOutcome::Consumed => {
                tracing::info!(
                    challenge_id,
                    payer = %proof.payer_address,
                    tx_reference = %proof.tx_reference,
                    token_expires_at = token.claims.expires_at,
                    "payment accepted, access token issued"
                );
                Ok(token)
            }
            ConsumeOutcome::NotFound => Err(GateError::NotFound),
            ConsumeOutcome::Expired => Err(GateError::Expired),
            ConsumeOutcome::AlreadyConsumed => {
                tracing::info!(challenge_id, "lost consume race");
                Err(GateError::AlreadyConsumed)
            }
            ConsumeOutcome::ReferenceReused => {
                tracing::warn!(
                    challenge_id,
                    tx_reference = %proof.tx_reference,
                    "transaction reference already satisfied another challenge"
                );
                Err(GateError::VerificationFailed(
                    "transaction reference already used".to_string(),
                ))
            }
        }
    }

    /// Check a presented bearer token and return its claims.
    ///
    /// The token must carry a valid signature, be unexpired, and be the one
    /// token recorded against a consumed challenge.
    pub fn validate_token(&self, token: Option<&str>) -> Result<AccessTokenClaims, GateError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GateError::Unauthenticated)?;

        let claims = self.signer.verify(token)?;

        if self.clock.now() > claims.expires_at {
            return Err(GateError::TokenExpired);
        }

        let record = self
            .store
            .get(&claims.challenge_id)
            .map_err(|e| self.internal("challenge lookup failed", e))?
            .ok_or(GateError::InvalidToken)?;

        let bound = record.challenge.status == ChallengeStatus::Consumed
            && record
                .token_id
                .as_deref()
                .is_some_and(|id| constant_time_eq(id.as_bytes(), claims.token_id.as_bytes()));
        if !bound {
            tracing::warn!(
                challenge_id = %claims.challenge_id,
                "token not bound to a consumed challenge"
            );
            return Err(GateError::InvalidToken);
        }

        Ok(claims)
    }

    /// Release `resource` to the holder of a valid token. Never mutates
    /// challenge or token state: a token may be presented any number of
    /// times until it expires.
    ///
    /// This is the library-level entry point for embedders. The HTTP server
    /// calls [`Self::validate_token`] directly because its `/content` body
    /// also echoes the token's claims.
    pub fn authorize<R>(&self, token: Option<&str>, resource: R) -> Result<R, GateError> {
        self.validate_token(token)?;
        Ok(resource)
    }

    /// A challenge with its status as observed now.
    pub fn challenge_status(&self, id: &str) -> Result<Challenge, GateError> {
        let record = self
            .store
            .get(id)
            .map_err(|e| self.internal("challenge lookup failed", e))?
            .ok_or(GateError::NotFound)?;
        Ok(record.challenge.observed_at(self.clock.now()))
    }

    /// Accepted payment proofs, newest first.
    pub fn payment_history(&self) -> Result<Vec<PaymentProof>, GateError> {
        self.store
            .proofs()
            .map_err(|e| self.internal("payment history lookup failed", e))
    }

    /// Delete expired, never-consumed challenges.
    pub fn purge_expired(&self) -> Result<usize, GateError> {
        self.store
            .purge_expired(self.clock.now())
            .map_err(|e| self.internal("challenge purge failed", e))
    }

    /// Start a background task that purges expired challenges every `interval`.
    pub fn start_purge_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.purge_expired(clock.now()) {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "purged expired challenges"),
                    Err(e) => tracing::error!(error = %e, "challenge purge failed"),
                }
            }
        })
    }

    fn internal(&self, context: &str, err: impl std::fmt::Display) -> GateError {
        tracing::error!(error = %err, "{context}");
        GateError::Internal(format!("{context}: {err}"))
    }
}
