//! HTTP 402 payment-gated access.
//!
//! A client asks for a challenge, pays out of band, submits a proof of that
//! payment and receives a short-lived access token bound to exactly one
//! challenge. The token unlocks gated content until it expires.
//!
//! # Pieces
//!
//! - **[`PaymentGate`]** — the controller: issue challenge, accept proof, authorize access
//! - **[`ChallengeStore`]** — atomic challenge storage ([`InMemoryChallengeStore`], `SqliteChallengeStore`)
//! - **[`SettlementVerifier`]** — decides whether a payment reference settles a challenge
//! - **[`TokenSigner`]** — HMAC-SHA256 signed access tokens
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use paygate::{GateConfig, InMemoryChallengeStore, PaymentGate, StaticVerifier};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let recipient = "0x1111111111111111111111111111111111111111".parse()?;
//! let gate = PaymentGate::new(
//!     GateConfig::new("0.001", 6, "USDC", recipient)?,
//!     Arc::new(InMemoryChallengeStore::new()),
//!     Arc::new(StaticVerifier::accept_all()),
//!     b"a-secret-of-at-least-thirty-two-bytes",
//! );
//! let challenge = gate.issue_challenge()?;
//! println!("pay {} {} to {}", challenge.required_amount, challenge.token, challenge.recipient_address);
//! # Ok(())
//! # }
//! ```

// Core types
pub mod error;
pub mod model;

// Primitives
pub mod clock;
pub mod hmac;
pub mod price;
pub mod security;
pub mod token;

// Capabilities
pub mod store;
pub mod verifier;

#[cfg(feature = "full")]
pub mod facilitator_client;

// Controller
pub mod gate;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GateError, PriceError, StoreError, TokenError, VerifierError};
pub use gate::{GateConfig, PaymentGate};
pub use model::{
    AccessToken, AccessTokenClaims, Challenge, ChallengeStatus, IssuedToken, PaymentProof,
    ProofSubmission,
};
pub use store::{ChallengeStore, InMemoryChallengeStore};
pub use token::TokenSigner;
pub use verifier::{
    PayerSignatureVerifier, RetryPolicy, SettlementCheck, SettlementVerifier, StaticVerifier,
    Verdict,
};

#[cfg(feature = "full")]
pub use facilitator_client::HttpSettlementVerifier;
#[cfg(feature = "full")]
pub use store::SqliteChallengeStore;
