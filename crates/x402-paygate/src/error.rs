use thiserror::Error;

/// Client-facing outcome of a gate operation.
///
/// Everything except [`GateError::Internal`] is part of the protocol and maps to
/// a stable error code; `Internal` covers store and verifier faults and must
/// never leak its detail to callers.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("challenge not found")]
    NotFound,

    #[error("challenge expired")]
    Expired,

    #[error("challenge already consumed")]
    AlreadyConsumed,

    #[error("payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid access token")]
    InvalidToken,

    #[error("access token required")]
    Unauthenticated,

    #[error("access token expired")]
    TokenExpired,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::NotFound => "not_found",
            GateError::Expired => "expired",
            GateError::AlreadyConsumed => "already_consumed",
            GateError::VerificationFailed(_) => "verification_failed",
            GateError::InvalidToken => "invalid_token",
            GateError::Unauthenticated => "unauthenticated",
            GateError::TokenExpired => "token_expired",
            GateError::Internal(_) => "internal_error",
        }
    }
}

/// Errors raised by a [`ChallengeStore`](crate::store::ChallengeStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate challenge id: {0}")]
    Duplicate(String),

    #[error("corrupt record for {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "full")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<StoreError> for GateError {
    fn from(e: StoreError) -> Self {
        GateError::Internal(e.to_string())
    }
}

/// Errors raised by a [`SettlementVerifier`](crate::verifier::SettlementVerifier).
///
/// A definitive "payment is not valid" answer is not an error; it is a
/// [`Verdict::Rejected`](crate::verifier::Verdict::Rejected).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifierError {
    /// Network failure, timeout or upstream 5xx. Safe to retry.
    #[error("settlement verifier unavailable: {0}")]
    Transient(String),

    /// Misconfiguration or protocol violation. Retrying will not help.
    #[error("settlement verifier failure: {0}")]
    Fatal(String),
}

impl VerifierError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VerifierError::Transient(_))
    }
}

/// Errors decoding or checking a bearer access token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl From<TokenError> for GateError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed(_) | TokenError::BadSignature => GateError::InvalidToken,
            TokenError::Encoding(msg) => GateError::Internal(msg),
        }
    }
}

/// Errors parsing a human-readable price into token base units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("invalid price '{price}': {reason}")]
    Invalid { price: String, reason: String },

    #[error("price '{0}' must be non-zero")]
    Zero(String),
}
