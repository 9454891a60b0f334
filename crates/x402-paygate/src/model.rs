use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Lifecycle of a challenge.
///
/// Only `Issued` and `Consumed` are ever stored. `Expired` is computed at
/// read time from `expires_at`, see [`Challenge::status_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Issued,
    Consumed,
    Expired,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Issued => "issued",
            ChallengeStatus::Consumed => "consumed",
            ChallengeStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issued" => Some(ChallengeStatus::Issued),
            "consumed" => Some(ChallengeStatus::Consumed),
            "expired" => Some(ChallengeStatus::Expired),
            _ => None,
        }
    }
}

/// A server-issued record describing the payment required to unlock content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    #[serde(rename = "challengeId")]
    pub id: String,
    /// Human-readable price, e.g. `"1.0"`.
    pub required_amount: String,
    /// Price in token base units (decimal string).
    pub amount: String,
    /// Asset symbol the payment is denominated in.
    pub token: String,
    pub recipient_address: Address,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: ChallengeStatus,
}

impl Challenge {
    /// Status as observed at `now`. Past its expiry every challenge reads as
    /// `Expired`, whatever is stored. The stored status still decides token
    /// binding and purging.
    pub fn status_at(&self, now: u64) -> ChallengeStatus {
        if now > self.expires_at {
            ChallengeStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy of the challenge with `status` replaced by [`Self::status_at`].
    pub fn observed_at(&self, now: u64) -> Self {
        Self {
            status: self.status_at(now),
            ..self.clone()
        }
    }
}

/// Client-submitted evidence that a payment satisfying a challenge occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofSubmission {
    pub challenge_id: String,
    pub tx_reference: String,
    pub signature: String,
    pub payer_address: Address,
}

/// An accepted proof. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub challenge_id: String,
    pub tx_reference: String,
    pub payer_address: Address,
    pub submitted_at: u64,
}

/// A challenge together with what the store recorded when it was consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub challenge: Challenge,
    pub proof: Option<PaymentProof>,
    /// Id of the single access token minted for this challenge.
    pub token_id: Option<String>,
}

/// Everything written by the Issued→Consumed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub proof: PaymentProof,
    pub token_id: String,
}

/// Result of the store's atomic compare-and-consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This caller won the Issued→Consumed transition.
    Consumed,
    NotFound,
    AlreadyConsumed,
    Expired,
    /// The transaction reference already satisfied another challenge.
    ReferenceReused,
}

/// Signed claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenClaims {
    pub token_id: String,
    pub challenge_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// A minted access token: claims, their HMAC, and the bearer string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub claims: AccessTokenClaims,
    /// Hex-encoded HMAC-SHA256 over the encoded claims.
    pub signature: String,
    pub(crate) encoded: String,
}

impl AccessToken {
    /// The value a client sends as `Authorization: Bearer <token>`.
    pub fn bearer(&self) -> &str {
        &self.encoded
    }
}

/// Response to a successful proof submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub access_token: String,
    pub challenge_id: String,
    pub expires_at: u64,
}

impl From<&AccessToken> for IssuedToken {
    fn from(token: &AccessToken) -> Self {
        Self {
            access_token: token.bearer().to_string(),
            challenge_id: token.claims.challenge_id.clone(),
            expires_at: token.claims.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(status: ChallengeStatus) -> Challenge {
        Challenge {
            id: "c1".to_string(),
            required_amount: "1.0".to_string(),
            amount: "1000000".to_string(),
            token: "USDC".to_string(),
            recipient_address: Address::ZERO,
            created_at: 100,
            expires_at: 200,
            status,
        }
    }

    #[test]
    fn issued_reads_expired_only_after_expiry() {
        let c = challenge(ChallengeStatus::Issued);
        assert_eq!(c.status_at(200), ChallengeStatus::Issued);
        assert_eq!(c.status_at(201), ChallengeStatus::Expired);
    }

    #[test]
    fn consumed_reads_expired_after_expiry() {
        let c = challenge(ChallengeStatus::Consumed);
        assert_eq!(c.status_at(200), ChallengeStatus::Consumed);
        assert_eq!(c.status_at(10_000), ChallengeStatus::Expired);
        assert_eq!(c.observed_at(10_000).status, ChallengeStatus::Expired);
        assert_eq!(c.status, ChallengeStatus::Consumed);
    }

    #[test]
    fn challenge_wire_format() {
        let json = serde_json::to_value(challenge(ChallengeStatus::Issued)).unwrap();
        assert_eq!(json["challengeId"], "c1");
        assert_eq!(json["requiredAmount"], "1.0");
        assert_eq!(json["recipientAddress"], format!("{}", Address::ZERO));
        assert_eq!(json["expiresAt"], 200);
        assert_eq!(json["status"], "issued");
    }

    #[test]
    fn proof_submission_rejects_bad_address() {
        let body = serde_json::json!({
            "challengeId": "c1",
            "txReference": "0xabc",
            "signature": "0xdead",
            "payerAddress": "not-an-address",
        });
        assert!(serde_json::from_value::<ProofSubmission>(body).is_err());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            ChallengeStatus::Issued,
            ChallengeStatus::Consumed,
            ChallengeStatus::Expired,
        ] {
            assert_eq!(ChallengeStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ChallengeStatus::parse("pending"), None);
    }
}
