//! HTTP client for a remote facilitator's `/verify-payment` endpoint.
//!
//! The facilitator owns chain access; the gate only asks it whether a
//! transaction reference pays a challenge. Request bodies are signed with
//! HMAC-SHA256 in the `X-Facilitator-Auth` header when a shared secret is set.

use alloy::primitives::Address;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::VerifierError;
use crate::verifier::{SettlementCheck, SettlementVerifier, Verdict};

/// Request body sent to the facilitator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest<'a> {
    pub challenge_id: &'a str,
    pub tx_reference: &'a str,
    pub payer: Address,
    pub pay_to: Address,
    pub amount: String,
    pub token: &'a str,
}

/// Response from the facilitator's `/verify-payment` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

/// [`SettlementVerifier`] backed by a remote facilitator.
pub struct HttpSettlementVerifier {
    client: reqwest::Client,
    endpoint: String,
    hmac_secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for HttpSettlementVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSettlementVerifier")
            .field("endpoint", &self.endpoint)
            .field(
                "hmac_secret",
                &self.hmac_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl HttpSettlementVerifier {
    /// Build a verifier for `facilitator_url`. Redirects are disabled so the
    /// signed request can never be bounced to another host.
    pub fn new(facilitator_url: &str, hmac_secret: Option<Vec<u8>>) -> Result<Self, VerifierError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| VerifierError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/verify-payment", facilitator_url.trim_end_matches('/')),
            hmac_secret,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, check: &SettlementCheck) -> Result<Verdict, VerifierError> {
        let body = VerifyPaymentRequest {
            challenge_id: &check.challenge_id,
            tx_reference: &check.tx_reference,
            payer: check.payer,
            pay_to: check.pay_to,
            amount: check.amount.to_string(),
            token: &check.token,
        };
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| VerifierError::Fatal(format!("serialization failed: {e}")))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");

        if let Some(secret) = &self.hmac_secret {
            let sig = crate::hmac::compute_hmac(secret, &body_bytes);
            request = request.header("X-Facilitator-Auth", sig);
        }

        // Per-attempt deadline is enforced by the caller's retry policy.
        let resp = request
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| VerifierError::Transient(format!("facilitator request failed: {e}")))?;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let parsed: VerifyPaymentResponse = resp.json().await.map_err(|e| {
            VerifierError::Fatal(format!("facilitator response parse failed: {e}"))
        })?;

        Ok(if parsed.is_valid {
            Verdict::Accepted
        } else {
            Verdict::rejected(
                parsed
                    .invalid_reason
                    .unwrap_or_else(|| "payment rejected by facilitator".to_string()),
            )
        })
    }
}

/// Map a non-success facilitator status onto the retry taxonomy.
/// Returns `None` for 2xx.
pub fn classify_status(status: reqwest::StatusCode) -> Option<VerifierError> {
    use reqwest::StatusCode;

    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            VerifierError::Fatal("facilitator authentication failed".to_string())
        }
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            VerifierError::Transient(format!("facilitator returned {status}"))
        }
        s if s.is_server_error() => VerifierError::Transient(format!("facilitator returned {s}")),
        s => VerifierError::Fatal(format!("facilitator returned {s}")),
    })
}

impl SettlementVerifier for HttpSettlementVerifier {
    fn verify<'a>(
        &'a self,
        check: &'a SettlementCheck,
    ) -> BoxFuture<'a, Result<Verdict, VerifierError>> {
        Box::pin(self.call(check))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use reqwest::StatusCode;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let v = HttpSettlementVerifier::new("http://localhost:4022/", None).unwrap();
        assert_eq!(v.endpoint(), "http://localhost:4022/verify-payment");
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(VerifierError::Fatal(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(VerifierError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(VerifierError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(VerifierError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(VerifierError::Fatal(_))
        ));
    }

    #[test]
    fn test_response_wire_format() {
        let parsed: VerifyPaymentResponse =
            serde_json::from_str(r#"{"isValid":false,"invalidReason":"amount below required"}"#)
                .unwrap();
        assert!(!parsed.is_valid);
        assert_eq!(parsed.invalid_reason.as_deref(), Some("amount below required"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let v = HttpSettlementVerifier::new("http://localhost:4022", Some(b"s3cret".to_vec()))
            .unwrap();
        let dbg = format!("{v:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_unreachable_facilitator_is_transient() {
        let v = HttpSettlementVerifier::new("http://127.0.0.1:1", None).unwrap();
        let check = SettlementCheck {
            challenge_id: "c1".to_string(),
            tx_reference: "0xabc".to_string(),
            payer: Address::repeat_byte(0x22),
            pay_to: Address::repeat_byte(0x11),
            amount: U256::from(1_000u64),
            token: "USDC".to_string(),
            signature: String::new(),
        };
        assert!(matches!(
            v.verify(&check).await,
            Err(VerifierError::Transient(_))
        ));
    }
}
