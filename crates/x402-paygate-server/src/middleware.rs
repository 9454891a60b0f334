use actix_web::{HttpRequest, HttpResponse, ResponseError};
use paygate::{AccessTokenClaims, Challenge, GateError};
use serde::Serialize;

use crate::error::ApiError;
use crate::metrics::{ACCESS_CHECKS, CHALLENGES_ISSUED, REQUESTS};
use crate::state::AppState;

pub const X402_VERSION: u32 = 1;

/// Body of a 402 response: the challenge the client has to pay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub x402_version: u32,
    pub error: &'static str,
    pub message: &'static str,
    pub challenge: Challenge,
}

pub fn payment_required_body(challenge: Challenge) -> PaymentRequiredBody {
    PaymentRequiredBody {
        x402_version: X402_VERSION,
        error: "payment_required",
        message: "Payment required to access this resource",
        challenge,
    }
}

/// Extract the token from `Authorization: Bearer <token>`. The scheme name
/// is matched case-insensitively (RFC 7235).
///
/// `None` when the header is absent, not UTF-8, or uses another scheme.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim_start().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty())
}

/// Gate a request on a valid access token.
///
/// No token: answer 402 with a freshly issued challenge. A token that fails
/// validation: answer with its error. Otherwise return the token's claims.
pub fn require_access(
    req: &HttpRequest,
    state: &AppState,
) -> Result<AccessTokenClaims, HttpResponse> {
    // Use the matched route pattern (not raw path) to prevent cardinality bombs
    let endpoint_label = req.match_pattern().unwrap_or_else(|| "unknown".to_string());

    let Some(token) = bearer_token(req) else {
        ACCESS_CHECKS.with_label_values(&["payment_required"]).inc();
        return match state.gate.issue_challenge() {
            Ok(challenge) => {
                CHALLENGES_ISSUED.inc();
                REQUESTS
                    .with_label_values(&[endpoint_label.as_str(), "402"])
                    .inc();
                Err(HttpResponse::PaymentRequired().json(payment_required_body(challenge)))
            }
            Err(e) => Err(reject(&endpoint_label, e)),
        };
    };

    match state.gate.validate_token(Some(token)) {
        Ok(claims) => {
            ACCESS_CHECKS.with_label_values(&["granted"]).inc();
            Ok(claims)
        }
        Err(e) => {
            ACCESS_CHECKS.with_label_values(&[e.code()]).inc();
            tracing::info!(error = %e, "access denied");
            Err(reject(&endpoint_label, e))
        }
    }
}

fn reject(endpoint_label: &str, e: GateError) -> HttpResponse {
    let err = ApiError(e);
    let status = err.status_code();
    REQUESTS
        .with_label_values(&[endpoint_label, status.as_str()])
        .inc();
    err.error_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_bearer_token_extraction() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.def"))
            .to_http_request();
        assert_eq!(bearer_token(&req), Some("abc.def"));

        for header in ["bearer abc.def", "BEARER abc.def", "bEaReR   abc.def "] {
            let req = TestRequest::default()
                .insert_header(("Authorization", header))
                .to_http_request();
            assert_eq!(bearer_token(&req), Some("abc.def"), "{header}");
        }

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearerabc.def"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic dXNlcjpwYXNz"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer   "))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default().to_http_request();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn test_payment_required_body_shape() {
        let challenge = Challenge {
            id: "c1".to_string(),
            required_amount: "0.001".to_string(),
            amount: "1000".to_string(),
            token: "USDC".to_string(),
            recipient_address: alloy::primitives::Address::ZERO,
            created_at: 1,
            expires_at: 3601,
            status: paygate::ChallengeStatus::Issued,
        };
        let json = serde_json::to_value(payment_required_body(challenge)).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["error"], "payment_required");
        assert_eq!(json["challenge"]["challengeId"], "c1");
        assert_eq!(json["challenge"]["amount"], "1000");
    }
}
