use actix_web::{get, post, web, HttpRequest, HttpResponse, ResponseError};
use paygate::{IssuedToken, ProofSubmission};

use crate::error::ApiError;
use crate::metrics::{CHALLENGES_ISSUED, PROOF_LATENCY, PROOF_OUTCOMES, REQUESTS};
use crate::middleware::require_access;
use crate::state::AppState;

fn record(endpoint: &str, status: u16) {
    REQUESTS
        .with_label_values(&[endpoint, status.to_string().as_str()])
        .inc();
}

fn recorded(endpoint: &str, err: ApiError) -> ApiError {
    record(endpoint, err.status_code().as_u16());
    err
}

/// POST /challenge - issue a payment challenge
#[post("/challenge")]
pub async fn create_challenge(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let challenge = state
        .gate
        .issue_challenge()
        .map_err(|e| recorded("/challenge", e.into()))?;
    CHALLENGES_ISSUED.inc();
    record("/challenge", 200);
    Ok(HttpResponse::Ok().json(challenge))
}

/// POST /proof - submit a payment proof, receive an access token
#[post("/proof")]
pub async fn submit_proof(
    state: web::Data<AppState>,
    body: web::Json<ProofSubmission>,
) -> Result<HttpResponse, ApiError> {
    let proof = body.into_inner();
    tracing::info!(
        challenge_id = %proof.challenge_id,
        payer = %proof.payer_address,
        "payment proof submitted"
    );

    let timer = PROOF_LATENCY.start_timer();
    let result = state.gate.accept_proof(&proof).await;
    timer.observe_duration();

    match result {
        Ok(token) => {
            PROOF_OUTCOMES.with_label_values(&["accepted"]).inc();
            record("/proof", 200);
            Ok(HttpResponse::Ok().json(IssuedToken::from(&token)))
        }
        Err(e) => {
            PROOF_OUTCOMES.with_label_values(&[e.code()]).inc();
            Err(recorded("/proof", e.into()))
        }
    }
}

/// GET /content - the gated resource
#[get("/content")]
pub async fn content(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let claims = match require_access(&req, &state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    record("/content", 200);
    HttpResponse::Ok().json(serde_json::json!({
        "challengeId": claims.challenge_id,
        "expiresAt": claims.expires_at,
        "content": state.content.as_ref(),
    }))
}

/// GET /challenge/{id} - challenge with its current status
#[get("/challenge/{id}")]
pub async fn challenge_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let challenge = state
        .gate
        .challenge_status(&path.into_inner())
        .map_err(|e| recorded("/challenge/{id}", e.into()))?;
    record("/challenge/{id}", 200);
    Ok(HttpResponse::Ok().json(challenge))
}

/// GET /payments - accepted payment proofs, newest first
#[get("/payments")]
pub async fn payments(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let history = state
        .gate
        .payment_history()
        .map_err(|e| recorded("/payments", e.into()))?;
    record("/payments", 200);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "count": history.len(),
        "payments": history,
    })))
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "x402-paygate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(expected) => {
            let authorized = crate::middleware::bearer_token(&req)
                .map(|token| {
                    paygate::security::constant_time_eq(token.as_bytes(), expected.as_bytes())
                })
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            // No token configured: metrics are protected by default.
            if !state.public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or PAYGATE_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(crate::metrics::metrics_output())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_challenge)
        .service(submit_proof)
        .service(content)
        .service(challenge_status)
        .service(payments)
        .service(health)
        .service(metrics_endpoint);
}
