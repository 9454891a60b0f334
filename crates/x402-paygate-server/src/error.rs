use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use paygate::GateError;

/// HTTP face of [`GateError`].
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub GateError);

impl ApiError {
    /// Client-safe message. Internal detail is logged, never returned.
    fn public_message(&self) -> String {
        match &self.0 {
            GateError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            GateError::NotFound => StatusCode::NOT_FOUND,
            GateError::Expired | GateError::TokenExpired => StatusCode::GONE,
            GateError::AlreadyConsumed => StatusCode::CONFLICT,
            GateError::VerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GateError::InvalidToken | GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let GateError::Internal(ref msg) = self.0 {
            tracing::error!("Internal error: {}", msg);
        }

        let mut resp = HttpResponse::build(self.status_code());
        if self.status_code() == StatusCode::UNAUTHORIZED {
            resp.insert_header(("WWW-Authenticate", "Bearer"));
        }
        resp.json(serde_json::json!({
            "error": self.0.code(),
            "message": self.public_message(),
        }))
    }
}

/// Turns JSON extractor failures (bad body, bad payer address) into a 400
/// with the same error body shape as every other failure.
pub fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &HttpRequest,
) -> actix_web::Error {
    let message = err.to_string();
    let response = HttpResponse::BadRequest().json(serde_json::json!({
        "error": "invalid_request",
        "message": message,
    }));
    actix_web::error::InternalError::from_response(err, response).into()
}
