//! CORS configuration for the paygate server.

use actix_cors::Cors;

/// Build the CORS middleware from allowed origins.
///
/// A `*` entry allows any origin. Config loading refuses it outside
/// insecure dev mode.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            allowed.iter().any(|a| a == "*" || a == origin_str)
        })
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .expose_headers(vec![actix_web::http::header::WWW_AUTHENTICATE])
        .max_age(3600)
}
