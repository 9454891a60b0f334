//! x402 paygate HTTP server.
//!
//! Serves the challenge / proof / access-token flow over actix-web and gates
//! `GET /content` behind a valid access token.
//!
//! # Modules
//!
//! - [`config`] — environment configuration ([`PaygateConfig`])
//! - [`state`] — shared state wiring store, verifier and gate ([`AppState`])
//! - [`routes`] — HTTP handlers
//! - [`middleware`] — bearer-token gate answering 402 with a fresh challenge
//! - [`error`] — maps gate errors onto HTTP responses
//! - [`metrics`] — Prometheus metrics

pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ConfigError, PaygateConfig};
pub use error::ApiError;
pub use middleware::{bearer_token, payment_required_body, require_access};
pub use state::AppState;
