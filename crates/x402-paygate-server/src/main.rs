use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paygate::gate::PURGE_INTERVAL;
use paygate_server::{config::PaygateConfig, cors::build_cors, error, routes, state::AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match PaygateConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "loaded configuration");

    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();

    tracing::info!("Starting x402-paygate on port {}", port);
    tracing::info!("Recipient: {:#x}", config.recipient);
    tracing::info!(
        "Price: {} {} (decimals {})",
        config.payment_amount,
        config.payment_token,
        config.token_decimals
    );
    tracing::info!(
        "TTL: challenge {}s, token {}s",
        config.challenge_ttl_secs,
        config.token_ttl_secs
    );
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);

    let state = match AppState::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialise payment gate");
            std::process::exit(1);
        }
    };

    match state.gate.purge_expired() {
        Ok(0) => {}
        Ok(n) => tracing::info!("Purged {n} expired challenges from previous runs"),
        Err(e) => tracing::warn!("Failed to purge expired challenges: {e}"),
    }
    state.gate.start_purge_task(PURGE_INTERVAL);

    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    tracing::info!(
        "Endpoints: POST /challenge, POST /proof, GET /content, GET /challenge/{{id}}, \
         GET /payments, GET /health, GET /metrics"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(
                web::JsonConfig::default()
                    .limit(65_536)
                    .error_handler(error::json_error_handler),
            )
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
