use alloy::primitives::Address;
use std::ops::RangeInclusive;
use std::str::FromStr;
use url::Url;

const DEFAULT_PAYMENT_AMOUNT: &str = "0.001";
const DEFAULT_PAYMENT_TOKEN: &str = "USDC";
const DEFAULT_TOKEN_DECIMALS: u32 = 6;
const MAX_TOKEN_DECIMALS: u32 = 36;
const DEFAULT_DB_PATH: &str = "./x402-paygate.db";
const DEFAULT_PORT: u16 = 4021;
const DEFAULT_RATE_LIMIT_RPM: u64 = 60;
const MAX_RATE_LIMIT_RPM: u64 = 1_000_000;
const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_VERIFY_MAX_ATTEMPTS: u32 = 3;
const MAX_VERIFY_TIMEOUT_SECS: u64 = 300;
const MAX_VERIFY_ATTEMPTS: u32 = 10;
const MIN_SECRET_LEN: usize = 32;

/// Which settlement verifier the server runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierMode {
    /// Remote facilitator, behind a local payer-signature check.
    Facilitator { url: String },
    /// Accept every proof. Development only.
    AcceptAll,
}

/// Where challenges live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite(String),
    Memory,
}

#[derive(Clone)]
pub struct PaygateConfig {
    /// Access token signing secret
    pub secret: Vec<u8>,
    /// Address payments must be sent to
    pub recipient: Address,
    /// Human-readable price, e.g. "0.001"
    pub payment_amount: String,
    /// Asset symbol
    pub payment_token: String,
    pub token_decimals: u32,
    pub challenge_ttl_secs: u64,
    pub token_ttl_secs: u64,
    pub verifier: VerifierMode,
    /// HMAC shared secret for facilitator auth (None = dev mode)
    pub facilitator_secret: Option<Vec<u8>>,
    pub verify_timeout_secs: u64,
    pub verify_max_attempts: u32,
    pub store: StoreBackend,
    pub port: u16,
    /// Rate limit requests per minute per IP
    pub rate_limit_rpm: u64,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Bearer token required for /metrics
    pub metrics_token: Option<String>,
    /// Serve /metrics without a token when none is configured
    pub public_metrics: bool,
    pub insecure_dev: bool,
}

impl std::fmt::Debug for PaygateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaygateConfig")
            .field("secret", &"[REDACTED]")
            .field("recipient", &self.recipient)
            .field("payment_amount", &self.payment_amount)
            .field("payment_token", &self.payment_token)
            .field("token_decimals", &self.token_decimals)
            .field("challenge_ttl_secs", &self.challenge_ttl_secs)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("verifier", &self.verifier)
            .field(
                "facilitator_secret",
                &self.facilitator_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("verify_timeout_secs", &self.verify_timeout_secs)
            .field("verify_max_attempts", &self.verify_max_attempts)
            .field("store", &self.store)
            .field("port", &self.port)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_metrics", &self.public_metrics)
            .field("insecure_dev", &self.insecure_dev)
            .finish()
    }
}

impl PaygateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| var(key).map(|v| v == "true" || v == "1").unwrap_or(false);

        let insecure_dev = flag("PAYGATE_INSECURE_DEV");

        // Required: signing secret
        let secret = var("PAYGATE_SECRET")
            .ok_or(ConfigError::MissingRequired("PAYGATE_SECRET"))?
            .into_bytes();
        if secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "PAYGATE_SECRET is too short ({} bytes, minimum {MIN_SECRET_LEN}), \
                 use `openssl rand -hex 32` to generate a secure secret",
                secret.len()
            );
        }

        // Required: recipient address
        let recipient_str =
            var("RECIPIENT_ADDRESS").ok_or(ConfigError::MissingRequired("RECIPIENT_ADDRESS"))?;
        let recipient: Address = recipient_str
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(recipient_str.clone()))?;
        if recipient == Address::ZERO {
            return Err(ConfigError::InvalidAddress(
                "RECIPIENT_ADDRESS must not be the zero address".to_string(),
            ));
        }

        // Pricing
        let payment_amount =
            var("PAYMENT_AMOUNT").unwrap_or_else(|| DEFAULT_PAYMENT_AMOUNT.to_string());
        let payment_token =
            var("PAYMENT_TOKEN").unwrap_or_else(|| DEFAULT_PAYMENT_TOKEN.to_string());
        let token_decimals = parse_bounded(
            &var,
            "TOKEN_DECIMALS",
            DEFAULT_TOKEN_DECIMALS,
            0..=MAX_TOKEN_DECIMALS,
        )?;
        paygate::price::parse_amount(&payment_amount, token_decimals)
            .map_err(|e| ConfigError::InvalidPrice(e.to_string()))?;

        // Lifetimes
        let challenge_ttl_secs = parse_bounded(
            &var,
            "CHALLENGE_TTL_SECS",
            paygate::gate::DEFAULT_CHALLENGE_TTL_SECS,
            1..=u64::MAX,
        )?;
        let token_ttl_secs = parse_bounded(
            &var,
            "TOKEN_TTL_SECS",
            paygate::gate::DEFAULT_TOKEN_TTL_SECS,
            1..=u64::MAX,
        )?;

        // Settlement verifier
        let facilitator_secret = var("FACILITATOR_SHARED_SECRET").map(String::into_bytes);
        let verifier = match var("PAYGATE_VERIFIER").as_deref().unwrap_or("facilitator") {
            "facilitator" => {
                let url = var("FACILITATOR_URL")
                    .ok_or(ConfigError::MissingRequired("FACILITATOR_URL"))?;
                Url::parse(&url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;

                if let Some(ref s) = facilitator_secret {
                    if s.len() < MIN_SECRET_LEN {
                        tracing::warn!(
                            "FACILITATOR_SHARED_SECRET is too short ({} bytes, minimum {MIN_SECRET_LEN})",
                            s.len()
                        );
                    }
                } else if insecure_dev {
                    tracing::warn!(
                        "PAYGATE_INSECURE_DEV=true: facilitator requests will be UNAUTHENTICATED. \
                         DO NOT use this in production!"
                    );
                } else {
                    tracing::error!(
                        "FACILITATOR_SHARED_SECRET is required. \
                         Set it to a secure random value (e.g. `openssl rand -hex 32`). \
                         For local development only, set PAYGATE_INSECURE_DEV=true to skip."
                    );
                    return Err(ConfigError::MissingRequired("FACILITATOR_SHARED_SECRET"));
                }
                VerifierMode::Facilitator { url }
            }
            "accept-all" => {
                if !insecure_dev {
                    return Err(ConfigError::Insecure(
                        "PAYGATE_VERIFIER=accept-all requires PAYGATE_INSECURE_DEV=true".to_string(),
                    ));
                }
                tracing::warn!(
                    "PAYGATE_VERIFIER=accept-all: every payment proof is accepted. \
                     DO NOT use this in production!"
                );
                VerifierMode::AcceptAll
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    var: "PAYGATE_VERIFIER",
                    value: other.to_string(),
                })
            }
        };

        let verify_timeout_secs = parse_bounded(
            &var,
            "VERIFY_TIMEOUT_SECS",
            DEFAULT_VERIFY_TIMEOUT_SECS,
            1..=MAX_VERIFY_TIMEOUT_SECS,
        )?;
        let verify_max_attempts = parse_bounded(
            &var,
            "VERIFY_MAX_ATTEMPTS",
            DEFAULT_VERIFY_MAX_ATTEMPTS,
            1..=MAX_VERIFY_ATTEMPTS,
        )?;

        // Storage
        let store = match var("STORE_DB_PATH") {
            Some(p) if p == "memory" => {
                tracing::warn!(
                    "STORE_DB_PATH=memory: challenges and spent references are lost on restart"
                );
                StoreBackend::Memory
            }
            Some(p) => StoreBackend::Sqlite(p),
            None => StoreBackend::Sqlite(DEFAULT_DB_PATH.to_string()),
        };

        // HTTP
        let port = parse_var(&var, "PORT", DEFAULT_PORT)?;
        // actix-governor cannot build a limiter for 0 requests per minute.
        let rate_limit_rpm = parse_bounded(
            &var,
            "RATE_LIMIT_RPM",
            DEFAULT_RATE_LIMIT_RPM,
            1..=MAX_RATE_LIMIT_RPM,
        )?;

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        if allowed_origins.iter().any(|o| o == "*") && !insecure_dev {
            tracing::error!(
                "Wildcard CORS origin '*' is not allowed for payment endpoints in production. \
                 Specify explicit origins in ALLOWED_ORIGINS, or set PAYGATE_INSECURE_DEV=true for dev."
            );
            return Err(ConfigError::Insecure(
                "wildcard CORS origin '*' is not allowed in production".to_string(),
            ));
        }

        let metrics_token = var("METRICS_TOKEN");
        let public_metrics = flag("PAYGATE_PUBLIC_METRICS");

        Ok(Self {
            secret,
            recipient,
            payment_amount,
            payment_token,
            token_decimals,
            challenge_ttl_secs,
            token_ttl_secs,
            verifier,
            facilitator_secret,
            verify_timeout_secs,
            verify_max_attempts,
            store,
            port,
            rate_limit_rpm,
            allowed_origins,
            metrics_token,
            public_metrics,
            insecure_dev,
        })
    }
}

fn parse_var<T, V>(var: &V, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: key,
            value: raw,
        }),
    }
}

/// [`parse_var`], then reject values outside `range`.
fn parse_bounded<T, V>(
    var: &V,
    key: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + ToString,
    V: Fn(&str) -> Option<String>,
{
    let value = parse_var(var, key, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::InvalidValue {
            var: key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },

    #[error("insecure configuration refused: {0}")]
    Insecure(String),

    #[error("failed to open challenge store: {0}")]
    Store(#[from] paygate::StoreError),

    #[error("failed to build settlement verifier: {0}")]
    Verifier(#[from] paygate::VerifierError),
}
