use std::sync::Arc;
use std::time::Duration;

use paygate::store::ChallengeStore;
use paygate::verifier::{RetryPolicy, SettlementVerifier};
use paygate::{
    GateConfig, HttpSettlementVerifier, InMemoryChallengeStore, PayerSignatureVerifier,
    PaymentGate, SqliteChallengeStore, StaticVerifier,
};

use crate::config::{ConfigError, PaygateConfig, StoreBackend, VerifierMode};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<PaymentGate>,
    /// Released to holders of a valid access token
    pub content: Arc<serde_json::Value>,
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
}

impl AppState {
    /// State around an already-built gate. Metrics start protected.
    pub fn new(gate: PaymentGate) -> Self {
        Self {
            gate: Arc::new(gate),
            content: Arc::new(default_content()),
            metrics_token: None,
            public_metrics: false,
        }
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = Arc::new(content);
        self
    }

    pub fn with_metrics_access(mut self, token: Option<String>, public: bool) -> Self {
        self.metrics_token = token;
        self.public_metrics = public;
        self
    }

    /// Wire store, verifier and gate from configuration.
    pub fn from_config(config: &PaygateConfig) -> Result<Self, ConfigError> {
        let gate_config = GateConfig::new(
            &config.payment_amount,
            config.token_decimals,
            config.payment_token.clone(),
            config.recipient,
        )
        .map_err(|e| ConfigError::InvalidPrice(e.to_string()))?
        .with_challenge_ttl(config.challenge_ttl_secs)
        .with_token_ttl(config.token_ttl_secs)
        .with_retry(RetryPolicy {
            attempt_timeout: Duration::from_secs(config.verify_timeout_secs),
            max_attempts: config.verify_max_attempts,
            ..RetryPolicy::default()
        });

        let store: Arc<dyn ChallengeStore> = match &config.store {
            StoreBackend::Sqlite(path) => {
                let store = SqliteChallengeStore::open(path)?;
                tracing::info!("Challenge store: SQLite at {}", path);
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::info!("Challenge store: in-memory");
                Arc::new(InMemoryChallengeStore::new())
            }
        };

        let verifier: Arc<dyn SettlementVerifier> = match &config.verifier {
            VerifierMode::Facilitator { url } => {
                let remote = HttpSettlementVerifier::new(url, config.facilitator_secret.clone())?;
                tracing::info!("Settlement verifier: facilitator at {}", remote.endpoint());
                Arc::new(PayerSignatureVerifier::new(remote))
            }
            VerifierMode::AcceptAll => {
                tracing::warn!("Settlement verifier: accept-all (insecure dev mode)");
                Arc::new(StaticVerifier::accept_all())
            }
        };

        let gate = PaymentGate::new(gate_config, store, verifier, &config.secret);
        Ok(Self::new(gate)
            .with_metrics_access(config.metrics_token.clone(), config.public_metrics))
    }
}

/// The gated resource served by `GET /content`.
pub fn default_content() -> serde_json::Value {
    serde_json::json!({
        "title": "x402 premium content",
        "description": "This resource is protected by the x402 payment protocol",
        "features": [
            "HTTP 402 Payment Required",
            "Single-use payment challenges",
            "HMAC-signed access tokens",
            "Pluggable settlement verification",
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(extra: &[(&'static str, &str)]) -> PaygateConfig {
        let mut vars: HashMap<&'static str, String> = HashMap::from([
            ("PAYGATE_SECRET", "s".repeat(32)),
            (
                "RECIPIENT_ADDRESS",
                "0x1111111111111111111111111111111111111111".to_string(),
            ),
            ("FACILITATOR_URL", "http://localhost:4022".to_string()),
            ("FACILITATOR_SHARED_SECRET", "f".repeat(32)),
            ("STORE_DB_PATH", "memory".to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(*k, v.to_string());
        }
        PaygateConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_from_config_applies_pricing_and_ttls() {
        let state = AppState::from_config(&config(&[
            ("PAYMENT_AMOUNT", "1.5"),
            ("CHALLENGE_TTL_SECS", "120"),
            ("METRICS_TOKEN", "m"),
        ]))
        .unwrap();

        let gate_config = state.gate.config();
        assert_eq!(gate_config.required_amount, "1.5");
        assert_eq!(gate_config.amount, alloy::primitives::U256::from(1_500_000u64));
        assert_eq!(gate_config.challenge_ttl_secs, 120);
        assert_eq!(gate_config.retry.max_attempts, 3);
        assert_eq!(state.metrics_token.as_deref(), Some("m"));

        let c = state.gate.issue_challenge().unwrap();
        assert_eq!(c.expires_at - c.created_at, 120);
    }

    #[test]
    fn test_from_config_opens_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("challenges.db");
        let path_str = path.to_str().unwrap().to_string();

        let state =
            AppState::from_config(&config(&[("STORE_DB_PATH", path_str.as_str())])).unwrap();
        let c = state.gate.issue_challenge().unwrap();
        assert!(state.gate.challenge_status(&c.id).is_ok());
        assert!(path.exists());
    }
}
