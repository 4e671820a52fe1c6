//! Service configuration.

use fluenta_billing_core::{PricingRegistry, TierPolicyTable};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the data directory for persistent backends
    /// (default: "/data/fluenta-billing").
    pub data_dir: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Per-model pricing rules.
    pub pricing: PricingRegistry,

    /// Per-tier usage policies.
    pub policies: TierPolicyTable,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// `PRICING_FILE` may point at a JSON pricing registry; otherwise the
    /// built-in table is used.
    #[must_use]
    pub fn from_env() -> Self {
        let pricing = std::env::var("PRICING_FILE")
            .ok()
            .and_then(|path| load_pricing_file(&path))
            .unwrap_or_default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/data/fluenta-billing".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            pricing,
            policies: TierPolicyTable::default(),
        }
    }
}

/// Load a pricing registry from a JSON file, logging rather than failing on
/// problems so a bad file never takes the service down at boot.
fn load_pricing_file(path: &str) -> Option<PricingRegistry> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(registry) => {
                tracing::info!(path = %path, "Loaded pricing registry from file");
                Some(registry)
            }
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Invalid pricing file, using defaults");
                None
            }
        },
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Cannot read pricing file, using defaults");
            None
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/fluenta-billing".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing: PricingRegistry::default(),
            policies: TierPolicyTable::default(),
        }
    }
}
