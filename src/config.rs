//! Centralized, environment-driven configuration.
//!
//! Mirrors the runtime configuration pattern: load a `.env` file via
//! `dotenvy` first, then read typed values from the environment with sane
//! defaults, so the numeric literals named throughout the component design
//! (script size caps, timeouts, pool sizing, rotation windows...) live in one
//! place instead of being scattered as magic numbers through the engines.
use std::time::Duration;

/// Central, typed configuration for every tunable named in the component design.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum serialized script source size (§4.1).
    pub max_script_size_bytes: usize,
    /// Wall-clock budget for a single sandbox execution (§4.1).
    pub script_timeout: Duration,
    /// Soft cap on pooled sandbox instances before bursting (§4.1).
    pub sandbox_pool_soft_cap: usize,
    /// Hard concurrency cap on simultaneous sandbox executions (§4.1).
    pub sandbox_max_concurrent: usize,
    /// Idle duration after which a pooled sandbox instance is destroyed (§4.1).
    pub sandbox_ttl: Duration,
    /// Maximum nesting depth for `helpers.trace` child spans (§9).
    pub max_trace_nesting: usize,
    /// Maximum number of layers in a compiled pipeline execution plan (§4.2).
    pub max_chain_depth: usize,
    /// JWKS rotation interval (§4.5).
    pub jwks_rotation_interval: Duration,
    /// JWKS retention window before pruning a non-latest key (§4.5).
    pub jwks_retention_window: Duration,
    /// JWT lifetime issued by the API key exchange (§4.5).
    pub jwt_ttl: Duration,
    /// Idempotency dedup TTL for webhook queue consumption (§4.6).
    pub webhook_idempotency_ttl: Duration,
    /// Delivery response body truncation length (§4.6).
    pub webhook_response_body_cap_bytes: usize,
    /// Issuer claim stamped into issued JWTs.
    pub jwt_issuer: String,
    /// Audience claim stamped into issued JWTs.
    pub jwt_audience: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_script_size_bytes: 10 * 1024,
            script_timeout: Duration::from_millis(1000),
            sandbox_pool_soft_cap: 20,
            sandbox_max_concurrent: 64,
            sandbox_ttl: Duration::from_secs(5 * 60),
            max_trace_nesting: 2,
            max_chain_depth: 10,
            jwks_rotation_interval: Duration::from_secs(30 * 24 * 60 * 60),
            jwks_retention_window: Duration::from_secs(60 * 24 * 60 * 60),
            jwt_ttl: Duration::from_secs(900),
            webhook_idempotency_ttl: Duration::from_secs(48 * 60 * 60),
            webhook_response_body_cap_bytes: 1024,
            jwt_issuer: "authgraph".to_string(),
            jwt_audience: "authgraph-api".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment, falling back to
    /// defaults for anything unset. Reads a `.env` file first if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            max_script_size_bytes: env_usize("MAX_SCRIPT_SIZE", defaults.max_script_size_bytes),
            script_timeout: Duration::from_millis(env_u64(
                "SCRIPT_TIMEOUT_MS",
                defaults.script_timeout.as_millis() as u64,
            )),
            sandbox_pool_soft_cap: env_usize(
                "SANDBOX_POOL_SOFT_CAP",
                defaults.sandbox_pool_soft_cap,
            ),
            sandbox_max_concurrent: env_usize(
                "SANDBOX_MAX_CONCURRENT",
                defaults.sandbox_max_concurrent,
            ),
            sandbox_ttl: Duration::from_secs(env_u64(
                "SANDBOX_TTL_SECS",
                defaults.sandbox_ttl.as_secs(),
            )),
            max_trace_nesting: env_usize("MAX_TRACE_NESTING", defaults.max_trace_nesting),
            max_chain_depth: env_usize("MAX_CHAIN_DEPTH", defaults.max_chain_depth),
            jwks_rotation_interval: Duration::from_secs(env_u64(
                "JWKS_ROTATION_INTERVAL_SECS",
                defaults.jwks_rotation_interval.as_secs(),
            )),
            jwks_retention_window: Duration::from_secs(env_u64(
                "JWKS_RETENTION_WINDOW_SECS",
                defaults.jwks_retention_window.as_secs(),
            )),
            jwt_ttl: Duration::from_secs(env_u64("JWT_TTL_SECS", defaults.jwt_ttl.as_secs())),
            webhook_idempotency_ttl: Duration::from_secs(env_u64(
                "WEBHOOK_IDEMPOTENCY_TTL_SECS",
                defaults.webhook_idempotency_ttl.as_secs(),
            )),
            webhook_response_body_cap_bytes: env_usize(
                "WEBHOOK_RESPONSE_BODY_CAP_BYTES",
                defaults.webhook_response_body_cap_bytes,
            ),
            jwt_issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            jwt_audience: std::env::var("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
