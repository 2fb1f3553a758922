use serde::{Deserialize, Serialize};
use url::Url;

/// Which code-assist host generate requests go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamEnvironment {
    #[default]
    Production,
    Sandbox,
}

impl UpstreamEnvironment {
    pub fn base_url(self) -> &'static str {
        match self {
            UpstreamEnvironment::Production => "https://cloudcode-pa.googleapis.com",
            UpstreamEnvironment::Sandbox => "https://cloudcode-pa.sandbox.googleapis.com",
        }
    }
}

/// Upstream code-assist configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Host selection. TOML: `upstream.environment`. Default: `production`.
    #[serde(default)]
    pub environment: UpstreamEnvironment,

    /// User-Agent presented on every upstream call.
    /// TOML: `upstream.user_agent`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional upstream HTTP proxy. If set, used for reqwest clients;
    /// otherwise the standard proxy env vars apply. Env: `PROXY`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Allow HTTP/2 multiplexing for reqwest clients; disabled forces HTTP/1.
    /// TOML: `upstream.enable_multiplexing`. Default: `true`.
    #[serde(default = "default_enable_multiplexing")]
    pub enable_multiplexing: bool,

    /// Max tries per caller request for retryable upstream failures
    /// (rate limit / capacity). The counter is shared between both kinds.
    /// TOML: `upstream.retry_max_times`. Default: `3`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// TCP connect timeout in seconds. Default: `10`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Total per-call timeout in seconds. Default: `300`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Idle timeout between stream reads in seconds. Default: `120`.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Models the gateway advertises and accepts.
    /// TOML: `upstream.model_list`.
    #[serde(default = "default_model_list")]
    pub model_list: Vec<String>,

    /// OAuth refresh client credentials (refresh-token grant only).
    #[serde(default = "default_oauth_client_id")]
    pub oauth_client_id: String,

    #[serde(default = "default_oauth_client_secret")]
    pub oauth_client_secret: String,

    /// OAuth refresh requests per second for the refresh worker.
    /// TOML: `upstream.oauth_tps`. Default: `5`.
    #[serde(default = "default_oauth_tps")]
    pub oauth_tps: usize,

    /// How often the background quota pass calls `fetchAvailableModels`
    /// per credential, in seconds. Default: `300`.
    #[serde(default = "default_quota_refresh_secs")]
    pub quota_refresh_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            environment: UpstreamEnvironment::default(),
            user_agent: default_user_agent(),
            proxy: None,
            enable_multiplexing: default_enable_multiplexing(),
            retry_max_times: default_retry_max_times(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            model_list: default_model_list(),
            oauth_client_id: default_oauth_client_id(),
            oauth_client_secret: default_oauth_client_secret(),
            oauth_tps: default_oauth_tps(),
            quota_refresh_secs: default_quota_refresh_secs(),
        }
    }
}

/// Quota ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Idle TTL for quota entries in seconds. Default: `3600`.
    #[serde(default = "default_quota_idle_ttl_secs")]
    pub quota_idle_ttl_secs: u64,

    /// Flush-to-disk interval in seconds. Default: `60`.
    #[serde(default = "default_flush_secs")]
    pub flush_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            quota_idle_ttl_secs: default_quota_idle_ttl_secs(),
            flush_secs: default_flush_secs(),
        }
    }
}

fn default_user_agent() -> String {
    "GeminiCLI/0.26.0/gemini-3-pro-preview (linux; x64)".to_string()
}

fn default_enable_multiplexing() -> bool {
    true
}

fn default_retry_max_times() -> usize {
    3
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_model_list() -> Vec<String> {
    vec![
        "gemini-2.5-pro".to_string(),
        "gemini-2.5-flash".to_string(),
        "gemini-3-pro-preview".to_string(),
        "gemini-3-pro-image".to_string(),
    ]
}

fn default_oauth_client_id() -> String {
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com".to_string()
}

fn default_oauth_client_secret() -> String {
    "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".to_string()
}

fn default_oauth_tps() -> usize {
    5
}

fn default_quota_refresh_secs() -> u64 {
    300
}

fn default_quota_idle_ttl_secs() -> u64 {
    3600
}

fn default_flush_secs() -> u64 {
    60
}
