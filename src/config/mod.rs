mod basic;
mod convert;
mod guard;
mod pool;
mod relay;
mod upstream;

pub use basic::BasicConfig;
pub use convert::ConvertConfig;
pub use guard::GuardConfig;
pub use pool::{PoolConfig, RotationStrategy};
pub use relay::{RelayConfig, SignaturePolicy};
pub use upstream::{LedgerConfig, UpstreamConfig, UpstreamEnvironment};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Upstream code-assist settings (see `upstream` table in config.toml).
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Credential pool rotation settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Dialect conversion settings.
    #[serde(default)]
    pub convert: ConvertConfig,

    /// Stream relay settings (heartbeats, non-stream shim, signatures).
    #[serde(default)]
    pub relay: RelayConfig,

    /// IP guard settings.
    #[serde(default)]
    pub guard: GuardConfig,

    /// Quota ledger settings.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Recognized environment variables and the config keys they override.
///
/// The standard proxy variables (`HTTPS_PROXY`/`HTTP_PROXY`/`ALL_PROXY`) are
/// honored by reqwest itself and need no mapping here.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("API_KEY", "basic.api_key"),
    ("ADMIN_USERNAME", "basic.admin_username"),
    ("ADMIN_PASSWORD", "basic.admin_password"),
    ("JWT_SECRET", "basic.jwt_secret"),
    ("PROXY", "upstream.proxy"),
    ("SYSTEM_INSTRUCTION", "convert.system_instruction"),
    ("OFFICIAL_SYSTEM_PROMPT", "convert.official_prompt"),
    ("IMAGE_BASE_URL", "relay.image_base_url"),
    ("DEBUG_DUMP_REQUEST_RESPONSE", "basic.debug_dump"),
];

impl Config {
    /// Builds a Figment merging defaults, an optional config TOML file and
    /// recognized environment variables.
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
        }
        for (var, key) in ENV_OVERRIDES {
            figment = figment.merge(Env::raw().only(&[*var]).map(|_| (*key).into()));
        }
        figment
    }

    /// Loads configuration by merging defaults, `config.toml` if present, and
    /// environment overrides.
    ///
    /// Note: this does **not** generate missing secrets. Binaries should call
    /// [`Config::load`] instead to get the autogenerate-and-warn behavior.
    pub fn from_optional_sources() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    /// Loads configuration and fills in missing secrets (caller API key,
    /// admin credentials, JWT secret), warning once per generated value.
    pub fn load() -> Self {
        let mut cfg = Self::from_optional_sources();
        cfg.basic.ensure_secrets();
        cfg
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_sources);
