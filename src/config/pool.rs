use serde::{Deserialize, Serialize};

/// The rule used to decide when the credential cursor advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Every call advances the cursor.
    #[default]
    RoundRobin,
    /// The cursor advances after `rotate_every` calls on the same credential.
    RequestCount,
    /// Credentials are served while their coarse has-quota flag holds; when
    /// the list empties, all flags reset (upstream quota window assumed
    /// rolled) and rotation restarts.
    QuotaExhausted,
}

/// Credential pool configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// TOML: `pool.strategy`. Default: `round_robin`.
    #[serde(default)]
    pub strategy: RotationStrategy,

    /// `N` for the `request_count` strategy. Default: `10`.
    #[serde(default = "default_rotate_every")]
    pub rotate_every: u32,

    /// Access tokens expiring within this buffer are refreshed before use.
    /// TOML: `pool.refresh_buffer_secs`. Default: `60`.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::default(),
            rotate_every: default_rotate_every(),
            refresh_buffer_secs: default_refresh_buffer_secs(),
        }
    }
}

fn default_rotate_every() -> u32 {
    10
}

fn default_refresh_buffer_secs() -> u64 {
    60
}
