use serde::{Deserialize, Serialize};

/// IP guard configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardConfig {
    /// Violation counting window in seconds. Default: `600`.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Violations inside the window that trigger a temp block. Default: `10`.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// First temp-block duration in seconds, doubling on each subsequent
    /// block inside the promotion window. Default: `1800`.
    #[serde(default = "default_temp_block_secs")]
    pub temp_block_secs: u64,

    /// Window inside which repeated temp blocks escalate. Default: `86400`.
    #[serde(default = "default_promote_window_secs")]
    pub promote_window_secs: u64,

    /// Consecutive temp-block cycles that promote to a permanent block.
    /// Default: `5`.
    #[serde(default = "default_permanent_cycles")]
    pub permanent_cycles: u32,

    /// IPs or CIDRs that never accumulate violations.
    /// TOML: `guard.whitelist`.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            threshold: default_threshold(),
            temp_block_secs: default_temp_block_secs(),
            promote_window_secs: default_promote_window_secs(),
            permanent_cycles: default_permanent_cycles(),
            whitelist: Vec::new(),
        }
    }
}

fn default_window_secs() -> u64 {
    600
}

fn default_threshold() -> u32 {
    10
}

fn default_temp_block_secs() -> u64 {
    1800
}

fn default_promote_window_secs() -> u64 {
    86_400
}

fn default_permanent_cycles() -> u32 {
    5
}
