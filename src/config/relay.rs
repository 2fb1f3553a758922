use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// When upstream thought signatures are written back to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePolicy {
    #[default]
    Always,
    /// Cache only when the response carried tool calls or came from an
    /// image model.
    ToolsOrImage,
    Never,
}

/// Stream relay configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Quiet-interval heartbeat period in milliseconds; `0` disables.
    /// TOML: `relay.heartbeat_ms`. Default: `15000`.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Service non-stream callers by streaming upstream and collecting to
    /// one response. TOML: `relay.fake_non_stream`. Default: `true`.
    #[serde(default = "default_fake_non_stream")]
    pub fake_non_stream: bool,

    /// TOML: `relay.signature_policy`. Default: `always`.
    #[serde(default)]
    pub signature_policy: SignaturePolicy,

    /// Where the image sink stores generated images.
    /// TOML: `relay.image_dir`. Default: `images`.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Public URL prefix for saved images. Env: `IMAGE_BASE_URL`.
    #[serde(default = "default_image_base_url")]
    pub image_base_url: String,

    /// Model used by the SD-compat image routes.
    /// TOML: `relay.image_model`. Default: `gemini-3-pro-image`.
    #[serde(default = "default_image_model")]
    pub image_model: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            fake_non_stream: default_fake_non_stream(),
            signature_policy: SignaturePolicy::default(),
            image_dir: default_image_dir(),
            image_base_url: default_image_base_url(),
            image_model: default_image_model(),
        }
    }
}

fn default_heartbeat_ms() -> u64 {
    15_000
}

fn default_fake_non_stream() -> bool {
    true
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_image_base_url() -> String {
    "/images".to_string()
}

fn default_image_model() -> String {
    "gemini-3-pro-image".to_string()
}
